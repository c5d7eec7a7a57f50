use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Certificate, Client, StatusCode, Url};
use ring::digest::{SHA256, digest};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, warn};

const SHA256_METHOD: &str = "sha256";
const HTTPS_SCHEME: &str = "https";

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Failed to read CA certificate {path}: {source}")]
    CaCertificateRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid CA certificate {path}: {reason}")]
    CaCertificateInvalid { path: PathBuf, reason: String },
    #[error("Unsupported CA fingerprint '{0}', expected 'SHA256: <hex>'")]
    UnsupportedFingerprint(String),
    #[error("CA certificate fingerprint mismatch: expected {expected}, got {actual}")]
    FingerprintMismatch { expected: String, actual: String },
    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("Request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("Request to {url} returned {status}")]
    Status { url: String, status: StatusCode },
}

/// The CA a request must be verified against.
#[derive(Debug, Clone, Copy)]
pub struct CaTrust<'a> {
    pub ca_cert_path: &'a Path,
    /// `SHA256: <hex>` fingerprint the CA file must match, when known.
    pub fingerprint: Option<&'a str>,
}

/// Transport used by the bootstrap checks.
///
/// Implementations verify the TLS peer against `trust` only and treat any
/// non-2xx response as an error.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str, trust: CaTrust<'_>) -> Result<Vec<u8>, FetchError>;
}

/// reqwest-backed fetcher that pins TLS to the provider CA.
///
/// One client is built per CA file and reused for every later request
/// against that CA.
#[derive(Debug)]
pub struct HttpFetcher {
    timeout: Duration,
    clients: Mutex<HashMap<PathBuf, Client>>,
}

impl HttpFetcher {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            clients: Mutex::new(HashMap::new()),
        }
    }

    async fn client_for(&self, trust: CaTrust<'_>) -> Result<Client, FetchError> {
        let cached = self
            .clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(trust.ca_cert_path)
            .cloned();
        if let Some(client) = cached {
            return Ok(client);
        }

        let client = self.build_client(trust).await?;
        self.clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(trust.ca_cert_path.to_path_buf(), client.clone());
        Ok(client)
    }

    async fn build_client(&self, trust: CaTrust<'_>) -> Result<Client, FetchError> {
        let pem = fs::read(trust.ca_cert_path)
            .await
            .map_err(|source| FetchError::CaCertificateRead {
                path: trust.ca_cert_path.to_path_buf(),
                source,
            })?;
        if let Some(expected) = trust.fingerprint {
            verify_ca_fingerprint(trust.ca_cert_path, &pem, expected)?;
        }
        let certificate =
            Certificate::from_pem(&pem).map_err(|err| FetchError::CaCertificateInvalid {
                path: trust.ca_cert_path.to_path_buf(),
                reason: err.to_string(),
            })?;

        Client::builder()
            .tls_built_in_root_certs(false)
            .add_root_certificate(certificate)
            .timeout(self.timeout)
            .build()
            .map_err(FetchError::Client)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str, trust: CaTrust<'_>) -> Result<Vec<u8>, FetchError> {
        if !uses_tls(url) {
            warn!("{url} is not an https URL; the provider CA is not enforced");
        }
        let client = self.client_for(trust).await?;
        debug!("GET {url} (CA {})", trust.ca_cert_path.display());
        let response = client
            .get(url)
            .send()
            .await
            .map_err(|source| FetchError::Request {
                url: url.to_string(),
                source,
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status,
            });
        }
        let body = response
            .bytes()
            .await
            .map_err(|source| FetchError::Request {
                url: url.to_string(),
                source,
            })?;
        Ok(body.to_vec())
    }
}

/// Checks the DER encoding of the PEM certificate against a published
/// `SHA256: <hex>` fingerprint.
///
/// # Errors
/// Returns an error if the fingerprint format is unsupported, the PEM cannot
/// be decoded, or the digests differ.
pub fn verify_ca_fingerprint(path: &Path, pem: &[u8], expected: &str) -> Result<(), FetchError> {
    let (method, hex) = expected
        .split_once(':')
        .ok_or_else(|| FetchError::UnsupportedFingerprint(expected.to_string()))?;
    if !method.trim().eq_ignore_ascii_case(SHA256_METHOD) {
        return Err(FetchError::UnsupportedFingerprint(expected.to_string()));
    }
    let expected_hex = hex.trim().replace(':', "").to_ascii_lowercase();

    let (_, parsed) = x509_parser::pem::parse_x509_pem(pem).map_err(|err| {
        FetchError::CaCertificateInvalid {
            path: path.to_path_buf(),
            reason: err.to_string(),
        }
    })?;
    let actual = sha256_hex(&parsed.contents);
    if actual != expected_hex {
        return Err(FetchError::FingerprintMismatch {
            expected: expected_hex,
            actual,
        });
    }
    Ok(())
}

fn uses_tls(url: &str) -> bool {
    Url::parse(url).is_ok_and(|url| url.scheme() == HTTPS_SCHEME)
}

fn sha256_hex(bytes: &[u8]) -> String {
    let digest = digest(&SHA256, bytes);
    let mut output = String::with_capacity(digest.as_ref().len() * 2);
    for byte in digest.as_ref() {
        let _ = write!(output, "{byte:02x}");
    }
    output
}
