use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use tokio::fs;

use crate::fetch::CaTrust;

const LEAP_DIR: &str = "leap";
const PROVIDERS_DIR: &str = "providers";
const PROVIDER_FILE_NAME: &str = "provider.json";
const EIP_SERVICE_FILE_NAME: &str = "eip-service.json";
const KEYS_DIR: &str = "keys";
const CA_CERT_PATH: [&str; 2] = ["ca", "cacert.pem"];
const CLIENT_CERT_PATH: [&str; 2] = ["client", "openvpn.pem"];

/// Resolves where provider artifacts live under a path prefix.
///
/// Everything for a provider sits under `<prefix>/leap/providers/<domain>/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderLayout {
    prefix: PathBuf,
}

impl ProviderLayout {
    #[must_use]
    pub fn new(prefix: impl Into<PathBuf>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    #[must_use]
    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    #[must_use]
    pub fn provider_dir(&self, domain: &str) -> PathBuf {
        self.prefix.join(LEAP_DIR).join(PROVIDERS_DIR).join(domain)
    }

    #[must_use]
    pub fn provider_config_path(&self, domain: &str) -> PathBuf {
        self.provider_dir(domain).join(PROVIDER_FILE_NAME)
    }

    #[must_use]
    pub fn eip_service_path(&self, domain: &str) -> PathBuf {
        self.provider_dir(domain).join(EIP_SERVICE_FILE_NAME)
    }

    #[must_use]
    pub fn ca_cert_path(&self, domain: &str) -> PathBuf {
        CA_CERT_PATH
            .iter()
            .fold(self.provider_dir(domain).join(KEYS_DIR), |path, part| {
                path.join(part)
            })
    }

    #[must_use]
    pub fn client_cert_path(&self, domain: &str) -> PathBuf {
        CLIENT_CERT_PATH
            .iter()
            .fold(self.provider_dir(domain).join(KEYS_DIR), |path, part| {
                path.join(part)
            })
    }
}

/// Provider descriptor as stored in `provider.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    pub domain: String,
    pub api_uri: String,
    pub api_version: String,
    #[serde(default)]
    pub name: Option<serde_json::Value>,
    #[serde(default)]
    pub ca_cert_uri: Option<String>,
    #[serde(default)]
    pub ca_cert_fingerprint: Option<String>,
    #[serde(default)]
    pub services: Vec<String>,
}

impl ProviderConfig {
    /// Loads `provider.json` from disk.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or is not a valid descriptor.
    pub async fn load(path: &Path) -> Result<Self> {
        let contents = fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_slice(&contents)
            .with_context(|| format!("Failed to parse provider descriptor {}", path.display()))
    }

    /// Parses a provider descriptor from raw JSON bytes.
    ///
    /// # Errors
    /// Returns an error if the bytes are not a valid descriptor.
    pub fn from_slice(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data).context("Invalid provider.json")
    }

    #[must_use]
    pub fn offers_eip(&self) -> bool {
        self.services.iter().any(|service| service == "openvpn")
    }

    /// Builds the read-only context the bootstrap checks run against.
    #[must_use]
    pub fn context(&self, layout: &ProviderLayout) -> ProviderContext {
        ProviderContext {
            domain: self.domain.clone(),
            api_uri: self.api_uri.clone(),
            api_version: self.api_version.clone(),
            ca_cert_path: layout.ca_cert_path(&self.domain),
            ca_cert_fingerprint: self.ca_cert_fingerprint.clone(),
        }
    }
}

/// What the bootstrap checks need to know about a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderContext {
    pub domain: String,
    pub api_uri: String,
    pub api_version: String,
    pub ca_cert_path: PathBuf,
    /// `SHA256: <hex>` fingerprint the CA file must match, when published.
    pub ca_cert_fingerprint: Option<String>,
}

impl ProviderContext {
    /// Joins the API base, API version and the given path segments.
    #[must_use]
    pub fn api_url(&self, segments: &[&str]) -> String {
        let mut url = format!(
            "{}/{}",
            self.api_uri.trim_end_matches('/'),
            self.api_version.trim_matches('/')
        );
        for segment in segments {
            url.push('/');
            url.push_str(segment);
        }
        url
    }

    #[must_use]
    pub fn trust(&self) -> CaTrust<'_> {
        CaTrust {
            ca_cert_path: &self.ca_cert_path,
            fingerprint: self.ca_cert_fingerprint.as_deref(),
        }
    }

    /// Checks the fields every bootstrap step relies on.
    ///
    /// # Errors
    /// Returns a description of the first missing or unusable field.
    pub fn validate(&self) -> Result<(), String> {
        if self.domain.trim().is_empty() {
            return Err("provider domain must not be empty".to_string());
        }
        if self.domain == "."
            || self.domain == ".."
            || self.domain.contains(['/', '\\'])
        {
            return Err(format!(
                "provider domain '{}' is not a valid directory name",
                self.domain
            ));
        }
        if self.api_uri.trim().is_empty() {
            return Err("provider api_uri must not be empty".to_string());
        }
        if self.api_version.trim().is_empty() {
            return Err("provider api_version must not be empty".to_string());
        }
        if self.ca_cert_path.as_os_str().is_empty() {
            return Err("provider ca_cert_path must not be empty".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    const PROVIDER_JSON: &str = r#"{
        "domain": "bitmask.net",
        "api_uri": "https://api.bitmask.net:4430",
        "api_version": "1",
        "name": {"en": "Bitmask"},
        "ca_cert_uri": "https://bitmask.net/ca.crt",
        "ca_cert_fingerprint": "SHA256: abcd",
        "services": ["openvpn"]
    }"#;

    fn context() -> ProviderContext {
        ProviderContext {
            domain: "bitmask.net".to_string(),
            api_uri: "https://api.bitmask.net:4430/".to_string(),
            api_version: "1".to_string(),
            ca_cert_path: PathBuf::from("cacert.pem"),
            ca_cert_fingerprint: None,
        }
    }

    #[test]
    fn test_layout_paths() {
        let layout = ProviderLayout::new("/home/user/.config");

        assert_eq!(
            layout.eip_service_path("bitmask.net"),
            PathBuf::from("/home/user/.config/leap/providers/bitmask.net/eip-service.json")
        );
        assert_eq!(
            layout.ca_cert_path("bitmask.net"),
            PathBuf::from("/home/user/.config/leap/providers/bitmask.net/keys/ca/cacert.pem")
        );
        assert_eq!(
            layout.client_cert_path("bitmask.net"),
            PathBuf::from("/home/user/.config/leap/providers/bitmask.net/keys/client/openvpn.pem")
        );
    }

    #[tokio::test]
    async fn test_load_provider_config() {
        let dir = tempdir().unwrap();
        let layout = ProviderLayout::new(dir.path());
        let path = layout.provider_config_path("bitmask.net");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, PROVIDER_JSON).unwrap();

        let provider = ProviderConfig::load(&path).await.unwrap();
        let context = provider.context(&layout);

        assert!(provider.offers_eip());
        assert_eq!(context.domain, "bitmask.net");
        assert_eq!(context.ca_cert_path, layout.ca_cert_path("bitmask.net"));
        assert_eq!(context.ca_cert_fingerprint.as_deref(), Some("SHA256: abcd"));
    }

    #[tokio::test]
    async fn test_load_provider_config_missing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("provider.json");

        let err = ProviderConfig::load(&path).await.unwrap_err();

        assert!(err.to_string().contains("Failed to read"));
    }

    #[test]
    fn test_provider_config_rejects_missing_api_uri() {
        let err = ProviderConfig::from_slice(br#"{"domain": "a", "api_version": "1"}"#)
            .unwrap_err();

        assert!(err.to_string().contains("Invalid provider.json"));
    }

    #[test]
    fn test_api_url_joins_segments() {
        assert_eq!(
            context().api_url(&["config", "eip-service.json"]),
            "https://api.bitmask.net:4430/1/config/eip-service.json"
        );
        assert_eq!(
            context().api_url(&["cert", ""]),
            "https://api.bitmask.net:4430/1/cert/"
        );
    }

    #[test]
    fn test_validate_rejects_empty_domain() {
        let context = ProviderContext {
            domain: String::new(),
            ..context()
        };

        let err = context.validate().unwrap_err();

        assert!(err.contains("domain must not be empty"));
    }

    #[test]
    fn test_validate_rejects_traversal_domain() {
        let context = ProviderContext {
            domain: "../etc".to_string(),
            ..context()
        };

        assert!(context.validate().is_err());
    }
}
