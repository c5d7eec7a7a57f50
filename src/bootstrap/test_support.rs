use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use reqwest::StatusCode;

use crate::fetch::{CaTrust, FetchError, Fetcher};
use crate::provider::ProviderContext;

pub(crate) const API_URI: &str = "https://api.example.org:4430";
pub(crate) const CONFIG_URL: &str = "https://api.example.org:4430/1/config/eip-service.json";
pub(crate) const CERT_URL: &str = "https://api.example.org:4430/1/cert/";
pub(crate) const EIP_SERVICE_JSON: &str = r#"{"serial": 1, "version": 1, "gateways": [{"ip_address": "10.0.0.1"}]}"#;

/// Serves canned bodies or statuses per URL and records every request.
#[derive(Default)]
pub(crate) struct StubFetcher {
    responses: HashMap<String, Result<Vec<u8>, u16>>,
    calls: Mutex<Vec<String>>,
}

impl StubFetcher {
    pub(crate) fn respond(mut self, url: &str, body: &[u8]) -> Self {
        self.responses.insert(url.to_string(), Ok(body.to_vec()));
        self
    }

    pub(crate) fn status(mut self, url: &str, status: u16) -> Self {
        self.responses.insert(url.to_string(), Err(status));
        self
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Fetcher for StubFetcher {
    async fn fetch(&self, url: &str, _trust: CaTrust<'_>) -> Result<Vec<u8>, FetchError> {
        self.calls.lock().unwrap().push(url.to_string());
        match self.responses.get(url) {
            Some(Ok(body)) => Ok(body.clone()),
            Some(Err(status)) => Err(FetchError::Status {
                url: url.to_string(),
                status: StatusCode::from_u16(*status).unwrap(),
            }),
            None => Err(FetchError::Status {
                url: url.to_string(),
                status: StatusCode::NOT_FOUND,
            }),
        }
    }
}

pub(crate) fn provider(domain: &str) -> ProviderContext {
    ProviderContext {
        domain: domain.to_string(),
        api_uri: API_URI.to_string(),
        api_version: "1".to_string(),
        ca_cert_path: PathBuf::from("unused-cacert.pem"),
        ca_cert_fingerprint: None,
    }
}
