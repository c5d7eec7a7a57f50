use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::fs_util;
use crate::provider::{ProviderContext, ProviderLayout};

/// EIP service descriptor as served at `<api>/<version>/config/eip-service.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EipServiceConfig {
    #[serde(default)]
    pub serial: u32,
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub locations: BTreeMap<String, Location>,
    #[serde(default)]
    pub gateways: Vec<Gateway>,
    #[serde(default)]
    pub openvpn_configuration: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub country_code: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub hemisphere: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Gateway {
    pub ip_address: String,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub capabilities: serde_json::Value,
}

impl EipServiceConfig {
    /// Parses a descriptor from the bytes served by the provider.
    ///
    /// # Errors
    /// Returns an error if the data is not a valid EIP service descriptor.
    pub fn from_slice(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data).context("Invalid eip-service.json")
    }

    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub async fn load(path: &Path) -> Result<Self> {
        let contents = fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_slice(&contents)
    }

    /// Parses `data` and, only if it is a valid descriptor, stores it verbatim
    /// at `path`.
    ///
    /// # Errors
    /// Returns an error if the data does not parse or the write fails.
    pub async fn persist(data: &[u8], path: &Path) -> Result<Self> {
        let config = Self::from_slice(data)?;
        fs_util::write_atomic(path, data).await?;
        Ok(config)
    }

    /// Where the client credential for `provider` is stored.
    #[must_use]
    pub fn client_cert_path(&self, layout: &ProviderLayout, provider: &ProviderContext) -> PathBuf {
        layout.client_cert_path(&provider.domain)
    }

    #[must_use]
    pub fn gateway_hosts(&self) -> Vec<&str> {
        self.gateways
            .iter()
            .map(|gateway| gateway.host.as_deref().unwrap_or(&gateway.ip_address))
            .collect()
    }
}
