use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Context;
use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, error, info, warn};

use super::{CheckKind, CheckOutcome, Step};
use crate::eip_config::EipServiceConfig;
use crate::fetch::Fetcher;
use crate::fs_util;
use crate::provider::{ProviderContext, ProviderLayout};

const CONFIG_SEGMENTS: [&str; 2] = ["config", "eip-service.json"];
const CERT_SEGMENTS: [&str; 2] = ["cert", ""];

/// State shared by the checks of a single EIP setup run.
///
/// The service descriptor slot is written by [`DownloadConfig`] and read by
/// [`DownloadClientCertificate`]; each run gets a fresh context.
pub struct BootstrapContext {
    provider: ProviderContext,
    layout: ProviderLayout,
    fetcher: Arc<dyn Fetcher>,
    skip_if_present: bool,
    eip_config: Mutex<Option<Arc<EipServiceConfig>>>,
}

impl BootstrapContext {
    #[must_use]
    pub fn new(
        provider: ProviderContext,
        layout: ProviderLayout,
        fetcher: Arc<dyn Fetcher>,
        skip_if_present: bool,
    ) -> Self {
        Self {
            provider,
            layout,
            fetcher,
            skip_if_present,
            eip_config: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn provider(&self) -> &ProviderContext {
        &self.provider
    }

    /// The service descriptor loaded by this run, if any.
    #[must_use]
    pub fn eip_config(&self) -> Option<Arc<EipServiceConfig>> {
        self.eip_config
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_eip_config(&self, config: Option<EipServiceConfig>) {
        *self
            .eip_config
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = config.map(Arc::new);
    }
}

/// Whether a previously stored artifact exists at `path`.
///
/// An error while checking counts as absent, so the artifact is downloaded again.
async fn artifact_present(path: &Path) -> bool {
    match fs::try_exists(path).await {
        Ok(present) => present,
        Err(err) => {
            warn!(
                "Cannot check for existing {}, downloading again: {err}",
                path.display()
            );
            false
        }
    }
}

/// Skips or downloads `eip-service.json` and persists it.
pub struct DownloadConfig {
    context: Arc<BootstrapContext>,
}

impl DownloadConfig {
    #[must_use]
    pub fn new(context: Arc<BootstrapContext>) -> Self {
        Self { context }
    }

    async fn download(&self) -> anyhow::Result<()> {
        let context = &self.context;
        let provider = &context.provider;
        let path = context.layout.eip_service_path(&provider.domain);
        context.set_eip_config(None);

        if context.skip_if_present && artifact_present(&path).await {
            match EipServiceConfig::load(&path).await {
                Ok(config) => {
                    info!(
                        "EIP config for {} already present at {}, skipping download",
                        provider.domain,
                        path.display()
                    );
                    context.set_eip_config(Some(config));
                    return Ok(());
                }
                Err(err) => {
                    warn!(
                        "Existing EIP config at {} is unusable, downloading again: {err:#}",
                        path.display()
                    );
                }
            }
        }

        let url = provider.api_url(&CONFIG_SEGMENTS);
        let body = context
            .fetcher
            .fetch(&url, provider.trust())
            .await
            .context("Failed to download EIP config")?;
        let config = EipServiceConfig::persist(&body, &path).await?;
        debug!(
            "Stored EIP config serial {} with {} gateway(s) at {}",
            config.serial,
            config.gateways.len(),
            path.display()
        );
        context.set_eip_config(Some(config));
        Ok(())
    }
}

#[async_trait]
impl Step for DownloadConfig {
    fn kind(&self) -> CheckKind {
        CheckKind::DownloadConfig
    }

    async fn execute(&self) -> CheckOutcome {
        info!("Downloading EIP config for {}", self.context.provider.domain);
        self.download().await.into()
    }
}

/// Skips or downloads the EIP client certificate and persists it.
pub struct DownloadClientCertificate {
    context: Arc<BootstrapContext>,
}

impl DownloadClientCertificate {
    #[must_use]
    pub fn new(context: Arc<BootstrapContext>) -> Self {
        Self { context }
    }

    async fn download(&self) -> anyhow::Result<()> {
        let context = &self.context;
        let provider = &context.provider;
        let Some(eip_config) = context.eip_config() else {
            error!(
                "{} ran before {} for {}; no EIP config available",
                CheckKind::DownloadClientCertificate,
                CheckKind::DownloadConfig,
                provider.domain
            );
            anyhow::bail!("EIP config is not loaded; cannot locate the client certificate");
        };

        let cert_path = eip_config.client_cert_path(&context.layout, provider);
        if context.skip_if_present && artifact_present(&cert_path).await {
            info!(
                "EIP client certificate for {} already present at {}, skipping download",
                provider.domain,
                cert_path.display()
            );
            return Ok(());
        }

        let url = provider.api_url(&CERT_SEGMENTS);
        let client_cert = context
            .fetcher
            .fetch(&url, provider.trust())
            .await
            .context("Failed to download EIP client certificate")?;

        // TODO: validate the certificate and its expiry before storing it.
        fs_util::ensure_private_parent_dir(&cert_path).await?;
        fs_util::write_private_atomic(&cert_path, &client_cert).await?;
        debug!(
            "Stored EIP client certificate ({} bytes) at {}",
            client_cert.len(),
            cert_path.display()
        );
        Ok(())
    }
}

#[async_trait]
impl Step for DownloadClientCertificate {
    fn kind(&self) -> CheckKind {
        CheckKind::DownloadClientCertificate
    }

    async fn execute(&self) -> CheckOutcome {
        info!(
            "Downloading EIP client certificate for {}",
            self.context.provider.domain
        );
        self.download().await.into()
    }
}
