//! Sequential EIP bootstrap checks.
//!
//! A [`CheckRunner`] drains an ordered queue of [`Step`]s on a dedicated
//! worker task, reporting each outcome through a [`ResultNotifier`] and
//! dropping the rest of the queue on the first failure.

use std::fmt;

use async_trait::async_trait;

mod notifier;
mod runner;
mod steps;
#[cfg(test)]
mod test_support;

pub use notifier::{CheckEvent, ResultNotifier};
pub use runner::{CheckRunner, DEFAULT_IDLE_INTERVAL, RunnerError, RunnerState};
pub use steps::{BootstrapContext, DownloadClientCertificate, DownloadConfig};

/// Checks queued by [`CheckRunner::run_eip_setup_checks`], in execution order.
pub const EIP_SETUP_SEQUENCE: [CheckKind; 2] =
    [CheckKind::DownloadConfig, CheckKind::DownloadClientCertificate];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CheckKind {
    DownloadConfig,
    DownloadClientCertificate,
    /// A check injected through [`CheckRunner::enqueue_checks`].
    Custom(&'static str),
}

impl CheckKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            CheckKind::DownloadConfig => "download_config",
            CheckKind::DownloadClientCertificate => "download_client_certificate",
            CheckKind::Custom(name) => name,
        }
    }
}

impl fmt::Display for CheckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a single check, `{passed, error}`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckOutcome {
    pub passed: bool,
    /// Empty when the check passed.
    pub error: String,
}

impl CheckOutcome {
    #[must_use]
    pub fn passed() -> Self {
        Self {
            passed: true,
            error: String::new(),
        }
    }

    #[must_use]
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            passed: false,
            error: error.into(),
        }
    }
}

impl From<anyhow::Result<()>> for CheckOutcome {
    fn from(result: anyhow::Result<()>) -> Self {
        match result {
            Ok(()) => Self::passed(),
            Err(err) => Self::failed(format!("{err:#}")),
        }
    }
}

/// One idempotent unit of bootstrap work.
///
/// Errors never escape a step; they are folded into its [`CheckOutcome`].
#[async_trait]
pub trait Step: Send + Sync {
    fn kind(&self) -> CheckKind;

    async fn execute(&self) -> CheckOutcome;
}
