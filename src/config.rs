use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

mod defaults;
mod validation;

const DEFAULT_CONFIG_FILE: &str = "eip-bootstrap.toml";
const ENV_PREFIX: &str = "EIP_BOOTSTRAP";

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    /// Directory under which `leap/providers/<domain>/` lives.
    pub prefix: PathBuf,
    pub domain: String,
    /// Skip a download when its artifact already exists on disk.
    pub skip_if_present: bool,
    pub runner: RunnerSettings,
    pub http: HttpSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RunnerSettings {
    /// Humantime duration the worker waits between polls of an empty queue.
    pub idle_interval: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpSettings {
    pub timeout_secs: u64,
}

impl Settings {
    /// Loads settings from defaults, an optional TOML file and the environment.
    ///
    /// # Errors
    /// Returns error if configuration parsing fails (e.g. invalid format).
    pub fn new(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut s = defaults::apply_defaults(Config::builder())?;

        let path = config_path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        s = s.add_source(File::from(path).required(false));

        // e.g. EIP_BOOTSTRAP_DOMAIN, EIP_BOOTSTRAP_RUNNER__IDLE_INTERVAL
        s = s.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__"),
        );

        s.build()?.try_deserialize()
    }

    /// Merges CLI arguments into the settings, overriding values if present.
    pub fn merge_with_args(&mut self, args: &crate::Args) {
        if let Some(prefix) = &args.prefix {
            prefix.clone_into(&mut self.prefix);
        }
        if let Some(domain) = &args.domain {
            domain.clone_into(&mut self.domain);
        }
        if args.skip_if_present {
            self.skip_if_present = true;
        }
    }

    /// Validates configuration values for correctness.
    ///
    /// # Errors
    /// Returns error if any setting is invalid or out of range.
    pub fn validate(&self) -> Result<()> {
        validation::validate_settings(self)
    }

    /// # Errors
    /// Returns error if `runner.idle_interval` is not a valid duration.
    pub fn idle_interval(&self) -> Result<Duration> {
        humantime::parse_duration(&self.runner.idle_interval).map_err(|err| {
            anyhow::anyhow!(
                "runner.idle_interval '{}' is invalid: {err}",
                self.runner.idle_interval
            )
        })
    }

    #[must_use]
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http.timeout_secs)
    }
}
