use std::path::PathBuf;

use config::{ConfigBuilder, ConfigError, builder::DefaultState};

const DEFAULT_DOMAIN: &str = "";
const DEFAULT_SKIP_IF_PRESENT: bool = false;
const DEFAULT_IDLE_INTERVAL: &str = "100ms";
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
const XDG_CONFIG_HOME: &str = "XDG_CONFIG_HOME";
const HOME: &str = "HOME";
const CONFIG_DIR: &str = ".config";

pub(crate) fn apply_defaults(
    builder: ConfigBuilder<DefaultState>,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    builder
        .set_default("prefix", default_prefix().to_string_lossy().into_owned())?
        .set_default("domain", DEFAULT_DOMAIN)?
        .set_default("skip_if_present", DEFAULT_SKIP_IF_PRESENT)?
        .set_default("runner.idle_interval", DEFAULT_IDLE_INTERVAL)?
        .set_default("http.timeout_secs", DEFAULT_HTTP_TIMEOUT_SECS)
}

/// `$XDG_CONFIG_HOME`, then `$HOME/.config`, then the working directory.
pub(crate) fn default_prefix() -> PathBuf {
    if let Some(dir) = std::env::var_os(XDG_CONFIG_HOME).filter(|dir| !dir.is_empty()) {
        return PathBuf::from(dir);
    }
    std::env::var_os(HOME)
        .filter(|home| !home.is_empty())
        .map_or_else(|| PathBuf::from("."), |home| PathBuf::from(home).join(CONFIG_DIR))
}
