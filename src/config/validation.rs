use anyhow::Result;

use super::Settings;

pub(crate) fn validate_settings(settings: &Settings) -> Result<()> {
    if settings.prefix.as_os_str().is_empty() {
        anyhow::bail!("prefix must not be empty");
    }
    if settings.domain.trim().is_empty() {
        anyhow::bail!("domain must not be empty");
    }
    if !settings.domain.is_ascii() {
        anyhow::bail!("domain must be ASCII");
    }
    if settings.domain.contains(['/', '\\']) || settings.domain.starts_with('.') {
        anyhow::bail!("domain must be a plain host name");
    }
    let idle_interval = settings.idle_interval()?;
    if idle_interval.is_zero() {
        anyhow::bail!("runner.idle_interval must be greater than 0");
    }
    if settings.http.timeout_secs == 0 {
        anyhow::bail!("http.timeout_secs must be greater than 0");
    }
    Ok(())
}
