use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use eip_bootstrap::bootstrap::{CheckEvent, CheckRunner, EIP_SETUP_SEQUENCE};
use eip_bootstrap::config::Settings;
use eip_bootstrap::fetch::HttpFetcher;
use eip_bootstrap::provider::{ProviderConfig, ProviderLayout};
use eip_bootstrap::Args;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "info";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let args = Args::parse();
    let settings = load_settings(&args)?;
    info!("Starting EIP bootstrap for {}", settings.domain);

    let layout = ProviderLayout::new(&settings.prefix);
    let provider_path = args
        .provider_file
        .clone()
        .unwrap_or_else(|| layout.provider_config_path(&settings.domain));
    let provider = ProviderConfig::load(&provider_path).await?;
    if provider.domain != settings.domain {
        warn!(
            "{} describes {}, not {}",
            provider_path.display(),
            provider.domain,
            settings.domain
        );
    }
    if !provider.offers_eip() {
        warn!("Provider {} does not advertise the openvpn service", provider.domain);
    }

    let fetcher = Arc::new(HttpFetcher::new(settings.http_timeout()));
    let (runner, mut events) = CheckRunner::new(fetcher, layout.clone(), settings.idle_interval()?);
    let run = runner
        .run_eip_setup_checks(provider.context(&layout), settings.skip_if_present)
        .context("Cannot start EIP setup checks")?;
    runner.start();

    let passed = tokio::select! {
        passed = wait_for_run(&mut events, run) => passed,
        result = tokio::signal::ctrl_c() => {
            if let Err(err) = result {
                error!("Shutdown signal handler error: {err}");
            }
            info!("SIGINT caught. Shutting down...");
            false
        }
    };
    runner.stop().await;

    if passed {
        info!("EIP bootstrap for {} completed", provider.domain);
        Ok(())
    } else {
        error!("EIP bootstrap for {} did not complete", provider.domain);
        std::process::exit(1);
    }
}

fn load_settings(args: &Args) -> anyhow::Result<Settings> {
    let mut settings = Settings::new(args.config.clone())?;
    settings.merge_with_args(args);
    settings.validate()?;
    Ok(settings)
}

/// Logs events for `run` until every check passed or one failed.
async fn wait_for_run(events: &mut mpsc::UnboundedReceiver<CheckEvent>, run: u64) -> bool {
    let mut remaining = EIP_SETUP_SEQUENCE.len();
    while let Some(event) = events.recv().await {
        if event.run != run {
            continue;
        }
        if !event.outcome.passed {
            error!("Check {} failed: {}", event.kind, event.outcome.error);
            return false;
        }
        info!("Check {} passed", event.kind);
        remaining -= 1;
        if remaining == 0 {
            return true;
        }
    }
    false
}
