use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file (default: eip-bootstrap.toml)
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    /// Directory holding the `leap/providers` tree
    #[arg(long)]
    pub prefix: Option<PathBuf>,

    /// Provider domain to bootstrap EIP for
    #[arg(long, env = "EIP_BOOTSTRAP_DOMAIN")]
    pub domain: Option<String>,

    /// Path to provider.json (default: <prefix>/leap/providers/<domain>/provider.json)
    #[arg(long)]
    pub provider_file: Option<PathBuf>,

    /// Skip downloads whose artifacts already exist locally
    #[arg(long)]
    pub skip_if_present: bool,
}
