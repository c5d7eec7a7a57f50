pub mod args;
pub mod bootstrap;
pub mod config;
pub mod eip_config;
pub mod fetch;
pub mod fs_util;
pub mod provider;

pub use args::Args;
