use std::path::PathBuf;

use clap::Parser;

/// Multi-provider LLM request router and format broker.
#[derive(Debug, Parser)]
#[command(name = "rcc", version)]
pub struct Args {
    /// Path to the rcc.toml configuration file.
    #[arg(short, long, env = "RCC_CONFIG", default_value = "rcc.toml")]
    pub config: PathBuf,

    /// Override the configured listen port.
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Log level: error, warn, info, debug, trace.
    #[arg(long, env = "RCC_LOG", default_value = "info")]
    pub log_level: String,
}
