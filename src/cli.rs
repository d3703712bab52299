use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ruddr")]
#[command(author, version, about = "Low-latency fMP4 live ingester and segment origin")]
pub struct Cli {
    /// Path to the TOML config file
    #[arg(default_value = "config.toml")]
    pub config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}
