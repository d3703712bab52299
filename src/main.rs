mod cli;

use anyhow::Result;
use clap::Parser;
use cli::Cli;

use ruddr_core::Config;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG if set, otherwise pick defaults from the verbose flag.
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "ruddr=trace,ruddr_server=trace,ruddr_media=debug,tower_http=debug".to_string()
        } else {
            "ruddr=info,ruddr_server=info,ruddr_media=info,tower_http=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .init();

    let config = Config::load(&cli.config)?;
    tracing::info!("Loaded config from {}", cli.config.display());
    for (id, repr) in &config.representations {
        tracing::info!(
            representation = %id,
            pipe = %repr.pipe.display(),
            "configured representation"
        );
    }

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(ruddr_server::start(config))?;
    Ok(())
}
