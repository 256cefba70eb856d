use clap::Parser;
use stc_config::{Cli, Config};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            cli.log_filter
                .as_deref()
                .and_then(|f| EnvFilter::try_new(f).ok())
                .unwrap_or_else(|| EnvFilter::new("info")),
        )
        .init();

    let config = Config::load(&cli.config)?;
    tracing::info!(config = %cli.config, "cache node starting");

    stc_node::run(config).await?;
    Ok(())
}
