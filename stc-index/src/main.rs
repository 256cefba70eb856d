use clap::Parser;
use stc_config::{Cli, Config};
use tracing_subscriber::EnvFilter;

// Single-threaded on purpose: the dispatch/query-manager state is shared
// across connection tasks without cross-task synchronization beyond its own
// mutexes, and P3's "at most one concurrent compute per (SF, cube)" guarantee
// assumes no two dispatch tasks ever run truly in parallel. The node binary
// needs `rt-multi-thread` for its worker pool; the index does not.
#[tokio::main(flavor = "current_thread")]
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
    tracing::info!(config = %cli.config, "index server starting");

    let handles = stc_index::run(config.cache, config.indexserver).await?;
    handles.join().await;
    Ok(())
}
