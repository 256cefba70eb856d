use clap::Parser;

/// Shared CLI surface for the `indexserver` and `nodeserver` binaries:
/// a config file path plus a log-level override, in a flat
/// `clap::Parser` style.
#[derive(Debug, Parser)]
pub struct Cli {
    /// Path to a TOML config file; every field is optional and falls back
    /// to its documented default.
    #[arg(long, default_value = "stc.toml")]
    pub config: String,

    /// Override `RUST_LOG` for this process.
    #[arg(long)]
    pub log_filter: Option<String>,
}
