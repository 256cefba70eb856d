//! `stc-client`: a thin command-line front end that issues one `CMD_GET`
//! against an index server and writes the resulting bytes to stdout or a
//! file, with a flat single-binary `clap::Parser` CLI surface. Useful
//! for exercising a running
//! cluster by hand; applications embed `stc_client::query` directly
//! instead of shelling out to this binary.

use clap::Parser;
use stc_client::IndexAddr;
use stc_types::{Fingerprint, OperatorGraph, ProjectionId, QueryCube, ResultType, TimeType};
use std::io::Write;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(about = "Issue one CMD_GET against an index server and print the result")]
struct Cli {
    /// Index server host.
    #[arg(long, default_value = "127.0.0.1")]
    index_host: String,

    /// Index server client port.
    #[arg(long, default_value_t = 7001)]
    index_port: u16,

    /// One of raster, points, lines, polygons, plot.
    #[arg(long)]
    result_type: String,

    /// Semantic fingerprint of the operator graph, e.g. the canonical
    /// JSON `stc_types::fingerprint` would produce. For ad-hoc use this
    /// may just be any stable string the operator graph below also hashes
    /// to; `--graph` is what's actually sent, `--fingerprint` overrides
    /// the derived value when set.
    #[arg(long)]
    fingerprint: Option<String>,

    /// Operator graph as JSON: `{"type": "...", "params": {...}, "sources": [...]}`.
    #[arg(long)]
    graph: String,

    /// EPSG code of the query cube's projection.
    #[arg(long, default_value_t = 3857)]
    epsg: i32,

    #[arg(long, allow_hyphen_values = true)]
    x1: f64,
    #[arg(long, allow_hyphen_values = true)]
    x2: f64,
    #[arg(long, allow_hyphen_values = true)]
    y1: f64,
    #[arg(long, allow_hyphen_values = true)]
    y2: f64,
    #[arg(long, allow_hyphen_values = true)]
    t1: i64,
    #[arg(long, allow_hyphen_values = true)]
    t2: i64,

    /// Raster pixel width/height; omit for feature/plot queries.
    #[arg(long, requires = "height")]
    width: Option<u32>,
    #[arg(long, requires = "width")]
    height: Option<u32>,

    /// Write the result here instead of stdout.
    #[arg(long, short = 'o')]
    output: Option<String>,

    #[arg(long)]
    log_filter: Option<String>,
}

fn parse_result_type(s: &str) -> anyhow::Result<ResultType> {
    match s {
        "raster" => Ok(ResultType::Raster),
        "points" => Ok(ResultType::Points),
        "lines" => Ok(ResultType::Lines),
        "polygons" => Ok(ResultType::Polygons),
        "plot" | "plots" => Ok(ResultType::Plot),
        other => anyhow::bail!("unknown result type {other:?}, expected raster/points/lines/polygons/plot"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            cli.log_filter
                .as_deref()
                .and_then(|f| EnvFilter::try_new(f).ok())
                .unwrap_or_else(|| EnvFilter::new("warn")),
        )
        .init();

    let result_type = parse_result_type(&cli.result_type)?;
    let graph: OperatorGraph = serde_json::from_str(&cli.graph)?;
    let fingerprint = match cli.fingerprint {
        Some(f) => Fingerprint(f),
        None => stc_types::fingerprint(&graph),
    };
    let resolution = match (cli.width, cli.height) {
        (Some(w), Some(h)) => Some(stc_types::PixelResolution { w, h }),
        _ => None,
    };
    let query_rect = QueryCube::new(
        ProjectionId(cli.epsg),
        TimeType::Unreferenced,
        cli.x1,
        cli.x2,
        cli.y1,
        cli.y2,
        cli.t1,
        cli.t2,
        resolution,
    )?;

    let addr = IndexAddr::new(cli.index_host, cli.index_port);
    let request = stc_wire::BaseRequest { result_type, fingerprint, query_rect, graph };

    let bytes = stc_client::query(&addr, request).await?;
    tracing::info!(bytes = bytes.len(), "result received");

    match cli.output {
        Some(path) => std::fs::write(&path, &bytes)?,
        None => std::io::stdout().write_all(&bytes)?,
    }
    Ok(())
}
