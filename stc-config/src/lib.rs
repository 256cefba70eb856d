//! Configuration loading: every documented cache and server option,
//! one field each, with documented defaults so a missing or empty TOML
//! file is always a valid configuration.

pub mod cli;
pub mod config;
pub mod error;

pub use cli::Cli;
pub use config::{CacheConfig, Config, IndexServerConfig, NodeServerConfig, ReplacementKind, StrategyKind};
pub use error::{ConfigError, Result};
