//! Every configuration option, one field each, all with the documented
//! defaults so a completely empty TOML file is a valid config
//! (`serde(default)` throughout).

use crate::error::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use stc_types::ResultType;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    Always,
    Costly,
}

impl Default for StrategyKind {
    fn default() -> Self {
        StrategyKind::Always
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplacementKind {
    Lru,
}

impl Default for ReplacementKind {
    fn default() -> Self {
        ReplacementKind::Lru
    }
}

const DEFAULT_TYPE_CAPACITY_BYTES: u64 = 64 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub strategy: StrategyKind,
    /// Multiplier used only when `strategy = costly`.
    pub cost_multiplier: f64,
    pub replacement: ReplacementKind,
    pub raster_size: u64,
    pub points_size: u64,
    pub lines_size: u64,
    pub polygons_size: u64,
    pub plots_size: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            enabled: true,
            strategy: StrategyKind::default(),
            cost_multiplier: 2.0,
            replacement: ReplacementKind::default(),
            raster_size: DEFAULT_TYPE_CAPACITY_BYTES,
            points_size: DEFAULT_TYPE_CAPACITY_BYTES,
            lines_size: DEFAULT_TYPE_CAPACITY_BYTES,
            polygons_size: DEFAULT_TYPE_CAPACITY_BYTES,
            plots_size: DEFAULT_TYPE_CAPACITY_BYTES,
        }
    }
}

impl CacheConfig {
    pub fn capacity_bytes(&self, result_type: ResultType) -> u64 {
        match result_type {
            ResultType::Raster => self.raster_size,
            ResultType::Points => self.points_size,
            ResultType::Lines => self.lines_size,
            ResultType::Polygons => self.polygons_size,
            ResultType::Plot => self.plots_size,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexServerConfig {
    pub host: String,
    pub client_port: u16,
    pub worker_port: u16,
    pub control_port: u16,
    /// How often the index pulls full stats from every node.
    pub stats_poll_seconds: u64,
    /// How often the reorg controller runs.
    pub reorg_interval_seconds: u64,
    pub reorg_colocation_weight: f64,
    /// Half-life for the "hot" decay formula;
    /// defaults to `reorg_interval_seconds` when unset.
    pub reorg_half_life_seconds: Option<u64>,
}

impl Default for IndexServerConfig {
    fn default() -> Self {
        IndexServerConfig {
            host: "0.0.0.0".to_string(),
            client_port: 7001,
            worker_port: 7002,
            control_port: 7003,
            stats_poll_seconds: 10,
            reorg_interval_seconds: 60,
            reorg_colocation_weight: 0.5,
            reorg_half_life_seconds: None,
        }
    }
}

impl IndexServerConfig {
    pub fn reorg_half_life_seconds(&self) -> u64 {
        self.reorg_half_life_seconds.unwrap_or(self.reorg_interval_seconds)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeServerConfig {
    pub host: String,
    pub delivery_port: u16,
    /// Worker pool size: number of concurrent `spawn_blocking` computes.
    pub threads: usize,
    pub index_host: String,
    pub index_worker_port: u16,
    pub index_control_port: u16,
    pub control_reconnect_seconds: u64,
    pub worker_reconnect_seconds: u64,
    pub delivery_ttl_seconds: u64,
}

impl Default for NodeServerConfig {
    fn default() -> Self {
        NodeServerConfig {
            host: "0.0.0.0".to_string(),
            delivery_port: 7100,
            threads: 4,
            index_host: "127.0.0.1".to_string(),
            index_worker_port: 7002,
            index_control_port: 7003,
            control_reconnect_seconds: 5,
            worker_reconnect_seconds: 2,
            delivery_ttl_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cache: CacheConfig,
    pub indexserver: IndexServerConfig,
    pub nodeserver: NodeServerConfig,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Config> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.display().to_string(), source })?;
        Self::from_toml_str(&text, path)
    }

    fn from_toml_str(text: &str, path: &Path) -> Result<Config> {
        toml::from_str(text).map_err(|source| ConfigError::Parse { path: path.display().to_string(), source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_produces_documented_defaults() {
        let cfg = Config::from_toml_str("", Path::new("<test>")).unwrap();
        assert!(cfg.cache.enabled);
        assert_eq!(cfg.cache.raster_size, DEFAULT_TYPE_CAPACITY_BYTES);
        assert_eq!(cfg.indexserver.client_port, 7001);
        assert_eq!(cfg.nodeserver.control_reconnect_seconds, 5);
    }

    #[test]
    fn partial_file_overrides_only_named_fields() {
        let toml = r#"
            [cache]
            raster_size = 1048576

            [indexserver]
            client_port = 9001
        "#;
        let cfg = Config::from_toml_str(toml, Path::new("<test>")).unwrap();
        assert_eq!(cfg.cache.raster_size, 1_048_576);
        assert_eq!(cfg.cache.points_size, DEFAULT_TYPE_CAPACITY_BYTES);
        assert_eq!(cfg.indexserver.client_port, 9001);
        assert_eq!(cfg.indexserver.worker_port, 7002);
    }

    #[test]
    fn reorg_half_life_defaults_to_interval() {
        let cfg = Config::from_toml_str("", Path::new("<test>")).unwrap();
        assert_eq!(cfg.indexserver.reorg_half_life_seconds(), 60);
    }

    #[test]
    fn load_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stc.toml");
        std::fs::write(&path, "[nodeserver]\nthreads = 8\n").unwrap();
        let cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.nodeserver.threads, 8);
    }
}
