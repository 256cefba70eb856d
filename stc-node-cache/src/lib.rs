//! C2: the per-result-type node cache wrapper. Sits between the wire
//! protocol (worker connection handling, in `stc-node`) and the C1
//! structure (`stc-cache`), adding payload storage, puzzle-assembly
//! orchestration, and the pluggable caching strategy.

pub mod error;
pub mod fetch;
pub mod strategy;
pub mod wrapper;

pub use error::{NodeCacheError, Result};
pub use fetch::{NoRemoteFetcher, RemoteFetcher};
pub use strategy::{Always, CachingDecisionInput, CachingStrategy, CostThreshold};
pub use wrapper::NodeCache;
