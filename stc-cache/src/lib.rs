//! C1: the per-type spatio-temporal cache structure. Coverage queries,
//! remainder decomposition, and eviction live here; the node process
//! wires one `CacheStore` per `ResultType` together with the payload
//! store (`stc-node-cache`) and the wire protocol.

pub mod coverage;
pub mod error;
pub mod eviction;
pub mod store;

pub use coverage::{coverage_query, Coverage, Located};
pub use error::{CacheError, Result};
pub use eviction::{EvictionCandidate, EvictionPolicy, Lru};
pub use store::CacheStore;
