//! C6: the delivery subsystem. A `DeliveryRegistry` runs per node,
//! tracking staged result pulls; the delivery connection state machine
//! that drives `CMD_GET`/`CMD_GET_CACHED_ITEM`/`CMD_MOVE_ITEM` lives in
//! `stc-node`, which owns the registry and the per-type `NodeCache`s.

pub mod error;
pub mod registry;

pub use error::{DeliveryError, Result};
pub use registry::{DeliveryId, DeliveryRegistry};
