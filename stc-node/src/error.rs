use stc_types::{EntryId, Fingerprint, NodeId};
use thiserror::Error;

/// Errors raised by the node's own connection-handling and cache-set
/// logic. Framing errors stay in [`stc_wire::WireError`]; compute/caching
/// errors stay in [`stc_operator::OperatorError`]/[`stc_node_cache::NodeCacheError`].
#[derive(Debug, Error)]
pub enum NodeError {
    #[error(transparent)]
    Wire(#[from] stc_wire::WireError),

    #[error(transparent)]
    Cache(#[from] stc_node_cache::NodeCacheError),

    #[error(transparent)]
    Operator(#[from] stc_operator::OperatorError),

    #[error(transparent)]
    Delivery(#[from] stc_delivery::DeliveryError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("no NodeCache configured for result type {0:?}")]
    NoSuchResultType(stc_types::ResultType),

    #[error("entry {fingerprint}/{entry_id:?} not found locally")]
    NotFound { fingerprint: Fingerprint, entry_id: EntryId },

    #[error("control connection to the index closed or was reset")]
    ControlConnectionLost,

    #[error("no route configured to reach node {0:?} for a remote fetch")]
    UnknownPeer(NodeId),
}

pub type Result<T> = std::result::Result<T, NodeError>;
