use stc_types::{EntryId, Fingerprint};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeCacheError {
    #[error(transparent)]
    Cache(#[from] stc_cache::CacheError),

    #[error(transparent)]
    Operator(#[from] stc_operator::OperatorError),

    #[error(transparent)]
    Types(#[from] stc_types::TypesError),

    #[error("entry {entry_id:?} of fingerprint {fingerprint} not found locally")]
    NotLocal { fingerprint: Fingerprint, entry_id: EntryId },

    #[error("remote fetch of entry {entry_id:?} on node {node_id:?} failed: {reason}")]
    RemoteFetch { node_id: stc_types::NodeId, entry_id: EntryId, reason: String },
}

pub type Result<T> = std::result::Result<T, NodeCacheError>;
