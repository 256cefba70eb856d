use stc_types::{DirectoryId, Fingerprint, NodeId};
use thiserror::Error;

/// Errors raised by the index's directory, dispatch, and reorg logic.
/// Connection-level framing/protocol errors stay in [`stc_wire::WireError`]
/// and are handled where a connection task reads/writes frames.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error(transparent)]
    Wire(#[from] stc_wire::WireError),

    #[error(transparent)]
    Types(#[from] stc_types::TypesError),

    #[error("unknown node {0:?}")]
    UnknownNode(NodeId),

    #[error("no nodes registered to dispatch to")]
    NoNodesAvailable,

    #[error("no idle worker available on node {0:?}")]
    NoIdleWorker(NodeId),

    #[error("directory entry {0:?} not found")]
    UnknownDirectoryEntry(DirectoryId),

    #[error("fingerprint {0} has no cached entries")]
    NoEntries(Fingerprint),

    #[error("worker reported an error: {0}")]
    WorkerReported(String),

    #[error("worker connection closed mid-job")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, IndexError>;
