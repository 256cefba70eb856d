//! Boundary to the delivery subsystem (C6): `process_puzzle` needs to pull
//! `CacheRef`s that live on other nodes before it can assemble them. The
//! node process wires a real delivery-connection-backed fetcher in; tests
//! use an in-memory stub.

use stc_operator::Payload;
use stc_types::{NodeEntryKey, NodeId};

pub trait RemoteFetcher: Send + Sync {
    /// Block the calling (worker) thread until the referenced payload has
    /// been pulled from `node_id`, or return an error. Called only from
    /// `spawn_blocking` contexts.
    fn fetch(&self, node_id: NodeId, key: NodeEntryKey) -> stc_operator::Result<Payload>;
}

/// A fetcher that never needs to reach another node: every ref is already
/// local. Useful for single-node deployments and tests of `process_puzzle`
/// that only exercise the remainder-compute path.
#[derive(Debug, Default)]
pub struct NoRemoteFetcher;

impl RemoteFetcher for NoRemoteFetcher {
    fn fetch(&self, node_id: NodeId, _key: NodeEntryKey) -> stc_operator::Result<Payload> {
        Err(stc_operator::OperatorError::Compute(format!(
            "no remote fetcher configured, cannot reach node {node_id:?}"
        )))
    }
}
