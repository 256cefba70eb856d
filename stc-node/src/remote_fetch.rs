//! [`RemoteFetcher`] wired to the real delivery subsystem: resolves a
//! peer node's address from the [`PeerBook`] and pulls the referenced
//! payload over a blocking delivery connection.

use crate::delivery_client;
use crate::peers::PeerBook;
use stc_node_cache::RemoteFetcher;
use stc_operator::{OperatorError, Payload, Result};
use stc_types::{NodeEntryKey, NodeId};

pub struct NetworkFetcher {
    peers: PeerBook,
    result_type: stc_types::ResultType,
}

impl NetworkFetcher {
    pub fn new(peers: PeerBook, result_type: stc_types::ResultType) -> Self {
        NetworkFetcher { peers, result_type }
    }
}

impl RemoteFetcher for NetworkFetcher {
    fn fetch(&self, node_id: NodeId, key: NodeEntryKey) -> Result<Payload> {
        let peer = self
            .peers
            .get(node_id)
            .ok_or_else(|| OperatorError::Compute(format!("no known address for node {node_id:?}")))?;
        let moved = delivery_client::get_cached_item(&peer, self.result_type, key.fingerprint, key.entry_id)
            .map_err(|e| OperatorError::Compute(format!("fetch from node {node_id:?} failed: {e}")))?;
        Ok(Payload::new(self.result_type, moved.bounds, moved.bytes))
    }
}
