//! Peer address book: the `{id, host, delivery_port}` table the index
//! pushes down the control connection (`ControlMessage::Peers`), cached
//! locally so worker tasks can resolve a remote `CacheRef`'s owning node
//! to a delivery address without a round trip to the index per fetch.

use parking_lot::RwLock;
use stc_types::{Node, NodeId};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Default, Clone)]
pub struct PeerBook {
    inner: Arc<RwLock<HashMap<NodeId, Node>>>,
}

impl PeerBook {
    pub fn new() -> Self {
        PeerBook::default()
    }

    pub fn update(&self, nodes: Vec<Node>) {
        let mut table = HashMap::with_capacity(nodes.len());
        for node in nodes {
            table.insert(node.id, node);
        }
        *self.inner.write() = table;
    }

    pub fn get(&self, node_id: NodeId) -> Option<Node> {
        self.inner.read().get(&node_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_then_get_round_trips() {
        let book = PeerBook::new();
        book.update(vec![Node { id: NodeId(1), host: "h".into(), delivery_port: 7100 }]);
        assert_eq!(book.get(NodeId(1)).unwrap().delivery_port, 7100);
        assert!(book.get(NodeId(2)).is_none());
    }
}
