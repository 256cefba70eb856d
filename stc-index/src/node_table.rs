//! Node registry: tracks every connected node's
//! identity, its idle worker connections (for dispatch to pick from), its
//! control channel (for reorg/stats commands), and an EWMA load estimate
//! used to pick the "least loaded" node.

use parking_lot::Mutex;
use stc_types::{DirectoryId, Node, NodeId};
use stc_wire::{ControlMessage, NodeStats, WorkerMessage};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::mpsc;

/// Exponentially weighted moving average of a node's busy ratio.
/// `alpha` is the weight given to each fresh sample.
#[derive(Debug, Clone, Copy)]
pub struct EwmaLoad {
    alpha: f64,
    value: f64,
}

impl EwmaLoad {
    pub fn new(alpha: f64) -> Self {
        EwmaLoad { alpha, value: 0.0 }
    }

    pub fn observe(&mut self, sample: f64) {
        self.value = self.alpha * sample + (1.0 - self.alpha) * self.value;
    }

    pub fn value(&self) -> f64 {
        self.value
    }
}

impl Default for EwmaLoad {
    fn default() -> Self {
        EwmaLoad::new(0.3)
    }
}

/// One outbound job handed to a worker connection. The wire protocol
/// itself carries no job id (a worker connection serves exactly one job
/// end to end), so dispatch and the connection task
/// correlate replies to `job_id` out of band through this envelope.
pub struct WorkerJob {
    pub job_id: u64,
    pub message: WorkerMessage,
    /// Known up front for a pure delivery (the coverage hit already named
    /// a directory entry); `None` for create/puzzle jobs until the
    /// worker's `RESP_NEW_CACHE_ENTRY` tells the connection task which
    /// directory id it was just assigned.
    pub directory_id: Option<DirectoryId>,
}

struct NodeEntry {
    node: Node,
    control_tx: Option<mpsc::UnboundedSender<ControlMessage>>,
    idle_workers: VecDeque<mpsc::UnboundedSender<WorkerJob>>,
    ewma_busy: EwmaLoad,
    in_flight: u32,
    last_stats: Option<NodeStats>,
}

/// Registry of every connected node. One instance shared between the
/// client/worker/control accept loops and the dispatch/reorg logic.
pub struct NodeTable {
    next_id: AtomicU32,
    inner: Mutex<HashMap<NodeId, NodeEntry>>,
}

impl NodeTable {
    pub fn new() -> Self {
        NodeTable { next_id: AtomicU32::new(1), inner: Mutex::new(HashMap::new()) }
    }

    /// A node's first control handshake: assign it a fresh `NodeId` and
    /// register its address.
    pub fn register(&self, host: String, delivery_port: u16, control_tx: mpsc::UnboundedSender<ControlMessage>) -> NodeId {
        let id = NodeId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut inner = self.inner.lock();
        inner.insert(
            id,
            NodeEntry {
                node: Node { id, host, delivery_port },
                control_tx: Some(control_tx),
                idle_workers: VecDeque::new(),
                ewma_busy: EwmaLoad::default(),
                in_flight: 0,
                last_stats: None,
            },
        );
        id
    }

    /// Drop a node entirely once its control connection closes. Does not
    /// touch the directory: entries on a departed node simply stop being
    /// reachable until the reorg controller (or an operator) clears them.
    pub fn deregister(&self, node_id: NodeId) {
        self.inner.lock().remove(&node_id);
    }

    pub fn node(&self, node_id: NodeId) -> Option<Node> {
        self.inner.lock().get(&node_id).map(|e| e.node.clone())
    }

    pub fn all_node_ids(&self) -> Vec<NodeId> {
        self.inner.lock().keys().copied().collect()
    }

    pub fn all_nodes(&self) -> Vec<Node> {
        self.inner.lock().values().map(|e| e.node.clone()).collect()
    }

    /// Push the current node table down every node's control connection.
    /// Called whenever membership changes so a node can resolve a peer's
    /// delivery address for a reorg move or a remote puzzle-part fetch.
    pub fn broadcast_peers(&self) {
        let inner = self.inner.lock();
        let nodes: Vec<Node> = inner.values().map(|e| e.node.clone()).collect();
        for entry in inner.values() {
            if let Some(tx) = &entry.control_tx {
                let _ = tx.send(ControlMessage::Peers { nodes: nodes.clone() });
            }
        }
    }

    /// A worker connection becomes available for dispatch.
    pub fn worker_idle(&self, node_id: NodeId, tx: mpsc::UnboundedSender<WorkerJob>) {
        if let Some(entry) = self.inner.lock().get_mut(&node_id) {
            entry.idle_workers.push_back(tx);
        }
    }

    /// Pop an idle worker sender for `node_id`, if any is currently free.
    pub fn checkout_worker(&self, node_id: NodeId) -> Option<mpsc::UnboundedSender<WorkerJob>> {
        self.inner.lock().get_mut(&node_id).and_then(|e| e.idle_workers.pop_front())
    }

    pub fn control_sender(&self, node_id: NodeId) -> Option<mpsc::UnboundedSender<ControlMessage>> {
        self.inner.lock().get(&node_id).and_then(|e| e.control_tx.clone())
    }

    pub fn record_job_start(&self, node_id: NodeId) {
        if let Some(e) = self.inner.lock().get_mut(&node_id) {
            e.in_flight += 1;
        }
    }

    pub fn record_job_end(&self, node_id: NodeId) {
        if let Some(e) = self.inner.lock().get_mut(&node_id) {
            e.in_flight = e.in_flight.saturating_sub(1);
        }
    }

    pub fn apply_stats(&self, node_id: NodeId, stats: NodeStats) {
        if let Some(e) = self.inner.lock().get_mut(&node_id) {
            let busy = stats.cpu_busy_ratio.max(stats.gpu_busy_ratio).max(stats.io_busy_ratio);
            e.ewma_busy.observe(busy);
            e.last_stats = Some(stats);
        }
    }

    pub fn last_stats(&self, node_id: NodeId) -> Option<NodeStats> {
        self.inner.lock().get(&node_id).and_then(|e| e.last_stats)
    }

    /// Pick the least loaded node (lowest EWMA busy, ties broken by fewer
    /// in-flight jobs), optionally excluding one node (e.g. the node that
    /// already holds the entry being puzzled, for co-location reorgs).
    pub fn least_loaded(&self, exclude: Option<NodeId>) -> Option<NodeId> {
        let inner = self.inner.lock();
        inner
            .iter()
            .filter(|(id, _)| Some(**id) != exclude)
            .min_by(|(_, a), (_, b)| {
                a.ewma_busy
                    .value()
                    .partial_cmp(&b.ewma_busy.value())
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(a.in_flight.cmp(&b.in_flight))
            })
            .map(|(id, _)| *id)
    }

    pub fn busy_ratio(&self, node_id: NodeId) -> Option<f64> {
        self.inner.lock().get(&node_id).map(|e| e.ewma_busy.value())
    }

    pub fn node_count(&self) -> usize {
        self.inner.lock().len()
    }
}

impl Default for NodeTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_with_node() -> (NodeTable, NodeId) {
        let table = NodeTable::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let id = table.register("10.0.0.1".into(), 7100, tx);
        (table, id)
    }

    #[test]
    fn register_assigns_increasing_ids() {
        let table = NodeTable::new();
        let (tx1, _r1) = mpsc::unbounded_channel();
        let (tx2, _r2) = mpsc::unbounded_channel();
        let a = table.register("a".into(), 1, tx1);
        let b = table.register("b".into(), 2, tx2);
        assert!(b.0 > a.0);
    }

    #[test]
    fn worker_checkout_is_fifo_and_empties() {
        let (table, id) = table_with_node();
        let (tx, _rx) = mpsc::unbounded_channel();
        table.worker_idle(id, tx);
        assert!(table.checkout_worker(id).is_some());
        assert!(table.checkout_worker(id).is_none());
    }

    #[test]
    fn least_loaded_prefers_lower_ewma() {
        let table = NodeTable::new();
        let (tx1, _r1) = mpsc::unbounded_channel();
        let (tx2, _r2) = mpsc::unbounded_channel();
        let a = table.register("a".into(), 1, tx1);
        let b = table.register("b".into(), 2, tx2);
        table.apply_stats(
            a,
            NodeStats { cpu_busy_ratio: 0.9, gpu_busy_ratio: 0.0, io_busy_ratio: 0.0, in_flight_jobs: 0, stored_bytes: 0, capacity_bytes: 0 },
        );
        table.apply_stats(
            b,
            NodeStats { cpu_busy_ratio: 0.1, gpu_busy_ratio: 0.0, io_busy_ratio: 0.0, in_flight_jobs: 0, stored_bytes: 0, capacity_bytes: 0 },
        );
        assert_eq!(table.least_loaded(None), Some(b));
    }

    #[test]
    fn least_loaded_excludes_requested_node() {
        let (table, id) = table_with_node();
        assert_eq!(table.least_loaded(Some(id)), None);
    }

    #[test]
    fn deregister_removes_node() {
        let (table, id) = table_with_node();
        table.deregister(id);
        assert!(table.node(id).is_none());
    }
}
