//! `NodeCache`: one wrapper instance per result type, pairing
//! the C1 structure (`stc_cache::CacheStore`) with the payloads it
//! describes and the operator-layer collaborators needed to fill a miss
//! or assemble a puzzle.

use crate::error::{NodeCacheError, Result};
use crate::fetch::RemoteFetcher;
use crate::strategy::{CachingDecisionInput, CachingStrategy};
use parking_lot::Mutex;
use stc_cache::{Coverage, EvictionPolicy};
use stc_operator::{ComputeEngine, Payload, TypedOps};
use stc_types::{CacheCube, CacheRef, Entry, EntryId, Fingerprint, NodeEntryKey, NodeId, QueryCube, ResultType};
use stc_wire::{BaseRequest, PuzzleRequest};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{instrument, warn};

pub struct NodeCache {
    store: stc_cache::CacheStore,
    payloads: Mutex<HashMap<EntryId, Arc<Payload>>>,
    typed_ops: Arc<dyn TypedOps>,
    compute_engine: Arc<dyn ComputeEngine>,
    strategy: Arc<dyn CachingStrategy>,
}

impl NodeCache {
    pub fn new(
        capacity_bytes: u64,
        typed_ops: Arc<dyn TypedOps>,
        compute_engine: Arc<dyn ComputeEngine>,
        strategy: Arc<dyn CachingStrategy>,
    ) -> Self {
        NodeCache {
            store: stc_cache::CacheStore::new(typed_ops.result_type(), capacity_bytes),
            payloads: Mutex::new(HashMap::new()),
            typed_ops,
            compute_engine,
            strategy,
        }
    }

    pub fn with_eviction_policy(
        capacity_bytes: u64,
        typed_ops: Arc<dyn TypedOps>,
        compute_engine: Arc<dyn ComputeEngine>,
        strategy: Arc<dyn CachingStrategy>,
        eviction: Arc<dyn EvictionPolicy>,
    ) -> Self {
        NodeCache {
            store: stc_cache::CacheStore::with_policy(typed_ops.result_type(), capacity_bytes, eviction),
            payloads: Mutex::new(HashMap::new()),
            typed_ops,
            compute_engine,
            strategy,
        }
    }

    pub fn result_type(&self) -> ResultType {
        self.typed_ops.result_type()
    }

    pub fn coverage_query(&self, fingerprint: &Fingerprint, q: &QueryCube) -> Coverage<Entry> {
        self.store.coverage_query(fingerprint, q)
    }

    /// `get_ref`: a shared, read-only handle, never a copy.
    pub fn get_ref(&self, fingerprint: &Fingerprint, entry_id: EntryId) -> Option<Arc<Payload>> {
        self.store.get(fingerprint, entry_id)?;
        self.payloads.lock().get(&entry_id).cloned()
    }

    /// `put_local`: insert metadata into the C1 structure,
    /// evicting per policy, then index the payload bytes by the assigned
    /// entry id.
    pub fn put_local(&self, fingerprint: Fingerprint, payload: Payload) -> Result<EntryId> {
        let entry_id = self.store.insert(fingerprint, payload.bounds.clone(), payload.byte_size())?;
        self.payloads.lock().insert(entry_id, Arc::new(payload));
        Ok(entry_id)
    }

    /// `remove_local`: drop without index notification, used
    /// after the index confirms a reorg move.
    pub fn remove_local(&self, fingerprint: &Fingerprint, entry_id: EntryId) -> bool {
        self.payloads.lock().remove(&entry_id);
        self.store.remove_local(fingerprint, entry_id)
    }

    pub fn pin(&self, fingerprint: &Fingerprint, entry_id: EntryId) {
        self.store.pin(fingerprint, entry_id);
    }

    pub fn unpin(&self, fingerprint: &Fingerprint, entry_id: EntryId) {
        self.store.unpin(fingerprint, entry_id);
    }

    /// Insert a freshly computed payload if the caching strategy approves;
    /// always returns the entry id when it does, `None` when it declines
    /// (the payload is still handed back to the caller either way, see
    /// `process_puzzle`).
    fn maybe_cache(&self, fingerprint: Fingerprint, payload: &Payload) -> Option<EntryId> {
        let compute_cost_estimate = payload.byte_size() as f64;
        let cache_cost_estimate = self.typed_ops.estimate_bytes(&payload.bounds.query.bounds) as f64;
        let input = CachingDecisionInput { compute_cost_estimate, cache_cost_estimate };
        if !self.strategy.should_cache(input) {
            return None;
        }
        match self.put_local(fingerprint, payload.clone()) {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(error = %e, "caching strategy approved insert but the store refused it");
                None
            }
        }
    }

    /// `process_puzzle`: fetch any refs not already local,
    /// compute each remainder sub-cube, assemble via the type-specific
    /// `do_puzzle`, insert the assembled result, and return it alongside
    /// the entry id it was cached under, if the strategy approved caching
    /// it (the worker connection needs that id to announce
    /// `RESP_NEW_CACHE_ENTRY`).
    #[instrument(skip(self, request, self_node_id, fetcher), fields(fingerprint = %request.fingerprint))]
    pub fn process_puzzle(
        &self,
        request: &PuzzleRequest,
        self_node_id: NodeId,
        fetcher: &dyn RemoteFetcher,
    ) -> Result<(Payload, Option<EntryId>)> {
        let mut parts = Vec::with_capacity(request.refs.len() + request.remainder.len());

        for r in &request.refs {
            parts.push(self.resolve_ref(r, self_node_id, fetcher)?);
        }

        for sub_cube in &request.remainder {
            let query = QueryCube::new(
                request.bbox.projection,
                request.bbox.time_type,
                sub_cube.x1,
                sub_cube.x2,
                sub_cube.y1,
                sub_cube.y2,
                sub_cube.t1,
                sub_cube.t2,
                request.bbox.resolution,
            )?;
            let bounds = CacheCube::new(query.clone(), None)?;
            let payload = self.typed_ops.compute_item(self.compute_engine.as_ref(), &request.graph, &bounds, &query)?;
            parts.push(payload);
        }

        let assembled = self.typed_ops.do_puzzle(request.bbox.bounds, parts)?;
        let entry_id = self.maybe_cache(request.fingerprint.clone(), &assembled);
        Ok((assembled, entry_id))
    }

    /// Compute a fresh result for a `CMD_CREATE` miss and cache it per
    /// strategy, returning the payload and the entry
    /// id it was cached under, if any.
    #[instrument(skip(self, request), fields(fingerprint = %request.fingerprint))]
    pub fn compute_create(&self, request: &BaseRequest) -> Result<(Payload, Option<EntryId>)> {
        let bounds = CacheCube::new(request.query_rect.clone(), None)?;
        let payload =
            self.typed_ops.compute_item(self.compute_engine.as_ref(), &request.graph, &bounds, &request.query_rect)?;
        let entry_id = self.maybe_cache(request.fingerprint.clone(), &payload);
        Ok((payload, entry_id))
    }

    fn resolve_ref(&self, r: &CacheRef, self_node_id: NodeId, fetcher: &dyn RemoteFetcher) -> Result<Payload> {
        if r.node_id == self_node_id {
            self.get_ref(&r.key.fingerprint, r.key.entry_id)
                .map(|p| (*p).clone())
                .ok_or_else(|| NodeCacheError::NotLocal {
                    fingerprint: r.key.fingerprint.clone(),
                    entry_id: r.key.entry_id,
                })
        } else {
            fetcher
                .fetch(r.node_id, NodeEntryKey { fingerprint: r.key.fingerprint.clone(), entry_id: r.key.entry_id })
                .map_err(|e| NodeCacheError::RemoteFetch {
                    node_id: r.node_id,
                    entry_id: r.key.entry_id,
                    reason: e.to_string(),
                })
        }
    }

    pub fn entry_count(&self) -> usize {
        self.store.entry_count()
    }

    pub fn used_bytes(&self) -> u64 {
        self.store.used_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::NoRemoteFetcher;
    use crate::strategy::Always;
    use stc_operator::mock::{MockEngine, MockPolygonsOps};
    use stc_types::{ProjectionId, TimeType};

    fn qc(x1: f64, x2: f64) -> QueryCube {
        QueryCube::new(ProjectionId(3857), TimeType::Calendar, x1, x2, 0.0, 10.0, 0, 1, None).unwrap()
    }

    fn cache() -> NodeCache {
        NodeCache::new(1_000_000, Arc::new(MockPolygonsOps), Arc::new(MockEngine), Arc::new(Always))
    }

    #[test]
    fn put_then_get_ref_round_trips() {
        let nc = cache();
        let bounds = CacheCube::new(qc(0.0, 10.0), None).unwrap();
        let payload = Payload::new(ResultType::Polygons, bounds, bytes::Bytes::from_static(b"xyz"));
        let id = nc.put_local(Fingerprint("f".into()), payload).unwrap();
        let got = nc.get_ref(&Fingerprint("f".into()), id).unwrap();
        assert_eq!(got.bytes.as_ref(), b"xyz");
    }

    #[test]
    fn process_puzzle_computes_remainder_and_caches_result() {
        let nc = cache();
        let graph = stc_types::OperatorGraph::leaf("source");
        let request = PuzzleRequest {
            fingerprint: Fingerprint("f".into()),
            result_type: ResultType::Polygons,
            bbox: qc(0.0, 10.0),
            refs: vec![],
            remainder: vec![qc(0.0, 10.0).bounds],
            graph,
        };
        let (assembled, entry_id) = nc.process_puzzle(&request, NodeId(1), &NoRemoteFetcher).unwrap();
        assert!(!assembled.bytes.is_empty());
        assert!(entry_id.is_some(), "Always strategy should have cached the assembled result");
        assert_eq!(nc.entry_count(), 1);
    }

    #[test]
    fn process_puzzle_errors_when_ref_is_remote_and_unfetchable() {
        let nc = cache();
        let request = PuzzleRequest {
            fingerprint: Fingerprint("f".into()),
            result_type: ResultType::Polygons,
            bbox: qc(0.0, 10.0),
            refs: vec![CacheRef::new(NodeId(2), Fingerprint("f".into()), EntryId(1))],
            remainder: vec![],
            graph: stc_types::OperatorGraph::leaf("source"),
        };
        assert!(nc.process_puzzle(&request, NodeId(1), &NoRemoteFetcher).is_err());
    }
}
