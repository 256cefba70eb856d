//! Wires one `NodeCache` per `ResultType` together, the way a node
//! process needs them.
//! Defaults to the in-memory mock collaborators.

use stc_node_cache::{Always, CachingDecisionInput, CachingStrategy, CostThreshold, NodeCache};
use stc_operator::mock::{mock_typed_ops_table, MockEngine};
use stc_operator::ComputeEngine;
use stc_types::ResultType;
use std::sync::Arc;

#[derive(Debug, Default, Clone, Copy)]
struct Disabled;

impl CachingStrategy for Disabled {
    fn should_cache(&self, _input: CachingDecisionInput) -> bool {
        false
    }
}

fn strategy_for(cache: &stc_config::CacheConfig) -> Arc<dyn CachingStrategy> {
    if !cache.enabled {
        return Arc::new(Disabled);
    }
    match cache.strategy {
        stc_config::StrategyKind::Always => Arc::new(Always),
        stc_config::StrategyKind::Costly => Arc::new(CostThreshold::new(cache.cost_multiplier)),
    }
}

/// All five per-type caches on one node, indexed by `ResultType`.
pub struct NodeCacheSet {
    caches: [Arc<NodeCache>; 5],
    capacity_bytes: u64,
}

impl NodeCacheSet {
    pub fn from_config(cache: &stc_config::CacheConfig) -> Self {
        Self::with_engine(cache, Arc::new(MockEngine))
    }

    pub fn with_engine(cache: &stc_config::CacheConfig, engine: Arc<dyn ComputeEngine>) -> Self {
        let strategy = strategy_for(cache);
        let mut ops_by_type = mock_typed_ops_table();
        let capacity_bytes = ResultType::ALL.iter().map(|rt| cache.capacity_bytes(*rt)).sum();
        let caches = ResultType::ALL.map(|rt| {
            let pos = ops_by_type.iter().position(|o| o.result_type() == rt).expect("mock ops cover every result type");
            let ops = ops_by_type.remove(pos);
            Arc::new(NodeCache::new(cache.capacity_bytes(rt), Arc::from(ops), engine.clone(), strategy.clone()))
        });
        NodeCacheSet { caches, capacity_bytes }
    }

    pub fn get(&self, result_type: ResultType) -> &Arc<NodeCache> {
        &self.caches[result_type as usize]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<NodeCache>> {
        self.caches.iter()
    }

    pub fn stored_bytes(&self) -> u64 {
        self.caches.iter().map(|c| c.used_bytes()).sum()
    }

    pub fn capacity_bytes(&self) -> u64 {
        self.capacity_bytes
    }
}
