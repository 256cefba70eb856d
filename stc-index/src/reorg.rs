//! C5: the reorganisation controller. Runs periodically,
//! producing a plan of `ReorgDescription`s in strict priority order:
//! enforce capacity first, then balance load across nodes, then colocate
//! entries that belong to the same fingerprint onto one node.
//!
//! This module only *plans*; `protocol::control_conn` carries out each
//! planned action over the wire and reports back via
//! `RESP_REORG_ITEM_MOVED`/`RESP_REORG_DONE`.

use crate::directory::{DirectoryEntry, DirectorySet};
use crate::node_table::NodeTable;
use stc_config::CacheConfig;
use stc_types::{Micros, NodeId, ResultType};
use stc_wire::{ReorgAction, ReorgDescription};

/// Plans reorg actions; holds no mutable state of its own beyond tuning
/// knobs.
pub struct ReorgController {
    colocation_weight: f64,
    half_life_micros: i64,
}

impl ReorgController {
    pub fn new(colocation_weight: f64, half_life_seconds: u64) -> Self {
        ReorgController { colocation_weight, half_life_micros: half_life_seconds as i64 * 1_000_000 }
    }

    pub fn plan(&self, directories: &DirectorySet, nodes: &NodeTable, cache: &CacheConfig) -> Vec<ReorgDescription> {
        let mut plan = self.capacity_actions(directories, nodes, cache);
        plan.extend(self.balance_actions(directories, nodes, cache));
        plan.extend(self.colocate_actions(directories, nodes));
        plan
    }

    /// Goal 1: no node may hold more than its configured per-type
    /// capacity. Drains the coldest entries first, moving each to the
    /// least loaded other node when that node has room, otherwise
    /// dropping it outright.
    fn capacity_actions(&self, directories: &DirectorySet, nodes: &NodeTable, cache: &CacheConfig) -> Vec<ReorgDescription> {
        let mut plan = Vec::new();
        let now = Micros::now();

        for result_type in ResultType::ALL {
            let dir = directories.get(result_type);
            let cap = cache.capacity_bytes(result_type);

            for node_id in nodes.all_node_ids() {
                let mut used = dir.bytes_on_node(node_id);
                if used <= cap {
                    continue;
                }
                let mut entries = dir.entries_on_node(node_id);
                entries.sort_by(|a, b| a.hotness(now, self.half_life_micros).partial_cmp(&b.hotness(now, self.half_life_micros)).unwrap_or(std::cmp::Ordering::Equal));

                for entry in entries {
                    if used <= cap {
                        break;
                    }
                    used = used.saturating_sub(entry.size_bytes);
                    plan.push(self.plan_one(entry, result_type, node_id, nodes));
                }
            }
        }
        plan
    }

    fn plan_one(&self, entry: DirectoryEntry, result_type: ResultType, from_node: NodeId, nodes: &NodeTable) -> ReorgDescription {
        let action = match nodes.least_loaded(Some(from_node)) {
            Some(to_node) => ReorgAction::Move { to_node },
            None => ReorgAction::Remove,
        };
        ReorgDescription {
            action,
            result_type,
            from_node,
            fingerprint: entry.cache_ref.key.fingerprint.clone(),
            entry_id: entry.cache_ref.key.entry_id,
            directory_id: entry.directory_id,
        }
    }

    /// Goal 2: move the coldest entries off the busiest node onto the
    /// least loaded one when the spread between them is large enough to
    /// be worth a move.
    fn balance_actions(&self, directories: &DirectorySet, nodes: &NodeTable, _cache: &CacheConfig) -> Vec<ReorgDescription> {
        let mut plan = Vec::new();
        let ids = nodes.all_node_ids();
        if ids.len() < 2 {
            return plan;
        }

        let Some(&busiest) = ids.iter().max_by(|a, b| {
            nodes.busy_ratio(**a).unwrap_or(0.0).partial_cmp(&nodes.busy_ratio(**b).unwrap_or(0.0)).unwrap_or(std::cmp::Ordering::Equal)
        }) else {
            return plan;
        };
        let Some(&idlest) = ids.iter().min_by(|a, b| {
            nodes.busy_ratio(**a).unwrap_or(0.0).partial_cmp(&nodes.busy_ratio(**b).unwrap_or(0.0)).unwrap_or(std::cmp::Ordering::Equal)
        }) else {
            return plan;
        };
        if busiest == idlest {
            return plan;
        }
        const IMBALANCE_THRESHOLD: f64 = 0.3;
        let spread = nodes.busy_ratio(busiest).unwrap_or(0.0) - nodes.busy_ratio(idlest).unwrap_or(0.0);
        if spread < IMBALANCE_THRESHOLD {
            return plan;
        }

        let now = Micros::now();
        for result_type in ResultType::ALL {
            let dir = directories.get(result_type);
            let mut entries = dir.entries_on_node(busiest);
            entries.sort_by(|a, b| a.hotness(now, self.half_life_micros).partial_cmp(&b.hotness(now, self.half_life_micros)).unwrap_or(std::cmp::Ordering::Equal));
            if let Some(coldest) = entries.into_iter().next() {
                plan.push(ReorgDescription {
                    action: ReorgAction::Move { to_node: idlest },
                    result_type,
                    from_node: busiest,
                    fingerprint: coldest.cache_ref.key.fingerprint.clone(),
                    entry_id: coldest.cache_ref.key.entry_id,
                    directory_id: coldest.directory_id,
                });
            }
        }
        plan
    }

    /// Goal 3: fingerprints whose entries are split across more than one
    /// node are expensive to puzzle (every contributing ref on a remote
    /// node costs a delivery round trip). Move the minority entries onto
    /// whichever node already holds the most bytes for that fingerprint,
    /// gated by `reorg_colocation_weight` so this never dominates the
    /// other two goals.
    fn colocate_actions(&self, directories: &DirectorySet, nodes: &NodeTable) -> Vec<ReorgDescription> {
        let mut plan = Vec::new();
        if self.colocation_weight <= 0.0 {
            return plan;
        }
        if nodes.node_count() < 2 {
            return plan;
        }

        for result_type in ResultType::ALL {
            let dir = directories.get(result_type);
            let mut by_fingerprint: std::collections::HashMap<_, Vec<DirectoryEntry>> = std::collections::HashMap::new();
            for entry in dir.all_entries() {
                by_fingerprint.entry(entry.cache_ref.key.fingerprint.clone()).or_default().push(entry);
            }
            for (_, entries) in by_fingerprint {
                let mut by_node: std::collections::HashMap<NodeId, u64> = std::collections::HashMap::new();
                for e in &entries {
                    *by_node.entry(e.cache_ref.node_id).or_default() += e.size_bytes;
                }
                if by_node.len() < 2 {
                    continue;
                }
                let Some((&majority_node, _)) = by_node.iter().max_by_key(|(_, bytes)| **bytes) else { continue };
                for e in &entries {
                    if e.cache_ref.node_id == majority_node {
                        continue;
                    }
                    plan.push(ReorgDescription {
                        action: ReorgAction::Move { to_node: majority_node },
                        result_type,
                        from_node: e.cache_ref.node_id,
                        fingerprint: e.cache_ref.key.fingerprint.clone(),
                        entry_id: e.cache_ref.key.entry_id,
                        directory_id: e.directory_id,
                    });
                }
            }
        }
        plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::DirectorySet;
    use stc_config::CacheConfig;
    use stc_types::{CacheCube, CacheRef, EntryId, Fingerprint, ProjectionId, QueryCube, TimeType};
    use tokio::sync::mpsc;

    fn cube(x1: f64, x2: f64) -> CacheCube {
        let q = QueryCube::new(ProjectionId(3857), TimeType::Calendar, x1, x2, 0.0, 10.0, 0, 1, None).unwrap();
        CacheCube::new(q, None).unwrap()
    }

    fn node_table_with(n: usize) -> (NodeTable, Vec<NodeId>) {
        let table = NodeTable::new();
        let mut ids = Vec::new();
        for i in 0..n {
            let (tx, _rx) = mpsc::unbounded_channel();
            ids.push(table.register(format!("h{i}"), 7100, tx));
        }
        (table, ids)
    }

    #[test]
    fn capacity_overrun_schedules_a_move_or_remove() {
        let dirs = DirectorySet::new();
        let (nodes, ids) = node_table_with(2);
        let dir = dirs.get(ResultType::Polygons);
        dir.insert(Fingerprint("f".into()), CacheRef::new(ids[0], Fingerprint("f".into()), EntryId(1)), cube(0.0, 10.0), 1000);

        let mut cache = CacheConfig::default();
        cache.polygons_size = 10;

        let controller = ReorgController::new(0.0, 60);
        let plan = controller.plan(&dirs, &nodes, &cache);
        assert!(plan.iter().any(|d| d.from_node == ids[0] && d.result_type == ResultType::Polygons));
    }

    #[test]
    fn colocate_moves_minority_entries_to_majority_node() {
        let dirs = DirectorySet::new();
        let (nodes, ids) = node_table_with(2);
        let dir = dirs.get(ResultType::Polygons);
        dir.insert(Fingerprint("f".into()), CacheRef::new(ids[0], Fingerprint("f".into()), EntryId(1)), cube(0.0, 5.0), 900);
        dir.insert(Fingerprint("f".into()), CacheRef::new(ids[1], Fingerprint("f".into()), EntryId(1)), cube(5.0, 10.0), 100);

        let cache = CacheConfig::default();
        let controller = ReorgController::new(1.0, 60);
        let plan = controller.plan(&dirs, &nodes, &cache);
        assert!(plan.iter().any(|d| d.from_node == ids[1] && matches!(d.action, ReorgAction::Move { to_node } if to_node == ids[0])));
    }

    #[test]
    fn colocate_disabled_when_weight_is_zero() {
        let dirs = DirectorySet::new();
        let (nodes, ids) = node_table_with(2);
        let dir = dirs.get(ResultType::Polygons);
        dir.insert(Fingerprint("f".into()), CacheRef::new(ids[0], Fingerprint("f".into()), EntryId(1)), cube(0.0, 5.0), 900);
        dir.insert(Fingerprint("f".into()), CacheRef::new(ids[1], Fingerprint("f".into()), EntryId(1)), cube(5.0, 10.0), 100);

        let cache = CacheConfig::default();
        let controller = ReorgController::new(0.0, 60);
        let plan = controller.plan(&dirs, &nodes, &cache);
        assert!(!plan.iter().any(|d| d.from_node == ids[1]));
    }
}
