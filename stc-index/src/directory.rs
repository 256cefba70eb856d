//! C4's directory: the index's own view of every entry on every node,
//! keyed by fingerprint for coverage queries and by `DirectoryId` for
//! reorg bookkeeping.
//!
//! Unlike the node-local `stc_cache::CacheStore`, entries here never carry
//! payload bytes — only the metadata a worker announced on
//! `RESP_NEW_CACHE_ENTRY`, plus the index's own stable `DirectoryId`.

use parking_lot::Mutex;
use stc_cache::{coverage_query, Coverage, Located};
use stc_types::{CacheCube, CacheRef, DirectoryId, EntryId, Fingerprint, Micros, NodeId, QueryCube, ResultType};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// One directory entry: a node-owned cache ref plus the cube it covers.
/// `directory_id` is stable across a reorg move; `cache_ref` is not (a
/// move changes the owning node and the node-local entry id).
///
/// `last_access`/`access_count` are the index's *own* view of demand for
/// this entry, bumped on every coverage query that hits or contributes to
/// it — independent of the node-local `Entry::access_count` the worker
/// keeps, since those never cross the wire. The reorg controller's hotness
/// scoring reads this copy.
#[derive(Debug, Clone, PartialEq)]
pub struct DirectoryEntry {
    pub directory_id: DirectoryId,
    pub cache_ref: CacheRef,
    pub bounds: CacheCube,
    pub size_bytes: u64,
    pub last_access: Micros,
    pub access_count: u64,
}

impl DirectoryEntry {
    /// Decayed "hot" score used to rank reorg candidates:
    /// `access_count * size_bytes`, decayed by elapsed time since last
    /// access.
    pub fn hotness(&self, now: Micros, half_life_micros: i64) -> f64 {
        let elapsed = now.elapsed_since(self.last_access).max(0) as f64;
        let half_life = half_life_micros.max(1) as f64;
        let decay = 0.5f64.powf(elapsed / half_life);
        self.access_count as f64 * self.size_bytes as f64 * decay
    }
}

impl Located for DirectoryEntry {
    fn cache_cube(&self) -> &CacheCube {
        &self.bounds
    }
    fn size_bytes(&self) -> u64 {
        self.size_bytes
    }
    fn entry_id(&self) -> EntryId {
        self.cache_ref.key.entry_id
    }
}

struct Inner {
    by_id: HashMap<DirectoryId, DirectoryEntry>,
    by_fingerprint: HashMap<Fingerprint, Vec<DirectoryId>>,
}

/// One result type's directory. The index holds one per `ResultType`
///, mirroring the
/// per-type split already used for `stc_cache::CacheStore`.
pub struct IndexDirectory {
    result_type: ResultType,
    next_directory_id: AtomicU64,
    inner: Mutex<Inner>,
}

impl IndexDirectory {
    pub fn new(result_type: ResultType) -> Self {
        IndexDirectory {
            result_type,
            next_directory_id: AtomicU64::new(1),
            inner: Mutex::new(Inner { by_id: HashMap::new(), by_fingerprint: HashMap::new() }),
        }
    }

    pub fn result_type(&self) -> ResultType {
        self.result_type
    }

    /// Register a freshly announced entry, assigning it a new directory id.
    pub fn insert(&self, fingerprint: Fingerprint, cache_ref: CacheRef, bounds: CacheCube, size_bytes: u64) -> DirectoryId {
        let directory_id = DirectoryId(self.next_directory_id.fetch_add(1, Ordering::Relaxed));
        let entry = DirectoryEntry {
            directory_id,
            cache_ref,
            bounds,
            size_bytes,
            last_access: Micros::now(),
            access_count: 0,
        };
        let mut inner = self.inner.lock();
        inner.by_fingerprint.entry(fingerprint).or_default().push(directory_id);
        inner.by_id.insert(directory_id, entry);
        directory_id
    }

    pub fn get(&self, directory_id: DirectoryId) -> Option<DirectoryEntry> {
        self.inner.lock().by_id.get(&directory_id).cloned()
    }

    /// Point an existing directory entry at a new node (post-move); the
    /// `directory_id` and bounds stay the same, only `cache_ref` changes.
    pub fn move_entry(&self, directory_id: DirectoryId, new_ref: CacheRef) -> bool {
        let mut inner = self.inner.lock();
        match inner.by_id.get_mut(&directory_id) {
            Some(entry) => {
                entry.cache_ref = new_ref;
                true
            }
            None => false,
        }
    }

    /// Drop an entry entirely (capacity-enforcement remove, or a move's
    /// source-side cleanup once `CMD_MOVE_DONE` lands).
    pub fn remove(&self, directory_id: DirectoryId) -> Option<DirectoryEntry> {
        let mut inner = self.inner.lock();
        let entry = inner.by_id.remove(&directory_id)?;
        if let Some(ids) = inner.by_fingerprint.get_mut(&entry.cache_ref.key.fingerprint) {
            ids.retain(|id| *id != directory_id);
        }
        Some(entry)
    }

    pub fn coverage_query(&self, fingerprint: &Fingerprint, q: &QueryCube) -> Coverage<DirectoryEntry> {
        let mut inner = self.inner.lock();
        let Some(ids) = inner.by_fingerprint.get(fingerprint).cloned() else {
            return Coverage::Miss;
        };
        let candidates: Vec<DirectoryEntry> = ids.iter().filter_map(|id| inner.by_id.get(id).cloned()).collect();
        let result = coverage_query(&candidates, q, self.result_type);

        let touched: Vec<DirectoryId> = match &result {
            Coverage::Hit(e) => vec![e.directory_id],
            Coverage::Partial { contributing, .. } => contributing.iter().map(|e| e.directory_id).collect(),
            Coverage::Miss => Vec::new(),
        };
        for id in touched {
            if let Some(e) = inner.by_id.get_mut(&id) {
                e.last_access = Micros::now();
                e.access_count += 1;
            }
        }
        result
    }

    pub fn entries_on_node(&self, node_id: NodeId) -> Vec<DirectoryEntry> {
        self.inner.lock().by_id.values().filter(|e| e.cache_ref.node_id == node_id).cloned().collect()
    }

    pub fn all_entries(&self) -> Vec<DirectoryEntry> {
        self.inner.lock().by_id.values().cloned().collect()
    }

    pub fn bytes_on_node(&self, node_id: NodeId) -> u64 {
        self.inner.lock().by_id.values().filter(|e| e.cache_ref.node_id == node_id).map(|e| e.size_bytes).sum()
    }

    pub fn entry_count(&self) -> usize {
        self.inner.lock().by_id.len()
    }
}

/// All five per-type directories, indexed by `ResultType`.
pub struct DirectorySet {
    directories: [IndexDirectory; 5],
}

impl DirectorySet {
    pub fn new() -> Self {
        DirectorySet {
            directories: ResultType::ALL.map(IndexDirectory::new),
        }
    }

    pub fn get(&self, result_type: ResultType) -> &IndexDirectory {
        &self.directories[result_type as usize]
    }

    pub fn iter(&self) -> impl Iterator<Item = &IndexDirectory> {
        self.directories.iter()
    }
}

impl Default for DirectorySet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stc_types::{NodeEntryKey, ProjectionId, TimeType};

    fn cube(x1: f64, x2: f64) -> CacheCube {
        let q = QueryCube::new(ProjectionId(3857), TimeType::Calendar, x1, x2, 0.0, 10.0, 0, 1, None).unwrap();
        CacheCube::new(q, None).unwrap()
    }

    fn cref(node: u32, entry: u64) -> CacheRef {
        CacheRef::new(NodeId(node), Fingerprint("f".into()), EntryId(entry))
    }

    #[test]
    fn insert_then_coverage_query_finds_hit() {
        let dir = IndexDirectory::new(ResultType::Polygons);
        dir.insert(Fingerprint("f".into()), cref(1, 1), cube(0.0, 10.0), 100);
        let q = QueryCube::new(ProjectionId(3857), TimeType::Calendar, 2.0, 8.0, 0.0, 10.0, 0, 1, None).unwrap();
        match dir.coverage_query(&Fingerprint("f".into()), &q) {
            Coverage::Hit(e) => assert_eq!(e.cache_ref.node_id, NodeId(1)),
            other => panic!("expected hit, got {other:?}"),
        }
    }

    #[test]
    fn move_entry_updates_owner_keeping_directory_id() {
        let dir = IndexDirectory::new(ResultType::Polygons);
        let id = dir.insert(Fingerprint("f".into()), cref(1, 1), cube(0.0, 10.0), 100);
        assert!(dir.move_entry(id, cref(2, 9)));
        let entry = dir.get(id).unwrap();
        assert_eq!(entry.cache_ref.node_id, NodeId(2));
        assert_eq!(entry.directory_id, id);
    }

    #[test]
    fn remove_drops_from_both_indexes() {
        let dir = IndexDirectory::new(ResultType::Polygons);
        let id = dir.insert(Fingerprint("f".into()), cref(1, 1), cube(0.0, 10.0), 100);
        assert!(dir.remove(id).is_some());
        assert!(dir.get(id).is_none());
        assert_eq!(dir.coverage_query(&Fingerprint("f".into()), &{
            QueryCube::new(ProjectionId(3857), TimeType::Calendar, 0.0, 10.0, 0.0, 10.0, 0, 1, None).unwrap()
        }), Coverage::Miss);
    }

    #[test]
    fn bytes_on_node_sums_only_that_node() {
        let dir = IndexDirectory::new(ResultType::Polygons);
        dir.insert(Fingerprint("f".into()), cref(1, 1), cube(0.0, 10.0), 100);
        dir.insert(Fingerprint("g".into()), cref(2, 1), cube(0.0, 10.0), 50);
        assert_eq!(dir.bytes_on_node(NodeId(1)), 100);
        assert_eq!(dir.bytes_on_node(NodeId(2)), 50);
    }

    #[test]
    fn directory_set_routes_by_result_type() {
        let set = DirectorySet::new();
        assert_eq!(set.get(ResultType::Raster).result_type(), ResultType::Raster);
        assert_eq!(set.get(ResultType::Plot).result_type(), ResultType::Plot);
    }

    #[test]
    fn node_entry_key_is_reachable_through_cache_ref() {
        let k = NodeEntryKey { fingerprint: Fingerprint("f".into()), entry_id: EntryId(1) };
        assert_eq!(cref(1, 1).key, k);
    }
}
