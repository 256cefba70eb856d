//! A concrete C1 instance: one result type's `fingerprint -> entries` map
//! on one node, with entry-id allocation and LRU-style eviction.
//!
//! Mutations are guarded by a `parking_lot::Mutex`; operations
//! under the lock are `O(candidates for a fingerprint)` and never perform
//! I/O, so the lock is never held across an await point.

use crate::coverage::{coverage_query, Coverage, Located};
use crate::error::{CacheError, Result};
use crate::eviction::{EvictionCandidate, EvictionPolicy, Lru};
use parking_lot::Mutex;
use stc_types::{CacheCube, Entry, EntryId, Fingerprint, QueryCube, ResultType};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

impl Located for Entry {
    fn cache_cube(&self) -> &CacheCube {
        &self.bounds
    }
    fn size_bytes(&self) -> u64 {
        self.size_bytes
    }
    fn entry_id(&self) -> EntryId {
        self.entry_id
    }
}

struct Inner {
    by_fingerprint: HashMap<Fingerprint, Vec<Entry>>,
    used_bytes: u64,
    /// Entries a delivery or pending move currently holds a reference to;
    /// the eviction policy must never choose these.
    pinned: HashSet<(Fingerprint, EntryId)>,
}

/// One result type's cache structure on one node.
pub struct CacheStore {
    result_type: ResultType,
    capacity_bytes: u64,
    next_entry_id: AtomicU64,
    eviction: Arc<dyn EvictionPolicy>,
    inner: Mutex<Inner>,
}

impl CacheStore {
    pub fn new(result_type: ResultType, capacity_bytes: u64) -> Self {
        Self::with_policy(result_type, capacity_bytes, Arc::new(Lru))
    }

    pub fn with_policy(result_type: ResultType, capacity_bytes: u64, eviction: Arc<dyn EvictionPolicy>) -> Self {
        CacheStore {
            result_type,
            capacity_bytes,
            next_entry_id: AtomicU64::new(1),
            eviction,
            inner: Mutex::new(Inner {
                by_fingerprint: HashMap::new(),
                used_bytes: 0,
                pinned: HashSet::new(),
            }),
        }
    }

    pub fn result_type(&self) -> ResultType {
        self.result_type
    }

    pub fn used_bytes(&self) -> u64 {
        self.inner.lock().used_bytes
    }

    pub fn capacity_bytes(&self) -> u64 {
        self.capacity_bytes
    }

    /// `get(fingerprint, entry_id)`: also bumps `last_access`
    /// and `access_count` under the same lock that eviction scoring reads,
    /// so no reader observes a partial update.
    pub fn get(&self, fingerprint: &Fingerprint, entry_id: EntryId) -> Option<Entry> {
        let mut inner = self.inner.lock();
        let entries = inner.by_fingerprint.get_mut(fingerprint)?;
        let entry = entries.iter_mut().find(|e| e.entry_id == entry_id)?;
        entry.touch();
        Some(entry.clone())
    }

    /// Coverage query. Touches every contributing entry's
    /// `last_access`/`access_count` under the same lock used for eviction
    /// scoring, same invariant as `get`.
    pub fn coverage_query(&self, fingerprint: &Fingerprint, q: &QueryCube) -> Coverage<Entry> {
        let mut inner = self.inner.lock();
        let Some(entries) = inner.by_fingerprint.get(fingerprint) else {
            return Coverage::Miss;
        };
        let result = coverage_query(entries, q, self.result_type);

        let touched: Vec<EntryId> = match &result {
            Coverage::Hit(e) => vec![e.entry_id()],
            Coverage::Partial { contributing, .. } => contributing.iter().map(Located::entry_id).collect(),
            Coverage::Miss => Vec::new(),
        };
        if !touched.is_empty() {
            if let Some(entries) = inner.by_fingerprint.get_mut(fingerprint) {
                for e in entries.iter_mut() {
                    if touched.contains(&e.entry_id) {
                        e.touch();
                    }
                }
            }
        }
        result
    }

    /// Insert a freshly computed payload's metadata, evicting per policy
    /// until `used <= capacity`. Returns the assigned entry id, or an
    /// error if the entry doesn't fit even after evicting everything
    /// evictable.
    pub fn insert(&self, fingerprint: Fingerprint, bounds: CacheCube, size_bytes: u64) -> Result<EntryId> {
        if size_bytes > self.capacity_bytes {
            return Err(CacheError::EntryTooLarge { size_bytes, capacity_bytes: self.capacity_bytes });
        }
        let entry_id = EntryId(self.next_entry_id.fetch_add(1, Ordering::Relaxed));
        let entry = Entry::new(entry_id, bounds, size_bytes);

        let mut inner = self.inner.lock();
        self.make_room(&mut inner, size_bytes)?;
        inner.used_bytes += size_bytes;
        inner.by_fingerprint.entry(fingerprint).or_default().push(entry);
        Ok(entry_id)
    }

    fn make_room(&self, inner: &mut Inner, needed: u64) -> Result<()> {
        if inner.used_bytes + needed <= self.capacity_bytes {
            return Ok(());
        }
        let bytes_needed = (inner.used_bytes + needed).saturating_sub(self.capacity_bytes);

        let pinned_snapshot = inner.pinned.clone();
        let mut candidates: Vec<(Fingerprint, EvictionCandidate)> = Vec::new();
        for (fp, entries) in inner.by_fingerprint.iter() {
            for e in entries {
                let pinned = pinned_snapshot.contains(&(fp.clone(), e.entry_id));
                candidates.push((
                    fp.clone(),
                    EvictionCandidate {
                        entry_id: e.entry_id,
                        last_access: e.last_access,
                        access_count: e.access_count,
                        size_bytes: e.size_bytes,
                        pinned,
                    },
                ));
            }
        }

        let just_candidates: Vec<EvictionCandidate> = candidates.iter().map(|(_, c)| *c).collect();
        let chosen = self.eviction.choose(&just_candidates, bytes_needed);

        let mut freed = 0u64;
        for (fp, candidate) in &candidates {
            if !chosen.contains(&candidate.entry_id) {
                continue;
            }
            if let Some(entries) = inner.by_fingerprint.get_mut(fp) {
                if let Some(pos) = entries.iter().position(|e| e.entry_id == candidate.entry_id) {
                    let removed = entries.remove(pos);
                    freed += removed.size_bytes;
                }
            }
        }
        inner.used_bytes = inner.used_bytes.saturating_sub(freed);

        if inner.used_bytes + needed > self.capacity_bytes {
            return Err(CacheError::InsertRefused { size_bytes: needed });
        }
        Ok(())
    }

    /// `remove_local`: drop without any index notification.
    pub fn remove_local(&self, fingerprint: &Fingerprint, entry_id: EntryId) -> bool {
        let mut inner = self.inner.lock();
        inner.pinned.remove(&(fingerprint.clone(), entry_id));
        if let Some(entries) = inner.by_fingerprint.get_mut(fingerprint) {
            if let Some(pos) = entries.iter().position(|e| e.entry_id == entry_id) {
                let removed = entries.remove(pos);
                inner.used_bytes = inner.used_bytes.saturating_sub(removed.size_bytes);
                return true;
            }
        }
        false
    }

    /// Mark an entry as pending-move or delivery-held: not evictable.
    pub fn pin(&self, fingerprint: &Fingerprint, entry_id: EntryId) {
        self.inner.lock().pinned.insert((fingerprint.clone(), entry_id));
    }

    pub fn unpin(&self, fingerprint: &Fingerprint, entry_id: EntryId) {
        self.inner.lock().pinned.remove(&(fingerprint.clone(), entry_id));
    }

    pub fn is_pinned(&self, fingerprint: &Fingerprint, entry_id: EntryId) -> bool {
        self.inner.lock().pinned.contains(&(fingerprint.clone(), entry_id))
    }

    pub fn entry_count(&self) -> usize {
        self.inner.lock().by_fingerprint.values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stc_types::{CacheCube, ProjectionId, QueryCube, TimeType};

    fn fp(s: &str) -> Fingerprint {
        Fingerprint(s.to_string())
    }

    fn cube(x1: f64, x2: f64) -> CacheCube {
        let q = QueryCube::new(ProjectionId(3857), TimeType::Calendar, x1, x2, 0.0, 10.0, 0, 1, None).unwrap();
        CacheCube::new(q, None).unwrap()
    }

    #[test]
    fn insert_then_get_round_trips_and_touches_access_count() {
        let store = CacheStore::new(ResultType::Polygons, 1_000_000);
        let id = store.insert(fp("f"), cube(0.0, 10.0), 100).unwrap();
        let e = store.get(&fp("f"), id).unwrap();
        assert_eq!(e.access_count, 1);
        let e2 = store.get(&fp("f"), id).unwrap();
        assert_eq!(e2.access_count, 2);
    }

    #[test]
    fn eviction_keeps_store_under_capacity() {
        let store = CacheStore::new(ResultType::Polygons, 250);
        store.insert(fp("f"), cube(0.0, 1.0), 100).unwrap();
        store.insert(fp("f"), cube(1.0, 2.0), 100).unwrap();
        store.insert(fp("f"), cube(2.0, 3.0), 100).unwrap();
        assert!(store.used_bytes() <= 250);
        assert_eq!(store.entry_count(), 2);
    }

    #[test]
    fn insert_refused_when_entry_never_fits() {
        let store = CacheStore::new(ResultType::Polygons, 50);
        let err = store.insert(fp("f"), cube(0.0, 1.0), 100).unwrap_err();
        assert!(matches!(err, CacheError::EntryTooLarge { .. }));
    }

    #[test]
    fn pinned_entries_survive_eviction_pressure() {
        let store = CacheStore::new(ResultType::Polygons, 150);
        let id = store.insert(fp("f"), cube(0.0, 1.0), 100).unwrap();
        store.pin(&fp("f"), id);
        let err = store.insert(fp("f"), cube(1.0, 2.0), 100);
        assert!(err.is_err(), "second insert should be refused: the only evictable room is pinned");
        assert!(store.get(&fp("f"), id).is_some());
    }

    #[test]
    fn remove_local_drops_without_touching_index() {
        let store = CacheStore::new(ResultType::Polygons, 1000);
        let id = store.insert(fp("f"), cube(0.0, 1.0), 100).unwrap();
        assert!(store.remove_local(&fp("f"), id));
        assert!(store.get(&fp("f"), id).is_none());
    }
}
