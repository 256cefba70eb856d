//! Eviction policy: pluggable, monotone — inserting an entry
//! may evict older ones until the size target is met. The shipped default
//! is LRU over `last_access`; `cache.replacement` in configuration names
//! the active policy.

use stc_types::{EntryId, Micros};

/// One candidate the store offers to the policy for possible eviction.
#[derive(Debug, Clone, Copy)]
pub struct EvictionCandidate {
    pub entry_id: EntryId,
    pub last_access: Micros,
    pub access_count: u64,
    pub size_bytes: u64,
    /// Entries that are pinned (held by an in-flight delivery, or by a
    /// pending reorg move) are never offered for eviction by the store,
    /// but the flag is threaded through so a policy can assert on it.
    pub pinned: bool,
}

/// Chooses which entries to drop to bring a store back under capacity.
/// Implementations must be monotone: given the same candidate set and
/// target, they return a subset whose removal frees at least
/// `bytes_needed`, never more entries than necessary to do so.
pub trait EvictionPolicy: Send + Sync {
    fn choose(&self, candidates: &[EvictionCandidate], bytes_needed: u64) -> Vec<EntryId>;
}

/// Evict least-recently-used first.
#[derive(Debug, Default, Clone, Copy)]
pub struct Lru;

impl EvictionPolicy for Lru {
    fn choose(&self, candidates: &[EvictionCandidate], bytes_needed: u64) -> Vec<EntryId> {
        let mut ordered: Vec<&EvictionCandidate> =
            candidates.iter().filter(|c| !c.pinned).collect();
        ordered.sort_by_key(|c| c.last_access);

        let mut freed = 0u64;
        let mut chosen = Vec::new();
        for c in ordered {
            if freed >= bytes_needed {
                break;
            }
            chosen.push(c.entry_id);
            freed += c.size_bytes;
        }
        chosen
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: u64, access: i64, size: u64, pinned: bool) -> EvictionCandidate {
        EvictionCandidate {
            entry_id: EntryId(id),
            last_access: Micros(access),
            access_count: 1,
            size_bytes: size,
            pinned,
        }
    }

    #[test]
    fn lru_evicts_oldest_first_until_target_met() {
        let candidates = vec![candidate(1, 30, 100, false), candidate(2, 10, 100, false), candidate(3, 20, 100, false)];
        let chosen = Lru.choose(&candidates, 150);
        assert_eq!(chosen, vec![EntryId(2), EntryId(3)]);
    }

    #[test]
    fn lru_never_evicts_pinned_entries() {
        let candidates = vec![candidate(1, 1, 100, true), candidate(2, 2, 100, false)];
        let chosen = Lru.choose(&candidates, 500);
        assert_eq!(chosen, vec![EntryId(2)]);
    }
}
