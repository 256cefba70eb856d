//! Entries, keys, and node identity.

use crate::cube::CacheCube;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// The kind of result a cache entry holds. Dispatch over result types is
/// modeled as this sealed enum plus a per-variant trait object, per Design
/// Note 9, rather than five copy-pasted modules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResultType {
    Raster,
    Points,
    Lines,
    Polygons,
    Plot,
}

impl ResultType {
    pub const ALL: [ResultType; 5] = [
        ResultType::Raster,
        ResultType::Points,
        ResultType::Lines,
        ResultType::Polygons,
        ResultType::Plot,
    ];

    /// Plot results are never puzzled: a miss is always a full recompute.
    pub fn is_puzzleable(self) -> bool {
        !matches!(self, ResultType::Plot)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ResultType::Raster => "raster",
            ResultType::Points => "points",
            ResultType::Lines => "lines",
            ResultType::Polygons => "polygons",
            ResultType::Plot => "plots",
        }
    }
}

/// Node-local, monotonically assigned 64-bit id for one stored entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntryId(pub u64);

/// Unique id for a cache node, issued by the index on first control
/// handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u32);

/// The index's own directory id for one entry, independent of node-local
/// entry ids (needed because a move changes the owning node and entry id
/// while the directory id stays stable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DirectoryId(pub u64);

/// `(fingerprint, entry_id)`: uniquely identifies an entry on one node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeEntryKey {
    pub fingerprint: crate::fingerprint::Fingerprint,
    pub entry_id: EntryId,
}

/// `(node_id, fingerprint, entry_id)`: the network-wide entry identifier
/// the index uses in its directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheRef {
    pub node_id: NodeId,
    pub key: NodeEntryKey,
}

impl CacheRef {
    pub fn new(node_id: NodeId, fingerprint: crate::fingerprint::Fingerprint, entry_id: EntryId) -> Self {
        CacheRef { node_id, key: NodeEntryKey { fingerprint, entry_id } }
    }
}

/// What a worker announces to the index on `RESP_NEW_CACHE_ENTRY`: a
/// `CacheRef` plus the cube it covers, so the directory can answer
/// coverage queries without round-tripping to the node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeCacheRef {
    pub cache_ref: CacheRef,
    pub result_type: ResultType,
    pub bounds: CacheCube,
    pub size_bytes: u64,
}

/// A stored computation result on one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub entry_id: EntryId,
    pub bounds: CacheCube,
    pub size_bytes: u64,
    pub last_access: Micros,
    pub access_count: u64,
}

/// Microseconds since the Unix epoch, used for `last_access` bookkeeping.
/// A plain wall-clock reading, not a calendar-tagged query timestamp (see
/// [`crate::cube::Micros`] for the latter).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Micros(pub i64);

impl Micros {
    pub fn now() -> Self {
        let d = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
        Micros(d.as_micros() as i64)
    }

    pub fn elapsed_since(self, earlier: Micros) -> i64 {
        self.0 - earlier.0
    }
}

impl Entry {
    pub fn new(entry_id: EntryId, bounds: CacheCube, size_bytes: u64) -> Self {
        Entry {
            entry_id,
            bounds,
            size_bytes,
            last_access: Micros::now(),
            access_count: 0,
        }
    }

    pub fn touch(&mut self) {
        self.last_access = Micros::now();
        self.access_count += 1;
    }

    /// Decayed "hotness" score used by the reorg controller:
    /// `access_count * size_bytes`, decayed by how long ago the entry was
    /// last touched (half-life in microseconds).
    pub fn hotness(&self, now: Micros, half_life_micros: i64) -> f64 {
        let elapsed = (now.elapsed_since(self.last_access)).max(0) as f64;
        let half_life = half_life_micros.max(1) as f64;
        let decay = 0.5f64.powf(elapsed / half_life);
        self.access_count as f64 * self.size_bytes as f64 * decay
    }
}

/// `{id, host, delivery_port}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub host: String,
    pub delivery_port: u16,
}
