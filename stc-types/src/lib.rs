//! Shared data model for the distributed spatio-temporal result cache:
//! query/cache cubes, entries, keys, node identity, and semantic
//! fingerprints. Everything downstream (`stc-cache`, `stc-wire`,
//! `stc-index`, `stc-node`) builds on these types, so they carry no
//! dependency on tokio, networking, or storage.

pub mod cube;
pub mod entry;
pub mod error;
pub mod fingerprint;

pub use cube::{
    CacheCube, Cube3, PixelResolution, ProjectionId, QueryCube, ResolutionDescriptor,
    ScaleInterval, TimeType,
};
pub use entry::{
    CacheRef, DirectoryId, Entry, EntryId, Micros, Node, NodeCacheRef, NodeEntryKey, NodeId,
    ResultType,
};
pub use error::{Result, TypesError};
pub use fingerprint::{fingerprint, Fingerprint, OperatorGraph};
