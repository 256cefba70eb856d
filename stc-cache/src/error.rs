use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("entry of {size_bytes} bytes exceeds store capacity of {capacity_bytes} bytes")]
    EntryTooLarge { size_bytes: u64, capacity_bytes: u64 },

    #[error("could not free {size_bytes} bytes: all evictable entries are pinned")]
    InsertRefused { size_bytes: u64 },
}

pub type Result<T> = std::result::Result<T, CacheError>;
