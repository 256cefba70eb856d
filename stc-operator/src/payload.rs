use bytes::Bytes;
use stc_types::{CacheCube, ResultType};

/// An opaque computed or decoded result. The core never interprets
/// `bytes`; it only stores, moves, and delivers them.
#[derive(Debug, Clone)]
pub struct Payload {
    pub result_type: ResultType,
    pub bounds: CacheCube,
    pub bytes: Bytes,
}

impl Payload {
    pub fn new(result_type: ResultType, bounds: CacheCube, bytes: Bytes) -> Self {
        Payload { result_type, bounds, bytes }
    }

    pub fn byte_size(&self) -> u64 {
        self.bytes.len() as u64
    }
}
