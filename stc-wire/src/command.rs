//! Stable command codes.

#![allow(non_upper_case_globals)]

pub mod client {
    pub const CMD_GET: u8 = 1;
    pub const RESP_OK: u8 = 10;
    pub const RESP_ERROR: u8 = 19;
}

pub mod worker {
    pub const CMD_CREATE: u8 = 20;
    pub const CMD_DELIVER: u8 = 21;
    pub const CMD_PUZZLE: u8 = 22;
    pub const CMD_QUERY_CACHE: u8 = 23;
    pub const RESP_RESULT_READY: u8 = 30;
    pub const RESP_DELIVERY_READY: u8 = 31;
    pub const RESP_NEW_CACHE_ENTRY: u8 = 32;
    pub const RESP_QUERY_HIT: u8 = 33;
    pub const RESP_QUERY_MISS: u8 = 34;
    pub const RESP_QUERY_PARTIAL: u8 = 36;
    pub const RESP_DELIVERY_QTY: u8 = 37;
    pub const RESP_ERROR: u8 = 39;
}

pub mod control {
    pub const CMD_REORG: u8 = 40;
    pub const CMD_GET_STATS: u8 = 41;
    pub const CMD_MOVE_OK: u8 = 42;
    pub const CMD_REMOVE_OK: u8 = 43;
    pub const CMD_HELLO: u8 = 44;
    pub const RESP_REORG_ITEM_MOVED: u8 = 51;
    pub const RESP_REORG_DONE: u8 = 52;
    pub const RESP_STATS: u8 = 53;
    /// **[ADDED]**: beyond the documented command table. The move protocol and a
    /// worker's remote puzzle-part fetch both need a peer node's
    /// `(host, delivery_port)` from nothing but a `NodeId` (`CacheRef`
    /// and `ReorgDescription` carry only the id); the
    /// index is the only component that already holds the full `Node`
    /// record (`NodeTable`), so it pushes the table down every control
    /// connection on change instead of inventing a node-to-node lookup.
    pub const CMD_PEERS: u8 = 54;
}

pub mod delivery {
    pub const CMD_GET: u8 = 60;
    pub const CMD_GET_CACHED_ITEM: u8 = 61;
    pub const CMD_MOVE_ITEM: u8 = 62;
    pub const CMD_MOVE_DONE: u8 = 63;
    pub const RESP_OK: u8 = 79;
    pub const RESP_ERROR: u8 = 80;
}
