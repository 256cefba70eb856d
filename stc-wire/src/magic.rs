//! Connection-kind magic numbers. The first four bytes after
//! accept identify which of the four state machines (client/worker/
//! control/delivery) this connection is.

use crate::error::{Result, WireError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionKind {
    Client,
    Worker,
    Control,
    Delivery,
}

impl ConnectionKind {
    pub const CLIENT_MAGIC: u32 = 0x2234_5678;
    pub const WORKER_MAGIC: u32 = 0x3234_5678;
    pub const CONTROL_MAGIC: u32 = 0x4234_5678;
    pub const DELIVERY_MAGIC: u32 = 0x5234_5678;

    pub fn magic(self) -> u32 {
        match self {
            ConnectionKind::Client => Self::CLIENT_MAGIC,
            ConnectionKind::Worker => Self::WORKER_MAGIC,
            ConnectionKind::Control => Self::CONTROL_MAGIC,
            ConnectionKind::Delivery => Self::DELIVERY_MAGIC,
        }
    }

    pub fn from_magic(magic: u32) -> Result<Self> {
        match magic {
            Self::CLIENT_MAGIC => Ok(ConnectionKind::Client),
            Self::WORKER_MAGIC => Ok(ConnectionKind::Worker),
            Self::CONTROL_MAGIC => Ok(ConnectionKind::Control),
            Self::DELIVERY_MAGIC => Ok(ConnectionKind::Delivery),
            other => Err(WireError::UnknownMagic(other)),
        }
    }
}
