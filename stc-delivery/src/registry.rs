//! Staged delivery tickets: a worker that just finished a
//! result for N clients registers one `Delivery` with a fresh id and a
//! countdown; each client pull decrements it; it is erased when the
//! countdown reaches zero or its TTL expires.

use crate::error::{DeliveryError, Result};
use parking_lot::Mutex;
use stc_operator::Payload;
use stc_types::Micros;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeliveryId(pub u64);

// `Delivery` holds no `serde` impl of its own: tickets never cross the
// wire as anything but the bare `u64` in `CMD_GET`, so the struct stays
// process-local.
struct Delivery {
    payload: Arc<Payload>,
    remaining: u32,
    created_at: Micros,
    ttl_micros: i64,
}

pub struct DeliveryRegistry {
    next_id: AtomicU64,
    inner: Mutex<HashMap<u64, Delivery>>,
    default_ttl_micros: i64,
}

impl DeliveryRegistry {
    pub fn new(default_ttl_micros: i64) -> Self {
        DeliveryRegistry { next_id: AtomicU64::new(1), inner: Mutex::new(HashMap::new()), default_ttl_micros }
    }

    /// Register a staged delivery for `remaining` pulls, returning the
    /// ticket id handed back to the index as `RESP_DELIVERY_READY`.
    pub fn register(&self, payload: Arc<Payload>, remaining: u32) -> DeliveryId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.lock().insert(
            id,
            Delivery { payload, remaining, created_at: Micros::now(), ttl_micros: self.default_ttl_micros },
        );
        DeliveryId(id)
    }

    /// `CMD_GET(delivery_id)`: look up, decrement, erase at zero.
    pub fn pull(&self, id: DeliveryId) -> Result<Arc<Payload>> {
        let mut inner = self.inner.lock();
        let entry = inner.get_mut(&id.0).ok_or(DeliveryError::NotFound(id.0))?;

        if Micros::now().elapsed_since(entry.created_at) > entry.ttl_micros {
            inner.remove(&id.0);
            return Err(DeliveryError::Expired(id.0));
        }

        let payload = entry.payload.clone();
        entry.remaining = entry.remaining.saturating_sub(1);
        if entry.remaining == 0 {
            inner.remove(&id.0);
        }
        Ok(payload)
    }

    /// Housekeeping tick: sweep out anything past its TTL regardless of whether
    /// it was ever pulled.
    pub fn expire_stale(&self) -> usize {
        let mut inner = self.inner.lock();
        let now = Micros::now();
        let before = inner.len();
        inner.retain(|_, d| now.elapsed_since(d.created_at) <= d.ttl_micros);
        before - inner.len()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stc_types::{CacheCube, ProjectionId, QueryCube, ResultType, TimeType};

    fn payload() -> Arc<Payload> {
        let q = QueryCube::new(ProjectionId(3857), TimeType::Calendar, 0.0, 1.0, 0.0, 1.0, 0, 1, None).unwrap();
        let bounds = CacheCube::new(q, None).unwrap();
        Arc::new(Payload::new(ResultType::Raster, bounds, bytes::Bytes::from_static(b"x")))
    }

    #[test]
    fn pull_decrements_and_erases_at_zero() {
        let reg = DeliveryRegistry::new(30_000_000);
        let id = reg.register(payload(), 2);
        assert_eq!(reg.len(), 1);
        reg.pull(id).unwrap();
        assert_eq!(reg.len(), 1, "one pull remaining");
        reg.pull(id).unwrap();
        assert_eq!(reg.len(), 0, "erased after the last pull");
    }

    #[test]
    fn pull_of_unknown_id_is_not_found() {
        let reg = DeliveryRegistry::new(30_000_000);
        assert!(matches!(reg.pull(DeliveryId(999)), Err(DeliveryError::NotFound(999))));
    }

    #[test]
    fn expired_delivery_is_rejected_and_swept() {
        let reg = DeliveryRegistry::new(-1);
        let id = reg.register(payload(), 5);
        assert!(matches!(reg.pull(id), Err(DeliveryError::Expired(_))));
        assert_eq!(reg.len(), 0);
    }
}
