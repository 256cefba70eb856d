//! Concurrent-request de-duplication: when two client
//! requests against the same `(result_type, fingerprint)` name cubes
//! where one contains the other, only the first triggers a
//! `CMD_CREATE`/`CMD_PUZZLE`; the rest attach as dependents and share its
//! outcome. Delivery jobs (pure hits) are never deduplicated: a hit is
//! cheap enough that two racing clients just each get their own ticket.

use parking_lot::Mutex;
use stc_types::{Cube3, DirectoryId, Fingerprint, ResultType};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::oneshot;

/// What a pending create/puzzle job resolves to once its worker finishes.
#[derive(Debug, Clone)]
pub enum JobOutcome {
    Ready { directory_id: DirectoryId, delivery_id: u64, node_host: String, node_port: u16, node_id: stc_types::NodeId },
    Failed(String),
}

struct PendingJob {
    result_type: ResultType,
    fingerprint: Fingerprint,
    cube: Cube3,
    /// Waiters in registration order; index 0 is always the job's
    /// original requester.
    waiters: Vec<oneshot::Sender<JobOutcome>>,
}

/// Small in-memory registry of in-flight create/puzzle jobs. A linear
/// scan per lookup is the right trade-off given the expected size
/// (seconds-long jobs, not millions of them in flight at once).
pub struct QueryManager {
    next_id: AtomicU64,
    inner: Mutex<HashMap<u64, PendingJob>>,
}

impl QueryManager {
    pub fn new() -> Self {
        QueryManager { next_id: AtomicU64::new(1), inner: Mutex::new(HashMap::new()) }
    }

    /// Try to attach to an already-pending job whose cube contains `cube`.
    /// Returns the job id and a receiver that fires once the primary job
    /// completes.
    pub fn try_attach(
        &self,
        result_type: ResultType,
        fingerprint: &Fingerprint,
        cube: &Cube3,
    ) -> Option<(u64, oneshot::Receiver<JobOutcome>)> {
        let mut inner = self.inner.lock();
        attach_locked(&mut inner, result_type, fingerprint, cube)
    }

    /// Register a brand-new job as the primary requester. Returns the job
    /// id (to be passed along as the dispatch job's correlation id) and a
    /// receiver that fires with this job's own outcome.
    pub fn register(&self, result_type: ResultType, fingerprint: Fingerprint, cube: Cube3) -> (u64, oneshot::Receiver<JobOutcome>) {
        let mut inner = self.inner.lock();
        register_locked(&mut inner, &self.next_id, result_type, fingerprint, cube)
    }

    /// Atomically attach to an existing pending job whose cube contains
    /// `cube`, or register a brand-new one if none matches. Holding the
    /// lock across both the scan and the insert is what makes "at most one
    /// concurrent compute per (SF, cube)" (spec P3) actually hold: a
    /// separate `try_attach` then `register` pair would let two callers
    /// both miss the scan and each register their own job.
    ///
    /// Returns `(job_id, receiver, is_new)`; `is_new` tells the caller
    /// whether it is the primary requester (must dispatch the worker job)
    /// or a dependent (must not).
    pub fn attach_or_register(
        &self,
        result_type: ResultType,
        fingerprint: Fingerprint,
        cube: Cube3,
    ) -> (u64, oneshot::Receiver<JobOutcome>, bool) {
        let mut inner = self.inner.lock();
        if let Some((id, rx)) = attach_locked(&mut inner, result_type, &fingerprint, &cube) {
            return (id, rx, false);
        }
        let (id, rx) = register_locked(&mut inner, &self.next_id, result_type, fingerprint, cube);
        (id, rx, true)
    }

    /// How many delivery tickets the worker needs to mint for this job.
    pub fn waiter_count(&self, job_id: u64) -> usize {
        self.inner.lock().get(&job_id).map(|j| j.waiters.len()).unwrap_or(0)
    }

    /// Resolve the next unresolved waiter in registration order with one
    /// minted delivery ticket. Call this once per `RESP_DELIVERY_READY`
    /// frame the worker sends back.
    pub fn resolve_one(&self, job_id: u64, outcome: JobOutcome) {
        let mut inner = self.inner.lock();
        if let Some(job) = inner.get_mut(&job_id) {
            if let Some(tx) = pop_front(&mut job.waiters) {
                let _ = tx.send(outcome);
            }
            if job.waiters.is_empty() {
                inner.remove(&job_id);
            }
        }
    }

    /// Fail every remaining waiter and drop the job (a worker error or a
    /// dropped connection mid-job).
    pub fn fail_all(&self, job_id: u64, reason: String) {
        if let Some(job) = self.inner.lock().remove(&job_id) {
            for tx in job.waiters {
                let _ = tx.send(JobOutcome::Failed(reason.clone()));
            }
        }
    }

    pub fn pending_count(&self) -> usize {
        self.inner.lock().len()
    }
}

fn attach_locked(
    inner: &mut HashMap<u64, PendingJob>,
    result_type: ResultType,
    fingerprint: &Fingerprint,
    cube: &Cube3,
) -> Option<(u64, oneshot::Receiver<JobOutcome>)> {
    let (&id, job) = inner
        .iter_mut()
        .find(|(_, j)| j.result_type == result_type && &j.fingerprint == fingerprint && j.cube.contains(cube))?;
    let (tx, rx) = oneshot::channel();
    job.waiters.push(tx);
    Some((id, rx))
}

fn register_locked(
    inner: &mut HashMap<u64, PendingJob>,
    next_id: &AtomicU64,
    result_type: ResultType,
    fingerprint: Fingerprint,
    cube: Cube3,
) -> (u64, oneshot::Receiver<JobOutcome>) {
    let id = next_id.fetch_add(1, Ordering::Relaxed);
    let (tx, rx) = oneshot::channel();
    inner.insert(id, PendingJob { result_type, fingerprint, cube, waiters: vec![tx] });
    (id, rx)
}

fn pop_front<T>(v: &mut Vec<T>) -> Option<T> {
    if v.is_empty() {
        None
    } else {
        Some(v.remove(0))
    }
}

impl Default for QueryManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stc_types::NodeId;

    fn cube(x1: f64, x2: f64) -> Cube3 {
        Cube3 { x1, x2, y1: 0.0, y2: 10.0, t1: 0, t2: 1 }
    }

    fn ready(n: u32) -> JobOutcome {
        JobOutcome::Ready {
            directory_id: DirectoryId(1),
            delivery_id: n as u64,
            node_host: "h".into(),
            node_port: 1,
            node_id: NodeId(n),
        }
    }

    #[test]
    fn second_request_attaches_when_cube_is_contained() {
        let qm = QueryManager::new();
        let (job_id, _rx) = qm.register(ResultType::Polygons, Fingerprint("f".into()), cube(0.0, 10.0));
        let attached = qm.try_attach(ResultType::Polygons, &Fingerprint("f".into()), &cube(2.0, 8.0));
        assert!(attached.is_some());
        assert_eq!(attached.unwrap().0, job_id);
        assert_eq!(qm.waiter_count(job_id), 2);
    }

    #[test]
    fn disjoint_cube_does_not_attach() {
        let qm = QueryManager::new();
        qm.register(ResultType::Polygons, Fingerprint("f".into()), cube(0.0, 5.0));
        assert!(qm.try_attach(ResultType::Polygons, &Fingerprint("f".into()), &cube(0.0, 10.0)).is_none());
    }

    #[test]
    fn attach_or_register_is_new_only_for_the_first_caller() {
        let qm = QueryManager::new();
        let (first_id, _rx0, first_is_new) =
            qm.attach_or_register(ResultType::Polygons, Fingerprint("f".into()), cube(0.0, 10.0));
        assert!(first_is_new);

        let (second_id, _rx1, second_is_new) =
            qm.attach_or_register(ResultType::Polygons, Fingerprint("f".into()), cube(2.0, 8.0));
        assert!(!second_is_new);
        assert_eq!(second_id, first_id);
        assert_eq!(qm.waiter_count(first_id), 2);
    }

    #[tokio::test]
    async fn resolve_one_delivers_to_waiters_in_order() {
        let qm = QueryManager::new();
        let (job_id, rx0) = qm.register(ResultType::Polygons, Fingerprint("f".into()), cube(0.0, 10.0));
        let (_, rx1) = qm.try_attach(ResultType::Polygons, &Fingerprint("f".into()), &cube(0.0, 10.0)).unwrap();

        qm.resolve_one(job_id, ready(1));
        qm.resolve_one(job_id, ready(2));

        match rx0.await.unwrap() {
            JobOutcome::Ready { node_id, .. } => assert_eq!(node_id, NodeId(1)),
            _ => panic!("expected ready"),
        }
        match rx1.await.unwrap() {
            JobOutcome::Ready { node_id, .. } => assert_eq!(node_id, NodeId(2)),
            _ => panic!("expected ready"),
        }
        assert_eq!(qm.pending_count(), 0);
    }

    #[tokio::test]
    async fn fail_all_notifies_every_waiter() {
        let qm = QueryManager::new();
        let (job_id, rx0) = qm.register(ResultType::Polygons, Fingerprint("f".into()), cube(0.0, 10.0));
        let (_, rx1) = qm.try_attach(ResultType::Polygons, &Fingerprint("f".into()), &cube(0.0, 10.0)).unwrap();
        qm.fail_all(job_id, "boom".into());
        assert!(matches!(rx0.await.unwrap(), JobOutcome::Failed(_)));
        assert!(matches!(rx1.await.unwrap(), JobOutcome::Failed(_)));
    }
}
