//! Worker connection accept loop: one task per worker
//! thread a node dials in with. The state machine mirrors the
//! IDLE -> SENDING_REQUEST -> PROCESSING -> (NEW_ENTRY | QUERY_REQUESTED |
//! DONE) -> SENDING_DELIVERY_QTY -> WAITING_DELIVERY -> IDLE states: a
//! connection is handed exactly one job at a time and the two sides trade
//! frames until every minted delivery ticket has gone out.

use crate::dispatch::IndexState;
use crate::node_table::WorkerJob;
use crate::query_manager::JobOutcome;
use futures::{SinkExt, StreamExt};
use stc_cache::Coverage;
use stc_types::DirectoryId;
use stc_wire::{BaseRequest, ConnectionKind, FrameCodec, PuzzleRequest, WorkerHandshake, WorkerMessage};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tracing::{info, warn};

pub async fn run(mut socket: TcpStream, state: Arc<IndexState>) {
    if let Err(e) = super::expect_magic(&mut socket, ConnectionKind::Worker).await {
        warn!(error = %e, "worker connection rejected at handshake");
        return;
    }

    let mut handshake = Framed::new(socket, FrameCodec::<WorkerHandshake>::default());
    let node_id = match handshake.next().await {
        Some(Ok(hs)) => hs.node_id,
        _ => {
            warn!("worker connection closed before sending its handshake");
            return;
        }
    };
    let socket = handshake.into_inner();

    if state.nodes.node(node_id).is_none() {
        warn!(?node_id, "worker handshake named a node that never completed control registration");
        return;
    }
    info!(?node_id, "worker connection established");

    let mut framed = Framed::new(socket, FrameCodec::<WorkerMessage>::default());
    let (job_tx, mut job_rx) = mpsc::unbounded_channel::<WorkerJob>();

    loop {
        state.nodes.worker_idle(node_id, job_tx.clone());
        let job = match job_rx.recv().await {
            Some(job) => job,
            None => return,
        };

        if framed.send(job.message).await.is_err() {
            state.jobs.fail_all(job.job_id, "failed to send job to worker connection".to_string());
            state.nodes.record_job_end(node_id);
            return;
        }

        let mut directory_id = job.directory_id;
        let completed = loop {
            match framed.next().await {
                Some(Ok(WorkerMessage::NewCacheEntry { entry })) => {
                    let did = state.directories.get(entry.result_type).insert(
                        entry.cache_ref.key.fingerprint.clone(),
                        entry.cache_ref.clone(),
                        entry.bounds.clone(),
                        entry.size_bytes,
                    );
                    directory_id = Some(did);
                }
                Some(Ok(WorkerMessage::QueryCache { request })) => {
                    let reply = probe_other_caches(&state, &request);
                    if framed.send(reply).await.is_err() {
                        state.jobs.fail_all(job.job_id, "connection closed mid cache probe".to_string());
                        state.nodes.record_job_end(node_id);
                        return;
                    }
                }
                Some(Ok(WorkerMessage::ResultReady)) => break true,
                Some(Ok(WorkerMessage::Error { message })) => {
                    state.jobs.fail_all(job.job_id, message);
                    break false;
                }
                Some(Ok(other)) => {
                    warn!(?other, "unexpected worker message while a job is processing");
                }
                Some(Err(e)) => {
                    warn!(error = %e, "worker frame error mid job");
                    state.jobs.fail_all(job.job_id, e.to_string());
                    state.nodes.record_job_end(node_id);
                    return;
                }
                None => {
                    state.jobs.fail_all(job.job_id, "worker connection closed mid job".to_string());
                    state.nodes.record_job_end(node_id);
                    return;
                }
            }
        };

        state.nodes.record_job_end(node_id);
        if !completed {
            continue;
        }

        let qty = state.jobs.waiter_count(job.job_id) as u32;
        if framed.send(WorkerMessage::DeliveryQty { qty }).await.is_err() {
            state.jobs.fail_all(job.job_id, "connection closed sending delivery qty".to_string());
            return;
        }

        for _ in 0..qty {
            match framed.next().await {
                Some(Ok(WorkerMessage::DeliveryReady { response })) => {
                    state.jobs.resolve_one(
                        job.job_id,
                        JobOutcome::Ready {
                            directory_id: directory_id.unwrap_or(DirectoryId(0)),
                            delivery_id: response.delivery_id,
                            node_host: response.host,
                            node_port: response.port,
                            node_id: response.node_id,
                        },
                    );
                }
                Some(Ok(WorkerMessage::Error { message })) => {
                    state.jobs.fail_all(job.job_id, message);
                    break;
                }
                Some(Ok(other)) => {
                    warn!(?other, "unexpected worker message while collecting delivery tickets");
                }
                Some(Err(e)) => {
                    state.jobs.fail_all(job.job_id, e.to_string());
                    return;
                }
                None => {
                    state.jobs.fail_all(job.job_id, "worker connection closed awaiting delivery tickets".to_string());
                    return;
                }
            }
        }
    }
}

/// A worker mid-compute asking whether another node already holds
/// something useful for the same fingerprint.
fn probe_other_caches(state: &IndexState, request: &BaseRequest) -> WorkerMessage {
    let dir = state.directories.get(request.result_type);
    match dir.coverage_query(&request.fingerprint, &request.query_rect) {
        Coverage::Hit(entry) => WorkerMessage::QueryHit { reference: entry.cache_ref },
        Coverage::Partial { contributing, remainder } => WorkerMessage::QueryPartial {
            request: PuzzleRequest {
                fingerprint: request.fingerprint.clone(),
                result_type: request.result_type,
                bbox: request.query_rect.clone(),
                refs: contributing.iter().map(|e| e.cache_ref.clone()).collect(),
                remainder,
                graph: request.graph.clone(),
            },
        },
        Coverage::Miss => WorkerMessage::QueryMiss,
    }
}
