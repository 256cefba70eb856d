//! Worker connection client: dials the index's worker
//! port, hands itself a `NodeId` via `WorkerHandshake`, then loops taking
//! one job at a time end to end, the way `stc-index`'s `worker_conn`
//! expects on the other side.
//!
//! A node runs `nodeserver.threads` of these concurrently.

use crate::cache_set::NodeCacheSet;
use crate::peers::PeerBook;
use crate::remote_fetch::NetworkFetcher;
use futures::{SinkExt, StreamExt};
use stc_delivery::DeliveryRegistry;
use stc_operator::Payload;
use stc_types::{CacheRef, Fingerprint, NodeCacheRef, NodeId};
use stc_wire::{ConnectionKind, DeliveryResponse, WorkerHandshake, WorkerMessage};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::{info, warn};

pub struct WorkerContext {
    pub self_node_id: NodeId,
    pub self_host: String,
    pub delivery_port: u16,
    pub caches: Arc<NodeCacheSet>,
    pub registry: Arc<DeliveryRegistry>,
    pub peers: PeerBook,
}

/// Runs one worker connection forever, reconnecting with a fixed backoff
/// whenever the link to the index drops.
pub async fn run_forever(index_host: String, index_worker_port: u16, reconnect: Duration, ctx: Arc<WorkerContext>) {
    loop {
        match connect_and_serve(&index_host, index_worker_port, &ctx).await {
            Ok(()) => info!("worker connection to index closed cleanly"),
            Err(e) => warn!(error = %e, "worker connection to index failed"),
        }
        tokio::time::sleep(reconnect).await;
    }
}

type WorkerFramed = Framed<TcpStream, stc_wire::FrameCodec<WorkerMessage>>;

async fn connect_and_serve(host: &str, port: u16, ctx: &Arc<WorkerContext>) -> std::io::Result<()> {
    let mut socket = TcpStream::connect((host, port)).await?;
    socket.write_all(&ConnectionKind::Worker.magic().to_le_bytes()).await?;

    let mut handshake = Framed::new(socket, stc_wire::FrameCodec::<WorkerHandshake>::default());
    handshake.send(WorkerHandshake { node_id: ctx.self_node_id }).await.map_err(to_io)?;
    let socket = handshake.into_inner();

    let mut framed: WorkerFramed = Framed::new(socket, stc_wire::FrameCodec::<WorkerMessage>::default());
    info!(node_id = ?ctx.self_node_id, "worker connection established with index");

    loop {
        let job = match framed.next().await {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => return Err(to_io(e)),
            None => return Ok(()),
        };

        let Some(payload) = run_job(&mut framed, ctx, job).await? else {
            continue;
        };

        let qty = match framed.next().await {
            Some(Ok(WorkerMessage::DeliveryQty { qty })) => qty,
            Some(Ok(other)) => {
                warn!(?other, "expected CMD_DELIVERY_QTY, got something else");
                continue;
            }
            Some(Err(e)) => return Err(to_io(e)),
            None => return Ok(()),
        };

        // Fan out `qty` distinct single-use tickets rather than one shared
        // countdown ticket: each client gets its own delivery_id against
        // the same payload.
        for _ in 0..qty {
            let delivery_id = ctx.registry.register(payload.clone(), 1).0;
            let response = DeliveryResponse {
                node_id: ctx.self_node_id,
                host: ctx.self_host.clone(),
                port: ctx.delivery_port,
                delivery_id,
            };
            if framed.send(WorkerMessage::DeliveryReady { response }).await.is_err() {
                return Ok(());
            }
        }
    }
}

fn to_io(e: stc_wire::WireError) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::Other, e)
}

/// Runs one job to completion (`ResultReady`/`Error` sent), returning the
/// payload to stage delivery tickets from, or `None` if the job failed or
/// the connection is being torn down.
async fn run_job(framed: &mut WorkerFramed, ctx: &Arc<WorkerContext>, job: WorkerMessage) -> std::io::Result<Option<Arc<Payload>>> {
    match job {
        WorkerMessage::Create { request } => {
            let caches = ctx.caches.clone();
            let fingerprint = request.fingerprint.clone();
            let result = tokio::task::spawn_blocking(move || {
                caches.get(request.result_type).compute_create(&request).map(|r| (r, request.result_type))
            })
            .await
            .expect("compute_create task panicked");
            finish(framed, ctx, fingerprint, result).await
        }
        WorkerMessage::Puzzle { request } => {
            let caches = ctx.caches.clone();
            let self_node_id = ctx.self_node_id;
            let fingerprint = request.fingerprint.clone();
            let result_type = request.result_type;
            let fetcher = NetworkFetcher::new(ctx.peers.clone(), result_type);
            let result = tokio::task::spawn_blocking(move || {
                caches
                    .get(result_type)
                    .process_puzzle(&request, self_node_id, &fetcher)
                    .map(|r| (r, result_type))
            })
            .await
            .expect("process_puzzle task panicked");
            finish(framed, ctx, fingerprint, result).await
        }
        WorkerMessage::Deliver { request } => {
            let cache = ctx.caches.get(request.result_type);
            match cache.get_ref(&request.key.fingerprint, request.key.entry_id) {
                Some(payload) => {
                    if framed.send(WorkerMessage::ResultReady).await.is_err() {
                        return Ok(None);
                    }
                    Ok(Some(payload))
                }
                None => {
                    let message = format!("{}/{:?} not found locally", request.key.fingerprint, request.key.entry_id);
                    let _ = framed.send(WorkerMessage::Error { message }).await;
                    Ok(None)
                }
            }
        }
        other => {
            warn!(?other, "index sent a message outside the job sequence, ignoring");
            Ok(None)
        }
    }
}

/// Shared tail of `Create`/`Puzzle`: announce a new cache entry if one was
/// minted, then send `ResultReady`/`Error`.
async fn finish(
    framed: &mut WorkerFramed,
    ctx: &Arc<WorkerContext>,
    fingerprint: Fingerprint,
    result: Result<((Payload, Option<stc_types::EntryId>), stc_types::ResultType), stc_node_cache::NodeCacheError>,
) -> std::io::Result<Option<Arc<Payload>>> {
    match result {
        Ok(((payload, Some(entry_id)), result_type)) => {
            let entry = NodeCacheRef {
                cache_ref: CacheRef::new(ctx.self_node_id, fingerprint, entry_id),
                result_type,
                bounds: payload.bounds.clone(),
                size_bytes: payload.byte_size(),
            };
            if framed.send(WorkerMessage::NewCacheEntry { entry }).await.is_err() {
                return Ok(None);
            }
            if framed.send(WorkerMessage::ResultReady).await.is_err() {
                return Ok(None);
            }
            Ok(Some(Arc::new(payload)))
        }
        Ok(((payload, None), _)) => {
            if framed.send(WorkerMessage::ResultReady).await.is_err() {
                return Ok(None);
            }
            Ok(Some(Arc::new(payload)))
        }
        Err(e) => {
            let _ = framed.send(WorkerMessage::Error { message: e.to_string() }).await;
            Ok(None)
        }
    }
}
