//! Control connection client: the node's half of
//! registration, stats reporting, peer-table updates, and reorg dispatch.
//!
//! One connection per node process. Reorg actions always name this node
//! as the side that acts (a `Move` description is only ever sent down the
//! destination's own control connection; a `Remove` description only ever
//! names this node as `from_node`), so the handler never has to branch on
//! "is this about me".

use crate::cache_set::NodeCacheSet;
use crate::delivery_client;
use crate::peers::PeerBook;
use futures::{SinkExt, StreamExt};
use stc_operator::Payload;
use stc_types::{CacheRef, NodeId};
use stc_wire::{
    ConnectionKind, ControlHandshake, ControlMessage, FrameCodec, NodeStats, ReorgAction,
    ReorgDescription, ReorgResult,
};
use std::io;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio_util::codec::Framed;
use tracing::{info, warn};

pub struct ControlContext {
    pub caches: Arc<NodeCacheSet>,
    pub peers: PeerBook,
    pub self_host: String,
    pub self_delivery_port: u16,
}

fn to_io<E: std::fmt::Display>(e: E) -> io::Error {
    io::Error::new(io::ErrorKind::Other, e.to_string())
}

/// Runs one control connection to completion: handshake, report the
/// assigned `NodeId` through `registered`, then loop handling inbound
/// control traffic until the connection drops. Returns once disconnected
/// so the caller can reconnect with backoff.
pub async fn run_session(
    index_host: &str,
    index_control_port: u16,
    ctx: &Arc<ControlContext>,
    registered: oneshot::Sender<NodeId>,
) -> io::Result<()> {
    let mut socket = TcpStream::connect((index_host, index_control_port)).await?;
    socket.write_all(&ConnectionKind::Control.magic().to_le_bytes()).await?;

    let mut handshake = Framed::new(socket, FrameCodec::<ControlHandshake>::default());
    handshake
        .send(ControlHandshake { host: ctx.self_host.clone(), port: ctx.self_delivery_port })
        .await
        .map_err(to_io)?;
    let socket = handshake.into_inner();

    let mut framed = Framed::new(socket, FrameCodec::<ControlMessage>::default());
    let node_id = match framed.next().await {
        Some(Ok(ControlMessage::Hello { node_id })) => node_id,
        Some(Ok(other)) => return Err(to_io(format!("expected CMD_HELLO, got {other:?}"))),
        Some(Err(e)) => return Err(to_io(e)),
        None => return Err(to_io("control connection closed before CMD_HELLO")),
    };
    info!(?node_id, "registered with index");
    let _ = registered.send(node_id);

    loop {
        match framed.next().await {
            Some(Ok(ControlMessage::Peers { nodes })) => {
                ctx.peers.update(nodes);
            }
            Some(Ok(ControlMessage::GetStats)) => {
                let stats = collect_stats(&ctx.caches);
                if framed.send(ControlMessage::Stats { stats }).await.is_err() {
                    return Ok(());
                }
            }
            Some(Ok(ControlMessage::Reorg { description })) => {
                if handle_reorg(&mut framed, ctx, node_id, description).await?.is_none() {
                    return Ok(());
                }
            }
            Some(Ok(other)) => warn!(?other, "unexpected control message, ignoring"),
            Some(Err(e)) => return Err(to_io(e)),
            None => return Ok(()),
        }
    }
}

fn collect_stats(caches: &NodeCacheSet) -> NodeStats {
    NodeStats {
        cpu_busy_ratio: 0.0,
        gpu_busy_ratio: 0.0,
        io_busy_ratio: 0.0,
        in_flight_jobs: 0,
        stored_bytes: caches.stored_bytes(),
        capacity_bytes: caches.capacity_bytes(),
    }
}

/// Acts on one reorg description, replying `ReorgItemMoved`/`ReorgDone`
/// and waiting for the index's `MoveOk`/`RemoveOk` acknowledgment before
/// returning. `Ok(Some(()))` means keep looping; `Ok(None)` means the
/// connection closed mid-reorg.
async fn handle_reorg(
    framed: &mut Framed<TcpStream, FrameCodec<ControlMessage>>,
    ctx: &Arc<ControlContext>,
    self_node_id: NodeId,
    description: ReorgDescription,
) -> io::Result<Option<()>> {
    match &description.action {
        ReorgAction::Move { to_node } => {
            let Some(source) = ctx.peers.get(description.from_node) else {
                warn!(from_node = ?description.from_node, "no known address for move source, dropping reorg");
                return Ok(Some(()));
            };
            let result_type = description.result_type;
            let fingerprint = description.fingerprint.clone();
            let entry_id = description.entry_id;
            let move_result =
                tokio::task::spawn_blocking(move || delivery_client::move_item(&source, result_type, fingerprint, entry_id))
                    .await
                    .expect("move_item task panicked");
            let (moved, handle) = match move_result {
                Ok(v) => v,
                Err(e) => {
                    warn!(error = %e, "move fetch from source failed, abandoning this reorg");
                    return Ok(Some(()));
                }
            };

            let cache = ctx.caches.get(result_type);
            let new_entry_id = match cache.put_local(
                description.fingerprint.clone(),
                Payload::new(result_type, moved.bounds, moved.bytes),
            ) {
                Ok(id) => id,
                Err(e) => {
                    warn!(error = %e, "local store refused the moved entry, abandoning this reorg");
                    return Ok(Some(()));
                }
            };

            let new_ref = CacheRef::new(*to_node, description.fingerprint.clone(), new_entry_id);
            let result = ReorgResult { new_ref, directory_id: description.directory_id };
            if framed.send(ControlMessage::ReorgItemMoved { result }).await.is_err() {
                return Ok(None);
            }

            match framed.next().await {
                Some(Ok(ControlMessage::MoveOk)) => {
                    if let Err(e) = tokio::task::spawn_blocking(move || handle.confirm()).await.expect("confirm task panicked")
                    {
                        warn!(error = %e, "failed to tell the source CMD_MOVE_DONE");
                    }
                    Ok(Some(()))
                }
                Some(Ok(other)) => {
                    warn!(?other, "expected CMD_MOVE_OK after a reorg-item-moved report");
                    Ok(Some(()))
                }
                Some(Err(e)) => Err(to_io(e)),
                None => Ok(None),
            }
        }
        ReorgAction::Remove => {
            debug_assert_eq!(description.from_node, self_node_id, "a remove description always names this node");
            let cache = ctx.caches.get(description.result_type);
            cache.remove_local(&description.fingerprint, description.entry_id);
            if framed.send(ControlMessage::ReorgDone).await.is_err() {
                return Ok(None);
            }
            match framed.next().await {
                Some(Ok(ControlMessage::RemoveOk)) => Ok(Some(())),
                Some(Ok(other)) => {
                    warn!(?other, "expected CMD_REMOVE_OK after a reorg-done report");
                    Ok(Some(()))
                }
                Some(Err(e)) => Err(to_io(e)),
                None => Ok(None),
            }
        }
    }
}
