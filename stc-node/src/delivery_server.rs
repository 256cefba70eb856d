//! Delivery connection accept loop: the node-side half of C6. Handles `CMD_GET` (pull a staged
//! ticket), `CMD_GET_CACHED_ITEM` (read straight from the cache, no
//! ticket consumed), and `CMD_MOVE_ITEM`/`CMD_MOVE_DONE` (the reorg move
//! protocol's source-side half).

use crate::cache_set::NodeCacheSet;
use bytes::BytesMut;
use futures::{SinkExt, StreamExt};
use stc_delivery::{DeliveryId, DeliveryRegistry};
use stc_wire::{ConnectionKind, DeliveryMessage, FrameCodec, MovedPayload, WireEncode};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;
use tracing::{info, warn};

pub async fn run(listener: TcpListener, caches: Arc<NodeCacheSet>, registry: Arc<DeliveryRegistry>) {
    loop {
        match listener.accept().await {
            Ok((socket, peer)) => {
                info!(%peer, "delivery connection accepted");
                let caches = caches.clone();
                let registry = registry.clone();
                tokio::spawn(async move { handle(socket, caches, registry).await });
            }
            Err(e) => warn!(error = %e, "delivery accept failed"),
        }
    }
}

async fn expect_delivery_magic(socket: &mut TcpStream) -> bool {
    match socket.read_u32_le().await {
        Ok(magic) => match ConnectionKind::from_magic(magic) {
            Ok(ConnectionKind::Delivery) => true,
            Ok(other) => {
                warn!(?other, "delivery listener got a non-delivery magic");
                false
            }
            Err(e) => {
                warn!(error = %e, "delivery listener got an unknown magic");
                false
            }
        },
        Err(_) => false,
    }
}

fn encode_moved(moved: &MovedPayload) -> bytes::Bytes {
    let mut buf = BytesMut::new();
    moved.encode(&mut buf);
    buf.freeze()
}

async fn handle(mut socket: TcpStream, caches: Arc<NodeCacheSet>, registry: Arc<DeliveryRegistry>) {
    if !expect_delivery_magic(&mut socket).await {
        return;
    }

    let mut framed = Framed::new(socket, FrameCodec::<DeliveryMessage>::default());

    loop {
        let msg = match framed.next().await {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => {
                warn!(error = %e, "delivery frame error");
                return;
            }
            None => return,
        };

        match msg {
            DeliveryMessage::Get { delivery_id } => {
                let reply = match registry.pull(DeliveryId(delivery_id)) {
                    Ok(payload) => DeliveryMessage::Ok { payload: payload.bytes.clone() },
                    Err(e) => DeliveryMessage::Error { message: e.to_string() },
                };
                if framed.send(reply).await.is_err() {
                    return;
                }
            }
            DeliveryMessage::GetCachedItem { key } => {
                let cache = caches.get(key.result_type);
                let reply = match cache.get_ref(&key.key.fingerprint, key.key.entry_id) {
                    Some(payload) => {
                        let moved = MovedPayload { bounds: payload.bounds.clone(), bytes: payload.bytes.clone() };
                        DeliveryMessage::Ok { payload: encode_moved(&moved) }
                    }
                    None => DeliveryMessage::Error {
                        message: format!("{}/{:?} not found locally", key.key.fingerprint, key.key.entry_id),
                    },
                };
                if framed.send(reply).await.is_err() {
                    return;
                }
            }
            DeliveryMessage::MoveItem { key } => {
                let cache = caches.get(key.result_type);
                let Some(payload) = cache.get_ref(&key.key.fingerprint, key.key.entry_id) else {
                    let reply = DeliveryMessage::Error {
                        message: format!("{}/{:?} not found locally", key.key.fingerprint, key.key.entry_id),
                    };
                    if framed.send(reply).await.is_err() {
                        return;
                    }
                    continue;
                };
                cache.pin(&key.key.fingerprint, key.key.entry_id);
                let moved = MovedPayload { bounds: payload.bounds.clone(), bytes: payload.bytes.clone() };
                if framed.send(DeliveryMessage::Ok { payload: encode_moved(&moved) }).await.is_err() {
                    cache.unpin(&key.key.fingerprint, key.key.entry_id);
                    return;
                }

                // Wait for CMD_MOVE_DONE before releasing the entry.
                // Any other outcome — a decode error, a
                // different message, or the peer closing the connection —
                // means the move did not complete; unpin and keep the
                // entry so the source stays the copy of record.
                match framed.next().await {
                    Some(Ok(DeliveryMessage::MoveDone)) => {
                        cache.remove_local(&key.key.fingerprint, key.key.entry_id);
                        info!(fingerprint = %key.key.fingerprint, entry_id = ?key.key.entry_id, "move confirmed, local copy released");
                    }
                    Some(Ok(other)) => {
                        warn!(?other, "expected CMD_MOVE_DONE, rolling back pin");
                        cache.unpin(&key.key.fingerprint, key.key.entry_id);
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "move connection errored before CMD_MOVE_DONE, rolling back pin");
                        cache.unpin(&key.key.fingerprint, key.key.entry_id);
                    }
                    None => {
                        warn!("move connection closed before CMD_MOVE_DONE, rolling back pin");
                        cache.unpin(&key.key.fingerprint, key.key.entry_id);
                    }
                }
                return;
            }
            DeliveryMessage::MoveDone => {
                warn!("CMD_MOVE_DONE with no preceding CMD_MOVE_ITEM on this connection, ignoring");
            }
            other @ (DeliveryMessage::Ok { .. } | DeliveryMessage::Error { .. }) => {
                warn!(?other, "unexpected outbound-only delivery message received");
            }
        }
    }
}
