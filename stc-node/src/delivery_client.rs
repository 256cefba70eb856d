//! Synchronous delivery-connection client: opens a short-lived
//! connection to a peer node's delivery port to pull a cached item
//! (`CMD_GET_CACHED_ITEM`) or drive a reorg move (`CMD_MOVE_ITEM` +
//! `CMD_MOVE_DONE`).
//!
//! Deliberately built on `std::net::TcpStream` rather than the tokio
//! codec stack used everywhere else: the call sites run inside
//! `spawn_blocking` on a worker thread and are meant to block that thread
//! until the bytes arrive, matching the synchronous `RemoteFetcher`
//! contract in `stc-node-cache`.

use bytes::{Buf, Bytes};
use stc_types::{Fingerprint, Node};
use stc_wire::{
    ConnectionKind, DeliveryMessage, MovedPayload, TypedNodeCacheKey, WireDecode, WireEncode,
};
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum DeliveryClientError {
    #[error("connect to {host}:{port} failed: {source}")]
    Connect { host: String, port: u16, source: io::Error },

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Wire(#[from] stc_wire::WireError),

    #[error("peer returned an error: {0}")]
    PeerError(String),

    #[error("peer sent an unexpected reply")]
    UnexpectedReply,
}

pub type Result<T> = std::result::Result<T, DeliveryClientError>;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

fn connect(peer: &Node) -> Result<TcpStream> {
    use std::net::ToSocketAddrs;
    let addr = format!("{}:{}", peer.host, peer.delivery_port);
    let first = addr
        .to_socket_addrs()
        .ok()
        .and_then(|mut it| it.next())
        .ok_or_else(|| DeliveryClientError::Connect {
            host: peer.host.clone(),
            port: peer.delivery_port,
            source: io::Error::new(io::ErrorKind::NotFound, "no addresses resolved"),
        })?;
    let stream = TcpStream::connect_timeout(&first, CONNECT_TIMEOUT)
        .map_err(|source| DeliveryClientError::Connect { host: peer.host.clone(), port: peer.delivery_port, source })?;
    stream.set_nodelay(true).ok();
    Ok(stream)
}

fn write_frame<T: WireEncode>(stream: &mut TcpStream, msg: &T) -> Result<()> {
    let framed = stc_wire::encode_standalone(msg);
    stream.write_all(&framed)?;
    Ok(())
}

fn read_frame<T: WireDecode>(stream: &mut TcpStream) -> Result<T> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf)?;
    let len = u32::from_le_bytes(len_buf) as usize;
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload)?;
    let mut bytes: Bytes = Bytes::from(payload);
    let value = T::decode(&mut bytes)?;
    if bytes.has_remaining() {
        // Trailing bytes after a fully-decoded frame indicate a codec
        // mismatch between peers; surface it rather than silently drop.
        return Err(DeliveryClientError::Wire(stc_wire::WireError::Truncated { needed: 0, had: bytes.remaining() }));
    }
    Ok(value)
}

fn decode_moved_payload(payload: Bytes) -> Result<MovedPayload> {
    let mut bytes = payload;
    Ok(MovedPayload::decode(&mut bytes)?)
}

/// `CMD_GET_CACHED_ITEM`: read a payload from a peer's cache
/// by key, without consuming a delivery ticket. Used by `RemoteFetcher`
/// to resolve a puzzle ref that lives on another node.
pub fn get_cached_item(
    peer: &Node,
    result_type: stc_types::ResultType,
    fingerprint: Fingerprint,
    entry_id: stc_types::EntryId,
) -> Result<MovedPayload> {
    let mut stream = connect(peer)?;
    stream.write_all(&ConnectionKind::Delivery.magic().to_le_bytes())?;
    write_frame(
        &mut stream,
        &DeliveryMessage::GetCachedItem {
            key: TypedNodeCacheKey { result_type, key: stc_types::NodeEntryKey { fingerprint, entry_id } },
        },
    )?;
    match read_frame::<DeliveryMessage>(&mut stream)? {
        DeliveryMessage::Ok { payload } => decode_moved_payload(payload),
        DeliveryMessage::Error { message } => Err(DeliveryClientError::PeerError(message)),
        _ => Err(DeliveryClientError::UnexpectedReply),
    }
}

/// An open move handle: holds the connection used to fetch the payload
/// open so `CMD_MOVE_DONE` can be sent on it once the index has
/// confirmed the directory update.
pub struct MoveHandle {
    stream: TcpStream,
}

impl MoveHandle {
    /// Tell the source it may now release the moved entry. Dropping a
    /// `MoveHandle` without calling this (e.g. because the index never
    /// confirmed the move) leaves the source holding its copy, which is
    /// the rollback behavior a failed move relies on.
    pub fn confirm(mut self) -> Result<()> {
        write_frame(&mut self.stream, &DeliveryMessage::MoveDone)
    }
}

/// `CMD_MOVE_ITEM`: pull a payload from the source for a
/// reorg move, leaving the connection open so the caller can later send
/// `CMD_MOVE_DONE` once the index has acknowledged the directory update.
pub fn move_item(
    peer: &Node,
    result_type: stc_types::ResultType,
    fingerprint: Fingerprint,
    entry_id: stc_types::EntryId,
) -> Result<(MovedPayload, MoveHandle)> {
    let mut stream = connect(peer)?;
    stream.write_all(&ConnectionKind::Delivery.magic().to_le_bytes())?;
    write_frame(
        &mut stream,
        &DeliveryMessage::MoveItem {
            key: TypedNodeCacheKey { result_type, key: stc_types::NodeEntryKey { fingerprint, entry_id } },
        },
    )?;
    let moved = match read_frame::<DeliveryMessage>(&mut stream)? {
        DeliveryMessage::Ok { payload } => decode_moved_payload(payload)?,
        DeliveryMessage::Error { message } => return Err(DeliveryClientError::PeerError(message)),
        _ => return Err(DeliveryClientError::UnexpectedReply),
    };
    Ok((moved, MoveHandle { stream }))
}
