//! The client half of the `CMD_GET` connection: dial the index's client port, send one `BaseRequest`,
//! read back a delivery ticket or an error. One connection carries at
//! most one in-flight request at a time (`IDLE -> AWAIT_RESPONSE ->
//! WRITING_RESPONSE -> IDLE` on the server side), so `IndexClient` opens
//! a fresh connection per call rather than holding one open, matching
//! how a short request/ack exchange is handled elsewhere in this
//! codebase rather than pooling connections.

use crate::error::{ClientError, Result};
use futures::{SinkExt, StreamExt};
use stc_wire::{BaseRequest, ClientMessage, ConnectionKind, DeliveryResponse, FrameCodec};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

/// Address of the index's client port.
#[derive(Debug, Clone)]
pub struct IndexAddr {
    pub host: String,
    pub port: u16,
}

impl IndexAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        IndexAddr { host: host.into(), port }
    }
}

/// Issue one `CMD_GET` and return the delivery ticket naming which node
/// to pull the result from.
pub async fn get(addr: &IndexAddr, request: BaseRequest) -> Result<DeliveryResponse> {
    let mut socket = TcpStream::connect((addr.host.as_str(), addr.port))
        .await
        .map_err(|source| ClientError::Connect { host: addr.host.clone(), port: addr.port, source })?;
    socket.set_nodelay(true).ok();
    socket.write_u32_le(ConnectionKind::Client.magic()).await?;

    let mut framed = Framed::new(socket, FrameCodec::<ClientMessage>::default());
    framed.send(ClientMessage::Get { request }).await?;

    match framed.next().await {
        Some(Ok(ClientMessage::Ok { response })) => Ok(response),
        Some(Ok(ClientMessage::Error { message })) => Err(ClientError::IndexError(message)),
        Some(Ok(other)) => {
            tracing::warn!(?other, "unexpected message on client connection");
            Err(ClientError::UnexpectedReply)
        }
        Some(Err(e)) => Err(e.into()),
        None => Err(ClientError::ConnectionClosed),
    }
}
