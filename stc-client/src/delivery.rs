//! The client half of a delivery connection: dial the node named by a ticket and pull the
//! staged payload with `CMD_GET(delivery_id)`. Each pull consumes one
//! unit of the ticket's countdown; calling this more times
//! than `RESP_DELIVERY_QTY` promised for the ticket will fail once the
//! node erases it.

use crate::error::{ClientError, Result};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use stc_wire::{ConnectionKind, DeliveryMessage, DeliveryResponse, FrameCodec};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

/// Pull the payload bytes a ticket refers to from its owning node.
pub async fn fetch(ticket: &DeliveryResponse) -> Result<Bytes> {
    let mut socket = TcpStream::connect((ticket.host.as_str(), ticket.port))
        .await
        .map_err(|source| ClientError::Connect { host: ticket.host.clone(), port: ticket.port, source })?;
    socket.set_nodelay(true).ok();
    socket.write_u32_le(ConnectionKind::Delivery.magic()).await?;

    let mut framed = Framed::new(socket, FrameCodec::<DeliveryMessage>::default());
    framed.send(DeliveryMessage::Get { delivery_id: ticket.delivery_id }).await?;

    match framed.next().await {
        Some(Ok(DeliveryMessage::Ok { payload })) => Ok(payload),
        Some(Ok(DeliveryMessage::Error { message })) => Err(ClientError::DeliveryError(message)),
        Some(Ok(other)) => {
            tracing::warn!(?other, "unexpected message on delivery connection");
            Err(ClientError::UnexpectedReply)
        }
        Some(Err(e)) => Err(e.into()),
        None => Err(ClientError::ConnectionClosed),
    }
}
