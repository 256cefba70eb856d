//! `CMD_GET` accept loop: one task per client
//! connection, each request dispatched independently so a slow puzzle
//! job for one client never blocks another client's request on the same
//! connection... other than the in-order nature of one TCP stream, which
//! matches a typical synchronous request/response client library.

use crate::dispatch::{dispatch_get, IndexState};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use stc_wire::{ClientMessage, ConnectionKind, FrameCodec};
use tokio::net::TcpStream;
use tracing::{info, warn};

pub async fn run(mut socket: TcpStream, state: Arc<IndexState>) {
    if let Err(e) = super::expect_magic(&mut socket, ConnectionKind::Client).await {
        warn!(error = %e, "client connection rejected at handshake");
        return;
    }
    let peer = socket.peer_addr().ok();
    info!(?peer, "client connected");

    let mut framed = tokio_util::codec::Framed::new(socket, FrameCodec::<ClientMessage>::default());
    loop {
        let msg = match framed.next().await {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => {
                warn!(error = %e, ?peer, "client frame error");
                return;
            }
            None => return,
        };

        let ClientMessage::Get { request } = msg else {
            let _ = framed.send(ClientMessage::Error { message: "expected CMD_GET".to_string() }).await;
            continue;
        };

        let reply = match dispatch_get(&state, request).await {
            Ok(reply) => reply,
            Err(e) => ClientMessage::Error { message: e.to_string() },
        };
        if framed.send(reply).await.is_err() {
            return;
        }
    }
}
