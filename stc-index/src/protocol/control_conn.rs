//! Control connection accept loop: one task per node,
//! handling registration, periodic stats, and reorg dispatch.
//!
//! A node's control connection carries exactly one reorg action at a
//! time. Extra plan items queue locally and go out one at a time
//! as each prior one is acknowledged.
//!
//! For a move, the description is sent to the *destination* node (the
//! `to_node` named in `ReorgAction::Move`): the destination is the one
//! that dials the source's delivery port with `CMD_MOVE_ITEM`, receives
//! the bytes, and reports back here with the new ref. Only once this
//! connection applies that ref to the directory and answers
//! `CMD_MOVE_OK` may the destination safely tell the source
//! `CMD_MOVE_DONE` on the delivery connection. For a remove, the
//! description goes to the node that owns the entry (`from_node`); it
//! deletes locally and reports `RESP_REORG_DONE`.

use crate::dispatch::IndexState;
use futures::{SinkExt, StreamExt};
use std::collections::VecDeque;
use std::sync::Arc;
use stc_wire::{ConnectionKind, ControlHandshake, ControlMessage, FrameCodec, ReorgDescription};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tracing::{info, warn};

pub async fn run(mut socket: TcpStream, state: Arc<IndexState>) {
    if let Err(e) = super::expect_magic(&mut socket, ConnectionKind::Control).await {
        warn!(error = %e, "control connection rejected at handshake");
        return;
    }

    let mut handshake = Framed::new(socket, FrameCodec::<ControlHandshake>::default());
    let hs = match handshake.next().await {
        Some(Ok(hs)) => hs,
        _ => {
            warn!("control connection closed before sending its handshake");
            return;
        }
    };
    let socket = handshake.into_inner();

    let (control_tx, mut control_rx) = mpsc::unbounded_channel::<ControlMessage>();
    let node_id = state.nodes.register(hs.host.clone(), hs.port, control_tx);
    info!(?node_id, host = %hs.host, port = hs.port, "node registered");
    state.nodes.broadcast_peers();

    let mut framed = Framed::new(socket, FrameCodec::<ControlMessage>::default());
    if framed.send(ControlMessage::Hello { node_id }).await.is_err() {
        state.nodes.deregister(node_id);
        return;
    }

    let mut awaiting: Option<ReorgDescription> = None;
    let mut pending: VecDeque<ReorgDescription> = VecDeque::new();

    loop {
        tokio::select! {
            outgoing = control_rx.recv() => {
                match outgoing {
                    Some(ControlMessage::Reorg { description }) => {
                        if awaiting.is_some() {
                            pending.push_back(description);
                        } else if framed.send(ControlMessage::Reorg { description: description.clone() }).await.is_ok() {
                            awaiting = Some(description);
                        } else {
                            break;
                        }
                    }
                    Some(other) => {
                        if framed.send(other).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            incoming = framed.next() => {
                match incoming {
                    Some(Ok(ControlMessage::ReorgItemMoved { result })) => {
                        let Some(desc) = awaiting.take() else {
                            warn!(?node_id, "reorg-item-moved with no pending reorg, ignoring");
                            continue;
                        };
                        state.directories.get(desc.result_type).move_entry(result.directory_id, result.new_ref);
                        if framed.send(ControlMessage::MoveOk).await.is_err() {
                            break;
                        }
                        dispatch_next(&mut framed, &mut awaiting, &mut pending).await;
                    }
                    Some(Ok(ControlMessage::ReorgDone)) => {
                        let Some(desc) = awaiting.take() else {
                            warn!(?node_id, "reorg-done with no pending reorg, ignoring");
                            continue;
                        };
                        state.directories.get(desc.result_type).remove(desc.directory_id);
                        if framed.send(ControlMessage::RemoveOk).await.is_err() {
                            break;
                        }
                        dispatch_next(&mut framed, &mut awaiting, &mut pending).await;
                    }
                    Some(Ok(ControlMessage::Stats { stats })) => {
                        state.nodes.apply_stats(node_id, stats);
                    }
                    Some(Ok(other)) => {
                        warn!(?node_id, ?other, "unexpected control message from node");
                    }
                    Some(Err(e)) => {
                        warn!(?node_id, error = %e, "control frame error");
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    state.nodes.deregister(node_id);
    state.nodes.broadcast_peers();
    info!(?node_id, "control connection closed, node deregistered");
}

async fn dispatch_next(
    framed: &mut Framed<TcpStream, FrameCodec<ControlMessage>>,
    awaiting: &mut Option<ReorgDescription>,
    pending: &mut VecDeque<ReorgDescription>,
) {
    if let Some(next) = pending.pop_front() {
        if framed.send(ControlMessage::Reorg { description: next.clone() }).await.is_ok() {
            *awaiting = Some(next);
        }
    }
}
