//! Client library for the distributed spatio-temporal result cache: the
//! two short-lived connections an application makes to read a result —
//! `CMD_GET` against the index's client port, then a pull against the
//! delivery port the returned ticket names.
//!
//! This crate deliberately knows nothing about operator graphs or
//! payload formats beyond what `stc-wire`'s `BaseRequest` already
//! carries — decoding the returned bytes into a concrete raster/feature
//! type is an application concern.

pub mod delivery;
pub mod error;
pub mod index;

pub use error::{ClientError, Result};
pub use index::IndexAddr;

use bytes::Bytes;
use stc_wire::BaseRequest;

/// Run a full client round trip: ask the index for `request`, then pull
/// the bytes the returned ticket names. Most callers want this; `index::get`
/// and `delivery::fetch` are exposed separately for callers that need to
/// hold the ticket (e.g. to retry the pull, or to fetch the same ticket
/// for more than one waiting consumer).
pub async fn query(addr: &IndexAddr, request: BaseRequest) -> Result<Bytes> {
    let ticket = index::get(addr, request).await?;
    delivery::fetch(&ticket).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{SinkExt, StreamExt};
    use stc_types::{Fingerprint, OperatorGraph, ProjectionId, QueryCube, ResultType, TimeType};
    use stc_wire::{ClientMessage, ConnectionKind, DeliveryMessage, DeliveryResponse, FrameCodec};
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;
    use tokio_util::codec::Framed;

    fn sample_request() -> BaseRequest {
        BaseRequest {
            result_type: ResultType::Raster,
            fingerprint: Fingerprint("f".into()),
            query_rect: QueryCube::new(ProjectionId(3857), TimeType::Calendar, 0.0, 1.0, 0.0, 1.0, 0, 1, None)
                .unwrap(),
            graph: OperatorGraph::leaf("source"),
        }
    }

    #[tokio::test]
    async fn get_returns_ticket_on_resp_ok() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let magic = socket.read_u32_le().await.unwrap();
            assert_eq!(magic, ConnectionKind::Client.magic());
            let mut framed = Framed::new(socket, FrameCodec::<ClientMessage>::default());
            match framed.next().await.unwrap().unwrap() {
                ClientMessage::Get { .. } => {}
                other => panic!("unexpected {other:?}"),
            }
            framed
                .send(ClientMessage::Ok {
                    response: DeliveryResponse { node_id: stc_types::NodeId(1), host: "127.0.0.1".into(), port: 9, delivery_id: 42 },
                })
                .await
                .unwrap();
        });

        let ticket = index::get(&IndexAddr::new("127.0.0.1", addr.port()), sample_request()).await.unwrap();
        assert_eq!(ticket.delivery_id, 42);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn get_surfaces_resp_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.read_u32_le().await.unwrap();
            let mut framed = Framed::new(socket, FrameCodec::<ClientMessage>::default());
            framed.next().await.unwrap().unwrap();
            framed.send(ClientMessage::Error { message: "no nodes available".into() }).await.unwrap();
        });

        let err = index::get(&IndexAddr::new("127.0.0.1", addr.port()), sample_request()).await.unwrap_err();
        assert!(matches!(err, ClientError::IndexError(msg) if msg == "no nodes available"));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn fetch_returns_payload_bytes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let magic = socket.read_u32_le().await.unwrap();
            assert_eq!(magic, ConnectionKind::Delivery.magic());
            let mut framed = Framed::new(socket, FrameCodec::<DeliveryMessage>::default());
            match framed.next().await.unwrap().unwrap() {
                DeliveryMessage::Get { delivery_id } => assert_eq!(delivery_id, 7),
                other => panic!("unexpected {other:?}"),
            }
            framed.send(DeliveryMessage::Ok { payload: Bytes::from_static(b"raster-bytes") }).await.unwrap();
        });

        let ticket = DeliveryResponse { node_id: stc_types::NodeId(1), host: "127.0.0.1".into(), port: addr.port(), delivery_id: 7 };
        let bytes = delivery::fetch(&ticket).await.unwrap();
        assert_eq!(bytes, Bytes::from_static(b"raster-bytes"));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn fetch_surfaces_expired_ticket_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.read_u32_le().await.unwrap();
            let mut framed = Framed::new(socket, FrameCodec::<DeliveryMessage>::default());
            framed.next().await.unwrap().unwrap();
            framed.send(DeliveryMessage::Error { message: "delivery 7 expired".into() }).await.unwrap();
        });

        let ticket = DeliveryResponse { node_id: stc_types::NodeId(1), host: "127.0.0.1".into(), port: addr.port(), delivery_id: 7 };
        let err = delivery::fetch(&ticket).await.unwrap_err();
        assert!(matches!(err, ClientError::DeliveryError(msg) if msg.contains("expired")));
        server.await.unwrap();
    }
}
