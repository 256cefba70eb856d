//! Typed payloads and per-connection-kind message enums.

use crate::codec::{WireDecode, WireEncode};
use crate::command::{client, control, delivery as deliv, worker};
use crate::error::{Result, WireError};
use bytes::{Bytes, BytesMut};
use stc_types::{
    CacheCube, CacheRef, Cube3, DirectoryId, Entry, Fingerprint, Node, NodeCacheRef, NodeEntryKey,
    NodeId, OperatorGraph, QueryCube, ResultType,
};

/// `BaseRequest{result_type, fingerprint, query_rect, graph}`.
/// The graph rides along from `CMD_GET` through to whichever of
/// `CMD_CREATE`/`CMD_PUZZLE` the index schedules, since a worker cannot
/// invoke the operator on a remainder sub-cube without it.
#[derive(Debug, Clone, PartialEq)]
pub struct BaseRequest {
    pub result_type: ResultType,
    pub fingerprint: Fingerprint,
    pub query_rect: QueryCube,
    pub graph: OperatorGraph,
}

impl WireEncode for BaseRequest {
    fn encode(&self, buf: &mut BytesMut) {
        self.result_type.encode(buf);
        self.fingerprint.encode(buf);
        self.query_rect.encode(buf);
        self.graph.encode(buf);
    }
}
impl WireDecode for BaseRequest {
    fn decode(buf: &mut Bytes) -> Result<Self> {
        Ok(BaseRequest {
            result_type: ResultType::decode(buf)?,
            fingerprint: Fingerprint::decode(buf)?,
            query_rect: QueryCube::decode(buf)?,
            graph: OperatorGraph::decode(buf)?,
        })
    }
}

/// `DeliveryResponse{node_id, host, port, delivery_id}`.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryResponse {
    pub node_id: NodeId,
    pub host: String,
    pub port: u16,
    pub delivery_id: u64,
}

impl WireEncode for DeliveryResponse {
    fn encode(&self, buf: &mut BytesMut) {
        self.node_id.encode(buf);
        self.host.encode(buf);
        self.port.encode(buf);
        self.delivery_id.encode(buf);
    }
}
impl WireDecode for DeliveryResponse {
    fn decode(buf: &mut Bytes) -> Result<Self> {
        Ok(DeliveryResponse {
            node_id: NodeId::decode(buf)?,
            host: String::decode(buf)?,
            port: u16::decode(buf)?,
            delivery_id: u64::decode(buf)?,
        })
    }
}

/// `DeliveryRequest{fingerprint, entry_id}`, plus the result type so the
/// worker knows which per-type `NodeCache` to look the key up in (a node
/// holds one cache per `ResultType` and entry ids are only unique within
/// one type's store).
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryRequest {
    pub result_type: ResultType,
    pub key: NodeEntryKey,
}

impl WireEncode for DeliveryRequest {
    fn encode(&self, buf: &mut BytesMut) {
        self.result_type.encode(buf);
        self.key.encode(buf);
    }
}
impl WireDecode for DeliveryRequest {
    fn decode(buf: &mut Bytes) -> Result<Self> {
        Ok(DeliveryRequest { result_type: ResultType::decode(buf)?, key: NodeEntryKey::decode(buf)? })
    }
}

/// Raw handshake frame a node sends immediately after the control magic,
/// before any `ControlMessage` traffic: `MAGIC + host + port`. The index
/// replies with `ControlMessage::Hello`.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlHandshake {
    pub host: String,
    pub port: u16,
}

impl WireEncode for ControlHandshake {
    fn encode(&self, buf: &mut BytesMut) {
        self.host.encode(buf);
        self.port.encode(buf);
    }
}
impl WireDecode for ControlHandshake {
    fn decode(buf: &mut Bytes) -> Result<Self> {
        Ok(ControlHandshake { host: String::decode(buf)?, port: u16::decode(buf)? })
    }
}

/// Raw handshake frame a worker connection sends immediately after the
/// worker magic, before any `WorkerMessage` traffic. Unlike the control
/// link, a node's worker threads dial in independently of the control
/// handshake, so each one must say which already-registered node it
/// belongs to before the index will hand it jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerHandshake {
    pub node_id: NodeId,
}

impl WireEncode for WorkerHandshake {
    fn encode(&self, buf: &mut BytesMut) {
        self.node_id.encode(buf);
    }
}
impl WireDecode for WorkerHandshake {
    fn decode(buf: &mut Bytes) -> Result<Self> {
        Ok(WorkerHandshake { node_id: NodeId::decode(buf)? })
    }
}

/// `PuzzleRequest{fingerprint, bbox, refs[], remainder[], graph}`.
#[derive(Debug, Clone, PartialEq)]
pub struct PuzzleRequest {
    pub fingerprint: Fingerprint,
    pub result_type: ResultType,
    pub bbox: QueryCube,
    pub refs: Vec<CacheRef>,
    pub remainder: Vec<Cube3>,
    pub graph: OperatorGraph,
}

impl WireEncode for PuzzleRequest {
    fn encode(&self, buf: &mut BytesMut) {
        self.fingerprint.encode(buf);
        self.result_type.encode(buf);
        self.bbox.encode(buf);
        self.refs.encode(buf);
        self.remainder.encode(buf);
        self.graph.encode(buf);
    }
}
impl WireDecode for PuzzleRequest {
    fn decode(buf: &mut Bytes) -> Result<Self> {
        Ok(PuzzleRequest {
            fingerprint: Fingerprint::decode(buf)?,
            result_type: ResultType::decode(buf)?,
            bbox: QueryCube::decode(buf)?,
            refs: Vec::<CacheRef>::decode(buf)?,
            remainder: Vec::<Cube3>::decode(buf)?,
            graph: OperatorGraph::decode(buf)?,
        })
    }
}

/// `TypedNodeCacheKey`: a result type plus the node-local key, used by
/// delivery commands that read the cache directly.
#[derive(Debug, Clone, PartialEq)]
pub struct TypedNodeCacheKey {
    pub result_type: ResultType,
    pub key: NodeEntryKey,
}

impl WireEncode for TypedNodeCacheKey {
    fn encode(&self, buf: &mut BytesMut) {
        self.result_type.encode(buf);
        self.key.encode(buf);
    }
}
impl WireDecode for TypedNodeCacheKey {
    fn decode(buf: &mut Bytes) -> Result<Self> {
        Ok(TypedNodeCacheKey { result_type: ResultType::decode(buf)?, key: NodeEntryKey::decode(buf)? })
    }
}

/// The move protocol's `CMD_MOVE_ITEM` reply: the raw
/// payload plus the bounds the source node stored it under, so the
/// destination can reinsert it locally without a second round trip to
/// ask what cube it covers. Carried inside `DeliveryMessage::Ok`'s opaque
/// `payload` field — the destination knows from its own connection state
/// that it asked for a move, not a plain `CMD_GET`, and decodes
/// accordingly.
#[derive(Debug, Clone, PartialEq)]
pub struct MovedPayload {
    pub bounds: CacheCube,
    pub bytes: Bytes,
}

impl WireEncode for MovedPayload {
    fn encode(&self, buf: &mut BytesMut) {
        self.bounds.encode(buf);
        self.bytes.encode(buf);
    }
}
impl WireDecode for MovedPayload {
    fn decode(buf: &mut Bytes) -> Result<Self> {
        Ok(MovedPayload { bounds: CacheCube::decode(buf)?, bytes: Bytes::decode(buf)? })
    }
}

/// One reorg action: a move or a remove.
#[derive(Debug, Clone, PartialEq)]
pub enum ReorgAction {
    Move { to_node: NodeId },
    Remove,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReorgDescription {
    pub action: ReorgAction,
    pub result_type: ResultType,
    pub from_node: NodeId,
    pub fingerprint: Fingerprint,
    pub entry_id: stc_types::EntryId,
    pub directory_id: DirectoryId,
}

impl WireEncode for ReorgDescription {
    fn encode(&self, buf: &mut BytesMut) {
        match &self.action {
            ReorgAction::Move { to_node } => {
                0u8.encode(buf);
                to_node.encode(buf);
            }
            ReorgAction::Remove => 1u8.encode(buf),
        }
        self.result_type.encode(buf);
        self.from_node.encode(buf);
        self.fingerprint.encode(buf);
        self.entry_id.encode(buf);
        self.directory_id.encode(buf);
    }
}
impl WireDecode for ReorgDescription {
    fn decode(buf: &mut Bytes) -> Result<Self> {
        let action = match u8::decode(buf)? {
            0 => ReorgAction::Move { to_node: NodeId::decode(buf)? },
            1 => ReorgAction::Remove,
            other => return Err(WireError::InvalidDiscriminant(other as u32, "ReorgAction")),
        };
        Ok(ReorgDescription {
            action,
            result_type: ResultType::decode(buf)?,
            from_node: NodeId::decode(buf)?,
            fingerprint: Fingerprint::decode(buf)?,
            entry_id: stc_types::EntryId::decode(buf)?,
            directory_id: DirectoryId::decode(buf)?,
        })
    }
}

/// `ReorgResult{new ref, directory_id}` reported by the destination node
/// after a successful move.
#[derive(Debug, Clone, PartialEq)]
pub struct ReorgResult {
    pub new_ref: CacheRef,
    pub directory_id: DirectoryId,
}

impl WireEncode for ReorgResult {
    fn encode(&self, buf: &mut BytesMut) {
        self.new_ref.encode(buf);
        self.directory_id.encode(buf);
    }
}
impl WireDecode for ReorgResult {
    fn decode(buf: &mut Bytes) -> Result<Self> {
        Ok(ReorgResult { new_ref: CacheRef::decode(buf)?, directory_id: DirectoryId::decode(buf)? })
    }
}

/// Light stats piggybacked on worker responses, or the fuller stats
/// returned from `CMD_GET_STATS`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeStats {
    pub cpu_busy_ratio: f64,
    pub gpu_busy_ratio: f64,
    pub io_busy_ratio: f64,
    pub in_flight_jobs: u32,
    pub stored_bytes: u64,
    pub capacity_bytes: u64,
}

impl WireEncode for NodeStats {
    fn encode(&self, buf: &mut BytesMut) {
        self.cpu_busy_ratio.encode(buf);
        self.gpu_busy_ratio.encode(buf);
        self.io_busy_ratio.encode(buf);
        self.in_flight_jobs.encode(buf);
        self.stored_bytes.encode(buf);
        self.capacity_bytes.encode(buf);
    }
}
impl WireDecode for NodeStats {
    fn decode(buf: &mut Bytes) -> Result<Self> {
        Ok(NodeStats {
            cpu_busy_ratio: f64::decode(buf)?,
            gpu_busy_ratio: f64::decode(buf)?,
            io_busy_ratio: f64::decode(buf)?,
            in_flight_jobs: u32::decode(buf)?,
            stored_bytes: u64::decode(buf)?,
            capacity_bytes: u64::decode(buf)?,
        })
    }
}

// ===========================================================================
// Per-connection-kind message enums.
// ===========================================================================

macro_rules! message_enum {
    (
        $name:ident,
        $( $variant:ident($code:path) $( ( $($field:ident : $ty:ty),+ ) )? ),+ $(,)?
    ) => {
        #[derive(Debug, Clone, PartialEq)]
        pub enum $name {
            $( $variant $( { $($field: $ty),+ } )? ),+
        }

        impl WireEncode for $name {
            fn encode(&self, buf: &mut BytesMut) {
                match self {
                    $(
                        #[allow(unused_variables)]
                        $name::$variant $( { $($field),+ } )? => {
                            $code.encode(buf);
                            $( $( $field.encode(buf); )+ )?
                        }
                    )+
                }
            }
        }

        impl WireDecode for $name {
            fn decode(buf: &mut Bytes) -> Result<Self> {
                let code = u8::decode(buf)?;
                match code {
                    $(
                        $code => Ok($name::$variant $( { $($field: WireDecode::decode(buf)?),+ } )?),
                    )+
                    other => Err(WireError::UnknownCommand(other)),
                }
            }
        }
    };
}

message_enum! {
    ClientMessage,
    Get(client::CMD_GET)(request: BaseRequest),
    Ok(client::RESP_OK)(response: DeliveryResponse),
    Error(client::RESP_ERROR)(message: String),
}

message_enum! {
    WorkerMessage,
    Create(worker::CMD_CREATE)(request: BaseRequest),
    Deliver(worker::CMD_DELIVER)(request: DeliveryRequest),
    Puzzle(worker::CMD_PUZZLE)(request: PuzzleRequest),
    QueryCache(worker::CMD_QUERY_CACHE)(request: BaseRequest),
    ResultReady(worker::RESP_RESULT_READY),
    DeliveryReady(worker::RESP_DELIVERY_READY)(response: DeliveryResponse),
    NewCacheEntry(worker::RESP_NEW_CACHE_ENTRY)(entry: NodeCacheRef),
    QueryHit(worker::RESP_QUERY_HIT)(reference: CacheRef),
    QueryMiss(worker::RESP_QUERY_MISS),
    QueryPartial(worker::RESP_QUERY_PARTIAL)(request: PuzzleRequest),
    DeliveryQty(worker::RESP_DELIVERY_QTY)(qty: u32),
    Error(worker::RESP_ERROR)(message: String),
}

message_enum! {
    ControlMessage,
    Reorg(control::CMD_REORG)(description: ReorgDescription),
    GetStats(control::CMD_GET_STATS),
    MoveOk(control::CMD_MOVE_OK),
    RemoveOk(control::CMD_REMOVE_OK),
    Hello(control::CMD_HELLO)(node_id: NodeId),
    ReorgItemMoved(control::RESP_REORG_ITEM_MOVED)(result: ReorgResult),
    ReorgDone(control::RESP_REORG_DONE),
    Stats(control::RESP_STATS)(stats: NodeStats),
    Peers(control::CMD_PEERS)(nodes: Vec<Node>),
}

message_enum! {
    DeliveryMessage,
    Get(deliv::CMD_GET)(delivery_id: u64),
    GetCachedItem(deliv::CMD_GET_CACHED_ITEM)(key: TypedNodeCacheKey),
    MoveItem(deliv::CMD_MOVE_ITEM)(key: TypedNodeCacheKey),
    MoveDone(deliv::CMD_MOVE_DONE),
    Ok(deliv::RESP_OK)(payload: Bytes),
    Error(deliv::RESP_ERROR)(message: String),
}

impl WireEncode for Bytes {
    fn encode(&self, buf: &mut BytesMut) {
        (self.len() as u64).encode(buf);
        buf.extend_from_slice(self);
    }
}
impl WireDecode for Bytes {
    fn decode(buf: &mut Bytes) -> Result<Self> {
        let len = u64::decode(buf)? as usize;
        if buf.len() < len {
            return Err(WireError::Truncated { needed: len, had: buf.len() });
        }
        Ok(buf.split_to(len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::round_trip_bytes;
    use stc_types::{EntryId, ProjectionId, TimeType};

    fn sample_request() -> BaseRequest {
        BaseRequest {
            result_type: ResultType::Raster,
            fingerprint: Fingerprint("f".into()),
            query_rect: QueryCube::new(ProjectionId(3857), TimeType::Calendar, 0.0, 1.0, 0.0, 1.0, 0, 1, None)
                .unwrap(),
            graph: stc_types::OperatorGraph::leaf("source"),
        }
    }

    #[test]
    fn client_message_round_trips() {
        let msg = ClientMessage::Get { request: sample_request() };
        let mut bytes = round_trip_bytes(&msg);
        assert_eq!(ClientMessage::decode(&mut bytes).unwrap(), msg);
    }

    #[test]
    fn worker_message_variants_round_trip() {
        for msg in [
            WorkerMessage::ResultReady,
            WorkerMessage::QueryMiss,
            WorkerMessage::DeliveryQty { qty: 2 },
            WorkerMessage::Error { message: "boom".into() },
        ] {
            let mut bytes = round_trip_bytes(&msg);
            assert_eq!(WorkerMessage::decode(&mut bytes).unwrap(), msg);
        }
    }

    #[test]
    fn reorg_description_round_trips() {
        let desc = ReorgDescription {
            action: ReorgAction::Move { to_node: NodeId(2) },
            result_type: ResultType::Raster,
            from_node: NodeId(1),
            fingerprint: Fingerprint("f".into()),
            entry_id: EntryId(7),
            directory_id: DirectoryId(99),
        };
        let msg = ControlMessage::Reorg { description: desc.clone() };
        let mut bytes = round_trip_bytes(&msg);
        assert_eq!(ControlMessage::decode(&mut bytes).unwrap(), ControlMessage::Reorg { description: desc });
    }

    #[test]
    fn puzzle_request_round_trips_with_graph() {
        let req = PuzzleRequest {
            fingerprint: Fingerprint("f".into()),
            result_type: ResultType::Polygons,
            bbox: QueryCube::new(ProjectionId(3857), TimeType::Calendar, 0.0, 1.0, 0.0, 1.0, 0, 1, None).unwrap(),
            refs: vec![CacheRef::new(NodeId(1), Fingerprint("f".into()), EntryId(3))],
            remainder: vec![Cube3 { x1: 0.0, x2: 1.0, y1: 0.0, y2: 1.0, t1: 0, t2: 1 }],
            graph: stc_types::OperatorGraph::leaf("union").with_source(stc_types::OperatorGraph::leaf("layer")),
        };
        let mut bytes = round_trip_bytes(&req);
        assert_eq!(PuzzleRequest::decode(&mut bytes).unwrap(), req);
    }

    #[test]
    fn delivery_request_round_trips_with_result_type() {
        let req = DeliveryRequest {
            result_type: ResultType::Raster,
            key: NodeEntryKey { fingerprint: Fingerprint("f".into()), entry_id: EntryId(3) },
        };
        let mut bytes = round_trip_bytes(&req);
        assert_eq!(DeliveryRequest::decode(&mut bytes).unwrap(), req);
    }

    #[test]
    fn moved_payload_round_trips() {
        let bounds = CacheCube::new(
            QueryCube::new(ProjectionId(3857), TimeType::Calendar, 0.0, 1.0, 0.0, 1.0, 0, 1, None).unwrap(),
            None,
        )
        .unwrap();
        let mp = MovedPayload { bounds, bytes: Bytes::from_static(b"abc") };
        let mut bytes = round_trip_bytes(&mp);
        assert_eq!(MovedPayload::decode(&mut bytes).unwrap(), mp);
    }

    #[test]
    fn worker_handshake_round_trips() {
        let hs = WorkerHandshake { node_id: NodeId(4) };
        let mut bytes = round_trip_bytes(&hs);
        assert_eq!(WorkerHandshake::decode(&mut bytes).unwrap(), hs);
    }

    #[test]
    fn peers_round_trips() {
        let msg = ControlMessage::Peers {
            nodes: vec![
                Node { id: NodeId(1), host: "10.0.0.1".into(), delivery_port: 7100 },
                Node { id: NodeId(2), host: "10.0.0.2".into(), delivery_port: 7100 },
            ],
        };
        let mut bytes = round_trip_bytes(&msg);
        assert_eq!(ControlMessage::decode(&mut bytes).unwrap(), msg);
    }

    #[test]
    fn control_handshake_round_trips() {
        let hs = ControlHandshake { host: "10.0.0.1".into(), port: 7100 };
        let mut bytes = round_trip_bytes(&hs);
        assert_eq!(ControlHandshake::decode(&mut bytes).unwrap(), hs);
    }

    #[test]
    fn unknown_command_is_an_error() {
        let mut buf = BytesMut::new();
        255u8.encode(&mut buf);
        let mut bytes = buf.freeze();
        assert!(matches!(ClientMessage::decode(&mut bytes), Err(WireError::UnknownCommand(255))));
    }
}
