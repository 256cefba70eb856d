//! Wire-level connection protocol: magic numbers, command
//! codes, typed payloads, and length-prefixed framing shared by the
//! client, worker, control, and delivery connection state machines.

pub mod codec;
pub mod command;
pub mod error;
pub mod frame;
pub mod magic;
pub mod messages;
mod types_codec;

pub use codec::{WireDecode, WireEncode};
pub use error::{Result, WireError};
pub use frame::{encode_standalone, FrameCodec, MAX_FRAME_BYTES};
pub use magic::ConnectionKind;
pub use messages::{
    BaseRequest, ClientMessage, ControlHandshake, ControlMessage, DeliveryMessage, DeliveryRequest,
    DeliveryResponse, MovedPayload, NodeStats, PuzzleRequest, ReorgAction, ReorgDescription,
    ReorgResult, TypedNodeCacheKey, WorkerHandshake, WorkerMessage,
};
