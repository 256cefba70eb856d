//! Length-prefixed framing for [`crate::codec::WireEncode`]/`WireDecode`
//! messages, built on `tokio_util::codec` the way a transport crate
//! wraps `FramedRead`/`FramedWrite` around a hand-rolled parser.
//!
//! Frame shape on the wire: `u32 length` (of everything that follows) then
//! `length` bytes holding the command byte and its typed payload. Readers
//! tolerate partial reads by returning `Ok(None)` until a whole frame has
//! arrived.

use crate::codec::{WireDecode, WireEncode};
use crate::error::WireError;
use bytes::{Buf, Bytes, BytesMut};
use std::marker::PhantomData;
use tokio_util::codec::{Decoder, Encoder};

/// Generous ceiling so a corrupt length prefix can't make us buffer
/// unbounded memory before failing.
pub const MAX_FRAME_BYTES: u32 = 256 * 1024 * 1024;

pub struct FrameCodec<T> {
    _marker: PhantomData<T>,
}

impl<T> Default for FrameCodec<T> {
    fn default() -> Self {
        FrameCodec { _marker: PhantomData }
    }
}

impl<T: WireDecode> Decoder for FrameCodec<T> {
    type Item = T;
    type Error = WireError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<T>, WireError> {
        if src.len() < 4 {
            return Ok(None);
        }
        let len = u32::from_le_bytes(src[..4].try_into().unwrap());
        if len > MAX_FRAME_BYTES {
            return Err(WireError::FrameTooLarge(len));
        }
        let total = 4 + len as usize;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }
        src.advance(4);
        let frame = src.split_to(len as usize).freeze();
        let mut frame = frame;
        let value = T::decode(&mut frame)?;
        Ok(Some(value))
    }
}

impl<T: WireEncode> Encoder<T> for FrameCodec<T> {
    type Error = WireError;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<(), WireError> {
        let mut payload = BytesMut::new();
        item.encode(&mut payload);
        if payload.len() as u64 > MAX_FRAME_BYTES as u64 {
            return Err(WireError::FrameTooLarge(payload.len() as u32));
        }
        dst.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        dst.extend_from_slice(&payload);
        Ok(())
    }
}

/// Encode a value into a standalone length-prefixed frame, e.g. for
/// sending the four-byte magic + frame on first connect.
pub fn encode_standalone<T: WireEncode>(value: &T) -> Bytes {
    let mut payload = BytesMut::new();
    value.encode(&mut payload);
    let mut out = BytesMut::with_capacity(4 + payload.len());
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(&payload);
    out.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::ClientMessage;

    #[test]
    fn codec_buffers_partial_frames() {
        let mut codec = FrameCodec::<ClientMessage>::default();
        let full = encode_standalone(&ClientMessage::Error { message: "hi".into() });

        let mut buf = BytesMut::new();
        buf.extend_from_slice(&full[..full.len() - 1]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&full[full.len() - 1..]);
        let msg = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(msg, ClientMessage::Error { message: "hi".into() });
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let mut codec = FrameCodec::<ClientMessage>::default();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&(MAX_FRAME_BYTES + 1).to_le_bytes());
        assert!(matches!(codec.decode(&mut buf), Err(WireError::FrameTooLarge(_))));
    }
}
