//! Primitive wire encoding: fixed-width little-endian integers,
//! `u32 length + UTF-8 bytes` strings, `u64 count + elements` vectors,
//! one-byte booleans.

use crate::error::{Result, WireError};
use bytes::{Buf, BufMut, Bytes, BytesMut};

pub trait WireEncode {
    fn encode(&self, buf: &mut BytesMut);
}

pub trait WireDecode: Sized {
    fn decode(buf: &mut Bytes) -> Result<Self>;
}

fn need(buf: &Bytes, n: usize) -> Result<()> {
    if buf.remaining() < n {
        return Err(WireError::Truncated { needed: n, had: buf.remaining() });
    }
    Ok(())
}

macro_rules! impl_int {
    ($t:ty, $put:ident, $get:ident) => {
        impl WireEncode for $t {
            fn encode(&self, buf: &mut BytesMut) {
                buf.$put(*self);
            }
        }
        impl WireDecode for $t {
            fn decode(buf: &mut Bytes) -> Result<Self> {
                need(buf, std::mem::size_of::<$t>())?;
                Ok(buf.$get())
            }
        }
    };
}

impl_int!(u8, put_u8, get_u8);
impl_int!(u16, put_u16_le, get_u16_le);
impl_int!(u32, put_u32_le, get_u32_le);
impl_int!(u64, put_u64_le, get_u64_le);
impl_int!(i32, put_i32_le, get_i32_le);
impl_int!(i64, put_i64_le, get_i64_le);
impl_int!(f64, put_f64_le, get_f64_le);

impl WireEncode for bool {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(if *self { 1 } else { 0 });
    }
}

impl WireDecode for bool {
    fn decode(buf: &mut Bytes) -> Result<Self> {
        Ok(u8::decode(buf)? != 0)
    }
}

impl WireEncode for String {
    fn encode(&self, buf: &mut BytesMut) {
        (self.len() as u32).encode(buf);
        buf.put_slice(self.as_bytes());
    }
}

impl WireDecode for String {
    fn decode(buf: &mut Bytes) -> Result<Self> {
        let len = u32::decode(buf)? as usize;
        need(buf, len)?;
        let bytes = buf.copy_to_bytes(len);
        String::from_utf8(bytes.to_vec()).map_err(|_| WireError::InvalidUtf8)
    }
}

impl<T: WireEncode> WireEncode for Vec<T> {
    fn encode(&self, buf: &mut BytesMut) {
        (self.len() as u64).encode(buf);
        for item in self {
            item.encode(buf);
        }
    }
}

impl<T: WireDecode> WireDecode for Vec<T> {
    fn decode(buf: &mut Bytes) -> Result<Self> {
        let count = u64::decode(buf)? as usize;
        let mut out = Vec::with_capacity(count.min(1 << 20));
        for _ in 0..count {
            out.push(T::decode(buf)?);
        }
        Ok(out)
    }
}

impl<T: WireEncode> WireEncode for Option<T> {
    fn encode(&self, buf: &mut BytesMut) {
        match self {
            Some(v) => {
                true.encode(buf);
                v.encode(buf);
            }
            None => false.encode(buf),
        }
    }
}

impl<T: WireDecode> WireDecode for Option<T> {
    fn decode(buf: &mut Bytes) -> Result<Self> {
        if bool::decode(buf)? {
            Ok(Some(T::decode(buf)?))
        } else {
            Ok(None)
        }
    }
}

/// Round-trip an encodable/decodable value through a byte buffer. Used by
/// tests and by call sites that need the encoded size up front.
pub fn round_trip_bytes<T: WireEncode>(value: &T) -> Bytes {
    let mut buf = BytesMut::new();
    value.encode(&mut buf);
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitives_round_trip() {
        let mut buf = BytesMut::new();
        42u32.encode(&mut buf);
        true.encode(&mut buf);
        "hello".to_string().encode(&mut buf);
        vec![1u64, 2, 3].encode(&mut buf);

        let mut bytes = buf.freeze();
        assert_eq!(u32::decode(&mut bytes).unwrap(), 42);
        assert!(bool::decode(&mut bytes).unwrap());
        assert_eq!(String::decode(&mut bytes).unwrap(), "hello");
        assert_eq!(Vec::<u64>::decode(&mut bytes).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn truncated_buffer_is_an_error() {
        let buf = Bytes::from_static(&[0u8, 1]);
        let mut b = buf;
        assert!(u64::decode(&mut b).is_err());
    }
}
