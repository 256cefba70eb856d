//! `WireEncode`/`WireDecode` impls for the shared data model
//! (`stc_types`). Kept in `stc-wire` rather than `stc-types` so the data
//! model itself stays free of any wire-format dependency.

use crate::codec::{WireDecode, WireEncode};
use crate::error::{Result, WireError};
use bytes::{Bytes, BytesMut};
use stc_types::{
    CacheCube, CacheRef, Cube3, DirectoryId, Entry, EntryId, Fingerprint, Micros, Node,
    NodeCacheRef, NodeEntryKey, NodeId, OperatorGraph, PixelResolution, ProjectionId, QueryCube,
    ResolutionDescriptor, ResultType, ScaleInterval, TimeType,
};

/// Operator graphs are arbitrary trees of params; wire-encoded as their
/// canonical JSON string rather than a bespoke recursive frame.
impl WireEncode for OperatorGraph {
    fn encode(&self, buf: &mut BytesMut) {
        let json = serde_json::to_string(self).expect("OperatorGraph always serializes");
        json.encode(buf);
    }
}
impl WireDecode for OperatorGraph {
    fn decode(buf: &mut Bytes) -> Result<Self> {
        let json = String::decode(buf)?;
        serde_json::from_str(&json).map_err(|_| WireError::InvalidGraphJson)
    }
}

impl WireEncode for Fingerprint {
    fn encode(&self, buf: &mut BytesMut) {
        self.0.encode(buf);
    }
}
impl WireDecode for Fingerprint {
    fn decode(buf: &mut Bytes) -> Result<Self> {
        Ok(Fingerprint(String::decode(buf)?))
    }
}

impl WireEncode for ProjectionId {
    fn encode(&self, buf: &mut BytesMut) {
        self.0.encode(buf);
    }
}
impl WireDecode for ProjectionId {
    fn decode(buf: &mut Bytes) -> Result<Self> {
        Ok(ProjectionId(u32::decode(buf)?))
    }
}

impl WireEncode for TimeType {
    fn encode(&self, buf: &mut BytesMut) {
        let tag: u8 = match self {
            TimeType::Calendar => 0,
            TimeType::Unreferenced => 1,
        };
        tag.encode(buf);
    }
}
impl WireDecode for TimeType {
    fn decode(buf: &mut Bytes) -> Result<Self> {
        match u8::decode(buf)? {
            0 => Ok(TimeType::Calendar),
            1 => Ok(TimeType::Unreferenced),
            other => Err(WireError::InvalidDiscriminant(other as u32, "TimeType")),
        }
    }
}

impl WireEncode for PixelResolution {
    fn encode(&self, buf: &mut BytesMut) {
        self.w.encode(buf);
        self.h.encode(buf);
    }
}
impl WireDecode for PixelResolution {
    fn decode(buf: &mut Bytes) -> Result<Self> {
        Ok(PixelResolution { w: u32::decode(buf)?, h: u32::decode(buf)? })
    }
}

impl WireEncode for Cube3 {
    fn encode(&self, buf: &mut BytesMut) {
        self.x1.encode(buf);
        self.x2.encode(buf);
        self.y1.encode(buf);
        self.y2.encode(buf);
        self.t1.encode(buf);
        self.t2.encode(buf);
    }
}
impl WireDecode for Cube3 {
    fn decode(buf: &mut Bytes) -> Result<Self> {
        Ok(Cube3 {
            x1: f64::decode(buf)?,
            x2: f64::decode(buf)?,
            y1: f64::decode(buf)?,
            y2: f64::decode(buf)?,
            t1: i64::decode(buf)?,
            t2: i64::decode(buf)?,
        })
    }
}

impl WireEncode for QueryCube {
    fn encode(&self, buf: &mut BytesMut) {
        self.projection.encode(buf);
        self.time_type.encode(buf);
        self.bounds.encode(buf);
        self.resolution.encode(buf);
    }
}
impl WireDecode for QueryCube {
    fn decode(buf: &mut Bytes) -> Result<Self> {
        Ok(QueryCube {
            projection: ProjectionId::decode(buf)?,
            time_type: TimeType::decode(buf)?,
            bounds: Cube3::decode(buf)?,
            resolution: Option::<PixelResolution>::decode(buf)?,
        })
    }
}

impl WireEncode for ScaleInterval {
    fn encode(&self, buf: &mut BytesMut) {
        self.min.encode(buf);
        self.max.encode(buf);
    }
}
impl WireDecode for ScaleInterval {
    fn decode(buf: &mut Bytes) -> Result<Self> {
        Ok(ScaleInterval { min: f64::decode(buf)?, max: f64::decode(buf)? })
    }
}

impl WireEncode for ResolutionDescriptor {
    fn encode(&self, buf: &mut BytesMut) {
        self.sx.encode(buf);
        self.sy.encode(buf);
        self.produced_sx.encode(buf);
        self.produced_sy.encode(buf);
    }
}
impl WireDecode for ResolutionDescriptor {
    fn decode(buf: &mut Bytes) -> Result<Self> {
        Ok(ResolutionDescriptor {
            sx: ScaleInterval::decode(buf)?,
            sy: ScaleInterval::decode(buf)?,
            produced_sx: f64::decode(buf)?,
            produced_sy: f64::decode(buf)?,
        })
    }
}

impl WireEncode for CacheCube {
    fn encode(&self, buf: &mut BytesMut) {
        self.query.encode(buf);
        self.resolution.encode(buf);
    }
}
impl WireDecode for CacheCube {
    fn decode(buf: &mut Bytes) -> Result<Self> {
        Ok(CacheCube {
            query: QueryCube::decode(buf)?,
            resolution: Option::<ResolutionDescriptor>::decode(buf)?,
        })
    }
}

impl WireEncode for ResultType {
    fn encode(&self, buf: &mut BytesMut) {
        let tag: u8 = match self {
            ResultType::Raster => 0,
            ResultType::Points => 1,
            ResultType::Lines => 2,
            ResultType::Polygons => 3,
            ResultType::Plot => 4,
        };
        tag.encode(buf);
    }
}
impl WireDecode for ResultType {
    fn decode(buf: &mut Bytes) -> Result<Self> {
        match u8::decode(buf)? {
            0 => Ok(ResultType::Raster),
            1 => Ok(ResultType::Points),
            2 => Ok(ResultType::Lines),
            3 => Ok(ResultType::Polygons),
            4 => Ok(ResultType::Plot),
            other => Err(WireError::InvalidDiscriminant(other as u32, "ResultType")),
        }
    }
}

impl WireEncode for NodeId {
    fn encode(&self, buf: &mut BytesMut) {
        self.0.encode(buf);
    }
}
impl WireDecode for NodeId {
    fn decode(buf: &mut Bytes) -> Result<Self> {
        Ok(NodeId(u32::decode(buf)?))
    }
}

impl WireEncode for EntryId {
    fn encode(&self, buf: &mut BytesMut) {
        self.0.encode(buf);
    }
}
impl WireDecode for EntryId {
    fn decode(buf: &mut Bytes) -> Result<Self> {
        Ok(EntryId(u64::decode(buf)?))
    }
}

impl WireEncode for DirectoryId {
    fn encode(&self, buf: &mut BytesMut) {
        self.0.encode(buf);
    }
}
impl WireDecode for DirectoryId {
    fn decode(buf: &mut Bytes) -> Result<Self> {
        Ok(DirectoryId(u64::decode(buf)?))
    }
}

impl WireEncode for Micros {
    fn encode(&self, buf: &mut BytesMut) {
        self.0.encode(buf);
    }
}
impl WireDecode for Micros {
    fn decode(buf: &mut Bytes) -> Result<Self> {
        Ok(Micros(i64::decode(buf)?))
    }
}

impl WireEncode for NodeEntryKey {
    fn encode(&self, buf: &mut BytesMut) {
        self.fingerprint.encode(buf);
        self.entry_id.encode(buf);
    }
}
impl WireDecode for NodeEntryKey {
    fn decode(buf: &mut Bytes) -> Result<Self> {
        Ok(NodeEntryKey { fingerprint: Fingerprint::decode(buf)?, entry_id: EntryId::decode(buf)? })
    }
}

impl WireEncode for CacheRef {
    fn encode(&self, buf: &mut BytesMut) {
        self.node_id.encode(buf);
        self.key.encode(buf);
    }
}
impl WireDecode for CacheRef {
    fn decode(buf: &mut Bytes) -> Result<Self> {
        Ok(CacheRef { node_id: NodeId::decode(buf)?, key: NodeEntryKey::decode(buf)? })
    }
}

impl WireEncode for NodeCacheRef {
    fn encode(&self, buf: &mut BytesMut) {
        self.cache_ref.encode(buf);
        self.result_type.encode(buf);
        self.bounds.encode(buf);
        self.size_bytes.encode(buf);
    }
}
impl WireDecode for NodeCacheRef {
    fn decode(buf: &mut Bytes) -> Result<Self> {
        Ok(NodeCacheRef {
            cache_ref: CacheRef::decode(buf)?,
            result_type: ResultType::decode(buf)?,
            bounds: CacheCube::decode(buf)?,
            size_bytes: u64::decode(buf)?,
        })
    }
}

impl WireEncode for Entry {
    fn encode(&self, buf: &mut BytesMut) {
        self.entry_id.encode(buf);
        self.bounds.encode(buf);
        self.size_bytes.encode(buf);
        self.last_access.encode(buf);
        self.access_count.encode(buf);
    }
}
impl WireDecode for Entry {
    fn decode(buf: &mut Bytes) -> Result<Self> {
        Ok(Entry {
            entry_id: EntryId::decode(buf)?,
            bounds: CacheCube::decode(buf)?,
            size_bytes: u64::decode(buf)?,
            last_access: Micros::decode(buf)?,
            access_count: u64::decode(buf)?,
        })
    }
}

impl WireEncode for Node {
    fn encode(&self, buf: &mut BytesMut) {
        self.id.encode(buf);
        self.host.encode(buf);
        self.delivery_port.encode(buf);
    }
}
impl WireDecode for Node {
    fn decode(buf: &mut Bytes) -> Result<Self> {
        Ok(Node { id: NodeId::decode(buf)?, host: String::decode(buf)?, delivery_port: u16::decode(buf)? })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::round_trip_bytes;
    use stc_types::{ProjectionId, TimeType};

    #[test]
    fn query_cube_round_trips() {
        let q = QueryCube::new(ProjectionId(3857), TimeType::Calendar, 0.0, 10.0, 0.0, 10.0, 0, 1, None)
            .unwrap();
        let mut bytes = round_trip_bytes(&q);
        let decoded = QueryCube::decode(&mut bytes).unwrap();
        assert_eq!(q, decoded);
    }

    #[test]
    fn node_cache_ref_round_trips() {
        let q = QueryCube::new(ProjectionId(3857), TimeType::Calendar, 0.0, 10.0, 0.0, 10.0, 0, 1, None)
            .unwrap();
        let cube = CacheCube::new(q, None).unwrap();
        let ncr = NodeCacheRef {
            cache_ref: CacheRef::new(NodeId(1), Fingerprint("f".into()), EntryId(7)),
            result_type: ResultType::Polygons,
            bounds: cube,
            size_bytes: 1024,
        };
        let mut bytes = round_trip_bytes(&ncr);
        assert_eq!(NodeCacheRef::decode(&mut bytes).unwrap(), ncr);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        fn arb_cube3() -> impl Strategy<Value = Cube3> {
            (-1000i64..1000, 1i64..100, -1000i64..1000, 1i64..100, -1000i64..1000, 1i64..100).prop_map(
                |(x1, dx, y1, dy, t1, dt)| Cube3 {
                    x1: x1 as f64,
                    x2: (x1 + dx) as f64,
                    y1: y1 as f64,
                    y2: (y1 + dy) as f64,
                    t1,
                    t2: t1 + dt,
                },
            )
        }

        fn arb_fingerprint() -> impl Strategy<Value = Fingerprint> {
            "[a-z0-9]{1,16}".prop_map(Fingerprint)
        }

        proptest! {
            #[test]
            fn cube3_round_trips(cube in arb_cube3()) {
                let mut bytes = round_trip_bytes(&cube);
                prop_assert_eq!(Cube3::decode(&mut bytes).unwrap(), cube);
            }

            #[test]
            fn fingerprint_round_trips(fp in arb_fingerprint()) {
                let mut bytes = round_trip_bytes(&fp);
                prop_assert_eq!(Fingerprint::decode(&mut bytes).unwrap(), fp);
            }

            #[test]
            fn u32_round_trips(v in any::<u32>()) {
                let mut bytes = round_trip_bytes(&v);
                prop_assert_eq!(u32::decode(&mut bytes).unwrap(), v);
            }
        }
    }
}
