//! In-memory reference collaborator, used by tests and by the node
//! binaries when no real geospatial engine is linked in.

use crate::engine::{Codec, ComputeEngine, TypedOps};
use crate::error::{OperatorError, Result};
use crate::payload::Payload;
use bytes::Bytes;
use stc_types::{CacheCube, Cube3, OperatorGraph, QueryCube, ResultType};

/// Produces a deterministic payload whose bytes encode the fingerprint and
/// query rectangle as JSON, just enough content to exercise caching and
/// delivery without a real raster/feature engine.
#[derive(Debug, Default)]
pub struct MockEngine;

impl ComputeEngine for MockEngine {
    fn compute(&self, graph: &OperatorGraph, bounds: &CacheCube, query: &QueryCube) -> Result<Payload> {
        let body = serde_json::json!({
            "op": graph.op_type,
            "query": {
                "x1": query.bounds.x1, "x2": query.bounds.x2,
                "y1": query.bounds.y1, "y2": query.bounds.y2,
                "t1": query.bounds.t1, "t2": query.bounds.t2,
            },
        });
        let bytes = serde_json::to_vec(&body).map_err(|e| OperatorError::Compute(e.to_string()))?;
        Ok(Payload::new(ResultType::Raster, bounds.clone(), Bytes::from(bytes)))
    }
}

#[derive(Debug, Default)]
pub struct MockCodec;

impl Codec for MockCodec {
    fn encode(&self, payload: &Payload) -> Result<Bytes> {
        Ok(payload.bytes.clone())
    }

    fn decode(&self, result_type: ResultType, bounds: CacheCube, bytes: Bytes) -> Result<Payload> {
        Ok(Payload::new(result_type, bounds, bytes))
    }
}

/// Shared mock puzzle behavior: concatenate part bytes with a length
/// prefix per part, good enough to prove assembly ran without a real
/// codec.
fn concat_parts(parts: &[Payload]) -> Bytes {
    let mut out = Vec::new();
    for p in parts {
        out.extend_from_slice(&(p.bytes.len() as u32).to_le_bytes());
        out.extend_from_slice(&p.bytes);
    }
    Bytes::from(out)
}

macro_rules! mock_typed_ops {
    ($name:ident, $result_type:expr) => {
        #[derive(Debug, Default)]
        pub struct $name;

        impl TypedOps for $name {
            fn result_type(&self) -> ResultType {
                $result_type
            }

            fn do_puzzle(&self, bbox: Cube3, parts: Vec<Payload>) -> Result<Payload> {
                if parts.is_empty() {
                    return Err(OperatorError::Puzzle("no parts to assemble".into()));
                }
                let q = QueryCube::new(
                    parts[0].bounds.query.projection,
                    parts[0].bounds.query.time_type,
                    bbox.x1, bbox.x2, bbox.y1, bbox.y2, bbox.t1, bbox.t2,
                    parts[0].bounds.query.resolution,
                )
                .map_err(|e| OperatorError::Puzzle(e.to_string()))?;
                let bounds = CacheCube::new(q, parts[0].bounds.resolution)
                    .map_err(|e| OperatorError::Puzzle(e.to_string()))?;
                Ok(Payload::new($result_type, bounds, concat_parts(&parts)))
            }

            fn estimate_bytes(&self, bounds: &Cube3) -> u64 {
                (bounds.area_volume().max(1.0) * 8.0) as u64
            }
        }
    };
}

mock_typed_ops!(MockRasterOps, ResultType::Raster);
mock_typed_ops!(MockPointsOps, ResultType::Points);
mock_typed_ops!(MockLinesOps, ResultType::Lines);
mock_typed_ops!(MockPolygonsOps, ResultType::Polygons);

/// Plots are never puzzled: a miss always forces a full
/// recompute, so `do_puzzle` is always an error.
#[derive(Debug, Default)]
pub struct MockPlotOps;

impl TypedOps for MockPlotOps {
    fn result_type(&self) -> ResultType {
        ResultType::Plot
    }

    fn do_puzzle(&self, _bbox: Cube3, _parts: Vec<Payload>) -> Result<Payload> {
        Err(OperatorError::NotPuzzleable(ResultType::Plot))
    }

    fn estimate_bytes(&self, bounds: &Cube3) -> u64 {
        (bounds.area_volume().max(1.0) * 4.0) as u64
    }
}

/// One `TypedOps` per result type, the per-variant table Design Note 9
/// calls for instead of five copy-pasted modules.
pub fn mock_typed_ops_table() -> Vec<Box<dyn TypedOps>> {
    vec![
        Box::new(MockRasterOps),
        Box::new(MockPointsOps),
        Box::new(MockLinesOps),
        Box::new(MockPolygonsOps),
        Box::new(MockPlotOps),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use stc_types::{ProjectionId, TimeType};

    fn qc() -> QueryCube {
        QueryCube::new(ProjectionId(3857), TimeType::Calendar, 0.0, 10.0, 0.0, 10.0, 0, 1, None).unwrap()
    }

    #[test]
    fn mock_engine_computes_deterministic_payload() {
        let engine = MockEngine;
        let graph = OperatorGraph::leaf("source");
        let bounds = CacheCube::new(qc(), None).unwrap();
        let a = engine.compute(&graph, &bounds, &qc()).unwrap();
        let b = engine.compute(&graph, &bounds, &qc()).unwrap();
        assert_eq!(a.bytes, b.bytes);
    }

    #[test]
    fn plot_do_puzzle_is_always_an_error() {
        let ops = MockPlotOps;
        let bounds = CacheCube::new(qc(), None).unwrap();
        let part = Payload::new(ResultType::Plot, bounds, Bytes::new());
        assert!(ops.do_puzzle(qc().bounds, vec![part]).is_err());
    }

    #[test]
    fn raster_do_puzzle_concatenates_parts() {
        let ops = MockRasterOps;
        let bounds = CacheCube::new(qc(), None).unwrap();
        let parts = vec![
            Payload::new(ResultType::Raster, bounds.clone(), Bytes::from_static(b"aa")),
            Payload::new(ResultType::Raster, bounds, Bytes::from_static(b"bbb")),
        ];
        let assembled = ops.do_puzzle(qc().bounds, parts).unwrap();
        assert_eq!(assembled.bytes.len(), 4 + 2 + 4 + 3);
    }
}
