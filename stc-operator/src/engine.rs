use crate::error::{OperatorError, Result};
use crate::payload::Payload;
use stc_types::{CacheCube, Cube3, OperatorGraph, QueryCube, ResultType};

/// "Execute operator graph over query rectangle". Implementations
/// run on worker threads (`spawn_blocking`); the trait is deliberately
/// synchronous, since blocking is confined to worker threads.
pub trait ComputeEngine: Send + Sync {
    fn compute(&self, graph: &OperatorGraph, bounds: &CacheCube, query: &QueryCube) -> Result<Payload>;
}

/// Serialiser/deserialiser for one result type's payload bytes.
pub trait Codec: Send + Sync {
    fn encode(&self, payload: &Payload) -> Result<bytes::Bytes>;
    fn decode(&self, result_type: ResultType, bounds: CacheCube, bytes: bytes::Bytes) -> Result<Payload>;
}

/// Type-specific operations: `do_puzzle`, `read_item`,
/// `compute_item`, one implementation per `ResultType`.
pub trait TypedOps: Send + Sync {
    fn result_type(&self) -> ResultType;

    /// Assemble a single payload from contributing parts plus freshly
    /// computed remainder parts, all already clipped to their own
    /// sub-cubes. Raster stitches by pixel blit; feature types concatenate
    /// and unify attributes; `Plot` is never puzzled.
    fn do_puzzle(&self, bbox: Cube3, parts: Vec<Payload>) -> Result<Payload>;

    fn read_item(&self, bytes: bytes::Bytes, bounds: CacheCube) -> Result<Payload> {
        let _ = (bytes, bounds);
        Err(OperatorError::Decode("read_item not overridden".into()))
    }

    fn compute_item(&self, engine: &dyn ComputeEngine, graph: &OperatorGraph, bounds: &CacheCube, query: &QueryCube) -> Result<Payload> {
        engine.compute(graph, bounds, query)
    }

    /// Estimate the encoded size of a result over `bounds`, used by the
    /// caching-strategy predicate to weigh compute cost against cache cost.
    fn estimate_bytes(&self, bounds: &Cube3) -> u64;
}
