//! External-collaborator boundary: everything the raster/feature
//! engine provides, modeled as traits so the core links against nothing
//! heavier than `stc-types` in tests and default binaries.

pub mod engine;
pub mod error;
pub mod mock;
pub mod payload;

pub use engine::{Codec, ComputeEngine, TypedOps};
pub use error::{OperatorError, Result};
pub use payload::Payload;
