//! C4 + C5: the index server. Holds one `IndexDirectory` per result type,
//! the node registry, the in-flight job/de-duplication registry, and the
//! reorganisation controller; runs the client/worker/control accept loops
//! that drive them.

pub mod directory;
pub mod dispatch;
pub mod error;
pub mod node_table;
pub mod protocol;
pub mod query_manager;
pub mod reorg;
pub mod server;

pub use directory::{DirectoryEntry, DirectorySet, IndexDirectory};
pub use dispatch::{dispatch_get, IndexState};
pub use error::{IndexError, Result};
pub use node_table::{EwmaLoad, NodeTable, WorkerJob};
pub use query_manager::{JobOutcome, QueryManager};
pub use reorg::ReorgController;
pub use server::{run, ServerHandles};
