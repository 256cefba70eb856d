//! The three TCP accept loops the index runs: client, worker,
//! and control. Delivery is a node-side concern only — the index never
//! holds payload bytes, so it never accepts delivery connections (see
//! [`crate::server`]).

pub mod client_conn;
pub mod control_conn;
pub mod worker_conn;

use stc_wire::ConnectionKind;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;

/// Read the four-byte connection-kind magic and confirm it matches what
/// this listener expects. Every accept loop calls this before
/// constructing a `Framed` reader for its own message type.
pub(crate) async fn expect_magic(socket: &mut TcpStream, expected: ConnectionKind) -> crate::error::Result<()> {
    let magic = socket.read_u32_le().await.map_err(|_| crate::error::IndexError::ConnectionClosed)?;
    let kind = ConnectionKind::from_magic(magic)?;
    if kind != expected {
        return Err(crate::error::IndexError::WorkerReported(format!(
            "expected {expected:?} connection, got {kind:?} magic"
        )));
    }
    Ok(())
}
