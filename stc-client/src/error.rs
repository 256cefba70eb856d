use std::io;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("connect to {host}:{port} failed: {source}")]
    Connect { host: String, port: u16, source: io::Error },

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Wire(#[from] stc_wire::WireError),

    #[error("index reported an error: {0}")]
    IndexError(String),

    #[error("delivery reported an error: {0}")]
    DeliveryError(String),

    #[error("peer closed the connection before replying")]
    ConnectionClosed,

    #[error("peer sent an unexpected reply")]
    UnexpectedReply,
}

pub type Result<T> = std::result::Result<T, ClientError>;
