use thiserror::Error;

/// Protocol errors: bad magic, bad command, short read, decode
/// failure. Every variant here is a reason to close the offending
/// connection without retrying.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("unknown magic number 0x{0:08x}")]
    UnknownMagic(u32),

    #[error("unknown command code {0}")]
    UnknownCommand(u8),

    #[error("frame exceeds maximum size ({0} bytes)")]
    FrameTooLarge(u32),

    #[error("truncated frame: needed {needed} bytes, had {had}")]
    Truncated { needed: usize, had: usize },

    #[error("invalid UTF-8 in string field")]
    InvalidUtf8,

    #[error("malformed operator graph JSON")]
    InvalidGraphJson,

    #[error("invalid enum discriminant {0} for {1}")]
    InvalidDiscriminant(u32, &'static str),

    #[error(transparent)]
    Types(#[from] stc_types::TypesError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, WireError>;
