use thiserror::Error;

#[derive(Debug, Error)]
pub enum OperatorError {
    #[error("operator graph execution failed: {0}")]
    Compute(String),

    #[error("payload encode failed: {0}")]
    Encode(String),

    #[error("payload decode failed: {0}")]
    Decode(String),

    #[error("result type {0:?} is not puzzleable, a miss forces full recompute")]
    NotPuzzleable(stc_types::ResultType),

    #[error("puzzle assembly failed: {0}")]
    Puzzle(String),
}

pub type Result<T> = std::result::Result<T, OperatorError>;
