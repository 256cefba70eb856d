use thiserror::Error;

/// Errors raised while constructing or validating core data-model values.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypesError {
    #[error("query cube has x1 ({x1}) > x2 ({x2})")]
    InvalidXRange { x1: i64, x2: i64 },

    #[error("query cube has y1 ({y1}) > y2 ({y2})")]
    InvalidYRange { y1: i64, y2: i64 },

    #[error("query cube has t1 ({t1}) >= t2 ({t2}), time interval must be non-empty")]
    InvalidTimeRange { t1: i64, t2: i64 },

    #[error("raster query is missing a pixel resolution")]
    MissingResolution,

    #[error("resolution descriptor has empty scale interval on the {axis} axis")]
    EmptyScaleInterval { axis: &'static str },

    #[error("cache cube bounds are degenerate (zero-area or zero-duration)")]
    DegenerateCube,
}

pub type Result<T> = std::result::Result<T, TypesError>;
