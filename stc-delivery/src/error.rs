use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("unknown delivery id {0}")]
    NotFound(u64),

    #[error("delivery {0} expired")]
    Expired(u64),
}

pub type Result<T> = std::result::Result<T, DeliveryError>;
