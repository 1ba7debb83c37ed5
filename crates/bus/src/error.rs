use thiserror::Error;

/// Errors from either bus layer or the key/value seam.
#[derive(Error, Debug)]
pub enum BusError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("publish error: {0}")]
    Publish(String),

    #[error("subscribe error: {0}")]
    Subscribe(String),

    #[error("store error: {0}")]
    Store(String),
}

pub type BusResult<T> = Result<T, BusError>;
