use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// A section that cannot be chunked. The builder records it and moves on.
    #[error("Malformed section #{index}: {reason}")]
    MalformedSection { index: usize, reason: String },

    /// The similarity store could not be reached. Never retried here.
    #[error("Index unavailable: {0}")]
    IndexUnavailable(String),

    #[error("Embedding failed: {0}")]
    Embedding(String),

    #[error("Operation failed: {0}")]
    Operation(String),
}

impl Error {
    pub fn is_unavailable(&self) -> bool { matches!(self, Error::IndexUnavailable(_)) }
}

pub type Result<T> = std::result::Result<T, Error>;
