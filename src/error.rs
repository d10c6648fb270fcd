use thiserror::Error;

/// Everything that can go wrong building, querying, saving or loading an
/// [`crate::index::HnswIndex`].
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt index: {0}")]
    CorruptIndex(String),

    #[error("index not initialized: call build() or load() first")]
    NotInitialized,

    #[error("object could not be parsed: {0}")]
    InvalidObject(String),
}

pub type Result<T> = std::result::Result<T, Error>;
