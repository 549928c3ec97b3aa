//! Crate Error Type
//!
//! Training has exactly one fatal numeric failure mode: a non-finite
//! gradient norm. Once the accumulated gradient contains a NaN or an
//! infinity, no parameter update can be trusted, so the training loop
//! aborts immediately and surfaces [`Error::NonFiniteGradient`]. There is
//! no retry path.
//!
//! Everything else that can fail is I/O (parameter dumps, corpus files,
//! config files) and wraps the underlying error.

use crate::Real;

/// Errors surfaced by training and persistence.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The global L2 gradient norm came out NaN or infinite. Fatal:
    /// training cannot proceed on a corrupted gradient.
    #[error("non-finite gradient norm: {norm}")]
    NonFiniteGradient { norm: Real },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Config (de)serialization failure.
    #[error("config: {0}")]
    Config(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
