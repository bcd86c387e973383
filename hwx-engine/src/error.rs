//! Error types for hwx-engine
//!
//! Domain outcomes (no match, blocked source, exhausted chain, missing
//! consensus) are typed values elsewhere in the crate. `EngineError` covers
//! infrastructure failures only: storage, configuration, serialization.

use thiserror::Error;

use crate::types::SpecFieldError;

/// Engine error type
#[derive(Debug, Error)]
pub enum EngineError {
    /// Catalog or cache storage failure
    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// Stored JSON could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid static configuration (duplicate priorities, bad templates)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Spec field violated its provenance invariant
    #[error(transparent)]
    SpecField(#[from] SpecFieldError),

    /// HTTP client could not be constructed
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// hwx-common error
    #[error("Common error: {0}")]
    Common(#[from] hwx_common::Error),
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
