//! Central error handling for the coloring pipeline
//!
//! Provides a unified CacheError enum with consistent categorization
//! across the cache, brush factory, and worker pool.

/// Centralized error type for all pipeline operations
#[derive(thiserror::Error, Debug)]
pub enum CacheError {
    /// The brush factory has no constructor registered for the URI.
    #[error("unknown brush: {0}")]
    UnknownBrush(String),

    /// A brush requires a schema field the tile does not carry.
    #[error("schema mismatch: missing field '{0}'")]
    SchemaMismatch(String),

    /// A coloring job died inside the worker pool.
    #[error("worker failed: {0}")]
    WorkerFailed(String),

    /// A queued recolor lost its tile before it could run.
    #[error("recolor aborted: tile '{0}' is gone")]
    QueueAborted(String),

    /// A brush URI did not match `scheme://name[?k=v(&k=v)*]`.
    #[error("invalid brush uri '{uri}': {reason}")]
    InvalidUri { uri: String, reason: String },

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CacheError {
    /// Convenience constructors for common error types
    pub fn unknown_brush<T: ToString>(uri: T) -> Self {
        CacheError::UnknownBrush(uri.to_string())
    }

    pub fn schema_mismatch<T: ToString>(field: T) -> Self {
        CacheError::SchemaMismatch(field.to_string())
    }

    pub fn worker<T: ToString>(reason: T) -> Self {
        CacheError::WorkerFailed(reason.to_string())
    }

    pub fn invalid_uri<U: ToString, R: ToString>(uri: U, reason: R) -> Self {
        CacheError::InvalidUri {
            uri: uri.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Result type alias for pipeline operations
pub type CacheResult<T> = Result<T, CacheError>;
