//! Error types for the advisory booking & escrow engine

use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Error, Debug)]
pub enum EngineError {

    // =============================
    // Core Taxonomy
    // =============================

    /// Missing or malformed input. The caller fixes the input; never
    /// retried automatically.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A referenced party, category, advisory or payment does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Schedule overlap, duplicate payment binding, or duplicate external
    /// transaction id. Distinct from validation so callers can offer a
    /// "pick another slot" flow.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// An operation requested on an entity not in a legal source state.
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    /// Storage or transport failure. The sweeper isolates these per item;
    /// interactive requests surface them without automatic retry.
    #[error("Internal error: {0}")]
    Internal(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("UUID parse error: {0}")]
    Uuid(#[from] uuid::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Short machine-readable kind, used by the HTTP adapter for
    /// deterministic status mapping.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "validation",
            EngineError::NotFound(_) => "not_found",
            EngineError::Conflict(_) => "conflict",
            EngineError::InvalidTransition(_) => "invalid_transition",
            EngineError::Internal(_) => "internal",
            EngineError::Serialization(_) | EngineError::Uuid(_) | EngineError::Io(_) => {
                "internal"
            }
        }
    }
}
