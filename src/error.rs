//! Error types for the memory bank tool server
//!
//! Every failure a tool can produce maps to one variant here. The variant
//! determines the stable `kind` string reported to the calling model.

use thiserror::Error;

/// Main error type for memory bank operations
#[derive(Error, Debug)]
pub enum MemoryBankError {
    /// Required configuration is missing or malformed
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A tool was called before `initialize_memory_bank` succeeded
    #[error("Memory Bank not initialized. Call initialize_memory_bank first.")]
    NotInitialized,

    /// Scope is missing a user id or is otherwise malformed
    #[error("Invalid scope: {0}")]
    InvalidScope(String),

    /// Topic outside the managed topic enumeration
    #[error("Invalid memory topic: {0}")]
    InvalidTopic(String),

    /// Any other malformed argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Memory does not exist under the requested scope
    #[error("Memory not found: {0}")]
    MemoryNotFound(String),

    /// Backend could not be reached or refused our credentials
    #[error("Memory service unavailable: {0}")]
    BackendUnavailable(String),

    /// Backend answered with something we could not interpret
    #[error("Unexpected memory service response: {0}")]
    BackendProtocol(String),

    /// Generation job reached the FAILED state
    #[error("Memory generation failed: {0}")]
    GenerationFailed(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for memory bank operations
pub type Result<T> = std::result::Result<T, MemoryBankError>;

impl MemoryBankError {
    /// Stable machine-readable error kind
    pub fn kind(&self) -> &'static str {
        match self {
            MemoryBankError::Configuration(_) => "configuration_error",
            MemoryBankError::NotInitialized => "not_initialized",
            MemoryBankError::InvalidScope(_) => "invalid_scope",
            MemoryBankError::InvalidTopic(_) => "invalid_topic",
            MemoryBankError::InvalidArgument(_) => "invalid_argument",
            MemoryBankError::MemoryNotFound(_) => "memory_not_found",
            MemoryBankError::BackendUnavailable(_) => "backend_unavailable",
            MemoryBankError::BackendProtocol(_) => "backend_protocol_error",
            MemoryBankError::GenerationFailed(_) => "generation_failed",
            MemoryBankError::Io(_) => "io_error",
            MemoryBankError::Serialization(_) => "serialization_error",
        }
    }

    /// Whether the failure was caused by the caller rather than by
    /// backend or process state. Caller errors are never worth retrying.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            MemoryBankError::NotInitialized
                | MemoryBankError::InvalidScope(_)
                | MemoryBankError::InvalidTopic(_)
                | MemoryBankError::InvalidArgument(_)
        )
    }
}
