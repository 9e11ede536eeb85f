//! Error types for noesis-core.

use thiserror::Error;

/// Result type alias using noesis-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur at component seams.
///
/// The decision surface (`decide`/`plan`) never returns these to callers;
/// failures there degrade into well-formed results with flags set. The
/// variants below are for transport, persistence, and configuration code.
#[derive(Error, Debug)]
pub enum Error {
    /// LLM API error
    #[error("LLM API error: {provider} - {message}")]
    LlmApi { provider: String, message: String },

    /// Timeout during operation
    #[error("Operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// Tool lookup failed
    #[error("Tool not registered: {0}")]
    ToolMissing(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// State snapshot I/O error
    #[error("State persistence error: {0}")]
    Persistence(#[from] std::io::Error),

    /// Snapshot schema mismatch
    #[error("Unsupported snapshot schema version {found} (expected {expected})")]
    SchemaVersion { found: u32, expected: u32 },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an LLM API error.
    pub fn llm_api(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::LlmApi {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}
