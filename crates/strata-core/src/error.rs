use thiserror::Error;

/// Unified error type for layer discovery and feature retrieval
#[derive(Error, Debug)]
pub enum DataError {
    /// Connection failed after exhausting retries
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Schema/introspection error
    #[error("Schema error: {0}")]
    SchemaError(String),

    /// Invalid per-source configuration (timezone, filter lists, ...)
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Overlay metadata references a column the schema does not have
    #[error("Overlay reference error: {0}")]
    OverlayReference(String),

    /// Overlay schema migration failed
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Layer or feature not found; a normal outcome, never logged as an error
    #[error("Not found: {0}")]
    NotFound(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DataError {
    /// Create a "not found" error with custom message
    pub fn not_found(msg: impl Into<String>) -> Self {
        DataError::NotFound(msg.into())
    }

    /// Create an invalid configuration error
    pub fn invalid_configuration(msg: impl Into<String>) -> Self {
        DataError::InvalidConfiguration(msg.into())
    }

    /// Create a schema error
    pub fn schema(msg: impl Into<String>) -> Self {
        DataError::SchemaError(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, DataError>;
