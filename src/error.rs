use std::path::PathBuf;
use thiserror::Error;

/// Main error type for misp-glue
#[derive(Error, Debug)]
pub enum GlueError {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration validation errors
    #[error("Configuration validation failed: {errors:?}")]
    ConfigValidation { errors: Vec<ValidationError> },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Invalid configuration value
    #[error("Invalid configuration value at {path}: {message}")]
    InvalidConfigValue { path: String, message: String },

    /// IO errors
    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    /// TOML deserialization errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),

    /// JSON errors
    #[error("JSON error: {context}: {source}")]
    Json {
        source: serde_json::Error,
        context: String,
    },

    /// HTTP transport errors (connect, timeout, body read)
    #[error("HTTP error: {context}: {source}")]
    Http {
        source: reqwest::Error,
        context: String,
    },

    /// Non-success HTTP status
    #[error("HTTP status {status}: {context}")]
    HttpStatus { status: u16, context: String },

    /// Response body did not have the expected shape
    #[error("Malformed response: {context}: {message}")]
    MalformedResponse { context: String, message: String },

    /// Feed transport errors
    #[error("Feed error: {context}: {source}")]
    Feed {
        source: zeromq::ZmqError,
        context: String,
    },

    /// Feed message could not be turned into an event
    #[error("Undecodable feed message: {0}")]
    FeedDecode(String),

    /// Intel platform refused the event update
    #[error("Event {event_id} update rejected: {message}")]
    SinkRejected { event_id: String, message: String },
}

impl GlueError {
    /// Whether this error came from the transport or payload rather than the module itself
    pub fn is_invocation_failure(&self) -> bool {
        matches!(
            self,
            GlueError::Http { .. }
                | GlueError::HttpStatus { .. }
                | GlueError::Json { .. }
                | GlueError::MalformedResponse { .. }
        )
    }
}

/// Configuration validation error
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// Path to the configuration key that failed validation
    pub path: String,
    /// Error message describing the validation failure
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result type for misp-glue operations
pub type Result<T> = std::result::Result<T, GlueError>;
