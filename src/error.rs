//! Custom error types for stacks

use thiserror::Error;

/// Main error type for stacks operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid config: {0}")]
    Config(String),

    /// An embedding or generation provider cannot be used as configured
    #[error("Provider not configured: {0}")]
    Configuration(String),

    #[error("Retrieval error: {message}")]
    Retrieval {
        message: String,
        /// True when the failure comes from provider setup rather than the index itself
        setup_required: bool,
    },

    #[error("Task error: {0}")]
    Task(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Unknown task type: {0}")]
    UnknownTaskType(String),

    #[error("Task already running: {0}")]
    TaskAlreadyRunning(String),

    #[error("Task {0} was cancelled")]
    TaskCancelled(String),

    /// Work stopped after observing a cancellation token
    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Qdrant error: {0}")]
    Qdrant(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Not initialized: run 'stacks init' first")]
    NotInitialized,

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Build a retrieval error that does not need provider setup
    pub fn retrieval(message: impl Into<String>) -> Self {
        Error::Retrieval {
            message: message.into(),
            setup_required: false,
        }
    }

    /// Provider failures reach indexing and retrieval callers as retrieval errors
    pub fn surface_for_retrieval(self) -> Self {
        match self {
            Error::Configuration(message) => Error::Retrieval {
                message,
                setup_required: true,
            },
            other => other,
        }
    }

    /// Whether this error should trigger a soft fallback instead of failing
    pub fn is_configuration(&self) -> bool {
        matches!(self, Error::Configuration(_))
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Other(format!("{:#}", err))
    }
}

/// Result type alias for stacks
pub type Result<T> = std::result::Result<T, Error>;

/// Convert qdrant errors
impl From<qdrant_client::QdrantError> for Error {
    fn from(err: qdrant_client::QdrantError) -> Self {
        Error::Qdrant(err.to_string())
    }
}
