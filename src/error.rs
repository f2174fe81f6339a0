//! Error types for the Floodgate pipeline.

use thiserror::Error;

/// Main error type for Floodgate operations.
#[derive(Error, Debug)]
pub enum FloodgateError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A stage was registered under a name that is already taken
    #[error("Stage already registered: {0}")]
    DuplicateStage(String),

    /// No stage with the given name exists in the pipeline
    #[error("Stage not found: {0}")]
    StageNotFound(String),

    /// An error returned by a downstream stage or the terminal handler
    #[error("Upstream handler error: {0}")]
    Upstream(#[from] anyhow::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Floodgate operations.
pub type Result<T> = std::result::Result<T, FloodgateError>;
