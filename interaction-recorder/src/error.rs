use thiserror::Error;

/// Errors surfaced by the interaction recorder.
///
/// None of these are allowed to escape an event handler: the capture path logs them
/// and falls back to a best-effort default.
#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("Locator unavailable: {0}")]
    LocatorUnavailable(String),

    #[error("Channel unavailable: {0}")]
    ChannelUnavailable(String),

    #[error("Persistence failure: {0}")]
    PersistenceFailure(String),

    #[error("Invalid operation log: {0}")]
    InvalidLog(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Initialization error: {0}")]
    InitializationError(String),
}

pub type Result<T> = std::result::Result<T, RecorderError>;
