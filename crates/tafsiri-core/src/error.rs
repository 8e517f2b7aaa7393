use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The requested direction is not registered.
    #[error("Unsupported language direction: {0}")]
    UnsupportedLanguage(String),
    /// A direction key was registered twice.
    #[error("Direction already registered: {0}")]
    DuplicateName(String),
    /// Checkpoint artifacts are missing or unreadable.
    #[error("Failed to load checkpoint: {0}")]
    ModelLoad(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Configuration error: {0}")]
    Config(String),
    /// A model-backend call failed outside the tuning boundary.
    #[error("Backend error: {0}")]
    Backend(String),
    #[error("Tensor error: {0}")]
    Tensor(#[from] candle_core::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
