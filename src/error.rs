use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReconError {
    /// Bad target, module list or settings; the scan never starts.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Module not found: {0}")]
    ModuleNotFound(String),

    /// One module failed to construct or set up; it is excluded from the scan.
    #[error("Module initialization failed: {module} - {message}")]
    ModuleInitError {
        module: String,
        message: String,
    },

    /// A fault while handling an event; stays local to the module.
    #[error("Module runtime error: {module} - {message}")]
    ModuleRuntimeError {
        module: String,
        message: String,
    },

    /// A fault inside the dispatch loop itself; fatal to the scan.
    #[error("Orchestration error: {0}")]
    OrchestrationError(String),

    #[error("Abort requested: {0}")]
    AbortRequested(String),

    #[error("Store error: {0}")]
    StoreError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("File error: {path:?} - {message}")]
    FileError {
        path: PathBuf,
        message: String,
    },

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unexpected error: {0}")]
    UnexpectedError(String),
}

impl ReconError {
    /// Shorthand for a runtime fault raised from inside a module.
    pub fn module(module: impl Into<String>, message: impl Into<String>) -> Self {
        ReconError::ModuleRuntimeError {
            module: module.into(),
            message: message.into(),
        }
    }
}

impl From<anyhow::Error> for ReconError {
    fn from(error: anyhow::Error) -> Self {
        ReconError::UnexpectedError(error.to_string())
    }
}

impl From<serde_json::Error> for ReconError {
    fn from(error: serde_json::Error) -> Self {
        ReconError::SerializationError(error.to_string())
    }
}

pub type ReconResult<T> = std::result::Result<T, ReconError>;
