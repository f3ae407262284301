use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Failed to load library {path}: {message}")]
    DynamicLoad { path: String, message: String },

    #[error("Failed to find module base for {0}")]
    ModuleNotFound(String),

    #[error("Failed to enumerate loaded modules: {0}")]
    ModuleEnumeration(String),

    #[error("Invalid function pointer {address:#x}")]
    InvalidPointer { address: usize },

    #[error("Sign function not loaded")]
    NotLoaded,

    #[error("Sign function returned error code {code}")]
    SignFailure { code: i32 },

    #[error("Failed to allocate memory for {0}")]
    Allocation(&'static str),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Check if this error is a "file not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Io(e) if e.kind() == std::io::ErrorKind::NotFound)
    }

    /// Whether the error was caused by the caller's input rather than by the
    /// loaded module or the platform loader.
    pub fn is_invalid_input(&self) -> bool {
        matches!(self, Error::InvalidArgument(_))
    }
}
