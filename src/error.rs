use thiserror::Error;

/// Main error type for the vigil supervisor
#[derive(Debug, Error)]
pub enum VigilError {
    // Launch errors
    #[error("Failed to launch process: {0}")]
    LaunchError(String),

    #[error("Executable not found: {0}")]
    ExecutableNotFound(String),

    #[error("Invalid working directory: {0}")]
    InvalidWorkingDirectory(String),

    // Application registry errors
    #[error("Application not found: {0}")]
    AppNotFound(String),

    #[error("Application already registered: {0}")]
    AppAlreadyExists(String),

    #[error("Failed to deliver signal: {0}")]
    SignalError(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid configuration file: {0}")]
    InvalidConfig(String),

    #[error("Missing required configuration field: {0}")]
    MissingConfigField(String),

    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    #[error("Invalid byte size: {0}")]
    InvalidByteSize(String),

    // Log sink errors
    #[error("Log sink error: {0}")]
    LogSinkError(String),

    // File watch errors
    #[error("Watch error: {0}")]
    WatchError(String),

    // IPC errors
    #[error("IPC error: {0}")]
    IpcError(String),

    #[error("Failed to connect to daemon: {0}")]
    ConnectionError(String),

    #[error("IPC protocol error: {0}")]
    ProtocolError(String),

    #[error("Daemon not running")]
    DaemonNotRunning,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    #[error("{0}")]
    Other(String),
}

impl VigilError {
    /// True for errors raised while resolving what to launch, before any spawn attempt.
    pub fn is_resolution_failure(&self) -> bool {
        matches!(
            self,
            VigilError::ExecutableNotFound(_) | VigilError::InvalidWorkingDirectory(_)
        )
    }

    /// True for errors caused by a malformed configuration record.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            VigilError::ConfigError(_)
                | VigilError::InvalidConfig(_)
                | VigilError::MissingConfigField(_)
                | VigilError::ConfigValidationError(_)
                | VigilError::InvalidByteSize(_)
        )
    }
}

/// Result type alias for vigil operations
pub type Result<T> = std::result::Result<T, VigilError>;
