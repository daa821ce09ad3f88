use std::time::Duration;
use thiserror::Error;

/// Main error type for the vigia supervisor
#[derive(Debug, Error)]
pub enum VigiaError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid configuration file: {0}")]
    InvalidConfig(String),

    #[error("Missing required configuration field: {0}")]
    MissingConfigField(String),

    #[error("Duplicate process name: {0}")]
    DuplicateName(String),

    // Process lifecycle errors
    #[error("Failed to launch process '{name}': {reason}")]
    LaunchError { name: String, reason: String },

    #[error("Failed to watch files for process '{name}': {reason}")]
    WatchError { name: String, reason: String },

    #[error("Process '{name}' did not exit within {timeout:?} of the stop signal")]
    ShutdownTimeout { name: String, timeout: Duration },

    #[error("Process not found: {0}")]
    ProcessNotFound(String),

    #[error("Supervisor is in invalid state for this operation: {0}")]
    InvalidState(String),

    // System errors
    #[error("Signal error: {0}")]
    SignalError(String),

    #[error("PID file error: {0}")]
    PidFileError(String),

    // IO errors (automatically converted from std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl VigiaError {
    /// Whether this error was raised while loading or validating configuration
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            VigiaError::ConfigError(_)
                | VigiaError::InvalidConfig(_)
                | VigiaError::MissingConfigField(_)
                | VigiaError::DuplicateName(_)
        )
    }
}

/// Result type alias for vigia operations
pub type Result<T> = std::result::Result<T, VigiaError>;
