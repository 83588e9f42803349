use thiserror::Error;

/// Core error types for portward
#[derive(Debug, Error)]
pub enum Error {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Input validation failed before any state was touched
    #[error("Invalid {field}: {message}")]
    InvalidArgument { field: String, message: String },

    /// The requested state change is already in effect
    #[error("{0}")]
    Conflict(String),

    /// No UPnP gateway device answered discovery, or the device refused us
    #[error("No UPnP gateway device found: {0}")]
    DeviceNotFound(String),

    /// An optional facility was asked to be torn down but was never set up
    #[error("{0}")]
    NotConfigured(String),

    /// A packet-filter command failed
    #[error("filter command failed: {message}")]
    Filter {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    /// Internal logic error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Shorthand for an [`Error::InvalidArgument`] with a named field.
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::InvalidArgument {
            field: field.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
