use std::path::PathBuf;

use thiserror::Error;

/// Boxed error returned by event handlers
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Framing error: {0}")]
    Framing(String),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Remote error: {class}: {message}")]
    Remote { class: String, message: String },

    #[error("Connection lost")]
    ConnectionLost,

    #[error("Could not connect to {component} after {attempts} attempt(s): {reason}")]
    Connect {
        component: String,
        attempts: u32,
        reason: String,
    },

    #[error("Connector was disconnected")]
    Disconnected,

    #[error("Already connected to {0}")]
    AlreadyConnected(String),

    #[error("Cannot bind {}: {source}", .path.display())]
    Bind {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{} handler(s) for '{event}' failed", .errors.len())]
    Handlers { event: String, errors: Vec<BoxError> },
}

impl Error {
    pub(crate) fn framing(msg: impl Into<String>) -> Self {
        Self::Framing(msg.into())
    }

    pub(crate) fn codec(msg: impl Into<String>) -> Self {
        Self::Codec(msg.into())
    }

    /// Class name reported when this error travels in an error box
    pub fn class_name(&self) -> String {
        match self {
            Error::Io(_) => "IOError".to_string(),
            Error::Framing(_) => "FramingError".to_string(),
            Error::Codec(_) => "CodecError".to_string(),
            Error::Remote { class, .. } => class.clone(),
            Error::ConnectionLost => "ConnectionLost".to_string(),
            Error::Connect { .. } => "ConnectError".to_string(),
            Error::Disconnected => "Disconnected".to_string(),
            Error::AlreadyConnected(_) => "AlreadyConnected".to_string(),
            Error::Bind { .. } => "BindError".to_string(),
            Error::Handlers { .. } => "HandlerError".to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
