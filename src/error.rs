//! Error types for paramjob.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("could not connect to NATS: {0}")]
    Connect(String),

    #[error("could not subscribe: {0}")]
    Subscribe(String),

    #[error("could not publish reply: {0}")]
    Publish(String),

    #[error("producer has not been started")]
    NotStarted,

    #[error("missing required meta parameters: {}", .0.join(","))]
    MissingMeta(Vec<String>),

    #[error("invalid meta: {0}")]
    InvalidMeta(String),

    #[error("malformed job body: {reason}")]
    Malformed { subject: String, reason: String },

    #[error("{command} exited with {status}")]
    CommandFailed {
        command: String,
        status: std::process::ExitStatus,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Configuration errors cannot be fixed by retrying and stop the process.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Config(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
