//! Error types for kracli-core

use std::path::PathBuf;
use thiserror::Error;

use crate::api::ResponseEnvelope;

/// Result type alias for kracli-core
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for kracli-core
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration errors
    #[error("{0}")]
    Config(String),

    /// Invalid configuration format
    #[error("Invalid configuration format: {0}")]
    InvalidConfig(String),

    /// Connection, TLS or timeout failure reported by the HTTP stack
    #[error("{0}")]
    Transport(String),

    /// Non-success HTTP status on a transfer request
    #[error("HTTP {status} from {url}")]
    HttpStatus { status: u16, url: String },

    /// Non-JSON or malformed protocol response
    #[error("Unexpected response: {0}")]
    Protocol(String),

    /// The transfer endpoint did not hand out an upload resource
    #[error("Error retrieving upload resource: {reason}\nYou can retry upload with: {retry}")]
    Negotiation { reason: String, retry: String },

    /// Status probe did not report both offset and length
    #[error("File already uploaded or other error")]
    AlreadyCompleteOrError,

    /// Local file and upload resource disagree on the total length
    #[error("Local file and upload resource differ in size (local {local}, remote {remote})")]
    SizeMismatch { local: u64, remote: u64 },

    /// A chunk write was not acknowledged with a usable offset
    #[error("Upload offset mismatch: sent {sent}, server reported {reported}; re-run to re-probe the resource")]
    OffsetMismatch { sent: u64, reported: String },

    /// Download destination exists and resume was not requested
    #[error("Already exists: {}", .0.display())]
    AlreadyExists(PathBuf),

    /// Server-reported `error` envelope
    #[error("{}", application_message(.error, .msg.as_deref()))]
    Application {
        error: serde_json::Value,
        msg: Option<String>,
    },

    /// A reply that did not carry what the caller needed, passed through as-is
    #[error("Unexpected API reply")]
    Envelope(ResponseEnvelope),

    /// Authentication error
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Upload source missing or unreadable
    #[error("File not found or not accessible: {}", .0.display())]
    LocalFile(PathBuf),

    /// Upload source has no content
    #[error("File has zero size: {}", .0.display())]
    EmptyFile(PathBuf),

    /// Edit request without any change
    #[error("Nothing to edit")]
    NothingToEdit,

    /// Cancelled by user
    #[error("Operation cancelled")]
    Cancelled,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] toml::ser::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn application_message(error: &serde_json::Value, msg: Option<&str>) -> String {
    match (msg, error) {
        (Some(msg), _) => msg.to_string(),
        (None, serde_json::Value::String(code)) => code.clone(),
        (None, other) => other.to_string(),
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Error::Protocol(err.to_string())
        } else {
            Error::Transport(err.to_string())
        }
    }
}
