//! kracli-core - Core library for the kra.sk storage client
//!
//! This library provides the object API gateway, session handling and the
//! resumable transfer engines used by the `kracli` binary.

pub mod api;
pub mod config;
pub mod download;
pub mod error;
pub mod objects;
pub mod session;
pub mod transport;
pub mod tus;
pub mod upload;

// Re-export commonly used types
pub use api::{ApiGateway, ResponseEnvelope};
pub use config::{get_config_path, load_config, save_config, ConfigFile};
pub use download::{DownloadEngine, DownloadEvent, DownloadReport, DownloadTarget};
pub use error::{Error, Result};
pub use objects::{CopyObject, CreateObject, DeleteObject, ListQuery, ObjectApi, ObjectKind, UpdateObject};
pub use session::{ConfigCredentials, Credentials, CredentialsProvider, SessionStore};
pub use transport::{
    until_cancelled, HttpReply, HttpRequest, HttpTransport, RequestBody, StreamReply, Transport,
};
pub use upload::{UploadEngine, UploadEvent, UploadReport, UploadRequest, UploadSession};
