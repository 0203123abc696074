//! Object endpoints (`file/*`, `user/info`) bound to one session

use serde::Serialize;

use crate::api::{ApiGateway, ResponseEnvelope};
use crate::error::{Error, Result};

/// Object type filter for listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    File,
    Folder,
}

/// `file/list` parameters
#[derive(Debug, Clone, Default, Serialize)]
pub struct ListQuery {
    /// Folder to list
    #[serde(rename = "ident", skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    /// Name filter, `*` and `.` globs allowed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<ObjectKind>,
}

/// `file/create` parameters
#[derive(Debug, Clone, Default, Serialize)]
pub struct CreateObject {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub folder: Option<bool>,
    pub shared: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl CreateObject {
    /// A folder, or a file slot when `folder` is false
    pub fn new(name: impl Into<String>, folder: bool) -> Self {
        Self {
            name: name.into(),
            folder: folder.then_some(true),
            ..Default::default()
        }
    }

    /// File slot for an upload; `folder: false` is sent explicitly
    pub fn file_slot(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            folder: Some(false),
            ..Default::default()
        }
    }

    pub fn parent(mut self, parent: Option<String>) -> Self {
        self.parent = parent;
        self
    }

    pub fn shared(mut self, shared: bool) -> Self {
        self.shared = shared;
        self
    }

    /// Empty passwords are not sent
    pub fn password(mut self, password: Option<String>) -> Self {
        self.password = password.filter(|p| !p.is_empty());
        self
    }
}

/// `file/copy` parameters
#[derive(Debug, Clone, Default, Serialize)]
pub struct CopyObject {
    pub ident: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    pub shared: bool,
    /// Current password of the source
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Password for the copy
    #[serde(rename = "newpassword", skip_serializing_if = "Option::is_none")]
    pub new_password: Option<String>,
}

/// `file/delete` parameters
#[derive(Debug, Clone, Serialize)]
pub struct DeleteObject {
    pub ident: String,
    pub recursive: bool,
}

/// `file/update` parameters. Only the fields that are set are changed.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UpdateObject {
    pub ident: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shared: Option<bool>,
    /// `Some(None)` removes the password
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<Option<String>>,
}

impl UpdateObject {
    pub fn new(ident: impl Into<String>) -> Self {
        Self {
            ident: ident.into(),
            ..Default::default()
        }
    }

    /// An empty string unsets the password
    pub fn password(mut self, password: Option<String>) -> Self {
        self.password = password.map(|p| if p.is_empty() { None } else { Some(p) });
        self
    }

    pub fn has_changes(&self) -> bool {
        self.name.is_some() || self.parent.is_some() || self.shared.is_some() || self.password.is_some()
    }
}

#[derive(Serialize)]
struct IdentQuery<'a> {
    ident: &'a str,
}

/// Object API calls made with one session token
pub struct ObjectApi<'a> {
    gateway: &'a ApiGateway,
    session_id: &'a str,
}

impl<'a> ObjectApi<'a> {
    pub fn new(gateway: &'a ApiGateway, session_id: &'a str) -> Self {
        Self {
            gateway,
            session_id,
        }
    }

    async fn call<T: Serialize>(&self, endpoint: &str, data: &T) -> Result<ResponseEnvelope> {
        let data = serde_json::to_value(data)?;
        self.gateway.call(endpoint, Some(self.session_id), Some(data)).await
    }

    /// Account information
    pub async fn user_info(&self) -> Result<ResponseEnvelope> {
        self.gateway.call("user/info", Some(self.session_id), None).await
    }

    pub async fn list(&self, query: &ListQuery) -> Result<ResponseEnvelope> {
        self.call("file/list", query).await
    }

    pub async fn info(&self, ident: &str) -> Result<ResponseEnvelope> {
        self.call("file/info", &IdentQuery { ident }).await
    }

    pub async fn create(&self, object: &CreateObject) -> Result<ResponseEnvelope> {
        self.call("file/create", object).await
    }

    pub async fn copy(&self, copy: &CopyObject) -> Result<ResponseEnvelope> {
        self.call("file/copy", copy).await
    }

    pub async fn delete(&self, delete: &DeleteObject) -> Result<ResponseEnvelope> {
        self.call("file/delete", delete).await
    }

    /// Fails with [`Error::NothingToEdit`] before any request if nothing changes
    pub async fn update(&self, update: &UpdateObject) -> Result<ResponseEnvelope> {
        if !update.has_changes() {
            return Err(Error::NothingToEdit);
        }
        self.call("file/update", update).await
    }

    /// Reply of `file/download`; on success `data.link` is a direct URL
    pub async fn download_link(&self, ident: &str) -> Result<ResponseEnvelope> {
        self.call("file/download", &IdentQuery { ident }).await
    }
}

/// Extract `data.<key>` as a string, or surface the reply unchanged
pub fn require_data_str(envelope: ResponseEnvelope, key: &str) -> Result<String> {
    if let Some(value) = envelope.data_str(key).map(str::to_string) {
        return Ok(value);
    }
    Err(Error::Envelope(envelope))
}
