//! Resumable upload engine
//!
//! An upload walks through `Negotiating → Probing → Transferring → Complete`.
//! The server is the only source of truth for the offset: every write is
//! acknowledged with the offset the server actually holds, and a fresh run
//! always probes before sending anything. Interrupting between steps leaves
//! the resource resumable.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use http::Method;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::objects::{require_data_str, CreateObject, ObjectApi};
use crate::transport::{until_cancelled, HttpRequest, RequestBody, Transport};
use crate::tus::{
    chunk_len, encode_metadata, parse_offset, resource_from_location, resource_url,
    HEADER_CONTENT_TYPE, HEADER_LOCATION, HEADER_TUS_RESUMABLE, HEADER_UPLOAD_LENGTH,
    HEADER_UPLOAD_METADATA, HEADER_UPLOAD_OFFSET, OFFSET_OCTET_STREAM, TUS_VERSION,
};

/// Binary name used in the retry/resume hints
pub const BIN_NAME: &str = "kracli";

/// What to upload and where
#[derive(Debug, Clone, Default)]
pub struct UploadRequest {
    /// Local file
    pub path: PathBuf,
    /// Remote name, defaults to the local file name
    pub name: Option<String>,
    /// Folder for a newly created object
    pub parent: Option<String>,
    pub shared: bool,
    /// Existing object to upload into instead of creating one
    pub ident: Option<String>,
    /// Existing upload resource; skips negotiation
    pub resource: Option<String>,
    /// Bytes per write, 0 sends the rest of the file in one write
    pub chunk_size: u64,
}

impl UploadRequest {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Remote object name
    pub fn remote_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| {
            self.path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        })
    }
}

/// State of one in-progress upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSession {
    pub resource: String,
    pub size: u64,
    pub offset: u64,
    pub chunk_size: u64,
}

impl UploadSession {
    pub fn is_complete(&self) -> bool {
        self.offset == self.size
    }

    /// Length of the next write
    pub fn next_chunk_len(&self) -> u64 {
        chunk_len(self.size, self.offset, self.chunk_size)
    }

    /// Apply the offset the server reported after a write.
    ///
    /// The offset must move forward and stay within the declared size.
    pub fn acknowledge(&mut self, reported: u64) -> Result<()> {
        if reported <= self.offset || reported > self.size {
            return Err(Error::OffsetMismatch {
                sent: self.offset,
                reported: reported.to_string(),
            });
        }
        self.offset = reported;
        Ok(())
    }
}

/// Progress notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadEvent<'a> {
    /// A new remote object was created for the upload
    Created { ident: &'a str },
    /// The transfer endpoint assigned a resource
    Negotiated { resource: &'a str },
    /// Probe done; writing starts at `offset`
    Started {
        resource: &'a str,
        offset: u64,
        size: u64,
        chunk_size: u64,
    },
    /// A write was acknowledged
    Acknowledged { offset: u64, size: u64 },
    Complete { size: u64 },
}

/// Outcome of a finished upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReport {
    pub ident: Option<String>,
    pub resource: String,
    pub size: u64,
    /// Offset the probe reported before the first write
    pub resumed_from: u64,
    /// Number of write requests sent
    pub writes: usize,
}

enum UploadState {
    Negotiating,
    Probing { resource: String },
    Transferring(UploadSession),
    Complete(UploadSession),
}

/// Command that retries negotiation against an existing object
pub fn retry_command(path: &Path, ident: &str) -> String {
    format!("{} -u {} -I {}", BIN_NAME, path.display(), ident)
}

/// Command that resumes an upload from the server's offset
pub fn resume_command(path: &Path, resource: &str) -> String {
    format!("{} -u {} -T {}", BIN_NAME, path.display(), resource)
}

/// Command that resumes without chunking
pub fn whole_file_command(path: &Path, resource: &str) -> String {
    format!("{} -C 0", resume_command(path, resource))
}

/// Drives one upload to completion
pub struct UploadEngine<'a> {
    objects: &'a ObjectApi<'a>,
    transport: Arc<dyn Transport>,
    upload_root: String,
    cancel: CancellationToken,
}

impl<'a> UploadEngine<'a> {
    pub fn new(
        objects: &'a ObjectApi<'a>,
        transport: Arc<dyn Transport>,
        upload_root: impl Into<String>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            objects,
            transport,
            upload_root: upload_root.into(),
            cancel,
        }
    }

    /// Run the upload state machine
    pub async fn run(
        &self,
        request: &UploadRequest,
        on_event: &(dyn Fn(UploadEvent<'_>) + Sync),
    ) -> Result<UploadReport> {
        let size = local_size(&request.path).await?;
        let mut ident = request.ident.clone();
        let mut resumed_from = 0;
        let mut writes = 0;

        let mut state = match &request.resource {
            Some(resource) => UploadState::Probing {
                resource: resource.clone(),
            },
            None => UploadState::Negotiating,
        };

        loop {
            state = match state {
                UploadState::Negotiating => {
                    self.checkpoint()?;
                    let target = match ident.clone() {
                        Some(target) => target,
                        None => {
                            let created = self.create_target(request).await?;
                            on_event(UploadEvent::Created { ident: &created });
                            ident = Some(created.clone());
                            created
                        }
                    };

                    self.checkpoint()?;
                    let resource = self.negotiate(&request.path, &target, size).await?;
                    on_event(UploadEvent::Negotiated { resource: &resource });
                    UploadState::Probing { resource }
                }
                UploadState::Probing { resource } => {
                    self.checkpoint()?;
                    let session = self.probe(resource, size, request.chunk_size).await?;
                    resumed_from = session.offset;
                    on_event(UploadEvent::Started {
                        resource: &session.resource,
                        offset: session.offset,
                        size: session.size,
                        chunk_size: session.chunk_size,
                    });
                    UploadState::Transferring(session)
                }
                UploadState::Transferring(session) if session.is_complete() => {
                    UploadState::Complete(session)
                }
                UploadState::Transferring(mut session) => {
                    self.checkpoint()?;
                    self.write_chunk(&request.path, &mut session).await?;
                    writes += 1;
                    on_event(UploadEvent::Acknowledged {
                        offset: session.offset,
                        size: session.size,
                    });
                    UploadState::Transferring(session)
                }
                UploadState::Complete(session) => {
                    info!(resource = %session.resource, size = session.size, writes, "upload complete");
                    on_event(UploadEvent::Complete { size: session.size });
                    return Ok(UploadReport {
                        ident,
                        resource: session.resource,
                        size: session.size,
                        resumed_from,
                        writes,
                    });
                }
            };
        }
    }

    fn checkpoint(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            info!("upload interrupted at a step boundary");
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    /// Create the remote file slot and return its ident
    async fn create_target(&self, request: &UploadRequest) -> Result<String> {
        let object = CreateObject::file_slot(request.remote_name())
            .parent(request.parent.clone())
            .shared(request.shared);

        let reply = until_cancelled(&self.cancel, self.objects.create(&object)).await?;
        let ident = require_data_str(reply, "ident")?;
        info!(ident = %ident, "created remote object");
        Ok(ident)
    }

    /// Ask the transfer endpoint for a resource bound to `ident`
    async fn negotiate(&self, path: &Path, ident: &str, size: u64) -> Result<String> {
        let request = HttpRequest::new(Method::POST, self.upload_root.clone())
            .header(HEADER_TUS_RESUMABLE, TUS_VERSION)
            .header(HEADER_UPLOAD_LENGTH, size.to_string())
            .header(HEADER_UPLOAD_METADATA, encode_metadata(&[("ident", ident)]));

        let reply = self
            .transport
            .send(request)
            .await
            .map_err(|e| Error::Negotiation {
                reason: e.to_string(),
                retry: retry_command(path, ident),
            })?;

        let resource = reply
            .header(HEADER_LOCATION)
            .and_then(resource_from_location)
            .ok_or_else(|| Error::Negotiation {
                reason: format!("no usable Location header (HTTP {})", reply.status.as_u16()),
                retry: retry_command(path, ident),
            })?;

        debug!(ident, resource = %resource, "negotiated upload resource");
        Ok(resource)
    }

    /// Read the acknowledged offset and declared length of `resource`
    async fn probe(&self, resource: String, size: u64, chunk_size: u64) -> Result<UploadSession> {
        let request = HttpRequest::new(Method::HEAD, resource_url(&self.upload_root, &resource))
            .header(HEADER_TUS_RESUMABLE, TUS_VERSION);
        let reply = until_cancelled(&self.cancel, self.transport.send(request)).await?;

        let offset = parse_offset(reply.header(HEADER_UPLOAD_OFFSET));
        let length = parse_offset(reply.header(HEADER_UPLOAD_LENGTH));
        let (offset, length) = match (offset, length) {
            (Some(offset), Some(length)) => (offset, length),
            _ => {
                debug!(status = reply.status.as_u16(), "probe reply lacks offset or length");
                return Err(Error::AlreadyCompleteOrError);
            }
        };

        if length != size {
            return Err(Error::SizeMismatch {
                local: size,
                remote: length,
            });
        }
        if offset > length {
            return Err(Error::Protocol(format!(
                "resource offset {} exceeds its length {}",
                offset, length
            )));
        }

        debug!(resource = %resource, offset, length, "probed upload resource");
        Ok(UploadSession {
            resource,
            size,
            offset,
            chunk_size,
        })
    }

    /// Send the next chunk and apply the server's offset
    async fn write_chunk(&self, path: &Path, session: &mut UploadSession) -> Result<()> {
        let len = session.next_chunk_len();
        let request = HttpRequest::new(
            Method::PATCH,
            resource_url(&self.upload_root, &session.resource),
        )
        .header(HEADER_CONTENT_TYPE, OFFSET_OCTET_STREAM)
        .header(HEADER_TUS_RESUMABLE, TUS_VERSION)
        .header(HEADER_UPLOAD_OFFSET, session.offset.to_string())
        .body(RequestBody::FileRange {
            path: path.to_path_buf(),
            offset: session.offset,
            len,
        });

        debug!(offset = session.offset, len, "writing chunk");
        let reply = self.transport.send(request).await?;

        if !reply.status.is_success() {
            return Err(Error::OffsetMismatch {
                sent: session.offset,
                reported: format!("HTTP {}", reply.status.as_u16()),
            });
        }

        let reported = reply.header(HEADER_UPLOAD_OFFSET);
        match parse_offset(reported) {
            Some(offset) => session.acknowledge(offset),
            None => Err(Error::OffsetMismatch {
                sent: session.offset,
                reported: reported.unwrap_or("nothing").to_string(),
            }),
        }
    }
}

/// Size of the upload source; it must be a non-empty regular file
async fn local_size(path: &Path) -> Result<u64> {
    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|_| Error::LocalFile(path.to_path_buf()))?;
    if !metadata.is_file() {
        return Err(Error::LocalFile(path.to_path_buf()));
    }
    if metadata.len() == 0 {
        return Err(Error::EmptyFile(path.to_path_buf()));
    }
    Ok(metadata.len())
}
