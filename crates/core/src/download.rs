//! Download engine with byte-offset resume

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::StreamExt;
use http::{HeaderMap, StatusCode};
use reqwest::Url;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::objects::{require_data_str, ObjectApi};
use crate::transport::{until_cancelled, Transport};

/// A resolved direct link and where to store it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTarget {
    pub url: String,
    pub dest: PathBuf,
    pub resume: bool,
}

/// Progress notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadEvent<'a> {
    /// Body is about to be streamed; `total` is the full size when known
    Started {
        dest: &'a Path,
        offset: u64,
        total: Option<u64>,
    },
    /// Bytes on disk so far, including the resumed prefix
    Progress { position: u64 },
    Complete { position: u64 },
}

/// Outcome of a download
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadReport {
    pub dest: PathBuf,
    /// Size of the local file before this run
    pub offset: u64,
    /// Bytes written by this run
    pub written: u64,
}

/// Resolves links and streams files to disk
pub struct DownloadEngine<'a> {
    objects: &'a ObjectApi<'a>,
    transport: Arc<dyn Transport>,
    cancel: CancellationToken,
}

impl<'a> DownloadEngine<'a> {
    pub fn new(
        objects: &'a ObjectApi<'a>,
        transport: Arc<dyn Transport>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            objects,
            transport,
            cancel,
        }
    }

    /// Direct link for `ident`; a reply without `data.link` is surfaced unchanged
    pub async fn resolve(&self, ident: &str) -> Result<String> {
        let reply = until_cancelled(&self.cancel, self.objects.download_link(ident)).await?;
        require_data_str(reply, "link")
    }

    /// Resolve `ident` and download it to `dest`, or to the link's file name
    pub async fn download(
        &self,
        ident: &str,
        dest: Option<PathBuf>,
        resume: bool,
        on_event: &(dyn Fn(DownloadEvent<'_>) + Sync),
    ) -> Result<DownloadReport> {
        let url = self.resolve(ident).await?;
        let dest = match dest {
            Some(dest) => dest,
            None => file_name_from_url(&url)?,
        };
        info!(ident, dest = %dest.display(), "downloading");

        let target = DownloadTarget { url, dest, resume };
        self.fetch(&target, on_event).await
    }

    /// Stream `target.url` into `target.dest`
    pub async fn fetch(
        &self,
        target: &DownloadTarget,
        on_event: &(dyn Fn(DownloadEvent<'_>) + Sync),
    ) -> Result<DownloadReport> {
        let (mut file, offset) = open_destination(&target.dest, target.resume).await?;
        let report = |written| DownloadReport {
            dest: target.dest.clone(),
            offset,
            written,
        };

        let mut reply =
            until_cancelled(&self.cancel, self.transport.open_stream(&target.url, offset)).await?;
        match reply.status {
            StatusCode::OK if offset == 0 => {}
            StatusCode::PARTIAL_CONTENT if offset > 0 => {}
            StatusCode::RANGE_NOT_SATISFIABLE if offset > 0 => {
                match unsatisfied_range_total(&reply.headers) {
                    Some(total) if total == offset => {
                        info!(offset, "nothing left to download");
                        on_event(DownloadEvent::Complete { position: offset });
                        return Ok(report(0));
                    }
                    total => {
                        return Err(Error::Protocol(format!(
                            "local file has {} bytes but the remote file has {}; refusing to resume",
                            offset,
                            total.map_or_else(|| "an unknown size".to_string(), |t| t.to_string())
                        )));
                    }
                }
            }
            StatusCode::OK => {
                return Err(Error::Protocol(
                    "server ignored the resume range; refusing to append".to_string(),
                ));
            }
            status => {
                return Err(Error::HttpStatus {
                    status: status.as_u16(),
                    url: target.url.clone(),
                });
            }
        }

        let total = reply
            .headers
            .get(http::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .and_then(|len| len.checked_add(offset));
        on_event(DownloadEvent::Started {
            dest: &target.dest,
            offset,
            total,
        });

        let mut written = 0u64;
        while let Some(frame) = reply.body.next().await {
            let frame = frame?;
            file.write_all(&frame).await?;
            written += frame.len() as u64;
            on_event(DownloadEvent::Progress {
                position: offset + written,
            });

            if self.cancel.is_cancelled() {
                file.flush().await?;
                info!(written, "download interrupted");
                return Err(Error::Cancelled);
            }
        }
        file.flush().await?;

        debug!(written, dest = %target.dest.display(), "download finished");
        on_event(DownloadEvent::Complete {
            position: offset + written,
        });
        Ok(report(written))
    }
}

/// Open the destination: append when resuming an existing file, otherwise
/// create it exclusively. Returns the file and the resume offset.
pub async fn open_destination(dest: &Path, resume: bool) -> Result<(File, u64)> {
    if resume {
        if let Ok(metadata) = tokio::fs::metadata(dest).await {
            if metadata.is_file() {
                let file = OpenOptions::new().append(true).open(dest).await?;
                return Ok((file, metadata.len()));
            }
        }
    }

    match OpenOptions::new().write(true).create_new(true).open(dest).await {
        Ok(file) => Ok((file, 0)),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            Err(Error::AlreadyExists(dest.to_path_buf()))
        }
        Err(e) => Err(e.into()),
    }
}

/// Full size from the `Content-Range: bytes */<total>` of a 416 reply
pub fn unsatisfied_range_total(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(http::header::CONTENT_RANGE)?
        .to_str()
        .ok()?
        .trim()
        .strip_prefix("bytes */")?
        .parse()
        .ok()
}

/// Local file name for a link: the last segment of its path
pub fn file_name_from_url(url: &str) -> Result<PathBuf> {
    let parsed = Url::parse(url).map_err(|e| Error::Protocol(format!("invalid link {}: {}", url, e)))?;
    parsed
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|name| !name.is_empty() && *name != "." && *name != "..")
        .map(PathBuf::from)
        .ok_or_else(|| Error::Protocol(format!("link has no file name: {}", url)))
}
