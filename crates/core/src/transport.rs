//! HTTP primitive shared by the object API and the transfer engines.
//!
//! Every call returns its own [`HttpReply`] with a snapshot of the response
//! headers, so protocol steps never share mutable header state. The
//! [`Transport`] trait keeps the engines independent of reqwest and lets tests
//! drive them against an in-memory service.

use std::future::Future;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt, TryStreamExt};
use http::{HeaderMap, Method, StatusCode};
use reqwest::{Body, Client};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Error, Result};

/// Body of an outgoing request
#[derive(Debug, Clone)]
pub enum RequestBody {
    Empty,
    Json(serde_json::Value),
    /// `len` bytes of a local file starting at `offset`, streamed from disk
    FileRange {
        path: PathBuf,
        offset: u64,
        len: u64,
    },
}

/// One outgoing HTTP request
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(&'static str, String)>,
    pub body: RequestBody,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: RequestBody::Empty,
        }
    }

    pub fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    pub fn body(mut self, body: RequestBody) -> Self {
        self.body = body;
        self
    }

    /// Value of a request header, case-insensitive
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Buffered reply to one request
#[derive(Debug, Clone)]
pub struct HttpReply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl HttpReply {
    /// Header value as text, if present and valid
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Stream of body frames
pub type BodyStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>>> + Send>>;

/// Streaming reply used for downloads
pub struct StreamReply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: BodyStream,
}

/// The HTTP operations the client needs
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request and buffer the whole reply
    async fn send(&self, request: HttpRequest) -> Result<HttpReply>;

    /// GET `url`, asking for bytes from `range_start` onwards when it is non-zero
    async fn open_stream(&self, url: &str, range_start: u64) -> Result<StreamReply>;
}

/// reqwest-backed transport
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    http_client: Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self {
            http_client: Client::new(),
        }
    }

    async fn file_body(path: &Path, offset: u64, len: u64) -> Result<Body> {
        let mut file = tokio::fs::File::open(path).await?;
        file.seek(SeekFrom::Start(offset)).await?;
        let stream = ReaderStream::new(file.take(len));
        Ok(Body::wrap_stream(stream))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpReply> {
        debug!(method = %request.method, url = %request.url, "sending request");

        let mut builder = self
            .http_client
            .request(request.method.clone(), &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(*name, value);
        }

        builder = match request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.body(serde_json::to_vec(&value)?),
            RequestBody::FileRange { path, offset, len } => builder
                .header(http::header::CONTENT_LENGTH, len)
                .body(Self::file_body(&path, offset, len).await?),
        };

        let response = builder.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?.to_vec();

        debug!(status = status.as_u16(), bytes = body.len(), "received reply");

        Ok(HttpReply {
            status,
            headers,
            body,
        })
    }

    async fn open_stream(&self, url: &str, range_start: u64) -> Result<StreamReply> {
        let mut builder = self.http_client.get(url);
        if range_start > 0 {
            builder = builder.header(http::header::RANGE, format!("bytes={}-", range_start));
        }

        let response = builder.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes_stream()
            .map_ok(|chunk| chunk.to_vec())
            .map(|frame| frame.map_err(Error::from));

        Ok(StreamReply {
            status,
            headers,
            body: Box::pin(body),
        })
    }
}

/// Run `request` unless the token fires first; an interrupt wins a tie.
///
/// Only for exchanges that can be dropped halfway, never for chunk writes.
pub async fn until_cancelled<T>(
    cancel: &CancellationToken,
    request: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            debug!("request abandoned after interrupt");
            Err(Error::Cancelled)
        }
        result = request => result,
    }
}
