//! In-memory kra.sk service: object API, TUS upload endpoint and direct links.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::io::{Read, Seek, SeekFrom};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use kracli_core::{Error, HttpReply, HttpRequest, RequestBody, Result, StreamReply, Transport};
use serde_json::Value;

pub const API: &str = "http://api.test/api";
pub const UPLOAD: &str = "http://upload.test/upload/";

/// Scripted answer of one object API call
pub enum ApiReply {
    Json(Value),
    Raw(&'static str),
    Fail,
}

/// Failure injection
#[derive(Debug, Clone, Default)]
pub struct Behaviour {
    /// Answer negotiation without a Location header
    pub omit_location: bool,
    /// Break the connection on every write after this many successful ones
    pub fail_patch_after: Option<usize>,
    /// Bytes of the broken write that still reach the server
    pub land_on_failure: u64,
    /// Acknowledge writes without moving the offset
    pub stall_patch: bool,
    /// Serve whole files even when a range is requested
    pub ignore_ranges: bool,
    /// Break the connection on upload negotiation
    pub fail_negotiate: bool,
    /// Break the connection on offset probes
    pub fail_probe: bool,
    /// Report this offset from probes instead of the bytes held
    pub probe_offset_override: Option<u64>,
    /// Never answer object API calls
    pub hang_api: bool,
    /// Advertise this Content-Length on downloads instead of the body size
    pub content_length_override: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub json: Option<Value>,
    /// (offset, len) of a file body
    pub range: Option<(u64, u64)>,
}

impl Recorded {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

struct FakeUpload {
    length: u64,
    data: Vec<u8>,
    metadata: Option<String>,
}

#[derive(Default)]
struct State {
    api: HashMap<String, VecDeque<ApiReply>>,
    uploads: BTreeMap<String, FakeUpload>,
    next_resource: usize,
    patches_ok: usize,
    requests: Vec<Recorded>,
    stream_opens: Vec<(String, u64)>,
    downloads: HashMap<String, Vec<u8>>,
    behaviour: Behaviour,
}

#[derive(Default)]
pub struct FakeService {
    state: Mutex<State>,
}

fn reply(status: StatusCode, headers: &[(&'static str, String)], body: Vec<u8>) -> HttpReply {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        map.insert(*name, HeaderValue::from_str(value).unwrap());
    }
    HttpReply {
        status,
        headers: map,
        body,
    }
}

fn read_range(path: &std::path::Path, offset: u64, len: u64) -> Vec<u8> {
    let mut file = std::fs::File::open(path).unwrap();
    file.seek(SeekFrom::Start(offset)).unwrap();
    let mut buf = vec![0u8; len as usize];
    file.read_exact(&mut buf).unwrap();
    buf
}

impl FakeService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_behaviour(behaviour: Behaviour) -> Arc<Self> {
        let service = Self::default();
        service.state.lock().unwrap().behaviour = behaviour;
        Arc::new(service)
    }

    pub fn transport(self: &Arc<Self>) -> Arc<dyn Transport> {
        self.clone()
    }

    pub fn set_behaviour(&self, behaviour: Behaviour) {
        self.state.lock().unwrap().behaviour = behaviour;
    }

    pub fn script(&self, endpoint: &str, answer: ApiReply) {
        self.state
            .lock()
            .unwrap()
            .api
            .entry(endpoint.to_string())
            .or_default()
            .push_back(answer);
    }

    /// Register an existing upload resource holding `data` of `length` bytes
    pub fn add_resource(&self, resource: &str, length: u64, data: &[u8]) {
        self.state.lock().unwrap().uploads.insert(
            resource.to_string(),
            FakeUpload {
                length,
                data: data.to_vec(),
                metadata: None,
            },
        );
    }

    pub fn uploaded(&self, resource: &str) -> Option<Vec<u8>> {
        self.state
            .lock()
            .unwrap()
            .uploads
            .get(resource)
            .map(|u| u.data.clone())
    }

    pub fn metadata(&self, resource: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .uploads
            .get(resource)
            .and_then(|u| u.metadata.clone())
    }

    pub fn add_download(&self, url: &str, content: &[u8]) {
        self.state
            .lock()
            .unwrap()
            .downloads
            .insert(url.to_string(), content.to_vec());
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.state.lock().unwrap().requests.clone()
    }

    /// (offset, len) of every write request
    pub fn patches(&self) -> Vec<(u64, u64)> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == Method::PATCH)
            .filter_map(|r| r.range)
            .collect()
    }

    pub fn api_calls(&self, endpoint: &str) -> Vec<Value> {
        let url = format!("{}/{}", API, endpoint);
        self.requests()
            .into_iter()
            .filter(|r| r.url == url)
            .filter_map(|r| r.json)
            .collect()
    }

    pub fn stream_opens(&self) -> Vec<(String, u64)> {
        self.state.lock().unwrap().stream_opens.clone()
    }

    fn handle_api(state: &mut State, endpoint: &str) -> Result<HttpReply> {
        let answer = state
            .api
            .get_mut(endpoint)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| ApiReply::Json(serde_json::json!({"error": "unscripted"})));

        match answer {
            ApiReply::Json(value) => Ok(reply(
                StatusCode::OK,
                &[],
                serde_json::to_vec(&value).unwrap(),
            )),
            ApiReply::Raw(text) => Ok(reply(StatusCode::BAD_GATEWAY, &[], text.as_bytes().to_vec())),
            ApiReply::Fail => Err(Error::Transport("Could not resolve host: api.test".to_string())),
        }
    }

    fn handle_negotiate(state: &mut State, request: &HttpRequest) -> Result<HttpReply> {
        assert_eq!(request.header_value("Tus-Resumable"), Some("1.0.0"));
        let length: u64 = request
            .header_value("Upload-Length")
            .and_then(|v| v.parse().ok())
            .expect("Upload-Length header");

        if state.behaviour.fail_negotiate {
            return Err(Error::Transport("Connection refused".to_string()));
        }
        if state.behaviour.omit_location {
            return Ok(reply(StatusCode::CREATED, &[], Vec::new()));
        }

        state.next_resource += 1;
        let resource = format!("res-{}", state.next_resource);
        state.uploads.insert(
            resource.clone(),
            FakeUpload {
                length,
                data: Vec::new(),
                metadata: request.header_value("Upload-Metadata").map(str::to_string),
            },
        );
        Ok(reply(
            StatusCode::CREATED,
            &[("location", format!("/upload/{}", resource))],
            Vec::new(),
        ))
    }

    fn handle_probe(state: &mut State, resource: &str) -> Result<HttpReply> {
        if state.behaviour.fail_probe {
            return Err(Error::Transport("Operation timed out".to_string()));
        }
        let override_offset = state.behaviour.probe_offset_override;
        match state.uploads.get(resource) {
            Some(upload) => Ok(reply(
                StatusCode::OK,
                &[
                    (
                        "upload-offset",
                        override_offset
                            .unwrap_or(upload.data.len() as u64)
                            .to_string(),
                    ),
                    ("upload-length", upload.length.to_string()),
                    ("tus-resumable", "1.0.0".to_string()),
                ],
                Vec::new(),
            )),
            None => Ok(reply(StatusCode::NOT_FOUND, &[], Vec::new())),
        }
    }

    fn handle_patch(state: &mut State, resource: &str, request: &HttpRequest) -> Result<HttpReply> {
        assert_eq!(
            request.header_value("Content-Type"),
            Some("application/offset+octet-stream")
        );
        let behaviour = state.behaviour.clone();
        let patches_ok = state.patches_ok;

        let Some(upload) = state.uploads.get_mut(resource) else {
            return Ok(reply(StatusCode::NOT_FOUND, &[], Vec::new()));
        };

        let declared: u64 = request
            .header_value("Upload-Offset")
            .and_then(|v| v.parse().ok())
            .expect("Upload-Offset header");
        if declared != upload.data.len() as u64 {
            return Ok(reply(StatusCode::CONFLICT, &[], Vec::new()));
        }

        let bytes = match &request.body {
            RequestBody::FileRange { path, offset, len } => read_range(path, *offset, *len),
            other => panic!("unexpected write body {other:?}"),
        };

        if let Some(limit) = behaviour.fail_patch_after {
            if patches_ok >= limit {
                let landed = (behaviour.land_on_failure as usize).min(bytes.len());
                upload.data.extend_from_slice(&bytes[..landed]);
                return Err(Error::Transport("Connection reset by peer".to_string()));
            }
        }

        if !behaviour.stall_patch {
            upload.data.extend_from_slice(&bytes);
        }
        let offset = upload.data.len().to_string();
        state.patches_ok += 1;

        Ok(reply(
            StatusCode::NO_CONTENT,
            &[("upload-offset", offset)],
            Vec::new(),
        ))
    }
}

#[async_trait]
impl Transport for FakeService {
    async fn send(&self, request: HttpRequest) -> Result<HttpReply> {
        let hang = self.state.lock().unwrap().behaviour.hang_api;
        if hang && request.url.starts_with(API) {
            futures::future::pending::<()>().await;
        }

        let mut state = self.state.lock().unwrap();

        state.requests.push(Recorded {
            method: request.method.clone(),
            url: request.url.clone(),
            headers: request
                .headers
                .iter()
                .map(|(n, v)| (n.to_string(), v.clone()))
                .collect(),
            json: match &request.body {
                RequestBody::Json(value) => Some(value.clone()),
                _ => None,
            },
            range: match &request.body {
                RequestBody::FileRange { offset, len, .. } => Some((*offset, *len)),
                _ => None,
            },
        });

        if let Some(endpoint) = request.url.strip_prefix(&format!("{}/", API)) {
            return Self::handle_api(&mut state, endpoint);
        }

        if request.url == UPLOAD && request.method == Method::POST {
            return Self::handle_negotiate(&mut state, &request);
        }

        let resource = request
            .url
            .strip_prefix(UPLOAD)
            .unwrap_or_else(|| panic!("unexpected url {}", request.url))
            .to_string();

        if request.method == Method::HEAD {
            Self::handle_probe(&mut state, &resource)
        } else if request.method == Method::PATCH {
            Self::handle_patch(&mut state, &resource, &request)
        } else {
            panic!("unexpected method {}", request.method)
        }
    }

    async fn open_stream(&self, url: &str, range_start: u64) -> Result<StreamReply> {
        let mut state = self.state.lock().unwrap();
        state.stream_opens.push((url.to_string(), range_start));

        let Some(content) = state.downloads.get(url).cloned() else {
            return Ok(StreamReply {
                status: StatusCode::NOT_FOUND,
                headers: HeaderMap::new(),
                body: Box::pin(futures::stream::empty()),
            });
        };

        let mut headers = HeaderMap::new();
        let (status, body) = if range_start == 0 || state.behaviour.ignore_ranges {
            (StatusCode::OK, content)
        } else if range_start >= content.len() as u64 {
            headers.insert(
                http::header::CONTENT_RANGE,
                HeaderValue::from_str(&format!("bytes */{}", content.len())).unwrap(),
            );
            (StatusCode::RANGE_NOT_SATISFIABLE, Vec::new())
        } else {
            (StatusCode::PARTIAL_CONTENT, content[range_start as usize..].to_vec())
        };

        headers.insert(
            http::header::CONTENT_LENGTH,
            HeaderValue::from_str(
                &state
                    .behaviour
                    .content_length_override
                    .unwrap_or(body.len() as u64)
                    .to_string(),
            )
            .unwrap(),
        );

        let frames: Vec<Result<Vec<u8>>> = body.chunks(4).map(|c| Ok(c.to_vec())).collect();
        Ok(StreamReply {
            status,
            headers,
            body: Box::pin(futures::stream::iter(frames)),
        })
    }
}

/// Write `len` bytes of a repeating pattern
pub fn write_pattern(path: &std::path::Path, len: usize) -> Vec<u8> {
    let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
    std::fs::write(path, &data).unwrap();
    data
}
