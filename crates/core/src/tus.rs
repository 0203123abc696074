//! Resumable transfer protocol (TUS 1.0.0) helpers

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// Protocol version sent on every transfer request
pub const TUS_VERSION: &str = "1.0.0";

pub const HEADER_TUS_RESUMABLE: &str = "Tus-Resumable";
pub const HEADER_UPLOAD_LENGTH: &str = "Upload-Length";
pub const HEADER_UPLOAD_OFFSET: &str = "Upload-Offset";
pub const HEADER_UPLOAD_METADATA: &str = "Upload-Metadata";
pub const HEADER_LOCATION: &str = "Location";
pub const HEADER_CONTENT_TYPE: &str = "Content-Type";

/// Content type of a chunk write
pub const OFFSET_OCTET_STREAM: &str = "application/offset+octet-stream";

/// Encode `Upload-Metadata` pairs: each value base64-encoded, pairs comma-separated
pub fn encode_metadata(pairs: &[(&str, &str)]) -> String {
    pairs
        .iter()
        .map(|(key, value)| format!("{} {}", key, STANDARD.encode(value.as_bytes())))
        .collect::<Vec<_>>()
        .join(",")
}

/// Extract the resource handle from a `Location` header.
///
/// The server may answer with an absolute URL or a path; the handle is the
/// last non-empty path segment, with any query or fragment stripped.
pub fn resource_from_location(location: &str) -> Option<String> {
    let without_query = location
        .trim()
        .split(|c| c == '?' || c == '#')
        .next()
        .unwrap_or_default();

    let path = match without_query.split_once("://") {
        Some((_, rest)) => rest.find('/').map(|i| &rest[i..]).unwrap_or_default(),
        None => without_query,
    };

    let segment = path.trim_end_matches('/').rsplit('/').next()?;
    if segment.is_empty() {
        return None;
    }
    Some(segment.to_string())
}

/// Parse an offset/length header value
pub fn parse_offset(value: Option<&str>) -> Option<u64> {
    value.and_then(|v| v.trim().parse().ok())
}

/// Length of the next write. `chunk_size == 0` sends everything that is left.
pub fn chunk_len(size: u64, offset: u64, chunk_size: u64) -> u64 {
    let remaining = size.saturating_sub(offset);
    if chunk_size == 0 {
        remaining
    } else {
        remaining.min(chunk_size)
    }
}

/// Convert a chunk size given in MiB. Zero or negative disables chunking.
pub fn chunk_size_from_mib(mib: i64) -> u64 {
    if mib <= 0 {
        0
    } else {
        (mib as u64).saturating_mul(1024 * 1024)
    }
}

/// Join the upload root and a resource handle
pub fn resource_url(upload_root: &str, resource: &str) -> String {
    format!("{}/{}", upload_root.trim_end_matches('/'), resource)
}
