//! Mutable per-request state

use bytes::Bytes;
use http::{header, HeaderMap};
use serde_json::Value;
use tokio::task::AbortHandle;

use crate::{
    cache::CachedResponse,
    core::{error::RequestError, traits::TransportResponse},
};

/// Identifier handed out by the context for every transport submission
pub type TaskId = u64;

pub const DEFAULT_ENCODING: &str = "utf-8";

/// The transport task backing an in-flight request
#[derive(Debug)]
pub struct TaskHandle {
    task_id: TaskId,
    abort: AbortHandle,
}

impl TaskHandle {
    pub fn new(task_id: TaskId, abort: AbortHandle) -> Self {
        Self { task_id, abort }
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn is_finished(&self) -> bool {
        self.abort.is_finished()
    }

    pub fn cancel(&self) {
        self.abort.abort();
    }
}

/// Response side of a request, filled in by the lifecycle
#[derive(Debug, Default)]
pub struct RequestRecord {
    pub task_id: Option<TaskId>,
    pub response_data: Option<Bytes>,
    pub response_text: Option<String>,
    pub response_json: Option<Value>,
    pub status_code: Option<u16>,
    pub response_headers: HeaderMap,
    pub error: Option<RequestError>,
    pub is_from_cache: bool,
    pub is_cancelled: bool,
}

impl RequestRecord {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub(crate) fn apply_response(&mut self, response: TransportResponse) {
        let encoding = charset(&response.headers);
        self.status_code = Some(response.status_code);
        self.response_text = decode_text(&response.body, &encoding);
        self.response_data = Some(response.body);
        self.response_headers = response.headers;
        self.is_from_cache = false;
    }

    pub(crate) fn apply_cached(&mut self, cached: CachedResponse) {
        self.response_data = Some(cached.data);
        self.response_text = cached.text;
        self.response_json = cached.json;
        self.is_from_cache = true;
    }

    /// Text encoding of the current response, for the cache metadata
    pub fn encoding(&self) -> String {
        charset(&self.response_headers)
    }
}

/// Charset named by the `Content-Type` header, lower-cased
pub fn charset(headers: &HeaderMap) -> String {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|content_type| {
            content_type.split(';').skip(1).find_map(|param| {
                let (name, value) = param.split_once('=')?;
                name.trim()
                    .eq_ignore_ascii_case("charset")
                    .then(|| value.trim().trim_matches('"').to_ascii_lowercase())
            })
        })
        .unwrap_or_else(|| DEFAULT_ENCODING.to_string())
}

/// Decode bytes with a named encoding.
///
/// UTF-8 and the single byte Latin-1 family are understood; any other name
/// falls back to UTF-8. Returns `None` when the bytes are not valid text.
pub fn decode_text(data: &[u8], encoding: &str) -> Option<String> {
    match encoding {
        "iso-8859-1" | "latin1" | "latin-1" | "windows-1252" => {
            Some(data.iter().map(|&b| b as char).collect())
        }
        "us-ascii" | "ascii" => data
            .is_ascii()
            .then(|| String::from_utf8_lossy(data).into_owned()),
        _ => std::str::from_utf8(data).ok().map(str::to_owned),
    }
}

#[cfg(test)]
mod tests {
    use http::HeaderValue;

    use super::*;

    #[test]
    fn test_charset_from_content_type() {
        let mut headers = HeaderMap::new();
        assert_eq!(charset(&headers), "utf-8");

        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/html; Charset=\"ISO-8859-1\""),
        );
        assert_eq!(charset(&headers), "iso-8859-1");

        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        assert_eq!(charset(&headers), "utf-8");
    }

    #[test]
    fn test_decode_text() {
        assert_eq!(decode_text("héllo".as_bytes(), "utf-8").as_deref(), Some("héllo"));
        assert_eq!(decode_text(&[0x68, 0xe9], "iso-8859-1").as_deref(), Some("hé"));
        assert_eq!(decode_text(&[0xff, 0xfe], "utf-8"), None);
        assert_eq!(decode_text(&[0xe9], "us-ascii"), None);
    }

    #[test]
    fn test_apply_response_and_reset() {
        let mut record = RequestRecord::default();
        record.apply_response(TransportResponse::new(201, "ok"));
        assert_eq!(record.status_code, Some(201));
        assert_eq!(record.response_text.as_deref(), Some("ok"));
        assert!(!record.is_from_cache);

        record.reset();
        assert!(record.response_data.is_none());
        assert!(record.status_code.is_none());
    }
}
