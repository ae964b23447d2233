//! In-memory upload service for tests.

use crate::error::UploadError;
use crate::transport::{FormRequest, HttpReply, Transport};
use futures_util::future::BoxFuture;
use reqwest::StatusCode;
use std::io::Write;
use std::sync::Mutex;

type Handler = Box<dyn Fn(&FormRequest, usize) -> HttpReply + Send + Sync>;

/// Records every request and answers through a handler that also sees the
/// zero-based request index.
pub(crate) struct MockServer {
    handler: Handler,
    requests: Mutex<Vec<FormRequest>>,
}

impl MockServer {
    pub(crate) fn new(
        handler: impl Fn(&FormRequest, usize) -> HttpReply + Send + Sync + 'static,
    ) -> Self {
        Self {
            handler: Box::new(handler),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// A well-behaved service: issues `token`, accepts every chunk up to its
    /// `Content-Range` end, and accepts finalize and single-shot posts.
    pub(crate) fn cooperative() -> Self {
        Self::new(|request, _| cooperative_reply(request))
    }

    pub(crate) fn requests(&self) -> Vec<FormRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub(crate) fn puts(&self) -> Vec<FormRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == reqwest::Method::PUT)
            .collect()
    }
}

impl Transport for MockServer {
    fn send(&self, request: FormRequest) -> BoxFuture<'_, Result<HttpReply, UploadError>> {
        let index = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request.clone());
            requests.len() - 1
        };
        let reply = (self.handler)(&request, index);
        Box::pin(async move { Ok(reply) })
    }
}

pub(crate) const RESOURCE_URL: &str = "http://uploads.test/api/rest/aois/42/";

pub(crate) fn reply(status: u16, body: &str) -> HttpReply {
    HttpReply {
        status: StatusCode::from_u16(status).unwrap(),
        body: body.to_string(),
    }
}

/// `(start, end, total)` from a `bytes start-end/total` header.
pub(crate) fn parse_content_range(value: &str) -> (u64, u64, u64) {
    let range = value.strip_prefix("bytes ").unwrap();
    let (span, total) = range.split_once('/').unwrap();
    let (start, end) = span.split_once('-').unwrap();
    (
        start.parse().unwrap(),
        end.parse().unwrap(),
        total.parse().unwrap(),
    )
}

pub(crate) fn cooperative_reply(request: &FormRequest) -> HttpReply {
    if request.url.ends_with(crate::types::AUTH_PATH) {
        return reply(200, r#"{"token": "tok-123"}"#);
    }
    match request.method {
        reqwest::Method::PUT => {
            let (_, end, _) = parse_content_range(request.header("content-range").unwrap());
            reply(
                200,
                &serde_json::json!({ "url": RESOURCE_URL, "offset": end }).to_string(),
            )
        }
        _ => reply(201, "{}"),
    }
}

pub(crate) fn fixture(size: usize) -> tempfile::NamedTempFile {
    let data: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&data).unwrap();
    file.flush().unwrap();
    file
}
