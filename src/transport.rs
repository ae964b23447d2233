//! HTTP transport used by the session client.

use crate::error::UploadError;
use futures_util::future::BoxFuture;
use reqwest::header::HeaderMap;
use reqwest::multipart::{Form, Part};
use reqwest::{Method, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// File attached to a multipart request.
#[derive(Debug, Clone)]
pub struct FilePart {
    /// Form field name.
    pub field: &'static str,
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// A form-encoded request: multipart when a file is attached, urlencoded otherwise.
#[derive(Debug, Clone)]
pub struct FormRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub fields: Vec<(&'static str, String)>,
    pub file: Option<FilePart>,
}

impl FormRequest {
    /// Value of a form field, if present.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Value of a header, if present and printable.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Status and body of a server response.
#[derive(Debug, Clone)]
pub struct HttpReply {
    pub status: StatusCode,
    pub body: String,
}

impl HttpReply {
    /// Turns a non-success status into [`UploadError::HttpStatus`] carrying the body.
    pub fn error_for_status(self) -> Result<Self, UploadError> {
        if self.status.is_success() {
            Ok(self)
        } else {
            Err(UploadError::HttpStatus {
                status: self.status,
                detail: self.body,
            })
        }
    }
}

/// Sends form requests to the upload service.
///
/// Implementations perform exactly one exchange per call and never retry.
pub trait Transport: Send + Sync {
    fn send(&self, request: FormRequest) -> BoxFuture<'_, Result<HttpReply, UploadError>>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn send(&self, request: FormRequest) -> BoxFuture<'_, Result<HttpReply, UploadError>> {
        (**self).send(request)
    }
}

/// [`Transport`] backed by a `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Builds a client whose every request must complete within `request_timeout`.
    pub fn new(request_timeout: Duration) -> Result<Self, UploadError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;
        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    fn send(&self, request: FormRequest) -> BoxFuture<'_, Result<HttpReply, UploadError>> {
        Box::pin(async move {
            let FormRequest {
                method,
                url,
                headers,
                fields,
                file,
            } = request;
            debug!("{} {}", method, url);

            let builder = self.client.request(method, &url).headers(headers);
            let builder = match file {
                Some(part) => {
                    let mut form = Form::new();
                    for (name, value) in fields {
                        form = form.text(name, value);
                    }
                    let file_part = Part::bytes(part.bytes).file_name(part.file_name);
                    builder.multipart(form.part(part.field, file_part))
                }
                None => builder.form(&fields),
            };

            let response = builder.send().await?;
            let status = response.status();
            let body = response.text().await?;
            debug!("{} answered {}", url, status);

            Ok(HttpReply { status, body })
        })
    }
}
