//! Session client: token exchange and the upload requests.

use crate::chunk::Chunk;
use crate::error::UploadError;
use crate::transport::{FilePart, FormRequest, HttpReply, Transport};
use crate::types::{
    ChunkReceipt, Credentials, TransferSession, UploadTarget, AUTH_PATH, UPLOAD_PATH,
};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_RANGE};
use reqwest::Method;
use serde::Deserialize;
use tracing::{debug, info};

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
}

/// Performs the individual HTTP operations of the upload protocol.
///
/// Holds the upload target and the cached API token. None of the methods
/// retry; that policy belongs to the caller.
pub struct SessionClient<T> {
    transport: T,
    base_url: String,
    target: UploadTarget,
    credentials: Option<Credentials>,
    token: Option<String>,
}

impl<T: Transport> SessionClient<T> {
    /// `base_url` must end in `/`; endpoint paths are appended to it.
    pub fn new(
        transport: T,
        base_url: impl Into<String>,
        target: UploadTarget,
        credentials: Option<Credentials>,
    ) -> Self {
        Self {
            transport,
            base_url: base_url.into(),
            target,
            credentials,
            token: None,
        }
    }

    pub fn target(&self) -> &UploadTarget {
        &self.target
    }

    pub(crate) fn rename(&mut self, filename: String) {
        self.target.filename = filename;
    }

    pub fn has_credentials(&self) -> bool {
        self.credentials.is_some()
    }

    /// Cached token, if any.
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub(crate) fn seed_token(&mut self, token: String) {
        self.token = Some(token);
    }

    /// Endpoint used until the server allocates a resource URL.
    pub fn collection_url(&self) -> String {
        format!("{}{}", self.base_url, UPLOAD_PATH)
    }

    /// Exchanges the configured credentials for an API token.
    ///
    /// The token is cached; later calls return it without a request unless
    /// `refresh` is set.
    pub async fn authenticate(&mut self, refresh: bool) -> Result<String, UploadError> {
        if let (Some(token), false) = (&self.token, refresh) {
            return Ok(token.clone());
        }
        let credentials = self.credentials.as_ref().ok_or_else(|| {
            UploadError::InvalidState("no credentials configured for authentication".to_string())
        })?;

        let url = format!("{}{}", self.base_url, AUTH_PATH);
        info!("Requesting API token from {}", url);
        let reply = self
            .transport
            .send(FormRequest {
                method: Method::POST,
                url,
                headers: HeaderMap::new(),
                fields: vec![
                    ("username", credentials.username.clone()),
                    ("password", credentials.password.clone()),
                ],
                file: None,
            })
            .await?;

        // an outage is not a credentials problem
        if reply.status.is_server_error() {
            return Err(UploadError::HttpStatus {
                status: reply.status,
                detail: reply.body,
            });
        }

        let token = serde_json::from_str::<TokenResponse>(&reply.body)
            .ok()
            .and_then(|r| r.token)
            .filter(|t| !t.is_empty())
            .ok_or(UploadError::Authentication)?;

        self.token = Some(token.clone());
        Ok(token)
    }

    /// Headers shared by every upload request.
    ///
    /// `Authorization` is only present when credentials are configured and a
    /// token has been obtained; anonymous uploads send no auth header.
    pub fn build_headers(&self) -> Result<HeaderMap, UploadError> {
        let mut headers = HeaderMap::new();
        if let (true, Some(token)) = (self.has_credentials(), &self.token) {
            headers.insert(AUTHORIZATION, header_value(&format!("Token {}", token))?);
        }
        Ok(headers)
    }

    /// PUTs one chunk and parses the server's acknowledgement.
    ///
    /// Targets `session.resource_url` once known, the collection endpoint
    /// before that. The caller applies the receipt to the session.
    pub async fn put_chunk(
        &self,
        session: &TransferSession,
        chunk: &Chunk,
    ) -> Result<ChunkReceipt, UploadError> {
        let mut headers = self.build_headers()?;
        headers.insert(
            CONTENT_RANGE,
            header_value(&chunk.content_range(self.target.declared_size))?,
        );
        let url = session
            .resource_url
            .clone()
            .unwrap_or_else(|| self.collection_url());
        debug!(
            "Uploading bytes {}-{} of {} to {}",
            chunk.start_offset, chunk.end_offset, self.target.filename, url
        );

        let reply = self
            .transport
            .send(FormRequest {
                method: Method::PUT,
                url,
                headers,
                fields: self.target.form_fields(),
                file: Some(self.file_part(chunk.payload.clone())),
            })
            .await?
            .error_for_status()?;

        serde_json::from_str::<ChunkReceipt>(&reply.body).map_err(|e| {
            UploadError::ProtocolViolation(format!(
                "unreadable chunk acknowledgement ({}): {}",
                e, reply.body
            ))
        })
    }

    /// Marks the upload complete and hands the server the whole-file checksum.
    pub async fn post_finalize(&self, session: &TransferSession) -> Result<HttpReply, UploadError> {
        let url = session
            .resource_url
            .clone()
            .unwrap_or_else(|| self.collection_url());
        info!("Finalizing {} at {}", self.target.filename, url);

        self.transport
            .send(FormRequest {
                method: Method::POST,
                url,
                headers: self.build_headers()?,
                fields: self.target.form_fields_with_checksum(),
                file: None,
            })
            .await?
            .error_for_status()
    }

    /// Sends the entire file and its checksum in one POST.
    pub async fn post_single_shot(&self, payload: Vec<u8>) -> Result<HttpReply, UploadError> {
        info!(
            "Uploading {} ({} bytes) in a single request",
            self.target.filename,
            payload.len()
        );

        self.transport
            .send(FormRequest {
                method: Method::POST,
                url: self.collection_url(),
                headers: self.build_headers()?,
                fields: self.target.form_fields_with_checksum(),
                file: Some(self.file_part(payload)),
            })
            .await?
            .error_for_status()
    }

    fn file_part(&self, bytes: Vec<u8>) -> FilePart {
        FilePart {
            field: "file",
            file_name: self.target.filename.clone(),
            bytes,
        }
    }
}

fn header_value(value: &str) -> Result<HeaderValue, UploadError> {
    HeaderValue::from_str(value)
        .map_err(|e| UploadError::ProtocolViolation(format!("invalid header value: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{reply, MockServer, RESOURCE_URL};
    use std::sync::Arc;

    const BASE: &str = "http://uploads.test/";

    fn target() -> UploadTarget {
        UploadTarget {
            filename: "bear_creek.zip".to_string(),
            declared_size: 10,
            checksum: "9e107d9d372bb6826bd81d3542a419d6".to_string(),
            comment: Some("first pass".to_string()),
            parent_id: None,
        }
    }

    fn credentials() -> Option<Credentials> {
        Some(Credentials {
            username: "ada".to_string(),
            password: "secret".to_string(),
        })
    }

    fn chunk(start: u64, end: u64) -> Chunk {
        Chunk {
            start_offset: start,
            end_offset: end,
            payload: vec![7u8; (end - start) as usize],
        }
    }

    #[tokio::test]
    async fn test_authenticate_caches_token() {
        let server = Arc::new(MockServer::new(|_, _| reply(200, r#"{"token": "abc"}"#)));
        let mut client = SessionClient::new(server.clone(), BASE, target(), credentials());

        assert_eq!(client.authenticate(false).await.unwrap(), "abc");
        assert_eq!(client.authenticate(false).await.unwrap(), "abc");
        assert_eq!(server.requests().len(), 1);

        let request = &server.requests()[0];
        assert_eq!(request.url, "http://uploads.test/api/rest/token/");
        assert_eq!(request.field("username"), Some("ada"));
        assert_eq!(request.field("password"), Some("secret"));

        client.authenticate(true).await.unwrap();
        assert_eq!(server.requests().len(), 2);

        let headers = client.build_headers().unwrap();
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Token abc");
    }

    #[tokio::test]
    async fn test_missing_token_is_authentication_error() {
        for (status, body) in [(200, "{}"), (400, r#"{"non_field_errors": ["nope"]}"#), (200, "<html>")] {
            let server = MockServer::new(move |_, _| reply(status, body));
            let mut client = SessionClient::new(server, BASE, target(), credentials());
            assert!(matches!(
                client.authenticate(false).await,
                Err(UploadError::Authentication)
            ));
            assert!(client.token().is_none());
        }
    }

    #[tokio::test]
    async fn test_token_server_outage_is_http_error() {
        let server = MockServer::new(|_, _| reply(502, "bad gateway"));
        let mut client = SessionClient::new(server, BASE, target(), credentials());
        assert!(matches!(
            client.authenticate(false).await,
            Err(UploadError::HttpStatus { .. })
        ));
    }

    #[tokio::test]
    async fn test_anonymous_headers_are_empty() {
        let mut client = SessionClient::new(MockServer::cooperative(), BASE, target(), None);
        assert!(client.build_headers().unwrap().is_empty());
        assert!(matches!(
            client.authenticate(false).await,
            Err(UploadError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_put_chunk_targets_collection_then_resource() {
        let server = Arc::new(MockServer::cooperative());
        let client = SessionClient::new(server.clone(), BASE, target(), None);
        let mut session = TransferSession::default();

        let receipt = client.put_chunk(&session, &chunk(0, 4)).await.unwrap();
        assert_eq!(receipt.offset, 4);
        session.acknowledge(receipt, 0, 10).unwrap();
        client.put_chunk(&session, &chunk(4, 8)).await.unwrap();

        let puts = server.puts();
        assert_eq!(puts[0].url, "http://uploads.test/api/rest/aois/");
        assert_eq!(puts[1].url, RESOURCE_URL);
        assert_eq!(puts[0].header("content-range"), Some("bytes 0-4/10"));
        assert_eq!(puts[1].header("content-range"), Some("bytes 4-8/10"));
        assert_eq!(puts[1].field("filename"), Some("bear_creek.zip"));
        assert_eq!(puts[1].field("comment"), Some("first pass"));
        assert_eq!(puts[1].field("md5"), None);
        assert_eq!(puts[1].file.as_ref().unwrap().bytes.len(), 4);
    }

    #[tokio::test]
    async fn test_put_chunk_errors() {
        let server = MockServer::new(|_, i| match i {
            0 => reply(413, "too large"),
            _ => reply(200, r#"{"url": "x"}"#),
        });
        let client = SessionClient::new(server, BASE, target(), None);
        let session = TransferSession::default();

        assert!(matches!(
            client.put_chunk(&session, &chunk(0, 4)).await,
            Err(UploadError::HttpStatus { .. })
        ));
        assert!(matches!(
            client.put_chunk(&session, &chunk(0, 4)).await,
            Err(UploadError::ProtocolViolation(_))
        ));
    }

    #[tokio::test]
    async fn test_finalize_and_single_shot_carry_checksum() {
        let server = Arc::new(MockServer::cooperative());
        let client = SessionClient::new(server.clone(), BASE, target(), None);
        let session = TransferSession {
            resource_url: Some(RESOURCE_URL.to_string()),
            ..Default::default()
        };

        client.post_finalize(&session).await.unwrap();
        client.post_single_shot(vec![1u8; 10]).await.unwrap();

        let requests = server.requests();
        assert_eq!(requests[0].method, Method::POST);
        assert_eq!(requests[0].url, RESOURCE_URL);
        assert!(requests[0].file.is_none());
        assert_eq!(requests[0].field("md5"), Some("9e107d9d372bb6826bd81d3542a419d6"));

        assert_eq!(requests[1].url, "http://uploads.test/api/rest/aois/");
        assert_eq!(requests[1].field("md5"), Some("9e107d9d372bb6826bd81d3542a419d6"));
        assert_eq!(requests[1].file.as_ref().unwrap().bytes, vec![1u8; 10]);
    }
}
