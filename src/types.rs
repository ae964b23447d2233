//! Data structures for upload operations.

use crate::error::UploadError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default upload chunk size (4 MiB).
pub const DEFAULT_CHUNK_SIZE: u64 = 1 << 22;

/// Default service host.
pub const DEFAULT_HOST: &str = "ebagis.geog.pdx.edu";

/// Token endpoint, relative to the base URL.
pub const AUTH_PATH: &str = "api/rest/token/";

/// Upload collection endpoint, relative to the base URL.
pub const UPLOAD_PATH: &str = "api/rest/aois/";

/// Username/password pair exchanged for an API token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Configuration for an upload.
///
/// # Example
///
/// ```
/// use chunkup::UploadConfig;
///
/// let config = UploadConfig {
///     host: "localhost".to_string(),
///     port: Some(8000),
///     use_https: false,
///     upload_file: "aoi.zip".into(),
///     ..Default::default()
/// };
/// assert_eq!(config.base_url(), "http://localhost:8000/");
/// ```
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// IP or domain name of the service host.
    pub host: String,
    /// Explicit port; the scheme default is used when unset.
    pub port: Option<u16>,
    /// Use `https://` (default) instead of plain `http://`.
    pub use_https: bool,
    /// Local file to upload.
    pub upload_file: PathBuf,
    /// Name to register the upload under; defaults to the file's base name.
    pub filename: Option<String>,
    /// Free-form comment attached to the upload.
    pub comment: Option<String>,
    /// Identifier of the parent record on the server.
    pub parent_object_id: Option<String>,
    /// Bytes per chunk (default: 4 MiB).
    pub chunk_size: u64,
    /// Credentials; anonymous uploads when unset.
    pub credentials: Option<Credentials>,
    /// How many times a failed chunk is re-sent before the session fails.
    pub max_retries: usize,
    /// Base delay of the exponential chunk retry backoff.
    pub retry_base_delay: Duration,
    /// Deadline for each individual HTTP request.
    pub request_timeout: Duration,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: None,
            use_https: true,
            upload_file: PathBuf::new(),
            filename: None,
            comment: None,
            parent_object_id: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            credentials: None,
            max_retries: 3,
            retry_base_delay: Duration::from_millis(500),
            request_timeout: Duration::from_secs(300),
        }
    }
}

impl UploadConfig {
    /// Base URL every endpoint path is joined onto, always ending in `/`.
    pub fn base_url(&self) -> String {
        let scheme = if self.use_https { "https" } else { "http" };
        match self.port {
            Some(port) => format!("{}://{}:{}/", scheme, self.host, port),
            None => format!("{}://{}/", scheme, self.host),
        }
    }

    /// Name the upload is registered under.
    pub fn display_name(&self) -> String {
        if let Some(name) = &self.filename {
            return name.clone();
        }
        self.upload_file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.upload_file.to_string_lossy().into_owned())
    }
}

/// What is being uploaded, fixed once the checksum has been computed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTarget {
    pub filename: String,
    pub declared_size: u64,
    /// Lowercase hex MD5 of the whole file.
    pub checksum: String,
    pub comment: Option<String>,
    pub parent_id: Option<String>,
}

impl UploadTarget {
    /// Form fields sent with every chunk, finalize and single-shot request.
    ///
    /// Unset optional fields are left out rather than sent empty.
    pub fn form_fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![("filename", self.filename.clone())];
        if let Some(comment) = &self.comment {
            fields.push(("comment", comment.clone()));
        }
        if let Some(parent) = &self.parent_id {
            fields.push(("parent_object_id", parent.clone()));
        }
        fields
    }

    /// Form fields plus the whole-file checksum.
    pub fn form_fields_with_checksum(&self) -> Vec<(&'static str, String)> {
        let mut fields = self.form_fields();
        fields.push(("md5", self.checksum.clone()));
        fields
    }
}

/// Server acknowledgement of one chunk PUT.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ChunkReceipt {
    /// Resource URL allocated for the upload; required on the first ack.
    #[serde(default)]
    pub url: Option<String>,
    /// Next byte the server expects.
    pub offset: u64,
}

/// Everything a caller must persist to resume an interrupted upload.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ResumePoint {
    pub resource_url: String,
    pub next_offset: u64,
    #[serde(default)]
    pub auth_token: Option<String>,
}

/// State of one upload attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferSession {
    /// Server-allocated resource, unset until the first chunk is accepted.
    pub resource_url: Option<String>,
    pub next_offset: u64,
    pub auth_token: Option<String>,
    pub completed: bool,
}

impl TransferSession {
    /// Applies a chunk acknowledgement for a chunk that started at `chunk_start`.
    ///
    /// The server-reported offset becomes `next_offset` even when it differs
    /// from the chunk's local end. Returns whether the server made progress.
    pub(crate) fn acknowledge(
        &mut self,
        receipt: ChunkReceipt,
        chunk_start: u64,
        declared_size: u64,
    ) -> Result<bool, UploadError> {
        if self.resource_url.is_none() && receipt.url.is_none() {
            return Err(UploadError::ProtocolViolation(
                "first chunk acknowledgement carried no url".to_string(),
            ));
        }
        if receipt.offset > declared_size {
            return Err(UploadError::ProtocolViolation(format!(
                "server offset {} is past the end of a {} byte file",
                receipt.offset, declared_size
            )));
        }
        if receipt.offset < chunk_start {
            return Err(UploadError::ProtocolViolation(format!(
                "server offset {} went backwards from {}",
                receipt.offset, chunk_start
            )));
        }

        if self.resource_url.is_none() {
            self.resource_url = receipt.url;
        }
        self.next_offset = receipt.offset;
        Ok(receipt.offset > chunk_start)
    }

    /// Snapshot for external persistence; `None` before the first chunk is accepted.
    pub fn resume_point(&self) -> Option<ResumePoint> {
        self.resource_url.as_ref().map(|url| ResumePoint {
            resource_url: url.clone(),
            next_offset: self.next_offset,
            auth_token: self.auth_token.clone(),
        })
    }
}

/// How the file is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadMode {
    /// Resumable, one PUT per chunk followed by a finalize POST.
    Chunked,
    /// The whole file in a single POST.
    SingleShot,
}

/// Stage of the upload state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    NotStarted,
    Authenticating,
    UploadingChunk,
    AwaitingNextOffset,
    Finalizing,
    Done,
    /// Absorbing until `reset` or `resume`.
    Failed,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn receipt(url: Option<&str>, offset: u64) -> ChunkReceipt {
        ChunkReceipt {
            url: url.map(str::to_string),
            offset,
        }
    }

    #[test]
    fn test_base_url() {
        let mut config = UploadConfig {
            host: "example.org".to_string(),
            ..Default::default()
        };
        assert_eq!(config.base_url(), "https://example.org/");

        config.use_https = false;
        config.port = Some(8080);
        assert_eq!(config.base_url(), "http://example.org:8080/");
    }

    #[test]
    fn test_display_name_defaults_to_basename() {
        let mut config = UploadConfig {
            upload_file: PathBuf::from("/data/aois/bear_creek.zip"),
            ..Default::default()
        };
        assert_eq!(config.display_name(), "bear_creek.zip");

        config.filename = Some("Bear Creek".to_string());
        assert_eq!(config.display_name(), "Bear Creek");
    }

    #[test]
    fn test_form_fields_skip_unset_options() {
        let target = UploadTarget {
            filename: "a.zip".to_string(),
            declared_size: 10,
            checksum: "0123".to_string(),
            comment: None,
            parent_id: Some("p-1".to_string()),
        };
        assert_eq!(
            target.form_fields(),
            vec![("filename", "a.zip".to_string()), ("parent_object_id", "p-1".to_string())]
        );
        assert_eq!(target.form_fields_with_checksum().last().unwrap().0, "md5");
    }

    #[test]
    fn test_receipt_parsing() {
        let first: ChunkReceipt =
            serde_json::from_str(r#"{"url": "https://h/api/rest/aois/7/", "offset": 42}"#).unwrap();
        assert_eq!(first, receipt(Some("https://h/api/rest/aois/7/"), 42));

        let next: ChunkReceipt = serde_json::from_str(r#"{"offset": 84}"#).unwrap();
        assert_eq!(next.url, None);

        assert!(serde_json::from_str::<ChunkReceipt>(r#"{"url": "x"}"#).is_err());
    }

    #[test]
    fn test_acknowledge_adopts_first_url_only() {
        let mut session = TransferSession::default();
        assert!(session.acknowledge(receipt(Some("u1"), 10), 0, 100).unwrap());
        assert!(session
            .acknowledge(receipt(Some("u2"), 20), 10, 100)
            .unwrap());
        assert_eq!(session.resource_url.as_deref(), Some("u1"));
        assert_eq!(session.next_offset, 20);
        assert!(!session.completed);
    }

    #[test]
    fn test_acknowledge_rejects_unusable_offsets() {
        let mut session = TransferSession::default();
        assert!(matches!(
            session.acknowledge(receipt(None, 10), 0, 100),
            Err(UploadError::ProtocolViolation(_))
        ));

        session.resource_url = Some("u".to_string());
        assert!(matches!(
            session.acknowledge(receipt(None, 101), 0, 100),
            Err(UploadError::ProtocolViolation(_))
        ));
        assert!(matches!(
            session.acknowledge(receipt(None, 5), 10, 100),
            Err(UploadError::ProtocolViolation(_))
        ));
        // a stall is not a violation on its own
        assert!(!session.acknowledge(receipt(None, 10), 10, 100).unwrap());
    }

    #[test]
    fn test_resume_point_requires_resource() {
        let mut session = TransferSession::default();
        assert!(session.resume_point().is_none());

        session.resource_url = Some("u".to_string());
        session.next_offset = 4096;
        let point = session.resume_point().unwrap();
        assert_eq!(point.next_offset, 4096);
        assert_eq!(point.auth_token, None);
    }
}
