//! Error types for upload operations.

use reqwest::StatusCode;
use std::io;
use thiserror::Error;

/// Errors that can occur during an upload.
#[derive(Error, Debug)]
pub enum UploadError {
    /// I/O error while reading the input file.
    #[error(transparent)]
    IoError(#[from] io::Error),

    /// Transport-level HTTP failure (connect, timeout, body stream).
    #[error(transparent)]
    ReqwestError(#[from] reqwest::Error),

    /// JSON serialization/deserialization error.
    #[error(transparent)]
    SerdeJsonError(#[from] serde_json::Error),

    /// The token endpoint answered without a usable token.
    #[error("username and/or password seems to be incorrect")]
    Authentication,

    /// The server answered with a non-success status.
    #[error("HTTP {status}: {detail}")]
    HttpStatus {
        /// Status code returned by the server.
        status: StatusCode,
        /// Response body, kept for diagnostics.
        detail: String,
    },

    /// A chunk acknowledgement could not be used to determine resumption state.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// The operation is not allowed in the uploader's current state.
    #[error("Invalid upload state: {0}")]
    InvalidState(String),
}

impl UploadError {
    /// Whether re-sending the same request could succeed.
    ///
    /// Transport failures, server errors, request timeouts and rate limiting
    /// are transient. Everything else fails the session immediately.
    pub fn is_transient(&self) -> bool {
        match self {
            UploadError::ReqwestError(_) => true,
            UploadError::HttpStatus { status, .. } => {
                status.is_server_error()
                    || *status == StatusCode::REQUEST_TIMEOUT
                    || *status == StatusCode::TOO_MANY_REQUESTS
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_error(code: u16) -> UploadError {
        UploadError::HttpStatus {
            status: StatusCode::from_u16(code).unwrap(),
            detail: String::new(),
        }
    }

    #[test]
    fn test_server_errors_are_transient() {
        assert!(status_error(500).is_transient());
        assert!(status_error(503).is_transient());
        assert!(status_error(408).is_transient());
        assert!(status_error(429).is_transient());
    }

    #[test]
    fn test_client_errors_are_permanent() {
        assert!(!status_error(400).is_transient());
        assert!(!status_error(403).is_transient());
        assert!(!UploadError::Authentication.is_transient());
        assert!(!UploadError::ProtocolViolation("no offset".into()).is_transient());
    }
}
