//! ChunkUp - resumable, checksum-verified chunked uploads over HTTP
//!
//! This library uploads one large local file to an upload service that
//! accepts byte ranges with `Content-Range`, allocates a resource URL on the
//! first accepted chunk, and verifies the finished upload against an MD5
//! checksum sent with the final request.
//!
//! # Features
//!
//! - **Server-Authoritative Offsets**: Every chunk continues from the offset the server acknowledged
//! - **Resumable Uploads**: Re-seed an interrupted upload from a persisted [`ResumePoint`]
//! - **MD5 Verification**: Whole-file checksum computed once, before any network I/O
//! - **Automatic Retry**: Exponential backoff for transient chunk failures
//! - **Single-Shot Mode**: Send small files in one request
//!
//! # Example
//!
//! ```no_run
//! use chunkup::{Credentials, UploadConfig, UploadMode, Uploader};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = UploadConfig {
//!     upload_file: "bear_creek.zip".into(),
//!     credentials: Some(Credentials {
//!         username: "ada".to_string(),
//!         password: "secret".to_string(),
//!     }),
//!     ..Default::default()
//! };
//!
//! let mut uploader = Uploader::open(&config).await?;
//! let url = uploader.upload(UploadMode::Chunked).await?;
//! println!("Uploaded to {}", url);
//! # Ok(())
//! # }
//! ```

mod checksum;
mod chunk;
mod client;
mod error;
mod transport;
mod types;
mod upload;

#[cfg(test)]
mod testing;

pub use checksum::compute_file_md5;
pub use chunk::{Chunk, ChunkSource};
pub use client::SessionClient;
pub use error::UploadError;
pub use transport::{FilePart, FormRequest, HttpReply, HttpTransport, Transport};
pub use types::{
    ChunkReceipt, Credentials, ResumePoint, TransferSession, UploadConfig, UploadMode,
    UploadState, UploadTarget, AUTH_PATH, DEFAULT_CHUNK_SIZE, DEFAULT_HOST, UPLOAD_PATH,
};
pub use upload::{upload_progress_bar, RetryPolicy, Uploader};
