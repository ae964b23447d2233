//! Resumable upload state machine.

use crate::checksum::compute_file_md5;
use crate::chunk::{Chunk, ChunkSource};
use crate::client::SessionClient;
use crate::error::UploadError;
use crate::transport::{HttpTransport, Transport};
use crate::types::{
    ChunkReceipt, ResumePoint, TransferSession, UploadConfig, UploadMode, UploadState,
    UploadTarget,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use tokio_retry2::strategy::{jitter, ExponentialBackoff};
use tokio_retry2::{Retry, RetryError};
use tracing::{error, info, warn};

/// Upper bound for a single backoff delay between chunk retries.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Chunk-level retry settings.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Re-sends of one chunk after the first attempt.
    pub max_retries: usize,
    /// Backoff unit; the n-th retry waits up to `2^n` times this.
    pub base_delay: Duration,
}

impl RetryPolicy {
    fn strategy(&self) -> impl Iterator<Item = Duration> {
        let base = (self.base_delay.as_millis() as u64).max(1);
        ExponentialBackoff::from_millis(2)
            .factor(base)
            .max_delay(MAX_RETRY_DELAY)
            .map(jitter)
            .take(self.max_retries)
    }

    /// Pause before re-sending a range the server did not advance past.
    ///
    /// Doubles per consecutive stall from `base_delay`, capped at the
    /// maximum retry delay.
    fn stall_delay(&self, stalls: usize) -> Duration {
        let exponent = stalls.saturating_sub(1).min(16) as u32;
        self.base_delay
            .saturating_mul(1 << exponent)
            .min(MAX_RETRY_DELAY)
    }
}

/// Byte-level progress bar for an upload of `len` bytes.
pub fn upload_progress_bar(len: u64) -> ProgressBar {
    let progress_bar = ProgressBar::new(len);
    progress_bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.cyan} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg} | {elapsed_precise} elapsed, ETA {eta_precise}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓▒░ "),
    );
    progress_bar
}

/// Drives one file through the upload protocol.
///
/// In chunked mode the uploader authenticates (when credentials are
/// configured), PUTs chunks one at a time, moves its read cursor to whatever
/// offset the server acknowledges, and finalizes with the whole-file MD5
/// once the file is exhausted. Any error leaves it in
/// [`UploadState::Failed`] until [`reset`](Self::reset) or
/// [`resume`](Self::resume).
///
/// # Example
///
/// ```no_run
/// use chunkup::{UploadConfig, UploadMode, Uploader};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = UploadConfig {
///     upload_file: "aoi.zip".into(),
///     ..Default::default()
/// };
/// let mut uploader = Uploader::open(&config).await?;
/// let url = uploader.upload(UploadMode::Chunked).await?;
/// println!("{}", url);
/// # Ok(())
/// # }
/// ```
pub struct Uploader<T> {
    client: SessionClient<T>,
    source: ChunkSource,
    session: TransferSession,
    state: UploadState,
    retry: RetryPolicy,
    progress: ProgressBar,
}

impl Uploader<HttpTransport> {
    /// Opens the configured file and prepares an HTTP uploader for it.
    pub async fn open(config: &UploadConfig) -> Result<Self, UploadError> {
        let transport = HttpTransport::new(config.request_timeout)?;
        Self::with_transport(config, transport).await
    }
}

impl<T: Transport> Uploader<T> {
    /// Prepares an uploader that talks through `transport`.
    ///
    /// The checksum is computed here, before any request is made, and never
    /// again for the lifetime of the uploader.
    pub async fn with_transport(config: &UploadConfig, transport: T) -> Result<Self, UploadError> {
        info!("🔍 Computing MD5 for {}", config.upload_file.display());
        let checksum = compute_file_md5(&config.upload_file).await?;
        let source = ChunkSource::open(&config.upload_file, config.chunk_size).await?;

        let target = UploadTarget {
            filename: config.display_name(),
            declared_size: source.len(),
            checksum,
            comment: config.comment.clone(),
            parent_id: config.parent_object_id.clone(),
        };
        info!(
            "Prepared {} ({} bytes, md5 {})",
            target.filename, target.declared_size, target.checksum
        );

        let client = SessionClient::new(
            transport,
            config.base_url(),
            target,
            config.credentials.clone(),
        );

        Ok(Self {
            client,
            source,
            session: TransferSession::default(),
            state: UploadState::NotStarted,
            retry: RetryPolicy {
                max_retries: config.max_retries,
                base_delay: config.retry_base_delay,
            },
            progress: ProgressBar::hidden(),
        })
    }

    /// Reports byte progress on `progress_bar`.
    pub fn with_progress(mut self, progress_bar: ProgressBar) -> Self {
        progress_bar.set_length(self.client.target().declared_size);
        progress_bar.set_position(self.session.next_offset);
        self.progress = progress_bar;
        self
    }

    pub fn state(&self) -> UploadState {
        self.state
    }

    pub fn session(&self) -> &TransferSession {
        &self.session
    }

    pub fn target(&self) -> &UploadTarget {
        self.client.target()
    }

    /// Whether a finalize (or single-shot) request has succeeded.
    pub fn is_completed(&self) -> bool {
        self.session.completed
    }

    /// The allocated resource URL, or the collection endpoint before allocation.
    pub fn resource_url(&self) -> String {
        self.session
            .resource_url
            .clone()
            .unwrap_or_else(|| self.client.collection_url())
    }

    /// Uploads the file and returns the resulting resource URL.
    pub async fn upload(&mut self, mode: UploadMode) -> Result<String, UploadError> {
        match self.state {
            UploadState::Done => {
                return Err(UploadError::InvalidState(
                    "upload already completed; reset before uploading again".to_string(),
                ))
            }
            UploadState::Failed => {
                return Err(UploadError::InvalidState(
                    "previous attempt failed; reset or resume first".to_string(),
                ))
            }
            _ => {}
        }

        let result = match mode {
            UploadMode::Chunked => self.upload_chunked().await,
            UploadMode::SingleShot => self.upload_single_shot().await,
        };

        match result {
            Ok(url) => {
                self.progress.finish_with_message("✅ Upload complete");
                info!("✅ Upload of {} completed: {}", self.target().filename, url);
                Ok(url)
            }
            Err(e) => {
                self.state = UploadState::Failed;
                self.progress.abandon_with_message("❌ Upload failed!");
                error!(
                    "Upload of {} failed at offset {}: {}",
                    self.target().filename,
                    self.session.next_offset,
                    e
                );
                Err(e)
            }
        }
    }

    /// Re-seeds the session from a previously persisted resume point.
    ///
    /// The next [`upload`](Self::upload) skips the initial PUT and starts at
    /// `point.next_offset`. When credentials are configured and the point
    /// carries a token, authentication is skipped too; an anonymous uploader
    /// ignores the token.
    pub fn resume(&mut self, point: ResumePoint) -> Result<(), UploadError> {
        if self.state == UploadState::Done {
            return Err(UploadError::InvalidState(
                "upload already completed; nothing to resume".to_string(),
            ));
        }
        let declared_size = self.target().declared_size;
        if point.next_offset > declared_size {
            return Err(UploadError::ProtocolViolation(format!(
                "resume offset {} is past the end of a {} byte file",
                point.next_offset, declared_size
            )));
        }

        info!(
            "Resuming {} at byte {} of {}",
            point.resource_url, point.next_offset, declared_size
        );
        let auth_token = point.auth_token.filter(|_| self.client.has_credentials());
        if let Some(token) = &auth_token {
            self.client.seed_token(token.clone());
        }
        self.session = TransferSession {
            resource_url: Some(point.resource_url),
            next_offset: point.next_offset,
            auth_token,
            completed: false,
        };
        self.source.seek(point.next_offset);
        self.progress.set_position(point.next_offset);
        self.state = UploadState::NotStarted;
        Ok(())
    }

    /// Starts over: clears the resource URL and rewinds to byte 0.
    ///
    /// `new_name` renames the upload for the next attempt. A cached token is
    /// kept.
    pub fn reset(&mut self, new_name: Option<String>) {
        if let Some(name) = new_name {
            self.client.rename(name);
        }
        self.session = TransferSession {
            auth_token: self.client.token().map(str::to_string),
            ..Default::default()
        };
        self.source.seek(0);
        self.progress.reset();
        self.state = UploadState::NotStarted;
    }

    async fn authenticate_if_needed(&mut self) -> Result<(), UploadError> {
        if !self.client.has_credentials() || self.client.token().is_some() {
            return Ok(());
        }
        self.state = UploadState::Authenticating;
        let token = self.client.authenticate(false).await?;
        self.session.auth_token = Some(token);
        Ok(())
    }

    async fn upload_chunked(&mut self) -> Result<String, UploadError> {
        self.authenticate_if_needed().await?;

        let declared_size = self.target().declared_size;
        self.source.seek(self.session.next_offset);
        let mut stalls = 0;

        loop {
            self.state = UploadState::UploadingChunk;
            let Some(chunk) = self.source.next_chunk().await? else {
                break;
            };

            let receipt = self.put_chunk_with_retry(&chunk).await?;
            self.state = UploadState::AwaitingNextOffset;

            if self
                .session
                .acknowledge(receipt, chunk.start_offset, declared_size)?
            {
                stalls = 0;
            } else {
                stalls += 1;
                warn!(
                    "Server accepted no bytes of {}-{} ({} in a row)",
                    chunk.start_offset, chunk.end_offset, stalls
                );
                if stalls > self.retry.max_retries {
                    return Err(UploadError::ProtocolViolation(format!(
                        "server stopped advancing at offset {}",
                        chunk.start_offset
                    )));
                }
                tokio::time::sleep(self.retry.stall_delay(stalls)).await;
            }

            let next_offset = self.session.next_offset;
            if next_offset != chunk.end_offset {
                info!(
                    "Server acknowledged through byte {} after {}-{}; continuing from the server offset",
                    next_offset, chunk.start_offset, chunk.end_offset
                );
            }
            self.source.seek(next_offset);
            self.progress.set_position(next_offset);
        }

        self.state = UploadState::Finalizing;
        self.client.post_finalize(&self.session).await?;
        self.session.completed = true;
        self.state = UploadState::Done;
        Ok(self.resource_url())
    }

    async fn upload_single_shot(&mut self) -> Result<String, UploadError> {
        self.authenticate_if_needed().await?;

        let payload = self.source.read_all().await?;
        self.client.post_single_shot(payload).await?;

        self.session.completed = true;
        self.state = UploadState::Done;
        self.progress.set_position(self.target().declared_size);
        Ok(self.client.collection_url())
    }

    /// PUTs `chunk`, re-sending the same range on transient failures.
    async fn put_chunk_with_retry(&self, chunk: &Chunk) -> Result<ChunkReceipt, UploadError> {
        let client = &self.client;
        let session = &self.session;

        Retry::spawn(self.retry.strategy(), move || async move {
            match client.put_chunk(session, chunk).await {
                Ok(receipt) => Ok(receipt),
                Err(e) if e.is_transient() => {
                    warn!(
                        "Chunk {}-{} failed, retrying: {}",
                        chunk.start_offset, chunk.end_offset, e
                    );
                    RetryError::to_transient(e)
                }
                Err(e) => RetryError::to_permanent(e),
            }
        })
        .await
    }
}
