use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use thiserror::Error;
use serde::{Serialize, Deserialize};
use futures_util::StreamExt;

use crate::config::DownloaderConfig;
use crate::control::ControlSignals;
use crate::events::{DownloadEvent, DownloadObserver, ProgressUpdate, TransferOutcome};
use crate::integrity::{matches_sha256, IntegrityError, StreamingChecksum};
use crate::limiter::BandwidthAllocator;
use crate::models::{temporary_path, DownloadKey, SourceLocator};
use crate::registry::{DownloadRegistry, RegistryGuard};
use crate::source::{RemoteResourceFetcher, RemoteStream};

/// Custom errors for download operations.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("{0} is already being downloaded")]
    DuplicateInFlight(DownloadKey),
    #[error("could not list files of {repo_id}: {reason}")]
    ListingFailure { repo_id: String, reason: String },
    #[error("could not open {filename}: {reason}")]
    Connect { filename: String, reason: String },
    #[error("transfer of {filename} interrupted: {source}")]
    Stream {
        filename: String,
        #[source]
        source: std::io::Error,
    },
    #[error("download cancelled")]
    Cancelled,
    #[error("filesystem error at {}: {source}", path.display())]
    FileSystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("integrity check failed for {filename}: {source}")]
    Integrity {
        filename: String,
        #[source]
        source: IntegrityError,
    },
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Copyable classification of a [`DownloadError`], carried in events.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorKind {
    DuplicateInFlight,
    ListingFailure,
    ConnectError,
    StreamError,
    Cancelled,
    FileSystemError,
    IntegrityError,
    ConfigError,
}

impl DownloadError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DownloadError::DuplicateInFlight(_) => ErrorKind::DuplicateInFlight,
            DownloadError::ListingFailure { .. } => ErrorKind::ListingFailure,
            DownloadError::Connect { .. } => ErrorKind::ConnectError,
            DownloadError::Stream { .. } => ErrorKind::StreamError,
            DownloadError::Cancelled => ErrorKind::Cancelled,
            DownloadError::FileSystem { .. } => ErrorKind::FileSystemError,
            DownloadError::Integrity { .. } => ErrorKind::IntegrityError,
            DownloadError::Config(_) => ErrorKind::ConfigError,
        }
    }

    fn file_system(path: &Path, source: std::io::Error) -> Self {
        DownloadError::FileSystem { path: path.to_path_buf(), source }
    }
}

/// Per-transfer knobs taken from [`DownloaderConfig`].
#[derive(Debug, Clone, Copy)]
pub struct TransferSettings {
    pub chunk_size: usize,
    pub progress_interval: Duration,
    pub pause_poll: Duration,
    pub resume: bool,
}

impl From<&DownloaderConfig> for TransferSettings {
    fn from(config: &DownloaderConfig) -> Self {
        Self {
            chunk_size: config.chunk_size(),
            progress_interval: config.progress_interval(),
            pause_poll: config.pause_poll(),
            resume: config.resume,
        }
    }
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self::from(&DownloaderConfig::default())
    }
}

/// Everything a worker shares with its siblings.
#[derive(Clone)]
pub struct TransferContext {
    pub fetcher: Arc<dyn RemoteResourceFetcher>,
    pub registry: DownloadRegistry,
    pub allocator: BandwidthAllocator,
    pub observer: Arc<dyn DownloadObserver>,
    pub settings: TransferSettings,
}

/// Result of a transfer that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transferred {
    Downloaded { bytes: u64 },
    /// The destination was already there and `resume` was on.
    AlreadyPresent,
}

/// Downloads a single file into place.
#[derive(Debug, Clone)]
pub struct TransferWorker {
    pub locator: SourceLocator,
    pub destination: PathBuf,
    pub expected_sha256: Option<String>,
}

impl TransferWorker {
    pub fn new(locator: SourceLocator, destination: PathBuf) -> Self {
        Self { locator, destination, expected_sha256: None }
    }

    pub fn with_sha256(mut self, sha256: Option<String>) -> Self {
        self.expected_sha256 = sha256;
        self
    }

    /// Runs the transfer and reports its outcome.
    ///
    /// Errors never escape as panics; they come back as `Err` and, except for
    /// duplicate rejections, as exactly one `Completed` event. That event is
    /// sent only after the registry key and the bandwidth share are released.
    pub async fn run(
        &self,
        ctx: &TransferContext,
        signals: &ControlSignals,
    ) -> Result<Transferred, DownloadError> {
        let repo_id = self.locator.repo_id.clone();
        let filename = self.locator.filename.clone();

        let result = self.transfer(ctx, signals).await;

        let outcome = match &result {
            Ok(Transferred::Downloaded { bytes }) => {
                tracing::info!(%repo_id, %filename, bytes, "download finished");
                ctx.observer.on_event(DownloadEvent::Status(format!(
                    "Successfully downloaded: {}",
                    filename
                )));
                TransferOutcome::Succeeded
            }
            Ok(Transferred::AlreadyPresent) => {
                tracing::info!(%repo_id, %filename, "already present, skipping");
                ctx.observer.on_event(DownloadEvent::Status(format!(
                    "Already present: {}",
                    filename
                )));
                TransferOutcome::Succeeded
            }
            Err(DownloadError::DuplicateInFlight(key)) => {
                tracing::warn!(%key, "transfer already running, not starting another");
                ctx.observer.on_event(DownloadEvent::Status(format!(
                    "{} is already being downloaded. Skipping.",
                    filename
                )));
                return result;
            }
            Err(DownloadError::Cancelled) => {
                tracing::info!(%repo_id, %filename, "download cancelled");
                ctx.observer.on_event(DownloadEvent::Status(format!(
                    "Download cancelled: {}",
                    filename
                )));
                TransferOutcome::Failed {
                    kind: ErrorKind::Cancelled,
                    message: DownloadError::Cancelled.to_string(),
                }
            }
            Err(e) => {
                tracing::warn!(%repo_id, %filename, error = %e, "download failed");
                ctx.observer.on_event(DownloadEvent::Status(format!(
                    "Error downloading {}: {}",
                    filename, e
                )));
                TransferOutcome::Failed { kind: e.kind(), message: e.to_string() }
            }
        };

        ctx.observer.on_event(DownloadEvent::Completed { repo_id, filename, outcome });
        result
    }

    /// The transfer proper. Registry and allocator guards live in this frame,
    /// so they are dropped by the time `run` reports the outcome.
    async fn transfer(
        &self,
        ctx: &TransferContext,
        signals: &ControlSignals,
    ) -> Result<Transferred, DownloadError> {
        validate_relative(&self.locator.filename, &self.destination)?;

        if signals.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }

        if ctx.settings.resume && self.already_present().await? {
            return Ok(Transferred::AlreadyPresent);
        }

        let key = self.locator.key();
        let claim = ctx
            .registry
            .claim(key.clone())
            .ok_or_else(|| DownloadError::DuplicateInFlight(key.clone()))?;
        let _allocation = ctx.allocator.register(key);

        ctx.observer.on_event(DownloadEvent::Status(format!(
            "Downloading {}...",
            self.locator.filename
        )));
        ctx.observer.on_event(DownloadEvent::Started {
            repo_id: self.locator.repo_id.clone(),
            filename: self.locator.filename.clone(),
        });

        if let Some(parent) = self.destination.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DownloadError::file_system(parent, e))?;
        }

        let remote = tokio::select! {
            biased;
            _ = signals.cancelled() => return Err(DownloadError::Cancelled),
            opened = ctx.fetcher.open_stream(&self.locator) => opened?,
        };
        tracing::debug!(filename = %self.locator.filename, total = ?remote.total_len, "stream opened");

        let temp_path = temporary_path(&self.destination);
        let mut file = File::create(&temp_path)
            .await
            .map_err(|e| DownloadError::file_system(&temp_path, e))?;

        let mut checksum = self.expected_sha256.as_ref().map(|_| StreamingChecksum::new());
        let streamed = self
            .stream_body(ctx, signals, &claim, remote, &mut file, checksum.as_mut())
            .await;
        // Whatever was written stays on disk, including after cancel or error.
        let flushed = file.flush().await;
        drop(file);
        let (downloaded, total) = streamed?;
        flushed.map_err(|source| DownloadError::Stream {
            filename: self.locator.filename.clone(),
            source,
        })?;
        self.emit_progress(ctx, downloaded, total);

        if let (Some(checksum), Some(expected)) = (checksum, self.expected_sha256.as_deref()) {
            checksum.verify(expected).map_err(|source| DownloadError::Integrity {
                filename: self.locator.filename.clone(),
                source,
            })?;
        }

        match tokio::fs::remove_file(&self.destination).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(DownloadError::file_system(&self.destination, e)),
        }
        tokio::fs::rename(&temp_path, &self.destination)
            .await
            .map_err(|e| DownloadError::file_system(&self.destination, e))?;

        Ok(Transferred::Downloaded { bytes: downloaded })
    }

    /// Copies the remote body into `file` slice by slice, honouring cancel,
    /// pause and the bandwidth allowance. Returns bytes written and the
    /// advertised total.
    async fn stream_body(
        &self,
        ctx: &TransferContext,
        signals: &ControlSignals,
        claim: &RegistryGuard,
        remote: RemoteStream,
        file: &mut File,
        mut checksum: Option<&mut StreamingChecksum>,
    ) -> Result<(u64, Option<u64>), DownloadError> {
        let total = remote.total_len;
        let mut body = remote.body;
        let settings = ctx.settings;
        let started = Instant::now();
        let mut paused_for = Duration::ZERO;
        let mut last_progress = started;
        let mut downloaded: u64 = 0;

        loop {
            let next = tokio::select! {
                biased;
                _ = signals.cancelled() => return Err(DownloadError::Cancelled),
                next = body.next() => next,
            };
            let bytes = match next {
                None => break,
                Some(Ok(bytes)) => bytes,
                Some(Err(source)) => {
                    return Err(DownloadError::Stream {
                        filename: self.locator.filename.clone(),
                        source,
                    })
                }
            };

            for piece in bytes.chunks(settings.chunk_size) {
                if signals.is_cancelled() {
                    return Err(DownloadError::Cancelled);
                }
                if signals.is_paused() {
                    let paused_at = Instant::now();
                    if !signals.wait_while_paused(settings.pause_poll).await {
                        return Err(DownloadError::Cancelled);
                    }
                    paused_for += paused_at.elapsed();
                }

                file.write_all(piece).await.map_err(|source| DownloadError::Stream {
                    filename: self.locator.filename.clone(),
                    source,
                })?;
                if let Some(checksum) = checksum.as_deref_mut() {
                    checksum.update(piece);
                }
                downloaded += piece.len() as u64;
                claim.record_progress(downloaded);

                // Time spent paused does not count as transfer time.
                let active_time = started.elapsed().saturating_sub(paused_for);
                if let Some(delay) = ctx.allocator.throttle_delay(downloaded, active_time) {
                    if !signals.sleep(delay).await {
                        return Err(DownloadError::Cancelled);
                    }
                }

                if last_progress.elapsed() >= settings.progress_interval {
                    last_progress = Instant::now();
                    self.emit_progress(ctx, downloaded, total);
                }
            }
        }

        Ok((downloaded, total))
    }

    async fn already_present(&self) -> Result<bool, DownloadError> {
        match tokio::fs::metadata(&self.destination).await {
            Ok(meta) if meta.is_file() => {}
            _ => return Ok(false),
        }
        match self.expected_sha256.as_deref() {
            None => Ok(true),
            Some(expected) => matches_sha256(&self.destination, expected)
                .await
                .map_err(|source| DownloadError::Integrity {
                    filename: self.locator.filename.clone(),
                    source,
                }),
        }
    }

    fn emit_progress(&self, ctx: &TransferContext, downloaded: u64, total: Option<u64>) {
        let percent = total
            .filter(|t| *t > 0)
            .map(|t| (downloaded.saturating_mul(100) / t).min(100) as u8);
        ctx.observer.on_event(DownloadEvent::Progress(ProgressUpdate {
            repo_id: self.locator.repo_id.clone(),
            filename: self.locator.filename.clone(),
            percent,
            bytes_downloaded: downloaded,
            total_bytes: total,
        }));
    }
}

/// Remote names become local paths; refuse anything that could escape the
/// output directory.
fn validate_relative(filename: &str, destination: &Path) -> Result<(), DownloadError> {
    let safe = !filename.is_empty()
        && Path::new(filename)
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if safe {
        Ok(())
    } else {
        Err(DownloadError::file_system(
            destination,
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("refusing unsafe remote path {:?}", filename),
            ),
        ))
    }
}
