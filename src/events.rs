// src/events.rs

use crate::downloader::ErrorKind;
use tokio::sync::mpsc;

/// Progress of one file, sent at most once per progress interval.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub repo_id: String,
    pub filename: String,
    /// Whole percent, only when the total size is known.
    pub percent: Option<u8>,
    pub bytes_downloaded: u64,
    pub total_bytes: Option<u64>,
}

/// How a file transfer ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    Succeeded,
    Failed { kind: ErrorKind, message: String },
}

impl TransferOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TransferOutcome::Succeeded)
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            TransferOutcome::Succeeded => None,
            TransferOutcome::Failed { kind, .. } => Some(*kind),
        }
    }
}

/// Notifications for whatever presents the downloads.
#[derive(Debug, Clone, PartialEq)]
pub enum DownloadEvent {
    FileListReady { repo_id: String, files: Vec<String> },
    Started { repo_id: String, filename: String },
    Progress(ProgressUpdate),
    Status(String),
    /// Terminal event for a file, emitted exactly once per transfer.
    Completed {
        repo_id: String,
        filename: String,
        outcome: TransferOutcome,
    },
}

/// Receives download events. Implementations must not block.
pub trait DownloadObserver: Send + Sync {
    fn on_event(&self, event: DownloadEvent);
}

/// Forwards events into a channel; a closed receiver is ignored.
impl DownloadObserver for mpsc::UnboundedSender<DownloadEvent> {
    fn on_event(&self, event: DownloadEvent) {
        let _ = self.send(event);
    }
}

/// Drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl DownloadObserver for NoopObserver {
    fn on_event(&self, _event: DownloadEvent) {}
}

/// Writes events to the `tracing` log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl DownloadObserver for TracingObserver {
    fn on_event(&self, event: DownloadEvent) {
        match event {
            DownloadEvent::FileListReady { repo_id, files } => {
                tracing::info!(%repo_id, count = files.len(), "file list ready");
            }
            DownloadEvent::Started { repo_id, filename } => {
                tracing::info!(%repo_id, %filename, "download started");
            }
            DownloadEvent::Progress(p) => {
                tracing::info!(
                    filename = %p.filename,
                    percent = ?p.percent,
                    bytes_downloaded = p.bytes_downloaded,
                    total_bytes = ?p.total_bytes,
                    "download progress",
                );
            }
            DownloadEvent::Status(message) => tracing::info!("{}", message),
            DownloadEvent::Completed { repo_id, filename, outcome } => match outcome {
                TransferOutcome::Succeeded => {
                    tracing::info!(%repo_id, %filename, "download completed");
                }
                TransferOutcome::Failed { kind, message } => {
                    tracing::warn!(%repo_id, %filename, ?kind, "download failed: {}", message);
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_observer_forwards_and_tolerates_closed_receiver() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.on_event(DownloadEvent::Status("hello".into()));
        assert_eq!(rx.try_recv().unwrap(), DownloadEvent::Status("hello".into()));

        drop(rx);
        tx.on_event(DownloadEvent::Status("nobody listening".into()));
    }
}
