// src/manager.rs

use crate::config::DownloaderConfig;
use crate::continuation::ContinuationResolver;
use crate::control::ControlSignals;
use crate::downloader::{
    DownloadError, ErrorKind, TransferContext, TransferSettings, TransferWorker, Transferred,
};
use crate::events::{DownloadEvent, DownloadObserver};
use crate::limiter::BandwidthAllocator;
use crate::models::{DownloadKey, RemoteFile, SourceLocator};
use crate::ordering::FileOrderPolicy;
use crate::registry::DownloadRegistry;
use crate::source::{RemoteResourceFetcher, RepositoryFileLister};
use futures_util::future::BoxFuture;
use futures_util::{stream, FutureExt, StreamExt};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

/// Per-batch choices. Defaults come from [`DownloaderConfig`].
#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    pub revision: Option<String>,
    /// Only these paths are downloaded when set.
    pub file_filter: Option<HashSet<String>>,
    pub resume: bool,
    pub auto_continue: bool,
}

impl BatchOptions {
    pub fn from_config(config: &DownloaderConfig) -> Self {
        Self {
            revision: None,
            file_filter: None,
            resume: config.resume,
            auto_continue: config.auto_continue,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFailure {
    pub filename: String,
    pub kind: ErrorKind,
    pub message: String,
}

/// What happened after a batch, regarding the next `partN` repository.
#[derive(Debug)]
pub enum Continuation {
    Started(Box<BatchOutcome>),
    /// The next part was already running; nothing was queued.
    AlreadyActive(String),
    Failed { repo_id: String, error: DownloadError },
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub repo_id: String,
    pub succeeded: Vec<String>,
    pub failed: Vec<FileFailure>,
    /// Files never started because the run was cancelled first.
    pub not_started: Vec<String>,
    pub cancelled: bool,
    pub continuation: Option<Continuation>,
}

impl BatchReport {
    pub fn all_succeeded(&self) -> bool {
        !self.cancelled && self.failed.is_empty() && self.not_started.is_empty()
    }
}

#[derive(Debug)]
pub enum BatchOutcome {
    /// The repository was already being downloaded. No work was done.
    Skipped,
    Finished(BatchReport),
}

impl BatchOutcome {
    pub fn report(&self) -> Option<&BatchReport> {
        match self {
            BatchOutcome::Skipped => None,
            BatchOutcome::Finished(report) => Some(report),
        }
    }
}

/// Drives the transfers of whole repositories.
pub struct DownloadOrchestrator {
    config: DownloaderConfig,
    lister: Arc<dyn RepositoryFileLister>,
    ctx: TransferContext,
}

impl DownloadOrchestrator {
    pub fn new(
        config: DownloaderConfig,
        lister: Arc<dyn RepositoryFileLister>,
        fetcher: Arc<dyn RemoteResourceFetcher>,
        observer: Arc<dyn DownloadObserver>,
    ) -> Self {
        let allocator =
            BandwidthAllocator::new(config.rate_limit_bytes(), config.min_worker_bytes());
        Self::with_shared_state(config, lister, fetcher, observer, DownloadRegistry::new(), allocator)
    }

    /// Builds an orchestrator on an existing registry and allocator so that
    /// several orchestrators share dedup and one bandwidth budget.
    pub fn with_shared_state(
        config: DownloaderConfig,
        lister: Arc<dyn RepositoryFileLister>,
        fetcher: Arc<dyn RemoteResourceFetcher>,
        observer: Arc<dyn DownloadObserver>,
        registry: DownloadRegistry,
        allocator: BandwidthAllocator,
    ) -> Self {
        let ctx = TransferContext {
            fetcher,
            registry,
            allocator,
            observer,
            settings: TransferSettings::from(&config),
        };
        Self { config, lister, ctx }
    }

    pub fn config(&self) -> &DownloaderConfig {
        &self.config
    }

    pub fn registry(&self) -> &DownloadRegistry {
        &self.ctx.registry
    }

    pub fn allocator(&self) -> &BandwidthAllocator {
        &self.ctx.allocator
    }

    pub fn batch_options(&self) -> BatchOptions {
        BatchOptions::from_config(&self.config)
    }

    pub fn destination_for(&self, filename: &str) -> PathBuf {
        self.config.output_dir.join(filename)
    }

    fn status(&self, message: impl Into<String>) {
        self.ctx.observer.on_event(DownloadEvent::Status(message.into()));
    }

    /// Lists and orders a repository, announcing the result. A failed listing
    /// is announced as an empty list and returned as `ListingFailure`.
    pub async fn list_files(
        &self,
        repo_id: &str,
        revision: Option<&str>,
    ) -> Result<Vec<RemoteFile>, DownloadError> {
        self.status(format!("Retrieving file list for {}...", repo_id));

        let listed = self.lister.list_files(repo_id, revision).await;
        let files = match listed {
            Ok(files) => FileOrderPolicy::order(files),
            Err(e) => {
                tracing::warn!(%repo_id, error = %e, "listing failed");
                self.status(format!("Error retrieving files: {}", e));
                self.status("No files found or error retrieving file list.");
                self.ctx.observer.on_event(DownloadEvent::FileListReady {
                    repo_id: repo_id.to_string(),
                    files: Vec::new(),
                });
                return Err(match e {
                    DownloadError::ListingFailure { .. } => e,
                    other => DownloadError::ListingFailure {
                        repo_id: repo_id.to_string(),
                        reason: other.to_string(),
                    },
                });
            }
        };

        if files.is_empty() {
            self.status("No files found or error retrieving file list.");
        } else {
            self.status(format!("Found: {} files to download", files.len()));
        }
        self.ctx.observer.on_event(DownloadEvent::FileListReady {
            repo_id: repo_id.to_string(),
            files: files.iter().map(|f| f.path.clone()).collect(),
        });
        Ok(files)
    }

    /// Downloads a repository.
    ///
    /// Returns `Skipped` without touching the network if the repository is
    /// already being downloaded. Individual file failures are collected in
    /// the report and never stop the batch. The repository key is released on
    /// every path out of this function.
    pub fn start_batch<'a>(
        &'a self,
        repo_id: &'a str,
        options: &'a BatchOptions,
        signals: &'a ControlSignals,
    ) -> BoxFuture<'a, Result<BatchOutcome, DownloadError>> {
        self.run_batch(repo_id, options, signals).boxed()
    }

    async fn run_batch(
        &self,
        repo_id: &str,
        options: &BatchOptions,
        signals: &ControlSignals,
    ) -> Result<BatchOutcome, DownloadError> {
        let Some(repo_claim) = self.ctx.registry.claim(DownloadKey::repo(repo_id)) else {
            tracing::info!(%repo_id, "batch already running, skipping");
            self.status(format!("Model {} is already being downloaded. Skipping.", repo_id));
            return Ok(BatchOutcome::Skipped);
        };

        tracing::info!(%repo_id, revision = ?options.revision, "starting batch");
        self.status(format!("Starting downloads for {}...", repo_id));

        let mut files = self.list_files(repo_id, options.revision.as_deref()).await?;
        if let Some(filter) = &options.file_filter {
            files.retain(|f| filter.contains(&f.path));
        }

        let mut report = self.download_files(repo_id, files, options, signals).await;
        report.cancelled = signals.is_cancelled();

        if report.cancelled {
            self.status("Downloads canceled");
        } else {
            self.status("All downloads completed");
        }
        tracing::info!(
            %repo_id,
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            cancelled = report.cancelled,
            "batch finished"
        );

        if !report.cancelled && options.auto_continue {
            if let Some(next_id) = ContinuationResolver::next(repo_id) {
                drop(repo_claim);
                report.continuation = Some(self.continue_with(next_id, options, signals).await);
            }
        }

        Ok(BatchOutcome::Finished(report))
    }

    async fn download_files(
        &self,
        repo_id: &str,
        files: Vec<RemoteFile>,
        options: &BatchOptions,
        signals: &ControlSignals,
    ) -> BatchReport {
        let ctx = TransferContext {
            settings: TransferSettings { resume: options.resume, ..self.ctx.settings },
            ..self.ctx.clone()
        };
        let parallelism = match self.config.max_concurrent_files {
            0 => files.len().max(1),
            n => n,
        };

        let results: Vec<(String, Option<Result<Transferred, DownloadError>>)> =
            stream::iter(files.into_iter().map(|file| {
                let ctx = &ctx;
                async move {
                    if signals.is_cancelled() {
                        return (file.path, None);
                    }
                    let locator = SourceLocator::new(repo_id, file.path.clone())
                        .with_revision(options.revision.clone());
                    let worker = TransferWorker::new(locator, self.destination_for(&file.path))
                        .with_sha256(file.sha256.clone());
                    let result = worker.run(ctx, signals).await;
                    if result.is_err() && !signals.is_cancelled() {
                        self.status(format!(
                            "Download of {} failed. Continuing with next file...",
                            file.path
                        ));
                    }
                    (file.path, Some(result))
                }
            }))
            .buffer_unordered(parallelism)
            .collect()
            .await;

        let mut report = BatchReport {
            repo_id: repo_id.to_string(),
            ..BatchReport::default()
        };
        for (filename, result) in results {
            match result {
                None => report.not_started.push(filename),
                Some(Ok(_)) => report.succeeded.push(filename),
                Some(Err(e)) => report.failed.push(FileFailure {
                    filename,
                    kind: e.kind(),
                    message: e.to_string(),
                }),
            }
        }
        report
    }

    async fn continue_with(
        &self,
        next_id: String,
        options: &BatchOptions,
        signals: &ControlSignals,
    ) -> Continuation {
        if self.ctx.registry.contains(&DownloadKey::repo(&next_id)) {
            tracing::info!(%next_id, "next part already active");
            self.status(format!("Next part {} is already downloading. Not queuing.", next_id));
            return Continuation::AlreadyActive(next_id);
        }

        self.status(format!("Queuing next part: {}", next_id));
        // A part's revision and file names do not carry over to the next part.
        let next_options = BatchOptions {
            revision: None,
            file_filter: None,
            ..options.clone()
        };
        let started = self.start_batch(&next_id, &next_options, signals).await;
        match started {
            // Claimed by someone else after the check above.
            Ok(BatchOutcome::Skipped) => Continuation::AlreadyActive(next_id),
            Ok(outcome) => Continuation::Started(Box::new(outcome)),
            Err(error) => {
                tracing::warn!(%next_id, %error, "next part could not be downloaded");
                Continuation::Failed { repo_id: next_id, error }
            }
        }
    }

    /// Downloads one file outside any batch, replacing an existing copy.
    pub async fn start_single_file(
        &self,
        repo_id: &str,
        filename: &str,
        revision: Option<&str>,
        expected_sha256: Option<&str>,
        signals: &ControlSignals,
    ) -> Result<Transferred, DownloadError> {
        let ctx = TransferContext {
            settings: TransferSettings { resume: false, ..self.ctx.settings },
            ..self.ctx.clone()
        };
        let locator =
            SourceLocator::new(repo_id, filename).with_revision(revision.map(str::to_string));
        TransferWorker::new(locator, self.destination_for(filename))
            .with_sha256(expected_sha256.map(str::to_string))
            .run(&ctx, signals)
            .await
    }
}
