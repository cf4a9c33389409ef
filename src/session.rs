// src/session.rs

//! Control surface for one operator: the file table, the enable switches,
//! and the pause/cancel/rate controls that apply to running downloads.

use crate::config::DownloaderConfig;
use crate::control::ControlSignals;
use crate::downloader::{DownloadError, Transferred};
use crate::events::{DownloadEvent, DownloadObserver};
use crate::manager::{BatchOptions, BatchOutcome, BatchReport, DownloadOrchestrator};
use crate::models::{TaskStatus, TransferTask};
use crate::source::{RemoteResourceFetcher, RepositoryFileLister};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct TaskTable {
    repo_id: Option<String>,
    tasks: Vec<TransferTask>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::error!("session lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

/// Signals shared by every run currently in flight.
#[derive(Debug, Default)]
struct RunState {
    signals: ControlSignals,
    running: usize,
}

/// Counts one run as in flight until dropped.
struct RunGuard<'a> {
    state: &'a Mutex<RunState>,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        let mut state = lock(self.state);
        state.running = state.running.saturating_sub(1);
    }
}

/// Keeps the task table in step with worker notifications, then forwards
/// every event to the caller's observer.
struct TaskTracker {
    table: Arc<Mutex<TaskTable>>,
    output_dir: std::path::PathBuf,
    inner: Arc<dyn DownloadObserver>,
}

impl TaskTracker {
    fn set_status(&self, repo_id: &str, filename: &str, status: TaskStatus) {
        let mut table = lock(&self.table);
        if table.repo_id.as_deref() != Some(repo_id) {
            return;
        }
        if let Some(task) = table.tasks.iter_mut().find(|t| t.filename == filename) {
            task.status = status;
        }
    }
}

impl DownloadObserver for TaskTracker {
    fn on_event(&self, event: DownloadEvent) {
        match &event {
            DownloadEvent::FileListReady { repo_id, files } => {
                let mut table = lock(&self.table);
                if table.repo_id.as_deref() == Some(repo_id.as_str()) {
                    for name in files {
                        if !table.tasks.iter().any(|t| &t.filename == name) {
                            let file = crate::models::RemoteFile::new(name.as_str());
                            table.tasks.push(TransferTask::new(&file, &self.output_dir));
                        }
                    }
                }
            }
            DownloadEvent::Started { repo_id, filename } => {
                self.set_status(repo_id, filename, TaskStatus::Downloading);
            }
            DownloadEvent::Completed { repo_id, filename, outcome } => {
                let status = if outcome.is_success() {
                    TaskStatus::Completed
                } else {
                    TaskStatus::Failed
                };
                self.set_status(repo_id, filename, status);
            }
            DownloadEvent::Progress(_) | DownloadEvent::Status(_) => {}
        }
        self.inner.on_event(event);
    }
}

/// One operator's view of the downloader.
pub struct DownloadSession {
    orchestrator: Arc<DownloadOrchestrator>,
    run: Mutex<RunState>,
    table: Arc<Mutex<TaskTable>>,
    observer: Arc<dyn DownloadObserver>,
}

impl DownloadSession {
    pub fn new(
        config: DownloaderConfig,
        lister: Arc<dyn RepositoryFileLister>,
        fetcher: Arc<dyn RemoteResourceFetcher>,
        observer: Arc<dyn DownloadObserver>,
    ) -> Self {
        let table = Arc::new(Mutex::new(TaskTable::default()));
        let tracker = Arc::new(TaskTracker {
            table: table.clone(),
            output_dir: config.output_dir.clone(),
            inner: observer.clone(),
        });
        let orchestrator = Arc::new(DownloadOrchestrator::new(config, lister, fetcher, tracker));
        Self {
            orchestrator,
            run: Mutex::new(RunState::default()),
            table,
            observer,
        }
    }

    pub fn orchestrator(&self) -> &Arc<DownloadOrchestrator> {
        &self.orchestrator
    }

    /// Signals of the current run, shared with its workers.
    pub fn signals(&self) -> ControlSignals {
        lock(&self.run).signals.clone()
    }

    /// Number of batches and single-file downloads still running.
    pub fn running(&self) -> usize {
        lock(&self.run).running
    }

    /// Joins the signals of the runs already in flight, or starts fresh ones
    /// when nothing is running or the current run was cancelled.
    fn begin_run(&self) -> (ControlSignals, RunGuard<'_>) {
        let mut state = lock(&self.run);
        if state.running == 0 || state.signals.is_cancelled() {
            state.signals = ControlSignals::new();
        }
        state.running += 1;
        (state.signals.clone(), RunGuard { state: &self.run })
    }

    /// Rate in KiB/s; 0 removes the limit.
    pub fn set_rate_limit(&self, kib_per_sec: u64) {
        self.orchestrator
            .allocator()
            .set_limit(kib_per_sec.saturating_mul(1024));
        self.observer.on_event(DownloadEvent::Status(format!(
            "Speed limit set to {} KB/s",
            kib_per_sec
        )));
    }

    pub fn pause(&self) {
        self.signals().pause();
        self.observer.on_event(DownloadEvent::Status("Download paused".into()));
    }

    pub fn resume(&self) {
        self.signals().resume();
        self.observer.on_event(DownloadEvent::Status("Download resumed".into()));
    }

    pub fn cancel(&self) {
        self.signals().cancel();
        self.observer.on_event(DownloadEvent::Status("Cancelling downloads...".into()));
    }

    /// Fetches the listing of `repo_id` into the task table, all enabled.
    pub async fn load_files(
        &self,
        repo_id: &str,
        revision: Option<&str>,
    ) -> Result<Vec<TransferTask>, DownloadError> {
        {
            let mut table = lock(&self.table);
            table.repo_id = Some(repo_id.to_string());
            table.tasks.clear();
        }
        let files = self.orchestrator.list_files(repo_id, revision).await?;

        let output_dir = self.orchestrator.config().output_dir.clone();
        let tasks: Vec<TransferTask> = files
            .iter()
            .map(|file| TransferTask::new(file, &output_dir))
            .collect();
        let mut table = lock(&self.table);
        table.tasks = tasks.clone();
        Ok(tasks)
    }

    /// Enables or disables a loaded file. Returns false if it is unknown.
    pub fn set_enabled(&self, filename: &str, enabled: bool) -> bool {
        let (found, enabled_count, total) = {
            let mut table = lock(&self.table);
            let found = match table.tasks.iter_mut().find(|t| t.filename == filename) {
                Some(task) => {
                    task.enabled = enabled;
                    if !enabled && task.status == TaskStatus::Pending {
                        task.status = TaskStatus::Disabled;
                    } else if enabled && task.status == TaskStatus::Disabled {
                        task.status = TaskStatus::Pending;
                    }
                    true
                }
                None => false,
            };
            let enabled_count = table.tasks.iter().filter(|t| t.enabled).count();
            (found, enabled_count, table.tasks.len())
        };
        if found {
            self.observer.on_event(DownloadEvent::Status(format!(
                "{} of {} files enabled for download",
                enabled_count, total
            )));
        }
        found
    }

    pub fn tasks(&self) -> Vec<TransferTask> {
        lock(&self.table).tasks.clone()
    }

    /// Starts a run for `repo_id`. While other runs are in flight it shares
    /// their pause/cancel signals, so a rejected duplicate start never
    /// detaches the running batch from `pause` or `cancel`.
    ///
    /// If the repository's files were loaded into the table, only enabled
    /// files are downloaded, and an empty selection downloads nothing.
    pub async fn start_batch(
        &self,
        repo_id: &str,
        mut options: BatchOptions,
    ) -> Result<BatchOutcome, DownloadError> {
        let selection = {
            let table = lock(&self.table);
            if table.repo_id.as_deref() == Some(repo_id) && !table.tasks.is_empty() {
                Some(
                    table
                        .tasks
                        .iter()
                        .filter(|t| t.enabled)
                        .map(|t| t.filename.clone())
                        .collect::<std::collections::HashSet<_>>(),
                )
            } else {
                None
            }
        };

        if let Some(selection) = selection {
            if selection.is_empty() {
                self.observer.on_event(DownloadEvent::Status(
                    "No files are enabled for download".into(),
                ));
                return Ok(BatchOutcome::Finished(BatchReport {
                    repo_id: repo_id.to_string(),
                    ..BatchReport::default()
                }));
            }
            options.file_filter = Some(match options.file_filter.take() {
                Some(filter) => filter.intersection(&selection).cloned().collect(),
                None => selection,
            });
        }

        let (signals, _run) = self.begin_run();
        self.orchestrator.start_batch(repo_id, &options, &signals).await
    }

    /// Re-downloads one file, sharing the current run's signals unless that
    /// run was cancelled.
    pub async fn start_single(
        &self,
        repo_id: &str,
        filename: &str,
    ) -> Result<Transferred, DownloadError> {
        let expected = {
            let table = lock(&self.table);
            table
                .tasks
                .iter()
                .find(|t| t.filename == filename && table.repo_id.as_deref() == Some(repo_id))
                .and_then(|t| t.sha256.clone())
        };
        let (signals, _run) = self.begin_run();
        self.orchestrator
            .start_single_file(repo_id, filename, None, expected.as_deref(), &signals)
            .await
    }

    pub fn output_dir(&self) -> &Path {
        &self.orchestrator.config().output_dir
    }
}
