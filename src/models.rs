// src/models.rs

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Suffix appended to a destination while its bytes are still in flight.
pub const PARTIAL_SUFFIX: &str = ".partial";

/// Identifies one unit of work for deduplication.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DownloadKey {
    /// A whole repository batch.
    Repo(String),
    /// One file inside a repository.
    File { repo_id: String, filename: String },
}

impl DownloadKey {
    pub fn repo(repo_id: impl Into<String>) -> Self {
        DownloadKey::Repo(repo_id.into())
    }

    pub fn file(repo_id: impl Into<String>, filename: impl Into<String>) -> Self {
        DownloadKey::File {
            repo_id: repo_id.into(),
            filename: filename.into(),
        }
    }

    pub fn repo_id(&self) -> &str {
        match self {
            DownloadKey::Repo(repo_id) => repo_id,
            DownloadKey::File { repo_id, .. } => repo_id,
        }
    }
}

impl fmt::Display for DownloadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DownloadKey::Repo(repo_id) => write!(f, "{}", repo_id),
            DownloadKey::File { repo_id, filename } => write!(f, "{}:{}", repo_id, filename),
        }
    }
}

/// Where a single file comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocator {
    pub repo_id: String,
    pub filename: String,
    /// `None` means the default branch.
    pub revision: Option<String>,
}

impl SourceLocator {
    pub fn new(repo_id: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            repo_id: repo_id.into(),
            filename: filename.into(),
            revision: None,
        }
    }

    pub fn with_revision(mut self, revision: Option<String>) -> Self {
        self.revision = revision;
        self
    }

    pub fn key(&self) -> DownloadKey {
        DownloadKey::file(&self.repo_id, &self.filename)
    }
}

/// One entry of a repository listing. Size and checksum are optional
/// because not every listing source reports them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFile {
    pub path: String,
    pub size: Option<u64>,
    pub sha256: Option<String>,
}

impl RemoteFile {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            size: None,
            sha256: None,
        }
    }
}

impl From<&str> for RemoteFile {
    fn from(path: &str) -> Self {
        RemoteFile::new(path)
    }
}

/// The status of one file in a session's task table.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Downloading,
    Completed,
    Failed,
    Disabled,
}

/// A file the operator may download, as seen by the control surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferTask {
    pub filename: String,
    pub destination: PathBuf,
    pub enabled: bool,
    pub status: TaskStatus,
    pub sha256: Option<String>,
}

impl TransferTask {
    pub fn new(file: &RemoteFile, output_dir: &Path) -> Self {
        Self {
            filename: file.path.clone(),
            destination: output_dir.join(&file.path),
            enabled: true,
            status: TaskStatus::Pending,
            sha256: file.sha256.clone(),
        }
    }

    /// Returns the path for the in-flight file, e.g.
    /// "/models/config.json" -> "/models/config.json.partial".
    pub fn temporary_path(&self) -> PathBuf {
        temporary_path(&self.destination)
    }
}

/// Appends [`PARTIAL_SUFFIX`] to a destination path.
pub fn temporary_path(destination: &Path) -> PathBuf {
    let mut raw = destination.as_os_str().to_owned();
    raw.push(PARTIAL_SUFFIX);
    PathBuf::from(raw)
}
