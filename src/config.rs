// src/config.rs

use crate::downloader::DownloadError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_ENDPOINT: &str = "https://huggingface.co";
pub const DEFAULT_REVISION: &str = "main";

/// Settings shared by every download in a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloaderConfig {
    pub output_dir: PathBuf,
    /// Global bandwidth budget in KiB/s. 0 disables throttling.
    pub rate_limit_kib: u64,
    /// Minimum share any single transfer gets, in KiB/s.
    pub min_worker_kib: u64,
    /// Granularity of writes and of pause/cancel checks, in bytes.
    pub chunk_size: usize,
    pub progress_interval_ms: u64,
    pub pause_poll_ms: u64,
    /// Files transferred at once within a batch. 1 is sequential,
    /// 0 starts one worker per file.
    pub max_concurrent_files: usize,
    /// Start the next `partN` repository after a batch finishes.
    pub auto_continue: bool,
    /// Skip files already present at their destination.
    pub resume: bool,
    pub endpoint: String,
    #[serde(skip_serializing)]
    pub token: Option<String>,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("./models"),
            rate_limit_kib: 500,
            min_worker_kib: 50,
            chunk_size: 8 * 1024,
            progress_interval_ms: 500,
            pause_poll_ms: 100,
            max_concurrent_files: 1,
            auto_continue: true,
            resume: true,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            token: None,
        }
    }
}

impl DownloaderConfig {
    /// Reads a JSON config file. Missing fields take their defaults.
    pub fn from_file(path: &Path) -> Result<Self, DownloadError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| DownloadError::Config(format!("{}: {}", path.display(), e)))?;
        serde_json::from_str(&raw)
            .map_err(|e| DownloadError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Fills the token from `HF_TOKEN` and the endpoint from `HF_ENDPOINT`
    /// when they are not already set.
    pub fn with_env(mut self) -> Self {
        if self.token.is_none() {
            self.token = std::env::var("HF_TOKEN").ok().filter(|t| !t.is_empty());
        }
        if let Ok(endpoint) = std::env::var("HF_ENDPOINT") {
            if !endpoint.is_empty() && self.endpoint == DEFAULT_ENDPOINT {
                self.endpoint = endpoint;
            }
        }
        self
    }

    pub fn rate_limit_bytes(&self) -> u64 {
        self.rate_limit_kib.saturating_mul(1024)
    }

    pub fn min_worker_bytes(&self) -> u64 {
        self.min_worker_kib.saturating_mul(1024)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    pub fn pause_poll(&self) -> Duration {
        Duration::from_millis(self.pause_poll_ms.max(1))
    }

    /// Chunk size never drops to zero.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size.max(1)
    }
}
