// src/registry.rs

//! Deduplication of in-flight work.
//!
//! Every batch claims its repository key and every transfer claims its file
//! key. A key can be held by one owner at a time; a second claim fails until
//! the first owner releases it.

use crate::models::DownloadKey;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Bookkeeping for one claimed key.
#[derive(Debug, Clone)]
pub struct ActiveDownloadEntry {
    pub key: DownloadKey,
    pub started_at: Instant,
    pub bytes_downloaded: u64,
}

impl ActiveDownloadEntry {
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

/// Linearizable set of active keys, shared by clone.
#[derive(Debug, Clone, Default)]
pub struct DownloadRegistry {
    entries: Arc<Mutex<HashMap<DownloadKey, ActiveDownloadEntry>>>,
}

impl DownloadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<DownloadKey, ActiveDownloadEntry>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("download registry lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Inserts `key` if absent. Returns false if it is already active.
    pub fn add(&self, key: DownloadKey) -> bool {
        let mut entries = self.lock();
        if entries.contains_key(&key) {
            return false;
        }
        entries.insert(
            key.clone(),
            ActiveDownloadEntry {
                key,
                started_at: Instant::now(),
                bytes_downloaded: 0,
            },
        );
        true
    }

    pub fn remove(&self, key: &DownloadKey) {
        self.lock().remove(key);
    }

    pub fn contains(&self, key: &DownloadKey) -> bool {
        self.lock().contains_key(key)
    }

    /// Like [`add`](Self::add), but the key is released when the returned
    /// guard is dropped, on every exit path including unwinding.
    pub fn claim(&self, key: DownloadKey) -> Option<RegistryGuard> {
        if self.add(key.clone()) {
            Some(RegistryGuard {
                registry: self.clone(),
                key,
            })
        } else {
            None
        }
    }

    /// Updates the byte counter of an active entry. Ignored if the key is gone.
    pub fn record_progress(&self, key: &DownloadKey, bytes_downloaded: u64) {
        if let Some(entry) = self.lock().get_mut(key) {
            entry.bytes_downloaded = bytes_downloaded;
        }
    }

    pub fn snapshot(&self) -> Vec<ActiveDownloadEntry> {
        self.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Holds a registry key until dropped.
#[derive(Debug)]
pub struct RegistryGuard {
    registry: DownloadRegistry,
    key: DownloadKey,
}

impl RegistryGuard {
    pub fn key(&self) -> &DownloadKey {
        &self.key
    }

    pub fn record_progress(&self, bytes_downloaded: u64) {
        self.registry.record_progress(&self.key, bytes_downloaded);
    }
}

impl Drop for RegistryGuard {
    fn drop(&mut self) {
        self.registry.remove(&self.key);
    }
}
