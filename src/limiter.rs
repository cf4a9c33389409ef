// src/limiter.rs

use crate::models::DownloadKey;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Splits one global bandwidth budget across every active transfer.
///
/// There is no scheduler: each worker measures its own average rate and asks
/// [`BandwidthAllocator::throttle_delay`] how long to back off.
#[derive(Clone, Debug)]
pub struct BandwidthAllocator {
    state: Arc<Mutex<AllocatorState>>,
}

#[derive(Debug)]
struct AllocatorState {
    /// Global limit in bytes per second. 0 means unlimited.
    limit: u64,
    /// No worker is ever granted less than this while a limit is set.
    floor: u64,
    /// Keys of the transfers currently sharing the budget.
    active: HashSet<DownloadKey>,
}

impl BandwidthAllocator {
    /// Creates a new allocator.
    /// A limit of 0 means the allocator is disabled (unlimited speed).
    pub fn new(limit_bytes_per_sec: u64, floor_bytes_per_sec: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(AllocatorState {
                limit: limit_bytes_per_sec,
                floor: floor_bytes_per_sec,
                active: HashSet::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, AllocatorState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("bandwidth allocator lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Sets a new global limit. A limit of 0 means unlimited.
    /// Takes effect on the next allowance query of every worker.
    pub fn set_limit(&self, limit_bytes_per_sec: u64) {
        self.lock().limit = limit_bytes_per_sec;
        tracing::debug!(limit_bytes_per_sec, "bandwidth limit changed");
    }

    pub fn limit(&self) -> u64 {
        self.lock().limit
    }

    pub fn active_count(&self) -> usize {
        self.lock().active.len()
    }

    /// The share of the global limit one worker may use right now,
    /// `max(floor, limit / max(1, active))`. `None` when unlimited.
    pub fn allowance_per_worker(&self) -> Option<u64> {
        let state = self.lock();
        if state.limit == 0 {
            return None;
        }
        let workers = state.active.len().max(1) as u64;
        Some((state.limit / workers).max(state.floor))
    }

    /// Adds a transfer to the active set. Returns a guard that removes it.
    pub fn register(&self, key: DownloadKey) -> AllocationGuard {
        self.lock().active.insert(key.clone());
        AllocationGuard {
            allocator: self.clone(),
            key,
        }
    }

    pub fn unregister(&self, key: &DownloadKey) {
        self.lock().active.remove(key);
    }

    /// Retrospective correction: given what a worker has transferred so far,
    /// returns how long it must sleep for its running average to fall back to
    /// its allowance. Workers under their allowance, or with no elapsed time
    /// yet, are never delayed.
    pub fn throttle_delay(&self, bytes: u64, elapsed: Duration) -> Option<Duration> {
        let allowance = self.allowance_per_worker()?;
        let elapsed_secs = elapsed.as_secs_f64();
        if elapsed_secs <= 0.0 || allowance == 0 {
            return None;
        }

        let achieved = bytes as f64 / elapsed_secs;
        if achieved <= allowance as f64 {
            return None;
        }

        let target_secs = bytes as f64 / allowance as f64;
        let sleep = target_secs - elapsed_secs;
        if sleep > 0.0 {
            Some(Duration::from_secs_f64(sleep))
        } else {
            None
        }
    }
}

/// Keeps a transfer counted in the active set until dropped.
#[derive(Debug)]
pub struct AllocationGuard {
    allocator: BandwidthAllocator,
    key: DownloadKey,
}

impl Drop for AllocationGuard {
    fn drop(&mut self) {
        self.allocator.unregister(&self.key);
    }
}
