use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

/// Counters kept by the flush worker.
///
/// Write failures off the sync path are swallowed by the worker; these
/// counters are how an operator notices a sustained failure.
#[derive(Debug, Default)]
pub struct WriterStats {
    pages_written: AtomicU64,
    bytes_written: AtomicU64,
    rotations: AtomicU64,
    write_errors: AtomicU64,
    dropped_bytes: AtomicU64,
    sync_requests: AtomicU64,
    last_error: Mutex<Option<String>>,
}

impl WriterStats {
    pub(crate) fn record_write(&self, bytes: usize, rotated: bool) {
        self.pages_written.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes as u64, Ordering::Relaxed);
        if rotated {
            self.rotations.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_error(&self, dropped: usize, error: &std::io::Error) {
        self.write_errors.fetch_add(1, Ordering::Relaxed);
        self.dropped_bytes.fetch_add(dropped as u64, Ordering::Relaxed);
        *self.last_error.lock() = Some(error.to_string());
    }

    pub(crate) fn record_sync(&self) {
        self.sync_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            pages_written: self.pages_written.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            rotations: self.rotations.load(Ordering::Relaxed),
            write_errors: self.write_errors.load(Ordering::Relaxed),
            dropped_bytes: self.dropped_bytes.load(Ordering::Relaxed),
            sync_requests: self.sync_requests.load(Ordering::Relaxed),
            last_error: self.last_error.lock().clone(),
        }
    }
}

/// Point-in-time copy of [`WriterStats`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub pages_written: u64,
    pub bytes_written: u64,
    pub rotations: u64,
    pub write_errors: u64,
    /// bytes discarded because their page could not be written
    pub dropped_bytes: u64,
    pub sync_requests: u64,
    pub last_error: Option<String>,
}
