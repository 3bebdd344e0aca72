//! Rolling log file core.
//!
//! This module provides:
//! - A bounded pool of page buffers
//! - Time-based rotation naming
//! - The rolling file writer and its flush worker

mod buffer_pool;
mod clock;
mod rolling_file;
mod rolling_format;

// Re-exports
pub use buffer_pool::{BufferPool, BufferPoolMetrics, PageBuffer, PoolMetricsSnapshot};
pub use clock::{Clock, LocalClock, ManualClock};
pub use rolling_file::{RollingFile, StatsSnapshot, WorkerState, WriterStats, WORKER_TARGET};
pub use rolling_format::{compute_path, RollingFormat, RollingPath};

/// Extension of every log file
pub const LOG_FILE_SUFFIX: &str = "log";

/// Default page threshold in bytes
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Default number of full pages that may wait for the worker
pub const DEFAULT_MAX_PENDING_PAGES: usize = 2;

/// Default period of the idle flush, in milliseconds
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 500;

/// Default number of buffers a pool hands out at once
pub const DEFAULT_POOL_CAPACITY: usize = 500;
