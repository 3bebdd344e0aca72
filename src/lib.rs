//! Buffered asynchronous rolling-file writer for structured logging.
//!
//! Log records are appended into pooled pages, handed to a dedicated worker
//! that owns the file handle, and persisted into time-partitioned files such
//! as `logs/202401/15/app_10.log`. [`RollingFile`] plugs into
//! `tracing-subscriber` as a `MakeWriter`; [`setup_tracing`] wires a complete
//! logger from a [`LoggerConfig`].

mod log;
mod service;

pub use log::{
    compute_path, BufferPool, BufferPoolMetrics, Clock, LocalClock, ManualClock, PageBuffer,
    PoolMetricsSnapshot, RollingFile, RollingFormat, RollingPath, StatsSnapshot, WorkerState,
    WriterStats, DEFAULT_FLUSH_INTERVAL_MS, DEFAULT_MAX_PENDING_PAGES, DEFAULT_PAGE_SIZE,
    DEFAULT_POOL_CAPACITY, LOG_FILE_SUFFIX, WORKER_TARGET,
};
pub use service::{
    build_layers, setup_tracing, AppError, AppResult, BoxedLayer, Encoder, LoggerConfig,
    LoggerGuard, RollingConfig,
};
