//! Buffered asynchronous rolling-file writer.
//!
//! Callers append formatted log bytes into a page taken from a [`BufferPool`].
//! A page that grows past `page_size` is pushed onto a small bounded queue that a
//! dedicated flush worker drains. The worker owns the file handle: it picks the
//! destination from the rotation fragment of the current time, reopens the file
//! when the fragment changes, pushes out partial pages on a timer, and answers
//! `sync` requests once everything queued before them is on disk.
//!
//! The worker runs on its own thread with a current-thread tokio runtime, so a
//! writer can be used from plain threads and from inside any async runtime alike.
//! Callers never block on file I/O except through `sync`, `close`, or a full
//! page queue.

mod active_file;
mod file_request;
mod flush_worker;
mod stats;

use std::ffi::OsStr;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tracing_subscriber::fmt::MakeWriter;

use crate::log::buffer_pool::{BufferPool, PageBuffer};
use crate::log::clock::{Clock, LocalClock};
use crate::log::rolling_format::RollingFormat;
use crate::log::LOG_FILE_SUFFIX;
use crate::service::{RollingConfig, Shutdown};
use crate::{AppError, AppResult};

use active_file::ActiveFile;
use file_request::FlushRequest;
use flush_worker::FlushWorker;
pub use stats::{StatsSnapshot, WriterStats};

/// Tracing target of the flush worker's own diagnostics.
pub const WORKER_TARGET: &str = "stonelog::worker";

/// Lifecycle of a flush worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    Running = 0,
    /// exit signal received, persisting what is left
    Draining = 1,
    Stopped = 2,
}

impl WorkerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => WorkerState::Running,
            1 => WorkerState::Draining,
            _ => WorkerState::Stopped,
        }
    }
}

/// Page slot shared by writers and the worker, guarded by one mutex.
#[derive(Debug, Default)]
struct PageState {
    closed: bool,
    current: Option<PageBuffer>,
}

/// State visible to both the caller side and the flush worker.
#[derive(Debug)]
struct Shared {
    pages: Mutex<PageState>,
    rolling: RwLock<RollingFormat>,
    state: AtomicU8,
    stats: WriterStats,
}

impl Shared {
    fn set_state(&self, state: WorkerState) {
        self.state.store(state as u8, Ordering::Release);
    }
}

#[derive(Debug)]
struct Inner {
    name: String,
    base_path: PathBuf,
    page_size: usize,
    pool: Arc<BufferPool>,
    shared: Arc<Shared>,
    page_tx: async_channel::Sender<PageBuffer>,
    flush_tx: async_channel::Sender<FlushRequest>,
    notify_shutdown: broadcast::Sender<()>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to a rolling log file. Clones share the same file and worker.
///
/// The file is closed by [`RollingFile::close`] or when the last handle drops.
#[derive(Debug, Clone)]
pub struct RollingFile {
    inner: Arc<Inner>,
}

impl RollingFile {
    /// Opens a rolling file on the local wall clock and spawns its flush worker.
    ///
    /// # Errors
    ///
    /// * `InvalidPath` - `config.base_path` does not name a file
    /// * `InvalidValue` - zero page size or flush interval
    /// * `IoError` - the worker thread or runtime could not be started
    pub fn new(config: &RollingConfig, pool: Arc<BufferPool>) -> AppResult<Self> {
        Self::with_clock(config, pool, Arc::new(LocalClock))
    }

    /// Same as [`RollingFile::new`] with an explicit time source for rotation.
    pub fn with_clock(
        config: &RollingConfig,
        pool: Arc<BufferPool>,
        clock: Arc<dyn Clock>,
    ) -> AppResult<Self> {
        let base_path = validate_base_path(&config.base_path)?;
        if config.page_size == 0 {
            return Err(AppError::InvalidValue("page_size must be positive".into()));
        }
        if config.flush_interval_ms == 0 {
            return Err(AppError::InvalidValue(
                "flush_interval_ms must be positive".into(),
            ));
        }

        let name = base_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        let shared = Arc::new(Shared {
            pages: Mutex::new(PageState::default()),
            rolling: RwLock::new(config.rolling),
            state: AtomicU8::new(WorkerState::Running as u8),
            stats: WriterStats::default(),
        });
        let (page_tx, page_rx) = async_channel::bounded(config.max_pending_pages + 1);
        let (flush_tx, flush_rx) = async_channel::unbounded();
        let (notify_shutdown, _) = broadcast::channel(1);

        let worker = FlushWorker {
            name: name.clone(),
            shared: Arc::clone(&shared),
            page_rx,
            flush_rx,
            shutdown: Shutdown::new(notify_shutdown.subscribe()),
            active: ActiveFile::new(base_path.clone(), config.current_link.clone()),
            clock,
            flush_interval: config.flush_interval(),
        };

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()?;
        let handle = std::thread::Builder::new()
            .name(format!("stonelog-{}", name))
            .spawn(move || {
                let dispatch = flush_worker::worker_dispatch();
                tracing::dispatcher::with_default(&dispatch, || runtime.block_on(worker.run()))
            })?;

        Ok(Self {
            inner: Arc::new(Inner {
                name,
                base_path,
                page_size: config.page_size,
                pool,
                shared,
                page_tx,
                flush_tx,
                notify_shutdown,
                worker: Mutex::new(Some(handle)),
            }),
        })
    }

    /// Appends `buf` to the current page.
    ///
    /// Returns as soon as the bytes are buffered. When the page crosses the size
    /// threshold it is handed to the worker, blocking while the page queue is full.
    ///
    /// # Errors
    ///
    /// * `Closed` - the file was closed
    /// * `BufferExhausted` - the pool has no buffer for a new page; the record
    ///   was not taken and the caller decides whether to drop or retry it
    pub fn write(&self, buf: &[u8]) -> AppResult<usize> {
        let inner = &self.inner;
        let mut state = inner.shared.pages.lock();
        if state.closed {
            return Err(AppError::Closed);
        }

        let mut page = match state.current.take() {
            Some(page) => page,
            None => inner.pool.acquire().ok_or(AppError::BufferExhausted {
                capacity: inner.pool.capacity(),
            })?,
        };
        page.extend_from_slice(buf);

        if page.len() > inner.page_size {
            // handing off under the lock keeps pages in submission order
            inner
                .page_tx
                .send_blocking(page)
                .map_err(|_| AppError::Closed)?;
        } else {
            state.current = Some(page);
        }
        Ok(buf.len())
    }

    /// Blocks until every byte written before this call is persisted and fsynced.
    ///
    /// Returns the first I/O error the worker met while draining.
    ///
    /// # Panics
    ///
    /// Panics when called from within an async runtime; use [`RollingFile::sync_async`] there.
    pub fn sync(&self) -> AppResult<()> {
        let (request, reply) = self.flush_request()?;
        self.inner
            .flush_tx
            .send_blocking(request)
            .map_err(|_| AppError::Closed)?;
        reply.blocking_recv().map_err(|_| AppError::Closed)?
    }

    /// Async flavor of [`RollingFile::sync`].
    pub async fn sync_async(&self) -> AppResult<()> {
        let (request, reply) = self.flush_request()?;
        self.inner
            .flush_tx
            .send(request)
            .await
            .map_err(|_| AppError::Closed)?;
        reply.await.map_err(|_| AppError::Closed)?
    }

    fn flush_request(&self) -> AppResult<(FlushRequest, tokio::sync::oneshot::Receiver<AppResult<()>>)> {
        if self.inner.shared.pages.lock().closed {
            return Err(AppError::Closed);
        }
        Ok(FlushRequest::new())
    }

    /// Stops accepting writes and waits for the worker to persist buffered data
    /// and close the file. Later calls are no-ops.
    pub fn close(&self) -> AppResult<()> {
        self.inner.close()
    }

    /// Changes the rotation granularity; takes effect at the next page written.
    pub fn set_rolling(&self, format: RollingFormat) {
        *self.inner.shared.rolling.write() = format;
    }

    pub fn rolling(&self) -> RollingFormat {
        *self.inner.shared.rolling.read()
    }

    pub fn base_path(&self) -> &Path {
        &self.inner.base_path
    }

    pub fn is_closed(&self) -> bool {
        self.inner.shared.pages.lock().closed
    }

    pub fn worker_state(&self) -> WorkerState {
        WorkerState::from_u8(self.inner.shared.state.load(Ordering::Acquire))
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.inner.shared.stats.snapshot()
    }

    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.inner.pool
    }
}

impl Inner {
    fn close(&self) -> AppResult<()> {
        {
            let mut state = self.shared.pages.lock();
            if state.closed {
                return Ok(());
            }
            state.closed = true;
        }

        let _ = self.notify_shutdown.send(());
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            handle.join().map_err(|_| {
                AppError::ChannelRecvError(format!("flush worker {} panicked", self.name))
            })?;
        }
        Ok(())
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Strips a trailing `.log` and checks that a file stem remains.
fn validate_base_path(base_path: &Path) -> AppResult<PathBuf> {
    let invalid = || AppError::InvalidPath(base_path.display().to_string());
    let names_directory = base_path
        .as_os_str()
        .as_encoded_bytes()
        .last()
        .is_some_and(|byte| std::path::is_separator(char::from(*byte)));
    if names_directory {
        return Err(invalid());
    }

    let name = base_path.file_name().ok_or_else(invalid)?;
    // a bare `.log` has no stem left
    let bare_suffix = format!(".{}", LOG_FILE_SUFFIX);
    if name.is_empty() || name.as_encoded_bytes() == bare_suffix.as_bytes() {
        return Err(invalid());
    }

    if base_path.extension() == Some(OsStr::new(LOG_FILE_SUFFIX)) {
        Ok(base_path.with_extension(""))
    } else {
        Ok(base_path.to_path_buf())
    }
}

impl io::Write for &RollingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        RollingFile::write(self, buf).map_err(Into::into)
    }

    /// Buffered bytes reach the file on the worker's schedule; use
    /// [`RollingFile::sync`] for durability.
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl io::Write for RollingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        RollingFile::write(self, buf).map_err(Into::into)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for RollingFile {
    type Writer = &'a RollingFile;

    fn make_writer(&'a self) -> Self::Writer {
        self
    }
}
