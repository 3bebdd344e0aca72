// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, warn, Dispatch, Level};

use crate::log::buffer_pool::PageBuffer;
use crate::log::clock::Clock;
use crate::service::Shutdown;
use crate::AppError;

use super::active_file::ActiveFile;
use super::file_request::FlushRequest;
use super::{Shared, WorkerState, WORKER_TARGET};

/// How long a drain waits on the page lock before emptying the queue again.
const LOCK_RETRY: Duration = Duration::from_millis(1);

/// Subscriber installed as the default of the worker thread.
///
/// Worker diagnostics go to stderr only. A subscriber writing into a rolling
/// file would make the worker block on a page queue that only it drains.
pub(super) fn worker_dispatch() -> Dispatch {
    let subscriber = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(Level::WARN)
        .with_target(true)
        .finish();
    Dispatch::new(subscriber)
}

/// Single owner of the active log file.
///
/// Receives full pages, periodic ticks, flush requests and the exit signal,
/// and is the only code that touches the file handle.
pub(super) struct FlushWorker {
    pub(super) name: String,
    pub(super) shared: Arc<Shared>,
    pub(super) page_rx: async_channel::Receiver<PageBuffer>,
    pub(super) flush_rx: async_channel::Receiver<FlushRequest>,
    pub(super) shutdown: Shutdown,
    pub(super) active: ActiveFile,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) flush_interval: Duration,
}

impl FlushWorker {
    pub(super) async fn run(mut self) {
        debug!(target: WORKER_TARGET, "flush worker {} started", self.name);
        let mut ticker = time::interval(self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;

        while !self.shutdown.is_shutdown() {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    debug!(target: WORKER_TARGET, "flush worker {} received exit signal", self.name);
                }
                Ok(request) = self.flush_rx.recv() => {
                    self.handle_flush(request);
                }
                Ok(page) = self.page_rx.recv() => {
                    let _ = self.persist(page);
                }
                _ = ticker.tick() => {
                    self.flush_idle_page();
                }
            }
        }

        self.finish();
    }

    /// Writes one page; the page goes back to the pool whatever the outcome.
    fn persist(&mut self, page: PageBuffer) -> io::Result<()> {
        if page.is_empty() {
            return Ok(());
        }
        let now = self.clock.now();
        let format = *self.shared.rolling.read();
        match self.active.write_page(page.as_bytes(), format, &now) {
            Ok(rotated) => {
                self.shared.stats.record_write(page.len(), rotated);
                Ok(())
            }
            Err(e) => {
                warn!(
                    target: WORKER_TARGET,
                    "flush worker {} dropped {} bytes: {}",
                    self.name,
                    page.len(),
                    e
                );
                self.shared.stats.record_error(page.len(), &e);
                Err(e)
            }
        }
    }

    /// Persists every queued full page and then the partially filled one.
    ///
    /// Writers hand pages off while holding the page lock, and may block there
    /// when the queue is full, so the queue is emptied before each attempt to
    /// take the lock. Once the lock is held nothing else can be queued.
    fn drain(&mut self) -> io::Result<()> {
        let mut result = Ok(());
        loop {
            while let Ok(page) = self.page_rx.try_recv() {
                keep_first_error(&mut result, self.persist(page));
            }

            let tail = match self.shared.pages.try_lock_for(LOCK_RETRY) {
                Some(mut state) => {
                    let mut tail: Vec<PageBuffer> =
                        std::iter::from_fn(|| self.page_rx.try_recv().ok()).collect();
                    tail.extend(state.current.take());
                    tail
                }
                None => continue,
            };

            for page in tail {
                keep_first_error(&mut result, self.persist(page));
            }
            return result;
        }
    }

    fn handle_flush(&mut self, request: FlushRequest) {
        self.shared.stats.record_sync();
        let drained = self.drain();
        let synced = self.active.sync();
        let result = drained.and(synced).map_err(AppError::from);
        let _ = request.reply.send(result);
    }

    /// Periodic tick: push out a partial page so quiet loggers are not held back.
    fn flush_idle_page(&mut self) {
        if !self.page_rx.is_empty() {
            // full pages are pending, this tick has nothing to add
            return;
        }
        let page = match self.shared.pages.try_lock() {
            Some(mut state) if self.page_rx.is_empty() => {
                let has_bytes = state.current.as_ref().is_some_and(|page| !page.is_empty());
                if has_bytes {
                    state.current.take()
                } else {
                    None
                }
            }
            _ => None,
        };
        if let Some(page) = page {
            let _ = self.persist(page);
        }
    }

    fn finish(&mut self) {
        self.shared.set_state(WorkerState::Draining);
        // closed first: a request sent from now on fails instead of waiting forever,
        // and whatever is already queued is still delivered below
        self.flush_rx.close();
        self.page_rx.close();

        let drained = self.drain();
        if let Some(path) = self.active.path() {
            debug!(target: WORKER_TARGET, "flush worker {} closing {}", self.name, path.display());
        }
        let closed = self.active.close();
        if let Err(e) = &closed {
            error!(target: WORKER_TARGET, "flush worker {} failed to close file: {}", self.name, e);
        }
        let outcome = drained.and(closed);

        // callers whose sync raced with close
        while let Ok(request) = self.flush_rx.try_recv() {
            let result = match &outcome {
                Ok(()) => Ok(()),
                Err(e) => Err(io::Error::new(e.kind(), e.to_string()).into()),
            };
            let _ = request.reply.send(result);
        }

        self.shared.set_state(WorkerState::Stopped);
        debug!(target: WORKER_TARGET, "flush worker {} stopped", self.name);
    }
}

fn keep_first_error(result: &mut io::Result<()>, next: io::Result<()>) {
    if result.is_ok() {
        *result = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;
    use std::sync::atomic::{AtomicU8, Ordering};

    use parking_lot::{Mutex, RwLock};
    use tempfile::tempdir;
    use tokio::sync::broadcast;

    use crate::log::buffer_pool::BufferPool;
    use crate::log::clock::LocalClock;
    use crate::log::rolling_format::RollingFormat;

    use super::super::{PageState, WriterStats};

    struct Harness {
        worker: FlushWorker,
        page_tx: async_channel::Sender<PageBuffer>,
        flush_tx: async_channel::Sender<FlushRequest>,
        _notify: broadcast::Sender<()>,
    }

    fn harness(base_path: &Path) -> Harness {
        let shared = Arc::new(Shared {
            pages: Mutex::new(PageState::default()),
            rolling: RwLock::new(RollingFormat::Never),
            state: AtomicU8::new(WorkerState::Running as u8),
            stats: WriterStats::default(),
        });
        let (page_tx, page_rx) = async_channel::bounded(4);
        let (flush_tx, flush_rx) = async_channel::unbounded();
        let (notify, _) = broadcast::channel(1);
        let worker = FlushWorker {
            name: "app".to_string(),
            shared,
            page_rx,
            flush_rx,
            shutdown: Shutdown::new(notify.subscribe()),
            active: ActiveFile::new(base_path.to_path_buf(), None),
            clock: Arc::new(LocalClock),
            flush_interval: Duration::from_secs(60),
        };
        Harness {
            worker,
            page_tx,
            flush_tx,
            _notify: notify,
        }
    }

    #[test]
    fn test_finish_answers_queued_and_rejects_late_flushes() {
        let dir = tempdir().unwrap();
        let mut harness = harness(&dir.path().join("app"));
        let pool = Arc::new(BufferPool::new(4, 64));

        let mut queued = pool.acquire().unwrap();
        queued.extend_from_slice(b"queued ");
        harness.page_tx.send_blocking(queued).unwrap();
        let mut tail = pool.acquire().unwrap();
        tail.extend_from_slice(b"tail");
        harness.worker.shared.pages.lock().current = Some(tail);

        let (request, reply) = FlushRequest::new();
        harness.flush_tx.send_blocking(request).unwrap();

        harness.worker.finish();

        // queued before the exit signal: answered
        assert!(reply.blocking_recv().unwrap().is_ok());
        // sent after: refused right away instead of left unanswered
        let (late, _late_reply) = FlushRequest::new();
        assert!(harness.flush_tx.send_blocking(late).is_err());
        assert!(harness.page_tx.is_closed());

        assert_eq!(
            fs::read_to_string(dir.path().join("app.log")).unwrap(),
            "queued tail"
        );
        assert_eq!(pool.outstanding(), 0);
        let state = harness.worker.shared.state.load(Ordering::Acquire);
        assert_eq!(WorkerState::from_u8(state), WorkerState::Stopped);
    }
}
