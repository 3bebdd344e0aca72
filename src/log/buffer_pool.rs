//! Bounded pool of reusable page buffers.
//!
//! The pool caps the number of buffers checked out at any time. Once the cap is
//! reached `acquire` fails fast instead of blocking or allocating, which is the
//! backpressure signal surfaced to log writers. Released buffers are cleared and
//! parked in a lock-free queue so the write path rarely allocates.

use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use crossbeam::queue::ArrayQueue;

/// Pool of `BytesMut` page buffers with a soft cap on outstanding checkouts.
pub struct BufferPool {
    /// cleared buffers waiting for reuse
    free: ArrayQueue<BytesMut>,
    /// maximum number of buffers checked out at once
    capacity: usize,
    /// initial capacity of freshly allocated buffers
    page_capacity: usize,
    outstanding: AtomicUsize,
    metrics: BufferPoolMetrics,
}

/// Counters for pool monitoring.
#[derive(Debug, Default)]
pub struct BufferPoolMetrics {
    /// buffer reused from the free queue
    pub hits: AtomicU64,
    /// buffer freshly allocated
    pub misses: AtomicU64,
    /// buffer returned to the free queue
    pub returns: AtomicU64,
    /// acquisition refused because the cap was reached
    pub exhausted: AtomicU64,
}

impl BufferPoolMetrics {
    pub fn snapshot(&self) -> PoolMetricsSnapshot {
        PoolMetricsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            returns: self.returns.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolMetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub returns: u64,
    pub exhausted: u64,
}

impl BufferPool {
    /// Creates a pool allowing at most `capacity` outstanding buffers.
    ///
    /// Buffers are allocated lazily with `page_capacity` bytes reserved. A
    /// capacity of zero yields a pool that refuses every acquisition.
    pub fn new(capacity: usize, page_capacity: usize) -> Self {
        Self {
            // ArrayQueue rejects a zero capacity
            free: ArrayQueue::new(capacity.max(1)),
            capacity,
            page_capacity,
            outstanding: AtomicUsize::new(0),
            metrics: BufferPoolMetrics::default(),
        }
    }

    /// Checks out an empty buffer, or `None` when `capacity` buffers are already out.
    pub fn acquire(self: &Arc<Self>) -> Option<PageBuffer> {
        let mut current = self.outstanding.load(Ordering::Acquire);
        loop {
            if current >= self.capacity {
                self.metrics.exhausted.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            match self.outstanding.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        let buf = match self.free.pop() {
            Some(buf) => {
                self.metrics.hits.fetch_add(1, Ordering::Relaxed);
                buf
            }
            None => {
                self.metrics.misses.fetch_add(1, Ordering::Relaxed);
                BytesMut::with_capacity(self.page_capacity)
            }
        };

        Some(PageBuffer {
            buf,
            pool: Arc::clone(self),
        })
    }

    fn release(&self, mut buf: BytesMut) {
        buf.clear();
        if self.free.push(buf).is_ok() {
            self.metrics.returns.fetch_add(1, Ordering::Relaxed);
        }
        self.outstanding.fetch_sub(1, Ordering::AcqRel);
    }

    /// Number of buffers currently checked out.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of cleared buffers parked for reuse.
    pub fn available(&self) -> usize {
        self.free.len()
    }

    pub fn metrics(&self) -> &BufferPoolMetrics {
        &self.metrics
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("capacity", &self.capacity)
            .field("page_capacity", &self.page_capacity)
            .field("outstanding", &self.outstanding())
            .field("available", &self.available())
            .finish()
    }
}

/// A page of log bytes checked out from a [`BufferPool`].
///
/// Ownership moves between the writer, the full-page queue and the flush
/// worker; the storage goes back to the pool exactly once, when the page drops.
pub struct PageBuffer {
    buf: BytesMut,
    pool: Arc<BufferPool>,
}

impl PageBuffer {
    pub fn extend_from_slice(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }
}

impl Deref for PageBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.buf
    }
}

impl fmt::Debug for PageBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageBuffer")
            .field("len", &self.buf.len())
            .finish()
    }
}

impl Drop for PageBuffer {
    fn drop(&mut self) {
        self.pool.release(std::mem::take(&mut self.buf));
    }
}
