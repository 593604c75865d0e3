//! Buffer recycling and the ordered hand-off queue
//!
//! Body and header bytes live in fixed-capacity [`BufferItem`]s. The
//! [`BufferPool`] recycles them, the [`ReadyQueue`] carries filled items from
//! the orchestrator to the reader in resource order. Both are shared between
//! the producer and the reader, so both sit behind a mutex.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::core::error::Result;

/// Default capacity of a pooled buffer, equal to one wave
pub const DEFAULT_BUFFER_CAPACITY: usize = 1024 * 1024;

/// What a buffer carries once it reaches the ready queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    /// Raw response header lines of the discovery request
    Header,
    /// One wave of body bytes
    Body,
}

/// Fixed-capacity byte buffer with fill and read cursors
///
/// Invariant: `read_offset <= filled <= capacity`.
#[derive(Debug)]
pub struct BufferItem {
    data: Vec<u8>,
    filled: usize,
    read_offset: usize,
    kind: BufferKind,
}

impl BufferItem {
    /// Allocate a zeroed buffer, reporting allocation failure instead of aborting
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        let mut data = Vec::new();
        data.try_reserve_exact(capacity)?;
        data.resize(capacity, 0);

        Ok(Self {
            data,
            filled: 0,
            read_offset: 0,
            kind: BufferKind::Body,
        })
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn filled(&self) -> usize {
        self.filled
    }

    pub fn read_offset(&self) -> usize {
        self.read_offset
    }

    pub fn kind(&self) -> BufferKind {
        self.kind
    }

    /// Bytes filled but not yet consumed
    pub fn unread(&self) -> usize {
        self.filled - self.read_offset
    }

    pub fn is_consumed(&self) -> bool {
        self.read_offset >= self.filled
    }

    /// Reset both cursors and retag the buffer for reuse
    pub fn reset(&mut self, kind: BufferKind) {
        self.filled = 0;
        self.read_offset = 0;
        self.kind = kind;
    }

    /// Append at the fill cursor, clamped to capacity. Returns bytes stored.
    pub fn append(&mut self, bytes: &[u8]) -> usize {
        let free = self.capacity() - self.filled;
        let n = bytes.len().min(free);
        self.data[self.filled..self.filled + n].copy_from_slice(&bytes[..n]);
        self.filled += n;
        n
    }

    /// Write into an absolute slot without moving the fill cursor.
    ///
    /// Used for wave windows, where the fill length is reserved up front.
    /// Returns the number of bytes stored (clamped to capacity).
    pub fn write_at(&mut self, offset: usize, bytes: &[u8]) -> usize {
        if offset >= self.capacity() {
            return 0;
        }
        let n = bytes.len().min(self.capacity() - offset);
        self.data[offset..offset + n].copy_from_slice(&bytes[..n]);
        n
    }

    /// Zero `len` bytes starting at `offset`, clamped to capacity
    pub fn zero_range(&mut self, offset: usize, len: usize) {
        let start = offset.min(self.capacity());
        let end = offset.saturating_add(len).min(self.capacity());
        self.data[start..end].fill(0);
    }

    /// Reserve `len` bytes as the filled region, clamped to capacity
    pub fn set_filled(&mut self, len: usize) {
        self.filled = len.min(self.capacity());
        self.read_offset = self.read_offset.min(self.filled);
    }

    /// The filled region `[0, filled)`
    pub fn filled_bytes(&self) -> &[u8] {
        &self.data[..self.filled]
    }

    /// Copy unread bytes into `out`, advancing the read cursor
    pub fn consume(&mut self, out: &mut [u8]) -> usize {
        let n = out.len().min(self.unread());
        out[..n].copy_from_slice(&self.data[self.read_offset..self.read_offset + n]);
        self.read_offset += n;
        n
    }
}

/// Snapshot of pool counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Buffers ever allocated by the pool
    pub allocated: usize,
    /// Obtains served from the free list
    pub recycled: usize,
    /// Buffers dropped through [`BufferPool::free`] or [`BufferPool::drain`]
    pub freed: usize,
    /// Buffers currently sitting in the free list
    pub idle: usize,
}

impl PoolStats {
    /// Buffers allocated and not yet freed, wherever they currently live
    pub fn live(&self) -> usize {
        self.allocated.saturating_sub(self.freed)
    }
}

/// Thread-safe recycler for fixed-capacity buffers
///
/// The pool does not cap the number of buffers; a consumer that never reads
/// makes it grow by one buffer per wave.
#[derive(Debug)]
pub struct BufferPool {
    capacity: usize,
    free_list: Mutex<VecDeque<BufferItem>>,
    allocated: AtomicUsize,
    recycled: AtomicUsize,
    freed: AtomicUsize,
}

impl BufferPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            free_list: Mutex::new(VecDeque::new()),
            allocated: AtomicUsize::new(0),
            recycled: AtomicUsize::new(0),
            freed: AtomicUsize::new(0),
        }
    }

    /// Capacity of every buffer this pool hands out
    pub fn buffer_capacity(&self) -> usize {
        self.capacity
    }

    /// Return a recycled buffer, or allocate a new one.
    ///
    /// Recycled buffers keep their previous cursors; callers reset them.
    pub fn obtain(&self) -> Result<BufferItem> {
        if let Some(item) = lock(&self.free_list).pop_front() {
            self.recycled.fetch_add(1, Ordering::Relaxed);
            return Ok(item);
        }

        let item = BufferItem::with_capacity(self.capacity)?;
        self.allocated.fetch_add(1, Ordering::Relaxed);
        Ok(item)
    }

    /// Put a buffer back on the free list
    pub fn release(&self, item: BufferItem) {
        lock(&self.free_list).push_back(item);
    }

    /// Drop a buffer for good, keeping the counters balanced
    pub fn free(&self, item: BufferItem) {
        drop(item);
        self.freed.fetch_add(1, Ordering::Relaxed);
    }

    /// Free every idle buffer. Returns how many were dropped.
    pub fn drain(&self) -> usize {
        let items: Vec<BufferItem> = lock(&self.free_list).drain(..).collect();
        let count = items.len();
        for item in items {
            self.free(item);
        }
        count
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            allocated: self.allocated.load(Ordering::Relaxed),
            recycled: self.recycled.load(Ordering::Relaxed),
            freed: self.freed.load(Ordering::Relaxed),
            idle: lock(&self.free_list).len(),
        }
    }
}

/// FIFO of filled buffers waiting for the reader
#[derive(Debug, Default)]
pub struct ReadyQueue {
    items: Mutex<VecDeque<BufferItem>>,
}

impl ReadyQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, item: BufferItem) {
        lock(&self.items).push_back(item);
    }

    pub fn pop(&self) -> Option<BufferItem> {
        lock(&self.items).pop_front()
    }

    /// Advisory only: another thread may push or pop right after
    pub fn len(&self) -> usize {
        lock(&self.items).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.items).is_empty()
    }

    /// Free every queued buffer through `pool`. Returns how many were dropped.
    pub fn drain_into(&self, pool: &BufferPool) -> usize {
        let items: Vec<BufferItem> = lock(&self.items).drain(..).collect();
        let count = items.len();
        for item in items {
            pool.free(item);
        }
        count
    }
}

/// A poisoned lock only means another holder panicked mid-push or mid-pop;
/// the deque itself is still consistent.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
