// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Bounded byte ring buffer with watermark-gated blocking (spec §4.1).
//!
//! Single mutex, three condition variables (writable, readable, drained).
//! Do not split the mutex: every invariant below depends on writer and
//! reader observing a single, consistent view of `read`/`write`/`full`.

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FifoError {
    #[error("timed out waiting on fifo")]
    Timeout,
    #[error("requested minimum bytes ({requested}) exceeds capacity ({capacity})")]
    MinBytesExceedsCapacity { requested: usize, capacity: usize },
    #[error("unlock_after_read({n}) exceeds the {available} contiguous readable bytes")]
    ReadBeyondContiguous { n: usize, available: usize },
    #[error("unlock_after_write({n}) exceeds the {available} contiguous writable bytes")]
    WriteBeyondContiguous { n: usize, available: usize },
    #[error("unlock_after_write called with n>0 while draining")]
    WriteWhileDraining,
}

/// Which byte count `size()` reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeMode {
    Total,
    Used,
    Free,
    /// Contiguous bytes readable before wrap or the write cursor.
    NextReadable,
    /// Contiguous bytes writable before wrap or the read cursor.
    NextWritable,
}

struct Inner {
    buf: Vec<u8>,
    read: usize,
    write: usize,
    full: bool,
    draining: bool,
    low_watermark: usize,
    high_watermark: usize,
}

impl Inner {
    fn used(&self) -> usize {
        if self.full {
            self.buf.len()
        } else if self.write >= self.read {
            self.write - self.read
        } else {
            self.buf.len() - (self.read - self.write)
        }
    }

    fn free(&self) -> usize {
        self.buf.len() - self.used()
    }

    fn next_readable(&self) -> usize {
        let used = self.used();
        if used == 0 {
            return 0;
        }
        if self.write > self.read {
            used
        } else {
            // wrapped or full: readable run to the end of the buffer
            (self.buf.len() - self.read).min(used)
        }
    }

    fn next_writable(&self) -> usize {
        let free = self.free();
        if free == 0 {
            return 0;
        }
        if self.read > self.write {
            free
        } else {
            (self.buf.len() - self.write).min(free)
        }
    }

    fn debug_check_invariants(&self) {
        debug_assert_eq!(self.used() + self.free(), self.buf.len());
        debug_assert!(self.next_readable() + self.next_writable() <= self.buf.len());
        if self.used() == self.buf.len() {
            debug_assert!(self.full);
        }
        if self.used() == 0 {
            debug_assert!(!self.full);
            debug_assert_eq!(self.read, self.write);
        }
    }
}

/// A fixed-capacity byte ring shared between exactly one writer thread and
/// one reader thread, coordinated through a single lock.
pub struct Fifo {
    inner: Mutex<Inner>,
    writable: Condvar,
    readable: Condvar,
    drained: Condvar,
}

/// RAII guard returned by the `lock_wait_*` family; holds the lock so the
/// caller can read/write the contiguous region before calling
/// `unlock_after_read`/`unlock_after_write`/`fill_and_unlock`.
pub struct FifoGuard<'a> {
    fifo: &'a Fifo,
    guard: Option<parking_lot::MutexGuard<'a, Inner>>,
}

impl Fifo {
    pub fn new(capacity: usize) -> Self {
        Self::with_watermarks(capacity, capacity / 4, capacity * 3 / 4)
    }

    pub fn with_watermarks(capacity: usize, low_watermark: usize, high_watermark: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                buf: vec![0u8; capacity],
                read: 0,
                write: 0,
                full: false,
                draining: false,
                low_watermark,
                high_watermark,
            }),
            writable: Condvar::new(),
            readable: Condvar::new(),
            drained: Condvar::new(),
        }
    }

    pub fn size(&self, mode: SizeMode) -> usize {
        let inner = self.inner.lock();
        match mode {
            SizeMode::Total => inner.buf.len(),
            SizeMode::Used => inner.used(),
            SizeMode::Free => inner.free(),
            SizeMode::NextReadable => inner.next_readable(),
            SizeMode::NextWritable => inner.next_writable(),
        }
    }

    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.read = 0;
        inner.write = 0;
        inner.full = false;
        inner.draining = false;
    }

    /// Block until `free >= min_bytes` and `used < low_watermark`, or
    /// `timeout` elapses. Returns a guard holding the lock on success.
    pub fn lock_wait_writable(
        &self,
        timeout: Duration,
        min_bytes: usize,
    ) -> Result<FifoGuard<'_>, FifoError> {
        let mut inner = self.inner.lock();
        if min_bytes > inner.buf.len() {
            return Err(FifoError::MinBytesExceedsCapacity {
                requested: min_bytes,
                capacity: inner.buf.len(),
            });
        }
        let deadline = Instant::now() + timeout;
        while !(inner.free() >= min_bytes && inner.used() < inner.low_watermark) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(FifoError::Timeout);
            }
            let result = self.writable.wait_for(&mut inner, remaining);
            if result.timed_out()
                && !(inner.free() >= min_bytes && inner.used() < inner.low_watermark)
            {
                return Err(FifoError::Timeout);
            }
        }
        Ok(FifoGuard { fifo: self, guard: Some(inner) })
    }

    /// Block until `used > high_watermark`, or `timeout` elapses.
    pub fn lock_wait_readable(&self, timeout: Duration) -> Result<FifoGuard<'_>, FifoError> {
        let mut inner = self.inner.lock();
        let deadline = Instant::now() + timeout;
        while inner.used() <= inner.high_watermark {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(FifoError::Timeout);
            }
            let result = self.readable.wait_for(&mut inner, remaining);
            if result.timed_out() && inner.used() <= inner.high_watermark {
                return Err(FifoError::Timeout);
            }
        }
        Ok(FifoGuard { fifo: self, guard: Some(inner) })
    }

    /// Set `draining`, then block until `used == 0` or `timeout` elapses.
    /// `draining` is cleared on return regardless of outcome.
    pub fn lock_wait_drained(&self, timeout: Duration) -> Result<(), FifoError> {
        let mut inner = self.inner.lock();
        inner.draining = true;
        let deadline = Instant::now() + timeout;
        let mut result = Ok(());
        while inner.used() != 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                result = Err(FifoError::Timeout);
                break;
            }
            let wait = self.drained.wait_for(&mut inner, remaining);
            if wait.timed_out() && inner.used() != 0 {
                result = Err(FifoError::Timeout);
                break;
            }
        }
        inner.draining = false;
        result
    }
}

impl<'a> FifoGuard<'a> {
    fn inner_mut(&mut self) -> &mut Inner {
        self.guard.as_mut().expect("fifo guard used after unlock")
    }

    /// Contiguous bytes readable right now without re-acquiring the lock.
    pub fn next_readable_len(&self) -> usize {
        self.guard.as_ref().expect("fifo guard used after unlock").next_readable()
    }

    /// Contiguous bytes writable right now without re-acquiring the lock.
    pub fn next_writable_len(&self) -> usize {
        self.guard.as_ref().expect("fifo guard used after unlock").next_writable()
    }

    pub fn get_read_ptr(&self) -> (&[u8], usize) {
        let inner = self.guard.as_ref().expect("fifo guard used after unlock");
        let n = inner.next_readable();
        (&inner.buf[inner.read..inner.read + n], n)
    }

    pub fn get_write_ptr(&mut self) -> (&mut [u8], usize) {
        let inner = self.guard.as_mut().expect("fifo guard used after unlock");
        let n = inner.next_writable();
        let write = inner.write;
        (&mut inner.buf[write..write + n], n)
    }

    /// Advance the read cursor by `n` and release the lock, signalling the
    /// highest-priority waiter per spec §4.1: `drained` if now empty and
    /// draining, else `writable`, else `readable`.
    pub fn unlock_after_read(mut self, n: usize) -> Result<(), FifoError> {
        let inner = self.inner_mut();
        let available = inner.next_readable();
        if n > available {
            return Err(FifoError::ReadBeyondContiguous { n, available });
        }
        if n > 0 {
            inner.read = (inner.read + n) % inner.buf.len();
            inner.full = false;
        }
        inner.debug_check_invariants();
        self.signal_after_change();
        Ok(())
    }

    /// Advance the write cursor by `n` and release the lock, signalling per
    /// the same priority order.
    pub fn unlock_after_write(mut self, n: usize) -> Result<(), FifoError> {
        let inner = self.inner_mut();
        if inner.draining && n > 0 {
            tracing::error!("unlock_after_write({n}) called while draining; proceeding (bug-on-reach)");
            return Err(FifoError::WriteWhileDraining);
        }
        let available = inner.next_writable();
        if n > available {
            return Err(FifoError::WriteBeyondContiguous { n, available });
        }
        if n > 0 {
            inner.write = (inner.write + n) % inner.buf.len();
            if inner.write == inner.read {
                inner.full = true;
            }
        }
        inner.debug_check_invariants();
        self.signal_after_change();
        Ok(())
    }

    /// Copy up to `n` bytes from `src` (handling wrap with a two-segment
    /// copy) into the writable region, advance the write cursor, and
    /// release the lock. `n` is checked against total free space, not just
    /// the first contiguous run, since this writes both wrap segments
    /// itself rather than requiring the caller to split the call.
    pub fn fill_and_unlock(mut self, src: &[u8], n: usize) -> Result<(), FifoError> {
        let inner = self.inner_mut();
        if inner.draining && n > 0 {
            return Err(FifoError::WriteWhileDraining);
        }
        let free = inner.free();
        if n > free {
            return Err(FifoError::WriteBeyondContiguous { n, available: free });
        }
        let first = inner.next_writable().min(n);
        let write = inner.write;
        inner.buf[write..write + first].copy_from_slice(&src[..first]);
        let remaining = n - first;
        if remaining > 0 {
            inner.buf[0..remaining].copy_from_slice(&src[first..first + remaining]);
        }
        if n > 0 {
            inner.write = (inner.write + n) % inner.buf.len();
            if inner.write == inner.read {
                inner.full = true;
            }
        }
        inner.debug_check_invariants();
        self.signal_after_change();
        Ok(())
    }

    fn signal_after_change(&self) {
        let inner = self.guard.as_ref().unwrap();
        if inner.draining && inner.used() == 0 {
            self.fifo.drained.notify_one();
        } else if inner.free() > 0 && inner.used() < inner.low_watermark {
            self.fifo.writable.notify_one();
        } else if inner.used() > inner.high_watermark {
            self.fifo.readable.notify_one();
        }
    }
}
