use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use log::debug;

use crate::error::{Error, ErrorKind, Result};

/// A source of byte buffers that components rent on construction and give
/// back when disposed.
///
/// Rented buffers must be at least `min_len` bytes long. Their contents are
/// unspecified: callers must never read a byte they did not write first.
pub trait BufferPool {
    /// Rent a buffer of at least `min_len` bytes.
    fn rent(&self, min_len: usize) -> Result<Vec<u8>>;

    /// Give a previously rented buffer back to the pool.
    fn give_back(&self, buffer: Vec<u8>);
}

impl<P: BufferPool + ?Sized> BufferPool for &P {
    #[inline]
    fn rent(&self, min_len: usize) -> Result<Vec<u8>> {
        (**self).rent(min_len)
    }

    #[inline]
    fn give_back(&self, buffer: Vec<u8>) {
        (**self).give_back(buffer)
    }
}

impl<P: BufferPool + ?Sized> BufferPool for Rc<P> {
    #[inline]
    fn rent(&self, min_len: usize) -> Result<Vec<u8>> {
        (**self).rent(min_len)
    }

    #[inline]
    fn give_back(&self, buffer: Vec<u8>) {
        (**self).give_back(buffer)
    }
}

impl<P: BufferPool + ?Sized> BufferPool for Arc<P> {
    #[inline]
    fn rent(&self, min_len: usize) -> Result<Vec<u8>> {
        (**self).rent(min_len)
    }

    #[inline]
    fn give_back(&self, buffer: Vec<u8>) {
        (**self).give_back(buffer)
    }
}

/// A pool that always allocates and simply drops what it gets back.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeapPool;

impl BufferPool for HeapPool {
    #[inline]
    fn rent(&self, min_len: usize) -> Result<Vec<u8>> {
        Ok(vec![0; min_len])
    }

    #[inline]
    fn give_back(&self, _buffer: Vec<u8>) {}
}

/// A thread-safe pool keeping a bounded number of given back buffers around
/// so that later rents can reuse them.
///
/// An optional byte limit caps the total length of buffers rented out at
/// any given time, in which case rents going over it fail with
/// [`ErrorKind::PoolExhausted`].
#[derive(Debug)]
pub struct RecyclingPool {
    free: Mutex<Vec<Vec<u8>>>,
    max_retained: usize,
    limit: Option<usize>,
    outstanding: AtomicUsize,
}

impl Default for RecyclingPool {
    fn default() -> Self {
        Self::new(16)
    }
}

impl RecyclingPool {
    /// Create a pool retaining at most `max_retained` idle buffers.
    pub fn new(max_retained: usize) -> Self {
        Self {
            free: Mutex::new(Vec::new()),
            max_retained,
            limit: None,
            outstanding: AtomicUsize::new(0),
        }
    }

    /// Create a pool that refuses to have more than `limit` bytes rented out
    /// at once.
    pub fn with_limit(max_retained: usize, limit: usize) -> Self {
        let mut pool = Self::new(max_retained);
        pool.limit = Some(limit);
        pool
    }

    /// Number of bytes currently rented out.
    pub fn outstanding_bytes(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    /// Number of idle buffers ready to be reused.
    pub fn idle_buffers(&self) -> usize {
        self.free.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn reserve(&self, len: usize, requested: usize) -> Result<()> {
        let previous = self.outstanding.fetch_add(len, Ordering::AcqRel);

        if let Some(limit) = self.limit {
            if previous + len > limit {
                self.outstanding.fetch_sub(len, Ordering::AcqRel);
                return Err(Error::new(ErrorKind::PoolExhausted { requested }));
            }
        }

        Ok(())
    }
}

impl BufferPool for RecyclingPool {
    fn rent(&self, min_len: usize) -> Result<Vec<u8>> {
        let recycled = {
            let mut free = self.free.lock().unwrap_or_else(|e| e.into_inner());

            free.iter()
                .position(|buffer| buffer.len() >= min_len)
                .map(|i| free.swap_remove(i))
        };

        match recycled {
            Some(buffer) => {
                if let Err(err) = self.reserve(buffer.len(), min_len) {
                    self.give_back_idle(buffer);
                    return Err(err);
                }

                Ok(buffer)
            }
            None => {
                self.reserve(min_len, min_len)?;
                Ok(vec![0; min_len])
            }
        }
    }

    fn give_back(&self, buffer: Vec<u8>) {
        self.outstanding.fetch_sub(buffer.len(), Ordering::AcqRel);
        self.give_back_idle(buffer);
    }
}

impl RecyclingPool {
    fn give_back_idle(&self, buffer: Vec<u8>) {
        let mut free = self.free.lock().unwrap_or_else(|e| e.into_inner());

        if free.len() < self.max_retained {
            free.push(buffer);
        }
    }
}

/// Scoped ownership of a single rented buffer.
///
/// The buffer is rented on construction and given back exactly once, either
/// explicitly through [`PooledBuffer::release`] or when dropped. Releasing
/// twice is a no-op, and accessing the buffer after release yields
/// [`ErrorKind::Disposed`].
#[derive(Debug)]
pub struct PooledBuffer<P: BufferPool> {
    pool: P,
    buffer: Option<Vec<u8>>,
}

impl<P: BufferPool> PooledBuffer<P> {
    pub fn new(pool: P, len: usize) -> Result<Self> {
        let buffer = pool.rent(len)?;

        Ok(Self {
            pool,
            buffer: Some(buffer),
        })
    }

    /// Wrap a pool without renting anything yet. The handle starts released.
    pub(crate) fn empty(pool: P) -> Self {
        Self { pool, buffer: None }
    }

    #[inline]
    pub fn pool(&self) -> &P {
        &self.pool
    }

    /// Length of the held buffer, or 0 once released.
    #[inline]
    pub fn len(&self) -> usize {
        self.buffer.as_ref().map(Vec::len).unwrap_or(0)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn is_released(&self) -> bool {
        self.buffer.is_none()
    }

    #[inline]
    pub fn get(&self) -> Result<&[u8]> {
        self.buffer.as_deref().ok_or_else(Error::disposed)
    }

    #[inline]
    pub fn get_mut(&mut self) -> Result<&mut [u8]> {
        self.buffer.as_deref_mut().ok_or_else(Error::disposed)
    }

    /// Rent a buffer of at least `min_len` bytes, let `relocate` move the
    /// relevant data from the current buffer into it, then give the current
    /// buffer back.
    ///
    /// A released handle is treated as holding an empty buffer, so this also
    /// performs the initial rent of handles created with [`Self::empty`].
    pub(crate) fn grow_with<F>(&mut self, min_len: usize, relocate: F) -> Result<()>
    where
        F: FnOnce(&[u8], &mut [u8]),
    {
        let mut next = self.pool.rent(min_len)?;

        debug!(
            "growing pooled buffer from {} to {} bytes",
            self.len(),
            next.len()
        );

        if let Some(previous) = self.buffer.take() {
            relocate(&previous, &mut next);
            self.pool.give_back(previous);
        }

        self.buffer = Some(next);

        Ok(())
    }

    /// Give the buffer back to the pool. Idempotent.
    pub fn release(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            self.pool.give_back(buffer);
        }
    }
}

impl<P: BufferPool> Drop for PooledBuffer<P> {
    fn drop(&mut self) {
        self.release();
    }
}
