use std::io::{self, Read};
use std::ops::Range;

use log::trace;

use crate::error::{Error, Result};
use crate::pool::{BufferPool, HeapPool, PooledBuffer};

pub(crate) const DEFAULT_CAPACITY: usize = 8192;

/// A fixed-capacity read buffer able to "unget" a suffix of its last fill.
///
/// Each call to [`PushbackBuffer::fill`] either replays a pending pushback
/// region, without touching the source, or performs a single read of at most
/// [`PushbackBuffer::capacity`] bytes from the source.
///
/// The buffer is rented from a [`BufferPool`] on construction and given back
/// by [`PushbackBuffer::dispose`], or on drop.
#[derive(Debug)]
pub struct PushbackBuffer<P: BufferPool = HeapPool> {
    buffer: PooledBuffer<P>,
    capacity: usize,
    filled: usize,
    pending: Option<Range<usize>>,
}

impl PushbackBuffer<HeapPool> {
    /// Create a buffer of 8192 bytes backed by the heap.
    pub fn new() -> Result<Self> {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a buffer of `capacity` bytes backed by the heap.
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        Self::from_pool(HeapPool, capacity)
    }
}

impl<P: BufferPool> PushbackBuffer<P> {
    /// Rent a buffer of `capacity` bytes from `pool`.
    ///
    /// # Panics
    ///
    /// If `capacity` is 0, since such a buffer could never report anything
    /// but the end of input.
    pub fn from_pool(pool: P, capacity: usize) -> Result<Self> {
        assert!(capacity > 0, "pushback buffer capacity must be positive");

        // NOTE: pools may hand out larger buffers, but fills must never
        // produce more than the capacity we were asked for.
        let buffer = PooledBuffer::new(pool, capacity)?;

        Ok(Self {
            buffer,
            capacity,
            filled: 0,
            pending: None,
        })
    }

    #[inline]
    fn storage_mut(&mut self) -> Result<&mut [u8]> {
        let capacity = self.capacity;
        self.buffer.get_mut().map(|buffer| &mut buffer[..capacity])
    }

    /// Fixed number of bytes a single fill can produce.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns whether a pushback region is waiting to be replayed.
    #[inline]
    pub fn has_pending_pushback(&self) -> bool {
        self.pending.is_some()
    }

    #[inline]
    pub fn is_disposed(&self) -> bool {
        self.buffer.is_released()
    }

    /// Bytes produced by the last fill.
    #[inline]
    pub fn filled(&self) -> Result<&[u8]> {
        self.buffer.get().map(|buffer| &buffer[..self.filled])
    }

    #[inline]
    fn replay(&mut self) -> Result<Option<usize>> {
        let Some(range) = self.pending.take() else {
            return Ok(None);
        };

        let len = range.len();

        self.storage_mut()?.copy_within(range, 0);
        self.filled = len;

        trace!("replayed {} pushed back bytes", len);

        Ok(Some(len))
    }

    /// Fill the buffer, returning the number of available bytes, 0 meaning
    /// the source is exhausted.
    ///
    /// If a pushback region is pending, it is moved to the front of the
    /// buffer and its length returned, without reading from `source`.
    pub fn fill<R: Read>(&mut self, source: &mut R) -> Result<usize> {
        if self.is_disposed() {
            return Err(Error::disposed());
        }

        if let Some(len) = self.replay()? {
            return Ok(len);
        }

        let storage = self.storage_mut()?;

        let read = loop {
            match source.read(storage) {
                Ok(read) => break read,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }
        };

        self.filled = read;

        trace!("filled {} bytes from source", read);

        Ok(read)
    }

    /// Suspendable version of [`PushbackBuffer::fill`].
    ///
    /// The only suspension point is the read from `source`. Dropping the
    /// returned future before completion leaves the buffer exactly as it was
    /// before the call, and any pending pushback region is replayed without
    /// suspending at all.
    #[cfg(feature = "tokio")]
    pub async fn fill_async<R>(&mut self, source: &mut R) -> Result<usize>
    where
        R: tokio::io::AsyncRead + Unpin,
    {
        use tokio::io::AsyncReadExt;

        if self.is_disposed() {
            return Err(Error::disposed());
        }

        if let Some(len) = self.replay()? {
            return Ok(len);
        }

        let storage = self.storage_mut()?;

        let read = loop {
            match source.read(storage).await {
                Ok(read) => break read,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }
        };

        self.filled = read;

        trace!("filled {} bytes from async source", read);

        Ok(read)
    }

    /// Mark the last `suffix_len` bytes of the first `valid_len` bytes of the
    /// last fill as unconsumed, so that the next fill reproduces them, in
    /// order, before reading anything new from the source.
    ///
    /// # Panics
    ///
    /// If `suffix_len > valid_len`, if `valid_len` exceeds what the last fill
    /// produced, or if a pushback region is already pending.
    pub fn push_back(&mut self, valid_len: usize, suffix_len: usize) -> Result<()> {
        if self.is_disposed() {
            return Err(Error::disposed());
        }

        assert!(
            suffix_len <= valid_len,
            "cannot push back {} bytes out of {} valid ones",
            suffix_len,
            valid_len
        );
        assert!(
            valid_len <= self.filled,
            "{} valid bytes exceed the {} bytes of the last fill",
            valid_len,
            self.filled
        );
        assert!(
            self.pending.is_none(),
            "a pushback region is already pending"
        );

        if suffix_len > 0 {
            self.pending = Some(valid_len - suffix_len..valid_len);

            trace!("pushed back {} bytes", suffix_len);
        }

        Ok(())
    }

    /// Give the buffer back to its pool. Idempotent.
    pub fn dispose(&mut self) {
        self.pending = None;
        self.filled = 0;
        self.buffer.release();
    }
}
