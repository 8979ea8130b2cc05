use crate::error::{Error, Result};
use crate::pool::{BufferPool, HeapPool, PooledBuffer};

const MIN_COPY_CAPACITY: usize = 64;

/// Public view of an accumulator's current mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccumulatorMode {
    /// Nothing was appended yet.
    Uninitialized,
    /// The value is a contiguous range of the original buffer.
    InPlace,
    /// The value is still a contiguous range of the original buffer, but
    /// bytes were skipped after it, so the next append must copy.
    PendingCopyOnAppend,
    /// The value lives in the accumulator's own buffer.
    Copy,
}

#[derive(Debug, Clone, Copy)]
enum State {
    Uninitialized,
    InPlace { start: usize, len: usize },
    PendingCopyOnAppend { start: usize, len: usize },
    Copy { len: usize },
}

/// Accumulates a field value as ranges of some original buffer, staying
/// zero-copy for as long as those ranges are contiguous.
///
/// The first append following a [`InPlaceOrCopyAccumulator::skipped`] call,
/// or any [`InPlaceOrCopyAccumulator::append_single`] call, moves the value
/// into an owned buffer rented from a [`BufferPool`]. This buffer survives
/// [`InPlaceOrCopyAccumulator::reset`] so that it can be reused by later
/// values, and only ever grows.
///
/// Every method taking an `original` buffer expects the same one for the
/// whole duration of a value, i.e. between two resets.
#[derive(Debug)]
pub struct InPlaceOrCopyAccumulator<P: BufferPool = HeapPool> {
    state: State,
    copy: PooledBuffer<P>,
    disposed: bool,
}

impl InPlaceOrCopyAccumulator<HeapPool> {
    pub fn new() -> Self {
        Self::from_pool(HeapPool)
    }
}

impl Default for InPlaceOrCopyAccumulator<HeapPool> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: BufferPool> InPlaceOrCopyAccumulator<P> {
    /// Create an accumulator renting its copy buffer from `pool`, lazily,
    /// the first time a value needs to be copied.
    pub fn from_pool(pool: P) -> Self {
        Self {
            state: State::Uninitialized,
            copy: PooledBuffer::empty(pool),
            disposed: false,
        }
    }

    #[inline]
    pub fn mode(&self) -> AccumulatorMode {
        match self.state {
            State::Uninitialized => AccumulatorMode::Uninitialized,
            State::InPlace { .. } => AccumulatorMode::InPlace,
            State::PendingCopyOnAppend { .. } => AccumulatorMode::PendingCopyOnAppend,
            State::Copy { .. } => AccumulatorMode::Copy,
        }
    }

    /// Length of the accumulated value so far.
    #[inline]
    pub fn len(&self) -> usize {
        match self.state {
            State::Uninitialized => 0,
            State::InPlace { len, .. }
            | State::PendingCopyOnAppend { len, .. }
            | State::Copy { len } => len,
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Current size of the owned copy buffer, 0 if none was rented yet.
    #[inline]
    pub fn copy_capacity(&self) -> usize {
        self.copy.len()
    }

    #[inline]
    fn check_disposed(&self) -> Result<()> {
        if self.disposed {
            Err(Error::disposed())
        } else {
            Ok(())
        }
    }

    // Append bytes after the first `len` bytes of the copy buffer, growing it
    // if needed, and return the new length.
    fn copy_bytes(&mut self, len: usize, bytes: &[u8]) -> Result<usize> {
        let required = len + bytes.len();

        if required > self.copy.len() {
            let capacity = (required * 2).max(MIN_COPY_CAPACITY);

            self.copy.grow_with(capacity, |old, new| {
                new[..len].copy_from_slice(&old[..len]);
            })?;
        }

        self.copy.get_mut()?[len..required].copy_from_slice(bytes);

        Ok(required)
    }

    // Move whatever was accumulated so far into the copy buffer and return
    // its length there.
    fn materialize(&mut self, original: &[u8]) -> Result<usize> {
        match self.state {
            State::Uninitialized => Ok(0),
            State::InPlace { start, len } | State::PendingCopyOnAppend { start, len } => {
                self.copy_bytes(0, &original[start..start + len])
            }
            State::Copy { len } => Ok(len),
        }
    }

    /// Append `original[start..start + len]` to the value.
    ///
    /// # Panics
    ///
    /// If the value is in place and `start` is not the end of the current
    /// range, or if the range is out of `original`'s bounds.
    pub fn append(&mut self, original: &[u8], start: usize, len: usize) -> Result<()> {
        self.check_disposed()?;

        self.state = match self.state {
            State::Uninitialized => {
                assert!(start + len <= original.len(), "appended range is out of bounds");
                State::InPlace { start, len }
            }
            State::InPlace {
                start: current_start,
                len: current_len,
            } => {
                assert_eq!(
                    current_start + current_len,
                    start,
                    "in place appends must be contiguous"
                );
                assert!(start + len <= original.len(), "appended range is out of bounds");

                State::InPlace {
                    start: current_start,
                    len: current_len + len,
                }
            }
            State::PendingCopyOnAppend { .. } | State::Copy { .. } => {
                let current_len = self.materialize(original)?;
                let len = self.copy_bytes(current_len, &original[start..start + len])?;

                State::Copy { len }
            }
        };

        Ok(())
    }

    /// Append a single byte that does not come from `original`, e.g. an
    /// unescaped character. Always moves the value into the copy buffer.
    pub fn append_single(&mut self, original: &[u8], byte: u8) -> Result<()> {
        self.check_disposed()?;

        let current_len = self.materialize(original)?;
        let len = self.copy_bytes(current_len, &[byte])?;

        self.state = State::Copy { len };

        Ok(())
    }

    /// Signal that bytes of `original` were consumed without being part of
    /// the value. Nothing is copied until something else gets appended.
    pub fn skipped(&mut self) -> Result<()> {
        self.check_disposed()?;

        if let State::InPlace { start, len } = self.state {
            self.state = State::PendingCopyOnAppend { start, len };
        }

        Ok(())
    }

    /// Return the accumulated value, as a slice of `original` whenever no
    /// copy was needed.
    pub fn as_slice<'a>(&'a self, original: &'a [u8]) -> Result<&'a [u8]> {
        self.check_disposed()?;

        Ok(match self.state {
            State::Uninitialized => &[],
            State::InPlace { start, len } | State::PendingCopyOnAppend { start, len } => {
                &original[start..start + len]
            }
            State::Copy { len } => &self.copy.get()?[..len],
        })
    }

    /// Get ready for the next value, keeping the copy buffer around.
    pub fn reset(&mut self) -> Result<()> {
        self.check_disposed()?;

        self.state = State::Uninitialized;

        Ok(())
    }

    /// Give the copy buffer back to its pool. Idempotent.
    pub fn dispose(&mut self) {
        self.state = State::Uninitialized;
        self.disposed = true;
        self.copy.release();
    }
}
