use std::ops::Range;

use log::debug;

use crate::error::{Error, ErrorKind, Result};
use crate::escape::Escaper;
use crate::pool::{BufferPool, HeapPool, PooledBuffer};

const MIN_CAPACITY: usize = 256;
const CELL_LEN: usize = 2;
const LEN_PREFIX: usize = 2;

#[inline]
fn read_cell(buffer: &[u8], i: usize) -> i16 {
    let at = buffer.len() - CELL_LEN * (i + 1);
    i16::from_le_bytes([buffer[at], buffer[at + 1]])
}

#[inline]
fn write_cell(buffer: &mut [u8], i: usize, cell: i16) {
    let at = buffer.len() - CELL_LEN * (i + 1);
    buffer[at..at + CELL_LEN].copy_from_slice(&cell.to_le_bytes());
}

#[inline]
fn cell_start(cell: i16) -> usize {
    cell.unsigned_abs() as usize - 1
}

// Ranges of the name & encoded form of the i-th entry.
fn decode(buffer: &[u8], count: usize, data_len: usize, i: usize) -> (Range<usize>, Range<usize>) {
    let cell = read_cell(buffer, i);
    let start = cell_start(cell);

    let end = if i + 1 < count {
        cell_start(read_cell(buffer, i + 1))
    } else {
        data_len
    };

    if cell > 0 {
        return (start..end, start..end);
    }

    let name_len = u16::from_le_bytes([buffer[start], buffer[start + 1]]) as usize;
    let name_start = start + LEN_PREFIX;
    let name_end = name_start + name_len;

    (name_start..name_end, name_end..end)
}

/// Packed, append-only store of column names along with their on-the-wire
/// encoded forms, when those differ.
///
/// Everything lives in a single buffer rented from a [`BufferPool`]. Entry
/// data grows forward from the start of the buffer while a table of signed
/// 16-bit little-endian cells, one per entry, grows backward from its end.
/// A cell's absolute value is the 1-based offset of its entry's data, and
/// a negative cell marks an entry whose encoded form is distinct, in which
/// case its data starts with the 16-bit little-endian length of the name.
///
/// ```text
/// [name0][len1 name1 encoded1][name2] ... free ... [cell2][cell1][cell0]
/// ```
#[derive(Debug)]
pub struct ColumnNameStore<P: BufferPool = HeapPool> {
    buffer: PooledBuffer<P>,
    data_len: usize,
    count: usize,
    disposed: bool,
}

impl ColumnNameStore<HeapPool> {
    pub fn new() -> Self {
        Self::from_pool(HeapPool)
    }
}

impl Default for ColumnNameStore<HeapPool> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: BufferPool> ColumnNameStore<P> {
    /// Create a store renting its buffer from `pool` on first addition.
    pub fn from_pool(pool: P) -> Self {
        Self {
            buffer: PooledBuffer::empty(pool),
            data_len: 0,
            count: 0,
            disposed: false,
        }
    }

    /// Number of columns.
    #[inline]
    pub fn count(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Current size of the underlying buffer.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    #[inline]
    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    // Buffer holding the i-th entry
    fn storage(&self, i: usize) -> Result<&[u8]> {
        if self.disposed {
            return Err(Error::disposed());
        }

        assert!(
            i < self.count,
            "column index {} is out of bounds for {} columns",
            i,
            self.count
        );

        self.buffer.get()
    }

    fn reserve(&mut self, entry_len: usize) -> Result<()> {
        let data_len = self.data_len;
        let index_len = CELL_LEN * self.count;
        let required = data_len + entry_len + index_len + CELL_LEN;

        if required <= self.buffer.len() {
            return Ok(());
        }

        let capacity = required.max(self.buffer.len() * 2).max(MIN_CAPACITY);

        debug!(
            "growing column name store from {} to {} bytes",
            self.buffer.len(),
            capacity
        );

        self.buffer.grow_with(capacity, |old, new| {
            new[..data_len].copy_from_slice(&old[..data_len]);

            let new_len = new.len();
            new[new_len - index_len..].copy_from_slice(&old[old.len() - index_len..]);
        })
    }

    /// Append a column. `encoded` is the column's on-the-wire form, and is
    /// only stored when it differs from `name`.
    ///
    /// Fails with [`ErrorKind::ColumnNamesTooLarge`] if the total size of
    /// names and encoded forms would exceed what 16-bit offsets address.
    pub fn add(&mut self, name: &[u8], encoded: Option<&[u8]>) -> Result<()> {
        if self.disposed {
            return Err(Error::disposed());
        }

        let encoded = encoded.filter(|encoded| *encoded != name);

        let entry_len = match encoded {
            Some(encoded) => LEN_PREFIX + name.len() + encoded.len(),
            None => name.len(),
        };

        let start = self.data_len;
        let end = start + entry_len;

        // Both the entry's 1-based offset and its end must fit a cell
        if start + 1 > i16::MAX as usize || end > i16::MAX as usize {
            return Err(Error::new(ErrorKind::ColumnNamesTooLarge {
                len: end.max(start + 1),
            }));
        }

        self.reserve(entry_len)?;

        let buffer = self.buffer.get_mut()?;
        let offset = (start + 1) as i16;

        match encoded {
            Some(encoded) => {
                let name_start = start + LEN_PREFIX;
                let name_end = name_start + name.len();

                buffer[start..name_start].copy_from_slice(&(name.len() as u16).to_le_bytes());
                buffer[name_start..name_end].copy_from_slice(name);
                buffer[name_end..end].copy_from_slice(encoded);
                write_cell(buffer, self.count, -offset);
            }
            None => {
                buffer[start..end].copy_from_slice(name);
                write_cell(buffer, self.count, offset);
            }
        }

        self.data_len = end;
        self.count += 1;

        Ok(())
    }

    /// Append a column whose encoded form is computed by `escaper`.
    pub fn push_escaped(&mut self, name: &[u8], escaper: &Escaper) -> Result<()> {
        let mut encoded = Vec::with_capacity(name.len() + 2);

        if escaper.escape_into(name, &mut encoded) {
            self.add(name, Some(&encoded))
        } else {
            self.add(name, None)
        }
    }

    /// Name of the `i`-th column.
    ///
    /// # Panics
    ///
    /// If `i >= self.count()`.
    pub fn column_at(&self, i: usize) -> Result<&[u8]> {
        let buffer = self.storage(i)?;

        let (name, _) = decode(buffer, self.count, self.data_len, i);

        Ok(&buffer[name])
    }

    /// Encoded form of the `i`-th column, which is its name when no distinct
    /// form was stored.
    ///
    /// # Panics
    ///
    /// If `i >= self.count()`.
    pub fn encoded_column_at(&self, i: usize) -> Result<&[u8]> {
        let buffer = self.storage(i)?;

        let (_, encoded) = decode(buffer, self.count, self.data_len, i);

        Ok(&buffer[encoded])
    }

    /// # Panics
    ///
    /// If `i >= self.count()`.
    pub fn has_distinct_encoding(&self, i: usize) -> Result<bool> {
        let buffer = self.storage(i)?;

        Ok(read_cell(buffer, i) < 0)
    }

    /// Index of the first column named `name`, if any.
    pub fn position(&self, name: &[u8]) -> Result<Option<usize>> {
        Ok(self.iter()?.position(|(column, _)| column == name))
    }

    /// Iterate over `(name, encoded)` pairs, in order.
    pub fn iter(&self) -> Result<ColumnNames<'_>> {
        if self.disposed {
            return Err(Error::disposed());
        }

        Ok(ColumnNames {
            buffer: self.buffer.get().unwrap_or(&[]),
            count: self.count,
            data_len: self.data_len,
            index: 0,
        })
    }

    /// Forget every column, keeping the buffer.
    pub fn clear(&mut self) -> Result<()> {
        if self.disposed {
            return Err(Error::disposed());
        }

        self.data_len = 0;
        self.count = 0;

        Ok(())
    }

    /// Give the buffer back to its pool. Idempotent.
    pub fn dispose(&mut self) {
        self.data_len = 0;
        self.count = 0;
        self.disposed = true;
        self.buffer.release();
    }
}

/// Iterator over the `(name, encoded)` pairs of a [`ColumnNameStore`].
#[derive(Debug, Clone)]
pub struct ColumnNames<'a> {
    buffer: &'a [u8],
    count: usize,
    data_len: usize,
    index: usize,
}

impl<'a> Iterator for ColumnNames<'a> {
    type Item = (&'a [u8], &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.count {
            return None;
        }

        let (name, encoded) = decode(self.buffer, self.count, self.data_len, self.index);

        self.index += 1;

        Some((&self.buffer[name], &self.buffer[encoded]))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.count - self.index;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for ColumnNames<'_> {}
