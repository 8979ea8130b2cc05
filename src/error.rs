use std::{error, fmt, io, result};

/// The specific type of an error.
#[derive(Debug)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Wrap a [std::io::Error] raised by the underlying source.
    Io(io::Error),

    /// Indicate that a component was used after having been disposed, i.e.
    /// after its pooled buffer was given back.
    Disposed,

    /// Indicate that a [`BufferPool`](crate::BufferPool) could not satisfy a
    /// rent or growth request.
    PoolExhausted {
        /// Number of bytes that were requested
        requested: usize,
    },

    /// Indicate that a [`ColumnNameStore`](crate::ColumnNameStore) would need
    /// to address more bytes than its signed 16-bit offsets allow.
    ColumnNamesTooLarge {
        /// Byte length the names region would have reached
        len: usize,
    },
}

/// An error occurring when filling, sniffing or storing CSV data.
#[derive(Debug)]
pub struct Error(ErrorKind);

impl Error {
    pub(crate) fn new(kind: ErrorKind) -> Self {
        Self(kind)
    }

    #[inline]
    pub(crate) fn disposed() -> Self {
        Self(ErrorKind::Disposed)
    }

    /// Return whether the wrapped error is a [`std::io::Error`].
    pub fn is_io_error(&self) -> bool {
        matches!(self.0, ErrorKind::Io(_))
    }

    /// Return whether the error was caused by using a disposed component.
    pub fn is_disposed(&self) -> bool {
        matches!(self.0, ErrorKind::Disposed)
    }

    /// Return a reference to the underlying [`ErrorKind`].
    pub fn kind(&self) -> &ErrorKind {
        &self.0
    }

    /// Unwraps the error into its underlying [`ErrorKind`].
    pub fn into_kind(self) -> ErrorKind {
        self.0
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self(ErrorKind::Io(err))
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        match err.0 {
            ErrorKind::Io(inner) => inner,
            _ => Self::other(err),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self.0 {
            ErrorKind::Io(ref err) => Some(err),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.0 {
            ErrorKind::Io(ref err) => err.fmt(f),
            ErrorKind::Disposed => write!(f, "CSV error: component used after being disposed"),
            ErrorKind::PoolExhausted { requested } => write!(
                f,
                "CSV error: buffer pool could not provide {} bytes",
                requested
            ),
            ErrorKind::ColumnNamesTooLarge { len } => write!(
                f,
                "CSV error: column names would span {} bytes, but at most {} can be addressed",
                len,
                i16::MAX
            ),
        }
    }
}

/// A type alias for `Result<T, simd_csv_tokenizer::Error>`.
pub type Result<T> = result::Result<T, Error>;
