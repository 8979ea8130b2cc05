use std::io::Read;

use log::debug;
use memchr::{memchr, memchr2, memchr3};

use crate::dialect::{Dialect, RowEnding};
use crate::error::Result;
use crate::pool::BufferPool;
use crate::pushback::PushbackBuffer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CharClass {
    Plain,
    CarriageReturn,
    LineFeed,
    Quote,
    Escape,
    Comment,
}

fn class_table(dialect: &Dialect) -> [CharClass; 256] {
    let mut table = [CharClass::Plain; 256];

    if let Some(comment) = dialect.comment {
        table[comment as usize] = CharClass::Comment;
    }

    if dialect.quote.is_some() {
        if let Some(escape) = dialect.escape {
            table[escape as usize] = CharClass::Escape;
        }
    }

    if let Some(quote) = dialect.quote {
        table[quote as usize] = CharClass::Quote;
    }

    table[b'\r' as usize] = CharClass::CarriageReturn;
    table[b'\n' as usize] = CharClass::LineFeed;

    table
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SniffState {
    RowStart,
    Unquoted,
    Quoted,
    // Next byte is escaped and must be skipped
    QuotedEscape,
    Comment,
}

/// Outcome of row ending detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sniffed {
    ending: Option<RowEnding>,
    consumed: u64,
}

impl Sniffed {
    /// The detected row ending, `None` if the input ended before any was
    /// found.
    #[inline]
    pub fn ending(&self) -> Option<RowEnding> {
        self.ending
    }

    /// Number of bytes consumed from the stream, terminator included.
    #[inline]
    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    /// The detected row ending, or `default` if none was found.
    #[inline]
    pub fn or(&self, default: RowEnding) -> RowEnding {
        self.ending.unwrap_or(default)
    }
}

/// Detects the row ending used by a CSV stream by scanning its first row,
/// skipping quoted regions and leading comment rows' content.
///
/// The sniffer reads through a [`PushbackBuffer`] and pushes back whatever it
/// read past the terminator, so the next fill of the buffer starts exactly
/// after the first row.
///
/// All scanning state lives in the sniffer itself, which means a dropped
/// [`RowEndingSniffer::sniff_async`] future can be called again and will
/// resume from the last completed fill.
#[derive(Debug, Clone)]
pub struct RowEndingSniffer {
    classes: [CharClass; 256],
    quote: Option<u8>,
    escape: Option<u8>,
    default_row_ending: RowEnding,
    state: SniffState,
    pending_cr: bool,
    consumed: u64,
    result: Option<Sniffed>,
}

impl RowEndingSniffer {
    pub fn new(dialect: &Dialect) -> Self {
        let escape = match (dialect.quote, dialect.escape) {
            (Some(quote), Some(escape)) if quote != escape => Some(escape),
            _ => None,
        };

        Self {
            classes: class_table(dialect),
            quote: dialect.quote,
            escape,
            default_row_ending: dialect.default_row_ending,
            state: SniffState::RowStart,
            pending_cr: false,
            consumed: 0,
            result: None,
        }
    }

    /// Row ending configured for inputs where none can be detected.
    #[inline]
    pub fn default_row_ending(&self) -> RowEnding {
        self.default_row_ending
    }

    #[inline]
    pub fn is_done(&self) -> bool {
        self.result.is_some()
    }

    #[inline]
    fn class(&self, byte: u8) -> CharClass {
        self.classes[byte as usize]
    }

    // Handles a row ending found at `pos`, returning what was detected with
    // the number of bytes of `input` it consumed.
    #[inline]
    fn terminator(&mut self, input: &[u8], pos: usize) -> Option<(RowEnding, usize)> {
        if input[pos] == b'\n' {
            return Some((RowEnding::LineFeed, pos + 1));
        }

        match input.get(pos + 1) {
            Some(b'\n') => Some((RowEnding::CarriageReturnLineFeed, pos + 2)),
            Some(_) => Some((RowEnding::CarriageReturn, pos + 1)),
            None => {
                // Need to peek at next fill
                self.pending_cr = true;
                None
            }
        }
    }

    fn step(&mut self, input: &[u8]) -> Option<(RowEnding, usize)> {
        use SniffState::*;

        if self.pending_cr {
            self.pending_cr = false;

            return Some(if input[0] == b'\n' {
                (RowEnding::CarriageReturnLineFeed, 1)
            } else {
                (RowEnding::CarriageReturn, 0)
            });
        }

        let input_len = input.len();
        let mut pos: usize = 0;

        while pos < input_len {
            match self.state {
                RowStart => {
                    if self.class(input[pos]) == CharClass::Comment {
                        self.state = Comment;
                        pos += 1;
                    } else {
                        self.state = Unquoted;
                    }
                }
                Comment => {
                    // Quotes mean nothing within comments
                    if let Some(offset) = memchr2(b'\r', b'\n', &input[pos..]) {
                        return self.terminator(input, pos + offset);
                    } else {
                        break;
                    }
                }
                Unquoted => {
                    let found = match self.quote {
                        Some(quote) => memchr3(b'\r', b'\n', quote, &input[pos..]),
                        None => memchr2(b'\r', b'\n', &input[pos..]),
                    };

                    let Some(offset) = found else {
                        break;
                    };

                    pos += offset;

                    if self.class(input[pos]) == CharClass::Quote {
                        self.state = Quoted;
                        pos += 1;
                        continue;
                    }

                    return self.terminator(input, pos);
                }
                Quoted => {
                    let Some(quote) = self.quote else {
                        self.state = Unquoted;
                        continue;
                    };

                    let found = match self.escape {
                        Some(escape) => memchr2(quote, escape, &input[pos..]),
                        None => memchr(quote, &input[pos..]),
                    };

                    let Some(offset) = found else {
                        break;
                    };

                    pos += offset;

                    // NOTE: a doubled quote closes then reopens the quoted
                    // region, which amounts to staying in it.
                    self.state = if self.class(input[pos]) == CharClass::Escape {
                        QuotedEscape
                    } else {
                        Unquoted
                    };

                    pos += 1;
                }
                QuotedEscape => {
                    self.state = Quoted;
                    pos += 1;
                }
            }
        }

        None
    }

    fn finish(&mut self, ending: Option<RowEnding>, used: usize) -> Sniffed {
        let sniffed = Sniffed {
            ending,
            consumed: self.consumed + used as u64,
        };

        debug!(
            "sniffed row ending {:?} after {} bytes",
            sniffed.ending, sniffed.consumed
        );

        self.result = Some(sniffed);

        sniffed
    }

    // Process the outcome of a completed fill of `read` bytes.
    fn advance<P: BufferPool>(
        &mut self,
        buffer: &mut PushbackBuffer<P>,
        read: usize,
    ) -> Result<Option<Sniffed>> {
        if read == 0 {
            let ending = self.pending_cr.then_some(RowEnding::CarriageReturn);
            self.pending_cr = false;

            return Ok(Some(self.finish(ending, 0)));
        }

        let step = self.step(buffer.filled()?);

        match step {
            Some((ending, used)) => {
                buffer.push_back(read, read - used)?;
                Ok(Some(self.finish(Some(ending), used)))
            }
            None => {
                self.consumed += read as u64;
                Ok(None)
            }
        }
    }

    /// Read from `source` through `buffer` until the first row ending is
    /// found or the source is exhausted.
    ///
    /// Once a result has been produced, calling this again returns it
    /// without reading anything.
    pub fn sniff<R: Read, P: BufferPool>(
        &mut self,
        buffer: &mut PushbackBuffer<P>,
        source: &mut R,
    ) -> Result<Sniffed> {
        loop {
            if let Some(sniffed) = self.result {
                return Ok(sniffed);
            }

            let read = buffer.fill(source)?;

            if let Some(sniffed) = self.advance(buffer, read)? {
                return Ok(sniffed);
            }
        }
    }

    /// Suspendable version of [`RowEndingSniffer::sniff`], only suspending
    /// when filling `buffer`.
    #[cfg(feature = "tokio")]
    pub async fn sniff_async<R, P>(
        &mut self,
        buffer: &mut PushbackBuffer<P>,
        source: &mut R,
    ) -> Result<Sniffed>
    where
        R: tokio::io::AsyncRead + Unpin,
        P: BufferPool,
    {
        loop {
            if let Some(sniffed) = self.result {
                return Ok(sniffed);
            }

            let read = buffer.fill_async(source).await?;

            if let Some(sniffed) = self.advance(buffer, read)? {
                return Ok(sniffed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use bstr::ByteSlice;
    use csv::Terminator;

    use super::*;

    use crate::error::ErrorKind;

    fn generate(terminator: Terminator) -> Vec<u8> {
        let mut writer = csv::WriterBuilder::new()
            .terminator(terminator)
            .from_writer(vec![]);

        writer
            .write_record(["name", "bio, with\nlines\r\nof\rall kinds", "age"])
            .unwrap();
        writer
            .write_record(["john", "has \"quotes\"", "45"])
            .unwrap();
        writer.write_record(["lucy", "", "67"]).unwrap();

        writer.into_inner().unwrap()
    }

    fn rest<P: BufferPool>(buffer: &mut PushbackBuffer<P>, source: &mut impl Read) -> Vec<u8> {
        let mut rest = Vec::new();

        loop {
            let read = buffer.fill(source).unwrap();

            if read == 0 {
                return rest;
            }

            rest.extend_from_slice(buffer.filled().unwrap());
        }
    }

    fn sniff_with_capacity(
        dialect: &Dialect,
        input: &[u8],
        capacity: usize,
    ) -> Result<(Sniffed, Vec<u8>)> {
        let mut source = Cursor::new(input);
        let mut buffer = PushbackBuffer::with_capacity(capacity)?;
        let mut sniffer = RowEndingSniffer::new(dialect);

        let sniffed = sniffer.sniff(&mut buffer, &mut source)?;

        Ok((sniffed, rest(&mut buffer, &mut source)))
    }

    const CAPACITIES: [usize; 7] = [1, 2, 3, 5, 16, 64, 8192];

    #[test_log::test]
    fn test_sniff_csv_terminators() -> Result<()> {
        let cases = [
            (Terminator::CRLF, RowEnding::CarriageReturnLineFeed),
            (Terminator::Any(b'\n'), RowEnding::LineFeed),
            (Terminator::Any(b'\r'), RowEnding::CarriageReturn),
        ];

        for (terminator, expected) in cases {
            let input = generate(terminator);
            let header_len = input.find(b"age").unwrap() + 3;

            for capacity in CAPACITIES {
                let (sniffed, rest) = sniff_with_capacity(&Dialect::new(), &input, capacity)?;

                assert_eq!(sniffed.ending(), Some(expected), "capacity={}", capacity);
                assert_eq!(
                    sniffed.consumed() as usize,
                    header_len + expected.as_bytes().len()
                );
                assert_eq!(
                    rest.as_bstr(),
                    input[sniffed.consumed() as usize..].as_bstr(),
                    "capacity={}",
                    capacity
                );
                assert!(rest.starts_with(b"john,"));
            }
        }

        Ok(())
    }

    #[test]
    fn test_sniff_peeked_byte_is_pushed_back() -> Result<()> {
        for capacity in CAPACITIES {
            let (sniffed, rest) = sniff_with_capacity(&Dialect::new(), b"a,b\rc,d\r", capacity)?;

            assert_eq!(sniffed.ending(), Some(RowEnding::CarriageReturn));
            assert_eq!(sniffed.consumed(), 4);
            assert_eq!(rest.as_bstr(), b"c,d\r".as_bstr());
        }

        Ok(())
    }

    #[test]
    fn test_sniff_terminator_at_end_of_input() -> Result<()> {
        let cases: [(&[u8], RowEnding); 3] = [
            (b"a,b\r", RowEnding::CarriageReturn),
            (b"a,b\n", RowEnding::LineFeed),
            (b"a,b\r\n", RowEnding::CarriageReturnLineFeed),
        ];

        for (input, expected) in cases {
            for capacity in CAPACITIES {
                let (sniffed, rest) = sniff_with_capacity(&Dialect::new(), input, capacity)?;

                assert_eq!(sniffed.ending(), Some(expected));
                assert_eq!(sniffed.consumed() as usize, input.len());
                assert!(rest.is_empty());
            }
        }

        Ok(())
    }

    #[test]
    fn test_sniff_nothing() -> Result<()> {
        let mut dialect = Dialect::new();
        dialect.default_row_ending(RowEnding::LineFeed);

        for input in [&b""[..], b"a,b,c", b"\"unterminated\nquote"] {
            let (sniffed, rest) = sniff_with_capacity(&dialect, input, 4)?;

            assert_eq!(sniffed.ending(), None);
            assert_eq!(sniffed.consumed() as usize, input.len());
            assert_eq!(sniffed.or(dialect.get_default_row_ending()), RowEnding::LineFeed);
            assert!(rest.is_empty());
        }

        Ok(())
    }

    #[test]
    fn test_sniff_escape_distinct_from_quote() -> Result<()> {
        let mut dialect = Dialect::new();
        dialect.escape(Some(b'\\'));

        let input = b"\"a\\\"\nb\",c\r\nd\n";

        for capacity in CAPACITIES {
            let (sniffed, rest) = sniff_with_capacity(&dialect, input, capacity)?;

            assert_eq!(sniffed.ending(), Some(RowEnding::CarriageReturnLineFeed));
            assert_eq!(rest.as_bstr(), b"d\n".as_bstr());
        }

        // Without the escape, the quoted region ends early
        let (sniffed, _) = sniff_with_capacity(&Dialect::new(), input, 16)?;
        assert_eq!(sniffed.ending(), Some(RowEnding::LineFeed));

        Ok(())
    }

    #[test]
    fn test_sniff_without_quoting() -> Result<()> {
        let mut dialect = Dialect::new();
        dialect.quote(None);

        let (sniffed, rest) = sniff_with_capacity(&dialect, b"\"a\nb\"\r\n", 16)?;

        assert_eq!(sniffed.ending(), Some(RowEnding::LineFeed));
        assert_eq!(rest.as_bstr(), b"b\"\r\n".as_bstr());

        Ok(())
    }

    #[test]
    fn test_sniff_comment_row() -> Result<()> {
        let mut dialect = Dialect::new();
        dialect.comment(Some(b'#'));

        let input = b"# it's a \"comment\r\nname,age\n";

        for capacity in CAPACITIES {
            let (sniffed, rest) = sniff_with_capacity(&dialect, input, capacity)?;

            assert_eq!(sniffed.ending(), Some(RowEnding::CarriageReturnLineFeed));
            assert_eq!(rest.as_bstr(), b"name,age\n".as_bstr());
        }

        // Not a comment, the quote opens a region running to the end
        let (sniffed, _) = sniff_with_capacity(&Dialect::new(), input, 64)?;
        assert_eq!(sniffed.ending(), None);

        Ok(())
    }

    #[test]
    fn test_sniff_is_one_shot() -> Result<()> {
        let mut source = Cursor::new(&b"a\nb\r\n"[..]);
        let mut buffer = PushbackBuffer::with_capacity(64)?;
        let mut sniffer = RowEndingSniffer::new(&Dialect::new());

        let first = sniffer.sniff(&mut buffer, &mut source)?;
        assert!(sniffer.is_done());

        let second = sniffer.sniff(&mut buffer, &mut source)?;

        assert_eq!(first, second);
        assert!(buffer.has_pending_pushback());

        Ok(())
    }

    #[test]
    fn test_sniff_disposed_buffer() -> Result<()> {
        let mut buffer = PushbackBuffer::with_capacity(8)?;
        buffer.dispose();

        let err = RowEndingSniffer::new(&Dialect::new())
            .sniff(&mut buffer, &mut Cursor::new(&b"a\n"[..]))
            .unwrap_err();

        assert!(err.is_disposed());

        Ok(())
    }

    struct FailingReader;

    impl Read for FailingReader {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::Error::other("boom"))
        }
    }

    #[test]
    fn test_sniff_source_error() -> Result<()> {
        let mut buffer = PushbackBuffer::with_capacity(8)?;
        let mut sniffer = RowEndingSniffer::new(&Dialect::new());

        let err = sniffer.sniff(&mut buffer, &mut FailingReader).unwrap_err();

        assert!(err.is_io_error());
        assert!(matches!(err.kind(), ErrorKind::Io(inner) if inner.to_string() == "boom"));
        assert!(!sniffer.is_done());

        // Failing after a partial scan keeps what was read so far
        let mut source = Cursor::new(&b"\"a\nb"[..]).chain(FailingReader);
        let err = sniffer.sniff(&mut buffer, &mut source).unwrap_err();

        assert!(err.is_io_error());
        assert!(!sniffer.is_done());
        assert!(!buffer.has_pending_pushback());

        Ok(())
    }

    #[cfg(feature = "tokio")]
    mod suspendable {
        use std::pin::Pin;
        use std::task::{Context, Poll};

        use tokio::io::{AsyncRead, ReadBuf};

        use super::*;

        // Yields one byte every other poll
        struct Choppy<'a> {
            data: &'a [u8],
            ready: bool,
        }

        impl AsyncRead for Choppy<'_> {
            fn poll_read(
                mut self: Pin<&mut Self>,
                cx: &mut Context<'_>,
                buf: &mut ReadBuf<'_>,
            ) -> Poll<std::io::Result<()>> {
                if !self.ready {
                    self.ready = true;
                    cx.waker().wake_by_ref();
                    return Poll::Pending;
                }

                self.ready = false;

                let data = self.data;

                if let Some((first, tail)) = data.split_first() {
                    buf.put_slice(&[*first]);
                    self.data = tail;
                }

                Poll::Ready(Ok(()))
            }
        }

        #[tokio::test]
        async fn test_sniff_async() -> Result<()> {
            let input = generate(Terminator::CRLF);
            let mut source = &input[..];
            let mut buffer = PushbackBuffer::with_capacity(5)?;
            let mut sniffer = RowEndingSniffer::new(&Dialect::new());

            let sniffed = sniffer.sniff_async(&mut buffer, &mut source).await?;

            assert_eq!(sniffed.ending(), Some(RowEnding::CarriageReturnLineFeed));
            assert_eq!(
                rest(&mut buffer, &mut source).as_bstr(),
                input[sniffed.consumed() as usize..].as_bstr()
            );

            Ok(())
        }

        #[tokio::test]
        async fn test_cancelled_sniff_async_resumes() -> Result<()> {
            let input = b"\"x\ry\",z\rnext\r";
            let mut source = Choppy {
                data: input,
                ready: false,
            };
            let mut buffer = PushbackBuffer::with_capacity(4)?;
            let mut sniffer = RowEndingSniffer::new(&Dialect::new());
            let mut cancellations = 0;

            let sniffed = loop {
                tokio::select! {
                    biased;
                    sniffed = sniffer.sniff_async(&mut buffer, &mut source) => break sniffed?,
                    _ = std::future::ready(()) => cancellations += 1,
                }
            };

            assert!(cancellations > 0);
            assert_eq!(sniffed.ending(), Some(RowEnding::CarriageReturn));
            assert_eq!(sniffed.consumed(), 8);

            // The peeked byte is replayed first
            assert_eq!(buffer.fill_async(&mut source).await?, 1);
            assert_eq!(buffer.filled()?, b"n");

            Ok(())
        }
    }
}
