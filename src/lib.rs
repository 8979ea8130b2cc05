/*!
The `simd-csv-tokenizer` crate provides the low-level building blocks of a
streaming CSV tokenizer: buffers able to push data back, a value accumulator
that avoids copying as long as it can, a [SIMD](https://en.wikipedia.org/wiki/Single_instruction,_multiple_data)-accelerated
scanner finding bytes that require a value to be quoted, a row ending sniffer
and a packed store of header names.

It does not implement a full CSV reader or writer by itself. It is meant to be
used by one, on both its reading and writing paths, be it blocking or async.

# Examples

*Sniffing the row ending of a file, then resuming reading right after it*

```
use std::fs::File;
use simd_csv_tokenizer::{Dialect, PushbackBuffer, RowEndingSniffer};

let dialect = Dialect::new();
let mut file = File::open("data.csv")?;
let mut buffer = PushbackBuffer::new()?;

let sniffed = RowEndingSniffer::new(&dialect).sniff(&mut buffer, &mut file)?;
let row_ending = sniffed.or(dialect.get_default_row_ending());

// First fill starts with the second row
buffer.fill(&mut file)?;
```

*Accumulating a field value without copying it when possible*

```
use simd_csv_tokenizer::{InPlaceOrCopyAccumulator, AccumulatorMode};

let original = b"\"hello\",world";
let mut accumulator = InPlaceOrCopyAccumulator::new();

// Opening quote is never appended
accumulator.append(original, 1, 5)?;
// Closing quote is skipped
accumulator.skipped()?;

assert_eq!(accumulator.as_slice(original)?, b"hello");
assert_eq!(accumulator.mode(), AccumulatorMode::PendingCopyOnAppend);
```

*Quoting values on the write path*

```
use simd_csv_tokenizer::{Dialect, Escaper};

let escaper = Escaper::new(&Dialect::new());
let mut output = Vec::new();

escaper.escape_into(b"john, \"the\" landis", &mut output);

assert_eq!(output, b"\"john, \"\"the\"\" landis\"");
```

# Components

- [`PushbackBuffer`]: a fixed-capacity read buffer able to "unget" a suffix
  of its last fill.
- [`InPlaceOrCopyAccumulator`]: accumulates field values as ranges of the
  read buffer, only copying them when a gap appears.
- [`EncodingScanner`]: finds the first byte forcing a value to be quoted.
- [`RowEndingSniffer`]: detects whether a stream uses `\r\n`, `\n` or `\r`
  row endings, without losing a single byte.
- [`ColumnNameStore`]: a packed store of header names and their encoded forms.
- [`Escaper`]: quotes & escapes values, relying on the scanner.

Every component owning memory rents it from a [`BufferPool`], either the
default [`HeapPool`] or a [`RecyclingPool`] shared by many components.

# Supported targets

- On `x86_64` targets, `sse2` instructions are used. `avx2` instructions
  will also be used if their availability is detected at runtime.
- On `aarch64` targets, `neon` instructions are used.
- Everywhere else, the library will fallback to scalar implementations.

# Async

Enabling the `tokio` feature adds [`PushbackBuffer::fill_async`] and
[`RowEndingSniffer::sniff_async`], working over [`tokio::io::AsyncRead`]. Both
only suspend when reading from the source, and dropping their futures never
loses data.

# Design notes

## Row endings

The sniffer only needs to know enough about quoting to avoid mistaking a
newline found in a quoted value for a row ending. As such it tracks quotes,
escapes distinct from quotes and leading comment rows, but does not validate
anything.

A lone `\r` found at the very end of a fill cannot be classified before the
next fill, so the sniffer remembers it and peeks at the next byte, pushing it
back if it turns out not to be a `\n`.

## Multi-byte separators

The scanner compares whole blocks of 16 or 32 bytes at once with splats of
`\r`, `\n`, the quote, the comment byte and the separator. When the separator
spans multiple bytes, only its first byte can be compared this way, so each
match is verified with a plain comparison, which may extend over the next
block. This means separators straddling two blocks are found as they should.

# Caveats

## Byte-oriented

This crate works on bytes of input that should already be decoded to UTF-8, or
any ASCII-compatible encoding. Structural characters must all be ASCII.
*/
mod accumulator;
mod columns;
mod dialect;
mod error;
mod escape;
mod ext;
mod pool;
mod pushback;
mod scanner;
mod sniffer;

pub use accumulator::{AccumulatorMode, InPlaceOrCopyAccumulator};
pub use columns::{ColumnNameStore, ColumnNames};
pub use dialect::{Dialect, RowEnding};
pub use error::{Error, ErrorKind, Result};
pub use escape::Escaper;
pub use pool::{BufferPool, HeapPool, PooledBuffer, RecyclingPool};
pub use pushback::PushbackBuffer;
pub use scanner::{scanner_simd_instructions, EncodingScanner};
pub use sniffer::{RowEndingSniffer, Sniffed};
