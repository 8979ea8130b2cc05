use memchr::{memchr, memchr2};

use crate::dialect::Dialect;
use crate::scanner::EncodingScanner;

/// Encodes values so that they can be written as CSV cells.
///
/// Values holding nothing the [`EncodingScanner`] flags are written
/// verbatim. Others are wrapped in quotes, every quote & escape byte they
/// contain being preceded by the escape byte (the quote itself by default,
/// meaning quotes are doubled).
///
/// Without a configured quote, values are always written verbatim.
#[derive(Debug, Clone)]
pub struct Escaper {
    scanner: EncodingScanner,
    quote: Option<u8>,
    escape: Option<u8>,
}

impl Escaper {
    pub fn new(dialect: &Dialect) -> Self {
        Self {
            scanner: EncodingScanner::new(dialect),
            quote: dialect.quote,
            escape: dialect.escape,
        }
    }

    #[inline]
    pub fn scanner(&self) -> &EncodingScanner {
        &self.scanner
    }

    #[inline]
    pub fn needs_escaping(&self, value: &[u8]) -> bool {
        self.quote.is_some() && self.scanner.requires_encoding(value)
    }

    fn find_escapable(&self, quote: u8, haystack: &[u8]) -> Option<usize> {
        match self.escape {
            Some(escape) if escape != quote => memchr2(quote, escape, haystack),
            _ => memchr(quote, haystack),
        }
    }

    /// Append the encoded form of `value` to `out`, returning whether it had
    /// to be quoted.
    pub fn escape_into(&self, value: &[u8], out: &mut Vec<u8>) -> bool {
        let Some(quote) = self.quote else {
            out.extend_from_slice(value);
            return false;
        };

        if !self.scanner.requires_encoding(value) {
            out.extend_from_slice(value);
            return false;
        }

        let escape = self.escape.unwrap_or(quote);

        out.reserve(value.len() + 2);
        out.push(quote);

        let mut pos: usize = 0;

        while let Some(offset) = self.find_escapable(quote, &value[pos..]) {
            let byte_pos = pos + offset;

            out.extend_from_slice(&value[pos..byte_pos]);
            out.push(escape);
            out.push(value[byte_pos]);

            pos = byte_pos + 1;
        }

        out.extend_from_slice(&value[pos..]);
        out.push(quote);

        true
    }
}
