/// A CSV row terminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RowEnding {
    /// `\r`
    CarriageReturn,
    /// `\n`
    LineFeed,
    /// `\r\n`
    CarriageReturnLineFeed,
}

impl RowEnding {
    #[inline]
    pub fn as_bytes(&self) -> &'static [u8] {
        match self {
            Self::CarriageReturn => b"\r",
            Self::LineFeed => b"\n",
            Self::CarriageReturnLineFeed => b"\r\n",
        }
    }
}

/// Structural characters of some CSV flavor, shared by the scanner, the
/// sniffer and the escaper.
///
/// ```
/// let mut dialect = Dialect::new();
/// dialect.separator(b"\t").comment(Some(b'#'));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dialect {
    pub(crate) separator: Vec<u8>,
    pub(crate) quote: Option<u8>,
    pub(crate) escape: Option<u8>,
    pub(crate) comment: Option<u8>,
    pub(crate) default_row_ending: RowEnding,
}

impl Default for Dialect {
    fn default() -> Self {
        Self {
            separator: vec![b','],
            quote: Some(b'"'),
            escape: Some(b'"'),
            comment: None,
            default_row_ending: RowEnding::CarriageReturnLineFeed,
        }
    }
}

impl Dialect {
    /// Create a new [`Dialect`] with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the separator, which can span multiple bytes.
    ///
    /// Will default to a comma.
    ///
    /// # Panics
    ///
    /// If `separator` is empty.
    pub fn separator(&mut self, separator: &[u8]) -> &mut Self {
        assert!(!separator.is_empty(), "separator cannot be empty");

        self.separator = separator.to_vec();
        self
    }

    /// Set the byte starting and ending quoted values, if any.
    ///
    /// Will default to a double quote.
    pub fn quote(&mut self, quote: Option<u8>) -> &mut Self {
        self.quote = quote;
        self
    }

    /// Set the byte escaping the next one within quoted values, if any.
    ///
    /// When equal to the quote, escaping is done by doubling quotes.
    ///
    /// Will default to a double quote.
    pub fn escape(&mut self, escape: Option<u8>) -> &mut Self {
        self.escape = escape;
        self
    }

    /// Set the byte marking a row as a comment when found at its start.
    ///
    /// Will default to `None`.
    pub fn comment(&mut self, comment: Option<u8>) -> &mut Self {
        self.comment = comment;
        self
    }

    /// Set the row ending to use when it cannot be sniffed from the data.
    ///
    /// Will default to `\r\n`.
    pub fn default_row_ending(&mut self, row_ending: RowEnding) -> &mut Self {
        self.default_row_ending = row_ending;
        self
    }

    #[inline]
    pub fn get_separator(&self) -> &[u8] {
        &self.separator
    }

    #[inline]
    pub fn get_quote(&self) -> Option<u8> {
        self.quote
    }

    #[inline]
    pub fn get_escape(&self) -> Option<u8> {
        self.escape
    }

    #[inline]
    pub fn get_comment(&self) -> Option<u8> {
        self.comment
    }

    #[inline]
    pub fn get_default_row_ending(&self) -> RowEnding {
        self.default_row_ending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dialect() {
        let mut dialect = Dialect::new();

        assert_eq!(dialect.get_separator(), b",");
        assert_eq!(dialect.get_quote(), Some(b'"'));
        assert_eq!(dialect.get_comment(), None);

        dialect
            .separator(b"||")
            .quote(None)
            .comment(Some(b'#'))
            .default_row_ending(RowEnding::LineFeed);

        assert_eq!(dialect.get_separator(), b"||");
        assert_eq!(dialect.get_quote(), None);
        assert_eq!(dialect.get_comment(), Some(b'#'));
        assert_eq!(dialect.get_default_row_ending().as_bytes(), b"\n");
    }

    #[test]
    #[should_panic(expected = "separator cannot be empty")]
    fn test_empty_separator() {
        Dialect::new().separator(b"");
    }
}
