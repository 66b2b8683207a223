use memchr::{memchr_iter, memrchr};
use std::ops::Range;
use std::{fmt, io};

/// A position in a text i.e. a `line` number starting from 0, a `column` number starting from 0 (in number of code points) and a global file `offset` starting from 0 (in number of bytes).
#[derive(Eq, PartialEq, Debug, Copy, Clone)]
pub struct TextPosition {
    pub line: u64,
    pub column: u64,
    pub offset: u64,
}

impl TextPosition {
    pub(crate) fn from_offset(data: &[u8], offset: usize) -> Self {
        let offset = offset.min(data.len());
        let before = &data[..offset];
        let line_start = memrchr(b'\n', before).map_or(0, |i| i + 1);
        Self {
            line: memchr_iter(b'\n', before).count() as u64,
            column: before[line_start..]
                .iter()
                .filter(|b| (**b & 0xC0) != 0x80)
                .count() as u64,
            offset: offset as u64,
        }
    }

    pub(crate) fn range_from_offsets(data: &[u8], range: Range<usize>) -> Range<TextPosition> {
        Self::from_offset(data, range.start)..Self::from_offset(data, range.end)
    }
}

fn fmt_location(
    f: &mut fmt::Formatter<'_>,
    kind: &str,
    location: &Range<TextPosition>,
) -> fmt::Result {
    if location.start.offset + 1 >= location.end.offset {
        write!(
            f,
            "{kind} error at line {} column {}",
            location.start.line + 1,
            location.start.column + 1
        )
    } else if location.start.line == location.end.line {
        write!(
            f,
            "{kind} error at line {} between columns {} and {}",
            location.start.line + 1,
            location.start.column + 1,
            location.end.column + 1
        )
    } else {
        write!(
            f,
            "{kind} error between line {} column {} and line {} column {}",
            location.start.line + 1,
            location.start.column + 1,
            location.end.line + 1,
            location.end.column + 1
        )
    }
}

/// No token pattern matches the input at some offset.
///
/// It carries the offending character and its position.
#[derive(Debug, thiserror::Error)]
pub struct LexError {
    location: Range<TextPosition>,
    character: char,
    message: String,
}

impl LexError {
    pub(crate) fn new(
        location: Range<TextPosition>,
        character: char,
        message: impl Into<String>,
    ) -> Self {
        Self {
            location,
            character,
            message: message.into(),
        }
    }

    /// The location of the error inside of the input.
    #[inline]
    pub fn location(&self) -> Range<TextPosition> {
        self.location.clone()
    }

    /// The character at which no token could be recognized.
    #[inline]
    pub fn character(&self) -> char {
        self.character
    }

    /// The error message.
    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for LexError {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_location(f, "Lexer", &self.location)?;
        write!(f, ": {} (found {:?})", self.message, self.character)
    }
}

/// The token stream does not match the grammar.
#[derive(Debug, thiserror::Error)]
pub struct SyntaxError {
    location: Range<TextPosition>,
    found: String,
    expected: Vec<&'static str>,
    message: Option<String>,
}

impl SyntaxError {
    pub(crate) fn unexpected(
        location: Range<TextPosition>,
        found: impl Into<String>,
        expected: &[&'static str],
    ) -> Self {
        Self {
            location,
            found: found.into(),
            expected: expected.to_vec(),
            message: None,
        }
    }

    pub(crate) fn invalid(
        location: Range<TextPosition>,
        found: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            location,
            found: found.into(),
            expected: Vec::new(),
            message: Some(message.into()),
        }
    }

    /// The location of the offending token.
    #[inline]
    pub fn location(&self) -> Range<TextPosition> {
        self.location.clone()
    }

    /// The source text of the offending token or `end of file`.
    #[inline]
    pub fn found(&self) -> &str {
        &self.found
    }

    /// The alternatives that would have been accepted at this point.
    #[inline]
    pub fn expected(&self) -> &[&'static str] {
        &self.expected
    }
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_location(f, "Parser", &self.location)?;
        if let Some(message) = &self.message {
            return write!(f, ": {message}, found {}", self.found);
        }
        write!(f, ": unexpected {}", self.found)?;
        if let Some((last, first)) = self.expected.split_last() {
            if first.is_empty() {
                write!(f, ", expecting {last}")?;
            } else {
                write!(f, ", expecting {} or {last}", first.join(", "))?;
            }
        }
        Ok(())
    }
}

/// A prefixed name uses a prefix that has not been declared.
#[derive(Debug, thiserror::Error)]
pub struct UnknownPrefixError {
    location: Range<TextPosition>,
    prefix: String,
}

impl UnknownPrefixError {
    pub(crate) fn new(location: Range<TextPosition>, prefix: impl Into<String>) -> Self {
        Self {
            location,
            prefix: prefix.into(),
        }
    }

    /// The location of the prefixed name.
    #[inline]
    pub fn location(&self) -> Range<TextPosition> {
        self.location.clone()
    }

    /// The undeclared prefix, without the trailing `:`.
    #[inline]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

impl fmt::Display for UnknownPrefixError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_location(f, "Parser", &self.location)?;
        write!(f, ": the prefix {}: has not been declared", self.prefix)
    }
}

/// A string literal contains an escape sequence that can not be decoded.
///
/// Only returned when strict escapes are enabled on the parser.
#[derive(Debug, thiserror::Error)]
pub struct MalformedEscapeError {
    location: Range<TextPosition>,
    escape: String,
}

impl MalformedEscapeError {
    pub(crate) fn new(location: Range<TextPosition>, escape: impl Into<String>) -> Self {
        Self {
            location,
            escape: escape.into(),
        }
    }

    /// The location of the string literal.
    #[inline]
    pub fn location(&self) -> Range<TextPosition> {
        self.location.clone()
    }

    /// The malformed escape sequence.
    #[inline]
    pub fn escape(&self) -> &str {
        &self.escape
    }
}

impl fmt::Display for MalformedEscapeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_location(f, "Parser", &self.location)?;
        write!(f, ": malformed escape sequence '{}'", self.escape)
    }
}

/// A ShExC parsing error.
///
/// Exactly one error is reported per parse: the first problem met in a left-to-right pass.
#[derive(Debug, thiserror::Error)]
pub enum ShExCParseError {
    /// No token could be recognized.
    #[error(transparent)]
    Lex(#[from] LexError),
    /// The tokens do not follow the grammar.
    #[error(transparent)]
    Syntax(#[from] SyntaxError),
    /// A prefixed name uses an undeclared prefix.
    #[error(transparent)]
    UnknownPrefix(#[from] UnknownPrefixError),
    /// A string escape is malformed (strict escapes only).
    #[error(transparent)]
    MalformedEscape(#[from] MalformedEscapeError),
}

impl ShExCParseError {
    /// The location of the error inside of the input.
    pub fn location(&self) -> Range<TextPosition> {
        match self {
            Self::Lex(e) => e.location(),
            Self::Syntax(e) => e.location(),
            Self::UnknownPrefix(e) => e.location(),
            Self::MalformedEscape(e) => e.location(),
        }
    }
}

impl From<ShExCParseError> for io::Error {
    #[inline]
    fn from(error: ShExCParseError) -> Self {
        Self::new(io::ErrorKind::InvalidData, error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_counts_lines_and_code_points() {
        let data = "ab\ncé\nx".as_bytes();
        let position = TextPosition::from_offset(data, 7);
        assert_eq!(position.line, 2);
        assert_eq!(position.column, 0);
        let position = TextPosition::from_offset(data, 6);
        assert_eq!(position.line, 1);
        assert_eq!(position.column, 2);
        assert_eq!(position.offset, 6);
    }

    #[test]
    fn syntax_error_display() {
        let data = b"start = 12";
        let error = SyntaxError::unexpected(
            TextPosition::range_from_offsets(data, 8..10),
            "12",
            &["a shape label", "'{'"],
        );
        assert_eq!(
            error.to_string(),
            "Parser error at line 1 between columns 9 and 11: unexpected 12, expecting a shape label or '{'"
        );
    }
}
