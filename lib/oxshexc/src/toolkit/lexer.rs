use crate::toolkit::error::{LexError, TextPosition};
use memchr::memchr2;
use std::ops::{Range, RangeInclusive};
use std::str;

/// Recognizes a single token at the beginning of some data.
///
/// Returns `None` if the data ends before the token is complete.
pub trait TokenRecognizer {
    type Token<'a>
    where
        Self: 'a;

    fn recognize_next_token<'a>(
        &mut self,
        data: &'a [u8],
    ) -> Option<(usize, Result<Self::Token<'a>, TokenRecognizerError>)>;
}

pub struct TokenRecognizerError {
    pub position: Range<usize>,
    pub message: String,
}

impl<S: Into<String>> From<(Range<usize>, S)> for TokenRecognizerError {
    fn from((position, message): (Range<usize>, S)) -> Self {
        Self {
            position,
            message: message.into(),
        }
    }
}

#[expect(clippy::range_plus_one)]
impl<S: Into<String>> From<(RangeInclusive<usize>, S)> for TokenRecognizerError {
    fn from((position, message): (RangeInclusive<usize>, S)) -> Self {
        (*position.start()..*position.end() + 1, message).into()
    }
}

impl<S: Into<String>> From<(usize, S)> for TokenRecognizerError {
    fn from((position, message): (usize, S)) -> Self {
        (position..=position, message).into()
    }
}

#[derive(Debug)]
pub struct TokenWithPosition<T> {
    pub token: T,
    pub position: Range<usize>,
}

/// Lazily splits a complete in-memory input into tokens.
///
/// Whitespaces and line comments are skipped.
/// The lexer can be restarted at any byte offset of the input.
pub struct Lexer<'a, R: TokenRecognizer> {
    recognizer: R,
    data: &'a [u8],
    position: usize,
    line_comment_starts: &'static [&'static [u8]],
}

impl<'a, R: TokenRecognizer + 'a> Lexer<'a, R> {
    pub fn new(
        recognizer: R,
        data: &'a [u8],
        line_comment_starts: &'static [&'static [u8]],
    ) -> Self {
        Self {
            recognizer,
            data,
            position: 0,
            line_comment_starts,
        }
    }

    /// Moves the lexer to the given byte offset.
    pub fn restart_at(&mut self, offset: usize) {
        self.position = offset.min(self.data.len());
    }

    /// The byte offset the next token will be searched from.
    #[inline]
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn read_next(&mut self) -> Option<Result<TokenWithPosition<R::Token<'a>>, LexError>> {
        self.skip_whitespaces_and_comments();
        let data: &'a [u8] = self.data;
        let start = self.position;
        if start == data.len() {
            return None; // We have finished
        }
        let Some((consumed, result)) = self.recognizer.recognize_next_token(&data[start..])
        else {
            // The token is not complete when the input ends
            self.position = data.len();
            return Some(Err(self.error(start..data.len(), "Unexpected end of file")));
        };
        debug_assert!(
            consumed > 0,
            "The lexer must consume at least one byte each time"
        );
        debug_assert!(
            start + consumed <= data.len(),
            "The lexer tried to consumed {consumed} bytes but only {} bytes are readable",
            data.len() - start
        );
        self.position = start + consumed;
        Some(match result {
            Ok(token) => Ok(TokenWithPosition {
                token,
                position: start..self.position,
            }),
            Err(e) => Err(self.error(
                e.position.start + start..e.position.end + start,
                e.message,
            )),
        })
    }

    /// Returns `true` if only whitespaces and comments are left.
    #[cfg(test)]
    pub fn is_end(&mut self) -> bool {
        self.skip_whitespaces_and_comments();
        self.position == self.data.len()
    }

    fn error(&self, position: Range<usize>, message: impl Into<String>) -> LexError {
        LexError::new(
            TextPosition::range_from_offsets(self.data, position.clone()),
            char_at(self.data, position.start),
            message,
        )
    }

    fn skip_whitespaces_and_comments(&mut self) {
        loop {
            self.skip_whitespaces();

            let buf = &self.data[self.position..];
            if let Some(comment_start) = self
                .line_comment_starts
                .iter()
                .find(|start| buf.starts_with(start))
            {
                // Comment
                if let Some(end) = memchr2(b'\r', b'\n', &buf[comment_start.len()..]) {
                    self.position += end + comment_start.len();
                    continue;
                }
                self.position = self.data.len(); // EOF
            }
            return;
        }
    }

    fn skip_whitespaces(&mut self) {
        for (i, c) in self.data[self.position..].iter().enumerate() {
            if !matches!(c, b' ' | b'\t' | b'\r' | b'\n') {
                self.position += i;
                return;
            }
        }
        // We only have whitespaces
        self.position = self.data.len();
    }
}

impl<'a, R: TokenRecognizer + 'a> Iterator for Lexer<'a, R> {
    type Item = Result<TokenWithPosition<R::Token<'a>>, LexError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_next()
    }
}

fn char_at(data: &[u8], offset: usize) -> char {
    let data = &data[offset.min(data.len())..];
    (1..=data.len().min(4))
        .find_map(|len| str::from_utf8(&data[..len]).ok()?.chars().next())
        .unwrap_or(char::REPLACEMENT_CHARACTER)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Splits words made of ASCII letters, fails on anything else.
    struct WordRecognizer;

    impl TokenRecognizer for WordRecognizer {
        type Token<'a> = &'a str;

        fn recognize_next_token<'a>(
            &mut self,
            data: &'a [u8],
        ) -> Option<(usize, Result<&'a str, TokenRecognizerError>)> {
            let len = data
                .iter()
                .take_while(|c| c.is_ascii_alphabetic())
                .count();
            if len == 0 {
                return Some((1, Err((0, "not a letter").into())));
            }
            Some((len, str::from_utf8(&data[..len]).map_err(|_| (0..len, "utf-8").into())))
        }
    }

    fn words(data: &str) -> Vec<String> {
        Lexer::new(WordRecognizer, data.as_bytes(), &[b"#", b"//"])
            .map(|t| t.map_or_else(|e| format!("!{}", e.character()), |t| t.token.to_owned()))
            .collect()
    }

    #[test]
    fn skips_whitespaces_and_comments() {
        assert_eq!(words("a  b\n# c d\nef // g\r\nh"), ["a", "b", "ef", "h"]);
        assert_eq!(words("  # only a comment"), Vec::<String>::new());
    }

    #[test]
    fn reports_offending_character() {
        assert_eq!(words("a é b"), ["a", "!é", "!\u{FFFD}", "b"]);
    }

    #[test]
    fn restarts_at_offset() {
        let mut lexer = Lexer::new(WordRecognizer, b"abc def ghi", &[]);
        lexer.restart_at(4);
        let token = lexer.read_next().and_then(Result::ok).map(|t| (t.token, t.position));
        assert_eq!(token, Some(("def", 4..7)));
        assert!(!lexer.is_end());
        lexer.restart_at(11);
        assert!(lexer.is_end());
    }
}
