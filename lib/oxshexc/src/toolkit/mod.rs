//! oxshexc parsing toolkit.
//!
//! Provides the basic code to write plain Rust lexers over a complete in-memory input.

mod error;
mod lexer;

pub use self::error::{
    LexError, MalformedEscapeError, ShExCParseError, SyntaxError, TextPosition,
    UnknownPrefixError,
};
pub use self::lexer::{Lexer, TokenRecognizer, TokenRecognizerError};
