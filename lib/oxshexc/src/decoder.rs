//! IRI resolution and literal decoding.
//!
//! These functions are pure and total: they work on the token text and never fail.

use oxrdf::NamedNodeRef;
use oxrdf::vocab::xsd;
use regex::Regex;
use std::borrow::Cow;
use std::sync::LazyLock;

static ABSOLUTE_IRI: LazyLock<Regex> = LazyLock::new(|| Regex::new("^[a-z]+:").unwrap());
static IRI_ROOT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("^(?:[a-z]+:/*)?[^/]*").unwrap());

/// `"true"^^xsd:boolean`
pub const TRUE_LITERAL: &str = "\"true\"^^http://www.w3.org/2001/XMLSchema#boolean";
/// `"false"^^xsd:boolean`
pub const FALSE_LITERAL: &str = "\"false\"^^http://www.w3.org/2001/XMLSchema#boolean";

/// The base IRI of a document together with its directory and its root.
///
/// ```
/// use oxshexc::BaseIri;
///
/// let base = BaseIri::new("http://example.com/a/b");
/// assert_eq!(base.path(), "http://example.com/a/");
/// assert_eq!(base.root(), "http://example.com");
/// assert_eq!(base.resolve("<c>"), "http://example.com/a/c");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BaseIri {
    base: String,
    path: String,
    root: String,
}

impl BaseIri {
    /// Derives the path (the base up to its last `/`) and the root (scheme and authority).
    pub fn new(base: impl Into<String>) -> Self {
        let base = base.into();
        let path = base
            .rfind('/')
            .map_or_else(String::new, |i| base[..=i].to_owned());
        let root = IRI_ROOT
            .find(&base)
            .map_or_else(String::new, |m| m.as_str().to_owned());
        Self { base, path, root }
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.base
    }

    #[inline]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[inline]
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Resolves an IRI reference against this base, see [`resolve_iri`].
    #[inline]
    pub fn resolve(&self, iri: &str) -> String {
        resolve_iri(iri, &self.base, &self.path, &self.root)
    }
}

/// Resolves an IRI reference, with or without its angle brackets.
///
/// The resolution is purely textual:
/// * an empty reference is the base;
/// * `#...` is appended to the base;
/// * `?...` replaces the query of the base;
/// * `/...` is appended to the base root;
/// * a reference starting with a lowercase scheme and `:` is kept as is;
/// * anything else is appended to the base path.
///
/// ```
/// use oxshexc::resolve_iri;
///
/// let (base, path, root) = ("http://a/b/c", "http://a/b/", "http://a");
/// assert_eq!(resolve_iri("<>", base, path, root), "http://a/b/c");
/// assert_eq!(resolve_iri("<#x>", base, path, root), "http://a/b/c#x");
/// assert_eq!(resolve_iri("</x>", base, path, root), "http://a/x");
/// assert_eq!(resolve_iri("<d>", base, path, root), "http://a/b/d");
/// assert_eq!(resolve_iri("<http://z/>", base, path, root), "http://z/");
/// ```
pub fn resolve_iri(iri: &str, base: &str, base_path: &str, base_root: &str) -> String {
    let iri = iri.strip_prefix('<').unwrap_or(iri);
    let iri = iri.strip_suffix('>').unwrap_or(iri);
    if iri.is_empty() {
        base.to_owned()
    } else if iri.starts_with('#') {
        format!("{base}{iri}")
    } else if iri.starts_with('?') {
        let without_query = base.split_once('?').map_or(base, |(b, _)| b);
        format!("{without_query}{iri}")
    } else if iri.starts_with('/') {
        format!("{base_root}{iri}")
    } else if ABSOLUTE_IRI.is_match(iri) {
        iri.to_owned()
    } else {
        format!("{base_path}{iri}")
    }
}

/// A backslash sequence that can not be decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct EscapeError {
    /// Byte offset of the backslash inside of the raw literal.
    pub offset: usize,
    pub escape: String,
}

/// Decodes a raw string literal token, quotes included.
///
/// `quote_width` characters are removed at each end.
/// A malformed escape sequence makes the whole string decode to the empty string.
///
/// ```
/// use oxshexc::unescape_string;
///
/// assert_eq!(unescape_string(r"'a\nb'", 1), "a\nb");
/// assert_eq!(unescape_string(r#""""\U0001F600""""#, 3), "\u{1F600}");
/// assert_eq!(unescape_string(r"'\q'", 1), "");
/// ```
pub fn unescape_string(raw: &str, quote_width: usize) -> String {
    try_unescape_string(raw, quote_width).unwrap_or_default()
}

pub(crate) fn try_unescape_string(raw: &str, quote_width: usize) -> Result<String, EscapeError> {
    let Some(content) = raw.get(quote_width..raw.len().saturating_sub(quote_width)) else {
        return Ok(String::new());
    };
    let mut output = String::with_capacity(content.len());
    let mut rest = content;
    let mut offset = quote_width;
    while let Some(i) = rest.find('\\') {
        output.push_str(&rest[..i]);
        let escape = &rest[i..];
        let Some((c, len)) = decode_escape(escape) else {
            return Err(EscapeError {
                offset: offset + i,
                escape: escape.chars().take(2).collect(),
            });
        };
        output.push(c);
        rest = &escape[len..];
        offset += i + len;
    }
    output.push_str(rest);
    Ok(output)
}

/// Decodes the `\uXXXX` and `\UXXXXXXXX` escapes of an IRI.
///
/// Other backslashes are kept as is.
pub fn unescape_iri(iri: &str) -> Cow<'_, str> {
    if !iri.contains('\\') {
        return Cow::Borrowed(iri);
    }
    let mut output = String::with_capacity(iri.len());
    let mut rest = iri;
    while let Some(i) = rest.find('\\') {
        output.push_str(&rest[..i]);
        let escape = &rest[i..];
        if let Some((c, len)) = decode_escape(escape)
            .filter(|_| matches!(escape.as_bytes().get(1), Some(b'u' | b'U')))
        {
            output.push(c);
            rest = &escape[len..];
        } else {
            output.push('\\');
            rest = &escape[1..];
        }
    }
    output.push_str(rest);
    Cow::Owned(output)
}

/// Decodes the escape sequence at the beginning of `s` and returns its length.
fn decode_escape(s: &str) -> Option<(char, usize)> {
    Some(match *s.as_bytes().get(1)? {
        b'\\' => ('\\', 2),
        b'\'' => ('\'', 2),
        b'"' => ('"', 2),
        b't' => ('\t', 2),
        b'b' => ('\u{8}', 2),
        b'n' => ('\n', 2),
        b'r' => ('\r', 2),
        b'f' => ('\u{C}', 2),
        b'u' => {
            let high = hex_code_point(s.get(2..6)?)?;
            if (0xD800..0xDC00).contains(&high) {
                // UTF-16 surrogate pair written as two escapes
                if s.get(6..8)? != "\\u" {
                    return None;
                }
                let low = hex_code_point(s.get(8..12)?)?;
                if !(0xDC00..0xE000).contains(&low) {
                    return None;
                }
                (
                    char::from_u32(0x10000 + ((high - 0xD800) << 10) + (low - 0xDC00))?,
                    12,
                )
            } else {
                (char::from_u32(high)?, 6)
            }
        }
        b'U' => (char::from_u32(hex_code_point(s.get(2..10)?)?)?, 10),
        _ => return None,
    })
}

fn hex_code_point(hex: &str) -> Option<u32> {
    if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u32::from_str_radix(hex, 16).ok()
}

/// Builds the canonical text of a numeric or boolean literal: `"lexeme"^^datatype`.
///
/// Doubles are lowercased so that the exponent marker is always `e`.
///
/// ```
/// use oxrdf::vocab::xsd;
/// use oxshexc::canonicalize_literal;
///
/// assert_eq!(
///     canonicalize_literal("1.5E3", xsd::DOUBLE),
///     "\"1.5e3\"^^http://www.w3.org/2001/XMLSchema#double"
/// );
/// ```
pub fn canonicalize_literal(lexeme: &str, datatype: NamedNodeRef<'_>) -> String {
    if datatype == xsd::DOUBLE {
        format!("\"{}\"^^{}", lexeme.to_ascii_lowercase(), datatype.as_str())
    } else {
        format!("\"{lexeme}\"^^{}", datatype.as_str())
    }
}

/// The canonical text of a boolean literal.
#[inline]
pub fn boolean_literal(value: bool) -> &'static str {
    if value { TRUE_LITERAL } else { FALSE_LITERAL }
}

/// The canonical text of a string literal with an optional (lowercased) language tag or datatype.
///
/// The value is written as is. Neither language tags nor valid IRIs contain `"`, so the value ends at the last one.
pub(crate) fn string_literal(value: &str, language: Option<&str>, datatype: Option<&str>) -> String {
    match (language, datatype) {
        (Some(language), _) => format!("\"{value}\"@{}", language.to_ascii_lowercase()),
        (None, Some(datatype)) => format!("\"{value}\"^^{datatype}"),
        (None, None) => format!("\"{value}\""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_triad() {
        let base = BaseIri::new("http://a/b/c");
        assert_eq!(base.as_str(), "http://a/b/c");
        assert_eq!(base.path(), "http://a/b/");
        assert_eq!(base.root(), "http://a");
        let base = BaseIri::new("urn:x");
        assert_eq!(base.path(), "");
        assert_eq!(base.root(), "urn:x");
        assert_eq!(BaseIri::default().resolve("<d>"), "d");
    }

    #[test]
    fn resolve_relative_references() {
        let base = BaseIri::new("http://a/b/c");
        assert_eq!(base.resolve(""), "http://a/b/c");
        assert_eq!(base.resolve("#x"), "http://a/b/c#x");
        assert_eq!(base.resolve("/x"), "http://a/x");
        assert_eq!(base.resolve("d"), "http://a/b/d");
        assert_eq!(base.resolve("http://z/"), "http://z/");
        assert_eq!(base.resolve("<?q>"), "http://a/b/c?q");
        assert_eq!(BaseIri::new("http://a/b?x=1").resolve("?y=2"), "http://a/b?y=2");
        // Only lowercase schemes are absolute
        assert_eq!(base.resolve("HTTP://z/"), "http://a/b/HTTP://z/");
    }

    #[test]
    fn short_escapes() {
        assert_eq!(
            unescape_string(r#""\t\b\n\r\f\"\'\\""#, 1),
            "\t\u{8}\n\r\u{C}\"'\\"
        );
        assert_eq!(unescape_string("'''a\nb'''", 3), "a\nb");
        assert_eq!(unescape_string("''", 1), "");
    }

    #[test]
    fn unicode_escapes() {
        assert_eq!(unescape_string(r"'\u00E9'", 1), "\u{E9}");
        assert_eq!(unescape_string(r"'\U0001F600'", 1), "\u{1F600}");
        assert_eq!(unescape_string(r"'\uD83D\uDE00'", 1), "\u{1F600}");
        assert_eq!(unescape_string(r"'\uD83D'", 1), "");
    }

    #[test]
    fn malformed_escape_reports_its_offset() {
        assert_eq!(
            try_unescape_string(r"'ab\qc'", 1),
            Err(EscapeError {
                offset: 3,
                escape: r"\q".into()
            })
        );
        assert_eq!(unescape_string(r"'ab\qc'", 1), "");
        assert_eq!(unescape_string(r"'\u12'", 1), "");
    }

    #[test]
    fn iri_escapes() {
        assert_eq!(unescape_iri("http://a/b"), "http://a/b");
        assert_eq!(unescape_iri(r"http://a/\u00E9\U0001F600"), "http://a/\u{E9}\u{1F600}");
        assert_eq!(unescape_iri(r"http://a/\n"), r"http://a/\n");
    }

    #[test]
    fn literal_forms() {
        assert_eq!(
            canonicalize_literal("12", xsd::INTEGER),
            "\"12\"^^http://www.w3.org/2001/XMLSchema#integer"
        );
        assert_eq!(
            canonicalize_literal("1E-2", xsd::DOUBLE),
            "\"1e-2\"^^http://www.w3.org/2001/XMLSchema#double"
        );
        assert_eq!(boolean_literal(true), TRUE_LITERAL);
        assert_eq!(string_literal("chat", Some("FR-be"), None), "\"chat\"@fr-be");
        assert_eq!(
            string_literal("1", None, Some("http://a/dt")),
            "\"1\"^^http://a/dt"
        );
        assert_eq!(string_literal("x", None, None), "\"x\"");
    }
}
