use crate::toolkit::{LexError, Lexer, TokenRecognizer, TokenRecognizerError};
use memchr::memchr2;
use std::borrow::Cow;
use std::cmp::min;
use std::fmt;
use std::ops::Range;
use std::str;

const LINE_COMMENT_STARTS: &[&[u8]] = &[b"#", b"//"];

/// A keyword of the ShExC grammar.
///
/// All keywords are matched case-insensitively except `a`, `true` and `false`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Keyword {
    Base,
    Prefix,
    Start,
    Virtual,
    Closed,
    Extra,
    Literal,
    Iri,
    BNode,
    NonLiteral,
    Pattern,
    Length,
    MinLength,
    MaxLength,
    MinInclusive,
    MinExclusive,
    MaxInclusive,
    MaxExclusive,
    TotalDigits,
    FractionDigits,
    And,
    Or,
    /// `a`, shorthand for `rdf:type`.
    A,
    True,
    False,
}

impl Keyword {
    const CASE_INSENSITIVE: [Self; 22] = [
        Self::Base,
        Self::Prefix,
        Self::Start,
        Self::Virtual,
        Self::Closed,
        Self::Extra,
        Self::Literal,
        Self::Iri,
        Self::BNode,
        Self::NonLiteral,
        Self::Pattern,
        Self::Length,
        Self::MinLength,
        Self::MaxLength,
        Self::MinInclusive,
        Self::MinExclusive,
        Self::MaxInclusive,
        Self::MaxExclusive,
        Self::TotalDigits,
        Self::FractionDigits,
        Self::And,
        Self::Or,
    ];

    /// Looks up the keyword spelled by `word`.
    pub fn from_word(word: &str) -> Option<Self> {
        match word {
            "a" => Some(Self::A),
            "true" => Some(Self::True),
            "false" => Some(Self::False),
            _ => Self::CASE_INSENSITIVE
                .into_iter()
                .find(|k| k.as_str().eq_ignore_ascii_case(word)),
        }
    }

    /// The canonical spelling of the keyword.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Base => "BASE",
            Self::Prefix => "PREFIX",
            Self::Start => "start",
            Self::Virtual => "VIRTUAL",
            Self::Closed => "CLOSED",
            Self::Extra => "EXTRA",
            Self::Literal => "LITERAL",
            Self::Iri => "IRI",
            Self::BNode => "BNODE",
            Self::NonLiteral => "NONLITERAL",
            Self::Pattern => "PATTERN",
            Self::Length => "LENGTH",
            Self::MinLength => "MINLENGTH",
            Self::MaxLength => "MAXLENGTH",
            Self::MinInclusive => "MININCLUSIVE",
            Self::MinExclusive => "MINEXCLUSIVE",
            Self::MaxInclusive => "MAXINCLUSIVE",
            Self::MaxExclusive => "MAXEXCLUSIVE",
            Self::TotalDigits => "TOTALDIGITS",
            Self::FractionDigits => "FRACTIONDIGITS",
            Self::And => "AND",
            Self::Or => "OR",
            Self::A => "a",
            Self::True => "true",
            Self::False => "false",
        }
    }
}

impl fmt::Display for Keyword {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A ShExC token.
///
/// Tokens borrow their text from the input. Nothing is decoded at lexing time
/// except backslash escapes in local names.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum ShExCToken<'a> {
    /// `IRIREF`, with its angle brackets and undecoded `\u` escapes.
    IriRef(&'a str),
    /// `PNAME_LN`, or `PNAME_NS` when `local` is empty.
    PrefixedName {
        prefix: &'a str,
        local: Cow<'a, str>,
    },
    /// `ATPNAME_LN`, or `ATPNAME_NS` when `local` is empty.
    AtPrefixedName {
        prefix: &'a str,
        local: Cow<'a, str>,
    },
    /// `BLANK_NODE_LABEL`, without the leading `_:`.
    BlankNodeLabel(&'a str),
    /// One of the four string literal forms, quotes included.
    String { raw: &'a str, quote_width: usize },
    /// `LANGTAG`, without the leading `@`.
    LangTag(&'a str),
    Integer(&'a str),
    Decimal(&'a str),
    Double(&'a str),
    /// `REPEAT_RANGE`, braces included.
    RepeatRange(&'a str),
    /// `CODE`, from the opening `{` to the closing `%}` included.
    Code(&'a str),
    Keyword(Keyword),
    Punctuation(&'static str),
}

/// The ShExC token recognizer.
///
/// It must be fed with suffixes of a single input, each one shorter than the previous one.
#[derive(Default)]
pub struct ShExCLexer {
    code_delimiter: CodeDelimiter,
}

/// The last `%` or `\` found while looking for the end of a `CODE` token.
#[derive(Default, Clone, Copy)]
enum CodeDelimiter {
    #[default]
    Unknown,
    /// Distance from the end of the input.
    FromEnd(usize),
    Absent,
}

impl TokenRecognizer for ShExCLexer {
    type Token<'a> = ShExCToken<'a>;

    fn recognize_next_token<'a>(
        &mut self,
        data: &'a [u8],
    ) -> Option<(usize, Result<ShExCToken<'a>, TokenRecognizerError>)> {
        Some(match *data.first()? {
            b'<' => return Self::recognize_iri(data),
            b'_' => {
                if data.get(1) == Some(&b':') {
                    return Self::recognize_blank_node_label(data);
                }
                (1, Err((0, "Unexpected character '_'").into()))
            }
            b'"' => return Self::recognize_string(data, b'"'),
            b'\'' => return Self::recognize_string(data, b'\''),
            b'@' => return Self::recognize_at(data),
            b'{' => self.recognize_brace(data),
            b'.' => {
                if data.get(1).is_some_and(u8::is_ascii_digit) {
                    Self::recognize_number(data)
                } else {
                    (1, Ok(ShExCToken::Punctuation(".")))
                }
            }
            b'+' | b'-' => {
                if Self::starts_number(&data[1..]) {
                    Self::recognize_number(data)
                } else if data[0] == b'+' {
                    (1, Ok(ShExCToken::Punctuation("+")))
                } else {
                    (1, Ok(ShExCToken::Punctuation("-")))
                }
            }
            b'0'..=b'9' => Self::recognize_number(data),
            b'^' => {
                if data.get(1) == Some(&b'^') {
                    (2, Ok(ShExCToken::Punctuation("^^")))
                } else {
                    (1, Ok(ShExCToken::Punctuation("^")))
                }
            }
            b'|' => {
                if data.get(1) == Some(&b'|') {
                    (2, Ok(ShExCToken::Punctuation("||")))
                } else {
                    (1, Ok(ShExCToken::Punctuation("|")))
                }
            }
            b'=' => (1, Ok(ShExCToken::Punctuation("="))),
            b'}' => (1, Ok(ShExCToken::Punctuation("}"))),
            b'&' => (1, Ok(ShExCToken::Punctuation("&"))),
            b',' => (1, Ok(ShExCToken::Punctuation(","))),
            b'(' => (1, Ok(ShExCToken::Punctuation("("))),
            b')' => (1, Ok(ShExCToken::Punctuation(")"))),
            b'$' => (1, Ok(ShExCToken::Punctuation("$"))),
            b'!' => (1, Ok(ShExCToken::Punctuation("!"))),
            b'~' => (1, Ok(ShExCToken::Punctuation("~"))),
            b';' => (1, Ok(ShExCToken::Punctuation(";"))),
            b'*' => (1, Ok(ShExCToken::Punctuation("*"))),
            b'?' => (1, Ok(ShExCToken::Punctuation("?"))),
            b'%' => (1, Ok(ShExCToken::Punctuation("%"))),
            _ => return Self::recognize_pname_or_keyword(data),
        })
    }
}

enum Name<'a> {
    Prefixed {
        prefix: &'a str,
        local: Cow<'a, str>,
    },
    /// A name without `:`, possibly empty if the data does not start with a name.
    Word(&'a str),
}

impl ShExCLexer {
    fn recognize_iri(data: &[u8]) -> Option<(usize, Result<ShExCToken<'_>, TokenRecognizerError>)> {
        // IRIREF  ::=  '<' ([^#x00-#x20<>"{}|^`\] | UCHAR)* '>'
        let mut i = 1;
        loop {
            match *data.get(i)? {
                b'>' => {
                    return Some((
                        i + 1,
                        str_from_utf8(&data[..=i], 0..i + 1).map(ShExCToken::IriRef),
                    ));
                }
                b'\\' => {
                    let (consumed, result) = Self::recognize_uchar(&data[i..], i)?;
                    i += consumed;
                    if let Err(e) = result {
                        return Some((i, Err(e)));
                    }
                }
                c @ (0x00..=0x20 | b'<' | b'"' | b'{' | b'}' | b'|' | b'^' | b'`') => {
                    return Some((
                        i + 1,
                        Err((
                            i,
                            format!("The character {:?} is not allowed in IRIs", char::from(c)),
                        )
                            .into()),
                    ));
                }
                _ => i += 1,
            }
        }
    }

    fn recognize_pname_or_keyword(
        data: &[u8],
    ) -> Option<(usize, Result<ShExCToken<'_>, TokenRecognizerError>)> {
        let (consumed, name) = Self::recognize_name(data)?;
        Some(match name {
            Ok(Name::Prefixed { prefix, local }) => {
                (consumed, Ok(ShExCToken::PrefixedName { prefix, local }))
            }
            Ok(Name::Word("")) => match Self::recognize_unicode_char(data, 0)? {
                Ok((c, len)) => (len, Err((0..len, format!("Unexpected character '{c}'")).into())),
                Err(e) => (e.position.end, Err(e)),
            },
            Ok(Name::Word(word)) => (
                consumed,
                Keyword::from_word(word).map(ShExCToken::Keyword).ok_or_else(|| {
                    (
                        0..consumed,
                        format!("'{word}' is not a keyword, prefixed names must contain ':'"),
                    )
                        .into()
                }),
            ),
            Err(e) => (consumed, Err(e)),
        })
    }

    fn recognize_name(data: &[u8]) -> Option<(usize, Result<Name<'_>, TokenRecognizerError>)> {
        // PNAME_NS   ::=  PN_PREFIX? ':'
        // PNAME_LN   ::=  PNAME_NS PN_LOCAL
        // PN_PREFIX  ::=  PN_CHARS_BASE ((PN_CHARS | '.')* PN_CHARS)?
        let mut i = 0;
        let mut is_prefixed = false;
        while let Some(r) = Self::recognize_unicode_char(&data[i..], i) {
            let (c, consumed) = match r {
                Ok(r) => r,
                Err(e) => return Some((e.position.end, Err(e))),
            };
            if c == ':' {
                i += consumed;
                is_prefixed = true;
                break;
            } else if i == 0 {
                if !Self::is_possible_pn_chars_base(c) {
                    return Some((0, Ok(Name::Word(""))));
                }
                i += consumed;
            } else if Self::is_possible_pn_chars(c) || c == '.' {
                i += consumed;
            } else {
                break;
            }
        }
        if !is_prefixed {
            while data[..i].ends_with(b".") {
                i -= 1;
            }
            return Some((i, str_from_utf8(&data[..i], 0..i).map(Name::Word)));
        }
        let prefix = match str_from_utf8(&data[..i - 1], 0..i - 1) {
            Ok(prefix) => prefix,
            Err(e) => return Some((i, Err(e))),
        };
        if prefix.ends_with('.') {
            return Some((
                i,
                Err((
                    0..i,
                    format!("'{prefix}' is not a valid prefix: prefixes are not allowed to end with '.'"),
                )
                    .into()),
            ));
        }
        let (consumed, local) = Self::recognize_optional_pn_local(&data[i..], i)?;
        Some((
            i + consumed,
            local.map(|local| Name::Prefixed { prefix, local }),
        ))
    }

    fn recognize_optional_pn_local(
        data: &[u8],
        position: usize,
    ) -> Option<(usize, Result<Cow<'_, str>, TokenRecognizerError>)> {
        // PN_LOCAL  ::=  (PN_CHARS_U | ':' | [0-9] | PLX) ((PN_CHARS | '.' | ':' | PLX)* (PN_CHARS | ':' | PLX))?
        let mut i = 0;
        let mut buffer = None; // Only allocated if there are some escaped characters
        let mut copied_until = 0;
        let mut trailing_dots = 0;
        while let Some(r) = Self::recognize_unicode_char(&data[i..], position + i) {
            let (c, consumed) = match r {
                Ok(r) => r,
                Err(e) => return Some((e.position.end - position, Err(e))),
            };
            if c == '%' {
                // PERCENT  ::=  '%' HEX HEX
                let hex = data.get(i + 1..i + 3)?;
                if !hex.iter().all(u8::is_ascii_hexdigit) {
                    return Some((
                        i + 3,
                        Err((
                            position + i..position + i + 3,
                            format!(
                                "escapes in IRIs should be % followed by two hexadecimal characters, found '%{}'",
                                String::from_utf8_lossy(hex)
                            ),
                        )
                            .into()),
                    ));
                }
                i += 3;
                trailing_dots = 0;
            } else if c == '\\' {
                // PN_LOCAL_ESC  ::=  '\' ('_' | '~' | '.' | '-' | '!' | '$' | '&' | "'" | '(' | ')' | '*' | '+' | ',' | ';' | '=' | '/' | '?' | '#' | '@' | '%')
                let escaped = *data.get(i + 1)?;
                if !b"_~.-!$&'()*+,;=/?#@%".contains(&escaped) {
                    return Some((
                        i + 2,
                        Err((
                            position + i..position + i + 2,
                            format!(
                                "The characters that are allowed to be escaped in local names are _~.-!$&'()*+,;=/?#@%, found '{}'",
                                char::from(escaped)
                            ),
                        )
                            .into()),
                    ));
                }
                let buffer = buffer.get_or_insert_with(String::new);
                match str_from_utf8(&data[copied_until..i], position + copied_until..position + i)
                {
                    Ok(s) => buffer.push_str(s),
                    Err(e) => return Some((i, Err(e))),
                }
                buffer.push(char::from(escaped));
                i += 2;
                copied_until = i;
                trailing_dots = 0;
            } else if i == 0 {
                if !(Self::is_possible_pn_chars_u(c) || c == ':' || c.is_ascii_digit()) {
                    break;
                }
                i += consumed;
            } else if Self::is_possible_pn_chars(c) || c == ':' {
                i += consumed;
                trailing_dots = 0;
            } else if c == '.' {
                i += consumed;
                trailing_dots += 1;
            } else {
                break;
            }
        }
        // We do not include the trailing dots
        i -= trailing_dots;
        let tail = match str_from_utf8(&data[copied_until..i], position + copied_until..position + i)
        {
            Ok(tail) => tail,
            Err(e) => return Some((i, Err(e))),
        };
        Some((
            i,
            Ok(if let Some(mut buffer) = buffer {
                buffer.push_str(tail);
                Cow::Owned(buffer)
            } else {
                Cow::Borrowed(tail)
            }),
        ))
    }

    fn recognize_at(data: &[u8]) -> Option<(usize, Result<ShExCToken<'_>, TokenRecognizerError>)> {
        // ATPNAME_NS  ::=  '@' PNAME_NS
        // ATPNAME_LN  ::=  '@' PNAME_LN
        // LANGTAG     ::=  '@' [a-zA-Z]+ ('-' [a-zA-Z0-9]+)*
        if matches!(data.get(1), None | Some(b'<' | b'_')) {
            return Some((1, Ok(ShExCToken::Punctuation("@"))));
        }
        let (consumed, name) = Self::recognize_name(&data[1..])?;
        match name {
            Ok(Name::Prefixed { prefix, local }) => {
                return Some((
                    consumed + 1,
                    Ok(ShExCToken::AtPrefixedName { prefix, local }),
                ));
            }
            Err(e) => {
                return Some((
                    consumed + 1,
                    Err((e.position.start + 1..e.position.end + 1, e.message).into()),
                ));
            }
            Ok(Name::Word(_)) => (),
        }
        Some(if let Some(len) = Self::lang_tag_len(data) {
            (len, str_from_utf8(&data[1..len], 1..len).map(ShExCToken::LangTag))
        } else {
            (1, Ok(ShExCToken::Punctuation("@")))
        })
    }

    fn lang_tag_len(data: &[u8]) -> Option<usize> {
        let mut i = 1 + data[1..]
            .iter()
            .take_while(|c| c.is_ascii_alphabetic())
            .count();
        if i == 1 {
            return None;
        }
        while data.get(i) == Some(&b'-') {
            let block = data[i + 1..]
                .iter()
                .take_while(|c| c.is_ascii_alphanumeric())
                .count();
            if block == 0 {
                break;
            }
            i += block + 1;
        }
        Some(i)
    }

    fn recognize_blank_node_label(
        data: &[u8],
    ) -> Option<(usize, Result<ShExCToken<'_>, TokenRecognizerError>)> {
        // BLANK_NODE_LABEL  ::=  '_:' (PN_CHARS_U | [0-9]) ((PN_CHARS | '.')* PN_CHARS)?
        let mut i = 2;
        while let Some(c) = Self::recognize_unicode_char(&data[i..], i) {
            let (c, consumed) = match c {
                Ok(c) => c,
                Err(e) => return Some((e.position.end, Err(e))),
            };
            if (i == 2 && (Self::is_possible_pn_chars_u(c) || c.is_ascii_digit()))
                || (i > 2 && (Self::is_possible_pn_chars(c) || c == '.'))
            {
                i += consumed;
            } else {
                break;
            }
        }
        // The label is not allowed to end with a dot
        while i > 2 && data[i - 1] == b'.' {
            i -= 1;
        }
        Some(if i == 2 {
            (i, Err((0..i, "A blank node ID cannot be empty").into()))
        } else {
            (
                i,
                str_from_utf8(&data[2..i], 2..i).map(ShExCToken::BlankNodeLabel),
            )
        })
    }

    fn recognize_string(
        data: &[u8],
        delimiter: u8,
    ) -> Option<(usize, Result<ShExCToken<'_>, TokenRecognizerError>)> {
        if data.get(1) == Some(&delimiter) && data.get(2) == Some(&delimiter) {
            return Self::recognize_long_string(data, delimiter);
        }
        // STRING_LITERAL_QUOTE         ::=  '"' ([^#x22#x5C#xA#xD] | ECHAR | UCHAR)* '"'
        // STRING_LITERAL_SINGLE_QUOTE  ::=  "'" ([^#x27#x5C#xA#xD] | ECHAR | UCHAR)* "'"
        // Escapes are only delimited here, they are decoded by the parser
        let mut i = 1;
        loop {
            match *data.get(i)? {
                c if c == delimiter => {
                    return Some((
                        i + 1,
                        str_from_utf8(&data[..=i], 0..i + 1)
                            .map(|raw| ShExCToken::String { raw, quote_width: 1 }),
                    ));
                }
                b'\\' => {
                    data.get(i + 1)?;
                    i += 2;
                }
                b'\n' | b'\r' => {
                    return Some((
                        i + 1,
                        Err((i, "Line jumps are not allowed in string literals, use \\n").into()),
                    ));
                }
                _ => i += 1,
            }
        }
    }

    fn recognize_long_string(
        data: &[u8],
        delimiter: u8,
    ) -> Option<(usize, Result<ShExCToken<'_>, TokenRecognizerError>)> {
        // STRING_LITERAL_LONG_SINGLE_QUOTE  ::=  "'''" (("'" | "''")? ([^'\] | ECHAR | UCHAR))* "'''"
        // STRING_LITERAL_LONG_QUOTE         ::=  '"""' (('"' | '""')? ([^"\] | ECHAR | UCHAR))* '"""'
        let mut i = 3;
        loop {
            i += memchr2(delimiter, b'\\', data.get(i..)?)?;
            if data[i] == b'\\' {
                data.get(i + 1)?;
                i += 2;
            } else if data.get(i + 1) == Some(&delimiter) && data.get(i + 2) == Some(&delimiter) {
                return Some((
                    i + 3,
                    str_from_utf8(&data[..i + 3], 0..i + 3)
                        .map(|raw| ShExCToken::String { raw, quote_width: 3 }),
                ));
            } else {
                i += 1;
            }
        }
    }

    fn starts_number(data: &[u8]) -> bool {
        match data.first() {
            Some(b'0'..=b'9') => true,
            Some(b'.') => data.get(1).is_some_and(u8::is_ascii_digit),
            _ => false,
        }
    }

    fn recognize_number(data: &[u8]) -> (usize, Result<ShExCToken<'_>, TokenRecognizerError>) {
        // INTEGER    ::=  [+-]? [0-9]+
        // DECIMAL    ::=  [+-]? [0-9]* '.' [0-9]+
        // DOUBLE     ::=  [+-]? ([0-9]+ '.' [0-9]* EXPONENT | '.'? [0-9]+ EXPONENT)
        // EXPONENT   ::=  [eE] [+-]? [0-9]+
        let mut i = 0;
        if matches!(data.first(), Some(b'+' | b'-')) {
            i += 1;
        }
        // We read the digits before .
        let count_before = Self::recognize_digits(&data[i..]);
        i += count_before;

        // We read the digits after .
        let count_after = if data.get(i) == Some(&b'.') {
            i += 1;
            let count_after = Self::recognize_digits(&data[i..]);
            i += count_after;
            Some(count_after)
        } else {
            None
        };

        if matches!(data.get(i), Some(b'e' | b'E')) {
            i += 1;
            if matches!(data.get(i), Some(b'+' | b'-')) {
                i += 1;
            }
            let count_exp = Self::recognize_digits(&data[i..]);
            i += count_exp;
            (
                i,
                if count_exp == 0 {
                    Err((0..i, "A double exponent cannot be empty").into())
                } else if count_before == 0 && count_after.unwrap_or(0) == 0 {
                    Err((0..i, "A double should not be empty").into())
                } else {
                    str_from_utf8(&data[..i], 0..i).map(ShExCToken::Double)
                },
            )
        } else if let Some(count_after) = count_after {
            if count_after == 0 {
                // We do not consume the '.' after all
                i -= 1;
                (
                    i,
                    if count_before == 0 {
                        Err((0..i, "An integer should not be empty").into())
                    } else {
                        str_from_utf8(&data[..i], 0..i).map(ShExCToken::Integer)
                    },
                )
            } else {
                (i, str_from_utf8(&data[..i], 0..i).map(ShExCToken::Decimal))
            }
        } else {
            (
                i,
                if count_before == 0 {
                    Err((0..i, "An integer should not be empty").into())
                } else {
                    str_from_utf8(&data[..i], 0..i).map(ShExCToken::Integer)
                },
            )
        }
    }

    fn recognize_digits(data: &[u8]) -> usize {
        data.iter().take_while(|c| c.is_ascii_digit()).count()
    }

    fn recognize_brace<'a>(
        &mut self,
        data: &'a [u8],
    ) -> (usize, Result<ShExCToken<'a>, TokenRecognizerError>) {
        if let Some(len) = Self::repeat_range_len(data) {
            (
                len,
                str_from_utf8(&data[..len], 0..len).map(ShExCToken::RepeatRange),
            )
        } else if let Some(len) = self.code_len(data) {
            (len, str_from_utf8(&data[..len], 0..len).map(ShExCToken::Code))
        } else {
            (1, Ok(ShExCToken::Punctuation("{")))
        }
    }

    fn repeat_range_len(data: &[u8]) -> Option<usize> {
        // REPEAT_RANGE  ::=  '{' [0-9]+ (',' ([0-9]+ | '*')?)? '}'
        let mut i = 1;
        let min = Self::recognize_digits(&data[i..]);
        if min == 0 {
            return None;
        }
        i += min;
        if data.get(i) == Some(&b',') {
            i += 1;
            if data.get(i) == Some(&b'*') {
                i += 1;
            } else {
                i += Self::recognize_digits(&data[i..]);
            }
        }
        (data.get(i) == Some(&b'}')).then_some(i + 1)
    }

    fn code_len(&mut self, data: &[u8]) -> Option<usize> {
        // CODE  ::=  '{' ([^%\\] | '\\' [%\\] | UCHAR)* '%' '}'
        let mut i = 1;
        loop {
            i = self.next_code_delimiter(data, i)?;
            if data[i] == b'%' {
                return (data.get(i + 1) == Some(&b'}')).then_some(i + 2);
            }
            let hex_len = match *data.get(i + 1)? {
                b'%' | b'\\' => 0,
                b'u' => 4,
                b'U' => 8,
                _ => return None,
            };
            if !data
                .get(i + 2..i + 2 + hex_len)?
                .iter()
                .all(u8::is_ascii_hexdigit)
            {
                return None;
            }
            i += 2 + hex_len;
        }
    }

    /// Position of the first `%` or `\` at or after `from`.
    ///
    /// Every `{` is a potential `CODE` start, the last search result is kept to avoid scanning the same bytes again.
    fn next_code_delimiter(&mut self, data: &[u8], from: usize) -> Option<usize> {
        let remaining = data.len().checked_sub(from)?;
        match self.code_delimiter {
            CodeDelimiter::Absent => return None,
            CodeDelimiter::FromEnd(distance) if distance <= remaining => {
                return Some(data.len() - distance);
            }
            CodeDelimiter::FromEnd(_) | CodeDelimiter::Unknown => (),
        }
        let found = memchr2(b'%', b'\\', &data[from..]).map(|i| from + i);
        self.code_delimiter = found.map_or(CodeDelimiter::Absent, |i| {
            CodeDelimiter::FromEnd(data.len() - i)
        });
        found
    }

    fn recognize_uchar(
        data: &[u8],
        position: usize,
    ) -> Option<(usize, Result<char, TokenRecognizerError>)> {
        // UCHAR  ::=  '\u' HEX HEX HEX HEX | '\U' HEX HEX HEX HEX HEX HEX HEX HEX
        let (len, escape_char) = match *data.get(1)? {
            b'u' => (4, 'u'),
            b'U' => (8, 'U'),
            c => {
                return Some((
                    2,
                    Err((
                        position..position + 2,
                        format!("Unexpected escape character '\\{}' in IRI", char::from(c)),
                    )
                        .into()),
                ));
            }
        };
        let hex = data.get(2..2 + len)?;
        Some((
            2 + len,
            Self::recognize_hex_char(hex, escape_char, position),
        ))
    }

    fn recognize_hex_char(
        data: &[u8],
        escape_char: char,
        position: usize,
    ) -> Result<char, TokenRecognizerError> {
        let val = str::from_utf8(data).unwrap_or_default();
        let codepoint = u32::from_str_radix(val, 16)
            .ok()
            .filter(|_| data.iter().all(u8::is_ascii_hexdigit))
            .ok_or_else(|| {
                (
                    position..position + data.len() + 2,
                    format!(
                        "The escape sequence '\\{escape_char}{val}' is not a valid hexadecimal string"
                    ),
                )
            })?;
        char::from_u32(codepoint).ok_or_else(|| {
            (
                position..position + data.len() + 2,
                format!(
                    "The escape sequence '\\{escape_char}{val}' is encoding {codepoint:X} that is not a valid unicode character",
                ),
            )
                .into()
        })
    }

    fn recognize_unicode_char(
        data: &[u8],
        position: usize,
    ) -> Option<Result<(char, usize), TokenRecognizerError>> {
        let first = *data.first()?;
        let len = match first {
            0x00..=0x7F => return Some(Ok((char::from(first), 1))),
            0xC2..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF4 => 4,
            _ => return Some(Err((position, "Invalid UTF-8 character encoding").into())),
        };
        let Some(bytes) = data.get(..len) else {
            return Some(Err((
                position..position + data.len(),
                "Invalid UTF-8 character encoding",
            )
                .into()));
        };
        Some(
            str::from_utf8(bytes)
                .ok()
                .and_then(|s| s.chars().next())
                .map(|c| (c, len))
                .ok_or_else(|| {
                    (position..position + len, "Invalid UTF-8 character encoding").into()
                }),
        )
    }

    // PN_CHARS_BASE  ::=  [A-Z] | [a-z] | [#x00C0-#x00D6] | [#x00D8-#x00F6] | [#x00F8-#x02FF] | [#x0370-#x037D] | [#x037F-#x1FFF] | [#x200C-#x200D] | [#x2070-#x218F] | [#x2C00-#x2FEF] | [#x3001-#xD7FF] | [#xF900-#xFDCF] | [#xFDF0-#xFFFD] | [#x10000-#xEFFFF]
    fn is_possible_pn_chars_base(c: char) -> bool {
        matches!(c,
        'A'..='Z'
        | 'a'..='z'
        | '\u{00C0}'..='\u{00D6}'
        | '\u{00D8}'..='\u{00F6}'
        | '\u{00F8}'..='\u{02FF}'
        | '\u{0370}'..='\u{037D}'
        | '\u{037F}'..='\u{1FFF}'
        | '\u{200C}'..='\u{200D}'
        | '\u{2070}'..='\u{218F}'
        | '\u{2C00}'..='\u{2FEF}'
        | '\u{3001}'..='\u{D7FF}'
        | '\u{F900}'..='\u{FDCF}'
        | '\u{FDF0}'..='\u{FFFD}'
        | '\u{10000}'..='\u{EFFFF}')
    }

    // PN_CHARS_U  ::=  PN_CHARS_BASE | '_'
    fn is_possible_pn_chars_u(c: char) -> bool {
        Self::is_possible_pn_chars_base(c) || c == '_'
    }

    // PN_CHARS  ::=  PN_CHARS_U | '-' | [0-9] | #x00B7 | [#x0300-#x036F] | [#x203F-#x2040]
    fn is_possible_pn_chars(c: char) -> bool {
        Self::is_possible_pn_chars_u(c)
            || matches!(c,
        '-' | '0'..='9' | '\u{00B7}' | '\u{0300}'..='\u{036F}' | '\u{203F}'..='\u{2040}')
    }
}

fn str_from_utf8(data: &[u8], range: Range<usize>) -> Result<&str, TokenRecognizerError> {
    str::from_utf8(data).map_err(|e| {
        (
            range.start + e.valid_up_to()..min(range.end, range.start + e.valid_up_to() + 4),
            format!("Invalid UTF-8: {e}"),
        )
            .into()
    })
}

/// A lazy and finite sequence of the tokens of a ShExC document.
///
/// Whitespaces and comments (`# ...` and `// ...` up to the end of the line) are skipped.
/// The sequence stops after the first [`LexError`].
///
/// ```
/// use oxshexc::{Keyword, ShExCToken, ShExCTokenizer};
///
/// let tokens = ShExCTokenizer::new("PREFIX ex: <http://example.com/> # comment")
///     .map(|t| t.map(|(token, _)| token))
///     .collect::<Result<Vec<_>, _>>()?;
/// assert_eq!(tokens[0], ShExCToken::Keyword(Keyword::Prefix));
/// assert_eq!(tokens[2], ShExCToken::IriRef("<http://example.com/>"));
/// # Result::<_, oxshexc::LexError>::Ok(())
/// ```
pub struct ShExCTokenizer<'a> {
    lexer: Lexer<'a, ShExCLexer>,
    failed: bool,
}

impl<'a> ShExCTokenizer<'a> {
    /// Tokenizes `input` from its beginning.
    pub fn new(input: &'a str) -> Self {
        Self::at(input, 0)
    }

    /// Tokenizes `input` from the byte `offset`.
    pub fn at(input: &'a str, offset: usize) -> Self {
        let mut lexer = Lexer::new(ShExCLexer::default(), input.as_bytes(), LINE_COMMENT_STARTS);
        lexer.restart_at(offset);
        Self {
            lexer,
            failed: false,
        }
    }

    /// The byte offset the next token is searched from.
    #[inline]
    pub fn offset(&self) -> usize {
        self.lexer.position()
    }
}

impl<'a> Iterator for ShExCTokenizer<'a> {
    type Item = Result<(ShExCToken<'a>, Range<usize>), LexError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let result = self.lexer.read_next()?;
        self.failed = result.is_err();
        Some(result.map(|t| (t.token, t.position)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(input: &str) -> Vec<ShExCToken<'_>> {
        ShExCTokenizer::new(input)
            .map(|t| t.map(|(token, _)| token))
            .collect::<Result<_, _>>()
            .unwrap()
    }

    fn lex_error(input: &str) -> LexError {
        ShExCTokenizer::new(input)
            .find_map(Result::err)
            .unwrap()
    }

    #[test]
    fn keywords_are_case_insensitive() {
        assert_eq!(
            tokens("prefix Base VIRTUAL closed eXtRa MinInclusive start"),
            [
                ShExCToken::Keyword(Keyword::Prefix),
                ShExCToken::Keyword(Keyword::Base),
                ShExCToken::Keyword(Keyword::Virtual),
                ShExCToken::Keyword(Keyword::Closed),
                ShExCToken::Keyword(Keyword::Extra),
                ShExCToken::Keyword(Keyword::MinInclusive),
                ShExCToken::Keyword(Keyword::Start),
            ]
        );
        assert_eq!(
            tokens("a true false"),
            [
                ShExCToken::Keyword(Keyword::A),
                ShExCToken::Keyword(Keyword::True),
                ShExCToken::Keyword(Keyword::False),
            ]
        );
        assert_eq!(lex_error("A").message(), "'A' is not a keyword, prefixed names must contain ':'");
    }

    #[test]
    fn longest_symbol_wins() {
        assert_eq!(
            tokens("|| | ^^ ^! !^ = & $ ~ ; * + ? - % @ , ( ) . }"),
            [
                "||", "|", "^^", "^", "!", "!", "^", "=", "&", "$", "~", ";", "*", "+", "?",
                "-", "%", "@", ",", "(", ")", ".", "}"
            ]
            .map(ShExCToken::Punctuation)
        );
    }

    #[test]
    fn iri_refs_keep_escapes() {
        assert_eq!(
            tokens(r"<http://example.com/\u00E9> <>"),
            [
                ShExCToken::IriRef(r"<http://example.com/\u00E9>"),
                ShExCToken::IriRef("<>")
            ]
        );
        let error = lex_error("<http://example.com/a b>");
        assert_eq!(error.character(), ' ');
        assert_eq!(error.location().start.offset, 21);
        assert_eq!(lex_error(r"<http://a/\q>").location().start.offset, 10);
    }

    #[test]
    fn prefixed_names() {
        assert_eq!(
            tokens(r"ex:foo ex: :bar ex:a\-b. ex:%20x é:ü"),
            [
                ShExCToken::PrefixedName {
                    prefix: "ex",
                    local: "foo".into()
                },
                ShExCToken::PrefixedName {
                    prefix: "ex",
                    local: "".into()
                },
                ShExCToken::PrefixedName {
                    prefix: "",
                    local: "bar".into()
                },
                ShExCToken::PrefixedName {
                    prefix: "ex",
                    local: "a-b".into()
                },
                ShExCToken::Punctuation("."),
                ShExCToken::PrefixedName {
                    prefix: "ex",
                    local: "%20x".into()
                },
                ShExCToken::PrefixedName {
                    prefix: "é",
                    local: "ü".into()
                },
            ]
        );
        assert_eq!(lex_error("ex:%2g").location().start.offset, 3);
    }

    #[test]
    fn at_names_and_language_tags() {
        assert_eq!(
            tokens(r#"@ex:Shape @ex: @: @<http://a/> "chat"@fr-BE"#),
            [
                ShExCToken::AtPrefixedName {
                    prefix: "ex",
                    local: "Shape".into()
                },
                ShExCToken::AtPrefixedName {
                    prefix: "ex",
                    local: "".into()
                },
                ShExCToken::AtPrefixedName {
                    prefix: "",
                    local: "".into()
                },
                ShExCToken::Punctuation("@"),
                ShExCToken::IriRef("<http://a/>"),
                ShExCToken::String {
                    raw: "\"chat\"",
                    quote_width: 1
                },
                ShExCToken::LangTag("fr-BE"),
            ]
        );
        assert_eq!(
            tokens("@_:b1"),
            [
                ShExCToken::Punctuation("@"),
                ShExCToken::BlankNodeLabel("b1")
            ]
        );
    }

    #[test]
    fn strings() {
        assert_eq!(
            tokens(r#"'a\'b' "" """x"y""z""" '''l
l'''"#),
            [
                ShExCToken::String {
                    raw: r"'a\'b'",
                    quote_width: 1
                },
                ShExCToken::String {
                    raw: r#""""#,
                    quote_width: 1
                },
                ShExCToken::String {
                    raw: r#""""x"y""z""""#,
                    quote_width: 3
                },
                ShExCToken::String {
                    raw: "'''l\nl'''",
                    quote_width: 3
                },
            ]
        );
        assert_eq!(lex_error("'a\nb'").character(), '\n');
        assert_eq!(lex_error("\"abc").message(), "Unexpected end of file");
    }

    #[test]
    fn numbers() {
        assert_eq!(
            tokens("12 -3 +4.5 .5 1e3 1.5E-2 .5e1 7."),
            [
                ShExCToken::Integer("12"),
                ShExCToken::Integer("-3"),
                ShExCToken::Decimal("+4.5"),
                ShExCToken::Decimal(".5"),
                ShExCToken::Double("1e3"),
                ShExCToken::Double("1.5E-2"),
                ShExCToken::Double(".5e1"),
                ShExCToken::Integer("7"),
                ShExCToken::Punctuation("."),
            ]
        );
    }

    #[test]
    fn braces() {
        assert_eq!(
            tokens(r"{2} {2,} {2,5} {2,*} { %} {print(1) \%} %} {"),
            [
                ShExCToken::RepeatRange("{2}"),
                ShExCToken::RepeatRange("{2,}"),
                ShExCToken::RepeatRange("{2,5}"),
                ShExCToken::RepeatRange("{2,*}"),
                ShExCToken::Code("{ %}"),
                ShExCToken::Code(r"{print(1) \%} %}"),
                ShExCToken::Punctuation("{"),
            ]
        );
        assert_eq!(
            tokens("{ ex:p . } %ex:a{ x %}")[0],
            ShExCToken::Punctuation("{")
        );
        assert_eq!(
            tokens("{ } { } %ex:a{ x %} { }"),
            [
                ShExCToken::Punctuation("{"),
                ShExCToken::Punctuation("}"),
                ShExCToken::Punctuation("{"),
                ShExCToken::Punctuation("}"),
                ShExCToken::Punctuation("%"),
                ShExCToken::PrefixedName {
                    prefix: "ex",
                    local: "a".into()
                },
                ShExCToken::Code("{ x %}"),
                ShExCToken::Punctuation("{"),
                ShExCToken::Punctuation("}"),
            ]
        );
    }

    #[test]
    fn blank_node_labels() {
        assert_eq!(
            tokens("_:b0 _:a.b. _:1"),
            [
                ShExCToken::BlankNodeLabel("b0"),
                ShExCToken::BlankNodeLabel("a.b"),
                ShExCToken::Punctuation("."),
                ShExCToken::BlankNodeLabel("1"),
            ]
        );
        assert_eq!(lex_error("_x").character(), '_');
    }

    #[test]
    fn unmatched_character_is_an_error() {
        let error = lex_error("PREFIX ex: <http://a/>\n  ex:S { ex:p ` }");
        assert_eq!(error.character(), '`');
        assert_eq!(error.location().start.line, 1);
        assert_eq!(error.location().start.column, 14);
    }

    #[test]
    fn restarts_at_offset() {
        let mut tokenizer = ShExCTokenizer::at("ex:a ex:b", 5);
        assert_eq!(
            tokenizer.next().and_then(Result::ok),
            Some((
                ShExCToken::PrefixedName {
                    prefix: "ex",
                    local: "b".into()
                },
                5..9
            ))
        );
        assert_eq!(tokenizer.offset(), 9);
        assert!(tokenizer.next().is_none());
    }
}
