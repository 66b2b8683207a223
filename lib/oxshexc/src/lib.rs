#![doc = include_str!("../README.md")]
#![doc(test(attr(deny(warnings))))]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]
#![doc(html_favicon_url = "https://raw.githubusercontent.com/oxigraph/oxigraph/main/logo.svg")]
#![doc(html_logo_url = "https://raw.githubusercontent.com/oxigraph/oxigraph/main/logo.svg")]

mod context;
mod decoder;
mod lexer;
mod model;
mod parser;
mod toolkit;

pub use crate::context::SchemaAssembler;
pub use crate::decoder::{
    BaseIri, FALSE_LITERAL, TRUE_LITERAL, boolean_literal, canonicalize_literal, resolve_iri,
    unescape_iri, unescape_string,
};
pub use crate::lexer::{Keyword, ShExCToken, ShExCTokenizer};
pub use crate::model::{
    Annotation, Cardinality, Exclusion, Facet, Facets, Group, Include, NodeKind, ObjectValue,
    OneOf, Schema, SemanticActions, Shape, ShapeLabel, ShapeRef, SomeOf, Stem, TripleConstraint,
    TripleExpr, ValueClass, ValueSetItem,
};
pub use crate::parser::ShExCParser;
pub use crate::toolkit::{
    LexError, MalformedEscapeError, ShExCParseError, SyntaxError, TextPosition,
    UnknownPrefixError,
};
