//! A [ShExC](https://shex.io/shex-semantics/#shexc) parser implemented by [`ShExCParser`].

use crate::context::SchemaAssembler;
use crate::decoder::{
    boolean_literal, canonicalize_literal, string_literal, try_unescape_string,
};
use crate::lexer::{Keyword, ShExCToken, ShExCTokenizer};
use crate::model::{
    Annotation, Cardinality, Exclusion, Facet, Facets, Group, Include, NodeKind, ObjectValue,
    OneOf, Schema, SemanticActions, Shape, ShapeLabel, ShapeRef, SomeOf, Stem, TripleConstraint,
    TripleExpr, ValueClass, ValueSetItem,
};
use crate::toolkit::{
    LexError, MalformedEscapeError, ShExCParseError, SyntaxError, TextPosition,
    UnknownPrefixError,
};
use oxiri::{Iri, IriParseError};
use oxrdf::vocab::{rdf, xsd};
use oxrdf::{BlankNode, NamedNode};
use std::collections::HashMap;
use std::ops::Range;
use std::str::{self, FromStr};
use tracing::{debug, warn};

/// A [ShExC](https://shex.io/shex-semantics/#shexc) parser.
///
/// Each call to [`parse`](Self::parse) is independent: it starts from the configured base IRI and prefixes
/// and with a blank node counter at 0.
///
/// ```
/// use oxrdf::NamedNode;
/// use oxshexc::{ShExCParser, ShapeLabel, TripleExpr};
///
/// let schema = ShExCParser::new().parse(
///     "PREFIX ex: <http://example.com/>
///     start = @ex:Person
///     ex:Person CLOSED {
///         ex:name LITERAL + ,
///         ex:knows @ex:Person *
///     }",
/// )?;
/// let person = ShapeLabel::Iri(NamedNode::new("http://example.com/Person")?);
/// assert_eq!(schema.start(), Some(&person));
/// let shape = schema.shape(&person).unwrap();
/// assert!(shape.closed);
/// assert!(matches!(shape.expression, Some(TripleExpr::Group(_))));
/// # Result::<_, Box<dyn std::error::Error>>::Ok(())
/// ```
#[derive(Default, Clone)]
#[must_use]
pub struct ShExCParser {
    base: Option<Iri<String>>,
    prefixes: HashMap<String, Iri<String>>,
    strict_escapes: bool,
}

impl ShExCParser {
    /// Builds a new [`ShExCParser`].
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the base IRI used until the document declares its own with `BASE`.
    #[inline]
    pub fn with_base_iri(mut self, base_iri: impl Into<String>) -> Result<Self, IriParseError> {
        self.base = Some(Iri::parse(base_iri.into())?);
        Ok(self)
    }

    /// Declares a prefix before the document is parsed. The document might redeclare it.
    ///
    /// ```
    /// use oxshexc::ShExCParser;
    ///
    /// let schema = ShExCParser::new()
    ///     .with_prefix("ex", "http://example.com/")?
    ///     .parse("ex:S { ex:p . }")?;
    /// assert_eq!(schema.labels()[0].to_string(), "<http://example.com/S>");
    /// # Result::<_, Box<dyn std::error::Error>>::Ok(())
    /// ```
    #[inline]
    pub fn with_prefix(
        mut self,
        prefix_name: impl Into<String>,
        prefix_iri: impl Into<String>,
    ) -> Result<Self, IriParseError> {
        self.prefixes
            .insert(prefix_name.into(), Iri::parse(prefix_iri.into())?);
        Ok(self)
    }

    /// Makes malformed escape sequences in string literals fail the parse with a [`MalformedEscapeError`].
    ///
    /// By default such a string is decoded as the empty string.
    ///
    /// ```
    /// use oxshexc::{ShExCParseError, ShExCParser};
    ///
    /// let document = r#"PREFIX ex: <http://example.com/> ex:S { ex:p ("a\qb") }"#;
    /// assert!(ShExCParser::new().parse(document).is_ok());
    /// assert!(matches!(
    ///     ShExCParser::new().with_strict_escapes().parse(document),
    ///     Err(ShExCParseError::MalformedEscape(_))
    /// ));
    /// ```
    #[inline]
    pub fn with_strict_escapes(mut self) -> Self {
        self.strict_escapes = true;
        self
    }

    /// Parses a complete ShExC document.
    pub fn parse(&self, input: &str) -> Result<Schema, ShExCParseError> {
        let mut assembler = SchemaAssembler::new();
        if let Some(base) = &self.base {
            assembler.bind_base(base.as_str().to_owned());
        }
        for (name, iri) in &self.prefixes {
            assembler.bind_prefix(name.as_str(), iri.as_str().to_owned());
        }
        self.parse_into(input, &mut assembler)?;
        Ok(assembler.finish())
    }

    /// Parses a complete ShExC document from bytes that must be valid UTF-8.
    pub fn parse_slice(&self, input: &[u8]) -> Result<Schema, ShExCParseError> {
        let input = str::from_utf8(input).map_err(|e| {
            let start = e.valid_up_to();
            LexError::new(
                TextPosition::range_from_offsets(
                    input,
                    start..start + e.error_len().unwrap_or(input.len() - start),
                ),
                char::REPLACEMENT_CHARACTER,
                format!("Invalid UTF-8: {e}"),
            )
        })?;
        self.parse(input)
    }

    /// Parses a document into an existing [`SchemaAssembler`].
    ///
    /// The prefixes, base IRI and blank node counter of the assembler are used and updated.
    /// The base IRI and prefixes configured on this parser are not applied.
    /// On error, the assembler might contain the shapes parsed before the error.
    pub fn parse_into(
        &self,
        input: &str,
        assembler: &mut SchemaAssembler,
    ) -> Result<(), ShExCParseError> {
        debug!(bytes = input.len(), "parsing ShExC document");
        DocumentParser::new(input, assembler, self.strict_escapes)?.parse_document()?;
        debug!(
            shapes = assembler.len(),
            prefixes = assembler.prefixes().len(),
            "ShExC document parsed"
        );
        Ok(())
    }
}

/// Nesting of shape definitions and parenthesized expressions above this depth is rejected.
///
/// An inline shape costs about ten stack frames, so the limit must hold in a debug build on a 2 MiB thread.
const MAX_NESTING_DEPTH: usize = 32;

enum FacetArgument {
    String(fn(String) -> Facet),
    Unsigned(fn(u32) -> Facet),
    Signed(fn(i64) -> Facet),
}

/// Recursive descent over the token sequence with one token of lookahead.
struct DocumentParser<'a, 'c> {
    input: &'a str,
    tokens: ShExCTokenizer<'a>,
    current: Option<(ShExCToken<'a>, Range<usize>)>,
    assembler: &'c mut SchemaAssembler,
    strict_escapes: bool,
    depth: usize,
}

impl<'a, 'c> DocumentParser<'a, 'c> {
    fn new(
        input: &'a str,
        assembler: &'c mut SchemaAssembler,
        strict_escapes: bool,
    ) -> Result<Self, ShExCParseError> {
        let mut tokens = ShExCTokenizer::new(input);
        let current = tokens.next().transpose()?;
        Ok(Self {
            input,
            tokens,
            current,
            assembler,
            strict_escapes,
            depth: 0,
        })
    }

    fn parse_document(&mut self) -> Result<(), ShExCParseError> {
        // shexDoc  ::=  directive* ((notStartAction | startActions) statement*)? EOF
        // statement  ::=  directive | notStartAction
        let mut seen_statement = false;
        loop {
            match self.peek() {
                None => return Ok(()),
                Some(ShExCToken::Keyword(Keyword::Base)) => self.parse_base()?,
                Some(ShExCToken::Keyword(Keyword::Prefix)) => self.parse_prefix()?,
                Some(ShExCToken::Punctuation("%")) if !seen_statement => {
                    // startActions  ::=  codeDecl+
                    let actions = self.parse_semantic_actions()?;
                    self.assembler.set_start_actions(actions);
                    seen_statement = true;
                }
                Some(ShExCToken::Keyword(Keyword::Start)) => {
                    self.parse_start()?;
                    seen_statement = true;
                }
                _ => {
                    self.parse_shape()?;
                    seen_statement = true;
                }
            }
        }
    }

    fn parse_base(&mut self) -> Result<(), ShExCParseError> {
        // baseDecl  ::=  "BASE" IRIREF
        self.bump()?;
        let iri = self.parse_iri_ref()?;
        self.assembler.declare_base(iri);
        Ok(())
    }

    fn parse_prefix(&mut self) -> Result<(), ShExCParseError> {
        // prefixDecl  ::=  "PREFIX" PNAME_NS IRIREF
        self.bump()?;
        let prefix = match self.peek() {
            Some(ShExCToken::PrefixedName { prefix, local }) if local.is_empty() => *prefix,
            _ => return Err(self.unexpected(&["a prefix name"])),
        };
        self.bump()?;
        let iri = self.parse_iri_ref()?;
        self.assembler.declare_prefix(prefix, iri);
        Ok(())
    }

    fn parse_start(&mut self) -> Result<(), ShExCParseError> {
        // start  ::=  "start" '=' (shapeLabel | ATPNAME_LN | ATPNAME_NS | '@' shapeLabel | shapeDefinition semanticActions)
        self.bump()?;
        self.expect_punct("=")?;
        let label = if self.starts_shape_label() {
            self.parse_shape_label()?
        } else if matches!(
            self.peek(),
            Some(ShExCToken::AtPrefixedName { .. } | ShExCToken::Punctuation("@"))
        ) {
            self.parse_shape_or_ref()?
        } else if self.starts_shape_definition() {
            let mut shape = self.parse_shape_definition()?;
            shape.semantic_actions = self.parse_semantic_actions()?;
            let label = self.assembler.new_blank_label();
            self.assembler.register_shape(label.clone(), shape);
            label
        } else {
            return Err(self.unexpected(&["a shape label", "@", "a shape definition"]));
        };
        self.assembler.set_start(label);
        Ok(())
    }

    fn parse_shape(&mut self) -> Result<(), ShExCParseError> {
        // shape  ::=  "VIRTUAL"? shapeLabel shapeDefinition semanticActions
        let is_virtual = self.eat_keyword(Keyword::Virtual)?;
        if !self.starts_shape_label() {
            return Err(self.unexpected(&[
                "BASE",
                "PREFIX",
                "start",
                "VIRTUAL",
                "a shape label",
            ]));
        }
        let label = self.parse_shape_label()?;
        let mut shape = self.parse_shape_definition()?;
        shape.is_virtual = is_virtual;
        shape.semantic_actions = self.parse_semantic_actions()?;
        self.assembler.register_shape(label, shape);
        Ok(())
    }

    fn parse_shape_definition(&mut self) -> Result<Shape, ShExCParseError> {
        // shapeDefinition  ::=  (includeSet | extraPropertySet | "CLOSED")* '{' oneOfShape? '}'
        // includeSet  ::=  '&' shapeLabel+
        // extraPropertySet  ::=  "EXTRA" predicate+
        self.enter()?;
        let mut shape = Shape::default();
        loop {
            if self.eat_punct("&")? {
                shape.inherit.push(self.parse_shape_label()?);
                while self.starts_shape_label() {
                    shape.inherit.push(self.parse_shape_label()?);
                }
            } else if self.eat_keyword(Keyword::Extra)? {
                shape.extra.push(self.parse_predicate()?);
                while self.starts_predicate() {
                    shape.extra.push(self.parse_predicate()?);
                }
            } else if self.eat_keyword(Keyword::Closed)? {
                shape.closed = true;
            } else {
                break;
            }
        }
        self.expect_punct("{")?;
        if !self.eat_punct("}")? {
            shape.expression = Some(self.parse_one_of()?);
            self.expect_punct("}")?;
        }
        self.depth -= 1;
        Ok(shape)
    }

    fn parse_one_of(&mut self) -> Result<TripleExpr, ShExCParseError> {
        // oneOfShape  ::=  someOfShape ('|' someOfShape)*
        let mut expressions = vec![self.parse_some_of()?];
        while self.eat_punct("|")? {
            expressions.push(self.parse_some_of()?);
        }
        Ok(collapse(expressions, |expressions| {
            TripleExpr::OneOf(OneOf {
                id: None,
                expressions,
            })
        }))
    }

    fn parse_some_of(&mut self) -> Result<TripleExpr, ShExCParseError> {
        // someOfShape  ::=  groupShape ("||" groupShape)*
        let mut expressions = vec![self.parse_group()?];
        while self.eat_punct("||")? {
            expressions.push(self.parse_group()?);
        }
        Ok(collapse(expressions, |expressions| {
            TripleExpr::SomeOf(SomeOf {
                id: None,
                expressions,
            })
        }))
    }

    fn parse_group(&mut self) -> Result<TripleExpr, ShExCParseError> {
        // groupShape  ::=  unaryShape (',' unaryShape)* ','?
        let mut expressions = vec![self.parse_unary()?];
        while self.eat_punct(",")? && self.starts_unary() {
            expressions.push(self.parse_unary()?);
        }
        Ok(collapse(expressions, |expressions| {
            TripleExpr::Group(Group {
                expressions,
                ..Group::default()
            })
        }))
    }

    fn parse_unary(&mut self) -> Result<TripleExpr, ShExCParseError> {
        // unaryShape  ::=  ('$' tripleExprLabel)? (tripleConstraint | include | encapsulatedShape)
        // include  ::=  '&' shapeLabel
        // encapsulatedShape  ::=  '(' oneOfShape ')' cardinality? semanticActions
        if !self.starts_unary() {
            return Err(self.unexpected(&["$", "&", "(", "^", "!", "a predicate"]));
        }
        let id = if self.eat_punct("$")? {
            Some(self.parse_shape_label()?)
        } else {
            None
        };
        let mut expression = if self.eat_punct("&")? {
            TripleExpr::Include(Include {
                id: None,
                target: self.parse_shape_label()?,
            })
        } else if self.is_punct("(") {
            self.enter()?;
            self.bump()?;
            let inner = self.parse_one_of()?;
            self.expect_punct(")")?;
            self.depth -= 1;
            let cardinality = self.parse_cardinality()?;
            let semantic_actions = self.parse_semantic_actions()?;
            merge_parenthesized(inner, cardinality, semantic_actions)
        } else {
            self.parse_triple_constraint()?.into()
        };
        if let Some(id) = id {
            expression.set_id(id);
        }
        Ok(expression)
    }

    fn parse_triple_constraint(&mut self) -> Result<TripleConstraint, ShExCParseError> {
        // tripleConstraint  ::=  senseFlags? predicate valueClass annotation* cardinality? semanticActions
        // senseFlags  ::=  '^' '!'? | '!' '^'?
        let (inverse, negated) = if self.eat_punct("^")? {
            (true, self.eat_punct("!")?)
        } else if self.eat_punct("!")? {
            (self.eat_punct("^")?, true)
        } else {
            (false, false)
        };
        let predicate = self.parse_predicate()?;
        let value = self.parse_value_class()?;
        let mut annotations = Vec::new();
        while self.eat_punct(";")? {
            // annotation  ::=  ';' iri (iri | literal)
            let predicate = self.parse_iri()?;
            let object = if self.starts_iri() {
                ObjectValue::Iri(self.parse_iri()?)
            } else if self.starts_literal() {
                ObjectValue::Literal(self.parse_literal()?)
            } else {
                return Err(self.unexpected(&["an IRI", "a literal"]));
            };
            annotations.push(Annotation { predicate, object });
        }
        let cardinality = self.parse_cardinality()?.unwrap_or_default();
        let semantic_actions = self.parse_semantic_actions()?;
        Ok(TripleConstraint {
            id: None,
            predicate,
            value,
            cardinality,
            inverse,
            negated,
            annotations,
            semantic_actions,
        })
    }

    fn parse_value_class(&mut self) -> Result<ValueClass, ShExCParseError> {
        // valueClass  ::=  "LITERAL" xsFacet*
        //               |  ("IRI" | "NONLITERAL") groupShapeConstr? stringFacet*
        //               |  "BNODE" groupShapeConstr?
        //               |  datatype
        //               |  groupShapeConstr
        //               |  valueSet
        //               |  '.'
        if let Some(kind) = self.peek_node_kind() {
            self.bump()?;
            let reference = if kind != NodeKind::Literal && self.starts_group_shape_constr() {
                Some(self.parse_group_shape_constr()?)
            } else {
                None
            };
            let mut facets = Facets::default();
            if kind != NodeKind::BNode {
                while let Some(facet) = self.parse_facet(kind == NodeKind::Literal)? {
                    facets.set(facet);
                }
            }
            return Ok(ValueClass::NodeKind {
                kind,
                facets,
                reference,
            });
        }
        if self.starts_iri() {
            Ok(ValueClass::Datatype(self.parse_iri()?))
        } else if self.is_punct("(") {
            Ok(ValueClass::Values(self.parse_value_set()?))
        } else if self.eat_punct(".")? {
            Ok(ValueClass::Any)
        } else if self.starts_group_shape_constr() {
            Ok(ValueClass::Reference(self.parse_group_shape_constr()?))
        } else {
            Err(self.unexpected(&[
                "LITERAL",
                "IRI",
                "NONLITERAL",
                "BNODE",
                "a datatype",
                "a shape reference",
                "(",
                ".",
            ]))
        }
    }

    fn peek_node_kind(&self) -> Option<NodeKind> {
        match self.peek()? {
            ShExCToken::Keyword(Keyword::Literal) => Some(NodeKind::Literal),
            ShExCToken::Keyword(Keyword::Iri) => Some(NodeKind::Iri),
            ShExCToken::Keyword(Keyword::NonLiteral) => Some(NodeKind::NonLiteral),
            ShExCToken::Keyword(Keyword::BNode) => Some(NodeKind::BNode),
            _ => None,
        }
    }

    fn parse_facet(&mut self, numeric_allowed: bool) -> Result<Option<Facet>, ShExCParseError> {
        // stringFacet  ::=  "PATTERN" string | ("LENGTH" | "MINLENGTH" | "MAXLENGTH") INTEGER
        // numericFacet  ::=  ("MININCLUSIVE" | "MINEXCLUSIVE" | "MAXINCLUSIVE" | "MAXEXCLUSIVE") INTEGER
        //                 |  ("TOTALDIGITS" | "FRACTIONDIGITS") INTEGER
        let Some(ShExCToken::Keyword(keyword)) = self.peek() else {
            return Ok(None);
        };
        let argument = match keyword {
            Keyword::Pattern => FacetArgument::String(Facet::Pattern),
            Keyword::Length => FacetArgument::Unsigned(Facet::Length),
            Keyword::MinLength => FacetArgument::Unsigned(Facet::MinLength),
            Keyword::MaxLength => FacetArgument::Unsigned(Facet::MaxLength),
            Keyword::MinInclusive if numeric_allowed => FacetArgument::Signed(Facet::MinInclusive),
            Keyword::MinExclusive if numeric_allowed => FacetArgument::Signed(Facet::MinExclusive),
            Keyword::MaxInclusive if numeric_allowed => FacetArgument::Signed(Facet::MaxInclusive),
            Keyword::MaxExclusive if numeric_allowed => FacetArgument::Signed(Facet::MaxExclusive),
            Keyword::TotalDigits if numeric_allowed => FacetArgument::Unsigned(Facet::TotalDigits),
            Keyword::FractionDigits if numeric_allowed => {
                FacetArgument::Unsigned(Facet::FractionDigits)
            }
            _ => return Ok(None),
        };
        self.bump()?;
        Ok(Some(match argument {
            FacetArgument::String(facet) => facet(self.parse_string()?),
            FacetArgument::Unsigned(facet) => facet(self.parse_integer()?),
            FacetArgument::Signed(facet) => facet(self.parse_integer()?),
        }))
    }

    fn parse_group_shape_constr(&mut self) -> Result<ShapeRef, ShExCParseError> {
        // groupShapeConstr  ::=  shapeOrRef ("OR" shapeOrRef)*
        let first = self.parse_shape_or_ref()?;
        if !self.is_keyword(Keyword::Or) {
            return Ok(ShapeRef::Label(first));
        }
        let mut labels = vec![first];
        while self.eat_keyword(Keyword::Or)? {
            labels.push(self.parse_shape_or_ref()?);
        }
        Ok(ShapeRef::Or(labels))
    }

    fn parse_shape_or_ref(&mut self) -> Result<ShapeLabel, ShExCParseError> {
        // shapeOrRef  ::=  ATPNAME_LN | ATPNAME_NS | '@' shapeLabel | shapeDefinition
        match self.peek() {
            Some(ShExCToken::AtPrefixedName { prefix, local }) => {
                let iri = self.expand(prefix, local)?;
                self.bump()?;
                Ok(iri.into())
            }
            Some(ShExCToken::Punctuation("@")) => {
                self.bump()?;
                self.parse_shape_label()
            }
            _ if self.starts_shape_definition() => {
                let shape = self.parse_shape_definition()?;
                let label = self.assembler.new_blank_label();
                self.assembler.register_shape(label.clone(), shape);
                Ok(label)
            }
            _ => Err(self.unexpected(&["@", "a shape definition"])),
        }
    }

    fn parse_value_set(&mut self) -> Result<Vec<ValueSetItem>, ShExCParseError> {
        // valueSet  ::=  '(' value* ')'
        // value  ::=  iriRange | literal
        self.expect_punct("(")?;
        let mut values = Vec::new();
        while !self.eat_punct(")")? {
            values.push(if self.starts_literal() {
                ValueSetItem::Literal(self.parse_literal()?)
            } else if self.starts_iri() || self.is_punct(".") {
                self.parse_iri_range()?
            } else {
                return Err(self.unexpected(&["an IRI", "a literal", ".", ")"]));
            });
        }
        Ok(values)
    }

    fn parse_iri_range(&mut self) -> Result<ValueSetItem, ShExCParseError> {
        // iriRange  ::=  iri ('~' exclusion*)? | '.' '~'? exclusion*
        if self.eat_punct(".")? {
            self.eat_punct("~")?;
            return Ok(ValueSetItem::StemRange {
                stem: Stem::Wildcard,
                exclusions: self.parse_exclusions()?,
            });
        }
        let iri = self.parse_iri()?;
        if !self.eat_punct("~")? {
            return Ok(ValueSetItem::Iri(iri));
        }
        Ok(ValueSetItem::StemRange {
            stem: Stem::Iri(iri),
            exclusions: self.parse_exclusions()?,
        })
    }

    fn parse_exclusions(&mut self) -> Result<Vec<Exclusion>, ShExCParseError> {
        // exclusion  ::=  '-' iri '~'?
        let mut exclusions = Vec::new();
        while self.eat_punct("-")? {
            let iri = self.parse_iri()?;
            exclusions.push(if self.eat_punct("~")? {
                Exclusion::Stem(iri)
            } else {
                Exclusion::Iri(iri)
            });
        }
        Ok(exclusions)
    }

    fn parse_cardinality(&mut self) -> Result<Option<Cardinality>, ShExCParseError> {
        // cardinality  ::=  '*' | '+' | '?' | REPEAT_RANGE
        let cardinality = match self.peek() {
            Some(ShExCToken::Punctuation("*")) => Cardinality::ZERO_OR_MORE,
            Some(ShExCToken::Punctuation("+")) => Cardinality::ONE_OR_MORE,
            Some(ShExCToken::Punctuation("?")) => Cardinality::ZERO_OR_ONE,
            Some(ShExCToken::RepeatRange(range)) => self.repeat_range(range)?,
            _ => return Ok(None),
        };
        self.bump()?;
        Ok(Some(cardinality))
    }

    fn repeat_range(&self, range: &str) -> Result<Cardinality, ShExCParseError> {
        // REPEAT_RANGE  ::=  '{' INTEGER (',' (INTEGER | '*')?)? '}'
        let bounds = range.trim_start_matches('{').trim_end_matches('}');
        let bound = |value: &str| {
            value
                .parse::<u32>()
                .map_err(|_| self.invalid("cardinality bounds must fit in 32 bits"))
        };
        Ok(match bounds.split_once(',') {
            None => {
                let min = bound(bounds)?;
                Cardinality::new(min, Some(min))
            }
            Some((min, "" | "*")) => Cardinality::new(bound(min)?, None),
            Some((min, max)) => Cardinality::new(bound(min)?, Some(bound(max)?)),
        })
    }

    fn parse_semantic_actions(&mut self) -> Result<SemanticActions, ShExCParseError> {
        // semanticActions  ::=  codeDecl*
        // codeDecl  ::=  '%' iri CODE
        let mut actions = SemanticActions::new();
        while self.eat_punct("%")? {
            let iri = self.parse_iri()?;
            let Some(ShExCToken::Code(code)) = self.peek() else {
                return Err(self.unexpected(&["a code block {...%}"]));
            };
            let code = code
                .strip_prefix('{')
                .and_then(|code| code.strip_suffix("%}"))
                .unwrap_or(code)
                .to_owned();
            self.bump()?;
            actions.insert(iri, code);
        }
        Ok(actions)
    }

    fn parse_literal(&mut self) -> Result<String, ShExCParseError> {
        // literal  ::=  rdfLiteral | numericLiteral | booleanLiteral
        // rdfLiteral  ::=  string (LANGTAG | '^^' datatype)?
        let literal = match self.peek() {
            Some(ShExCToken::String { .. }) => {
                let value = self.parse_string()?;
                return Ok(match self.peek() {
                    Some(ShExCToken::LangTag(language)) => {
                        let literal = string_literal(&value, Some(*language), None);
                        self.bump()?;
                        literal
                    }
                    Some(ShExCToken::Punctuation("^^")) => {
                        self.bump()?;
                        let datatype = self.parse_iri()?;
                        string_literal(&value, None, Some(datatype.as_str()))
                    }
                    _ => string_literal(&value, None, None),
                });
            }
            Some(ShExCToken::Integer(lexeme)) => canonicalize_literal(lexeme, xsd::INTEGER),
            Some(ShExCToken::Decimal(lexeme)) => canonicalize_literal(lexeme, xsd::DECIMAL),
            Some(ShExCToken::Double(lexeme)) => canonicalize_literal(lexeme, xsd::DOUBLE),
            Some(ShExCToken::Keyword(Keyword::True)) => boolean_literal(true).to_owned(),
            Some(ShExCToken::Keyword(Keyword::False)) => boolean_literal(false).to_owned(),
            _ => return Err(self.unexpected(&["a literal"])),
        };
        self.bump()?;
        Ok(literal)
    }

    fn parse_string(&mut self) -> Result<String, ShExCParseError> {
        let Some((ShExCToken::String { raw, quote_width }, range)) = &self.current else {
            return Err(self.unexpected(&["a string"]));
        };
        let value = match try_unescape_string(raw, *quote_width) {
            Ok(value) => value,
            Err(e) if self.strict_escapes => {
                let start = range.start + e.offset;
                return Err(MalformedEscapeError::new(
                    self.location(start..start + e.escape.len()),
                    e.escape,
                )
                .into());
            }
            Err(e) => {
                warn!(
                    escape = e.escape.as_str(),
                    literal = *raw,
                    "malformed escape sequence, the string is decoded as empty"
                );
                String::new()
            }
        };
        self.bump()?;
        Ok(value)
    }

    fn parse_integer<T: FromStr>(&mut self) -> Result<T, ShExCParseError> {
        let Some(ShExCToken::Integer(lexeme)) = self.peek() else {
            return Err(self.unexpected(&["an integer"]));
        };
        let value = lexeme
            .parse()
            .map_err(|_| self.invalid("the integer is out of range for this facet"))?;
        self.bump()?;
        Ok(value)
    }

    fn parse_shape_label(&mut self) -> Result<ShapeLabel, ShExCParseError> {
        // shapeLabel  ::=  iri | blankNode
        if let Some(ShExCToken::BlankNodeLabel(id)) = self.peek() {
            let label = BlankNode::new_unchecked(*id).into();
            self.bump()?;
            return Ok(label);
        }
        if !self.starts_iri() {
            return Err(self.unexpected(&["a shape label"]));
        }
        Ok(self.parse_iri()?.into())
    }

    fn parse_predicate(&mut self) -> Result<NamedNode, ShExCParseError> {
        // predicate  ::=  iri | 'a'
        if self.eat_keyword(Keyword::A)? {
            return Ok(rdf::TYPE.into_owned());
        }
        if !self.starts_iri() {
            return Err(self.unexpected(&["a predicate"]));
        }
        self.parse_iri()
    }

    fn parse_iri(&mut self) -> Result<NamedNode, ShExCParseError> {
        // iri  ::=  IRIREF | PNAME_LN | PNAME_NS
        let iri = match self.peek() {
            Some(ShExCToken::IriRef(iri)) => self.named_node(self.assembler.resolve(iri))?,
            Some(ShExCToken::PrefixedName { prefix, local }) => self.expand(prefix, local)?,
            _ => return Err(self.unexpected(&["an IRI"])),
        };
        self.bump()?;
        Ok(iri)
    }

    fn parse_iri_ref(&mut self) -> Result<&'a str, ShExCParseError> {
        let Some(ShExCToken::IriRef(iri)) = self.peek() else {
            return Err(self.unexpected(&["an IRI between <>"]));
        };
        let iri = *iri;
        self.bump()?;
        Ok(iri)
    }

    fn expand(&self, prefix: &str, local: &str) -> Result<NamedNode, ShExCParseError> {
        let iri = self
            .assembler
            .expand_prefixed_name(prefix, local)
            .ok_or_else(|| UnknownPrefixError::new(self.location(self.current_range()), prefix))?;
        self.named_node(iri)
    }

    /// The resolved IRI of the current token, that must be absolute.
    fn named_node(&self, iri: String) -> Result<NamedNode, ShExCParseError> {
        match Iri::parse(iri) {
            Ok(iri) => Ok(NamedNode::new_unchecked(iri.into_inner())),
            Err(e) => Err(self.invalid(&format!("the IRI is not absolute or is invalid: {e}"))),
        }
    }

    fn starts_shape_label(&self) -> bool {
        matches!(self.peek(), Some(ShExCToken::BlankNodeLabel(_))) || self.starts_iri()
    }

    fn starts_iri(&self) -> bool {
        matches!(
            self.peek(),
            Some(ShExCToken::IriRef(_) | ShExCToken::PrefixedName { .. })
        )
    }

    fn starts_predicate(&self) -> bool {
        self.is_keyword(Keyword::A) || self.starts_iri()
    }

    fn starts_shape_definition(&self) -> bool {
        matches!(
            self.peek(),
            Some(
                ShExCToken::Punctuation("&" | "{")
                    | ShExCToken::Keyword(Keyword::Extra | Keyword::Closed)
            )
        )
    }

    fn starts_group_shape_constr(&self) -> bool {
        matches!(
            self.peek(),
            Some(ShExCToken::AtPrefixedName { .. } | ShExCToken::Punctuation("@"))
        ) || self.starts_shape_definition()
    }

    fn starts_unary(&self) -> bool {
        matches!(
            self.peek(),
            Some(ShExCToken::Punctuation("$" | "&" | "(" | "^" | "!"))
        ) || self.starts_predicate()
    }

    fn starts_literal(&self) -> bool {
        matches!(
            self.peek(),
            Some(
                ShExCToken::String { .. }
                    | ShExCToken::Integer(_)
                    | ShExCToken::Decimal(_)
                    | ShExCToken::Double(_)
                    | ShExCToken::Keyword(Keyword::True | Keyword::False)
            )
        )
    }

    #[inline]
    fn peek(&self) -> Option<&ShExCToken<'a>> {
        self.current.as_ref().map(|(token, _)| token)
    }

    fn is_punct(&self, punct: &str) -> bool {
        matches!(self.peek(), Some(ShExCToken::Punctuation(p)) if *p == punct)
    }

    fn is_keyword(&self, keyword: Keyword) -> bool {
        matches!(self.peek(), Some(ShExCToken::Keyword(k)) if *k == keyword)
    }

    fn enter(&mut self) -> Result<(), ShExCParseError> {
        if self.depth >= MAX_NESTING_DEPTH {
            return Err(self.invalid(&format!(
                "the maximum nesting depth of {MAX_NESTING_DEPTH} is exceeded"
            )));
        }
        self.depth += 1;
        Ok(())
    }

    /// Moves to the next token.
    fn bump(&mut self) -> Result<(), ShExCParseError> {
        self.current = self.tokens.next().transpose()?;
        Ok(())
    }

    fn eat_punct(&mut self, punct: &str) -> Result<bool, ShExCParseError> {
        if !self.is_punct(punct) {
            return Ok(false);
        }
        self.bump()?;
        Ok(true)
    }

    fn eat_keyword(&mut self, keyword: Keyword) -> Result<bool, ShExCParseError> {
        if !self.is_keyword(keyword) {
            return Ok(false);
        }
        self.bump()?;
        Ok(true)
    }

    fn expect_punct(&mut self, punct: &'static str) -> Result<(), ShExCParseError> {
        if self.eat_punct(punct)? {
            Ok(())
        } else {
            Err(self.unexpected(&[punct]))
        }
    }

    fn current_range(&self) -> Range<usize> {
        self.current
            .as_ref()
            .map_or(self.input.len()..self.input.len(), |(_, range)| range.clone())
    }

    fn location(&self, range: Range<usize>) -> Range<TextPosition> {
        TextPosition::range_from_offsets(self.input.as_bytes(), range)
    }

    fn found(&self) -> String {
        if self.current.is_some() {
            self.input[self.current_range()].to_owned()
        } else {
            "end of file".into()
        }
    }

    fn unexpected(&self, expected: &[&'static str]) -> ShExCParseError {
        SyntaxError::unexpected(self.location(self.current_range()), self.found(), expected).into()
    }

    fn invalid(&self, message: &str) -> ShExCParseError {
        SyntaxError::invalid(self.location(self.current_range()), self.found(), message).into()
    }
}

/// A single expression stands for itself, several are combined with `build`.
fn collapse(
    mut expressions: Vec<TripleExpr>,
    build: impl FnOnce(Vec<TripleExpr>) -> TripleExpr,
) -> TripleExpr {
    if expressions.len() == 1 {
        if let Some(expression) = expressions.pop() {
            return expression;
        }
    }
    build(expressions)
}

/// Attaches the cardinality and semantic actions written after a parenthesized expression.
///
/// They are folded into a group that has no conflicting ones, otherwise a single child group is created.
fn merge_parenthesized(
    inner: TripleExpr,
    cardinality: Option<Cardinality>,
    semantic_actions: SemanticActions,
) -> TripleExpr {
    if cardinality.is_none() && semantic_actions.is_empty() {
        return inner;
    }
    match inner {
        TripleExpr::Group(mut group)
            if (cardinality.is_none() || group.cardinality.is_none())
                && (semantic_actions.is_empty() || group.semantic_actions.is_empty()) =>
        {
            if cardinality.is_some() {
                group.cardinality = cardinality;
            }
            group.semantic_actions.extend(semantic_actions);
            TripleExpr::Group(group)
        }
        inner => TripleExpr::Group(Group {
            id: None,
            expressions: vec![inner],
            cardinality,
            semantic_actions,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triple_constraint(predicate: &str) -> TripleExpr {
        TripleConstraint {
            id: None,
            predicate: NamedNode::new_unchecked(predicate),
            value: ValueClass::Any,
            cardinality: Cardinality::default(),
            inverse: false,
            negated: false,
            annotations: Vec::new(),
            semantic_actions: SemanticActions::new(),
        }
        .into()
    }

    #[test]
    fn transparent_parentheses() {
        let inner = triple_constraint("http://example.com/p");
        assert_eq!(
            merge_parenthesized(inner.clone(), None, SemanticActions::new()),
            inner
        );
    }

    #[test]
    fn cardinality_is_folded_into_group() {
        let group = TripleExpr::Group(Group {
            expressions: vec![
                triple_constraint("http://example.com/p"),
                triple_constraint("http://example.com/q"),
            ],
            ..Group::default()
        });
        let TripleExpr::Group(merged) =
            merge_parenthesized(group, Some(Cardinality::ONE_OR_MORE), SemanticActions::new())
        else {
            panic!("a group is expected")
        };
        assert_eq!(merged.expressions.len(), 2);
        assert_eq!(merged.cardinality, Some(Cardinality::ONE_OR_MORE));
    }

    #[test]
    fn conflicting_cardinality_creates_a_wrapper() {
        let group = TripleExpr::Group(Group {
            expressions: vec![
                triple_constraint("http://example.com/p"),
                triple_constraint("http://example.com/q"),
            ],
            cardinality: Some(Cardinality::new(2, Some(2))),
            ..Group::default()
        });
        let TripleExpr::Group(merged) = merge_parenthesized(
            group.clone(),
            Some(Cardinality::new(3, Some(3))),
            SemanticActions::new(),
        ) else {
            panic!("a group is expected")
        };
        assert_eq!(merged.expressions, [group]);
        assert_eq!(merged.cardinality, Some(Cardinality::new(3, Some(3))));
    }

    #[test]
    fn collapse_keeps_a_single_expression() {
        let expression = triple_constraint("http://example.com/p");
        assert_eq!(
            collapse(vec![expression.clone()], |_| panic!("nothing to combine")),
            expression
        );
    }
}
