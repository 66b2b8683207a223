//! ShExC schema document types.
//!
//! This module defines the tree built by the parser:
//! - [`Schema`] - The root document: prefixes, start shape and shapes
//! - [`Shape`] - A shape with its triple expression and closure flags
//! - [`TripleExpr`] - Alternatives, groups, triple constraints and inclusions
//! - [`ValueClass`] - The constraint on the object of a triple
//! - [`Cardinality`] - Min/max occurrences

use oxrdf::{BlankNode, NamedNode};
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Semantic actions: extension IRI to the verbatim code between `{` and `%}`.
pub type SemanticActions = BTreeMap<NamedNode, String>;

/// Identifier of a shape or of a triple expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ShapeLabel {
    /// Named shape (IRI).
    Iri(NamedNode),
    /// Anonymous shape (blank node).
    BNode(BlankNode),
}

impl ShapeLabel {
    /// Returns the shape label as a named node if it is one.
    pub fn as_iri(&self) -> Option<&NamedNode> {
        match self {
            Self::Iri(n) => Some(n),
            Self::BNode(_) => None,
        }
    }

    /// Returns the shape label as a blank node if it is one.
    pub fn as_bnode(&self) -> Option<&BlankNode> {
        match self {
            Self::Iri(_) => None,
            Self::BNode(b) => Some(b),
        }
    }
}

impl From<NamedNode> for ShapeLabel {
    fn from(n: NamedNode) -> Self {
        Self::Iri(n)
    }
}

impl From<BlankNode> for ShapeLabel {
    fn from(b: BlankNode) -> Self {
        Self::BNode(b)
    }
}

impl fmt::Display for ShapeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Iri(n) => write!(f, "<{}>", n.as_str()),
            Self::BNode(b) => write!(f, "_:{}", b.as_str()),
        }
    }
}

/// A parsed schema.
///
/// Shape references are only resolved syntactically: a referenced label is not required to be declared.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    prefixes: HashMap<String, String>,
    start: Option<ShapeLabel>,
    start_actions: Option<SemanticActions>,
    shapes: FxHashMap<ShapeLabel, Shape>,
    labels: Vec<ShapeLabel>,
}

impl Schema {
    pub(crate) fn new(
        prefixes: HashMap<String, String>,
        start: Option<ShapeLabel>,
        start_actions: Option<SemanticActions>,
        shapes: FxHashMap<ShapeLabel, Shape>,
        labels: Vec<ShapeLabel>,
    ) -> Self {
        Self {
            prefixes,
            start,
            start_actions,
            shapes,
            labels,
        }
    }

    /// The prefix table: prefix name (without `:`) to absolute IRI.
    #[inline]
    pub fn prefixes(&self) -> &HashMap<String, String> {
        &self.prefixes
    }

    /// The IRI bound to a prefix name.
    #[inline]
    pub fn prefix(&self, name: &str) -> Option<&str> {
        self.prefixes.get(name).map(String::as_str)
    }

    /// The start shape. An inline `start` definition gets a blank node label.
    #[inline]
    pub fn start(&self) -> Option<&ShapeLabel> {
        self.start.as_ref()
    }

    #[inline]
    pub fn start_actions(&self) -> Option<&SemanticActions> {
        self.start_actions.as_ref()
    }

    /// Gets a shape by label.
    #[inline]
    pub fn shape(&self, label: &ShapeLabel) -> Option<&Shape> {
        self.shapes.get(label)
    }

    /// The shapes in declaration order.
    pub fn shapes(&self) -> impl Iterator<Item = (&ShapeLabel, &Shape)> {
        self.labels
            .iter()
            .filter_map(|label| Some((label, self.shapes.get(label)?)))
    }

    /// The shape labels in declaration order.
    #[inline]
    pub fn labels(&self) -> &[ShapeLabel] {
        &self.labels
    }

    /// Number of shapes.
    #[inline]
    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }

    /// Every label referenced from the start declaration and the shapes, without duplicates.
    ///
    /// Some of them might not be declared in this schema.
    pub fn references(&self) -> Vec<&ShapeLabel> {
        let mut references = Vec::new();
        if let Some(start) = &self.start {
            references.push(start);
        }
        for (_, shape) in self.shapes() {
            shape.collect_references(&mut references);
        }
        let mut seen = FxHashSet::default();
        references.retain(|label| seen.insert(*label));
        references
    }
}

/// A shape: an optional triple expression and its closure settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Shape {
    /// The constraints on the neighbourhood of the node, none if the shape body is empty.
    pub expression: Option<TripleExpr>,
    /// Shapes whose constraints are merged in (`& label`).
    pub inherit: Vec<ShapeLabel>,
    /// Predicates excluded from closed-shape checking (`EXTRA`).
    pub extra: Vec<NamedNode>,
    /// `CLOSED`
    pub closed: bool,
    /// `VIRTUAL`: an abstract shape used as a template.
    pub is_virtual: bool,
    pub semantic_actions: SemanticActions,
}

impl Shape {
    fn collect_references<'a>(&'a self, references: &mut Vec<&'a ShapeLabel>) {
        references.extend(&self.inherit);
        if let Some(expression) = &self.expression {
            expression.collect_references(references);
        }
    }
}

/// A triple expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TripleExpr {
    /// `a | b`
    OneOf(OneOf),
    /// `a || b`
    SomeOf(SomeOf),
    /// `a , b`, or a parenthesized expression with its own cardinality or semantic actions.
    Group(Group),
    TripleConstraint(TripleConstraint),
    /// `& label`
    Include(Include),
}

impl TripleExpr {
    /// The `$label` bound to this expression.
    pub fn id(&self) -> Option<&ShapeLabel> {
        match self {
            Self::OneOf(e) => e.id.as_ref(),
            Self::SomeOf(e) => e.id.as_ref(),
            Self::Group(e) => e.id.as_ref(),
            Self::TripleConstraint(e) => e.id.as_ref(),
            Self::Include(e) => e.id.as_ref(),
        }
    }

    pub(crate) fn set_id(&mut self, id: ShapeLabel) {
        let slot = match self {
            Self::OneOf(e) => &mut e.id,
            Self::SomeOf(e) => &mut e.id,
            Self::Group(e) => &mut e.id,
            Self::TripleConstraint(e) => &mut e.id,
            Self::Include(e) => &mut e.id,
        };
        *slot = Some(id);
    }

    fn collect_references<'a>(&'a self, references: &mut Vec<&'a ShapeLabel>) {
        match self {
            Self::OneOf(OneOf { expressions, .. })
            | Self::SomeOf(SomeOf { expressions, .. })
            | Self::Group(Group { expressions, .. }) => {
                for expression in expressions {
                    expression.collect_references(references);
                }
            }
            Self::TripleConstraint(tc) => match &tc.value {
                ValueClass::NodeKind {
                    reference: Some(reference),
                    ..
                }
                | ValueClass::Reference(reference) => references.extend(reference.labels()),
                ValueClass::NodeKind { .. }
                | ValueClass::Values(_)
                | ValueClass::Any
                | ValueClass::Datatype(_) => (),
            },
            Self::Include(include) => references.push(&include.target),
        }
    }
}

impl From<TripleConstraint> for TripleExpr {
    fn from(tc: TripleConstraint) -> Self {
        Self::TripleConstraint(tc)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OneOf {
    pub id: Option<ShapeLabel>,
    /// At least two alternatives.
    pub expressions: Vec<TripleExpr>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SomeOf {
    pub id: Option<ShapeLabel>,
    /// At least two alternatives.
    pub expressions: Vec<TripleExpr>,
}

/// A sequence of triple expressions.
///
/// It has a single child only when it carries a cardinality or semantic actions of its own.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Group {
    pub id: Option<ShapeLabel>,
    pub expressions: Vec<TripleExpr>,
    pub cardinality: Option<Cardinality>,
    pub semantic_actions: SemanticActions,
}

/// A constraint on the triples with a given predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TripleConstraint {
    pub id: Option<ShapeLabel>,
    pub predicate: NamedNode,
    /// Constraint on the object (or the subject if `inverse`).
    pub value: ValueClass,
    /// `{0,1}` if not written.
    pub cardinality: Cardinality,
    /// `^`: the constraint is on the incoming triples.
    pub inverse: bool,
    /// `!`
    pub negated: bool,
    pub annotations: Vec<Annotation>,
    pub semantic_actions: SemanticActions,
}

/// `& label`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Include {
    pub id: Option<ShapeLabel>,
    pub target: ShapeLabel,
}

/// Constraint on the value of a triple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueClass {
    /// `LITERAL`, `IRI`, `NONLITERAL` or `BNODE` with its facets and an optional shape reference.
    NodeKind {
        kind: NodeKind,
        facets: Facets,
        reference: Option<ShapeRef>,
    },
    /// A bare shape reference.
    Reference(ShapeRef),
    /// `( value* )`
    Values(Vec<ValueSetItem>),
    /// `.`: any node.
    Any,
    /// A literal of the given datatype.
    Datatype(NamedNode),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Literal,
    Iri,
    NonLiteral,
    BNode,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Literal => "LITERAL",
            Self::Iri => "IRI",
            Self::NonLiteral => "NONLITERAL",
            Self::BNode => "BNODE",
        })
    }
}

/// A reference to one shape, or to any of several shapes (`@a OR @b`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShapeRef {
    Label(ShapeLabel),
    Or(Vec<ShapeLabel>),
}

impl ShapeRef {
    /// The referenced labels.
    pub fn labels(&self) -> &[ShapeLabel] {
        match self {
            Self::Label(label) => std::slice::from_ref(label),
            Self::Or(labels) => labels,
        }
    }
}

/// An item of a value set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueSetItem {
    Iri(NamedNode),
    /// The canonical text of a literal: `"v"`, `"v"@lang` or `"v"^^datatype`.
    ///
    /// The value is not escaped and may contain `"`: it ends at the last `"` of the text.
    Literal(String),
    /// All IRIs starting with `stem` (any IRI for a wildcard) except the exclusions.
    StemRange {
        stem: Stem,
        exclusions: Vec<Exclusion>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stem {
    Iri(NamedNode),
    /// `.`
    Wildcard,
}

/// An exclusion of a stem range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exclusion {
    /// `- iri`
    Iri(NamedNode),
    /// `- iri~`
    Stem(NamedNode),
}

/// Facets of a node kind constraint.
///
/// Setting a facet twice keeps the last value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Facets {
    pub pattern: Option<String>,
    pub length: Option<u32>,
    pub min_length: Option<u32>,
    pub max_length: Option<u32>,
    pub min_inclusive: Option<i64>,
    pub min_exclusive: Option<i64>,
    pub max_inclusive: Option<i64>,
    pub max_exclusive: Option<i64>,
    pub total_digits: Option<u32>,
    pub fraction_digits: Option<u32>,
}

impl Facets {
    pub fn set(&mut self, facet: Facet) {
        match facet {
            Facet::Pattern(v) => self.pattern = Some(v),
            Facet::Length(v) => self.length = Some(v),
            Facet::MinLength(v) => self.min_length = Some(v),
            Facet::MaxLength(v) => self.max_length = Some(v),
            Facet::MinInclusive(v) => self.min_inclusive = Some(v),
            Facet::MinExclusive(v) => self.min_exclusive = Some(v),
            Facet::MaxInclusive(v) => self.max_inclusive = Some(v),
            Facet::MaxExclusive(v) => self.max_exclusive = Some(v),
            Facet::TotalDigits(v) => self.total_digits = Some(v),
            Facet::FractionDigits(v) => self.fraction_digits = Some(v),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// A single facet declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Facet {
    /// `PATTERN "regex"`
    Pattern(String),
    Length(u32),
    MinLength(u32),
    MaxLength(u32),
    MinInclusive(i64),
    MinExclusive(i64),
    MaxInclusive(i64),
    MaxExclusive(i64),
    TotalDigits(u32),
    FractionDigits(u32),
}

/// Cardinality constraint: min and max occurrences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cardinality {
    pub min: u32,
    /// `None` if unbounded.
    pub max: Option<u32>,
}

impl Cardinality {
    /// `?`, also the cardinality of a triple constraint without one.
    pub const ZERO_OR_ONE: Self = Self {
        min: 0,
        max: Some(1),
    };
    /// `*`
    pub const ZERO_OR_MORE: Self = Self { min: 0, max: None };
    /// `+`
    pub const ONE_OR_MORE: Self = Self { min: 1, max: None };

    #[inline]
    pub const fn new(min: u32, max: Option<u32>) -> Self {
        Self { min, max }
    }
}

impl Default for Cardinality {
    fn default() -> Self {
        Self::ZERO_OR_ONE
    }
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.min, self.max) {
            (0, None) => f.write_str("*"),
            (1, None) => f.write_str("+"),
            (0, Some(1)) => f.write_str("?"),
            (min, None) => write!(f, "{{{min},}}"),
            (min, Some(max)) if min == max => write!(f, "{{{min}}}"),
            (min, Some(max)) => write!(f, "{{{min},{max}}}"),
        }
    }
}

/// `; predicate object` on a triple constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Annotation {
    pub predicate: NamedNode,
    pub object: ObjectValue,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectValue {
    Iri(NamedNode),
    /// Canonical literal text, see [`ValueSetItem::Literal`].
    Literal(String),
}
