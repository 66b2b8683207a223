use crate::decoder::{BaseIri, unescape_iri};
use crate::model::{Schema, SemanticActions, Shape, ShapeLabel};
use oxrdf::BlankNode;
use rustc_hash::FxHashMap;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use tracing::{debug, trace};

/// The working state of a parse: prefix table, base IRI, blank node counter and the shapes built so far.
///
/// [`ShExCParser::parse`](crate::ShExCParser::parse) uses a fresh assembler for each call.
/// [`ShExCParser::parse_into`](crate::ShExCParser::parse_into) accumulates several documents into the same one:
///
/// ```
/// use oxshexc::{SchemaAssembler, ShExCParser};
///
/// let parser = ShExCParser::new();
/// let mut assembler = SchemaAssembler::new();
/// parser.parse_into("PREFIX ex: <http://example.com/> ex:A { ex:p . }", &mut assembler)?;
/// parser.parse_into("ex:B { ex:q @ex:A }", &mut assembler)?;
/// let schema = assembler.finish();
/// assert_eq!(schema.len(), 2);
/// # Result::<_, oxshexc::ShExCParseError>::Ok(())
/// ```
///
/// Two parses must not share an assembler unless they are meant to build a single schema.
#[derive(Debug, Default)]
pub struct SchemaAssembler {
    prefixes: HashMap<String, String>,
    base: BaseIri,
    blank_node_counter: u64,
    shapes: FxHashMap<ShapeLabel, Shape>,
    labels: Vec<ShapeLabel>,
    start: Option<ShapeLabel>,
    start_actions: Option<SemanticActions>,
}

impl SchemaAssembler {
    /// Empty state: no prefix, an empty base IRI and the blank node counter at 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a prefix name (without `:`) to an IRI reference, resolved against the current base.
    ///
    /// A redeclared prefix is overwritten.
    pub fn declare_prefix(&mut self, name: impl Into<String>, iri: &str) {
        let iri = self.resolve(iri);
        self.bind_prefix(name, iri);
    }

    /// Binds a prefix name to an IRI that is used as is.
    pub(crate) fn bind_prefix(&mut self, name: impl Into<String>, iri: String) {
        match self.prefixes.entry(name.into()) {
            Entry::Occupied(mut e) => {
                debug!(
                    prefix = e.key().as_str(),
                    previous = e.get().as_str(),
                    iri = iri.as_str(),
                    "prefix redeclared"
                );
                e.insert(iri);
            }
            Entry::Vacant(e) => {
                e.insert(iri);
            }
        }
    }

    /// Sets the base IRI, resolved against the current one.
    pub fn declare_base(&mut self, iri: &str) {
        self.base = BaseIri::new(self.resolve(iri));
    }

    /// Sets the base IRI to an already absolute IRI.
    pub(crate) fn bind_base(&mut self, iri: String) {
        self.base = BaseIri::new(iri);
    }

    /// Resolves an IRI reference, with or without its angle brackets, against the current base.
    ///
    /// Its `\u` and `\U` escapes are decoded first.
    pub fn resolve(&self, iri: &str) -> String {
        self.base.resolve(&unescape_iri(iri))
    }

    #[inline]
    pub fn base(&self) -> &BaseIri {
        &self.base
    }

    #[inline]
    pub fn prefixes(&self) -> &HashMap<String, String> {
        &self.prefixes
    }

    /// Concatenates the IRI bound to `prefix` and `local`, `None` if the prefix is not declared.
    ///
    /// The result is not validated: a prefix bound to a relative IRI expands to a relative IRI.
    pub fn expand_prefixed_name(&self, prefix: &str, local: &str) -> Option<String> {
        let namespace = self.prefixes.get(prefix)?;
        Some(format!("{namespace}{local}"))
    }

    /// Allocates the next `_:bN` label.
    ///
    /// Counter values whose label is already used by a registered shape are skipped.
    pub fn new_blank_label(&mut self) -> ShapeLabel {
        loop {
            let label: ShapeLabel =
                BlankNode::new_unchecked(format!("b{}", self.blank_node_counter)).into();
            self.blank_node_counter += 1;
            if self.shapes.contains_key(&label) {
                trace!(%label, "blank node label already used");
                continue;
            }
            trace!(%label, "blank node label allocated");
            return label;
        }
    }

    /// Sets the blank node counter back to 0.
    pub fn reset_blank_nodes(&mut self) {
        self.blank_node_counter = 0;
    }

    /// Adds a shape. If the label is already used, the new shape replaces the previous one.
    pub fn register_shape(&mut self, label: ShapeLabel, shape: Shape) {
        trace!(%label, "shape registered");
        match self.shapes.entry(label) {
            Entry::Occupied(mut e) => {
                debug!(label = %e.key(), "shape redeclared, the last declaration is kept");
                e.insert(shape);
            }
            Entry::Vacant(e) => {
                self.labels.push(e.key().clone());
                e.insert(shape);
            }
        }
    }

    #[inline]
    pub fn set_start(&mut self, label: ShapeLabel) {
        self.start = Some(label);
    }

    #[inline]
    pub fn set_start_actions(&mut self, actions: SemanticActions) {
        self.start_actions = Some(actions);
    }

    /// Number of shapes registered so far.
    #[inline]
    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }

    /// Builds the schema and drops the rest of the working state.
    pub fn finish(self) -> Schema {
        Schema::new(
            self.prefixes,
            self.start,
            self.start_actions,
            self.shapes,
            self.labels,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxrdf::NamedNode;

    #[test]
    fn blank_labels_are_sequential() {
        let mut assembler = SchemaAssembler::new();
        assert_eq!(assembler.new_blank_label().to_string(), "_:b0");
        assert_eq!(assembler.new_blank_label().to_string(), "_:b1");
        assembler.reset_blank_nodes();
        assert_eq!(assembler.new_blank_label().to_string(), "_:b0");
    }

    #[test]
    fn blank_labels_skip_declared_shapes() {
        let mut assembler = SchemaAssembler::new();
        assembler.register_shape(BlankNode::new_unchecked("b0").into(), Shape::default());
        assembler.register_shape(BlankNode::new_unchecked("b2").into(), Shape::default());
        assert_eq!(assembler.new_blank_label().to_string(), "_:b1");
        assert_eq!(assembler.new_blank_label().to_string(), "_:b3");
        assembler.reset_blank_nodes();
        assert_eq!(assembler.new_blank_label().to_string(), "_:b1");
    }

    #[test]
    fn prefixes_are_resolved_and_overwritten() {
        let mut assembler = SchemaAssembler::new();
        assembler.declare_base("<http://example.com/dir/doc>");
        assembler.declare_prefix("ex", "<ns#>");
        assert_eq!(assembler.prefixes()["ex"], "http://example.com/dir/ns#");
        assembler.declare_prefix("ex", "<http://other.example/>");
        assert_eq!(
            assembler.expand_prefixed_name("ex", "a").as_deref(),
            Some("http://other.example/a")
        );
        assert_eq!(assembler.expand_prefixed_name("foo", "a"), None);
    }

    #[test]
    fn base_is_resolved_against_the_previous_one() {
        let mut assembler = SchemaAssembler::new();
        assembler.declare_base("<http://example.com/a/b>");
        assembler.declare_base("</c/d>");
        assert_eq!(assembler.base().as_str(), "http://example.com/c/d");
        assert_eq!(assembler.resolve("<e>"), "http://example.com/c/e");
    }

    #[test]
    fn last_shape_declaration_wins() {
        let mut assembler = SchemaAssembler::new();
        let a: ShapeLabel = NamedNode::new_unchecked("http://example.com/A").into();
        let b: ShapeLabel = NamedNode::new_unchecked("http://example.com/B").into();
        assembler.register_shape(a.clone(), Shape::default());
        assembler.register_shape(b.clone(), Shape::default());
        assembler.register_shape(
            a.clone(),
            Shape {
                closed: true,
                ..Shape::default()
            },
        );
        let schema = assembler.finish();
        assert_eq!(schema.labels(), [a.clone(), b]);
        assert!(schema.shape(&a).is_some_and(|s| s.closed));
    }
}
