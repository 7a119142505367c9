//! `XPath` queries through handles, and the iteration adapter.
//!
//! Query results are snapshots: the matching nodes are collected under the
//! read lock, the lock is released, and only then are callbacks run. A
//! visitor may therefore mutate the tree; results it invalidates are
//! skipped rather than visited.

use std::sync::{Arc, PoisonError};

use tracing::{debug, trace};

use super::{Element, NodeType, XmlDocument};
use crate::error::Result;
use crate::parser::input::is_ncname;
use crate::tree::Document;
use crate::xpath::{self, CompiledQuery, NamespaceBindings, XPathContext, XPathNode, XPathValue};

impl XmlDocument {
    /// Compiles an expression, reusing a cached compilation when the same
    /// text was compiled with the same bindings before.
    ///
    /// # Errors
    ///
    /// [`Error::Query`](crate::Error::Query) for malformed expressions,
    /// [`Error::UnknownNamespace`](crate::Error::UnknownNamespace) for
    /// unbound prefixes.
    pub fn compile(
        &self,
        expression: &str,
        namespaces: &NamespaceBindings,
    ) -> Result<Arc<CompiledQuery>> {
        let key = format!("{}\u{1}{expression}", namespaces.cache_key());
        let mut cache = self
            .inner
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(query) = cache.get(&key) {
            trace!(expression, "query cache hit");
            return Ok(Arc::clone(query));
        }
        let query = Arc::new(xpath::compile(expression, namespaces)?);
        debug!(expression, "query compiled");
        cache.put(key, Arc::clone(&query));
        Ok(query)
    }
}

impl Element {
    /// Evaluates a compiled expression with this node as the context.
    ///
    /// # Errors
    ///
    /// [`Error::NodeInvalid`](crate::Error::NodeInvalid) for a stale handle,
    /// [`Error::Query`](crate::Error::Query) when evaluation fails.
    pub fn evaluate(&self, query: &CompiledQuery) -> Result<XPathValue> {
        self.read(|tree, id| Ok(XPathContext::new(tree, id).evaluate(query)?))
    }

    /// Nodes selected by `path` relative to this node, in document order.
    ///
    /// Attribute nodes and the document node are left out; use
    /// [`query_strings`](Self::query_strings) for attribute values.
    ///
    /// # Errors
    ///
    /// [`Error::NodeInvalid`](crate::Error::NodeInvalid) for a stale handle,
    /// [`Error::Query`](crate::Error::Query) for a malformed or non-node-set
    /// expression, [`Error::UnknownNamespace`](crate::Error::UnknownNamespace)
    /// for an unbound prefix.
    pub fn children_with_xpath(&self, path: &str) -> Result<Vec<Element>> {
        self.select(path, &NamespaceBindings::new(), false)
    }

    /// [`children_with_xpath`](Self::children_with_xpath) with prefix
    /// bindings.
    ///
    /// # Errors
    ///
    /// As [`children_with_xpath`](Self::children_with_xpath).
    pub fn children_with_xpath_ns(
        &self,
        path: &str,
        namespaces: &NamespaceBindings,
    ) -> Result<Vec<Element>> {
        self.select(path, namespaces, false)
    }

    /// Like [`children_with_xpath`](Self::children_with_xpath) but with the
    /// document node as the context.
    ///
    /// # Errors
    ///
    /// As [`children_with_xpath`](Self::children_with_xpath).
    pub fn children_with_root_xpath(&self, path: &str) -> Result<Vec<Element>> {
        self.select(path, &NamespaceBindings::new(), true)
    }

    /// The full result of `path`, of any type.
    ///
    /// # Errors
    ///
    /// As [`children_with_xpath`](Self::children_with_xpath), except that
    /// non-node-set results are allowed.
    pub fn query_value(&self, path: &str) -> Result<XPathValue> {
        self.query_value_ns(path, &NamespaceBindings::new())
    }

    /// [`query_value`](Self::query_value) with prefix bindings.
    ///
    /// # Errors
    ///
    /// As [`query_value`](Self::query_value).
    pub fn query_value_ns(&self, path: &str, namespaces: &NamespaceBindings) -> Result<XPathValue> {
        let query = self.document().compile(path, namespaces)?;
        self.evaluate(&query)
    }

    /// String values of the result: one per node for a node-set (attributes
    /// included), otherwise the single converted value.
    ///
    /// # Errors
    ///
    /// As [`query_value`](Self::query_value).
    pub fn query_strings(&self, path: &str) -> Result<Vec<String>> {
        let query = self.document().compile(path, &NamespaceBindings::new())?;
        self.read(|tree, id| {
            let value = XPathContext::new(tree, id).evaluate(&query)?;
            Ok(match &value {
                XPathValue::NodeSet(nodes) => nodes.iter().map(|n| n.string_value(tree)).collect(),
                other => vec![other.to_string_value(tree)],
            })
        })
    }

    /// Visits every node selected by `query`, relative to this node.
    ///
    /// `query` is an `XPath` expression or a dotted child path such as
    /// `"a.b.*"`. Results are snapshotted before the first visit; results
    /// invalidated by earlier visits are skipped.
    ///
    /// # Errors
    ///
    /// As [`children_with_xpath`](Self::children_with_xpath). Errors are
    /// reported before any visit.
    pub fn iterate(&self, query: &str, visit: impl FnMut(&Element)) -> Result<()> {
        let snapshot = self.children_with_xpath(&dotted_to_xpath(query))?;
        visit_valid(snapshot, visit);
        Ok(())
    }

    /// [`iterate`](Self::iterate) with the document node as the context.
    ///
    /// # Errors
    ///
    /// As [`iterate`](Self::iterate).
    pub fn iterate_with_root_xpath(&self, query: &str, visit: impl FnMut(&Element)) -> Result<()> {
        let snapshot = self.children_with_root_xpath(query)?;
        visit_valid(snapshot, visit);
        Ok(())
    }

    /// For each tag in turn, visits the matching element children.
    ///
    /// Each tag's matches are snapshotted just before they are visited, so
    /// children added by earlier visits are seen by later tags.
    ///
    /// # Errors
    ///
    /// [`Error::NodeInvalid`](crate::Error::NodeInvalid) if this handle
    /// becomes stale before a tag is processed.
    pub fn iterate_elements(&self, tags: &[&str], mut visit: impl FnMut(&Element)) -> Result<()> {
        for tag in tags {
            let snapshot = self.children(Some(*tag), None)?;
            visit_valid(snapshot, &mut visit);
        }
        Ok(())
    }

    /// A lazy iterator over a snapshot of `query`'s results that yields
    /// only handles that are still valid when reached.
    ///
    /// # Errors
    ///
    /// As [`iterate`](Self::iterate).
    pub fn query_iter(&self, query: &str) -> Result<QueryIter> {
        Ok(QueryIter::new(
            self.children_with_xpath(&dotted_to_xpath(query))?,
        ))
    }

    fn select(
        &self,
        path: &str,
        namespaces: &NamespaceBindings,
        from_root: bool,
    ) -> Result<Vec<Element>> {
        let query = self.document().compile(path, namespaces)?;
        self.read(|tree, id| {
            let context = if from_root { tree.root() } else { id };
            let value = XPathContext::new(tree, context).evaluate(&query)?;
            let nodes = match value {
                XPathValue::NodeSet(nodes) => nodes,
                other => {
                    return Err(xpath::XPathError::TypeError {
                        expected: "node-set",
                        found: other.type_name(),
                    }
                    .into())
                }
            };
            Ok(handles(tree, &nodes)
                .into_iter()
                .map(|n| self.handle(n))
                .collect())
        })
    }
}

/// Tree nodes of a node-set that a handle can represent.
fn handles(tree: &Document, nodes: &[XPathNode]) -> Vec<crate::tree::NodeId> {
    nodes
        .iter()
        .filter_map(|n| n.as_tree())
        .filter(|&id| NodeType::of(&tree.node(id).kind).is_some())
        .collect()
}

fn visit_valid(snapshot: Vec<Element>, mut visit: impl FnMut(&Element)) {
    for element in snapshot {
        if element.is_valid() {
            visit(&element);
        } else {
            trace!(node = element.node_id().into_raw(), "skipping invalidated result");
        }
    }
}

/// Rewrites a dotted child path (`"a.b.*"`) as an `XPath` location path.
/// Anything that is not purely dot-separated names and `*` is returned as
/// is.
fn dotted_to_xpath(query: &str) -> String {
    if !query.contains('.') {
        return query.to_owned();
    }
    let segments: Vec<&str> = query.split('.').collect();
    if segments.iter().all(|s| *s == "*" || is_ncname(s)) {
        segments.join("/")
    } else {
        query.to_owned()
    }
}

/// Iterator over a query snapshot.
///
/// Handles invalidated after the snapshot was taken are skipped when
/// reached. [`rewind`](Self::rewind) restarts from the first result.
#[derive(Debug, Clone)]
pub struct QueryIter {
    snapshot: Vec<Element>,
    position: usize,
}

impl QueryIter {
    fn new(snapshot: Vec<Element>) -> Self {
        Self {
            snapshot,
            position: 0,
        }
    }

    /// Restarts iteration over the same snapshot.
    pub fn rewind(&mut self) {
        self.position = 0;
    }

    /// Number of results in the snapshot, valid or not.
    #[must_use]
    pub fn snapshot_len(&self) -> usize {
        self.snapshot.len()
    }
}

impl Iterator for QueryIter {
    type Item = Element;

    fn next(&mut self) -> Option<Element> {
        while let Some(element) = self.snapshot.get(self.position) {
            self.position += 1;
            if element.is_valid() {
                return Some(element.clone());
            }
            trace!(node = element.node_id().into_raw(), "skipping invalidated result");
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.snapshot.len().saturating_sub(self.position)))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::element::Mode;
    use crate::error::Error;
    use crate::xpath::XPathError;
    use pretty_assertions::assert_eq;

    fn doc(text: &str) -> XmlDocument {
        XmlDocument::parse_str(text, Mode::Xml).unwrap()
    }

    fn ids(elements: &[Element]) -> Vec<String> {
        elements
            .iter()
            .map(|e| e.attribute("id", None).unwrap().unwrap_or_default())
            .collect()
    }

    #[test]
    fn test_dotted_to_xpath() {
        assert_eq!(dotted_to_xpath("a.b.*"), "a/b/*");
        assert_eq!(dotted_to_xpath("a"), "a");
        assert_eq!(dotted_to_xpath("."), ".");
        assert_eq!(dotted_to_xpath("//a[. = 'x.y']"), "//a[. = 'x.y']");
        assert_eq!(dotted_to_xpath("../b"), "../b");
    }

    #[test]
    fn test_compile_is_cached() {
        let d = doc("<a/>");
        let ns = NamespaceBindings::new();
        let first = d.compile("//b", &ns).unwrap();
        let second = d.compile("//b", &ns).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        let other = d.compile("//b", &ns.clone().with("p", "urn:p")).unwrap();
        assert!(!Arc::ptr_eq(&first, &other));
    }

    #[test]
    fn test_cache_evicts_least_recent() {
        let options = crate::element::LoadOptions::new(Mode::Xml).cache_capacity(1);
        let d = XmlDocument::parse_with_options(b"<a/>", &options).unwrap();
        let ns = NamespaceBindings::new();
        let first = d.compile("b", &ns).unwrap();
        d.compile("c", &ns).unwrap();
        assert!(!Arc::ptr_eq(&first, &d.compile("b", &ns).unwrap()));
    }

    #[test]
    fn test_children_with_xpath() {
        let d = doc(r#"<a><b id="1"><c id="3"/></b><b id="2"/></a>"#);
        let root = d.root().unwrap();
        assert_eq!(ids(&root.children_with_xpath("b").unwrap()), ["1", "2"]);
        assert_eq!(ids(&root.children_with_xpath("//*[@id > 1]").unwrap()), ["3", "2"]);
        let c = root.child("b.c").unwrap().unwrap();
        assert_eq!(ids(&c.children_with_xpath("..").unwrap()), ["1"]);
        assert_eq!(ids(&c.children_with_root_xpath("a/b").unwrap()), ["1", "2"]);
        assert!(root.children_with_xpath("nothing").unwrap().is_empty());
    }

    #[test]
    fn test_attributes_and_document_node_are_omitted() {
        let d = doc(r#"<a k="v"><b/></a>"#);
        let root = d.root().unwrap();
        assert!(root.children_with_xpath("@k").unwrap().is_empty());
        assert!(root.children_with_xpath("/").unwrap().is_empty());
        assert_eq!(root.children_with_xpath("@k | b").unwrap().len(), 1);
        assert_eq!(root.query_strings("@k").unwrap(), ["v"]);
    }

    #[test]
    fn test_query_errors() {
        let d = doc("<a/>");
        let root = d.root().unwrap();
        assert!(matches!(
            root.children_with_xpath("a[").unwrap_err(),
            Error::Query(XPathError::Syntax { .. })
        ));
        assert!(matches!(
            root.children_with_xpath("p:b").unwrap_err(),
            Error::UnknownNamespace(p) if p == "p"
        ));
        assert!(matches!(
            root.children_with_xpath("count(*)").unwrap_err(),
            Error::Query(XPathError::TypeError { .. })
        ));
        root.remove().unwrap();
        assert!(matches!(root.children_with_xpath("*").unwrap_err(), Error::NodeInvalid));
    }

    #[test]
    fn test_namespaced_queries() {
        let d = doc(r#"<r xmlns="urn:d"><item id="1"/></r>"#);
        let root = d.root().unwrap();
        assert!(root.children_with_xpath("item").unwrap().is_empty());
        let ns = NamespaceBindings::new().with("d", "urn:d");
        assert_eq!(ids(&root.children_with_xpath_ns("d:item", &ns).unwrap()), ["1"]);
        assert_eq!(
            root.query_value_ns("count(d:item)", &ns).unwrap(),
            XPathValue::Number(1.0)
        );
    }

    #[test]
    fn test_query_value_and_strings() {
        let d = doc("<a><n>2</n><n>3</n></a>");
        let root = d.root().unwrap();
        assert_eq!(root.query_value("sum(n)").unwrap(), XPathValue::Number(5.0));
        assert_eq!(root.query_strings("n").unwrap(), ["2", "3"]);
        assert_eq!(root.query_strings("count(n) > 1").unwrap(), ["true"]);
    }

    #[test]
    fn test_evaluate_compiled() {
        let d = doc("<a><b/><b/></a>");
        let query = d.compile("count(b)", &NamespaceBindings::new()).unwrap();
        assert_eq!(d.root().unwrap().evaluate(&query).unwrap(), XPathValue::Number(2.0));
    }

    #[test]
    fn test_iterate_skips_removed_results() {
        let d = doc(r#"<a><b id="1"><b id="2"/></b><b id="3"/></a>"#);
        let root = d.root().unwrap();
        let mut visited = Vec::new();
        root.iterate("//b", |b| {
            visited.push(b.attribute("id", None).unwrap().unwrap());
            if visited.len() == 1 {
                b.remove().unwrap();
            }
        })
        .unwrap();
        assert_eq!(visited, ["1", "3"]);
    }

    #[test]
    fn test_iterate_dotted_path() {
        let d = doc(r#"<a><b><c id="1"/><d id="2"/></b><b><c id="3"/></b></a>"#);
        let root = d.root().unwrap();
        let mut visited = Vec::new();
        root.iterate("b.*", |e| visited.push(e.attribute("id", None).unwrap().unwrap()))
            .unwrap();
        assert_eq!(visited, ["1", "2", "3"]);
    }

    #[test]
    fn test_iterate_visitor_may_add_nodes() {
        let d = doc("<a><b/><b/></a>");
        let root = d.root().unwrap();
        let mut count = 0;
        root.iterate("b", |b| {
            count += 1;
            b.add_child_element("c").unwrap();
            b.parent().unwrap().unwrap().add_child_element("b").unwrap();
        })
        .unwrap();
        assert_eq!(count, 2);
        assert_eq!(root.children(Some("b"), None).unwrap().len(), 4);
    }

    #[test]
    fn test_iterate_with_root_xpath() {
        let d = doc(r#"<a><b id="1"/><b id="2"/></a>"#);
        let b = d.root().unwrap().child("b").unwrap().unwrap();
        let mut visited = Vec::new();
        b.iterate_with_root_xpath("/a/b", |e| {
            visited.push(e.attribute("id", None).unwrap().unwrap());
        })
        .unwrap();
        assert_eq!(visited, ["1", "2"]);
    }

    #[test]
    fn test_iterate_elements() {
        let d = doc(r#"<a><x id="1"/><y id="2"/><x id="3"/></a>"#);
        let root = d.root().unwrap();
        let mut visited = Vec::new();
        root.iterate_elements(&["y", "x"], |e| {
            visited.push(e.attribute("id", None).unwrap().unwrap());
        })
        .unwrap();
        assert_eq!(visited, ["2", "1", "3"]);
    }

    #[test]
    fn test_query_iter() {
        let d = doc(r#"<a><b id="1"/><b id="2"/><b id="3"/></a>"#);
        let root = d.root().unwrap();
        let mut iter = root.query_iter("b").unwrap();
        assert_eq!(iter.snapshot_len(), 3);
        let first = iter.next().unwrap();
        root.child("b").unwrap().unwrap().next_sibling().unwrap().unwrap().remove().unwrap();
        assert_eq!(ids(&iter.by_ref().collect::<Vec<_>>()), ["3"]);
        iter.rewind();
        assert_eq!(iter.next(), Some(first));
        assert_eq!(iter.count(), 1);
    }
}
