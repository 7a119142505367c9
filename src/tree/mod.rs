//! Arena-based document tree.
//!
//! All nodes live in a contiguous `Vec<NodeData>` owned by the `Document`
//! and are referenced by `NodeId`, an arena index paired with the slot's
//! generation. Navigation
//! links (parent, first\_child, last\_child, next\_sibling, prev\_sibling)
//! are arena indices, so there are no reference cycles and no per-node
//! reference counting.
//!
//! Removing a subtree frees its slots for later allocations. Each reuse
//! bumps the slot's generation, so a stale `NodeId` is detected instead of
//! silently aliasing the newer node.

mod node;

pub use node::NodeKind;

use std::collections::HashMap;
use std::num::NonZeroU32;

use crate::error::{ParseDiagnostic, ParseError};

/// The namespace URI permanently bound to the `xml` prefix.
pub const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";

/// A typed index into the document's node arena, tagged with the
/// generation of the slot it was allocated in.
///
/// `Option<NodeId>` has the same size as `NodeId` (niche optimization).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    index: NonZeroU32,
    generation: u32,
}

impl NodeId {
    /// Creates a `NodeId` from a raw arena index.
    ///
    /// # Panics
    ///
    /// Panics if `index` is 0.
    #[allow(clippy::expect_used, clippy::cast_possible_truncation)]
    fn new(index: usize, generation: u32) -> Self {
        Self {
            index: NonZeroU32::new(index as u32).expect("NodeId index must be non-zero"),
            generation,
        }
    }

    fn as_index(self) -> usize {
        self.index.get() as usize
    }

    /// Packs the id into a `u64`: generation in the high half, index in the
    /// low half.
    #[must_use]
    pub fn into_raw(self) -> u64 {
        (u64::from(self.generation) << 32) | u64::from(self.index.get())
    }

    /// Unpacks an id made by [`into_raw`](Self::into_raw). Returns `None`
    /// when the index half is zero.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn from_raw(raw: u64) -> Option<Self> {
        NonZeroU32::new(raw as u32).map(|index| Self {
            index,
            generation: (raw >> 32) as u32,
        })
    }
}

/// Storage for a single node in the document arena.
#[derive(Debug, Clone)]
pub struct NodeData {
    /// What kind of node this is and its payload.
    pub kind: NodeKind,
    /// Parent node. The document node has no parent.
    pub parent: Option<NodeId>,
    /// First child node.
    pub first_child: Option<NodeId>,
    /// Last child node (for O(1) append).
    pub last_child: Option<NodeId>,
    /// Next sibling.
    pub next_sibling: Option<NodeId>,
    /// Previous sibling.
    pub prev_sibling: Option<NodeId>,
    /// Set once the node's subtree has been removed from the tree.
    pub removed: bool,
    /// Bumped each time the slot is reused.
    generation: u32,
}

impl NodeData {
    fn new(kind: NodeKind) -> Self {
        Self::with_generation(kind, 0)
    }

    fn with_generation(kind: NodeKind, generation: u32) -> Self {
        Self {
            kind,
            parent: None,
            first_child: None,
            last_child: None,
            next_sibling: None,
            prev_sibling: None,
            removed: false,
            generation,
        }
    }
}

/// An attribute on an element.
///
/// Namespace declarations are stored as attributes too: `xmlns="uri"` has
/// name `"xmlns"` and no prefix, `xmlns:p="uri"` has prefix `"xmlns"` and
/// name `"p"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    /// The local name (e.g., `"lang"` for `xml:lang`).
    pub name: String,
    /// The attribute value with references expanded.
    pub value: String,
    /// Namespace prefix, if any.
    pub prefix: Option<String>,
    /// Namespace URI after resolution, if any.
    pub namespace: Option<String>,
}

impl Attribute {
    /// Creates an unqualified attribute.
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            prefix: None,
            namespace: None,
        }
    }

    /// Returns `true` if this attribute is a namespace declaration.
    #[must_use]
    pub fn is_namespace_decl(&self) -> bool {
        match self.prefix.as_deref() {
            None => self.name == "xmlns",
            Some(p) => p == "xmlns",
        }
    }

    /// For a namespace declaration, returns the declared prefix
    /// (`None` for the default namespace).
    #[must_use]
    pub fn declared_prefix(&self) -> Option<Option<&str>> {
        if !self.is_namespace_decl() {
            return None;
        }
        Some(self.prefix.as_ref().map(|_| self.name.as_str()))
    }

    /// Returns the qualified name as written in markup.
    #[must_use]
    pub fn qualified_name(&self) -> String {
        match &self.prefix {
            Some(p) => format!("{p}:{}", self.name),
            None => self.name.clone(),
        }
    }
}

/// A markup document.
///
/// The `Document` owns all nodes in an arena and provides tree navigation
/// (`&Document`) and mutation (`&mut Document`).
///
/// # Examples
///
/// ```
/// use xmlquill::tree::Document;
///
/// let doc = Document::parse_str("<root/>").unwrap();
/// let root = doc.root_element().unwrap();
/// assert_eq!(doc.node_name(root), Some("root"));
/// ```
#[derive(Debug, Clone)]
pub struct Document {
    /// The node arena. Index 0 is an unused placeholder.
    nodes: Vec<NodeData>,
    /// Indices of removed slots, reused by `create_node`.
    free: Vec<u32>,
    /// The document node id (not the root element).
    root: NodeId,
    /// Version from the XML declaration (e.g., "1.0").
    pub version: Option<String>,
    /// Encoding from the XML declaration or the transcoder.
    pub encoding: Option<String>,
    /// Standalone flag from the XML declaration.
    pub standalone: Option<bool>,
    /// Diagnostics collected during parsing (warnings and recovered errors).
    pub diagnostics: Vec<ParseDiagnostic>,
}

impl Document {
    /// Creates a new empty document containing only the document node.
    #[must_use]
    pub fn new() -> Self {
        let mut nodes = Vec::with_capacity(64);
        nodes.push(NodeData::new(NodeKind::Document));
        nodes.push(NodeData::new(NodeKind::Document));
        Self {
            nodes,
            free: Vec::new(),
            root: NodeId::new(1, 0),
            version: None,
            encoding: None,
            standalone: None,
            diagnostics: Vec::new(),
        }
    }

    /// Parses a well-formed XML string.
    ///
    /// # Errors
    ///
    /// Returns `ParseError` if the input is not well-formed XML.
    pub fn parse_str(input: &str) -> Result<Self, ParseError> {
        crate::parser::parse_str(input.strip_prefix('\u{FEFF}').unwrap_or(input))
    }

    /// Parses XML from raw bytes, detecting the encoding.
    ///
    /// # Errors
    ///
    /// Returns `ParseError` if the bytes cannot be transcoded or the
    /// resulting text is not well-formed.
    pub fn parse_bytes(input: &[u8]) -> Result<Self, ParseError> {
        let decoded = crate::encoding::decode_to_utf8(input, None)
            .map_err(|e| ParseError::new(e.to_string()))?;
        let mut doc = crate::parser::parse_str(&decoded.text)?;
        doc.encoding.get_or_insert(decoded.encoding);
        Ok(doc)
    }

    /// Returns the document node id.
    #[must_use]
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Returns the single top-level element, if any.
    #[must_use]
    pub fn root_element(&self) -> Option<NodeId> {
        self.children(self.root)
            .find(|&id| self.node(id).kind.is_element())
    }

    /// Returns `true` if `id` refers to a slot of this arena that has not
    /// been reused since `id` was allocated.
    #[must_use]
    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes
            .get(id.as_index())
            .is_some_and(|slot| slot.generation == id.generation)
    }

    /// Returns the `NodeData` for the given node.
    ///
    /// # Panics
    ///
    /// Panics if `id` does not belong to this document.
    #[must_use]
    pub fn node(&self, id: NodeId) -> &NodeData {
        &self.nodes[id.as_index()]
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut NodeData {
        &mut self.nodes[id.as_index()]
    }

    /// Returns the local name of an element or the target of a PI.
    #[must_use]
    pub fn node_name(&self, id: NodeId) -> Option<&str> {
        match &self.node(id).kind {
            NodeKind::Element { name, .. }
            | NodeKind::ProcessingInstruction { target: name, .. } => Some(name),
            _ => None,
        }
    }

    /// Returns the qualified name (`prefix:local`) of an element.
    #[must_use]
    pub fn qualified_name(&self, id: NodeId) -> Option<String> {
        match &self.node(id).kind {
            NodeKind::Element {
                name,
                prefix: Some(p),
                ..
            } => Some(format!("{p}:{name}")),
            NodeKind::Element { name, .. } => Some(name.clone()),
            NodeKind::ProcessingInstruction { target, .. } => Some(target.clone()),
            _ => None,
        }
    }

    /// Returns the namespace prefix of an element, if any.
    #[must_use]
    pub fn node_prefix(&self, id: NodeId) -> Option<&str> {
        match &self.node(id).kind {
            NodeKind::Element { prefix, .. } => prefix.as_deref(),
            _ => None,
        }
    }

    /// Returns the namespace URI of an element, if any.
    #[must_use]
    pub fn node_namespace(&self, id: NodeId) -> Option<&str> {
        match &self.node(id).kind {
            NodeKind::Element { namespace, .. } => namespace.as_deref(),
            _ => None,
        }
    }

    /// Returns the content of a text, comment, CDATA, or PI node.
    #[must_use]
    pub fn node_text(&self, id: NodeId) -> Option<&str> {
        match &self.node(id).kind {
            NodeKind::Text { content }
            | NodeKind::Comment { content }
            | NodeKind::CData { content } => Some(content),
            NodeKind::ProcessingInstruction { data, .. } => data.as_deref(),
            _ => None,
        }
    }

    /// Returns the concatenated text of a node and all its descendants.
    #[must_use]
    pub fn text_content(&self, id: NodeId) -> String {
        let mut result = String::new();
        self.collect_text(id, &mut result);
        result
    }

    fn collect_text(&self, id: NodeId, buf: &mut String) {
        match &self.node(id).kind {
            NodeKind::Text { content } | NodeKind::CData { content } => {
                buf.push_str(content);
            }
            NodeKind::Document | NodeKind::Element { .. } => {
                for child in self.children(id) {
                    self.collect_text(child, buf);
                }
            }
            _ => {}
        }
    }

    /// Returns all attributes of an element, namespace declarations included.
    ///
    /// Returns an empty slice for non-element nodes.
    #[must_use]
    pub fn attributes(&self, id: NodeId) -> &[Attribute] {
        match &self.node(id).kind {
            NodeKind::Element { attributes, .. } => attributes,
            _ => &[],
        }
    }

    /// Returns the value of an attribute by local name, ignoring namespaces.
    ///
    /// Namespace declarations are never matched.
    #[must_use]
    pub fn attribute(&self, id: NodeId, name: &str) -> Option<&str> {
        self.attributes(id)
            .iter()
            .find(|a| a.name == name && !a.is_namespace_decl())
            .map(|a| a.value.as_str())
    }

    /// Returns the value of an attribute by local name and namespace URI.
    #[must_use]
    pub fn attribute_ns(&self, id: NodeId, name: &str, namespace: &str) -> Option<&str> {
        self.attributes(id)
            .iter()
            .find(|a| a.name == name && a.namespace.as_deref() == Some(namespace))
            .map(|a| a.value.as_str())
    }

    // --- Namespace scope ---

    /// Resolves a prefix (`None` for the default namespace) to the URI in
    /// scope at `id`, walking the element and its ancestors.
    #[must_use]
    pub fn lookup_namespace_uri(&self, id: NodeId, prefix: Option<&str>) -> Option<&str> {
        if prefix == Some("xml") {
            return Some(XML_NAMESPACE);
        }
        for anc in self.ancestors(id) {
            for attr in self.attributes(anc) {
                if attr.declared_prefix() == Some(prefix) {
                    return (!attr.value.is_empty()).then_some(attr.value.as_str());
                }
            }
        }
        None
    }

    /// Finds a prefix bound to `uri` in scope at `id`.
    ///
    /// Returns `Some(None)` when the URI is the default namespace, and skips
    /// prefixes that are shadowed by a nearer redeclaration.
    #[must_use]
    pub fn lookup_prefix(&self, id: NodeId, uri: &str) -> Option<Option<&str>> {
        if uri == XML_NAMESPACE {
            return Some(Some("xml"));
        }
        for anc in self.ancestors(id) {
            for attr in self.attributes(anc) {
                let Some(prefix) = attr.declared_prefix() else {
                    continue;
                };
                if attr.value == uri && self.lookup_namespace_uri(id, prefix) == Some(uri) {
                    return Some(prefix);
                }
            }
        }
        None
    }

    /// Returns the namespace bindings in scope at `id`, nearest first.
    #[must_use]
    pub fn in_scope_namespaces(&self, id: NodeId) -> Vec<(Option<String>, String)> {
        let mut seen: Vec<(Option<String>, String)> = Vec::new();
        for anc in self.ancestors(id) {
            for attr in self.attributes(anc) {
                if let Some(prefix) = attr.declared_prefix() {
                    if !seen.iter().any(|(p, _)| p.as_deref() == prefix) {
                        seen.push((prefix.map(str::to_owned), attr.value.clone()));
                    }
                }
            }
        }
        seen.retain(|(_, uri)| !uri.is_empty());
        seen
    }

    // --- Navigation ---

    /// Returns the parent of a node.
    #[must_use]
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).parent
    }

    /// Returns the first child of a node.
    #[must_use]
    pub fn first_child(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).first_child
    }

    /// Returns the last child of a node.
    #[must_use]
    pub fn last_child(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).last_child
    }

    /// Returns the next sibling of a node.
    #[must_use]
    pub fn next_sibling(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).next_sibling
    }

    /// Returns the previous sibling of a node.
    #[must_use]
    pub fn prev_sibling(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).prev_sibling
    }

    /// Returns an iterator over the children of a node.
    pub fn children(&self, id: NodeId) -> Children<'_> {
        Children {
            doc: self,
            next: self.node(id).first_child,
        }
    }

    /// Returns an iterator over a node and its ancestors (walking up to root).
    pub fn ancestors(&self, id: NodeId) -> Ancestors<'_> {
        Ancestors {
            doc: self,
            next: Some(id),
        }
    }

    /// Returns an iterator over all descendants of a node (depth-first).
    pub fn descendants(&self, id: NodeId) -> Descendants<'_> {
        Descendants {
            doc: self,
            root: id,
            next: self.first_child(id),
        }
    }

    /// Returns `true` if `id` is still part of the tree rooted at the
    /// document node.
    #[must_use]
    pub fn is_attached(&self, id: NodeId) -> bool {
        if !self.contains(id) || self.node(id).removed {
            return false;
        }
        self.ancestors(id).last() == Some(self.root)
    }

    /// Returns `true` if `ancestor` is `id` or one of its ancestors.
    #[must_use]
    pub fn is_ancestor_or_self(&self, ancestor: NodeId, id: NodeId) -> bool {
        self.ancestors(id).any(|a| a == ancestor)
    }

    /// Computes the document-order position of every attached node.
    ///
    /// Positions are recomputed from the live links, so they stay correct
    /// after insertions that allocate nodes out of arena order.
    #[must_use]
    pub fn document_order(&self) -> HashMap<NodeId, usize> {
        let mut order = HashMap::with_capacity(self.nodes.len());
        order.insert(self.root, 0);
        for (i, id) in self.descendants(self.root).enumerate() {
            order.insert(id, i + 1);
        }
        order
    }

    // --- Mutation ---

    /// Allocates a new, detached node in the arena, reusing a removed
    /// slot when one is free.
    pub fn create_node(&mut self, kind: NodeKind) -> NodeId {
        if let Some(index) = self.free.pop() {
            let index = index as usize;
            let generation = self.nodes[index].generation.wrapping_add(1);
            self.nodes[index] = NodeData::with_generation(kind, generation);
            return NodeId::new(index, generation);
        }
        let index = self.nodes.len();
        self.nodes.push(NodeData::new(kind));
        NodeId::new(index, 0)
    }

    /// Appends a detached node to the end of a parent's child list.
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        debug_assert!(
            self.node(child).parent.is_none(),
            "child already has a parent; detach it first"
        );

        self.node_mut(child).parent = Some(parent);

        if let Some(last) = self.node(parent).last_child {
            self.node_mut(last).next_sibling = Some(child);
            self.node_mut(child).prev_sibling = Some(last);
            self.node_mut(parent).last_child = Some(child);
        } else {
            self.node_mut(parent).first_child = Some(child);
            self.node_mut(parent).last_child = Some(child);
        }
    }

    /// Inserts a detached node before `reference` in its parent's child list.
    ///
    /// Does nothing if `reference` has no parent.
    pub fn insert_before(&mut self, reference: NodeId, new_child: NodeId) {
        debug_assert!(
            self.node(new_child).parent.is_none(),
            "new_child already has a parent; detach it first"
        );
        let Some(parent) = self.node(reference).parent else {
            return;
        };
        self.node_mut(new_child).parent = Some(parent);

        if let Some(prev) = self.node(reference).prev_sibling {
            self.node_mut(prev).next_sibling = Some(new_child);
            self.node_mut(new_child).prev_sibling = Some(prev);
        } else {
            self.node_mut(parent).first_child = Some(new_child);
        }

        self.node_mut(new_child).next_sibling = Some(reference);
        self.node_mut(reference).prev_sibling = Some(new_child);
    }

    /// Inserts a detached node after `reference` in its parent's child list.
    ///
    /// Does nothing if `reference` has no parent.
    pub fn insert_after(&mut self, reference: NodeId, new_child: NodeId) {
        match self.node(reference).next_sibling {
            Some(next) => self.insert_before(next, new_child),
            None => {
                if let Some(parent) = self.node(reference).parent {
                    self.append_child(parent, new_child);
                }
            }
        }
    }

    /// Prepends a detached node as the first child of a parent.
    pub fn prepend_child(&mut self, parent: NodeId, child: NodeId) {
        if let Some(first) = self.first_child(parent) {
            self.insert_before(first, child);
        } else {
            self.append_child(parent, child);
        }
    }

    /// Detaches a node from its parent without marking it removed.
    pub fn detach(&mut self, id: NodeId) {
        let Some(parent) = self.node(id).parent else {
            return;
        };

        let prev = self.node(id).prev_sibling;
        let next = self.node(id).next_sibling;

        match prev {
            Some(p) => self.node_mut(p).next_sibling = next,
            None => self.node_mut(parent).first_child = next,
        }

        match next {
            Some(n) => self.node_mut(n).prev_sibling = prev,
            None => self.node_mut(parent).last_child = prev,
        }

        self.node_mut(id).parent = None;
        self.node_mut(id).prev_sibling = None;
        self.node_mut(id).next_sibling = None;
    }

    /// Detaches a node, marks it and all its descendants as removed and
    /// frees their slots. Content is dropped right away.
    ///
    /// Returns the number of nodes removed.
    #[allow(clippy::cast_possible_truncation)]
    pub fn remove_node(&mut self, id: NodeId) -> usize {
        if !self.contains(id) || self.node(id).removed {
            return 0;
        }
        self.detach(id);
        let subtree: Vec<NodeId> = std::iter::once(id).chain(self.descendants(id)).collect();
        for &n in &subtree {
            let slot = self.node_mut(n);
            slot.removed = true;
            slot.kind = NodeKind::Document;
            self.free.push(n.as_index() as u32);
        }
        subtree.len()
    }

    /// Removes every child of `id`, returning the number of nodes removed.
    pub fn remove_children(&mut self, id: NodeId) -> usize {
        let children: Vec<NodeId> = self.children(id).collect();
        children.into_iter().map(|c| self.remove_node(c)).sum()
    }

    /// Replaces an element's name, prefix, and namespace.
    pub fn rename_element(
        &mut self,
        id: NodeId,
        new_name: &str,
        new_prefix: Option<String>,
        new_namespace: Option<String>,
    ) {
        if let NodeKind::Element {
            name,
            prefix,
            namespace,
            ..
        } = &mut self.node_mut(id).kind
        {
            new_name.clone_into(name);
            *prefix = new_prefix;
            *namespace = new_namespace;
        }
    }

    /// Creates or overwrites an attribute on an element.
    ///
    /// An existing attribute with the same local name and namespace URI is
    /// overwritten in place; otherwise the attribute is appended.
    pub fn set_attribute(&mut self, id: NodeId, attr: Attribute) {
        if let NodeKind::Element { attributes, .. } = &mut self.node_mut(id).kind {
            match attributes.iter_mut().find(|a| {
                a.name == attr.name
                    && a.namespace == attr.namespace
                    && a.is_namespace_decl() == attr.is_namespace_decl()
            }) {
                Some(existing) => *existing = attr,
                None => attributes.push(attr),
            }
        }
    }

    /// Removes attributes matching a local name and, when given, a namespace
    /// URI. Namespace declarations are never removed. Returns `true` if
    /// anything was removed.
    pub fn remove_attribute(&mut self, id: NodeId, name: &str, namespace: Option<&str>) -> bool {
        if let NodeKind::Element { attributes, .. } = &mut self.node_mut(id).kind {
            let before = attributes.len();
            attributes.retain(|a| {
                a.is_namespace_decl()
                    || a.name != name
                    || namespace.is_some_and(|ns| a.namespace.as_deref() != Some(ns))
            });
            return attributes.len() != before;
        }
        false
    }

    /// Replaces the content of a text, CDATA, or comment node.
    pub fn set_node_text(&mut self, id: NodeId, text: &str) {
        if let NodeKind::Text { content } | NodeKind::CData { content } | NodeKind::Comment { content } =
            &mut self.node_mut(id).kind
        {
            text.clone_into(content);
        }
    }

    /// Deep-copies the subtree rooted at `src_id` in `src` into this arena.
    ///
    /// Returns the id of the detached copy. Removed flags are not copied.
    pub fn import_subtree(&mut self, src: &Document, src_id: NodeId) -> NodeId {
        let copy = self.create_node(src.node(src_id).kind.clone());
        let mut stack = vec![(src_id, copy)];
        while let Some((from, to)) = stack.pop() {
            for child in src.children(from) {
                let new_child = self.create_node(src.node(child).kind.clone());
                self.append_child(to, new_child);
                stack.push((child, new_child));
            }
        }
        copy
    }

    /// Returns the total number of slots in the arena (excluding the
    /// placeholder), free slots included.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len() - 1
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

// --- Iterators ---

/// Iterator over the children of a node.
pub struct Children<'a> {
    doc: &'a Document,
    next: Option<NodeId>,
}

impl Iterator for Children<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = self.doc.node(current).next_sibling;
        Some(current)
    }
}

/// Iterator over a node and its ancestors.
pub struct Ancestors<'a> {
    doc: &'a Document,
    next: Option<NodeId>,
}

impl Iterator for Ancestors<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = self.doc.node(current).parent;
        Some(current)
    }
}

/// Depth-first iterator over all descendants of a node.
pub struct Descendants<'a> {
    doc: &'a Document,
    root: NodeId,
    next: Option<NodeId>,
}

impl Iterator for Descendants<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;

        if let Some(child) = self.doc.first_child(current) {
            self.next = Some(child);
            return Some(current);
        }

        if current == self.root {
            self.next = None;
            return Some(current);
        }

        if let Some(sibling) = self.doc.next_sibling(current) {
            self.next = Some(sibling);
            return Some(current);
        }

        let mut ancestor = self.doc.parent(current);
        while let Some(anc) = ancestor {
            if anc == self.root {
                self.next = None;
                return Some(current);
            }
            if let Some(sibling) = self.doc.next_sibling(anc) {
                self.next = Some(sibling);
                return Some(current);
            }
            ancestor = self.doc.parent(anc);
        }

        self.next = None;
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(doc: &mut Document, s: &str) -> NodeId {
        doc.create_node(NodeKind::text(s))
    }

    fn three_texts(doc: &mut Document) -> (NodeId, NodeId, NodeId) {
        let root = doc.root();
        let a = text(doc, "A");
        let b = text(doc, "B");
        let c = text(doc, "C");
        doc.append_child(root, a);
        doc.append_child(root, b);
        doc.append_child(root, c);
        (a, b, c)
    }

    /// Checks that every sibling and parent link in the tree agrees with
    /// its counterpart.
    fn assert_links_consistent(doc: &Document, parent: NodeId) {
        let children: Vec<NodeId> = doc.children(parent).collect();
        assert_eq!(doc.first_child(parent), children.first().copied());
        assert_eq!(doc.last_child(parent), children.last().copied());
        for (i, &c) in children.iter().enumerate() {
            assert_eq!(doc.parent(c), Some(parent));
            let prev = i.checked_sub(1).map(|j| children[j]);
            assert_eq!(doc.prev_sibling(c), prev);
            assert_eq!(doc.next_sibling(c), children.get(i + 1).copied());
            assert_links_consistent(doc, c);
        }
    }

    #[test]
    fn test_new_document_has_root() {
        let doc = Document::new();
        assert!(matches!(doc.node(doc.root()).kind, NodeKind::Document));
        assert_eq!(doc.node_count(), 1);
    }

    #[test]
    fn test_create_and_append_element() {
        let mut doc = Document::new();
        let root = doc.root();
        let elem = doc.create_node(NodeKind::element("div"));
        doc.append_child(root, elem);

        assert_eq!(doc.first_child(root), Some(elem));
        assert_eq!(doc.last_child(root), Some(elem));
        assert_eq!(doc.parent(elem), Some(root));
        assert_eq!(doc.node_name(elem), Some("div"));
        assert_eq!(doc.root_element(), Some(elem));
    }

    #[test]
    fn test_append_multiple_children() {
        let mut doc = Document::new();
        let (a, b, c) = three_texts(&mut doc);
        let children: Vec<NodeId> = doc.children(doc.root()).collect();
        assert_eq!(children, vec![a, b, c]);
        assert_links_consistent(&doc, doc.root());
    }

    #[test]
    fn test_insert_before_and_after() {
        let mut doc = Document::new();
        let (a, b, c) = three_texts(&mut doc);
        let x = text(&mut doc, "X");
        let y = text(&mut doc, "Y");
        let z = text(&mut doc, "Z");
        doc.insert_before(a, x);
        doc.insert_after(b, y);
        doc.insert_after(c, z);

        let children: Vec<NodeId> = doc.children(doc.root()).collect();
        assert_eq!(children, vec![x, a, b, y, c, z]);
        assert_links_consistent(&doc, doc.root());
    }

    #[test]
    fn test_insert_next_to_orphan_is_noop() {
        let mut doc = Document::new();
        let orphan = text(&mut doc, "orphan");
        let other = text(&mut doc, "other");
        doc.insert_after(orphan, other);
        doc.insert_before(orphan, other);
        assert_eq!(doc.parent(other), None);
    }

    #[test]
    fn test_prepend_child() {
        let mut doc = Document::new();
        let root = doc.root();
        let b = text(&mut doc, "B");
        let a = text(&mut doc, "A");
        doc.prepend_child(root, b);
        doc.prepend_child(root, a);
        let children: Vec<NodeId> = doc.children(root).collect();
        assert_eq!(children, vec![a, b]);
    }

    #[test]
    fn test_detach_middle_child() {
        let mut doc = Document::new();
        let (a, b, c) = three_texts(&mut doc);
        doc.detach(b);

        let children: Vec<NodeId> = doc.children(doc.root()).collect();
        assert_eq!(children, vec![a, c]);
        assert_eq!(doc.parent(b), None);
        assert!(!doc.node(b).removed);
        assert_links_consistent(&doc, doc.root());
    }

    #[test]
    fn test_detach_first_and_last_child() {
        let mut doc = Document::new();
        let (a, b, c) = three_texts(&mut doc);
        doc.detach(a);
        doc.detach(c);
        assert_eq!(doc.first_child(doc.root()), Some(b));
        assert_eq!(doc.last_child(doc.root()), Some(b));
        assert_links_consistent(&doc, doc.root());
    }

    #[test]
    fn test_remove_node_marks_subtree() {
        let doc_src = "<r><a><b><c/></b></a><d/></r>";
        let mut doc = Document::parse_str(doc_src).unwrap();
        let r = doc.root_element().unwrap();
        let a = doc.first_child(r).unwrap();
        let b = doc.first_child(a).unwrap();
        let c = doc.first_child(b).unwrap();
        let d = doc.next_sibling(a).unwrap();

        assert_eq!(doc.remove_node(a), 3);
        for id in [a, b, c] {
            assert!(doc.node(id).removed);
            assert!(!doc.is_attached(id));
        }
        assert!(doc.is_attached(d));
        assert_eq!(doc.first_child(r), Some(d));
        assert_links_consistent(&doc, doc.root());
    }

    #[test]
    fn test_removed_slots_are_reused() {
        let mut doc = Document::parse_str("<r><a><b/></a></r>").unwrap();
        let r = doc.root_element().unwrap();
        let a = doc.first_child(r).unwrap();
        let b = doc.first_child(a).unwrap();
        let slots = doc.node_count();
        assert_eq!(doc.remove_node(a), 2);
        assert_eq!(doc.remove_node(a), 0);

        let x = doc.create_node(NodeKind::element("x"));
        let y = doc.create_node(NodeKind::element("y"));
        doc.append_child(r, x);
        doc.append_child(x, y);
        assert_eq!(doc.node_count(), slots);
        assert!(doc.is_attached(y));
        for stale in [a, b] {
            assert!(!doc.contains(stale));
            assert!(!doc.is_attached(stale));
        }
        assert_eq!(doc.remove_node(a), 0);
        assert!(doc.is_attached(y));
        assert_links_consistent(&doc, doc.root());
    }

    #[test]
    fn test_node_id_raw_roundtrip() {
        let mut doc = Document::parse_str("<r><a/></r>").unwrap();
        let a = doc.first_child(doc.root_element().unwrap()).unwrap();
        doc.remove_node(a);
        let reused = doc.create_node(NodeKind::text("t"));
        assert_eq!(NodeId::from_raw(reused.into_raw()), Some(reused));
        assert_ne!(reused.into_raw(), a.into_raw());
        assert_eq!(NodeId::from_raw(1 << 32), None);
    }

    #[test]
    fn test_remove_children() {
        let mut doc = Document::parse_str("<r><a/>t<b/></r>").unwrap();
        let r = doc.root_element().unwrap();
        assert_eq!(doc.remove_children(r), 3);
        assert_eq!(doc.first_child(r), None);
        assert!(doc.is_attached(r));
    }

    #[test]
    fn test_ancestors_iterator() {
        let mut doc = Document::new();
        let root = doc.root();
        let parent = doc.create_node(NodeKind::element("parent"));
        let child = doc.create_node(NodeKind::element("child"));
        doc.append_child(root, parent);
        doc.append_child(parent, child);

        let ancestors: Vec<NodeId> = doc.ancestors(child).collect();
        assert_eq!(ancestors, vec![child, parent, root]);
        assert!(doc.is_ancestor_or_self(parent, child));
        assert!(!doc.is_ancestor_or_self(child, parent));
    }

    #[test]
    fn test_descendants_iterator() {
        let mut doc = Document::new();
        let root = doc.root();
        let p = doc.create_node(NodeKind::element("p"));
        let a = text(&mut doc, "hello ");
        let b = doc.create_node(NodeKind::element("b"));
        let b_text = text(&mut doc, "world");
        doc.append_child(root, p);
        doc.append_child(p, a);
        doc.append_child(p, b);
        doc.append_child(b, b_text);

        let desc: Vec<NodeId> = doc.descendants(root).collect();
        assert_eq!(desc, vec![p, a, b, b_text]);
        let desc_b: Vec<NodeId> = doc.descendants(b).collect();
        assert_eq!(desc_b, vec![b_text]);
        assert_eq!(doc.text_content(p), "hello world");
    }

    #[test]
    fn test_descendants_of_leaf_does_not_escape() {
        let doc = Document::parse_str("<r><a/><b/></r>").unwrap();
        let r = doc.root_element().unwrap();
        let a = doc.first_child(r).unwrap();
        assert_eq!(doc.descendants(a).count(), 0);
    }

    #[test]
    fn test_document_order_follows_links() {
        let mut doc = Document::parse_str("<r><a/><c/></r>").unwrap();
        let r = doc.root_element().unwrap();
        let a = doc.first_child(r).unwrap();
        let c = doc.last_child(r).unwrap();
        // Allocated after `c`, inserted before it.
        let b = doc.create_node(NodeKind::element("b"));
        doc.insert_after(a, b);

        let order = doc.document_order();
        assert!(order[&a] < order[&b]);
        assert!(order[&b] < order[&c]);
        assert!(b > c, "arena order differs from document order");
    }

    #[test]
    fn test_attributes_set_and_remove() {
        let mut doc = Document::new();
        let root = doc.root();
        let elem = doc.create_node(NodeKind::element("div"));
        doc.append_child(root, elem);

        doc.set_attribute(elem, Attribute::new("id", "main"));
        doc.set_attribute(elem, Attribute::new("class", "container"));
        doc.set_attribute(elem, Attribute::new("id", "other"));
        assert_eq!(doc.attribute(elem, "id"), Some("other"));
        assert_eq!(doc.attributes(elem).len(), 2);

        assert!(doc.remove_attribute(elem, "id", None));
        assert!(!doc.remove_attribute(elem, "id", None));
        assert_eq!(doc.attribute(elem, "id"), None);
        assert_eq!(doc.attribute(elem, "class"), Some("container"));
    }

    #[test]
    fn test_namespace_lookup() {
        let doc = Document::parse_str(
            r#"<r xmlns="urn:d" xmlns:p="urn:p"><p:a xmlns:p="urn:q"><b/></p:a></r>"#,
        )
        .unwrap();
        let r = doc.root_element().unwrap();
        let a = doc.first_child(r).unwrap();
        let b = doc.first_child(a).unwrap();

        assert_eq!(doc.lookup_namespace_uri(b, Some("p")), Some("urn:q"));
        assert_eq!(doc.lookup_namespace_uri(r, Some("p")), Some("urn:p"));
        assert_eq!(doc.lookup_namespace_uri(b, None), Some("urn:d"));
        assert_eq!(doc.lookup_namespace_uri(b, Some("xml")), Some(XML_NAMESPACE));
        assert_eq!(doc.lookup_prefix(b, "urn:q"), Some(Some("p")));
        // urn:p is shadowed at b.
        assert_eq!(doc.lookup_prefix(b, "urn:p"), None);
        assert_eq!(doc.lookup_prefix(b, "urn:d"), Some(None));
        assert_eq!(doc.in_scope_namespaces(b).len(), 2);
        assert_eq!(doc.node_namespace(a), Some("urn:q"));
        assert_eq!(doc.qualified_name(a).as_deref(), Some("p:a"));
    }

    #[test]
    fn test_rename_element() {
        let mut doc = Document::parse_str("<r/>").unwrap();
        let r = doc.root_element().unwrap();
        doc.rename_element(r, "s", Some("p".into()), Some("urn:p".into()));
        assert_eq!(doc.node_name(r), Some("s"));
        assert_eq!(doc.node_prefix(r), Some("p"));
        assert_eq!(doc.node_namespace(r), Some("urn:p"));
    }

    #[test]
    fn test_import_subtree_deep_copies() {
        let src = Document::parse_str(r#"<x><y k="v">t</y><z/></x>"#).unwrap();
        let mut dst = Document::parse_str("<r/>").unwrap();
        let x = src.root_element().unwrap();
        let r = dst.root_element().unwrap();

        let copy = dst.import_subtree(&src, x);
        assert_eq!(dst.parent(copy), None);
        dst.append_child(r, copy);
        assert_eq!(dst.node_name(copy), Some("x"));
        let y = dst.first_child(copy).unwrap();
        assert_eq!(dst.attribute(y, "k"), Some("v"));
        assert_eq!(dst.text_content(copy), "t");
        assert_links_consistent(&dst, dst.root());
        assert_eq!(src.text_content(x), "t");
    }

    #[test]
    fn test_node_text() {
        let mut doc = Document::new();
        let t = text(&mut doc, "hello");
        assert_eq!(doc.node_text(t), Some("hello"));
        doc.set_node_text(t, "bye");
        assert_eq!(doc.node_text(t), Some("bye"));
        let comment = doc.create_node(NodeKind::Comment {
            content: "a comment".to_string(),
        });
        assert_eq!(doc.node_text(comment), Some("a comment"));
        let elem = doc.create_node(NodeKind::element("div"));
        assert_eq!(doc.node_text(elem), None);
    }

    #[test]
    fn test_parse_bytes_with_bom() {
        let mut input = vec![0xEF, 0xBB, 0xBF];
        input.extend_from_slice(b"<root>hello</root>");
        let doc = Document::parse_bytes(&input).unwrap();
        let root = doc.root_element().unwrap();
        assert_eq!(doc.node_name(root), Some("root"));
        assert_eq!(doc.text_content(root), "hello");
    }
}
