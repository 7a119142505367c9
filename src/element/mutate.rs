//! Structural edits.
//!
//! Inserting a handle from the same document moves its node; inserting a
//! handle from another document deep-copies the subtree and leaves the
//! source untouched. Either way, namespace prefixes the subtree relied on
//! from its old ancestors are redeclared on its top element when the new
//! position does not already bind them.

use tracing::debug;

use super::{matching_children, resolve_namespace_arg, Element};
use crate::error::{Error, Result};
use crate::parser::input::{is_qname, split_name};
use crate::serial::xml::inherited_declarations;
use crate::tree::{Attribute, Document, NodeId, NodeKind};

/// Where an inserted node goes relative to the receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placement {
    LastChild,
    After,
    Before,
}

impl Element {
    /// Renames an element in place.
    ///
    /// A prefixed name takes the namespace bound to its prefix; an
    /// unprefixed name keeps the element's current prefix and namespace.
    ///
    /// # Errors
    ///
    /// - [`Error::NodeInvalid`] for a stale handle.
    /// - [`Error::InvalidOperation`] when the node is not an element.
    /// - [`Error::InvalidName`] when `name` is not a qualified name.
    /// - [`Error::UnknownNamespace`] when the prefix is not in scope.
    pub fn set_tag(&self, name: &str) -> Result<()> {
        self.write(|tree, id| {
            let (current_prefix, current_namespace) = match &tree.node(id).kind {
                NodeKind::Element {
                    prefix, namespace, ..
                } => (prefix.clone(), namespace.clone()),
                _ => return Err(Error::InvalidOperation("only elements have a tag")),
            };
            if !is_qname(name) {
                return Err(Error::InvalidName(name.to_owned()));
            }
            let (prefix, local) = split_name(name);
            let (prefix, namespace) = match prefix {
                Some(p) => {
                    let uri = tree
                        .lookup_namespace_uri(id, Some(p))
                        .ok_or_else(|| Error::UnknownNamespace(p.to_owned()))?;
                    (Some(p.to_owned()), Some(uri.to_owned()))
                }
                None => (current_prefix, current_namespace),
            };
            tree.rename_element(id, local, prefix, namespace);
            Ok(())
        })
    }

    /// Appends `node` as the last child and returns the inserted node's
    /// handle.
    ///
    /// # Errors
    ///
    /// - [`Error::NodeInvalid`] when either handle is stale.
    /// - [`Error::InvalidOperation`] when the receiver is not an element,
    ///   or when `node` is the receiver or one of its ancestors.
    pub fn add_child(&self, node: &Element) -> Result<Element> {
        self.insert(node, Placement::LastChild)
    }

    /// Inserts `node` right after the receiver.
    ///
    /// # Errors
    ///
    /// As [`add_child`](Self::add_child); additionally
    /// [`Error::InvalidOperation`] when the receiver's parent is not an
    /// element (the root element cannot get siblings).
    pub fn add_next_sibling(&self, node: &Element) -> Result<Element> {
        self.insert(node, Placement::After)
    }

    /// Inserts `node` right before the receiver.
    ///
    /// # Errors
    ///
    /// As [`add_next_sibling`](Self::add_next_sibling).
    pub fn add_previous_sibling(&self, node: &Element) -> Result<Element> {
        self.insert(node, Placement::Before)
    }

    /// Creates an element and appends it. An unprefixed tag inherits the
    /// default namespace in scope.
    ///
    /// # Errors
    ///
    /// - [`Error::NodeInvalid`] for a stale handle.
    /// - [`Error::InvalidOperation`] when the receiver is not an element.
    /// - [`Error::InvalidName`] when `tag` is not a qualified name.
    /// - [`Error::UnknownNamespace`] when the prefix is not in scope.
    pub fn add_child_element(&self, tag: &str) -> Result<Element> {
        let id = self.write(|tree, id| {
            require_element(tree, id)?;
            if !is_qname(tag) {
                return Err(Error::InvalidName(tag.to_owned()));
            }
            let (prefix, local) = split_name(tag);
            let namespace = match prefix {
                Some(p) => Some(
                    tree.lookup_namespace_uri(id, Some(p))
                        .ok_or_else(|| Error::UnknownNamespace(p.to_owned()))?,
                ),
                None => tree.lookup_namespace_uri(id, None),
            }
            .map(str::to_owned);
            let child = tree.create_node(NodeKind::Element {
                name: local.to_owned(),
                prefix: prefix.map(str::to_owned),
                namespace,
                attributes: Vec::new(),
            });
            tree.append_child(id, child);
            Ok(child)
        })?;
        Ok(self.handle(id))
    }

    /// Appends a text node.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NodeInvalid`] for a stale handle and
    /// [`Error::InvalidOperation`] when the receiver is not an element or
    /// the text holds a character XML cannot represent.
    pub fn add_text(&self, text: &str) -> Result<Element> {
        let id = self.write(|tree, id| {
            require_element(tree, id)?;
            super::access::check_chars(text)?;
            let child = tree.create_node(NodeKind::text(text));
            tree.append_child(id, child);
            Ok(child)
        })?;
        Ok(self.handle(id))
    }

    /// Removes all children. Handles into them become invalid.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NodeInvalid`] for a stale handle.
    pub fn empty(&self) -> Result<()> {
        self.write(|tree, id| {
            let removed = tree.remove_children(id);
            debug!(node = id.into_raw(), removed, "children removed");
            Ok(())
        })
    }

    /// Removes the element children matching a local name (`"*"` for any)
    /// and a namespace (URI or in-scope prefix). Other children stay.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NodeInvalid`] for a stale handle.
    pub fn remove_children(&self, tag: Option<&str>, namespace: Option<&str>) -> Result<()> {
        self.write(|tree, id| {
            let namespace = namespace.map(|ns| resolve_namespace_arg(tree, id, ns));
            let doomed: Vec<NodeId> =
                matching_children(tree, id, tag, namespace.as_deref()).collect();
            let removed: usize = doomed.into_iter().map(|c| tree.remove_node(c)).sum();
            debug!(node = id.into_raw(), removed, "matching children removed");
            Ok(())
        })
    }

    /// Detaches the node and its subtree. This handle and every handle into
    /// the subtree become invalid.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NodeInvalid`] if the node was already removed.
    pub fn remove(&self) -> Result<()> {
        self.write(|tree, id| {
            let removed = tree.remove_node(id);
            debug!(node = id.into_raw(), removed, "subtree removed");
            Ok(())
        })
    }

    fn insert(&self, node: &Element, placement: Placement) -> Result<Element> {
        if self.same_document(node) {
            let id = self.write(|tree, target| {
                if !tree.is_attached(node.id) {
                    return Err(Error::NodeInvalid);
                }
                check_placement(tree, target, placement)?;
                if tree.is_ancestor_or_self(node.id, target) {
                    return Err(Error::InvalidOperation(
                        "cannot move a node into its own subtree",
                    ));
                }
                let needed = inherited_declarations(tree, node.id);
                tree.detach(node.id);
                place(tree, target, node.id, placement);
                reconcile_namespaces(tree, node.id, &needed);
                debug!(node = node.id.into_raw(), ?placement, "node moved");
                Ok(node.id)
            })?;
            return Ok(self.handle(id));
        }

        // Copy out under the source's lock first so that the two documents
        // are never locked together.
        let (fragment, top, needed) = node.read(|src, id| {
            let mut fragment = Document::new();
            let top = fragment.import_subtree(src, id);
            Ok((fragment, top, inherited_declarations(src, id)))
        })?;

        let id = self.write(|tree, target| {
            check_placement(tree, target, placement)?;
            let copy = tree.import_subtree(&fragment, top);
            place(tree, target, copy, placement);
            reconcile_namespaces(tree, copy, &needed);
            debug!(
                node = copy.into_raw(),
                nodes = fragment.node_count().saturating_sub(1),
                ?placement,
                "subtree imported"
            );
            Ok(copy)
        })?;
        Ok(self.handle(id))
    }
}

fn require_element(tree: &Document, id: NodeId) -> Result<()> {
    if tree.node(id).kind.is_element() {
        Ok(())
    } else {
        Err(Error::InvalidOperation("only elements can have children"))
    }
}

fn check_placement(tree: &Document, target: NodeId, placement: Placement) -> Result<()> {
    match placement {
        Placement::LastChild => require_element(tree, target),
        Placement::After | Placement::Before => {
            let has_element_parent = tree
                .parent(target)
                .is_some_and(|p| tree.node(p).kind.is_element());
            if has_element_parent {
                Ok(())
            } else {
                Err(Error::InvalidOperation("node has no parent element"))
            }
        }
    }
}

fn place(tree: &mut Document, target: NodeId, node: NodeId, placement: Placement) {
    match placement {
        Placement::LastChild => tree.append_child(target, node),
        Placement::After => tree.insert_after(target, node),
        Placement::Before => tree.insert_before(target, node),
    }
}

/// Declares on `top` the bindings its subtree used from its old ancestors
/// that its new ancestors do not provide.
fn reconcile_namespaces(tree: &mut Document, top: NodeId, needed: &[(Option<String>, String)]) {
    if !tree.node(top).kind.is_element() {
        return;
    }

    let mut declarations: Vec<Attribute> = needed
        .iter()
        .filter(|(prefix, uri)| tree.lookup_namespace_uri(top, prefix.as_deref()) != Some(uri.as_str()))
        .map(|(prefix, uri)| declaration(prefix.as_deref(), uri))
        .collect();

    // An element in no namespace must not fall under the new default.
    let in_no_namespace = tree.node_prefix(top).is_none() && tree.node_namespace(top).is_none();
    if in_no_namespace && tree.lookup_namespace_uri(top, None).is_some() {
        declarations.push(declaration(None, ""));
    }

    if declarations.is_empty() {
        return;
    }
    debug!(node = top.into_raw(), count = declarations.len(), "namespaces redeclared");
    if let NodeKind::Element { attributes, .. } = &mut tree.node_mut(top).kind {
        attributes.splice(0..0, declarations);
    }
}

fn declaration(prefix: Option<&str>, uri: &str) -> Attribute {
    match prefix {
        Some(p) => Attribute {
            name: p.to_owned(),
            value: uri.to_owned(),
            prefix: Some("xmlns".to_owned()),
            namespace: None,
        },
        None => Attribute::new("xmlns", uri),
    }
}
