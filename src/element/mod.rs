//! Handle-based object model over a parsed document.
//!
//! [`XmlDocument`] owns a [`Document`] tree behind shared ownership and a
//! cache of compiled `XPath` expressions. [`Element`] is a cheap, cloneable
//! handle to one node of that tree: element, text, CDATA, comment or
//! processing instruction.
//!
//! Handles never cache structure. Parent, children and siblings are read
//! from the tree on every call, so every handle sees every mutation made
//! through any other handle. A handle stays valid while its node is attached
//! to the document; once the node (or an ancestor) is removed, every
//! operation on it fails with [`Error::NodeInvalid`].
//!
//! # Examples
//!
//! ```
//! use xmlquill::element::{Mode, XmlDocument};
//!
//! let doc = XmlDocument::parse_str(r#"<a><b id="1"/><b id="2"/></a>"#, Mode::Xml).unwrap();
//! let root = doc.root().unwrap();
//! let ids: Vec<_> = root
//!     .children(Some("b"), None)
//!     .unwrap()
//!     .iter()
//!     .map(|b| b.attribute("id", None).unwrap().unwrap_or_default())
//!     .collect();
//! assert_eq!(ids, ["1", "2"]);
//! ```
//!
//! # Concurrency
//!
//! The tree sits behind a read-write lock. Reads and queries share it,
//! mutations take it exclusively, and no lock is held while user callbacks
//! run, so visitors passed to the iteration helpers may mutate freely.

mod access;
mod mutate;
mod query;

use std::fmt;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use lru::LruCache;
use tracing::debug;

pub use query::QueryIter;

use crate::error::{Error, ParseError, Result};
use crate::html::HtmlParseOptions;
use crate::parser::ParseOptions;
use crate::tree::{Document, NodeId, NodeKind};
use crate::xpath::CompiledQuery;

/// Default number of compiled expressions kept per document.
pub const DEFAULT_QUERY_CACHE_CAPACITY: usize = 64;

/// The markup dialect a document was parsed as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Mode {
    /// Strict XML: malformed input is an error.
    #[default]
    Xml,
    /// Lenient HTML: malformed tags are repaired.
    Html,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Xml => f.write_str("xml"),
            Self::Html => f.write_str("html"),
        }
    }
}

/// The kind of node an [`Element`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeType {
    Element,
    Text,
    CData,
    Comment,
    ProcessingInstruction,
}

impl NodeType {
    /// Maps a tree payload to a handle node type. The document node and
    /// document type declarations have no handle representation.
    fn of(kind: &NodeKind) -> Option<Self> {
        match kind {
            NodeKind::Element { .. } => Some(Self::Element),
            NodeKind::Text { .. } => Some(Self::Text),
            NodeKind::CData { .. } => Some(Self::CData),
            NodeKind::Comment { .. } => Some(Self::Comment),
            NodeKind::ProcessingInstruction { .. } => Some(Self::ProcessingInstruction),
            NodeKind::Document | NodeKind::DocumentType { .. } => None,
        }
    }
}

/// Options for loading a document.
///
/// # Examples
///
/// ```
/// use xmlquill::element::{LoadOptions, Mode, XmlDocument};
/// use xmlquill::parser::ParseOptions;
///
/// let options = LoadOptions::new(Mode::Xml)
///     .xml_options(ParseOptions::default().no_blanks(true))
///     .cache_capacity(8);
/// let doc = XmlDocument::parse_with_options(b"<a>\n  <b/>\n</a>", &options).unwrap();
/// assert_eq!(doc.root().unwrap().children_all().unwrap().len(), 1);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadOptions {
    /// Markup dialect.
    pub mode: Mode,
    /// Encoding label that overrides detection.
    pub encoding: Option<String>,
    /// Options for [`Mode::Xml`].
    pub xml: ParseOptions,
    /// Options for [`Mode::Html`].
    pub html: HtmlParseOptions,
    /// Number of compiled expressions cached per document (at least 1).
    pub cache_capacity: usize,
}

impl LoadOptions {
    #[must_use]
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            encoding: None,
            xml: ParseOptions::default(),
            html: HtmlParseOptions::default(),
            cache_capacity: DEFAULT_QUERY_CACHE_CAPACITY,
        }
    }

    /// Forces the input encoding (an `encoding_rs` label such as `"latin1"`).
    #[must_use]
    pub fn encoding(mut self, label: impl Into<String>) -> Self {
        self.encoding = Some(label.into());
        self
    }

    #[must_use]
    pub fn xml_options(mut self, options: ParseOptions) -> Self {
        self.xml = options;
        self
    }

    #[must_use]
    pub fn html_options(mut self, options: HtmlParseOptions) -> Self {
        self.html = options;
        self
    }

    #[must_use]
    pub fn cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self::new(Mode::Xml)
    }
}

/// Shared state behind every handle of one document.
pub(crate) struct Inner {
    tree: RwLock<Document>,
    /// Compiled expressions keyed by namespace bindings and source text.
    cache: Mutex<LruCache<String, Arc<CompiledQuery>>>,
    mode: Mode,
}

impl Inner {
    /// Completed operations always leave the tree consistent, so a poisoned
    /// lock is simply recovered.
    fn read(&self) -> RwLockReadGuard<'_, Document> {
        self.tree.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Document> {
        self.tree.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A parsed document.
///
/// Cloning is cheap and yields another owner of the same tree. The tree is
/// released when the last `XmlDocument` clone and the last [`Element`]
/// handle are dropped.
#[derive(Clone)]
pub struct XmlDocument {
    inner: Arc<Inner>,
}

impl XmlDocument {
    /// Parses raw bytes.
    ///
    /// `encoding` forces a transcoding label; without it the encoding is
    /// taken from the byte order mark, the XML declaration or (in HTML mode)
    /// a `<meta>` charset, falling back to UTF-8.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError`] for empty input, undecodable bytes, and (in
    /// XML mode) markup that is not well-formed or has no root element.
    pub fn parse(bytes: &[u8], mode: Mode, encoding: Option<&str>) -> Result<Self, ParseError> {
        let mut options = LoadOptions::new(mode);
        options.encoding = encoding.map(str::to_owned);
        Self::parse_with_options(bytes, &options)
    }

    /// Parses already-decoded text.
    ///
    /// # Errors
    ///
    /// See [`parse`](Self::parse).
    pub fn parse_str(text: &str, mode: Mode) -> Result<Self, ParseError> {
        Self::parse(text.as_bytes(), mode, Some("utf-8"))
    }

    /// Shorthand for `parse_str(text, Mode::Xml)`.
    ///
    /// # Errors
    ///
    /// See [`parse`](Self::parse).
    pub fn parse_xml(text: &str) -> Result<Self, ParseError> {
        Self::parse_str(text, Mode::Xml)
    }

    /// Shorthand for `parse_str(text, Mode::Html)`.
    ///
    /// # Errors
    ///
    /// See [`parse`](Self::parse).
    pub fn parse_html(text: &str) -> Result<Self, ParseError> {
        Self::parse_str(text, Mode::Html)
    }

    /// Parses raw bytes with explicit options.
    ///
    /// # Errors
    ///
    /// See [`parse`](Self::parse).
    pub fn parse_with_options(bytes: &[u8], options: &LoadOptions) -> Result<Self, ParseError> {
        let forced = options.encoding.as_deref();
        let decoded = match options.mode {
            Mode::Xml => crate::encoding::decode_to_utf8(bytes, forced),
            Mode::Html => crate::encoding::decode_html(bytes, forced),
        }
        .map_err(|e| ParseError::new(e.to_string()))?;

        if decoded.text.trim_start_matches('\u{FEFF}').trim().is_empty() {
            return Err(ParseError::new("document is empty"));
        }

        let text = decoded.text.strip_prefix('\u{FEFF}').unwrap_or(&decoded.text);
        let mut tree = match options.mode {
            Mode::Xml => crate::parser::parse_str_with_options(text, &options.xml)?,
            Mode::Html => crate::html::parse_html_with_options(text, &options.html)?,
        };
        if tree.root_element().is_none() {
            return Err(ParseError::new("document has no root element"));
        }
        tree.encoding.get_or_insert(decoded.encoding);

        debug!(
            mode = %options.mode,
            encoding = tree.encoding.as_deref().unwrap_or_default(),
            nodes = tree.node_count(),
            diagnostics = tree.diagnostics.len(),
            "document loaded"
        );
        Ok(Self::from_tree(tree, options.mode, options.cache_capacity))
    }

    /// Wraps an existing tree.
    #[must_use]
    pub fn from_document(tree: Document, mode: Mode) -> Self {
        Self::from_tree(tree, mode, DEFAULT_QUERY_CACHE_CAPACITY)
    }

    fn from_tree(tree: Document, mode: Mode, cache_capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(cache_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Arc::new(Inner {
                tree: RwLock::new(tree),
                cache: Mutex::new(LruCache::new(capacity)),
                mode,
            }),
        }
    }

    /// Returns the root element.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NodeInvalid`] if the root element has been removed.
    pub fn root(&self) -> Result<Element> {
        let tree = self.inner.read();
        tree.root_element()
            .map(|id| self.handle(id))
            .ok_or(Error::NodeInvalid)
    }

    /// Returns the canonical handle for a node id.
    ///
    /// Handles obtained for the same node by any path compare equal.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NodeInvalid`] if the id does not name a live,
    /// attached node that a handle can represent.
    pub fn register_or_reuse(&self, id: NodeId) -> Result<Element> {
        let tree = self.inner.read();
        let representable = tree.contains(id)
            && tree.is_attached(id)
            && NodeType::of(&tree.node(id).kind).is_some();
        if representable {
            Ok(self.handle(id))
        } else {
            Err(Error::NodeInvalid)
        }
    }

    /// The encoding the input was decoded from.
    #[must_use]
    pub fn encoding(&self) -> Option<String> {
        self.inner.read().encoding.clone()
    }

    #[must_use]
    pub fn mode(&self) -> Mode {
        self.inner.mode
    }

    /// Serializes the whole document, XML declaration included.
    ///
    /// Mutation can nest elements deeper than the parser's default depth
    /// limit (`ParseOptions::max_depth`, 256). Reading such output back
    /// needs a raised limit through [`LoadOptions::xml_options`].
    #[must_use]
    pub fn to_xml(&self) -> String {
        crate::serial::serialize(&self.inner.read())
    }

    /// Runs `f` against the underlying tree under a read lock.
    ///
    /// The closure must not call back into handles of this document that
    /// mutate it.
    pub fn with_tree<T>(&self, f: impl FnOnce(&Document) -> T) -> T {
        f(&self.inner.read())
    }

    fn handle(&self, id: NodeId) -> Element {
        Element {
            doc: Arc::clone(&self.inner),
            id,
        }
    }
}

impl PartialEq for XmlDocument {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for XmlDocument {}

impl fmt::Debug for XmlDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("XmlDocument")
            .field("mode", &self.inner.mode)
            .field("encoding", &self.encoding())
            .finish_non_exhaustive()
    }
}

/// A handle to one node of an [`XmlDocument`].
///
/// Equality and hashing use document identity plus node identity.
#[derive(Clone)]
pub struct Element {
    doc: Arc<Inner>,
    id: NodeId,
}

impl Element {
    /// The document this handle belongs to.
    #[must_use]
    pub fn document(&self) -> XmlDocument {
        XmlDocument {
            inner: Arc::clone(&self.doc),
        }
    }

    /// The arena id of the node.
    #[must_use]
    pub fn node_id(&self) -> NodeId {
        self.id
    }

    /// Returns `true` while the node is attached to its document.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.doc.read().is_attached(self.id)
    }

    /// # Errors
    ///
    /// Returns [`Error::NodeInvalid`] for a stale handle.
    pub fn node_type(&self) -> Result<NodeType> {
        self.read(|tree, id| NodeType::of(&tree.node(id).kind).ok_or(Error::NodeInvalid))
    }

    /// The local name of an element; empty for other node types.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NodeInvalid`] for a stale handle.
    pub fn tag(&self) -> Result<String> {
        self.read(|tree, id| match &tree.node(id).kind {
            NodeKind::Element { name, .. } => Ok(name.clone()),
            _ => Ok(String::new()),
        })
    }

    /// The namespace URI of an element.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NodeInvalid`] for a stale handle.
    pub fn namespace_uri(&self) -> Result<Option<String>> {
        self.read(|tree, id| Ok(tree.node_namespace(id).map(str::to_owned)))
    }

    /// The namespace prefix of an element.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NodeInvalid`] for a stale handle.
    pub fn prefix(&self) -> Result<Option<String>> {
        self.read(|tree, id| Ok(tree.node_prefix(id).map(str::to_owned)))
    }

    /// The parent element; `None` for the root element.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NodeInvalid`] for a stale handle.
    pub fn parent(&self) -> Result<Option<Element>> {
        self.read(|tree, id| {
            Ok(tree
                .parent(id)
                .filter(|&p| tree.node(p).kind.is_element())
                .map(|p| self.handle(p)))
        })
    }

    /// The next sibling of any handle type.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NodeInvalid`] for a stale handle.
    pub fn next_sibling(&self) -> Result<Option<Element>> {
        self.read(|tree, id| {
            Ok(std::iter::successors(tree.next_sibling(id), |&s| tree.next_sibling(s))
                .find(|&s| NodeType::of(&tree.node(s).kind).is_some())
                .map(|s| self.handle(s)))
        })
    }

    /// The previous sibling of any handle type.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NodeInvalid`] for a stale handle.
    pub fn previous_sibling(&self) -> Result<Option<Element>> {
        self.read(|tree, id| {
            Ok(std::iter::successors(tree.prev_sibling(id), |&s| tree.prev_sibling(s))
                .find(|&s| NodeType::of(&tree.node(s).kind).is_some())
                .map(|s| self.handle(s)))
        })
    }

    /// Element children in document order.
    ///
    /// `tag` filters by local name (`"*"` matches any). `namespace` is a
    /// namespace URI or a prefix in scope at this element.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NodeInvalid`] for a stale handle.
    pub fn children(&self, tag: Option<&str>, namespace: Option<&str>) -> Result<Vec<Element>> {
        self.read(|tree, id| {
            let namespace = namespace.map(|ns| resolve_namespace_arg(tree, id, ns));
            Ok(matching_children(tree, id, tag, namespace.as_deref())
                .map(|c| self.handle(c))
                .collect())
        })
    }

    /// All element children.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NodeInvalid`] for a stale handle.
    pub fn children_all(&self) -> Result<Vec<Element>> {
        self.children(None, None)
    }

    /// The first element matching a dotted path of local names.
    ///
    /// `"a.b"` finds the first `a` child, then the first `b` child of that.
    /// A `"*"` segment matches any element.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NodeInvalid`] for a stale handle.
    pub fn child(&self, tag: &str) -> Result<Option<Element>> {
        self.child_lookup(tag, None)
    }

    /// Like [`child`](Self::child), restricted to one namespace (URI or
    /// in-scope prefix).
    ///
    /// # Errors
    ///
    /// Returns [`Error::NodeInvalid`] for a stale handle.
    pub fn child_ns(&self, tag: &str, namespace: &str) -> Result<Option<Element>> {
        self.child_lookup(tag, Some(namespace))
    }

    fn child_lookup(&self, path: &str, namespace: Option<&str>) -> Result<Option<Element>> {
        self.read(|tree, id| {
            let namespace = namespace.map(|ns| resolve_namespace_arg(tree, id, ns));
            let mut current = id;
            for segment in path.split('.') {
                match matching_children(tree, current, Some(segment), namespace.as_deref()).next() {
                    Some(next) => current = next,
                    None => return Ok(None),
                }
            }
            Ok(Some(self.handle(current)))
        })
    }

    // --- Lock helpers ---

    /// Runs `f` under the read lock once the handle is known to be valid.
    fn read<T>(&self, f: impl FnOnce(&Document, NodeId) -> Result<T>) -> Result<T> {
        let tree = self.doc.read();
        if !tree.is_attached(self.id) {
            return Err(Error::NodeInvalid);
        }
        f(&tree, self.id)
    }

    /// Runs `f` under the write lock once the handle is known to be valid.
    fn write<T>(&self, f: impl FnOnce(&mut Document, NodeId) -> Result<T>) -> Result<T> {
        let mut tree = self.doc.write();
        if !tree.is_attached(self.id) {
            return Err(Error::NodeInvalid);
        }
        f(&mut tree, self.id)
    }

    fn handle(&self, id: NodeId) -> Element {
        Element {
            doc: Arc::clone(&self.doc),
            id,
        }
    }

    fn same_document(&self, other: &Element) -> bool {
        Arc::ptr_eq(&self.doc, &other.doc)
    }
}

impl PartialEq for Element {
    fn eq(&self, other: &Self) -> bool {
        self.same_document(other) && self.id == other.id
    }
}

impl Eq for Element {}

impl Hash for Element {
    fn hash<H: Hasher>(&self, state: &mut H) {
        Arc::as_ptr(&self.doc).hash(state);
        self.id.hash(state);
    }
}

impl fmt::Debug for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Element").field("id", &self.id).finish_non_exhaustive()
    }
}

/// Turns a namespace argument into a URI: an in-scope prefix resolves to
/// its binding, anything else is taken as a URI.
fn resolve_namespace_arg(tree: &Document, id: NodeId, arg: &str) -> String {
    tree.lookup_namespace_uri(id, Some(arg))
        .unwrap_or(arg)
        .to_owned()
}

/// Element children of `id` matching an optional local name and URI.
fn matching_children<'t>(
    tree: &'t Document,
    id: NodeId,
    tag: Option<&'t str>,
    namespace: Option<&'t str>,
) -> impl Iterator<Item = NodeId> + 't {
    tree.children(id).filter(move |&c| match &tree.node(c).kind {
        NodeKind::Element {
            name,
            namespace: ns,
            ..
        } => {
            tag.map_or(true, |t| t == "*" || t == name)
                && namespace.map_or(true, |want| ns.as_deref() == Some(want))
        }
        _ => false,
    })
}
