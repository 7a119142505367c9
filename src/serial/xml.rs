//! XML serializer.
//!
//! Serializes a `Document` tree, or a fragment of it, into well-formed XML.
//!
//! Fragments are self-contained: when a subtree uses a namespace prefix that
//! is declared on one of its ancestors, the declaration is repeated on the
//! fragment's top-level element so that the output re-parses on its own.

use std::collections::HashSet;

use crate::tree::{Document, NodeId, NodeKind, XML_NAMESPACE};

/// Options controlling XML serialization output.
///
/// # Examples
///
/// ```
/// use xmlquill::tree::Document;
/// use xmlquill::serial::{serialize_with_options, SerializeOptions};
///
/// let doc = Document::parse_str("<root><child>Hello</child></root>").unwrap();
/// let xml = serialize_with_options(&doc, &SerializeOptions::default().indent(true));
/// assert!(xml.contains("  <child>"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializeOptions {
    /// Whether to produce indented output. Defaults to `false`.
    pub indent: bool,
    /// The string used for each indentation level. Defaults to two spaces.
    pub indent_str: String,
    /// Whether whole-document output starts with an XML declaration.
    /// Defaults to `true`. Fragments never get one.
    pub declaration: bool,
}

impl Default for SerializeOptions {
    fn default() -> Self {
        Self {
            indent: false,
            indent_str: "  ".to_string(),
            declaration: true,
        }
    }
}

impl SerializeOptions {
    /// Enables or disables indented output.
    ///
    /// Mixed-content elements (text next to element children) are never
    /// re-indented, so their text survives unchanged.
    #[must_use]
    pub fn indent(mut self, indent: bool) -> Self {
        self.indent = indent;
        self
    }

    /// Sets the indentation string used for each nesting level.
    #[must_use]
    pub fn indent_str(mut self, s: &str) -> Self {
        self.indent_str = s.to_string();
        self
    }

    /// Enables or disables the XML declaration.
    #[must_use]
    pub fn declaration(mut self, yes: bool) -> Self {
        self.declaration = yes;
        self
    }
}

/// Serializes a document to an XML string.
///
/// # Examples
///
/// ```
/// use xmlquill::tree::Document;
/// use xmlquill::serial::serialize;
///
/// let doc = Document::parse_str("<root><child>Hello</child></root>").unwrap();
/// assert_eq!(
///     serialize(&doc),
///     "<?xml version=\"1.0\"?>\n<root><child>Hello</child></root>\n"
/// );
/// ```
#[must_use]
pub fn serialize(doc: &Document) -> String {
    serialize_with_options(doc, &SerializeOptions::default())
}

/// Serializes a document to an XML string with the given options.
#[must_use]
pub fn serialize_with_options(doc: &Document, options: &SerializeOptions) -> String {
    let mut out = String::new();

    if options.declaration {
        out.push_str("<?xml version=\"");
        out.push_str(doc.version.as_deref().unwrap_or("1.0"));
        out.push('"');
        // The output is UTF-8 whatever the source encoding was.
        if doc.encoding.is_some() {
            out.push_str(" encoding=\"UTF-8\"");
        }
        if let Some(standalone) = doc.standalone {
            out.push_str(if standalone {
                " standalone=\"yes\""
            } else {
                " standalone=\"no\""
            });
        }
        out.push_str("?>\n");
    }

    let mut writer = Writer::new(&mut out, options);
    for child in doc.children(doc.root()) {
        writer.node(doc, child, 0, options.indent, &[]);
        if !options.indent {
            // Top-level siblings go on their own lines.
            if matches!(doc.node(child).kind, NodeKind::DocumentType { .. })
                || doc.next_sibling(child).is_some()
            {
                writer.out.push('\n');
            }
        }
    }
    if !out.ends_with('\n') {
        out.push('\n');
    }
    out
}

/// Serializes a single node.
///
/// With `include_self`, the node's own markup is included (`<a>..</a>`);
/// otherwise only its children are. Namespace declarations inherited from
/// ancestors are re-declared on every top-level element that needs them.
#[must_use]
pub fn serialize_node(doc: &Document, id: NodeId, include_self: bool) -> String {
    serialize_node_with_options(doc, id, include_self, &SerializeOptions::default())
}

/// Serializes a single node with the given options.
#[must_use]
pub fn serialize_node_with_options(
    doc: &Document,
    id: NodeId,
    include_self: bool,
    options: &SerializeOptions,
) -> String {
    let mut out = String::new();
    let mut writer = Writer::new(&mut out, options);
    if include_self {
        let inherited = inherited_declarations(doc, id);
        writer.node(doc, id, 0, false, &inherited);
    } else {
        let element_only = options.indent && is_element_only(doc, id);
        for child in doc.children(id) {
            if element_only && is_blank_text(doc, child) {
                continue;
            }
            let inherited = inherited_declarations(doc, child);
            writer.node(doc, child, 0, element_only, &inherited);
        }
    }
    out
}

/// Namespace bindings declared on ancestors of `id` and used by the
/// subtree rooted at `id`, but not declared on `id` itself.
pub(crate) fn inherited_declarations(doc: &Document, id: NodeId) -> Vec<(Option<String>, String)> {
    let Some(parent) = doc.parent(id).filter(|&p| doc.node(p).kind.is_element()) else {
        return Vec::new();
    };
    if !doc.node(id).kind.is_element() {
        return Vec::new();
    }

    let mut used: HashSet<Option<&str>> = HashSet::new();
    for node in std::iter::once(id).chain(doc.descendants(id)) {
        if let NodeKind::Element {
            prefix,
            namespace,
            attributes,
            ..
        } = &doc.node(node).kind
        {
            if prefix.is_some() || namespace.is_some() {
                used.insert(prefix.as_deref());
            }
            for attr in attributes.iter().filter(|a| !a.is_namespace_decl()) {
                if let Some(p) = attr.prefix.as_deref() {
                    used.insert(Some(p));
                }
            }
        }
    }

    let declared_here: HashSet<Option<&str>> = doc
        .attributes(id)
        .iter()
        .filter_map(|a| a.declared_prefix())
        .collect();

    doc.in_scope_namespaces(parent)
        .into_iter()
        .filter(|(prefix, uri)| {
            let p = prefix.as_deref();
            used.contains(&p) && !declared_here.contains(&p) && uri != XML_NAMESPACE
        })
        .collect()
}

/// Returns `true` if the element contains other elements and no
/// significant text, so indentation cannot change its content.
fn is_element_only(doc: &Document, id: NodeId) -> bool {
    let mut has_element_child = false;
    for child in doc.children(id) {
        match &doc.node(child).kind {
            NodeKind::Element { .. } => has_element_child = true,
            NodeKind::Text { content } if !content.trim().is_empty() => return false,
            NodeKind::CData { .. } => return false,
            _ => {}
        }
    }
    has_element_child
}

fn is_blank_text(doc: &Document, id: NodeId) -> bool {
    matches!(&doc.node(id).kind, NodeKind::Text { content } if content.trim().is_empty())
}

struct Writer<'o> {
    out: &'o mut String,
    indent: bool,
    indent_str: String,
}

impl<'o> Writer<'o> {
    fn new(out: &'o mut String, options: &SerializeOptions) -> Self {
        Self {
            out,
            indent: options.indent,
            indent_str: options.indent_str.clone(),
        }
    }

    fn pad(&mut self, depth: usize, pretty: bool) {
        if pretty {
            for _ in 0..depth {
                self.out.push_str(&self.indent_str);
            }
        }
    }

    fn newline(&mut self, pretty: bool) {
        if pretty {
            self.out.push('\n');
        }
    }

    /// Writes one node. `pretty` is set when the node sits in an
    /// element-only context and indentation is enabled.
    fn node(
        &mut self,
        doc: &Document,
        id: NodeId,
        depth: usize,
        pretty: bool,
        extra_ns: &[(Option<String>, String)],
    ) {
        match &doc.node(id).kind {
            NodeKind::Element {
                name,
                prefix,
                attributes,
                ..
            } => {
                self.pad(depth, pretty);
                self.out.push('<');
                write_qname(self.out, prefix.as_deref(), name);

                for (ns_prefix, uri) in extra_ns {
                    match ns_prefix {
                        Some(p) => {
                            self.out.push_str(" xmlns:");
                            self.out.push_str(p);
                        }
                        None => self.out.push_str(" xmlns"),
                    }
                    self.out.push_str("=\"");
                    write_escaped_attr(self.out, uri);
                    self.out.push('"');
                }
                for attr in attributes {
                    self.out.push(' ');
                    write_qname(self.out, attr.prefix.as_deref(), &attr.name);
                    self.out.push_str("=\"");
                    write_escaped_attr(self.out, &attr.value);
                    self.out.push('"');
                }

                if doc.first_child(id).is_none() {
                    self.out.push_str("/>");
                    self.newline(pretty);
                    return;
                }

                self.out.push('>');
                let element_only = self.indent && is_element_only(doc, id);
                self.newline(element_only);
                for child in doc.children(id) {
                    if element_only && is_blank_text(doc, child) {
                        continue;
                    }
                    self.node(doc, child, depth + 1, element_only, &[]);
                }
                self.pad(depth, element_only);
                self.out.push_str("</");
                write_qname(self.out, prefix.as_deref(), name);
                self.out.push('>');
                self.newline(pretty);
            }
            NodeKind::Text { content } => write_escaped_text(self.out, content),
            NodeKind::CData { content } => {
                self.out.push_str("<![CDATA[");
                // A literal "]]>" must be split across two sections.
                self.out.push_str(&content.replace("]]>", "]]]]><![CDATA[>"));
                self.out.push_str("]]>");
            }
            NodeKind::Comment { content } => {
                self.pad(depth, pretty);
                self.out.push_str("<!--");
                self.out.push_str(content);
                self.out.push_str("-->");
                self.newline(pretty);
            }
            NodeKind::ProcessingInstruction { target, data } => {
                self.pad(depth, pretty);
                self.out.push_str("<?");
                self.out.push_str(target);
                if let Some(d) = data {
                    self.out.push(' ');
                    self.out.push_str(d);
                }
                self.out.push_str("?>");
                self.newline(pretty);
            }
            NodeKind::DocumentType {
                name,
                system_id,
                public_id,
            } => {
                self.out.push_str("<!DOCTYPE ");
                self.out.push_str(name);
                match (public_id, system_id) {
                    (Some(pub_id), Some(sys_id)) => {
                        self.out.push_str(&format!(" PUBLIC \"{pub_id}\" \"{sys_id}\""));
                    }
                    (Some(pub_id), None) => {
                        self.out.push_str(&format!(" PUBLIC \"{pub_id}\""));
                    }
                    (None, Some(sys_id)) => {
                        self.out.push_str(&format!(" SYSTEM \"{sys_id}\""));
                    }
                    (None, None) => {}
                }
                self.out.push('>');
                self.newline(pretty);
            }
            NodeKind::Document => {
                for child in doc.children(id) {
                    self.node(doc, child, depth, pretty, &[]);
                }
            }
        }
    }
}

fn write_qname(out: &mut String, prefix: Option<&str>, name: &str) {
    if let Some(p) = prefix {
        out.push_str(p);
        out.push(':');
    }
    out.push_str(name);
}

/// Writes a hexadecimal character reference (`&#xHH;`).
fn write_hex_char_ref(out: &mut String, ch: char) {
    use std::fmt::Write;
    let _ = write!(out, "&#x{:X};", ch as u32);
}

/// Escapes text content: `<`, `>`, `&` become entity references, `\r` and
/// other control characters become character references.
fn write_escaped_text(out: &mut String, text: &str) {
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\r' => out.push_str("&#13;"),
            '\t' | '\n' => out.push(ch),
            c if (c as u32) < 0x20 => write_hex_char_ref(out, c),
            _ => out.push(ch),
        }
    }
}

/// Escapes an attribute value for a double-quoted attribute. Whitespace
/// characters are written as references so they survive normalization.
fn write_escaped_attr(out: &mut String, text: &str) {
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\t' => out.push_str("&#9;"),
            '\n' => out.push_str("&#10;"),
            '\r' => out.push_str("&#13;"),
            c if (c as u32) < 0x20 => write_hex_char_ref(out, c),
            _ => out.push(ch),
        }
    }
}
