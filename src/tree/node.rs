//! Node type definitions.
//!
//! The `NodeKind` enum carries the payload for each node type. Navigation
//! links (parent, children, siblings) live in `NodeData`, not here.

use super::Attribute;

/// The kind of a node and its associated data.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// The document node. There is exactly one per `Document`.
    Document,

    /// An element node, e.g., `<div class="x">`.
    Element {
        /// The element's local name.
        name: String,
        /// Namespace prefix (e.g., `"svg"` in `svg:rect`), if any.
        prefix: Option<String>,
        /// Namespace URI after resolution, if any.
        namespace: Option<String>,
        /// Attributes on this element, namespace declarations included.
        attributes: Vec<Attribute>,
    },

    /// A text node containing character data (references already decoded).
    Text {
        /// The text content.
        content: String,
    },

    /// A CDATA section, e.g., `<![CDATA[...]]>`.
    CData {
        /// The CDATA content (no escaping applied).
        content: String,
    },

    /// A comment node, e.g., `<!-- ... -->`.
    Comment {
        /// The comment text (without the delimiters).
        content: String,
    },

    /// A processing instruction, e.g., `<?target data?>`.
    ProcessingInstruction {
        /// The PI target (e.g., `"xml-stylesheet"`).
        target: String,
        /// The PI data, if any.
        data: Option<String>,
    },

    /// A document type declaration, e.g., `<!DOCTYPE html>`.
    ///
    /// The internal subset is not interpreted.
    DocumentType {
        /// The root element name declared in the DOCTYPE.
        name: String,
        /// The SYSTEM identifier, if any.
        system_id: Option<String>,
        /// The PUBLIC identifier, if any.
        public_id: Option<String>,
    },
}

impl NodeKind {
    /// Creates an element payload with no namespace and no attributes.
    #[must_use]
    pub fn element(name: impl Into<String>) -> Self {
        Self::Element {
            name: name.into(),
            prefix: None,
            namespace: None,
            attributes: Vec::new(),
        }
    }

    /// Creates a text payload.
    #[must_use]
    pub fn text(content: impl Into<String>) -> Self {
        Self::Text {
            content: content.into(),
        }
    }

    /// Returns `true` for element nodes.
    #[must_use]
    pub fn is_element(&self) -> bool {
        matches!(self, Self::Element { .. })
    }
}
