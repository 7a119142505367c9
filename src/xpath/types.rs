//! `XPath` 1.0 value type system.
//!
//! The four core data types of the `XPath` 1.0 data model (boolean, number,
//! string, node-set), the node type used in node-sets, and the error type
//! shared by the compiler and the evaluator.

use std::fmt;

use crate::tree::{Document, NodeId, NodeKind};

// ---------------------------------------------------------------------------
// XPathNode
// ---------------------------------------------------------------------------

/// A node selected by an `XPath` expression.
///
/// Attributes are not tree nodes in the arena, so an attribute node is
/// addressed by its owner element and its index in the owner's attribute
/// list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum XPathNode {
    /// A node stored in the document tree.
    Tree(NodeId),
    /// The attribute at `index` on the element `owner`.
    Attribute(NodeId, usize),
}

impl XPathNode {
    /// Returns the tree node, or `None` for an attribute.
    #[must_use]
    pub fn as_tree(self) -> Option<NodeId> {
        match self {
            Self::Tree(id) => Some(id),
            Self::Attribute(..) => None,
        }
    }

    /// The tree node this node lives on: itself, or an attribute's owner.
    #[must_use]
    pub fn owner(self) -> NodeId {
        match self {
            Self::Tree(id) | Self::Attribute(id, _) => id,
        }
    }

    /// Computes the string-value of the node (`XPath` 1.0 section 5).
    ///
    /// - document / element: concatenation of all descendant text
    /// - text, CDATA, comment: the content
    /// - processing instruction: the data
    /// - attribute: the value
    #[must_use]
    pub fn string_value(self, doc: &Document) -> String {
        match self {
            Self::Attribute(owner, index) => doc
                .attributes(owner)
                .get(index)
                .map(|a| a.value.clone())
                .unwrap_or_default(),
            Self::Tree(id) => match &doc.node(id).kind {
                NodeKind::Document | NodeKind::Element { .. } => doc.text_content(id),
                NodeKind::Text { content }
                | NodeKind::CData { content }
                | NodeKind::Comment { content } => content.clone(),
                NodeKind::ProcessingInstruction { data, .. } => data.clone().unwrap_or_default(),
                NodeKind::DocumentType { .. } => String::new(),
            },
        }
    }
}

impl From<NodeId> for XPathNode {
    fn from(id: NodeId) -> Self {
        Self::Tree(id)
    }
}

// ---------------------------------------------------------------------------
// XPathValue
// ---------------------------------------------------------------------------

/// An `XPath` 1.0 value.
///
/// Every expression evaluates to one of these variants.
#[derive(Debug, Clone)]
pub enum XPathValue {
    /// A boolean value.
    Boolean(bool),

    /// An IEEE 754 double, including NaN, infinities and negative zero.
    Number(f64),

    /// A string.
    String(String),

    /// Nodes in document order without duplicates.
    NodeSet(Vec<XPathNode>),
}

impl XPathValue {
    /// Converts this value to a boolean (`XPath` 1.0 section 4.3).
    #[must_use]
    pub fn to_boolean(&self) -> bool {
        match self {
            Self::Boolean(b) => *b,
            Self::Number(n) => *n != 0.0 && !n.is_nan(),
            Self::String(s) => !s.is_empty(),
            Self::NodeSet(nodes) => !nodes.is_empty(),
        }
    }

    /// Converts this value to a number (`XPath` 1.0 section 4.4).
    ///
    /// A node-set converts through the string-value of its first node, which
    /// needs the document it was selected from.
    #[must_use]
    pub fn to_number(&self, doc: &Document) -> f64 {
        match self {
            Self::Number(n) => *n,
            Self::Boolean(b) => f64::from(u8::from(*b)),
            Self::String(s) => parse_number(s),
            Self::NodeSet(nodes) => nodes
                .first()
                .map_or(f64::NAN, |n| parse_number(&n.string_value(doc))),
        }
    }

    /// Converts this value to a string (`XPath` 1.0 section 4.2).
    #[must_use]
    pub fn to_string_value(&self, doc: &Document) -> String {
        match self {
            Self::String(s) => s.clone(),
            Self::Boolean(b) => b.to_string(),
            Self::Number(n) => format_number(*n),
            Self::NodeSet(nodes) => nodes
                .first()
                .map(|n| n.string_value(doc))
                .unwrap_or_default(),
        }
    }

    /// Returns the node-set, or `None` for the other types.
    #[must_use]
    pub fn as_node_set(&self) -> Option<&[XPathNode]> {
        match self {
            Self::NodeSet(nodes) => Some(nodes),
            _ => None,
        }
    }

    /// Returns the type name used in error messages.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Boolean(_) => "boolean",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::NodeSet(_) => "node-set",
        }
    }
}

impl fmt::Display for XPathValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boolean(b) => write!(f, "{b}"),
            Self::Number(n) => f.write_str(&format_number(*n)),
            Self::String(s) => f.write_str(s),
            Self::NodeSet(nodes) => write!(f, "<node-set of {} nodes>", nodes.len()),
        }
    }
}

impl PartialEq for XPathValue {
    #[allow(clippy::float_cmp)]
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Boolean(a), Self::Boolean(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::NodeSet(a), Self::NodeSet(b)) => a == b,
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Number conversion
// ---------------------------------------------------------------------------

/// Formats a number per the `XPath` number-to-string rules.
///
/// NaN is `"NaN"`, infinities are `"Infinity"`/`"-Infinity"`, negative zero
/// is `"0"`, integral values have no decimal point, and no exponent notation
/// is ever produced.
#[must_use]
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_owned();
    }
    if n.is_infinite() {
        return if n.is_sign_positive() {
            "Infinity".to_owned()
        } else {
            "-Infinity".to_owned()
        };
    }
    if n == 0.0 {
        return "0".to_owned();
    }
    #[allow(clippy::float_cmp, clippy::cast_possible_truncation)]
    if n.fract() == 0.0 && n.abs() < 1e18 {
        return format!("{}", n as i64);
    }
    format!("{n}")
}

/// Parses a string with the `number()` grammar: optional whitespace, an
/// optional `-`, digits with an optional fraction, optional whitespace.
/// Anything else (exponents, `+`, hex) is NaN.
#[must_use]
pub fn parse_number(s: &str) -> f64 {
    let trimmed = s.trim_matches(|c| matches!(c, ' ' | '\t' | '\n' | '\r'));
    let digits = trimmed.strip_prefix('-').unwrap_or(trimmed);
    let mut seen_digit = false;
    let mut seen_dot = false;
    for b in digits.bytes() {
        match b {
            b'0'..=b'9' => seen_digit = true,
            b'.' if !seen_dot => seen_dot = true,
            _ => return f64::NAN,
        }
    }
    if !seen_digit {
        return f64::NAN;
    }
    trimmed.parse::<f64>().unwrap_or(f64::NAN)
}

// ---------------------------------------------------------------------------
// XPathError
// ---------------------------------------------------------------------------

/// An error raised while compiling or evaluating an `XPath` expression.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum XPathError {
    /// The expression is not valid `XPath` 1.0.
    #[error("XPath syntax error at position {position}: {message}")]
    Syntax {
        /// What went wrong.
        message: String,
        /// 0-based byte offset into the expression.
        position: usize,
    },

    /// A name test or variable used a prefix with no binding.
    #[error("unbound namespace prefix '{prefix}'")]
    UnknownNamespace {
        /// The unbound prefix.
        prefix: String,
    },

    /// A variable reference has no binding in the evaluation context.
    #[error("undefined variable: ${name}")]
    UndefinedVariable {
        /// The variable name without the `$`.
        name: String,
    },

    /// A function call names a function outside the core library.
    #[error("undefined function: {name}()")]
    UndefinedFunction {
        /// The function name as written.
        name: String,
    },

    /// A core function was called with the wrong number of arguments.
    #[error("invalid argument count for {function}(): expected {expected}, found {found}")]
    InvalidArgCount {
        /// The function name.
        function: &'static str,
        /// The accepted argument counts, e.g. `"2 or 3"`.
        expected: &'static str,
        /// The number of arguments given.
        found: usize,
    },

    /// An operand had the wrong type, e.g. a union of a string.
    #[error("type error: expected {expected}, found {found}")]
    TypeError {
        /// The required type.
        expected: &'static str,
        /// The type found.
        found: &'static str,
    },
}

#[cfg(test)]
#[allow(clippy::float_cmp, clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_to_boolean() {
        assert!(XPathValue::Boolean(true).to_boolean());
        assert!(!XPathValue::Number(0.0).to_boolean());
        assert!(!XPathValue::Number(f64::NAN).to_boolean());
        assert!(XPathValue::Number(-2.5).to_boolean());
        assert!(!XPathValue::String(String::new()).to_boolean());
        assert!(XPathValue::String("false".into()).to_boolean());
        assert!(!XPathValue::NodeSet(vec![]).to_boolean());
    }

    #[test]
    fn test_node_set_conversions_use_first_node() {
        let doc = Document::parse_str(r#"<r n="7"><a>12</a><a>13</a></r>"#).unwrap();
        let r = doc.root_element().unwrap();
        let a: Vec<XPathNode> = doc.children(r).map(XPathNode::Tree).collect();
        let set = XPathValue::NodeSet(a);
        assert_eq!(set.to_number(&doc), 12.0);
        assert_eq!(set.to_string_value(&doc), "12");
        assert!(XPathValue::NodeSet(vec![]).to_number(&doc).is_nan());

        let attr = XPathValue::NodeSet(vec![XPathNode::Attribute(r, 0)]);
        assert_eq!(attr.to_string_value(&doc), "7");
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(1.0), "1");
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(0.5), "0.5");
        assert_eq!(format_number(-3.25), "-3.25");
        assert_eq!(format_number(f64::NAN), "NaN");
        assert_eq!(format_number(f64::INFINITY), "Infinity");
        assert_eq!(format_number(f64::NEG_INFINITY), "-Infinity");
        assert_eq!(format_number(0.000_000_1), "0.0000001");
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number(" 42 "), 42.0);
        assert_eq!(parse_number("-1.5"), -1.5);
        assert_eq!(parse_number(".5"), 0.5);
        assert_eq!(parse_number("5."), 5.0);
        assert!(parse_number("1e3").is_nan());
        assert!(parse_number("+1").is_nan());
        assert!(parse_number("abc").is_nan());
        assert!(parse_number("").is_nan());
        assert!(parse_number("-").is_nan());
        assert!(parse_number("1.2.3").is_nan());
    }

    #[test]
    fn test_display() {
        assert_eq!(XPathValue::Boolean(false).to_string(), "false");
        assert_eq!(XPathValue::Number(3.0).to_string(), "3");
        assert_eq!(XPathValue::NodeSet(vec![]).to_string(), "<node-set of 0 nodes>");
    }

    #[test]
    fn test_error_display() {
        let err = XPathError::InvalidArgCount {
            function: "substring",
            expected: "2 or 3",
            found: 1,
        };
        assert_eq!(
            err.to_string(),
            "invalid argument count for substring(): expected 2 or 3, found 1"
        );
        let err = XPathError::Syntax {
            message: "unterminated string literal".into(),
            position: 4,
        };
        assert_eq!(
            err.to_string(),
            "XPath syntax error at position 4: unterminated string literal"
        );
    }
}
