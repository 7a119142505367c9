//! `XPath` 1.0 query language.
//!
//! Expressions are compiled once against a set of prefix bindings and then
//! evaluated against any node of a [`Document`].
//!
//! # Quick Start
//!
//! ```
//! use xmlquill::tree::Document;
//! use xmlquill::xpath::evaluate;
//!
//! let doc = Document::parse_str("<root><a>1</a><b>2</b></root>").unwrap();
//! let root = doc.root_element().unwrap();
//! let result = evaluate(&doc, root, "count(*)").unwrap();
//! assert_eq!(result.to_number(&doc), 2.0);
//! ```
//!
//! # Name Tests and Prefixes
//!
//! Prefixes in name tests and variable references are resolved at compile
//! time through [`NamespaceBindings`]; only `xml` is bound by default. An
//! unprefixed name test matches nodes in no namespace, so elements under a
//! default namespace need an explicit prefix binding.
//!
//! # Known Limitations
//!
//! - The `namespace::` axis always selects nothing.
//!
//! # Submodules
//!
//! - [`ast`]: syntax tree for compiled expressions.
//! - [`lexer`]: tokenizer.
//! - [`parser`]: recursive descent parser.
//! - [`types`]: values, nodes and errors.
//! - [`eval`]: evaluator.

pub mod ast;
pub mod eval;
pub mod lexer;
pub mod parser;
pub mod types;

use std::collections::HashMap;
use std::fmt;

pub use eval::XPathContext;
pub use types::{format_number, parse_number, XPathError, XPathNode, XPathValue};

use crate::tree::{Document, NodeId, XML_NAMESPACE};
use ast::Expr;

/// Prefix-to-URI bindings used when compiling an expression.
///
/// # Examples
///
/// ```
/// use xmlquill::xpath::NamespaceBindings;
///
/// let ns = NamespaceBindings::new().with("svg", "http://www.w3.org/2000/svg");
/// assert_eq!(ns.resolve("svg"), Some("http://www.w3.org/2000/svg"));
/// assert!(ns.resolve("xml").is_some());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceBindings {
    prefixes: HashMap<String, String>,
}

impl NamespaceBindings {
    /// Creates bindings holding only the `xml` prefix.
    #[must_use]
    pub fn new() -> Self {
        let mut prefixes = HashMap::new();
        prefixes.insert("xml".to_owned(), XML_NAMESPACE.to_owned());
        Self { prefixes }
    }

    /// Binds `prefix` to `uri`, replacing any earlier binding.
    pub fn bind(&mut self, prefix: impl Into<String>, uri: impl Into<String>) {
        self.prefixes.insert(prefix.into(), uri.into());
    }

    /// Builder form of [`bind`](Self::bind).
    #[must_use]
    pub fn with(mut self, prefix: impl Into<String>, uri: impl Into<String>) -> Self {
        self.bind(prefix, uri);
        self
    }

    /// Returns the URI bound to `prefix`.
    #[must_use]
    pub fn resolve(&self, prefix: &str) -> Option<&str> {
        self.prefixes.get(prefix).map(String::as_str)
    }

    /// Resolves `prefix`, failing with [`XPathError::UnknownNamespace`].
    pub(crate) fn require(&self, prefix: &str) -> Result<&str, XPathError> {
        self.resolve(prefix)
            .ok_or_else(|| XPathError::UnknownNamespace {
                prefix: prefix.to_owned(),
            })
    }

    /// Iterates over `(prefix, uri)` pairs in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.prefixes.iter().map(|(p, u)| (p.as_str(), u.as_str()))
    }

    /// A stable textual form, used to key compiled-query caches.
    pub(crate) fn cache_key(&self) -> String {
        let mut pairs: Vec<_> = self.iter().collect();
        pairs.sort_unstable();
        let mut key = String::new();
        for (prefix, uri) in pairs {
            key.push_str(prefix);
            key.push('=');
            key.push_str(uri);
            key.push('\u{0}');
        }
        key
    }
}

impl Default for NamespaceBindings {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Into<String>, U: Into<String>> FromIterator<(P, U)> for NamespaceBindings {
    fn from_iter<I: IntoIterator<Item = (P, U)>>(iter: I) -> Self {
        let mut bindings = Self::new();
        for (prefix, uri) in iter {
            bindings.bind(prefix, uri);
        }
        bindings
    }
}

/// A parsed expression with its prefixes already resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    source: String,
    expr: Expr,
}

impl CompiledQuery {
    /// The expression text this query was compiled from.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }

    #[must_use]
    pub fn expr(&self) -> &Expr {
        &self.expr
    }
}

impl fmt::Display for CompiledQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Compiles an expression.
///
/// # Errors
///
/// Returns [`XPathError::Syntax`] for malformed input,
/// [`XPathError::UnknownNamespace`] for unbound prefixes, and
/// [`XPathError::UndefinedFunction`] or [`XPathError::InvalidArgCount`]
/// for bad function calls.
pub fn compile(expression: &str, namespaces: &NamespaceBindings) -> Result<CompiledQuery, XPathError> {
    let expr = parser::parse(expression, namespaces)?;
    Ok(CompiledQuery {
        source: expression.to_owned(),
        expr,
    })
}

/// Compiles and evaluates an expression in one call, with default bindings.
///
/// For repeated evaluation, [`compile`] once and use
/// [`XPathContext::evaluate`].
///
/// # Examples
///
/// ```
/// use xmlquill::tree::Document;
/// use xmlquill::xpath::evaluate;
///
/// let doc = Document::parse_str("<root><child>Hello</child></root>").unwrap();
/// let root = doc.root_element().unwrap();
/// let result = evaluate(&doc, root, "string(child)").unwrap();
/// assert_eq!(result.to_string_value(&doc), "Hello");
/// ```
///
/// # Errors
///
/// Returns [`XPathError`] if the expression fails to compile or evaluate.
pub fn evaluate(
    doc: &Document,
    context_node: NodeId,
    expression: &str,
) -> Result<XPathValue, XPathError> {
    let query = compile(expression, &NamespaceBindings::new())?;
    XPathContext::new(doc, context_node).evaluate(&query)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_bindings() {
        let ns = NamespaceBindings::default();
        assert_eq!(ns.resolve("xml"), Some(XML_NAMESPACE));
        assert_eq!(ns.resolve("p"), None);
        assert_eq!(
            ns.require("p").unwrap_err(),
            XPathError::UnknownNamespace { prefix: "p".into() }
        );
    }

    #[test]
    fn test_cache_key_is_order_independent() {
        let a = NamespaceBindings::new().with("a", "urn:a").with("b", "urn:b");
        let b: NamespaceBindings = [("b", "urn:b"), ("a", "urn:a")].into_iter().collect();
        assert_eq!(a.cache_key(), b.cache_key());
        assert_ne!(a.cache_key(), NamespaceBindings::new().cache_key());
    }

    #[test]
    fn test_compile_keeps_source() {
        let q = compile("//a[@b]", &NamespaceBindings::new()).unwrap();
        assert_eq!(q.as_str(), "//a[@b]");
        assert_eq!(q.to_string(), "//a[@b]");
    }

    #[test]
    fn test_compile_rejects_unbound_prefix() {
        assert_eq!(
            compile("//svg:rect", &NamespaceBindings::new()).unwrap_err(),
            XPathError::UnknownNamespace {
                prefix: "svg".into()
            }
        );
    }

    #[test]
    fn test_evaluate_convenience() {
        let doc = Document::parse_str("<r><a/><a/></r>").unwrap();
        let r = doc.root_element().unwrap();
        assert_eq!(evaluate(&doc, r, "count(a)").unwrap(), XPathValue::Number(2.0));
    }
}
