//! Attribute and text accessors.
//!
//! The numeric accessors follow C `atoi`/`atof` conventions: the longest
//! numeric prefix is parsed after leading whitespace, and a missing value or
//! a value with no numeric prefix reads as `0`.

use super::{Element, NodeType};
use crate::error::{Error, Result};
use crate::parser::input::{is_ncname, is_qname, is_xml_char, split_name};
use crate::serial;
use crate::tree::{Attribute, Document, NodeId, NodeKind, XML_NAMESPACE};

impl Element {
    /// Reads an attribute.
    ///
    /// Without a namespace, `name` matches an attribute's qualified name or,
    /// failing that, its local name. With a namespace (a URI or an in-scope
    /// prefix), `name` is a local name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NodeInvalid`] for a stale handle.
    pub fn attribute(&self, name: &str, namespace: Option<&str>) -> Result<Option<String>> {
        self.read(|tree, id| Ok(find_attribute(tree, id, name, namespace).map(|a| a.value.clone())))
    }

    /// Reads an attribute as an integer; `0` when absent or not numeric.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NodeInvalid`] for a stale handle.
    pub fn attribute_as_int(&self, name: &str, namespace: Option<&str>) -> Result<i64> {
        Ok(self
            .attribute(name, namespace)?
            .map_or(0, |v| parse_leading_int(&v)))
    }

    /// Reads an attribute as a float; `0.0` when absent or not numeric.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NodeInvalid`] for a stale handle.
    pub fn attribute_as_double(&self, name: &str, namespace: Option<&str>) -> Result<f64> {
        Ok(self
            .attribute(name, namespace)?
            .map_or(0.0, |v| parse_leading_double(&v)))
    }

    /// Qualified attribute names in declaration order, namespace
    /// declarations excluded.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NodeInvalid`] for a stale handle.
    pub fn attribute_names(&self) -> Result<Vec<String>> {
        self.read(|tree, id| {
            Ok(tree
                .attributes(id)
                .iter()
                .filter(|a| !a.is_namespace_decl())
                .map(Attribute::qualified_name)
                .collect())
        })
    }

    /// Creates or overwrites an attribute.
    ///
    /// Without a namespace, `name` may be a qualified name whose prefix is
    /// in scope. With a namespace, `name` is a local name and the namespace
    /// (URI or prefix) must be declared on this element or an ancestor.
    ///
    /// # Errors
    ///
    /// - [`Error::NodeInvalid`] for a stale handle.
    /// - [`Error::InvalidOperation`] when the node is not an element, or
    ///   the value holds a character XML cannot represent.
    /// - [`Error::InvalidName`] for a malformed name or an `xmlns` name.
    /// - [`Error::UnknownNamespace`] for an undeclared namespace or prefix.
    pub fn set_attribute(&self, name: &str, namespace: Option<&str>, value: &str) -> Result<()> {
        self.write(|tree, id| {
            if !tree.node(id).kind.is_element() {
                return Err(Error::InvalidOperation("attributes can only be set on elements"));
            }
            check_chars(value)?;
            let attr = build_attribute(tree, id, name, namespace, value)?;
            tree.set_attribute(id, attr);
            Ok(())
        })
    }

    /// Removes every attribute with this name; a prefixed name only removes
    /// the attribute in that prefix's namespace. Absent attributes are
    /// ignored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NodeInvalid`] for a stale handle.
    pub fn remove_attribute(&self, name: &str) -> Result<()> {
        self.write(|tree, id| {
            match split_name(name) {
                (Some(prefix), local) => {
                    if let Some(uri) = tree.lookup_namespace_uri(id, Some(prefix)).map(str::to_owned) {
                        tree.remove_attribute(id, local, Some(&uri));
                    }
                }
                (None, local) => {
                    tree.remove_attribute(id, local, None);
                }
            }
            Ok(())
        })
    }

    /// Removes the attribute with this local name in a namespace (URI or
    /// in-scope prefix). Absent attributes are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NodeInvalid`] for a stale handle.
    pub fn remove_attribute_ns(&self, name: &str, namespace: &str) -> Result<()> {
        self.write(|tree, id| {
            let uri = super::resolve_namespace_arg(tree, id, namespace);
            tree.remove_attribute(id, name, Some(&uri));
            Ok(())
        })
    }

    /// Concatenated text of all descendant text and CDATA nodes. For text,
    /// CDATA, comment and processing-instruction handles, the node's own
    /// content.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NodeInvalid`] for a stale handle.
    pub fn text(&self) -> Result<String> {
        self.read(|tree, id| {
            Ok(match &tree.node(id).kind {
                NodeKind::Element { .. } => tree.text_content(id),
                _ => tree.node_text(id).unwrap_or_default().to_owned(),
            })
        })
    }

    /// [`text`](Self::text) parsed as an integer; `0` when not numeric.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NodeInvalid`] for a stale handle.
    pub fn text_as_int(&self) -> Result<i64> {
        Ok(parse_leading_int(&self.text()?))
    }

    /// [`text`](Self::text) parsed as a float; `0.0` when not numeric.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NodeInvalid`] for a stale handle.
    pub fn text_as_double(&self) -> Result<f64> {
        Ok(parse_leading_double(&self.text()?))
    }

    /// Replaces the content of the node. An element loses all its children
    /// and gains a single text node (none for an empty string).
    ///
    /// # Errors
    ///
    /// Returns [`Error::NodeInvalid`] for a stale handle and
    /// [`Error::InvalidOperation`] for processing instructions, for a
    /// character XML cannot represent, and for comment text containing
    /// `--` or ending in `-`.
    pub fn set_text(&self, value: &str) -> Result<()> {
        self.write(|tree, id| {
            check_chars(value)?;
            match NodeType::of(&tree.node(id).kind) {
                Some(NodeType::Element) => {
                    tree.remove_children(id);
                    if !value.is_empty() {
                        let text = tree.create_node(NodeKind::text(value));
                        tree.append_child(id, text);
                    }
                    Ok(())
                }
                Some(NodeType::Comment) if value.contains("--") || value.ends_with('-') => Err(
                    Error::InvalidOperation("comment text cannot contain '--' or end with '-'"),
                ),
                Some(NodeType::Text | NodeType::CData | NodeType::Comment) => {
                    tree.set_node_text(id, value);
                    Ok(())
                }
                _ => Err(Error::InvalidOperation("node has no text content")),
            }
        })
    }

    /// Serializes the node with its own tags.
    ///
    /// Namespace prefixes declared on ancestors are redeclared, so the
    /// output parses on its own, within the parser's depth limit (see
    /// [`XmlDocument::to_xml`](super::XmlDocument::to_xml)).
    ///
    /// # Errors
    ///
    /// Returns [`Error::NodeInvalid`] for a stale handle.
    pub fn xml(&self) -> Result<String> {
        self.read(|tree, id| Ok(serial::serialize_node(tree, id, true)))
    }

    /// Serializes the node's children only.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NodeInvalid`] for a stale handle.
    pub fn inner_xml(&self) -> Result<String> {
        self.read(|tree, id| Ok(serial::serialize_node(tree, id, false)))
    }
}

/// Rejects characters outside the XML `Char` production, which cannot be
/// written even as character references.
pub(super) fn check_chars(value: &str) -> Result<()> {
    if value.chars().all(is_xml_char) {
        Ok(())
    } else {
        Err(Error::InvalidOperation(
            "text contains a character that XML cannot represent",
        ))
    }
}

fn find_attribute<'t>(
    tree: &'t Document,
    id: NodeId,
    name: &str,
    namespace: Option<&str>,
) -> Option<&'t Attribute> {
    let attrs = tree.attributes(id).iter().filter(|a| !a.is_namespace_decl());
    match namespace {
        Some(ns) => {
            let uri = super::resolve_namespace_arg(tree, id, ns);
            attrs
                .filter(|a| a.namespace.as_deref() == Some(uri.as_str()))
                .find(|a| a.name == name)
        }
        None => attrs
            .clone()
            .find(|a| a.qualified_name() == name)
            .or_else(|| attrs.clone().find(|a| a.name == name)),
    }
}

/// Validates a name/namespace pair and resolves it to a stored attribute.
fn build_attribute(
    tree: &Document,
    id: NodeId,
    name: &str,
    namespace: Option<&str>,
    value: &str,
) -> Result<Attribute> {
    let invalid = || Error::InvalidName(name.to_owned());
    let (prefix, local) = match namespace {
        Some(ns) => {
            if !is_ncname(name) {
                return Err(invalid());
            }
            let (prefix, _) = declared_binding(tree, id, ns)
                .ok_or_else(|| Error::UnknownNamespace(ns.to_owned()))?;
            (Some(prefix), name)
        }
        None => {
            if !is_qname(name) {
                return Err(invalid());
            }
            let (prefix, local) = split_name(name);
            (prefix.map(str::to_owned), local)
        }
    };

    if prefix.as_deref() == Some("xmlns") || (prefix.is_none() && local == "xmlns") {
        return Err(invalid());
    }

    let namespace = match &prefix {
        Some(p) => Some(
            tree.lookup_namespace_uri(id, Some(p))
                .ok_or_else(|| Error::UnknownNamespace(p.clone()))?
                .to_owned(),
        ),
        None => None,
    };

    Ok(Attribute {
        name: local.to_owned(),
        value: value.to_owned(),
        prefix,
        namespace,
    })
}

/// Finds a prefixed binding for a namespace argument in scope at `id`.
///
/// The argument is first tried as a prefix, then as a URI. Returns the
/// prefix and URI.
pub(super) fn declared_binding(tree: &Document, id: NodeId, arg: &str) -> Option<(String, String)> {
    if let Some(uri) = tree.lookup_namespace_uri(id, Some(arg)) {
        return Some((arg.to_owned(), uri.to_owned()));
    }
    if arg == XML_NAMESPACE {
        return Some(("xml".to_owned(), arg.to_owned()));
    }
    tree.in_scope_namespaces(id)
        .into_iter()
        .find_map(|(prefix, uri)| match prefix {
            Some(p) if uri == arg => Some((p, uri)),
            _ => None,
        })
}

/// `atoi`-style parse: optional whitespace, sign and digits. Saturates on
/// overflow.
pub(crate) fn parse_leading_int(s: &str) -> i64 {
    let s = s.trim_start();
    let (negative, digits) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };
    let mut value: i64 = 0;
    for b in digits.bytes().take_while(u8::is_ascii_digit) {
        let digit = i64::from(b - b'0');
        value = value.saturating_mul(10);
        value = if negative {
            value.saturating_sub(digit)
        } else {
            value.saturating_add(digit)
        };
    }
    value
}

/// `atof`-style parse of the longest decimal prefix:
/// `[sign] digits [. digits] [(e|E) [sign] digits]`.
pub(crate) fn parse_leading_double(s: &str) -> f64 {
    let s = s.trim_start();
    let bytes = s.as_bytes();
    let digits_from = |mut i: usize| {
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        i
    };

    let mut end = usize::from(matches!(bytes.first(), Some(b'+' | b'-')));
    let int_end = digits_from(end);
    let mut mantissa_digits = int_end - end;
    end = int_end;
    if bytes.get(end) == Some(&b'.') {
        let frac_end = digits_from(end + 1);
        mantissa_digits += frac_end - end - 1;
        end = frac_end;
    }
    if mantissa_digits == 0 {
        return 0.0;
    }
    if matches!(bytes.get(end), Some(b'e' | b'E')) {
        let mut exp = end + 1;
        if matches!(bytes.get(exp), Some(b'+' | b'-')) {
            exp += 1;
        }
        let exp_end = digits_from(exp);
        if exp_end > exp {
            end = exp_end;
        }
    }
    s[..end].parse().unwrap_or(0.0)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::element::{Mode, XmlDocument};
    use pretty_assertions::assert_eq;

    fn root(text: &str) -> Element {
        XmlDocument::parse_str(text, Mode::Xml).unwrap().root().unwrap()
    }

    #[test]
    fn test_parse_leading_int() {
        assert_eq!(parse_leading_int("42"), 42);
        assert_eq!(parse_leading_int("  -17px"), -17);
        assert_eq!(parse_leading_int("+8"), 8);
        assert_eq!(parse_leading_int("3.9"), 3);
        assert_eq!(parse_leading_int("abc"), 0);
        assert_eq!(parse_leading_int(""), 0);
        assert_eq!(parse_leading_int("99999999999999999999999"), i64::MAX);
        assert_eq!(parse_leading_int("-99999999999999999999999"), i64::MIN);
    }

    #[test]
    fn test_parse_leading_double() {
        assert_eq!(parse_leading_double("2.5"), 2.5);
        assert_eq!(parse_leading_double(" -1.5e3kg"), -1500.0);
        assert_eq!(parse_leading_double(".5"), 0.5);
        assert_eq!(parse_leading_double("7."), 7.0);
        assert_eq!(parse_leading_double("1e"), 1.0);
        assert_eq!(parse_leading_double("e5"), 0.0);
        assert_eq!(parse_leading_double("-"), 0.0);
        assert_eq!(parse_leading_double("NaN"), 0.0);
    }

    #[test]
    fn test_attribute_lookup() {
        let r = root(r#"<a xmlns:p="urn:p" id="1" p:id="2" p:only="3"/>"#);
        assert_eq!(r.attribute("id", None).unwrap().as_deref(), Some("1"));
        assert_eq!(r.attribute("p:id", None).unwrap().as_deref(), Some("2"));
        assert_eq!(r.attribute("only", None).unwrap().as_deref(), Some("3"));
        assert_eq!(r.attribute("id", Some("urn:p")).unwrap().as_deref(), Some("2"));
        assert_eq!(r.attribute("id", Some("p")).unwrap().as_deref(), Some("2"));
        assert_eq!(r.attribute("missing", None).unwrap(), None);
        assert_eq!(r.attribute("p", None).unwrap(), None);
        assert_eq!(r.attribute_names().unwrap(), vec!["id", "p:id", "p:only"]);
    }

    #[test]
    fn test_numeric_accessors() {
        let r = root(r#"<a n="12abc" f="3.25" bad="x"><v> 42 </v><w>1e2</w></a>"#);
        assert_eq!(r.attribute_as_int("n", None).unwrap(), 12);
        assert_eq!(r.attribute_as_double("f", None).unwrap(), 3.25);
        assert_eq!(r.attribute_as_int("bad", None).unwrap(), 0);
        assert_eq!(r.attribute_as_int("absent", None).unwrap(), 0);
        assert_eq!(r.attribute_as_double("absent", None).unwrap(), 0.0);
        assert_eq!(r.child("v").unwrap().unwrap().text_as_int().unwrap(), 42);
        assert_eq!(r.child("w").unwrap().unwrap().text_as_double().unwrap(), 100.0);
    }

    #[test]
    fn test_set_attribute() {
        let r = root(r#"<a xmlns:p="urn:p" id="1"/>"#);
        r.set_attribute("id", None, "99").unwrap();
        r.set_attribute("new", None, "x").unwrap();
        r.set_attribute("k", Some("urn:p"), "v").unwrap();
        r.set_attribute("j", Some("p"), "w").unwrap();
        r.set_attribute("p:i", None, "u").unwrap();
        assert_eq!(r.attribute("id", None).unwrap().as_deref(), Some("99"));
        assert_eq!(
            r.attribute_names().unwrap(),
            vec!["id", "new", "p:k", "p:j", "p:i"]
        );
        assert_eq!(
            r.xml().unwrap(),
            r#"<a xmlns:p="urn:p" id="99" new="x" p:k="v" p:j="w" p:i="u"/>"#
        );
    }

    #[test]
    fn test_set_attribute_xml_namespace() {
        let r = root("<a/>");
        r.set_attribute("lang", Some(XML_NAMESPACE), "en").unwrap();
        assert_eq!(r.attribute("xml:lang", None).unwrap().as_deref(), Some("en"));
    }

    #[test]
    fn test_set_attribute_errors() {
        let r = root(r#"<a xmlns="urn:default"/>"#);
        assert!(matches!(
            r.set_attribute("k", Some("urn:nowhere"), "v"),
            Err(Error::UnknownNamespace(ns)) if ns == "urn:nowhere"
        ));
        // The default namespace has no prefix to qualify an attribute with.
        assert!(matches!(
            r.set_attribute("k", Some("urn:default"), "v"),
            Err(Error::UnknownNamespace(_))
        ));
        assert!(matches!(
            r.set_attribute("q:k", None, "v"),
            Err(Error::UnknownNamespace(p)) if p == "q"
        ));
        assert!(matches!(r.set_attribute("1bad", None, "v"), Err(Error::InvalidName(_))));
        assert!(matches!(r.set_attribute("a:b", Some("urn:x"), "v"), Err(Error::InvalidName(_))));
        assert!(matches!(r.set_attribute("xmlns", None, "v"), Err(Error::InvalidName(_))));
    }

    #[test]
    fn test_set_attribute_on_text_node() {
        let r = root("<a>t</a>");
        let text = r.document().with_tree(|t| t.first_child(r.node_id())).unwrap();
        let text = r.document().register_or_reuse(text).unwrap();
        assert!(matches!(
            text.set_attribute("k", None, "v"),
            Err(Error::InvalidOperation(_))
        ));
    }

    #[test]
    fn test_remove_attribute() {
        let r = root(r#"<a xmlns:p="urn:p" k="1" p:k="2" other="3"/>"#);
        r.remove_attribute("p:k").unwrap();
        assert_eq!(r.attribute_names().unwrap(), vec!["k", "other"]);
        r.remove_attribute("absent").unwrap();
        r.remove_attribute("k").unwrap();
        assert_eq!(r.attribute_names().unwrap(), vec!["other"]);
        r.set_attribute("z", Some("p"), "4").unwrap();
        r.remove_attribute_ns("z", "urn:p").unwrap();
        assert_eq!(r.attribute_names().unwrap(), vec!["other"]);
        // Declarations survive.
        assert_eq!(r.xml().unwrap(), r#"<a xmlns:p="urn:p" other="3"/>"#);
    }

    #[test]
    fn test_text_concatenates_descendants() {
        let r = root("<a>one<b>two<![CDATA[<three>]]></b><!--no-->four</a>");
        assert_eq!(r.text().unwrap(), "onetwo<three>four");
    }

    #[test]
    fn test_set_text() {
        let r = root("<a>old<b/></a>");
        let b = r.child("b").unwrap().unwrap();
        r.set_text("new & improved").unwrap();
        assert_eq!(r.xml().unwrap(), "<a>new &amp; improved</a>");
        assert!(!b.is_valid());
        r.set_text("").unwrap();
        assert_eq!(r.xml().unwrap(), "<a/>");
    }

    #[test]
    fn test_unrepresentable_text_is_rejected() {
        let doc = XmlDocument::parse_str("<a k='v'>t<!--c--></a>", Mode::Xml).unwrap();
        let r = doc.root().unwrap();
        for bad in ["\u{1}", "a\u{1F}b", "\u{FFFE}"] {
            assert!(matches!(r.set_text(bad), Err(Error::InvalidOperation(_))), "{bad:?}");
            assert!(matches!(
                r.set_attribute("k", None, bad),
                Err(Error::InvalidOperation(_))
            ));
            assert!(matches!(r.add_text(bad), Err(Error::InvalidOperation(_))));
        }
        let comment = r.children_with_xpath("comment()").unwrap().remove(0);
        for bad in ["a--b", "trailing-", "-"] {
            assert!(
                matches!(comment.set_text(bad), Err(Error::InvalidOperation(_))),
                "{bad:?}"
            );
        }

        comment.set_text("- single -dash").unwrap();
        r.set_attribute("k", None, "tab\tnew\nline\r").unwrap();
        r.add_text("\t\r\n").unwrap();
        let reparsed = XmlDocument::parse_str(&doc.to_xml(), Mode::Xml).unwrap();
        let again = reparsed.root().unwrap();
        assert_eq!(
            again.attribute("k", None).unwrap().as_deref(),
            Some("tab\tnew\nline\r")
        );
        assert_eq!(again.text().unwrap(), "t\t\r\n");
        let comment = again.children_with_xpath("comment()").unwrap().remove(0);
        assert_eq!(comment.text().unwrap(), "- single -dash");
    }

    #[test]
    fn test_xml_and_inner_xml() {
        let r = root(r#"<a xmlns:p="urn:p"><p:b k="1">x</p:b><c/></a>"#);
        assert_eq!(r.inner_xml().unwrap(), r#"<p:b xmlns:p="urn:p" k="1">x</p:b><c/>"#);
        let b = r.child("b").unwrap().unwrap();
        assert_eq!(b.xml().unwrap(), r#"<p:b xmlns:p="urn:p" k="1">x</p:b>"#);
        assert_eq!(b.inner_xml().unwrap(), "x");
    }
}
