//! `XPath` 1.0 expression evaluator.
//!
//! Walks a compiled [`Expr`] against a [`Document`] and produces an
//! [`XPathValue`].
//!
//! # Evaluation Context
//!
//! Every expression is evaluated with respect to a context node, a context
//! position and size, and variable bindings. [`XPathContext`] holds the
//! document, the starting node and the variables; position and size travel
//! with each sub-evaluation.
//!
//! # Location Paths
//!
//! All 13 axes are supported. Candidates are produced in axis order, so
//! positional predicates on reverse axes count from the nearest node; each
//! step's result is then put back into document order with duplicates
//! removed. The namespace axis always selects nothing, since namespace
//! declarations are not modelled as nodes.

use std::cell::OnceCell;
use std::collections::{HashMap, HashSet};

use super::ast::{Axis, BinaryOp, Expr, Function, NodeTest, Step};
use super::types::{parse_number, XPathError, XPathNode, XPathValue};
use super::CompiledQuery;
use crate::tree::{Attribute, Document, NodeId, NodeKind, XML_NAMESPACE};

/// Evaluation context for compiled expressions.
///
/// # Examples
///
/// ```
/// use xmlquill::tree::Document;
/// use xmlquill::xpath::{compile, NamespaceBindings, XPathContext, XPathValue};
///
/// let doc = Document::parse_str("<r><a>1</a><a>2</a></r>").unwrap();
/// let query = compile("sum(a) * $k", &NamespaceBindings::new()).unwrap();
/// let mut ctx = XPathContext::new(&doc, doc.root_element().unwrap());
/// ctx.set_variable("k", XPathValue::Number(10.0));
/// assert_eq!(ctx.evaluate(&query).unwrap(), XPathValue::Number(30.0));
/// ```
pub struct XPathContext<'a> {
    doc: &'a Document,
    context_node: NodeId,
    variables: HashMap<String, XPathValue>,
}

impl<'a> XPathContext<'a> {
    /// Creates a context rooted at `context_node`, with position and size 1.
    #[must_use]
    pub fn new(doc: &'a Document, context_node: NodeId) -> Self {
        Self {
            doc,
            context_node,
            variables: HashMap::new(),
        }
    }

    /// Binds `$name` to a value.
    pub fn set_variable(&mut self, name: &str, value: XPathValue) {
        self.variables.insert(name.to_owned(), value);
    }

    /// Evaluates a compiled expression.
    ///
    /// # Errors
    ///
    /// Returns [`XPathError::UndefinedVariable`] for unbound variables and
    /// [`XPathError::TypeError`] where a node-set is required but another
    /// type was produced.
    pub fn evaluate(&self, query: &CompiledQuery) -> Result<XPathValue, XPathError> {
        let evaluator = Evaluator {
            doc: self.doc,
            variables: &self.variables,
            order: OnceCell::new(),
        };
        let focus = Focus {
            node: XPathNode::Tree(self.context_node),
            position: 1,
            size: 1,
        };
        evaluator.eval_expr(query.expr(), &focus)
    }
}

/// The context node, position and size of one sub-evaluation.
#[derive(Clone, Copy)]
struct Focus {
    node: XPathNode,
    position: usize,
    size: usize,
}

struct Evaluator<'a> {
    doc: &'a Document,
    variables: &'a HashMap<String, XPathValue>,
    /// Document-order positions, computed on first use.
    order: OnceCell<HashMap<NodeId, usize>>,
}

impl Evaluator<'_> {
    fn eval_expr(&self, expr: &Expr, focus: &Focus) -> Result<XPathValue, XPathError> {
        match expr {
            Expr::Number(n) => Ok(XPathValue::Number(*n)),
            Expr::String(s) => Ok(XPathValue::String(s.clone())),
            Expr::Variable(name) => {
                self.variables
                    .get(name)
                    .cloned()
                    .ok_or_else(|| XPathError::UndefinedVariable {
                        name: name.clone(),
                    })
            }
            Expr::BinaryOp { op, left, right } => self.eval_binary_op(*op, left, right, focus),
            Expr::UnaryNeg(inner) => {
                let n = self.eval_expr(inner, focus)?.to_number(self.doc);
                Ok(XPathValue::Number(-n))
            }
            Expr::FunctionCall { function, args } => self.eval_function(*function, args, focus),
            Expr::Path { steps } => self.apply_steps(vec![focus.node], steps),
            Expr::RootPath { steps } => {
                self.apply_steps(vec![XPathNode::Tree(self.doc.root())], steps)
            }
            Expr::Filter { expr, predicates } => {
                let mut nodes = self.node_set(self.eval_expr(expr, focus)?)?;
                for predicate in predicates {
                    nodes = self.filter(nodes, predicate)?;
                }
                Ok(XPathValue::NodeSet(nodes))
            }
            Expr::FilterPath { filter, steps } => {
                let nodes = self.node_set(self.eval_expr(filter, focus)?)?;
                self.apply_steps(nodes, steps)
            }
            Expr::Union(left, right) => {
                let mut nodes = self.node_set(self.eval_expr(left, focus)?)?;
                nodes.extend(self.node_set(self.eval_expr(right, focus)?)?);
                self.sort_document_order(&mut nodes);
                Ok(XPathValue::NodeSet(nodes))
            }
        }
    }

    fn eval_binary_op(
        &self,
        op: BinaryOp,
        left: &Expr,
        right: &Expr,
        focus: &Focus,
    ) -> Result<XPathValue, XPathError> {
        match op {
            BinaryOp::And => {
                let result = self.eval_expr(left, focus)?.to_boolean()
                    && self.eval_expr(right, focus)?.to_boolean();
                Ok(XPathValue::Boolean(result))
            }
            BinaryOp::Or => {
                let result = self.eval_expr(left, focus)?.to_boolean()
                    || self.eval_expr(right, focus)?.to_boolean();
                Ok(XPathValue::Boolean(result))
            }
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
                let l = self.eval_expr(left, focus)?.to_number(self.doc);
                let r = self.eval_expr(right, focus)?.to_number(self.doc);
                let result = match op {
                    BinaryOp::Add => l + r,
                    BinaryOp::Sub => l - r,
                    BinaryOp::Mul => l * r,
                    BinaryOp::Div => l / r,
                    _ => l % r,
                };
                Ok(XPathValue::Number(result))
            }
            BinaryOp::Eq | BinaryOp::Neq => {
                let lv = self.eval_expr(left, focus)?;
                let rv = self.eval_expr(right, focus)?;
                let eq = self.compare_equality(&lv, &rv, op == BinaryOp::Neq);
                Ok(XPathValue::Boolean(eq))
            }
            BinaryOp::Lt | BinaryOp::Lte | BinaryOp::Gt | BinaryOp::Gte => {
                let lv = self.eval_expr(left, focus)?;
                let rv = self.eval_expr(right, focus)?;
                Ok(XPathValue::Boolean(self.compare_relational(op, &lv, &rv)))
            }
        }
    }

    // -----------------------------------------------------------------------
    // Location paths
    // -----------------------------------------------------------------------

    fn apply_steps(
        &self,
        mut nodes: Vec<XPathNode>,
        steps: &[Step],
    ) -> Result<XPathValue, XPathError> {
        for step in steps {
            nodes = self.apply_step(&nodes, step)?;
        }
        Ok(XPathValue::NodeSet(nodes))
    }

    /// Applies one step to every input node. Predicates see each context
    /// node's candidates in axis order; the combined result is returned in
    /// document order.
    fn apply_step(&self, input: &[XPathNode], step: &Step) -> Result<Vec<XPathNode>, XPathError> {
        let mut result = Vec::new();
        for &node in input {
            let mut selected: Vec<XPathNode> = self
                .axis_nodes(node, step.axis)
                .into_iter()
                .filter(|&n| self.matches(n, &step.node_test, step.axis))
                .collect();
            for predicate in &step.predicates {
                selected = self.filter(selected, predicate)?;
            }
            result.extend(selected);
        }

        if input.len() > 1 {
            self.sort_document_order(&mut result);
        } else if step.axis.is_reverse() {
            result.reverse();
        }
        Ok(result)
    }

    /// Keeps the nodes for which `predicate` holds. A numeric predicate
    /// selects by position.
    fn filter(
        &self,
        nodes: Vec<XPathNode>,
        predicate: &Expr,
    ) -> Result<Vec<XPathNode>, XPathError> {
        let size = nodes.len();
        let mut kept = Vec::new();
        for (i, node) in nodes.into_iter().enumerate() {
            let focus = Focus {
                node,
                position: i + 1,
                size,
            };
            let keep = match self.eval_expr(predicate, &focus)? {
                #[allow(clippy::float_cmp, clippy::cast_precision_loss)]
                XPathValue::Number(n) => n == (i + 1) as f64,
                other => other.to_boolean(),
            };
            if keep {
                kept.push(node);
            }
        }
        Ok(kept)
    }

    /// Candidate nodes along `axis`, in axis order.
    fn axis_nodes(&self, node: XPathNode, axis: Axis) -> Vec<XPathNode> {
        let doc = self.doc;
        let tree = |ids: &mut dyn Iterator<Item = NodeId>| -> Vec<XPathNode> {
            ids.map(XPathNode::Tree).collect()
        };

        let id = match node {
            XPathNode::Tree(id) => id,
            XPathNode::Attribute(owner, _) => {
                return match axis {
                    Axis::Self_ => vec![node],
                    Axis::Parent => vec![XPathNode::Tree(owner)],
                    Axis::Ancestor => tree(&mut doc.ancestors(owner)),
                    Axis::AncestorOrSelf => {
                        let mut nodes = vec![node];
                        nodes.extend(doc.ancestors(owner).map(XPathNode::Tree));
                        nodes
                    }
                    Axis::Following => {
                        let mut nodes = tree(&mut doc.descendants(owner));
                        nodes.extend(self.following(owner));
                        nodes
                    }
                    Axis::Preceding => self.preceding(owner),
                    _ => Vec::new(),
                };
            }
        };

        match axis {
            Axis::Child => tree(&mut doc.children(id)),
            Axis::Descendant => tree(&mut doc.descendants(id)),
            Axis::Parent => tree(&mut doc.parent(id).into_iter()),
            Axis::Ancestor => tree(&mut doc.ancestors(id).skip(1)),
            Axis::AncestorOrSelf => tree(&mut doc.ancestors(id)),
            Axis::FollowingSibling => {
                tree(&mut std::iter::successors(doc.next_sibling(id), |&s| {
                    doc.next_sibling(s)
                }))
            }
            Axis::PrecedingSibling => {
                tree(&mut std::iter::successors(doc.prev_sibling(id), |&s| {
                    doc.prev_sibling(s)
                }))
            }
            Axis::Following => self.following(id),
            Axis::Preceding => self.preceding(id),
            Axis::Attribute => doc
                .attributes(id)
                .iter()
                .enumerate()
                .filter(|(_, a)| !a.is_namespace_decl())
                .map(|(i, _)| XPathNode::Attribute(id, i))
                .collect(),
            Axis::Namespace => Vec::new(),
            Axis::Self_ => vec![node],
            Axis::DescendantOrSelf => {
                tree(&mut std::iter::once(id).chain(doc.descendants(id)))
            }
        }
    }

    /// Nodes after `id` in document order, descendants excluded.
    fn following(&self, id: NodeId) -> Vec<XPathNode> {
        let mut result = Vec::new();
        for anc in self.doc.ancestors(id) {
            let mut sib = self.doc.next_sibling(anc);
            while let Some(s) = sib {
                result.push(XPathNode::Tree(s));
                result.extend(self.doc.descendants(s).map(XPathNode::Tree));
                sib = self.doc.next_sibling(s);
            }
        }
        result
    }

    /// Nodes before `id`, ancestors excluded, nearest first.
    fn preceding(&self, id: NodeId) -> Vec<XPathNode> {
        let mut result = Vec::new();
        for anc in self.doc.ancestors(id) {
            let mut sib = self.doc.prev_sibling(anc);
            while let Some(s) = sib {
                let subtree: Vec<NodeId> = self.doc.descendants(s).collect();
                result.extend(subtree.into_iter().rev().map(XPathNode::Tree));
                result.push(XPathNode::Tree(s));
                sib = self.doc.prev_sibling(s);
            }
        }
        result
    }

    /// Applies a node test. The principal node type is attribute on the
    /// attribute axis and element everywhere else.
    fn matches(&self, node: XPathNode, test: &NodeTest, axis: Axis) -> bool {
        match node {
            XPathNode::Attribute(owner, index) => {
                let Some(attr) = self.doc.attributes(owner).get(index) else {
                    return false;
                };
                if axis != Axis::Attribute {
                    return *test == NodeTest::Node;
                }
                match test {
                    NodeTest::Name { namespace, local } => {
                        attr.name == *local && attr.namespace.as_deref() == namespace.as_deref()
                    }
                    NodeTest::NamespaceWildcard(ns) => attr.namespace.as_deref() == Some(ns),
                    NodeTest::Wildcard | NodeTest::Node => true,
                    _ => false,
                }
            }
            XPathNode::Tree(id) => match (&self.doc.node(id).kind, test) {
                (NodeKind::DocumentType { .. }, _) => false,
                (_, NodeTest::Node) => true,
                (
                    NodeKind::Element {
                        name, namespace, ..
                    },
                    NodeTest::Name {
                        namespace: want,
                        local,
                    },
                ) => name == local && namespace.as_deref() == want.as_deref(),
                (NodeKind::Element { .. }, NodeTest::Wildcard) => axis != Axis::Attribute,
                (NodeKind::Element { namespace, .. }, NodeTest::NamespaceWildcard(ns)) => {
                    namespace.as_deref() == Some(ns)
                }
                (NodeKind::Text { .. } | NodeKind::CData { .. }, NodeTest::Text) => true,
                (NodeKind::Comment { .. }, NodeTest::Comment) => true,
                (
                    NodeKind::ProcessingInstruction { target, .. },
                    NodeTest::ProcessingInstruction(want),
                ) => want.as_ref().map_or(true, |w| w == target),
                _ => false,
            },
        }
    }

    fn sort_document_order(&self, nodes: &mut Vec<XPathNode>) {
        let mut seen = HashSet::with_capacity(nodes.len());
        nodes.retain(|n| seen.insert(*n));

        let order = self.order.get_or_init(|| self.doc.document_order());
        nodes.sort_by_key(|n| match *n {
            XPathNode::Tree(id) => (order.get(&id).copied().unwrap_or(usize::MAX), 0),
            XPathNode::Attribute(id, i) => (order.get(&id).copied().unwrap_or(usize::MAX), i + 1),
        });
    }

    fn node_set(&self, value: XPathValue) -> Result<Vec<XPathNode>, XPathError> {
        match value {
            XPathValue::NodeSet(nodes) => Ok(nodes),
            other => Err(XPathError::TypeError {
                expected: "node-set",
                found: other.type_name(),
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Functions
    // -----------------------------------------------------------------------

    /// Argument counts were checked at compile time.
    fn eval_function(
        &self,
        function: Function,
        args: &[Expr],
        focus: &Focus,
    ) -> Result<XPathValue, XPathError> {
        let string_arg = |i: usize| -> Result<String, XPathError> {
            Ok(self.eval_expr(&args[i], focus)?.to_string_value(self.doc))
        };
        let number_arg = |i: usize| -> Result<f64, XPathError> {
            Ok(self.eval_expr(&args[i], focus)?.to_number(self.doc))
        };
        // Zero-argument forms default to the context node.
        let string_or_context = || -> Result<String, XPathError> {
            if args.is_empty() {
                Ok(focus.node.string_value(self.doc))
            } else {
                string_arg(0)
            }
        };
        let node_or_context = || -> Result<Option<XPathNode>, XPathError> {
            if args.is_empty() {
                Ok(Some(focus.node))
            } else {
                let nodes = self.node_set(self.eval_expr(&args[0], focus)?)?;
                Ok(nodes.first().copied())
            }
        };

        #[allow(clippy::cast_precision_loss)]
        let value = match function {
            Function::Last => XPathValue::Number(focus.size as f64),
            Function::Position => XPathValue::Number(focus.position as f64),
            Function::Count => {
                let nodes = self.node_set(self.eval_expr(&args[0], focus)?)?;
                XPathValue::Number(nodes.len() as f64)
            }
            Function::Id => XPathValue::NodeSet(self.fn_id(self.eval_expr(&args[0], focus)?)),
            Function::LocalName => XPathValue::String(
                node_or_context()?.map_or_else(String::new, |n| self.local_name(n)),
            ),
            Function::NamespaceUri => XPathValue::String(
                node_or_context()?.map_or_else(String::new, |n| self.namespace_uri(n)),
            ),
            Function::Name => XPathValue::String(
                node_or_context()?.map_or_else(String::new, |n| self.qualified_name(n)),
            ),

            Function::String => XPathValue::String(string_or_context()?),
            Function::Concat => {
                let mut out = String::new();
                for i in 0..args.len() {
                    out.push_str(&string_arg(i)?);
                }
                XPathValue::String(out)
            }
            Function::StartsWith => {
                XPathValue::Boolean(string_arg(0)?.starts_with(string_arg(1)?.as_str()))
            }
            Function::Contains => {
                XPathValue::Boolean(string_arg(0)?.contains(string_arg(1)?.as_str()))
            }
            Function::SubstringBefore => {
                let (s, sub) = (string_arg(0)?, string_arg(1)?);
                XPathValue::String(s.find(&sub).map_or_else(String::new, |i| s[..i].to_owned()))
            }
            Function::SubstringAfter => {
                let (s, sub) = (string_arg(0)?, string_arg(1)?);
                XPathValue::String(
                    s.find(&sub)
                        .map_or_else(String::new, |i| s[i + sub.len()..].to_owned()),
                )
            }
            Function::Substring => {
                let s = string_arg(0)?;
                let start = number_arg(1)?;
                let len = if args.len() == 3 {
                    Some(number_arg(2)?)
                } else {
                    None
                };
                XPathValue::String(substring(&s, start, len))
            }
            Function::StringLength => {
                XPathValue::Number(string_or_context()?.chars().count() as f64)
            }
            Function::NormalizeSpace => {
                let s = string_or_context()?;
                let words: Vec<&str> = s
                    .split(is_xml_space)
                    .filter(|w| !w.is_empty())
                    .collect();
                XPathValue::String(words.join(" "))
            }
            Function::Translate => {
                let s = string_arg(0)?;
                let from: Vec<char> = string_arg(1)?.chars().collect();
                let to: Vec<char> = string_arg(2)?.chars().collect();
                let out = s
                    .chars()
                    .filter_map(|c| match from.iter().position(|&f| f == c) {
                        Some(i) => to.get(i).copied(),
                        None => Some(c),
                    })
                    .collect();
                XPathValue::String(out)
            }

            Function::Boolean => XPathValue::Boolean(self.eval_expr(&args[0], focus)?.to_boolean()),
            Function::Not => XPathValue::Boolean(!self.eval_expr(&args[0], focus)?.to_boolean()),
            Function::True => XPathValue::Boolean(true),
            Function::False => XPathValue::Boolean(false),
            Function::Lang => XPathValue::Boolean(self.fn_lang(&string_arg(0)?, focus.node)),

            Function::Number => XPathValue::Number(if args.is_empty() {
                parse_number(&focus.node.string_value(self.doc))
            } else {
                number_arg(0)?
            }),
            Function::Sum => {
                let nodes = self.node_set(self.eval_expr(&args[0], focus)?)?;
                XPathValue::Number(
                    nodes
                        .iter()
                        .map(|n| parse_number(&n.string_value(self.doc)))
                        .sum(),
                )
            }
            Function::Floor => XPathValue::Number(number_arg(0)?.floor()),
            Function::Ceiling => XPathValue::Number(number_arg(0)?.ceil()),
            Function::Round => XPathValue::Number(xpath_round(number_arg(0)?)),
        };
        Ok(value)
    }

    /// `id()`: elements whose `id` or `xml:id` attribute is one of the
    /// whitespace-separated tokens of the argument.
    fn fn_id(&self, arg: XPathValue) -> Vec<XPathNode> {
        let text = match &arg {
            XPathValue::NodeSet(nodes) => nodes
                .iter()
                .map(|n| n.string_value(self.doc))
                .collect::<Vec<_>>()
                .join(" "),
            other => other.to_string_value(self.doc),
        };
        let wanted: HashSet<&str> = text.split(is_xml_space).filter(|t| !t.is_empty()).collect();
        if wanted.is_empty() {
            return Vec::new();
        }

        let doc = self.doc;
        doc.descendants(doc.root())
            .filter(|&id| {
                doc.attributes(id).iter().any(|a| {
                    let is_id = (a.name == "id" && a.prefix.is_none()) || is_xml_attr(a, "id");
                    is_id && wanted.contains(a.value.trim())
                })
            })
            .map(XPathNode::Tree)
            .collect()
    }

    /// `lang()`: the nearest `xml:lang` matches `target` or one of its
    /// subtags, case-insensitively.
    fn fn_lang(&self, target: &str, node: XPathNode) -> bool {
        let target = target.to_lowercase();
        for anc in self.doc.ancestors(node.owner()) {
            if let Some(attr) = self
                .doc
                .attributes(anc)
                .iter()
                .find(|a| is_xml_attr(a, "lang"))
            {
                let lang = attr.value.to_lowercase();
                return lang == target
                    || lang
                        .strip_prefix(target.as_str())
                        .is_some_and(|rest| rest.starts_with('-'));
            }
        }
        false
    }

    fn attribute(&self, node: XPathNode) -> Option<&Attribute> {
        match node {
            XPathNode::Attribute(owner, i) => self.doc.attributes(owner).get(i),
            XPathNode::Tree(_) => None,
        }
    }

    fn local_name(&self, node: XPathNode) -> String {
        if let Some(attr) = self.attribute(node) {
            return attr.name.clone();
        }
        match &self.doc.node(node.owner()).kind {
            NodeKind::Element { name, .. } => name.clone(),
            NodeKind::ProcessingInstruction { target, .. } => target.clone(),
            _ => String::new(),
        }
    }

    fn namespace_uri(&self, node: XPathNode) -> String {
        match self.attribute(node) {
            Some(attr) => attr.namespace.clone().unwrap_or_default(),
            None => self
                .doc
                .node_namespace(node.owner())
                .unwrap_or_default()
                .to_owned(),
        }
    }

    fn qualified_name(&self, node: XPathNode) -> String {
        if let Some(attr) = self.attribute(node) {
            return attr.qualified_name();
        }
        match &self.doc.node(node.owner()).kind {
            NodeKind::ProcessingInstruction { target, .. } => target.clone(),
            _ => self.doc.qualified_name(node.owner()).unwrap_or_default(),
        }
    }

    // -----------------------------------------------------------------------
    // Comparisons (XPath 1.0 section 3.4)
    // -----------------------------------------------------------------------

    /// `=` (or `!=` when `negate`). Node-set comparisons are existential:
    /// true if some node's string-value satisfies the comparison.
    #[allow(clippy::float_cmp)]
    fn compare_equality(&self, lhs: &XPathValue, rhs: &XPathValue, negate: bool) -> bool {
        let doc = self.doc;
        let str_eq = |a: &str, b: &str| (a == b) != negate;
        let num_eq = |a: f64, b: f64| (a == b) != negate;

        match (lhs, rhs) {
            (XPathValue::NodeSet(l), XPathValue::NodeSet(r)) => {
                let rvalues: Vec<String> = r.iter().map(|n| n.string_value(doc)).collect();
                l.iter().any(|ln| {
                    let lv = ln.string_value(doc);
                    rvalues.iter().any(|rv| str_eq(&lv, rv))
                })
            }
            (XPathValue::NodeSet(ns), XPathValue::Boolean(b))
            | (XPathValue::Boolean(b), XPathValue::NodeSet(ns)) => {
                (!ns.is_empty() == *b) != negate
            }
            (XPathValue::NodeSet(ns), XPathValue::Number(n))
            | (XPathValue::Number(n), XPathValue::NodeSet(ns)) => ns
                .iter()
                .any(|node| num_eq(parse_number(&node.string_value(doc)), *n)),
            (XPathValue::NodeSet(ns), XPathValue::String(s))
            | (XPathValue::String(s), XPathValue::NodeSet(ns)) => {
                ns.iter().any(|node| str_eq(&node.string_value(doc), s))
            }
            (XPathValue::Boolean(_), _) | (_, XPathValue::Boolean(_)) => {
                (lhs.to_boolean() == rhs.to_boolean()) != negate
            }
            (XPathValue::Number(_), _) | (_, XPathValue::Number(_)) => {
                num_eq(lhs.to_number(doc), rhs.to_number(doc))
            }
            _ => str_eq(&lhs.to_string_value(doc), &rhs.to_string_value(doc)),
        }
    }

    /// `<`, `<=`, `>`, `>=`: always numeric, existential over node-sets.
    fn compare_relational(&self, op: BinaryOp, lhs: &XPathValue, rhs: &XPathValue) -> bool {
        let doc = self.doc;
        let cmp = |a: f64, b: f64| match op {
            BinaryOp::Lt => a < b,
            BinaryOp::Lte => a <= b,
            BinaryOp::Gt => a > b,
            _ => a >= b,
        };
        let numbers = |ns: &[XPathNode]| -> Vec<f64> {
            ns.iter()
                .map(|n| parse_number(&n.string_value(doc)))
                .collect()
        };

        match (lhs, rhs) {
            (XPathValue::NodeSet(l), XPathValue::NodeSet(r)) => {
                let rnums = numbers(r);
                numbers(l).iter().any(|&a| rnums.iter().any(|&b| cmp(a, b)))
            }
            (XPathValue::NodeSet(ns), XPathValue::Boolean(_))
            | (XPathValue::Boolean(_), XPathValue::NodeSet(ns)) => {
                let set = f64::from(u8::from(!ns.is_empty()));
                let other = f64::from(u8::from(
                    if matches!(lhs, XPathValue::NodeSet(_)) { rhs } else { lhs }.to_boolean(),
                ));
                if matches!(lhs, XPathValue::NodeSet(_)) {
                    cmp(set, other)
                } else {
                    cmp(other, set)
                }
            }
            (XPathValue::NodeSet(ns), other) => {
                let b = other.to_number(doc);
                numbers(ns).iter().any(|&a| cmp(a, b))
            }
            (other, XPathValue::NodeSet(ns)) => {
                let a = other.to_number(doc);
                numbers(ns).iter().any(|&b| cmp(a, b))
            }
            _ => cmp(lhs.to_number(doc), rhs.to_number(doc)),
        }
    }
}

fn is_xml_space(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n' | '\r')
}

/// True for `xml:<local>`, whether or not the prefix was resolved.
fn is_xml_attr(attr: &Attribute, local: &str) -> bool {
    attr.name == local
        && (attr.namespace.as_deref() == Some(XML_NAMESPACE) || attr.prefix.as_deref() == Some("xml"))
}

/// `substring()` over characters with `XPath` rounding: the characters at
/// 1-based positions `p` with `round(start) <= p < round(start) + round(len)`.
fn substring(s: &str, start: f64, len: Option<f64>) -> String {
    let chars: Vec<char> = s.chars().collect();
    #[allow(clippy::cast_precision_loss)]
    let count = chars.len() as f64;

    let first = xpath_round(start);
    let end = len.map_or(count + 1.0, |l| first + xpath_round(l));
    if first.is_nan() || end.is_nan() {
        return String::new();
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let from = (first - 1.0).max(0.0) as usize;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let to = (end - 1.0).min(count).max(0.0) as usize;
    if from >= to {
        return String::new();
    }
    chars[from..to].iter().collect()
}

/// Round half toward positive infinity: `round(-0.5)` is `-0`, `round(0.5)`
/// is `1`.
fn xpath_round(n: f64) -> f64 {
    if n.is_nan() || n.is_infinite() || n == 0.0 {
        return n;
    }
    let rounded = (n + 0.5).floor();
    if rounded == 0.0 && n < 0.0 {
        -0.0
    } else {
        rounded
    }
}

#[cfg(test)]
#[allow(clippy::float_cmp, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::xpath::{compile, format_number, NamespaceBindings};
    use pretty_assertions::assert_eq;

    const BOOKS: &str = r#"<library>
  <book id="b1" year="1999" xml:lang="en-GB"><title>Alpha</title><price>10</price></book>
  <book id="b2" year="2005"><title>Beta</title><price>25.5</price></book>
  <!-- note -->
  <book id="b3" year="2011"><title>Gamma</title><price>7</price><?pi data?></book>
</library>"#;

    fn eval_at(xml: &str, context: impl Fn(&Document) -> NodeId, expr: &str) -> (Document, XPathValue) {
        let doc = Document::parse_str(xml).unwrap();
        let query = compile(expr, &NamespaceBindings::new()).unwrap();
        let ctx = context(&doc);
        let value = XPathContext::new(&doc, ctx).evaluate(&query).unwrap();
        (doc, value)
    }

    fn eval(xml: &str, expr: &str) -> (Document, XPathValue) {
        eval_at(xml, |d| d.root_element().unwrap(), expr)
    }

    fn string(xml: &str, expr: &str) -> String {
        let (doc, v) = eval(xml, expr);
        v.to_string_value(&doc)
    }

    fn number(xml: &str, expr: &str) -> f64 {
        let (doc, v) = eval(xml, expr);
        v.to_number(&doc)
    }

    fn names(xml: &str, expr: &str) -> Vec<String> {
        let (doc, v) = eval(xml, expr);
        v.as_node_set()
            .unwrap()
            .iter()
            .map(|n| match n {
                XPathNode::Tree(id) => doc
                    .attribute(*id, "id")
                    .map_or_else(|| doc.node_name(*id).unwrap_or("#").to_owned(), str::to_owned),
                XPathNode::Attribute(owner, i) => {
                    format!("@{}", doc.attributes(*owner)[*i].qualified_name())
                }
            })
            .collect()
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(number("<r/>", "1 + 2 * 3"), 7.0);
        assert_eq!(number("<r/>", "7 mod 3"), 1.0);
        assert_eq!(number("<r/>", "-7 mod 3"), -1.0);
        assert_eq!(number("<r/>", "10 div 4"), 2.5);
        assert!(number("<r/>", "0 div 0").is_nan());
        assert_eq!(number("<r/>", "1 div 0"), f64::INFINITY);
        assert_eq!(number("<r/>", "--3"), 3.0);
    }

    #[test]
    fn test_child_and_descendant_paths() {
        assert_eq!(names(BOOKS, "book"), vec!["b1", "b2", "b3"]);
        assert_eq!(names(BOOKS, "//title"), vec!["title", "title", "title"]);
        assert_eq!(number(BOOKS, "count(//node())"), number(BOOKS, "count(/descendant::node())"));
        assert_eq!(names(BOOKS, "/"), vec!["#"]);
    }

    #[test]
    fn test_predicates() {
        assert_eq!(names(BOOKS, "book[2]"), vec!["b2"]);
        assert_eq!(names(BOOKS, "book[last()]"), vec!["b3"]);
        assert_eq!(names(BOOKS, "book[price > 9]"), vec!["b1", "b2"]);
        assert_eq!(names(BOOKS, "book[@year >= 2005][1]"), vec!["b2"]);
        assert_eq!(names(BOOKS, "book[title = 'Gamma']"), vec!["b3"]);
        assert_eq!(names(BOOKS, "(//book)[position() > 1]"), vec!["b2", "b3"]);
    }

    #[test]
    fn test_positional_predicates_per_context_node() {
        let xml = "<r><g><i id='a'/><i id='b'/></g><g><i id='c'/><i id='d'/></g></r>";
        assert_eq!(names(xml, "g/i[1]"), vec!["a", "c"]);
        assert_eq!(names(xml, "(g/i)[1]"), vec!["a"]);
        assert_eq!(names(xml, "//i[2]"), vec!["b", "d"]);
    }

    #[test]
    fn test_reverse_axes_count_backwards() {
        let xml = "<r><a id='1'/><a id='2'/><a id='3'/><a id='4'/></r>";
        let last = |d: &Document| d.last_child(d.root_element().unwrap()).unwrap();
        let (doc, v) = eval_at(xml, last, "preceding-sibling::*[1]");
        assert_eq!(
            v.as_node_set().unwrap(),
            &[XPathNode::Tree(doc.prev_sibling(last(&doc)).unwrap())]
        );
        let (doc, v) = eval_at(xml, last, "preceding-sibling::*");
        let ids: Vec<_> = v
            .as_node_set()
            .unwrap()
            .iter()
            .map(|n| doc.attribute(n.owner(), "id").unwrap().to_owned())
            .collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
    }

    #[test]
    fn test_ancestor_axes() {
        let xml = "<a><b><c/></b></a>";
        let deepest = |d: &Document| d.descendants(d.root()).last().unwrap();
        let (doc, v) = eval_at(xml, deepest, "ancestor::*");
        let got: Vec<_> = v
            .as_node_set()
            .unwrap()
            .iter()
            .map(|n| doc.node_name(n.owner()).unwrap().to_owned())
            .collect();
        assert_eq!(got, vec!["a", "b"]);
        let (doc, v) = eval_at(xml, deepest, "name(ancestor::*[1])");
        assert_eq!(v.to_string_value(&doc), "b");
        let (_, v) = eval_at(xml, deepest, "count(ancestor-or-self::node())");
        assert_eq!(v, XPathValue::Number(4.0));
    }

    #[test]
    fn test_following_and_preceding() {
        let xml = "<r><a><x/></a><b/><c><y/></c></r>";
        let x = |d: &Document| d.descendants(d.root()).nth(2).unwrap();
        let (doc, v) = eval_at(xml, x, "following::*");
        let got: Vec<_> = v
            .as_node_set()
            .unwrap()
            .iter()
            .map(|n| doc.node_name(n.owner()).unwrap().to_owned())
            .collect();
        assert_eq!(got, vec!["b", "c", "y"]);

        let y = |d: &Document| d.descendants(d.root()).last().unwrap();
        let (doc, v) = eval_at(xml, y, "preceding::*");
        let got: Vec<_> = v
            .as_node_set()
            .unwrap()
            .iter()
            .map(|n| doc.node_name(n.owner()).unwrap().to_owned())
            .collect();
        assert_eq!(got, vec!["a", "x", "b"]);
        let (doc, v) = eval_at(xml, y, "name(preceding::*[1])");
        assert_eq!(v.to_string_value(&doc), "b");
    }

    #[test]
    fn test_attribute_axis() {
        assert_eq!(names(BOOKS, "book[1]/@*"), vec!["@id", "@year", "@xml:lang"]);
        assert_eq!(string(BOOKS, "book[2]/@year"), "2005");
        assert_eq!(number(BOOKS, "sum(book/@year)"), 6015.0);
        assert_eq!(names(BOOKS, "//@id[. = 'b2']/.."), vec!["b2"]);
        assert_eq!(string(BOOKS, "name(book[1]/@xml:lang)"), "xml:lang");
    }

    #[test]
    fn test_namespace_declarations_are_not_attributes() {
        let xml = r#"<r xmlns="urn:d" xmlns:p="urn:p" p:a="1" b="2"/>"#;
        assert_eq!(names(xml, "@*"), vec!["@p:a", "@b"]);
        assert_eq!(number(xml, "count(namespace::*)"), 0.0);
    }

    #[test]
    fn test_namespaced_name_tests() {
        let xml = r#"<r xmlns="urn:d" xmlns:p="urn:p"><p:a/><a/></r>"#;
        let doc = Document::parse_str(xml).unwrap();
        let ns: NamespaceBindings = [("p", "urn:p"), ("d", "urn:d")].into_iter().collect();
        let root = doc.root_element().unwrap();
        let run = |expr: &str| {
            let q = compile(expr, &ns).unwrap();
            XPathContext::new(&doc, root)
                .evaluate(&q)
                .unwrap()
                .as_node_set()
                .unwrap()
                .len()
        };
        assert_eq!(run("p:a"), 1);
        assert_eq!(run("d:a"), 1);
        assert_eq!(run("p:*"), 1);
        // Unprefixed names only match elements in no namespace.
        assert_eq!(run("a"), 0);
        assert_eq!(run("*"), 2);
    }

    #[test]
    fn test_node_type_tests() {
        assert_eq!(number(BOOKS, "count(comment())"), 1.0);
        assert_eq!(number(BOOKS, "count(//processing-instruction('pi'))"), 1.0);
        assert_eq!(number(BOOKS, "count(//processing-instruction('other'))"), 0.0);
        assert_eq!(string(BOOKS, "book[1]/title/text()"), "Alpha");
        assert_eq!(string(BOOKS, "string(//processing-instruction())"), "data");
    }

    #[test]
    fn test_union_is_document_ordered() {
        assert_eq!(names(BOOKS, "book[3] | book[1]"), vec!["b1", "b3"]);
        assert_eq!(names(BOOKS, "book | book[2]"), vec!["b1", "b2", "b3"]);
    }

    #[test]
    fn test_union_type_error() {
        let doc = Document::parse_str("<r/>").unwrap();
        let q = compile("book | 'x'", &NamespaceBindings::new()).unwrap();
        let err = XPathContext::new(&doc, doc.root()).evaluate(&q).unwrap_err();
        assert_eq!(
            err,
            XPathError::TypeError {
                expected: "node-set",
                found: "string"
            }
        );
    }

    #[test]
    fn test_string_functions() {
        assert_eq!(string("<r/>", "concat('a', 'b', 1)"), "ab1");
        assert_eq!(string("<r/>", "substring('12345', 2, 3)"), "234");
        assert_eq!(string("<r/>", "substring('12345', 1.5, 2.6)"), "234");
        assert_eq!(string("<r/>", "substring('12345', 0, 3)"), "12");
        assert_eq!(string("<r/>", "substring('12345', 0 div 0, 3)"), "");
        assert_eq!(string("<r/>", "substring('12345', -42, 1 div 0)"), "12345");
        assert_eq!(string("<r/>", "substring('12345', -1 div 0, 1 div 0)"), "");
        assert_eq!(string("<r/>", "substring-before('1999/04/01', '/')"), "1999");
        assert_eq!(string("<r/>", "substring-after('1999/04/01', '/')"), "04/01");
        assert_eq!(string("<r/>", "normalize-space('  a \n b  ')"), "a b");
        assert_eq!(string("<r/>", "translate('bar', 'abc', 'ABC')"), "BAr");
        assert_eq!(string("<r/>", "translate('--aaa--', 'abc-', 'ABC')"), "AAA");
        assert_eq!(number("<r/>", "string-length('héllo')"), 5.0);
        assert_eq!(string("<r>x<b>y</b></r>", "string()"), "xy");
    }

    #[test]
    fn test_boolean_functions() {
        assert_eq!(string("<r/>", "true() and not(false())"), "true");
        assert_eq!(string("<r/>", "boolean('')"), "false");
        assert_eq!(string(BOOKS, "boolean(book)"), "true");
        let first_title = |d: &Document| d.descendants(d.root()).find(|&n| d.node_name(n) == Some("title")).unwrap();
        let (_, v) = eval_at(BOOKS, first_title, "lang('en')");
        assert_eq!(v, XPathValue::Boolean(true));
        let (_, v) = eval_at(BOOKS, first_title, "lang('en-gb')");
        assert_eq!(v, XPathValue::Boolean(true));
        let (_, v) = eval_at(BOOKS, first_title, "lang('fr')");
        assert_eq!(v, XPathValue::Boolean(false));
    }

    #[test]
    fn test_number_functions() {
        assert_eq!(number(BOOKS, "sum(//price)"), 42.5);
        assert_eq!(number("<r/>", "floor(-1.5)"), -2.0);
        assert_eq!(number("<r/>", "ceiling(1.2)"), 2.0);
        assert_eq!(number("<r/>", "round(2.5)"), 3.0);
        assert_eq!(number("<r/>", "round(-2.5)"), -2.0);
        assert!(number("<r/>", "number('1e3')").is_nan());
        assert_eq!(number("<r>12</r>", "number()"), 12.0);
        assert_eq!(format_number(number("<r/>", "round(-0.4)")), "0");
    }

    #[test]
    fn test_node_name_functions() {
        let xml = r#"<p:r xmlns:p="urn:p"><?target data?></p:r>"#;
        assert_eq!(string(xml, "local-name()"), "r");
        assert_eq!(string(xml, "name()"), "p:r");
        assert_eq!(string(xml, "namespace-uri()"), "urn:p");
        assert_eq!(string(xml, "name(processing-instruction())"), "target");
        assert_eq!(string(xml, "local-name(missing)"), "");
    }

    #[test]
    fn test_id_function() {
        assert_eq!(names(BOOKS, "id('b3 b1')"), vec!["b1", "b3"]);
        assert_eq!(names(BOOKS, "id('nope')"), Vec::<String>::new());
        assert_eq!(string(BOOKS, "id('b2')/title"), "Beta");
        let xml = r#"<r><a xml:id="x"/></r>"#;
        assert_eq!(string(xml, "name(id('x'))"), "a");
    }

    #[test]
    fn test_comparisons() {
        assert_eq!(string(BOOKS, "book/price = 7"), "true");
        assert_eq!(string(BOOKS, "book/price != 7"), "true");
        assert_eq!(string(BOOKS, "book/title = 'Delta'"), "false");
        assert_eq!(string(BOOKS, "book/@year < book/price"), "false");
        assert_eq!(string(BOOKS, "missing = false()"), "true");
        assert_eq!(string("<r/>", "'1.0' = 1"), "true");
        assert_eq!(string("<r/>", "true() = 'x'"), "true");
        assert_eq!(string("<r/>", "'abc' = 'abd'"), "false");
        assert_eq!(string("<r/>", "2 > '1'"), "true");
        assert_eq!(string(BOOKS, "book > true()"), "false");
        assert_eq!(string(BOOKS, "book >= true()"), "true");
    }

    #[test]
    fn test_variables() {
        let doc = Document::parse_str(BOOKS).unwrap();
        let q = compile("book[@id = $want]/title", &NamespaceBindings::new()).unwrap();
        let mut ctx = XPathContext::new(&doc, doc.root_element().unwrap());
        assert_eq!(
            ctx.evaluate(&q).unwrap_err(),
            XPathError::UndefinedVariable {
                name: "want".into()
            }
        );
        ctx.set_variable("want", XPathValue::String("b2".into()));
        assert_eq!(ctx.evaluate(&q).unwrap().to_string_value(&doc), "Beta");
    }

    #[test]
    fn test_absolute_path_ignores_context() {
        let deepest = |d: &Document| d.descendants(d.root()).last().unwrap();
        let (_, v) = eval_at(BOOKS, deepest, "count(/library/book)");
        assert_eq!(v, XPathValue::Number(3.0));
    }

    #[test]
    fn test_order_follows_links_after_mutation() {
        let mut doc = Document::parse_str("<r><a/><b/></r>").unwrap();
        let r = doc.root_element().unwrap();
        let a = doc.first_child(r).unwrap();
        doc.detach(a);
        doc.append_child(r, a);
        let c = doc.create_node(NodeKind::element("c"));
        doc.prepend_child(r, c);

        let q = compile("*|b", &NamespaceBindings::new()).unwrap();
        let v = XPathContext::new(&doc, r).evaluate(&q).unwrap();
        let got: Vec<_> = v
            .as_node_set()
            .unwrap()
            .iter()
            .map(|n| doc.node_name(n.owner()).unwrap().to_owned())
            .collect();
        assert_eq!(got, vec!["c", "b", "a"]);
    }
}
