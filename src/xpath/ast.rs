//! Abstract syntax tree for compiled `XPath` 1.0 expressions.
//!
//! The tree is produced by [`super::parser`] after namespace prefixes have
//! been resolved and function names checked, so evaluation never needs the
//! prefix bindings again.

use std::fmt;

/// An `XPath` 1.0 expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A numeric literal.
    Number(f64),

    /// A string literal.
    String(String),

    /// A variable reference, without the leading `$`.
    Variable(String),

    /// A binary operation (`a + b`, `x = y`, `p and q`).
    BinaryOp {
        /// The operator.
        op: BinaryOp,
        /// The left-hand operand.
        left: Box<Expr>,
        /// The right-hand operand.
        right: Box<Expr>,
    },

    /// Unary negation.
    UnaryNeg(Box<Expr>),

    /// A call to one of the core functions.
    FunctionCall {
        /// The function.
        function: Function,
        /// The argument expressions.
        args: Vec<Expr>,
    },

    /// A relative location path, evaluated from the context node.
    Path {
        /// Steps, left to right.
        steps: Vec<Step>,
    },

    /// An absolute location path. No steps means the bare `/`.
    RootPath {
        /// Steps following the initial `/`.
        steps: Vec<Step>,
    },

    /// A primary expression with predicates (`$nodes[1]`, `(//a)[2]`).
    Filter {
        /// The filtered expression.
        expr: Box<Expr>,
        /// The predicates, applied in order.
        predicates: Vec<Expr>,
    },

    /// A filter expression continued by a relative path (`id('x')/b`).
    FilterPath {
        /// The expression producing the starting node-set.
        filter: Box<Expr>,
        /// The steps applied to it.
        steps: Vec<Step>,
    },

    /// The union of two node-sets.
    Union(Box<Expr>, Box<Expr>),
}

/// A binary operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `div`
    Div,
    /// `mod`
    Mod,
    /// `=`
    Eq,
    /// `!=`
    Neq,
    /// `<`
    Lt,
    /// `<=`
    Lte,
    /// `>`
    Gt,
    /// `>=`
    Gte,
    /// `and`
    And,
    /// `or`
    Or,
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "div",
            Self::Mod => "mod",
            Self::Eq => "=",
            Self::Neq => "!=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::And => "and",
            Self::Or => "or",
        })
    }
}

/// One step of a location path: axis, node test, predicates.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    /// The axis along which to select nodes.
    pub axis: Axis,
    /// The test applied to each candidate node.
    pub node_test: NodeTest,
    /// Predicates, applied in order.
    pub predicates: Vec<Expr>,
}

impl Step {
    /// A step with no predicates.
    #[must_use]
    pub fn new(axis: Axis, node_test: NodeTest) -> Self {
        Self {
            axis,
            node_test,
            predicates: Vec::new(),
        }
    }
}

/// The 13 `XPath` axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    /// `child`
    Child,
    /// `descendant`
    Descendant,
    /// `parent`
    Parent,
    /// `ancestor`
    Ancestor,
    /// `following-sibling`
    FollowingSibling,
    /// `preceding-sibling`
    PrecedingSibling,
    /// `following`
    Following,
    /// `preceding`
    Preceding,
    /// `attribute`
    Attribute,
    /// `namespace`
    Namespace,
    /// `self`
    Self_,
    /// `descendant-or-self`
    DescendantOrSelf,
    /// `ancestor-or-self`
    AncestorOrSelf,
}

impl Axis {
    /// Returns the axis name as written in `XPath` syntax.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Child => "child",
            Self::Descendant => "descendant",
            Self::Parent => "parent",
            Self::Ancestor => "ancestor",
            Self::FollowingSibling => "following-sibling",
            Self::PrecedingSibling => "preceding-sibling",
            Self::Following => "following",
            Self::Preceding => "preceding",
            Self::Attribute => "attribute",
            Self::Namespace => "namespace",
            Self::Self_ => "self",
            Self::DescendantOrSelf => "descendant-or-self",
            Self::AncestorOrSelf => "ancestor-or-self",
        }
    }

    /// Parses an axis name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "child" => Self::Child,
            "descendant" => Self::Descendant,
            "parent" => Self::Parent,
            "ancestor" => Self::Ancestor,
            "following-sibling" => Self::FollowingSibling,
            "preceding-sibling" => Self::PrecedingSibling,
            "following" => Self::Following,
            "preceding" => Self::Preceding,
            "attribute" => Self::Attribute,
            "namespace" => Self::Namespace,
            "self" => Self::Self_,
            "descendant-or-self" => Self::DescendantOrSelf,
            "ancestor-or-self" => Self::AncestorOrSelf,
            _ => return None,
        })
    }

    /// Reverse axes number their nodes in reverse document order when
    /// evaluating positional predicates.
    #[must_use]
    pub fn is_reverse(self) -> bool {
        matches!(
            self,
            Self::Ancestor | Self::AncestorOrSelf | Self::Preceding | Self::PrecedingSibling
        )
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A node test, with any prefix already resolved to a namespace URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeTest {
    /// A name test. `namespace` is `None` for an unprefixed name, which
    /// only matches nodes in no namespace.
    Name {
        /// The resolved namespace URI.
        namespace: Option<String>,
        /// The local name.
        local: String,
    },

    /// `*`: any node of the axis' principal type.
    Wildcard,

    /// `prefix:*`: any name in the given namespace.
    NamespaceWildcard(String),

    /// `node()`
    Node,

    /// `text()`, which also matches CDATA sections.
    Text,

    /// `comment()`
    Comment,

    /// `processing-instruction()`, optionally restricted to a target.
    ProcessingInstruction(Option<String>),
}

impl fmt::Display for NodeTest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name {
                namespace: Some(ns),
                local,
            } => write!(f, "{{{ns}}}{local}"),
            Self::Name {
                namespace: None,
                local,
            } => f.write_str(local),
            Self::Wildcard => f.write_str("*"),
            Self::NamespaceWildcard(ns) => write!(f, "{{{ns}}}*"),
            Self::Node => f.write_str("node()"),
            Self::Text => f.write_str("text()"),
            Self::Comment => f.write_str("comment()"),
            Self::ProcessingInstruction(None) => f.write_str("processing-instruction()"),
            Self::ProcessingInstruction(Some(t)) => write!(f, "processing-instruction('{t}')"),
        }
    }
}

/// The 27 functions of the `XPath` 1.0 core library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Function {
    // node-set
    Last,
    Position,
    Count,
    Id,
    LocalName,
    NamespaceUri,
    Name,
    // string
    String,
    Concat,
    StartsWith,
    Contains,
    SubstringBefore,
    SubstringAfter,
    Substring,
    StringLength,
    NormalizeSpace,
    Translate,
    // boolean
    Boolean,
    Not,
    True,
    False,
    Lang,
    // number
    Number,
    Sum,
    Floor,
    Ceiling,
    Round,
}

impl Function {
    /// Looks up a core function by name.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "last" => Self::Last,
            "position" => Self::Position,
            "count" => Self::Count,
            "id" => Self::Id,
            "local-name" => Self::LocalName,
            "namespace-uri" => Self::NamespaceUri,
            "name" => Self::Name,
            "string" => Self::String,
            "concat" => Self::Concat,
            "starts-with" => Self::StartsWith,
            "contains" => Self::Contains,
            "substring-before" => Self::SubstringBefore,
            "substring-after" => Self::SubstringAfter,
            "substring" => Self::Substring,
            "string-length" => Self::StringLength,
            "normalize-space" => Self::NormalizeSpace,
            "translate" => Self::Translate,
            "boolean" => Self::Boolean,
            "not" => Self::Not,
            "true" => Self::True,
            "false" => Self::False,
            "lang" => Self::Lang,
            "number" => Self::Number,
            "sum" => Self::Sum,
            "floor" => Self::Floor,
            "ceiling" => Self::Ceiling,
            "round" => Self::Round,
            _ => return None,
        })
    }

    /// Returns the function name as written in `XPath` syntax.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Last => "last",
            Self::Position => "position",
            Self::Count => "count",
            Self::Id => "id",
            Self::LocalName => "local-name",
            Self::NamespaceUri => "namespace-uri",
            Self::Name => "name",
            Self::String => "string",
            Self::Concat => "concat",
            Self::StartsWith => "starts-with",
            Self::Contains => "contains",
            Self::SubstringBefore => "substring-before",
            Self::SubstringAfter => "substring-after",
            Self::Substring => "substring",
            Self::StringLength => "string-length",
            Self::NormalizeSpace => "normalize-space",
            Self::Translate => "translate",
            Self::Boolean => "boolean",
            Self::Not => "not",
            Self::True => "true",
            Self::False => "false",
            Self::Lang => "lang",
            Self::Number => "number",
            Self::Sum => "sum",
            Self::Floor => "floor",
            Self::Ceiling => "ceiling",
            Self::Round => "round",
        }
    }

    /// The accepted argument counts as `(min, max, description)`.
    /// `max` is `None` for variadic functions.
    #[must_use]
    pub fn arity(self) -> (usize, Option<usize>, &'static str) {
        match self {
            Self::Last | Self::Position | Self::True | Self::False => (0, Some(0), "0"),
            Self::LocalName
            | Self::NamespaceUri
            | Self::Name
            | Self::String
            | Self::StringLength
            | Self::NormalizeSpace
            | Self::Number => (0, Some(1), "0 or 1"),
            Self::Count
            | Self::Id
            | Self::Boolean
            | Self::Not
            | Self::Lang
            | Self::Sum
            | Self::Floor
            | Self::Ceiling
            | Self::Round => (1, Some(1), "1"),
            Self::StartsWith | Self::Contains | Self::SubstringBefore | Self::SubstringAfter => {
                (2, Some(2), "2")
            }
            Self::Substring => (2, Some(3), "2 or 3"),
            Self::Translate => (3, Some(3), "3"),
            Self::Concat => (2, None, "at least 2"),
        }
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_axis_roundtrip() {
        let axes = [
            Axis::Child,
            Axis::Descendant,
            Axis::Parent,
            Axis::Ancestor,
            Axis::FollowingSibling,
            Axis::PrecedingSibling,
            Axis::Following,
            Axis::Preceding,
            Axis::Attribute,
            Axis::Namespace,
            Axis::Self_,
            Axis::DescendantOrSelf,
            Axis::AncestorOrSelf,
        ];
        for axis in axes {
            assert_eq!(Axis::parse(axis.as_str()), Some(axis));
        }
        assert_eq!(Axis::parse("sideways"), None);
    }

    #[test]
    fn test_reverse_axes() {
        assert!(Axis::Ancestor.is_reverse());
        assert!(Axis::PrecedingSibling.is_reverse());
        assert!(!Axis::Child.is_reverse());
        assert!(!Axis::Following.is_reverse());
    }

    #[test]
    fn test_function_lookup() {
        assert_eq!(Function::parse("normalize-space"), Some(Function::NormalizeSpace));
        assert_eq!(Function::parse("Normalize-Space"), None);
        assert_eq!(Function::Concat.arity().1, None);
        assert_eq!(Function::Substring.to_string(), "substring");
    }

    #[test]
    fn test_node_test_display() {
        let t = NodeTest::Name {
            namespace: Some("urn:x".into()),
            local: "a".into(),
        };
        assert_eq!(t.to_string(), "{urn:x}a");
        assert_eq!(
            NodeTest::ProcessingInstruction(Some("pi".into())).to_string(),
            "processing-instruction('pi')"
        );
    }
}
