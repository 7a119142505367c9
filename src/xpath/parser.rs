//! Recursive descent parser for `XPath` 1.0 expressions.
//!
//! Implements the grammar from <https://www.w3.org/TR/xpath-10/#section-Location-Paths>
//! and resolves namespace prefixes in name tests against a
//! [`NamespaceBindings`] table as it goes. Function names are checked
//! against the core library here too, so a compiled expression can only fail
//! at evaluation time on types and variables.

use super::ast::{Axis, BinaryOp, Expr, Function, NodeTest, Step};
use super::lexer::{make_error, Lexer, Spanned, Token};
use super::types::XPathError;
use super::NamespaceBindings;

/// Deepest nesting of groups, predicates, arguments and operator chains.
const MAX_DEPTH: usize = 256;

/// Parses an expression into a resolved AST.
///
/// # Errors
///
/// - [`XPathError::Syntax`] for malformed expressions
/// - [`XPathError::UnknownNamespace`] for a prefix with no binding
/// - [`XPathError::UndefinedFunction`] / [`XPathError::InvalidArgCount`]
///   for calls outside the core library or with a bad argument count
///
/// Expressions nested deeper than an internal limit are a syntax error.
pub fn parse(input: &str, namespaces: &NamespaceBindings) -> Result<Expr, XPathError> {
    let tokens = Lexer::new(input).tokenize()?;
    if tokens.is_empty() {
        return Err(make_error(0, "empty XPath expression"));
    }

    let mut parser = Parser {
        tokens,
        pos: 0,
        end: input.len(),
        depth: 0,
        namespaces,
    };
    let expr = parser.parse_or_expr()?;

    if let Some((token, _)) = parser.tokens.get(parser.pos) {
        return Err(parser.error(&format!("unexpected token '{token}' after expression")));
    }
    Ok(expr)
}

struct Parser<'n> {
    tokens: Vec<Spanned>,
    pos: usize,
    /// Byte length of the input, reported for errors at end of input.
    end: usize,
    depth: usize,
    namespaces: &'n NamespaceBindings,
}

impl Parser<'_> {
    // --- Token access ---

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn check(&self, token: &Token) -> bool {
        self.peek() == Some(token)
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.check(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token) -> Result<(), XPathError> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(self.error(&format!(
                "expected '{token}', found {}",
                self.describe_current()
            )))
        }
    }

    fn describe_current(&self) -> String {
        self.peek()
            .map_or_else(|| "end of expression".to_owned(), |t| format!("'{t}'"))
    }

    fn error(&self, message: &str) -> XPathError {
        let position = self.tokens.get(self.pos).map_or(self.end, |(_, p)| *p);
        make_error(position, message)
    }

    /// Counts one level of nesting. Levels taken inside an `OrExpr` are
    /// released when it returns.
    fn descend(&mut self) -> Result<(), XPathError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(self.error("expression nested too deeply"));
        }
        Ok(())
    }

    // --- Operators, lowest precedence first ---

    fn parse_or_expr(&mut self) -> Result<Expr, XPathError> {
        let depth = self.depth;
        self.descend()?;
        let result = self.parse_or_chain();
        self.depth = depth;
        result
    }

    fn parse_or_chain(&mut self) -> Result<Expr, XPathError> {
        let mut left = self.parse_and_expr()?;
        while self.eat(&Token::Or) {
            self.descend()?;
            let right = self.parse_and_expr()?;
            left = binary(BinaryOp::Or, left, right);
        }
        Ok(left)
    }

    fn parse_and_expr(&mut self) -> Result<Expr, XPathError> {
        let mut left = self.parse_equality_expr()?;
        while self.eat(&Token::And) {
            self.descend()?;
            let right = self.parse_equality_expr()?;
            left = binary(BinaryOp::And, left, right);
        }
        Ok(left)
    }

    fn parse_equality_expr(&mut self) -> Result<Expr, XPathError> {
        let mut left = self.parse_relational_expr()?;
        loop {
            let op = match self.peek() {
                Some(Token::Equal) => BinaryOp::Eq,
                Some(Token::NotEqual) => BinaryOp::Neq,
                _ => break,
            };
            self.pos += 1;
            self.descend()?;
            let right = self.parse_relational_expr()?;
            left = binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_relational_expr(&mut self) -> Result<Expr, XPathError> {
        let mut left = self.parse_additive_expr()?;
        loop {
            let op = match self.peek() {
                Some(Token::LessThan) => BinaryOp::Lt,
                Some(Token::LessThanEqual) => BinaryOp::Lte,
                Some(Token::GreaterThan) => BinaryOp::Gt,
                Some(Token::GreaterThanEqual) => BinaryOp::Gte,
                _ => break,
            };
            self.pos += 1;
            self.descend()?;
            let right = self.parse_additive_expr()?;
            left = binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_additive_expr(&mut self) -> Result<Expr, XPathError> {
        let mut left = self.parse_multiplicative_expr()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => break,
            };
            self.pos += 1;
            self.descend()?;
            let right = self.parse_multiplicative_expr()?;
            left = binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_multiplicative_expr(&mut self) -> Result<Expr, XPathError> {
        let mut left = self.parse_unary_expr()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Div) => BinaryOp::Div,
                Some(Token::Mod) => BinaryOp::Mod,
                _ => break,
            };
            self.pos += 1;
            self.descend()?;
            let right = self.parse_unary_expr()?;
            left = binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_unary_expr(&mut self) -> Result<Expr, XPathError> {
        if self.eat(&Token::Minus) {
            self.descend()?;
            let inner = self.parse_unary_expr()?;
            Ok(Expr::UnaryNeg(Box::new(inner)))
        } else {
            self.parse_union_expr()
        }
    }

    fn parse_union_expr(&mut self) -> Result<Expr, XPathError> {
        let mut left = self.parse_path_expr()?;
        while self.eat(&Token::Pipe) {
            self.descend()?;
            let right = self.parse_path_expr()?;
            left = Expr::Union(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    // --- Paths ---

    /// ```text
    /// PathExpr ::= LocationPath
    ///            | FilterExpr (('/' | '//') RelativeLocationPath)?
    /// ```
    fn parse_path_expr(&mut self) -> Result<Expr, XPathError> {
        match self.peek() {
            Some(
                Token::Slash
                | Token::DoubleSlash
                | Token::Dot
                | Token::DotDot
                | Token::At
                | Token::AxisName(_)
                | Token::NodeType(_)
                | Token::Name(_),
            ) => self.parse_location_path(),

            Some(
                Token::VariableReference(_)
                | Token::Literal(_)
                | Token::Number(_)
                | Token::LeftParen
                | Token::FunctionName(_),
            ) => {
                let filter = self.parse_filter_expr()?;
                let mut steps = Vec::new();
                if self.eat(&Token::DoubleSlash) {
                    steps.push(Step::new(Axis::DescendantOrSelf, NodeTest::Node));
                } else if !self.eat(&Token::Slash) {
                    return Ok(filter);
                }
                self.parse_relative_location_path_into(&mut steps)?;
                Ok(Expr::FilterPath {
                    filter: Box::new(filter),
                    steps,
                })
            }

            _ => Err(self.error(&format!(
                "expected expression, found {}",
                self.describe_current()
            ))),
        }
    }

    fn parse_filter_expr(&mut self) -> Result<Expr, XPathError> {
        let expr = self.parse_primary_expr()?;
        let predicates = self.parse_predicates()?;
        if predicates.is_empty() {
            Ok(expr)
        } else {
            Ok(Expr::Filter {
                expr: Box::new(expr),
                predicates,
            })
        }
    }

    fn parse_primary_expr(&mut self) -> Result<Expr, XPathError> {
        let Some(token) = self.peek().cloned() else {
            return Err(self.error("expected primary expression, found end of expression"));
        };
        match token {
            Token::VariableReference(name) => {
                self.pos += 1;
                if let Some((prefix, _)) = name.split_once(':') {
                    self.namespaces.require(prefix)?;
                }
                Ok(Expr::Variable(name))
            }
            Token::Literal(value) => {
                self.pos += 1;
                Ok(Expr::String(value))
            }
            Token::Number(value) => {
                self.pos += 1;
                Ok(Expr::Number(value))
            }
            Token::LeftParen => {
                self.pos += 1;
                let expr = self.parse_or_expr()?;
                self.expect(&Token::RightParen)?;
                Ok(expr)
            }
            Token::FunctionName(name) => {
                self.pos += 1;
                self.parse_function_call(&name)
            }
            other => Err(self.error(&format!("expected primary expression, found '{other}'"))),
        }
    }

    fn parse_function_call(&mut self, name: &str) -> Result<Expr, XPathError> {
        let function = Function::parse(name).ok_or_else(|| XPathError::UndefinedFunction {
            name: name.to_owned(),
        })?;
        self.expect(&Token::LeftParen)?;

        let mut args = Vec::new();
        if !self.check(&Token::RightParen) {
            args.push(self.parse_or_expr()?);
            while self.eat(&Token::Comma) {
                args.push(self.parse_or_expr()?);
            }
        }
        self.expect(&Token::RightParen)?;

        let (min, max, expected) = function.arity();
        if args.len() < min || max.is_some_and(|m| args.len() > m) {
            return Err(XPathError::InvalidArgCount {
                function: function.name(),
                expected,
                found: args.len(),
            });
        }
        Ok(Expr::FunctionCall { function, args })
    }

    fn parse_location_path(&mut self) -> Result<Expr, XPathError> {
        if self.eat(&Token::Slash) {
            let mut steps = Vec::new();
            if self.is_step_start() {
                self.parse_relative_location_path_into(&mut steps)?;
            }
            Ok(Expr::RootPath { steps })
        } else if self.eat(&Token::DoubleSlash) {
            let mut steps = vec![Step::new(Axis::DescendantOrSelf, NodeTest::Node)];
            self.parse_relative_location_path_into(&mut steps)?;
            Ok(Expr::RootPath { steps })
        } else {
            let mut steps = Vec::new();
            self.parse_relative_location_path_into(&mut steps)?;
            Ok(Expr::Path { steps })
        }
    }

    fn parse_relative_location_path_into(
        &mut self,
        steps: &mut Vec<Step>,
    ) -> Result<(), XPathError> {
        steps.push(self.parse_step()?);
        loop {
            if self.eat(&Token::DoubleSlash) {
                steps.push(Step::new(Axis::DescendantOrSelf, NodeTest::Node));
                steps.push(self.parse_step()?);
            } else if self.eat(&Token::Slash) {
                steps.push(self.parse_step()?);
            } else {
                return Ok(());
            }
        }
    }

    fn is_step_start(&self) -> bool {
        matches!(
            self.peek(),
            Some(
                Token::Dot
                    | Token::DotDot
                    | Token::At
                    | Token::Name(_)
                    | Token::NodeType(_)
                    | Token::AxisName(_)
            )
        )
    }

    fn parse_step(&mut self) -> Result<Step, XPathError> {
        if self.eat(&Token::Dot) {
            return Ok(Step::new(Axis::Self_, NodeTest::Node));
        }
        if self.eat(&Token::DotDot) {
            return Ok(Step::new(Axis::Parent, NodeTest::Node));
        }

        let axis = self.parse_axis_specifier()?;
        let node_test = self.parse_node_test()?;
        let predicates = self.parse_predicates()?;
        Ok(Step {
            axis,
            node_test,
            predicates,
        })
    }

    fn parse_axis_specifier(&mut self) -> Result<Axis, XPathError> {
        if self.eat(&Token::At) {
            return Ok(Axis::Attribute);
        }
        if let Some(Token::AxisName(name)) = self.peek() {
            let axis = Axis::parse(name)
                .ok_or_else(|| self.error(&format!("unknown axis '{name}'")))?;
            self.pos += 1;
            self.expect(&Token::ColonColon)?;
            return Ok(axis);
        }
        Ok(Axis::Child)
    }

    fn parse_node_test(&mut self) -> Result<NodeTest, XPathError> {
        match self.peek().cloned() {
            Some(Token::NodeType(kind)) => {
                self.pos += 1;
                self.expect(&Token::LeftParen)?;
                let test = match kind.as_str() {
                    "node" => NodeTest::Node,
                    "text" => NodeTest::Text,
                    "comment" => NodeTest::Comment,
                    _ => match self.peek().cloned() {
                        Some(Token::Literal(target)) => {
                            self.pos += 1;
                            NodeTest::ProcessingInstruction(Some(target))
                        }
                        _ => NodeTest::ProcessingInstruction(None),
                    },
                };
                self.expect(&Token::RightParen)?;
                Ok(test)
            }
            Some(Token::Name(name)) => {
                self.pos += 1;
                self.resolve_name_test(&name)
            }
            _ => Err(self.error(&format!(
                "expected node test, found {}",
                self.describe_current()
            ))),
        }
    }

    /// Resolves `*`, `prefix:*`, `local` and `prefix:local`.
    fn resolve_name_test(&self, name: &str) -> Result<NodeTest, XPathError> {
        if name == "*" {
            return Ok(NodeTest::Wildcard);
        }
        match name.split_once(':') {
            Some((prefix, "*")) => Ok(NodeTest::NamespaceWildcard(
                self.namespaces.require(prefix)?.to_owned(),
            )),
            Some((prefix, local)) => Ok(NodeTest::Name {
                namespace: Some(self.namespaces.require(prefix)?.to_owned()),
                local: local.to_owned(),
            }),
            None => Ok(NodeTest::Name {
                namespace: None,
                local: name.to_owned(),
            }),
        }
    }

    fn parse_predicates(&mut self) -> Result<Vec<Expr>, XPathError> {
        let mut predicates = Vec::new();
        while self.eat(&Token::LeftBracket) {
            predicates.push(self.parse_or_expr()?);
            self.expect(&Token::RightBracket)?;
        }
        Ok(predicates)
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::BinaryOp {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}
