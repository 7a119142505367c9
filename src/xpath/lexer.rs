//! `XPath` 1.0 expression tokenizer.
//!
//! Converts an expression string into [`Token`]s tagged with their byte
//! offset. The disambiguation rules of `XPath` 1.0 section 3.7 are applied
//! while scanning, based on the previously emitted token:
//!
//! - After a token that ends an operand, `*` is the multiply operator and a
//!   name must be one of the operator names `and`, `or`, `mod`, `div`.
//! - Otherwise a name followed by `(` is a function name or node type, a
//!   name followed by `::` is an axis name, and anything else is a name test.

use std::fmt;

use super::types::XPathError;
use crate::parser::input::{is_name_char, is_name_start_char};

/// Names that form node type tests when followed by `(`.
const NODE_TYPE_NAMES: &[&str] = &["comment", "text", "processing-instruction", "node"];

/// A token produced by the lexer.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// `(`
    LeftParen,
    /// `)`
    RightParen,
    /// `[`
    LeftBracket,
    /// `]`
    RightBracket,
    /// `.`
    Dot,
    /// `..`
    DotDot,
    /// `@`
    At,
    /// `,`
    Comma,
    /// `::`
    ColonColon,
    /// `/`
    Slash,
    /// `//`
    DoubleSlash,
    /// `|`
    Pipe,
    /// `+`
    Plus,
    /// `-`
    Minus,
    /// `*` as the multiply operator.
    Star,
    /// `=`
    Equal,
    /// `!=`
    NotEqual,
    /// `<`
    LessThan,
    /// `<=`
    LessThanEqual,
    /// `>`
    GreaterThan,
    /// `>=`
    GreaterThanEqual,
    /// `and`
    And,
    /// `or`
    Or,
    /// `mod`
    Mod,
    /// `div`
    Div,
    /// A numeric literal.
    Number(f64),
    /// A string literal, without its quotes.
    Literal(String),
    /// A name test as written: `*`, `prefix:*`, `name` or `prefix:name`.
    Name(String),
    /// A variable reference, without the `$`.
    VariableReference(String),
    /// A name that appeared before `(`.
    FunctionName(String),
    /// `node`, `text`, `comment` or `processing-instruction` before `(`.
    NodeType(String),
    /// A name that appeared before `::`.
    AxisName(String),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LeftParen => f.write_str("("),
            Self::RightParen => f.write_str(")"),
            Self::LeftBracket => f.write_str("["),
            Self::RightBracket => f.write_str("]"),
            Self::Dot => f.write_str("."),
            Self::DotDot => f.write_str(".."),
            Self::At => f.write_str("@"),
            Self::Comma => f.write_str(","),
            Self::ColonColon => f.write_str("::"),
            Self::Slash => f.write_str("/"),
            Self::DoubleSlash => f.write_str("//"),
            Self::Pipe => f.write_str("|"),
            Self::Plus => f.write_str("+"),
            Self::Minus => f.write_str("-"),
            Self::Star => f.write_str("*"),
            Self::Equal => f.write_str("="),
            Self::NotEqual => f.write_str("!="),
            Self::LessThan => f.write_str("<"),
            Self::LessThanEqual => f.write_str("<="),
            Self::GreaterThan => f.write_str(">"),
            Self::GreaterThanEqual => f.write_str(">="),
            Self::And => f.write_str("and"),
            Self::Or => f.write_str("or"),
            Self::Mod => f.write_str("mod"),
            Self::Div => f.write_str("div"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Literal(s) => write!(f, "\"{s}\""),
            Self::Name(s) | Self::FunctionName(s) | Self::NodeType(s) | Self::AxisName(s) => {
                f.write_str(s)
            }
            Self::VariableReference(s) => write!(f, "${s}"),
        }
    }
}

/// A token and the byte offset where it starts.
pub type Spanned = (Token, usize);

/// `XPath` 1.0 expression tokenizer.
pub struct Lexer<'a> {
    input: &'a str,
    pos: usize,
    tokens: Vec<Spanned>,
}

impl<'a> Lexer<'a> {
    /// Creates a lexer for the given expression.
    #[must_use]
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            pos: 0,
            tokens: Vec::new(),
        }
    }

    /// Tokenizes the whole expression.
    ///
    /// # Errors
    ///
    /// Returns [`XPathError::Syntax`] for an unterminated literal, a stray
    /// character, or a name where an operator is required.
    pub fn tokenize(mut self) -> Result<Vec<Spanned>, XPathError> {
        loop {
            self.skip_whitespace();
            let Some(ch) = self.peek() else {
                break;
            };
            let start = self.pos;
            let token = self.next_token(ch)?;
            self.tokens.push((token, start));
        }
        Ok(self.tokens)
    }

    fn next_token(&mut self, ch: char) -> Result<Token, XPathError> {
        let simple = match ch {
            '(' => Some(Token::LeftParen),
            ')' => Some(Token::RightParen),
            '[' => Some(Token::LeftBracket),
            ']' => Some(Token::RightBracket),
            '@' => Some(Token::At),
            ',' => Some(Token::Comma),
            '|' => Some(Token::Pipe),
            '+' => Some(Token::Plus),
            '-' => Some(Token::Minus),
            '=' => Some(Token::Equal),
            _ => None,
        };
        if let Some(token) = simple {
            self.pos += 1;
            return Ok(token);
        }

        match ch {
            '*' => {
                self.pos += 1;
                if self.follows_operand() {
                    Ok(Token::Star)
                } else {
                    Ok(Token::Name("*".to_owned()))
                }
            }
            ':' => {
                if self.rest().starts_with("::") {
                    self.pos += 2;
                    Ok(Token::ColonColon)
                } else {
                    Err(self.error("expected '::'"))
                }
            }
            '.' => Ok(self.read_dot_or_number()),
            '/' => Ok(self.read_pair('/', Token::DoubleSlash, Token::Slash)),
            '<' => Ok(self.read_pair('=', Token::LessThanEqual, Token::LessThan)),
            '>' => Ok(self.read_pair('=', Token::GreaterThanEqual, Token::GreaterThan)),
            '!' => {
                if self.rest().starts_with("!=") {
                    self.pos += 2;
                    Ok(Token::NotEqual)
                } else {
                    Err(self.error("expected '=' after '!'"))
                }
            }
            '"' | '\'' => self.read_literal(ch),
            '$' => {
                self.pos += 1;
                match self.read_qname() {
                    Some(name) => Ok(Token::VariableReference(name)),
                    None => Err(self.error("expected name after '$'")),
                }
            }
            '0'..='9' => Ok(self.read_number()),
            c if is_name_start_char(c) => self.read_name(),
            c => Err(self.error(&format!("unexpected character '{c}'"))),
        }
    }

    /// Reads `first` followed by `second`, or just `first`.
    fn read_pair(&mut self, second: char, pair: Token, single: Token) -> Token {
        self.pos += 1;
        if self.peek() == Some(second) {
            self.pos += 1;
            pair
        } else {
            single
        }
    }

    fn read_dot_or_number(&mut self) -> Token {
        if self.rest().starts_with("..") {
            self.pos += 2;
            return Token::DotDot;
        }
        if self.rest()[1..].starts_with(|c: char| c.is_ascii_digit()) {
            return self.read_number();
        }
        self.pos += 1;
        Token::Dot
    }

    /// `Digits ('.' Digits?)? | '.' Digits`
    fn read_number(&mut self) -> Token {
        let start = self.pos;
        self.skip_while(|c| c.is_ascii_digit());
        if self.peek() == Some('.') {
            self.pos += 1;
            self.skip_while(|c| c.is_ascii_digit());
        }
        let text = &self.input[start..self.pos];
        // The scanned text is always a valid float literal.
        Token::Number(text.parse().unwrap_or(f64::NAN))
    }

    fn read_literal(&mut self, quote: char) -> Result<Token, XPathError> {
        let start = self.pos;
        self.pos += 1;
        match self.rest().find(quote) {
            Some(len) => {
                let content = self.rest()[..len].to_owned();
                self.pos += len + 1;
                Ok(Token::Literal(content))
            }
            None => Err(make_error(start, "unterminated string literal")),
        }
    }

    /// Reads a name, then classifies it by context.
    fn read_name(&mut self) -> Result<Token, XPathError> {
        let start = self.pos;

        if self.follows_operand() {
            let name = self.read_ncname();
            return match name {
                "and" => Ok(Token::And),
                "or" => Ok(Token::Or),
                "mod" => Ok(Token::Mod),
                "div" => Ok(Token::Div),
                other => Err(make_error(
                    start,
                    &format!("expected an operator, found '{other}'"),
                )),
            };
        }

        let ncname = self.read_ncname().to_owned();

        // prefix:* or prefix:local, but not axis::
        if self.peek() == Some(':') && !self.rest().starts_with("::") {
            let after = self.rest()[1..].chars().next();
            if after == Some('*') {
                self.pos += 2;
                return Ok(Token::Name(format!("{ncname}:*")));
            }
            if after.is_some_and(is_name_start_char) {
                self.pos += 1;
                let local = self.read_ncname();
                let qname = format!("{ncname}:{local}");
                return Ok(self.classify(qname));
            }
        }
        Ok(self.classify(ncname))
    }

    fn classify(&mut self, name: String) -> Token {
        let save = self.pos;
        self.skip_whitespace();
        let next = self.rest();
        let token = if next.starts_with('(') {
            if NODE_TYPE_NAMES.contains(&name.as_str()) {
                Token::NodeType(name)
            } else {
                Token::FunctionName(name)
            }
        } else if next.starts_with("::") {
            Token::AxisName(name)
        } else {
            Token::Name(name)
        };
        self.pos = save;
        token
    }

    fn read_ncname(&mut self) -> &'a str {
        let start = self.pos;
        self.skip_while(|c| c != ':' && is_name_char(c));
        &self.input[start..self.pos]
    }

    fn read_qname(&mut self) -> Option<String> {
        if !self.peek().is_some_and(is_name_start_char) {
            return None;
        }
        let prefix = self.read_ncname();
        if self.peek() == Some(':') && self.rest()[1..].starts_with(is_name_start_char) {
            self.pos += 1;
            let local = self.read_ncname();
            return Some(format!("{prefix}:{local}"));
        }
        Some(prefix.to_owned())
    }

    /// True when the previous token ends an operand, which turns `*` into
    /// multiplication and names into operator names.
    fn follows_operand(&self) -> bool {
        self.tokens.last().is_some_and(|(t, _)| {
            matches!(
                t,
                Token::RightParen
                    | Token::RightBracket
                    | Token::Dot
                    | Token::DotDot
                    | Token::Number(_)
                    | Token::Literal(_)
                    | Token::Name(_)
                    | Token::VariableReference(_)
            )
        })
    }

    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn skip_while(&mut self, pred: impl Fn(char) -> bool) {
        let len = self
            .rest()
            .find(|c: char| !pred(c))
            .unwrap_or(self.rest().len());
        self.pos += len;
    }

    fn skip_whitespace(&mut self) {
        self.skip_while(|c| matches!(c, ' ' | '\t' | '\n' | '\r'));
    }

    fn error(&self, message: &str) -> XPathError {
        make_error(self.pos, message)
    }
}

pub(crate) fn make_error(position: usize, message: &str) -> XPathError {
    XPathError::Syntax {
        message: message.to_owned(),
        position,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn tokenize(input: &str) -> Vec<Token> {
        Lexer::new(input)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|(t, _)| t)
            .collect()
    }

    fn name(s: &str) -> Token {
        Token::Name(s.to_owned())
    }

    #[test]
    fn test_tokenize_abbreviated_path() {
        assert_eq!(
            tokenize("//a/@b"),
            vec![
                Token::DoubleSlash,
                name("a"),
                Token::Slash,
                Token::At,
                name("b")
            ]
        );
    }

    #[test]
    fn test_tokenize_star_disambiguation() {
        assert_eq!(tokenize("*"), vec![name("*")]);
        assert_eq!(
            tokenize("2 * 3"),
            vec![Token::Number(2.0), Token::Star, Token::Number(3.0)]
        );
        assert_eq!(
            tokenize("a/*"),
            vec![name("a"), Token::Slash, name("*")]
        );
        assert_eq!(tokenize("a * *"), vec![name("a"), Token::Star, name("*")]);
    }

    #[test]
    fn test_tokenize_operator_names() {
        assert_eq!(
            tokenize("div div div"),
            vec![name("div"), Token::Div, name("div")]
        );
        assert_eq!(
            tokenize("a and b or c mod 2"),
            vec![
                name("a"),
                Token::And,
                name("b"),
                Token::Or,
                name("c"),
                Token::Mod,
                Token::Number(2.0)
            ]
        );
    }

    #[test]
    fn test_tokenize_functions_node_types_and_axes() {
        assert_eq!(
            tokenize("count (child::text())"),
            vec![
                Token::FunctionName("count".into()),
                Token::LeftParen,
                Token::AxisName("child".into()),
                Token::ColonColon,
                Token::NodeType("text".into()),
                Token::LeftParen,
                Token::RightParen,
                Token::RightParen
            ]
        );
    }

    #[test]
    fn test_tokenize_qualified_names() {
        assert_eq!(
            tokenize("svg:rect | svg:* | $p:v"),
            vec![
                name("svg:rect"),
                Token::Pipe,
                name("svg:*"),
                Token::Pipe,
                Token::VariableReference("p:v".into())
            ]
        );
    }

    #[test]
    fn test_tokenize_numbers_and_literals() {
        assert_eq!(
            tokenize(".5 + 3. - 'x' = \"y\""),
            vec![
                Token::Number(0.5),
                Token::Plus,
                Token::Number(3.0),
                Token::Minus,
                Token::Literal("x".into()),
                Token::Equal,
                Token::Literal("y".into())
            ]
        );
    }

    #[test]
    fn test_tokenize_comparisons() {
        assert_eq!(
            tokenize("a<=b>=c!=d<e>f"),
            vec![
                name("a"),
                Token::LessThanEqual,
                name("b"),
                Token::GreaterThanEqual,
                name("c"),
                Token::NotEqual,
                name("d"),
                Token::LessThan,
                name("e"),
                Token::GreaterThan,
                name("f")
            ]
        );
    }

    #[test]
    fn test_tokenize_unicode_and_hyphenated_names() {
        assert_eq!(
            tokenize("café/my-elem.x"),
            vec![name("café"), Token::Slash, name("my-elem.x")]
        );
    }

    #[test]
    fn test_token_positions() {
        let tokens = Lexer::new("a  / b").tokenize().unwrap();
        let positions: Vec<usize> = tokens.iter().map(|(_, p)| *p).collect();
        assert_eq!(positions, vec![0, 3, 5]);
    }

    #[test]
    fn test_tokenize_errors() {
        let err = Lexer::new("a = 'open").tokenize().unwrap_err();
        assert_eq!(
            err,
            XPathError::Syntax {
                message: "unterminated string literal".into(),
                position: 4
            }
        );
        assert!(Lexer::new("a ! b").tokenize().is_err());
        assert!(Lexer::new("a b").tokenize().is_err());
        assert!(Lexer::new("#").tokenize().is_err());
        assert!(Lexer::new("$").tokenize().is_err());
    }
}
