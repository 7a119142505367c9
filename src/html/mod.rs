//! Error-tolerant HTML parser.
//!
//! Unlike the strict XML parser, this parser accepts the patterns real-world
//! HTML is full of:
//!
//! - Missing closing tags (auto-closed based on HTML content model rules)
//! - Unquoted attribute values (`<div class=main>`)
//! - Void elements that never need closing (`<br>`, `<img>`, `<hr>`, etc.)
//! - Case-insensitive tag and attribute names (normalized to lowercase)
//! - Bare `&` characters and named references such as `&nbsp;`
//! - Boolean attributes without values (`<input disabled>`)
//!
//! Malformed markup never produces an error; problems are recorded as
//! warnings in `Document::diagnostics`. The only failures are empty input
//! and exceeding the nesting limit.
//!
//! # Examples
//!
//! ```
//! use xmlquill::html::parse_html;
//!
//! let doc = parse_html("<p>Hello <b>world</b>").unwrap();
//! let root = doc.root_element().unwrap();
//! assert_eq!(doc.node_name(root), Some("html"));
//! ```

pub mod entities;

use crate::error::{ErrorSeverity, ParseDiagnostic, ParseError};
use crate::parser::input::{split_name, ParserInput, DEFAULT_MAX_DEPTH};
use crate::tree::{Attribute, Document, NodeId, NodeKind};

/// Options controlling HTML parser behavior.
///
/// ```
/// use xmlquill::html::HtmlParseOptions;
///
/// let opts = HtmlParseOptions::default()
///     .no_blanks(true)
///     .no_implied(true);
/// assert!(opts.no_implied);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HtmlParseOptions {
    /// If true, drop whitespace-only text nodes.
    pub no_blanks: bool,
    /// If true, do not add implied `html`, `head`, and `body` elements.
    pub no_implied: bool,
    /// If true, suppress warning diagnostics.
    pub no_warnings: bool,
    /// Maximum element nesting depth (default: 256).
    pub max_depth: u32,
}

impl Default for HtmlParseOptions {
    fn default() -> Self {
        Self {
            no_blanks: false,
            no_implied: false,
            no_warnings: false,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl HtmlParseOptions {
    /// Enables or disables stripping of blank text nodes.
    #[must_use]
    pub fn no_blanks(mut self, yes: bool) -> Self {
        self.no_blanks = yes;
        self
    }

    /// Enables or disables creation of implied structural elements.
    #[must_use]
    pub fn no_implied(mut self, yes: bool) -> Self {
        self.no_implied = yes;
        self
    }

    /// Enables or disables suppression of warnings.
    #[must_use]
    pub fn no_warnings(mut self, yes: bool) -> Self {
        self.no_warnings = yes;
        self
    }

    /// Sets the maximum element nesting depth.
    #[must_use]
    pub fn max_depth(mut self, max: u32) -> Self {
        self.max_depth = max;
        self
    }
}

/// Parses an HTML string with default options.
///
/// # Errors
///
/// Returns `ParseError` for empty input or when the nesting limit is hit.
pub fn parse_html(input: &str) -> Result<Document, ParseError> {
    parse_html_with_options(input, &HtmlParseOptions::default())
}

/// Parses an HTML string with the given options.
///
/// # Errors
///
/// Returns `ParseError` for empty input, when the nesting limit is hit, or
/// when `no_implied` is set and the input contains no element at all.
pub fn parse_html_with_options(
    input: &str,
    options: &HtmlParseOptions,
) -> Result<Document, ParseError> {
    HtmlParser::new(input, options).parse()
}

/// Returns true if `tag` (lowercase) is a void element that never has
/// content.
pub(crate) fn is_void_element(tag: &str) -> bool {
    matches!(
        tag,
        "area"
            | "base"
            | "basefont"
            | "br"
            | "col"
            | "embed"
            | "frame"
            | "hr"
            | "img"
            | "input"
            | "isindex"
            | "link"
            | "meta"
            | "param"
            | "source"
            | "track"
            | "wbr"
    )
}

/// Returns true if opening `tag` implicitly closes an open `open_tag`.
///
/// Follows the optional end tag rules of the HTML 4.01 DTD.
fn auto_closes(open_tag: &str, tag: &str) -> bool {
    match open_tag {
        "p" => matches!(
            tag,
            "p" | "div"
                | "ul"
                | "ol"
                | "dl"
                | "pre"
                | "table"
                | "blockquote"
                | "address"
                | "h1"
                | "h2"
                | "h3"
                | "h4"
                | "h5"
                | "h6"
                | "hr"
                | "form"
                | "section"
                | "article"
                | "aside"
                | "header"
                | "footer"
                | "nav"
                | "figure"
                | "main"
        ),
        "li" => tag == "li",
        "dt" | "dd" => matches!(tag, "dt" | "dd"),
        "tr" => tag == "tr",
        "td" | "th" => matches!(tag, "td" | "th" | "tr"),
        "thead" | "tbody" => matches!(tag, "tbody" | "tfoot"),
        "option" => matches!(tag, "option" | "optgroup"),
        "head" => tag == "body",
        _ => false,
    }
}

/// Returns true if `tag` holds raw text that is not parsed as markup.
pub(crate) fn is_raw_text_element(tag: &str) -> bool {
    matches!(tag, "script" | "style")
}

fn is_head_content_element(tag: &str) -> bool {
    matches!(
        tag,
        "title" | "meta" | "link" | "base" | "style" | "script" | "noscript"
    )
}

fn is_attr_name_end(b: u8) -> bool {
    b.is_ascii_whitespace() || matches!(b, b'=' | b'>' | b'/' | b'<' | b'"' | b'\'')
}

struct HtmlParser<'a> {
    input: ParserInput<'a>,
    doc: Document,
    options: HtmlParseOptions,
    /// Open elements with their lowercase tag names, innermost last.
    open_elements: Vec<(NodeId, String)>,
    fatal_error: Option<ParseError>,
}

impl<'a> HtmlParser<'a> {
    fn new(input: &'a str, options: &HtmlParseOptions) -> Self {
        let mut pi = ParserInput::new(input);
        pi.set_recover(true);
        pi.set_max_depth(options.max_depth);
        Self {
            input: pi,
            doc: Document::new(),
            options: options.clone(),
            open_elements: Vec::new(),
            fatal_error: None,
        }
    }

    fn parse(mut self) -> Result<Document, ParseError> {
        self.input.skip_whitespace();
        if self.input.at_end() {
            return Err(self.input.fatal("document is empty"));
        }

        if self.input.looking_at_ci(b"<!doctype") {
            self.parse_doctype();
        }

        self.parse_content();
        if let Some(err) = self.fatal_error.take() {
            return Err(err);
        }

        while let Some((_, tag)) = self.open_elements.pop() {
            if !matches!(tag.as_str(), "html" | "head" | "body") {
                self.push_warning(format!("unclosed element <{tag}> at end of document"));
            }
        }

        if self.doc.root_element().is_none() {
            if self.options.no_implied {
                return Err(self.input.fatal("document has no root element"));
            }
            self.ensure_body();
        }
        Ok(self.doc)
    }

    // --- Implied structure ---

    fn find_child_element(&self, parent: NodeId, tag: &str) -> Option<NodeId> {
        self.doc
            .children(parent)
            .find(|&id| self.doc.node_name(id) == Some(tag) && self.doc.node(id).kind.is_element())
    }

    fn ensure_html(&mut self) -> NodeId {
        let root = self.doc.root();
        if let Some(html) = self.find_child_element(root, "html") {
            return html;
        }
        let html = self.doc.create_node(NodeKind::element("html"));
        self.doc.append_child(root, html);
        self.open_elements.insert(0, (html, "html".to_string()));
        html
    }

    fn ensure_head(&mut self) -> NodeId {
        let html = self.ensure_html();
        if let Some(head) = self.find_child_element(html, "head") {
            return head;
        }
        let head = self.doc.create_node(NodeKind::element("head"));
        match self.find_child_element(html, "body") {
            Some(body) => self.doc.insert_before(body, head),
            None => self.doc.append_child(html, head),
        }
        head
    }

    fn ensure_body(&mut self) -> NodeId {
        let html = self.ensure_html();
        if let Some(body) = self.find_child_element(html, "body") {
            return body;
        }
        let body = self.doc.create_node(NodeKind::element("body"));
        self.doc.append_child(html, body);
        self.close_head_if_open();
        self.open_elements.push((body, "body".to_string()));
        body
    }

    fn close_head_if_open(&mut self) {
        if let Some(pos) = self.open_elements.iter().position(|(_, t)| t == "head") {
            self.open_elements.truncate(pos);
        }
    }

    fn is_open(&self, tag: &str) -> bool {
        self.open_elements.iter().any(|(_, t)| t == tag)
    }

    fn current_parent(&self) -> NodeId {
        self.open_elements
            .last()
            .map_or_else(|| self.doc.root(), |&(id, _)| id)
    }

    // --- Content ---

    fn parse_content(&mut self) {
        while !self.input.at_end() && self.fatal_error.is_none() {
            let next = self.input.peek_at(1);
            if self.input.looking_at(b"<!--") {
                self.parse_comment();
            } else if self.input.looking_at_ci(b"<!doctype") {
                self.push_warning("misplaced DOCTYPE declaration".to_string());
                self.skip_to_gt();
            } else if self.input.looking_at(b"</") && next.is_some() {
                self.parse_end_tag();
            } else if self.input.peek() == Some(b'<') && next.is_some_and(|b| b.is_ascii_alphabetic()) {
                self.parse_start_tag();
            } else if self.input.looking_at(b"<!") || self.input.looking_at(b"<?") {
                self.push_warning("bogus markup declaration".to_string());
                self.skip_to_gt();
            } else {
                self.parse_text();
            }
        }
    }

    fn parse_doctype(&mut self) {
        self.input.advance(b"<!doctype".len());
        self.input.skip_whitespace();
        let name = self.parse_tag_name().to_ascii_lowercase();
        self.input.skip_whitespace();

        let (mut public_id, mut system_id) = (None, None);
        if self.input.looking_at_ci(b"public") {
            self.input.advance(6);
            self.input.skip_whitespace();
            public_id = self.try_parse_quoted_value();
            self.input.skip_whitespace();
            system_id = self.try_parse_quoted_value();
        } else if self.input.looking_at_ci(b"system") {
            self.input.advance(6);
            self.input.skip_whitespace();
            system_id = self.try_parse_quoted_value();
        }
        self.skip_to_gt();

        let node = self.doc.create_node(NodeKind::DocumentType {
            name: if name.is_empty() { "html".to_string() } else { name },
            system_id,
            public_id,
        });
        let root = self.doc.root();
        self.doc.append_child(root, node);
    }

    fn parse_start_tag(&mut self) {
        self.input.advance(1);
        let tag = self.parse_tag_name().to_ascii_lowercase();
        let attributes = self.parse_attributes();

        self.input.skip_whitespace();
        let self_closing = self.input.looking_at(b"/>");
        if self_closing {
            self.input.advance(1);
        }
        if self.input.peek() == Some(b'>') {
            self.input.advance(1);
        } else if !self.input.at_end() {
            self.push_warning(format!("expected '>' after tag <{tag}>"));
            self.skip_to_gt();
        }

        if !self.options.no_implied && self.merge_structural(&tag, &attributes) {
            return;
        }

        while self
            .open_elements
            .last()
            .is_some_and(|(_, open)| auto_closes(open, &tag))
        {
            self.open_elements.pop();
        }

        if !self.options.no_implied {
            if is_head_content_element(&tag) && !self.is_open("body") {
                let head = self.ensure_head();
                if !self.is_open("head") {
                    self.open_elements.push((head, "head".to_string()));
                }
            } else {
                self.ensure_body();
            }
        }

        if self.open_elements.len() >= self.options.max_depth as usize {
            self.fatal_error = Some(self.input.fatal(format!(
                "maximum nesting depth exceeded ({})",
                self.options.max_depth
            )));
            return;
        }

        let (prefix, local) = split_name(&tag);
        let node = self.doc.create_node(NodeKind::Element {
            name: local.to_string(),
            prefix: prefix.filter(|p| !p.is_empty()).map(str::to_owned),
            namespace: None,
            attributes,
        });
        let parent = self.current_parent();
        self.doc.append_child(parent, node);

        if is_void_element(&tag) || self_closing {
            return;
        }
        if is_raw_text_element(&tag) {
            self.parse_raw_text(node, &tag);
            return;
        }
        self.open_elements.push((node, tag));
    }

    /// Folds explicit `<html>`, `<head>`, and `<body>` tags into the implied
    /// ones. Returns true if the tag was consumed.
    fn merge_structural(&mut self, tag: &str, attributes: &[Attribute]) -> bool {
        let node = match tag {
            "html" => self.ensure_html(),
            "head" if self.is_open("body") => {
                self.push_warning("<head> inside body ignored".to_string());
                return true;
            }
            "head" => {
                let head = self.ensure_head();
                if !self.is_open("head") {
                    self.open_elements.push((head, "head".to_string()));
                }
                head
            }
            "body" => self.ensure_body(),
            _ => return false,
        };
        for attr in attributes {
            if self.doc.attribute(node, &attr.name).is_none() {
                self.doc.set_attribute(node, attr.clone());
            }
        }
        true
    }

    fn parse_end_tag(&mut self) {
        self.input.advance(2);
        let tag = self.parse_tag_name().to_ascii_lowercase();
        self.skip_to_gt();

        if tag.is_empty() || is_void_element(&tag) {
            self.push_warning(format!("end tag </{tag}> ignored"));
            return;
        }
        // Structural end tags are implied at end of input.
        if !self.options.no_implied && matches!(tag.as_str(), "html" | "body") {
            return;
        }

        match self.open_elements.iter().rposition(|(_, t)| *t == tag) {
            Some(idx) => {
                let closed: Vec<String> = self
                    .open_elements
                    .drain(idx..)
                    .skip(1)
                    .map(|(_, t)| t)
                    .collect();
                for name in closed {
                    self.push_warning(format!("implicitly closing <{name}> before </{tag}>"));
                }
            }
            None => self.push_warning(format!("stray end tag </{tag}>")),
        }
    }

    // --- Attributes ---

    fn parse_attributes(&mut self) -> Vec<Attribute> {
        let mut attributes: Vec<Attribute> = Vec::new();
        loop {
            self.input.skip_whitespace();
            match self.input.peek() {
                None | Some(b'>') => break,
                Some(b'/') if self.input.looking_at(b"/>") => break,
                _ => {}
            }

            let name = self
                .input
                .take_while(|b| !is_attr_name_end(b))
                .to_ascii_lowercase();
            if name.is_empty() {
                self.input.advance(1);
                continue;
            }

            self.input.skip_whitespace();
            let value = if self.input.peek() == Some(b'=') {
                self.input.advance(1);
                self.input.skip_whitespace();
                self.parse_attr_value()
            } else {
                name.clone()
            };

            if attributes.iter().any(|a| a.qualified_name() == name) {
                self.push_warning(format!("duplicate attribute '{name}' ignored"));
                continue;
            }
            let (prefix, local) = split_name(&name);
            attributes.push(Attribute {
                name: local.to_string(),
                value,
                prefix: prefix.filter(|p| !p.is_empty()).map(str::to_owned),
                namespace: None,
            });
        }
        attributes
    }

    fn parse_attr_value(&mut self) -> String {
        let quote = match self.input.peek() {
            Some(q @ (b'"' | b'\'')) => {
                self.input.advance(1);
                Some(q)
            }
            _ => None,
        };
        let mut value = String::new();
        while let Some(b) = self.input.peek() {
            match quote {
                Some(q) if b == q => {
                    self.input.advance(1);
                    break;
                }
                None if b.is_ascii_whitespace() || b == b'>' => break,
                _ => {}
            }
            if b == b'&' {
                value.push_str(&self.parse_html_reference());
            } else {
                value.push(self.next_char_html());
            }
        }
        value
    }

    // --- Text ---

    fn parse_text(&mut self) {
        let mut text = String::new();
        while let Some(b) = self.input.peek() {
            if b == b'<' && self.is_markup_start() {
                break;
            }
            if b == b'&' {
                text.push_str(&self.parse_html_reference());
            } else {
                text.push(self.next_char_html());
            }
        }

        let blank = text.chars().all(char::is_whitespace);
        if text.is_empty() || (blank && self.options.no_blanks) {
            return;
        }
        if self.open_elements.is_empty() {
            // Whitespace between top-level constructs is not content.
            if blank {
                return;
            }
            if !self.options.no_implied {
                self.ensure_body();
            }
        } else if blank && !self.is_open("body") && !self.options.no_implied {
            return;
        }
        let parent = self.current_parent();
        let node = self.doc.create_node(NodeKind::Text { content: text });
        self.doc.append_child(parent, node);
    }

    /// Returns true if the `<` at the cursor starts markup rather than text.
    fn is_markup_start(&self) -> bool {
        match self.input.peek_at(1) {
            Some(b) if b.is_ascii_alphabetic() => true,
            Some(b'/' | b'!' | b'?') => true,
            _ => false,
        }
    }

    fn parse_raw_text(&mut self, node: NodeId, tag: &str) {
        let end_tag = format!("</{tag}");
        let start = self.input.pos();
        while !self.input.at_end() && !self.input.looking_at_ci(end_tag.as_bytes()) {
            self.input.advance(1);
        }
        let content = self.input.slice_str(start, self.input.pos()).replace("\r\n", "\n");
        if !content.is_empty() {
            let text = self.doc.create_node(NodeKind::Text { content });
            self.doc.append_child(node, text);
        }
        if !self.input.at_end() {
            self.skip_to_gt();
        }
    }

    fn parse_comment(&mut self) {
        self.input.advance(4);
        let start = self.input.pos();
        let Some(end) = self.input.find(b"-->") else {
            self.push_warning("unterminated comment".to_string());
            while !self.input.at_end() {
                self.input.advance(1);
            }
            return;
        };
        let content = self.input.slice_str(start, end).to_string();
        self.input.advance(end - start + 3);
        let parent = self.current_parent();
        let node = self.doc.create_node(NodeKind::Comment { content });
        self.doc.append_child(parent, node);
    }

    // --- References ---

    /// Parses a character or entity reference, or yields a bare `&` when
    /// the text does not form one.
    fn parse_html_reference(&mut self) -> String {
        let rest = self.input.rest();
        if let Some((consumed, value)) = match_reference(rest) {
            self.input.advance(consumed);
            if !rest[..consumed].ends_with(b";") {
                self.push_warning("character reference missing semicolon".to_string());
            }
            return value;
        }
        self.input.advance(1);
        "&".to_string()
    }

    // --- Low-level helpers ---

    fn parse_tag_name(&mut self) -> String {
        self.input
            .take_while(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b':' | b'.'))
            .to_string()
    }

    fn try_parse_quoted_value(&mut self) -> Option<String> {
        let quote = self.input.peek().filter(|&q| q == b'"' || q == b'\'')?;
        self.input.advance(1);
        let value = self.input.take_while(|b| b != quote).to_string();
        self.input.advance(1);
        Some(value)
    }

    /// Reads one character with `\r\n` normalization; invalid UTF-8 bytes
    /// become U+FFFD.
    fn next_char_html(&mut self) -> char {
        match self.input.peek_char() {
            Some('\r') => {
                self.input.advance(1);
                if self.input.peek() == Some(b'\n') {
                    self.input.advance(1);
                }
                '\n'
            }
            Some(ch) => {
                self.input.advance(ch.len_utf8());
                ch
            }
            None => {
                self.input.advance(1);
                '\u{FFFD}'
            }
        }
    }

    fn skip_to_gt(&mut self) {
        while let Some(b) = self.input.peek() {
            self.input.advance(1);
            if b == b'>' {
                return;
            }
        }
    }

    fn push_warning(&mut self, message: String) {
        if !self.options.no_warnings {
            self.doc.diagnostics.push(ParseDiagnostic {
                severity: ErrorSeverity::Warning,
                message,
                location: self.input.location(),
            });
        }
    }
}

/// Matches a reference at the start of `bytes` (which begins with `&`).
/// Returns the number of bytes consumed and the expansion.
fn match_reference(bytes: &[u8]) -> Option<(usize, String)> {
    let body = bytes.get(1..)?;
    if let Some(num) = body.strip_prefix(b"#") {
        let (digits_at, radix) = match num.first() {
            Some(b'x' | b'X') => (2, 16),
            _ => (1, 10),
        };
        let digits = &body[digits_at..];
        let len = digits
            .iter()
            .take_while(|b| if radix == 16 { b.is_ascii_hexdigit() } else { b.is_ascii_digit() })
            .count();
        if len == 0 {
            return None;
        }
        let text = std::str::from_utf8(&digits[..len]).ok()?;
        let ch = u32::from_str_radix(text, radix)
            .ok()
            .and_then(char::from_u32)
            .unwrap_or('\u{FFFD}');
        let mut consumed = 1 + digits_at + len;
        if digits.get(len) == Some(&b';') {
            consumed += 1;
        }
        return Some((consumed, ch.to_string()));
    }

    let len = body.iter().take_while(|b| b.is_ascii_alphanumeric()).count();
    let name = std::str::from_utf8(&body[..len]).ok()?;
    let value = entities::lookup_entity(name)?;
    let consumed = if body.get(len) == Some(&b';') { len + 2 } else { len + 1 };
    Some((consumed, value.to_string()))
}
