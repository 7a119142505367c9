//! Shared low-level input handling for the XML and HTML parsers.
//!
//! [`ParserInput`] owns the byte cursor, position tracking (line, column,
//! byte offset), nesting depth, and the diagnostics collected in recovery
//! mode. Both tree builders compose it rather than reimplementing input
//! handling.
//!
//! References expand to the five predefined entities, character references
//! and general entities declared in the internal DTD subset. External
//! entities are never loaded; referencing one is an error.

use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use crate::error::{ErrorSeverity, ParseDiagnostic, ParseError, SourceLocation};

/// Default maximum element nesting depth.
pub(crate) const DEFAULT_MAX_DEPTH: u32 = 256;

/// Default maximum length (in bytes) of a text node.
pub(crate) const DEFAULT_MAX_TEXT_LENGTH: usize = 10 * 1024 * 1024;

/// Default maximum length (in bytes) of an element or attribute name.
pub(crate) const DEFAULT_MAX_NAME_LENGTH: usize = 50_000;

/// Default maximum number of entity references expanded per document.
pub(crate) const DEFAULT_MAX_ENTITY_EXPANSIONS: u32 = 10_000;

// -------------------------------------------------------------------------
// XML Name character classes (XML 1.0 §2.3)
// -------------------------------------------------------------------------

/// Returns `true` if `c` is a valid `Char` per XML 1.0 §2.2 `[2]`.
pub(crate) fn is_xml_char(c: char) -> bool {
    matches!(c as u32,
        0x09 | 0x0A | 0x0D | 0x20..=0xD7FF | 0xE000..=0xFFFD | 0x0001_0000..=0x0010_FFFF
    )
}

/// Returns `true` if `c` is a valid `NameStartChar` per XML 1.0 §2.3 `[4]`.
pub(crate) fn is_name_start_char(c: char) -> bool {
    matches!(c,
        ':' | 'A'..='Z' | '_' | 'a'..='z' |
        '\u{C0}'..='\u{D6}' | '\u{D8}'..='\u{F6}' | '\u{F8}'..='\u{2FF}' |
        '\u{370}'..='\u{37D}' | '\u{37F}'..='\u{1FFF}' |
        '\u{200C}'..='\u{200D}' | '\u{2070}'..='\u{218F}' |
        '\u{2C00}'..='\u{2FEF}' | '\u{3001}'..='\u{D7FF}' |
        '\u{F900}'..='\u{FDCF}' | '\u{FDF0}'..='\u{FFFD}' |
        '\u{10000}'..='\u{EFFFF}'
    )
}

/// Returns `true` if `c` is a valid `NameChar` per XML 1.0 §2.3 `[4a]`.
pub(crate) fn is_name_char(c: char) -> bool {
    is_name_start_char(c)
        || matches!(c,
            '-' | '.' | '0'..='9' | '\u{B7}' |
            '\u{300}'..='\u{36F}' | '\u{203F}'..='\u{2040}'
        )
}

/// Returns `true` if `s` is a non-empty name without colons.
pub(crate) fn is_ncname(s: &str) -> bool {
    let mut chars = s.chars();
    chars
        .next()
        .is_some_and(|c| c != ':' && is_name_start_char(c))
        && chars.all(|c| c != ':' && is_name_char(c))
}

/// Returns `true` if `s` is `NCName` or `NCName:NCName`.
pub(crate) fn is_qname(s: &str) -> bool {
    match split_name(s) {
        (Some(prefix), local) => is_ncname(prefix) && is_ncname(local),
        (None, local) => is_ncname(local),
    }
}

/// Splits a qualified name into optional prefix and local part.
///
/// `"foo:bar"` → `(Some("foo"), "bar")`, `"bar"` → `(None, "bar")`.
pub(crate) fn split_name(name: &str) -> (Option<&str>, &str) {
    match name.find(':') {
        Some(pos) => (Some(&name[..pos]), &name[pos + 1..]),
        None => (None, name),
    }
}

// -------------------------------------------------------------------------
// General entities (XML 1.0 §4)
// -------------------------------------------------------------------------

/// General entities declared in the internal DTD subset.
#[derive(Debug, Default)]
pub(crate) struct EntityTable {
    /// Replacement text of internal entities, character references expanded.
    internal: HashMap<String, String>,
    /// Entities declared with a system or public identifier.
    external: HashSet<String>,
    /// Set when declarations may live outside the internal subset, which
    /// makes an undeclared reference a warning instead of an error.
    pub(crate) incomplete: bool,
}

impl EntityTable {
    /// Records an internal entity. The first declaration of a name binds.
    pub fn declare_internal(&mut self, name: String, replacement: String) {
        if !self.is_declared(&name) {
            self.internal.insert(name, replacement);
        }
    }

    /// Records an external entity. References to it are rejected.
    pub fn declare_external(&mut self, name: String) {
        if !self.is_declared(&name) {
            self.external.insert(name);
        }
    }

    fn is_declared(&self, name: &str) -> bool {
        predefined_entity(name).is_some()
            || self.internal.contains_key(name)
            || self.external.contains(name)
    }
}

/// A reference (`&...;`) resolved against the entity table.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Reference {
    /// Characters to insert as they are.
    Text(String),
    /// A declared entity whose replacement text is parsed in place.
    Entity { name: String, replacement: String },
}

// -------------------------------------------------------------------------
// ParserInput
// -------------------------------------------------------------------------

/// Byte cursor with position tracking and recovery-mode diagnostics.
pub(crate) struct ParserInput<'a> {
    input: &'a [u8],
    pos: usize,
    line: u32,
    column: u32,
    depth: u32,
    max_depth: u32,
    max_name_length: usize,
    recover: bool,
    entities: Rc<EntityTable>,
    /// Entities whose replacement text is being read, outermost first.
    open_entities: Vec<String>,
    expansions: u32,
    max_entity_expansions: u32,
    /// Warnings and recovered errors, in input order.
    pub(crate) diagnostics: Vec<ParseDiagnostic>,
}

impl<'a> ParserInput<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input: input.as_bytes(),
            pos: 0,
            line: 1,
            column: 1,
            depth: 0,
            max_depth: DEFAULT_MAX_DEPTH,
            max_name_length: DEFAULT_MAX_NAME_LENGTH,
            recover: false,
            entities: Rc::default(),
            open_entities: Vec::new(),
            expansions: 0,
            max_entity_expansions: DEFAULT_MAX_ENTITY_EXPANSIONS,
            diagnostics: Vec::new(),
        }
    }

    pub fn set_max_depth(&mut self, max: u32) {
        self.max_depth = max;
    }

    pub fn set_max_name_length(&mut self, max: usize) {
        self.max_name_length = max;
    }

    pub fn set_recover(&mut self, recover: bool) {
        self.recover = recover;
    }

    pub fn set_max_entity_expansions(&mut self, max: u32) {
        self.max_entity_expansions = max;
    }

    pub fn set_entities(&mut self, entities: EntityTable) {
        self.entities = Rc::new(entities);
    }

    // -- Entity replacement text --

    /// Creates an input over the replacement text of entity `name` that
    /// shares this input's limits, entity table and expansion count.
    pub fn entity_input<'r>(&self, name: &str, replacement: &'r str) -> ParserInput<'r> {
        let mut open_entities = self.open_entities.clone();
        open_entities.push(name.to_owned());
        ParserInput {
            input: replacement.as_bytes(),
            pos: 0,
            line: 1,
            column: 1,
            depth: self.depth,
            max_depth: self.max_depth,
            max_name_length: self.max_name_length,
            recover: self.recover,
            entities: Rc::clone(&self.entities),
            open_entities,
            expansions: self.expansions,
            max_entity_expansions: self.max_entity_expansions,
            diagnostics: Vec::new(),
        }
    }

    /// Takes back the expansion count and diagnostics of a finished
    /// entity input. Its diagnostics are reported at the reference.
    pub fn absorb(&mut self, sub: ParserInput<'_>) {
        self.expansions = sub.expansions;
        let location = self.location();
        self.diagnostics.extend(
            sub.diagnostics
                .into_iter()
                .map(|d| ParseDiagnostic { location, ..d }),
        );
    }

    /// Moves an error raised inside replacement text to the reference.
    pub fn relocate(&self, error: ParseError) -> ParseError {
        ParseError {
            location: self.location(),
            diagnostics: self.diagnostics.clone(),
            ..error
        }
    }

    fn within_entity<T>(
        &mut self,
        name: &str,
        replacement: &str,
        f: impl FnOnce(&mut ParserInput<'_>) -> Result<T, ParseError>,
    ) -> Result<T, ParseError> {
        let mut sub = self.entity_input(name, replacement);
        let result = f(&mut sub);
        self.absorb(sub);
        result.map_err(|e| self.relocate(e))
    }

    // -- Depth tracking --

    /// Increments the nesting depth. Returns an error if the limit is exceeded.
    pub fn increment_depth(&mut self) -> Result<(), ParseError> {
        self.depth += 1;
        if self.depth > self.max_depth {
            return Err(self.fatal(format!(
                "maximum nesting depth exceeded ({})",
                self.max_depth
            )));
        }
        Ok(())
    }

    pub fn decrement_depth(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    // -- Position queries --

    pub fn location(&self) -> SourceLocation {
        SourceLocation {
            line: self.line,
            column: self.column,
            byte_offset: self.pos,
        }
    }

    pub fn at_end(&self) -> bool {
        self.pos >= self.input.len()
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Returns the unconsumed input.
    pub fn rest(&self) -> &'a [u8] {
        &self.input[self.pos.min(self.input.len())..]
    }

    /// Returns the input between two byte offsets as text.
    pub fn slice_str(&self, start: usize, end: usize) -> &'a str {
        std::str::from_utf8(&self.input[start..end]).unwrap_or_default()
    }

    // -- Peek operations --

    pub fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    pub fn peek_at(&self, offset: usize) -> Option<u8> {
        self.input.get(self.pos + offset).copied()
    }

    pub fn peek_char(&self) -> Option<char> {
        let rest = self.input.get(self.pos..)?;
        // A char is at most four bytes; avoid validating the whole tail.
        let window = &rest[..rest.len().min(4)];
        match std::str::from_utf8(window) {
            Ok(s) => s.chars().next(),
            Err(e) => std::str::from_utf8(&window[..e.valid_up_to()])
                .ok()
                .and_then(|s| s.chars().next()),
        }
    }

    // -- Advance operations --

    /// Advances the position by `count` bytes, updating line/column.
    pub fn advance(&mut self, count: usize) {
        for _ in 0..count {
            let Some(&b) = self.input.get(self.pos) else {
                return;
            };
            if b == b'\n' {
                self.line += 1;
                self.column = 1;
            } else if b & 0xC0 != 0x80 {
                self.column += 1;
            }
            self.pos += 1;
        }
    }

    /// Consumes and returns the next character with `\r\n` normalization
    /// (XML 1.0 §2.11) and character validation (XML 1.0 §2.2).
    pub fn next_char(&mut self) -> Result<char, ParseError> {
        let ch = self
            .peek_char()
            .ok_or_else(|| self.fatal("unexpected end of input"))?;
        self.advance(ch.len_utf8());
        if ch == '\r' {
            if self.peek() == Some(b'\n') {
                self.advance(1);
            }
            return Ok('\n');
        }
        if !is_xml_char(ch) {
            self.error_or_recover(format!("invalid XML character: U+{:04X}", ch as u32))?;
        }
        Ok(ch)
    }

    // -- Expect operations --

    pub fn expect_byte(&mut self, expected: u8) -> Result<(), ParseError> {
        match self.peek() {
            Some(b) if b == expected => {
                self.advance(1);
                Ok(())
            }
            Some(b) => Err(self.fatal(format!(
                "expected '{}', found '{}'",
                expected as char, b as char
            ))),
            None => Err(self.fatal(format!(
                "expected '{}', found end of input",
                expected as char
            ))),
        }
    }

    pub fn expect_str(&mut self, expected: &[u8]) -> Result<(), ParseError> {
        for &b in expected {
            self.expect_byte(b)?;
        }
        Ok(())
    }

    // -- Lookahead --

    pub fn looking_at(&self, s: &[u8]) -> bool {
        self.input[self.pos..].starts_with(s)
    }

    /// Case-insensitive (ASCII) lookahead.
    pub fn looking_at_ci(&self, expected: &[u8]) -> bool {
        self.input
            .get(self.pos..self.pos + expected.len())
            .is_some_and(|s| s.eq_ignore_ascii_case(expected))
    }

    /// Returns the offset of the next occurrence of `needle` at or after
    /// the cursor, if any.
    pub fn find(&self, needle: &[u8]) -> Option<usize> {
        self.input[self.pos..]
            .windows(needle.len())
            .position(|w| w == needle)
            .map(|p| self.pos + p)
    }

    // -- Whitespace --

    /// Skips whitespace characters. Returns `true` if any were consumed.
    pub fn skip_whitespace(&mut self) -> bool {
        let start = self.pos;
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\r' | b'\n')) {
            self.advance(1);
        }
        self.pos > start
    }

    pub fn skip_whitespace_required(&mut self) -> Result<(), ParseError> {
        if !self.skip_whitespace() {
            return Err(self.fatal("whitespace required"));
        }
        Ok(())
    }

    /// Consumes bytes while `pred` holds and returns them as text.
    pub fn take_while(&mut self, pred: impl Fn(u8) -> bool) -> &'a str {
        let start = self.pos;
        while self.peek().is_some_and(&pred) {
            self.advance(1);
        }
        self.slice_str(start, self.pos)
    }

    // -- Name parsing (XML 1.0 §2.3) --

    /// Parses an XML `Name` per XML 1.0 §2.3 production `[5]`.
    pub fn parse_name(&mut self) -> Result<String, ParseError> {
        let start = self.pos;
        let first = self
            .peek_char()
            .ok_or_else(|| self.fatal("expected name, found end of input"))?;
        if !is_name_start_char(first) {
            return Err(self.fatal(format!("invalid name start character: '{first}'")));
        }
        self.advance(first.len_utf8());

        while let Some(ch) = self.peek_char().filter(|&c| is_name_char(c)) {
            self.advance(ch.len_utf8());
        }

        let len = self.pos - start;
        if len > self.max_name_length {
            return Err(self.fatal(format!(
                "name length ({len}) exceeds maximum ({})",
                self.max_name_length
            )));
        }
        Ok(self.slice_str(start, self.pos).to_string())
    }

    // -- Reference parsing (XML 1.0 §4.1) --

    /// Parses a reference (`&...;`) and resolves it.
    ///
    /// Character references and predefined entities come back as text.
    /// Declared internal entities come back with their replacement text for
    /// the caller to parse. An undeclared entity is fatal unless recovering
    /// or the DTD was only partly read, in which case it is a warning and
    /// expands to nothing.
    pub fn read_reference(&mut self) -> Result<Reference, ParseError> {
        self.expect_byte(b'&')?;
        if self.peek() == Some(b'#') {
            return Ok(Reference::Text(self.parse_char_reference()?.to_string()));
        }

        let name = self.parse_name()?;
        self.expect_byte(b';')?;
        if let Some(value) = predefined_entity(&name) {
            return Ok(Reference::Text(value.to_string()));
        }
        if let Some(replacement) = self.entities.internal.get(&name).cloned() {
            if self.open_entities.contains(&name) {
                return Err(self.fatal(format!("entity '{name}' references itself")));
            }
            self.expansions += 1;
            if self.expansions > self.max_entity_expansions {
                return Err(self.fatal(format!(
                    "entity expansion limit exceeded ({})",
                    self.max_entity_expansions
                )));
            }
            return Ok(Reference::Entity { name, replacement });
        }
        if self.entities.external.contains(&name) {
            return Err(self.fatal(format!(
                "reference to external entity '{name}' is not supported"
            )));
        }
        if self.recover || self.entities.incomplete {
            self.push_diagnostic(
                ErrorSeverity::Warning,
                format!("unknown entity reference: &{name};"),
            );
            Ok(Reference::Text(String::new()))
        } else {
            Err(self.fatal(format!("unknown entity reference: &{name};")))
        }
    }

    /// Parses the `#...;` tail of a character reference.
    fn parse_char_reference(&mut self) -> Result<char, ParseError> {
        self.expect_byte(b'#')?;
        let (digits, radix) = if self.peek() == Some(b'x') {
            self.advance(1);
            (self.take_while(|b| b.is_ascii_hexdigit()), 16)
        } else {
            (self.take_while(|b| b.is_ascii_digit()), 10)
        };
        if digits.is_empty() {
            return Err(self.fatal("empty character reference"));
        }
        let value = u32::from_str_radix(digits, radix)
            .map_err(|_| self.fatal("character reference out of range"))?;
        self.expect_byte(b';')?;
        char::from_u32(value).filter(|&c| is_xml_char(c)).ok_or_else(|| {
            self.fatal(format!(
                "character reference &#x{value:X}; does not refer to a valid XML character"
            ))
        })
    }

    /// Parses a quoted attribute value, expanding references and
    /// normalizing whitespace characters to spaces (XML 1.0 §3.3.3).
    pub fn parse_attribute_value(&mut self) -> Result<String, ParseError> {
        let quote = match self.peek() {
            Some(q @ (b'"' | b'\'')) => q,
            _ => return Err(self.fatal("expected quoted attribute value")),
        };
        self.advance(1);
        let mut value = String::new();
        loop {
            match self.peek() {
                None => return Err(self.fatal("unexpected end of input in attribute value")),
                Some(b) if b == quote => {
                    self.advance(1);
                    return Ok(value);
                }
                Some(b'<') => return Err(self.fatal("'<' not allowed in attribute value")),
                Some(b'&') => self.attribute_reference(&mut value)?,
                Some(_) => value.push(normalize_attribute_char(self.next_char()?)),
            }
        }
    }

    /// Appends the expansion of a reference inside an attribute value.
    /// Replacement text is normalized the same way as literal text.
    fn attribute_reference(&mut self, value: &mut String) -> Result<(), ParseError> {
        match self.read_reference()? {
            Reference::Text(text) => value.push_str(&text),
            Reference::Entity { name, replacement } => {
                if replacement.contains('<') {
                    return Err(self.fatal(format!(
                        "entity '{name}' puts '<' in an attribute value"
                    )));
                }
                self.within_entity(&name, &replacement, |sub| {
                    while let Some(b) = sub.peek() {
                        if b == b'&' {
                            sub.attribute_reference(value)?;
                        } else {
                            value.push(normalize_attribute_char(sub.next_char()?));
                        }
                    }
                    Ok(())
                })?;
            }
        }
        Ok(())
    }

    /// Parses a quoted entity value (XML 1.0 §2.3 `[9]`) into replacement
    /// text. Character references are expanded and entity references are
    /// kept for expansion at the point of use.
    pub fn parse_entity_value(&mut self) -> Result<String, ParseError> {
        let quote = match self.peek() {
            Some(q @ (b'"' | b'\'')) => q,
            _ => return Err(self.fatal("expected quoted entity value")),
        };
        self.advance(1);
        let mut value = String::new();
        loop {
            match self.peek() {
                None => return Err(self.fatal("unexpected end of input in entity value")),
                Some(b) if b == quote => {
                    self.advance(1);
                    return Ok(value);
                }
                Some(b'%') => {
                    return Err(self.fatal(
                        "parameter entity reference not allowed in internal entity value",
                    ))
                }
                Some(b'&') if self.peek_at(1) == Some(b'#') => {
                    self.advance(1);
                    value.push(self.parse_char_reference()?);
                }
                Some(b'&') => {
                    self.advance(1);
                    let name = self.parse_name()?;
                    self.expect_byte(b';')?;
                    value.push('&');
                    value.push_str(&name);
                    value.push(';');
                }
                Some(_) => value.push(self.next_char()?),
            }
        }
    }

    /// Parses a quoted literal with no reference expansion.
    pub fn parse_quoted_value(&mut self) -> Result<String, ParseError> {
        let quote = match self.peek() {
            Some(q @ (b'"' | b'\'')) => q,
            _ => return Err(self.fatal("expected quoted value")),
        };
        self.advance(1);
        let value = self.take_while(|b| b != quote).to_string();
        self.expect_byte(quote)?;
        Ok(value)
    }

    // -- Diagnostics --

    /// Builds a fatal error at the current position.
    pub fn fatal(&self, message: impl Into<String>) -> ParseError {
        ParseError {
            message: message.into(),
            location: self.location(),
            diagnostics: self.diagnostics.clone(),
        }
    }

    pub fn push_diagnostic(&mut self, severity: ErrorSeverity, message: String) {
        self.diagnostics.push(ParseDiagnostic {
            severity,
            message,
            location: self.location(),
        });
    }

    /// Records an error in recovery mode, or fails otherwise.
    pub fn error_or_recover(&mut self, message: String) -> Result<(), ParseError> {
        if self.recover {
            self.push_diagnostic(ErrorSeverity::Error, message);
            Ok(())
        } else {
            Err(self.fatal(message))
        }
    }
}

fn normalize_attribute_char(ch: char) -> char {
    if matches!(ch, '\t' | '\n') {
        ' '
    } else {
        ch
    }
}

/// Expands one of the five predefined XML entities.
pub(crate) fn predefined_entity(name: &str) -> Option<&'static str> {
    match name {
        "amp" => Some("&"),
        "lt" => Some("<"),
        "gt" => Some(">"),
        "apos" => Some("'"),
        "quot" => Some("\""),
        _ => None,
    }
}

// -------------------------------------------------------------------------
// Namespace scopes
// -------------------------------------------------------------------------

/// Stack of `xmlns` bindings mirroring element nesting.
#[derive(Clone)]
pub(crate) struct NamespaceResolver {
    stack: Vec<Vec<(Option<String>, String)>>,
}

impl NamespaceResolver {
    /// Creates a new resolver with the `xml` prefix pre-bound.
    pub fn new() -> Self {
        let initial = vec![(
            Some("xml".to_string()),
            crate::tree::XML_NAMESPACE.to_string(),
        )];
        Self {
            stack: vec![initial],
        }
    }

    pub fn push_scope(&mut self) {
        self.stack.push(Vec::new());
    }

    pub fn pop_scope(&mut self) {
        self.stack.pop();
    }

    /// Binds a prefix (`None` for the default namespace) in the current scope.
    pub fn bind(&mut self, prefix: Option<String>, uri: String) {
        if let Some(frame) = self.stack.last_mut() {
            frame.push((prefix, uri));
        }
    }

    /// Resolves a prefix to its URI. `xmlns=""` undeclares the default.
    pub fn resolve(&self, prefix: Option<&str>) -> Option<&str> {
        self.stack
            .iter()
            .rev()
            .flat_map(|frame| frame.iter().rev())
            .find(|(p, _)| p.as_deref() == prefix)
            .and_then(|(_, uri)| (!uri.is_empty()).then_some(uri.as_str()))
    }
}

// -------------------------------------------------------------------------
// Markup helpers shared by both parsers
// -------------------------------------------------------------------------

/// Parses `<!-- ... -->`, returning the content text.
pub(crate) fn parse_comment_content(input: &mut ParserInput<'_>) -> Result<String, ParseError> {
    input.expect_str(b"<!--")?;
    let mut content = String::new();
    loop {
        if input.at_end() {
            return Err(input.fatal("unexpected end of input in comment"));
        }
        if input.looking_at(b"-->") {
            input.advance(3);
            return Ok(content);
        }
        if input.looking_at(b"--") {
            input.error_or_recover("'--' not allowed inside comments".to_string())?;
            content.push_str("--");
            input.advance(2);
        } else {
            content.push(input.next_char()?);
        }
    }
}

/// Parses `<![CDATA[ ... ]]>`, returning the content text.
pub(crate) fn parse_cdata_content(input: &mut ParserInput<'_>) -> Result<String, ParseError> {
    input.expect_str(b"<![CDATA[")?;
    let mut content = String::new();
    loop {
        if input.at_end() {
            return Err(input.fatal("unexpected end of input in CDATA section"));
        }
        if input.looking_at(b"]]>") {
            input.advance(3);
            return Ok(content);
        }
        content.push(input.next_char()?);
    }
}

/// Parses `<?target data?>`, returning `(target, data)`.
pub(crate) fn parse_pi_content(
    input: &mut ParserInput<'_>,
) -> Result<(String, Option<String>), ParseError> {
    input.expect_str(b"<?")?;
    let target = input.parse_name()?;
    if target.eq_ignore_ascii_case("xml") {
        return Err(input.fatal("PI target 'xml' is reserved"));
    }

    if !input.skip_whitespace() {
        input.expect_str(b"?>")?;
        return Ok((target, None));
    }
    let mut data = String::new();
    loop {
        if input.at_end() {
            return Err(input.fatal("unexpected end of input in processing instruction"));
        }
        if input.looking_at(b"?>") {
            input.advance(2);
            break;
        }
        data.push(input.next_char()?);
    }
    Ok((target, (!data.is_empty()).then_some(data)))
}

/// Parsed XML declaration data.
#[derive(Debug, Clone)]
pub(crate) struct XmlDeclaration {
    pub version: String,
    pub encoding: Option<String>,
    pub standalone: Option<bool>,
}

/// Parses `<?xml version="1.0" ...?>` (XML 1.0 §2.8 `[23]`).
pub(crate) fn parse_xml_decl(input: &mut ParserInput<'_>) -> Result<XmlDeclaration, ParseError> {
    input.expect_str(b"<?xml")?;
    input.skip_whitespace_required()?;

    input.expect_str(b"version")?;
    let version = parse_pseudo_attribute_value(input)?;
    if !version
        .strip_prefix("1.")
        .is_some_and(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
    {
        return Err(input.fatal(format!("invalid version number: '{version}'")));
    }

    let mut had_ws = input.skip_whitespace();
    let encoding = if input.looking_at(b"encoding") {
        if !had_ws {
            return Err(input.fatal("whitespace required before encoding"));
        }
        input.expect_str(b"encoding")?;
        let enc = parse_pseudo_attribute_value(input)?;
        if !enc.starts_with(|c: char| c.is_ascii_alphabetic())
            || !enc
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'))
        {
            return Err(input.fatal(format!("invalid encoding name: '{enc}'")));
        }
        had_ws = input.skip_whitespace();
        Some(enc)
    } else {
        None
    };

    let standalone = if input.looking_at(b"standalone") {
        if !had_ws {
            return Err(input.fatal("whitespace required before standalone"));
        }
        input.expect_str(b"standalone")?;
        let value = match parse_pseudo_attribute_value(input)?.as_str() {
            "yes" => true,
            "no" => false,
            _ => return Err(input.fatal("standalone must be 'yes' or 'no'")),
        };
        input.skip_whitespace();
        Some(value)
    } else {
        None
    };

    input.expect_str(b"?>")?;
    Ok(XmlDeclaration {
        version,
        encoding,
        standalone,
    })
}

fn parse_pseudo_attribute_value(input: &mut ParserInput<'_>) -> Result<String, ParseError> {
    input.skip_whitespace();
    input.expect_byte(b'=')?;
    input.skip_whitespace();
    input.parse_quoted_value()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_line_column_tracking() {
        let mut input = ParserInput::new("ab\ncd\u{e9}x");
        input.advance(4);
        let loc = input.location();
        assert_eq!((loc.line, loc.column, loc.byte_offset), (2, 2, 4));
        input.advance(3);
        assert_eq!(input.location().column, 4);
        assert_eq!(input.peek_char(), Some('x'));
    }

    #[test]
    fn test_next_char_cr_normalization() {
        let mut input = ParserInput::new("\r\nx");
        assert_eq!(input.next_char().unwrap(), '\n');
        assert_eq!(input.next_char().unwrap(), 'x');
    }

    #[test]
    fn test_parse_name() {
        let mut input = ParserInput::new("svg:rect attr");
        assert_eq!(input.parse_name().unwrap(), "svg:rect");
        assert_eq!(input.peek(), Some(b' '));

        let mut bad = ParserInput::new("1abc");
        assert!(bad.parse_name().is_err());
    }

    #[test]
    fn test_parse_name_length_limit() {
        let mut input = ParserInput::new("abcdefgh");
        input.set_max_name_length(4);
        assert!(input.parse_name().unwrap_err().message.contains("exceeds"));
    }

    fn text(reference: Reference) -> String {
        match reference {
            Reference::Text(text) => text,
            Reference::Entity { name, .. } => panic!("unexpected entity {name}"),
        }
    }

    fn with_entities<'a>(src: &'a str, entities: &[(&str, &str)]) -> ParserInput<'a> {
        let mut table = EntityTable::default();
        for (name, value) in entities {
            table.declare_internal((*name).to_owned(), (*value).to_owned());
        }
        table.declare_external("ext".to_owned());
        let mut input = ParserInput::new(src);
        input.set_entities(table);
        input
    }

    #[test]
    fn test_read_reference() {
        for (src, expected) in [
            ("&amp;", "&"),
            ("&lt;", "<"),
            ("&quot;", "\""),
            ("&#65;", "A"),
            ("&#x263A;", "\u{263A}"),
        ] {
            let mut input = ParserInput::new(src);
            assert_eq!(text(input.read_reference().unwrap()), expected);
        }
    }

    #[test]
    fn test_read_reference_unknown() {
        let mut strict = ParserInput::new("&nbsp;");
        assert!(strict.read_reference().is_err());

        let mut lenient = ParserInput::new("&nbsp;");
        lenient.set_recover(true);
        assert_eq!(text(lenient.read_reference().unwrap()), "");
        assert_eq!(lenient.diagnostics.len(), 1);
    }

    #[test]
    fn test_read_reference_declared_entities() {
        let mut input = with_entities("&e;&amp;", &[("e", "<b/>"), ("amp", "ignored")]);
        assert_eq!(
            input.read_reference().unwrap(),
            Reference::Entity {
                name: "e".into(),
                replacement: "<b/>".into()
            }
        );
        assert_eq!(text(input.read_reference().unwrap()), "&");

        let mut external = with_entities("&ext;", &[]);
        let err = external.read_reference().unwrap_err();
        assert!(err.message.contains("external entity 'ext'"), "{}", err.message);
    }

    #[test]
    fn test_read_reference_partial_dtd_tolerates_unknown() {
        let mut table = EntityTable::default();
        table.incomplete = true;
        let mut input = ParserInput::new("&undeclared;");
        input.set_entities(table);
        assert_eq!(text(input.read_reference().unwrap()), "");
        assert_eq!(input.diagnostics[0].severity, ErrorSeverity::Warning);
    }

    #[test]
    fn test_expansion_limit() {
        let mut input = with_entities("&e;&e;&e;", &[("e", "x")]);
        input.set_max_entity_expansions(2);
        input.read_reference().unwrap();
        input.read_reference().unwrap();
        let err = input.read_reference().unwrap_err();
        assert_eq!(err.message, "entity expansion limit exceeded (2)");
    }

    #[test]
    fn test_invalid_char_reference() {
        let mut input = ParserInput::new("&#0;");
        assert!(input.read_reference().is_err());
    }

    #[test]
    fn test_parse_entity_value() {
        let mut input = ParserInput::new("'a&#x41;&b;<c/>' \"%p;\"");
        assert_eq!(input.parse_entity_value().unwrap(), "aA&b;<c/>");
        input.skip_whitespace();
        assert!(input.parse_entity_value().is_err());
    }

    #[test]
    fn test_attribute_value_expands_entities() {
        let mut input = with_entities(
            "'[&outer;]' '&markup;' '&loop;'",
            &[
                ("outer", "a\tb &inner;"),
                ("inner", "&#38;#38;"),
                ("markup", "<x/>"),
                ("loop", "&loop;"),
            ],
        );
        assert_eq!(input.parse_attribute_value().unwrap(), "[a b &#38;]");
        input.skip_whitespace();
        let err = input.parse_attribute_value().unwrap_err();
        assert!(err.message.contains("'<'"), "{}", err.message);
        input.advance(input.find(b"'&loop").unwrap() - input.pos());
        let err = input.parse_attribute_value().unwrap_err();
        assert_eq!(err.message, "entity 'loop' references itself");
    }

    #[test]
    fn test_depth_limit() {
        let mut input = ParserInput::new("");
        input.set_max_depth(2);
        input.increment_depth().unwrap();
        input.increment_depth().unwrap();
        assert!(input.increment_depth().is_err());
    }

    #[test]
    fn test_parse_attribute_value() {
        let mut input = ParserInput::new("'a\tb &amp; c'");
        assert_eq!(input.parse_attribute_value().unwrap(), "a b & c");
        let mut input = ParserInput::new("\"a<b\"");
        assert!(input.parse_attribute_value().is_err());
    }

    #[test]
    fn test_names() {
        assert!(is_ncname("item-1.x"));
        assert!(!is_ncname("p:item"));
        assert!(!is_ncname(""));
        assert!(!is_ncname("1st"));
        assert!(is_qname("p:item"));
        assert!(!is_qname("p:"));
        assert!(!is_qname("a:b:c"));
        assert!(!is_qname("has space"));
        assert_eq!(split_name("xml:lang"), (Some("xml"), "lang"));
    }

    #[test]
    fn test_namespace_resolver() {
        let mut ns = NamespaceResolver::new();
        assert_eq!(ns.resolve(Some("xml")), Some(crate::tree::XML_NAMESPACE));
        ns.push_scope();
        ns.bind(None, "urn:a".to_string());
        ns.bind(Some("p".to_string()), "urn:p".to_string());
        ns.push_scope();
        ns.bind(None, String::new());
        assert_eq!(ns.resolve(None), None);
        assert_eq!(ns.resolve(Some("p")), Some("urn:p"));
        ns.pop_scope();
        assert_eq!(ns.resolve(None), Some("urn:a"));
    }

    #[test]
    fn test_parse_comment_and_cdata() {
        let mut input = ParserInput::new("<!-- hi -->");
        assert_eq!(parse_comment_content(&mut input).unwrap(), " hi ");
        let mut input = ParserInput::new("<!-- a -- b -->");
        assert!(parse_comment_content(&mut input).is_err());
        let mut input = ParserInput::new("<![CDATA[<x>&]]>");
        assert_eq!(parse_cdata_content(&mut input).unwrap(), "<x>&");
    }

    #[test]
    fn test_parse_pi_content() {
        let mut input = ParserInput::new("<?target some data?>");
        assert_eq!(
            parse_pi_content(&mut input).unwrap(),
            ("target".to_string(), Some("some data".to_string()))
        );
        let mut input = ParserInput::new("<?bare?>");
        assert_eq!(parse_pi_content(&mut input).unwrap(), ("bare".to_string(), None));
    }

    #[test]
    fn test_parse_xml_decl() {
        let mut input = ParserInput::new("<?xml version=\"1.0\" encoding='UTF-8' standalone=\"yes\"?>");
        let decl = parse_xml_decl(&mut input).unwrap();
        assert_eq!(decl.version, "1.0");
        assert_eq!(decl.encoding.as_deref(), Some("UTF-8"));
        assert_eq!(decl.standalone, Some(true));
        assert!(input.at_end());

        let mut input = ParserInput::new("<?xml version=\"2\"?>");
        assert!(parse_xml_decl(&mut input).is_err());
    }
}
