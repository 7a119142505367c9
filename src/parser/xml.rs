//! Core XML 1.0 parser state machine.
//!
//! See <https://www.w3.org/TR/xml/> for the grammar productions referenced
//! below.

use crate::error::ParseError;
use crate::tree::{Attribute, Document, NodeId, NodeKind};

use super::input::{
    parse_cdata_content, parse_comment_content, parse_pi_content, parse_xml_decl, split_name,
    EntityTable, NamespaceResolver, ParserInput, Reference,
};
use super::ParseOptions;

pub(crate) struct XmlParser<'a> {
    input: ParserInput<'a>,
    doc: Document,
    options: ParseOptions,
    ns: NamespaceResolver,
    /// Holder node when parsing entity replacement text, where end of input
    /// closes the content normally.
    fragment_root: Option<NodeId>,
}

impl<'a> XmlParser<'a> {
    pub fn new(input: &'a str, options: &ParseOptions) -> Self {
        let mut pi = ParserInput::new(input);
        pi.set_recover(options.recover);
        pi.set_max_depth(options.max_depth);
        pi.set_max_name_length(options.max_name_length);
        pi.set_max_entity_expansions(options.max_entity_expansions);

        Self {
            input: pi,
            doc: Document::new(),
            options: options.clone(),
            ns: NamespaceResolver::new(),
            fragment_root: None,
        }
    }

    /// Parses the entire document.
    pub fn parse(mut self) -> Result<Document, ParseError> {
        if self.is_at_xml_decl() {
            let decl = parse_xml_decl(&mut self.input)?;
            self.doc.version = Some(decl.version);
            self.doc.encoding = decl.encoding;
            self.doc.standalone = decl.standalone;
        } else if self.input.skip_whitespace() && self.is_at_xml_decl() {
            return Err(self
                .input
                .fatal("XML declaration must be at the start of the document"));
        }

        let root = self.doc.root();
        self.parse_misc(root)?;

        if self.input.looking_at(b"<!DOCTYPE") {
            self.parse_doctype(root)?;
            self.parse_misc(root)?;
        }

        if self.input.at_end() {
            return Err(self.input.fatal("document is empty or has no root element"));
        }
        if self.input.peek() != Some(b'<') {
            return Err(self.input.fatal("content before root element"));
        }
        self.parse_element(root)?;

        self.parse_misc(root)?;
        if !self.input.at_end() {
            self.input
                .error_or_recover("content after document element".to_string())?;
        }

        self.doc.diagnostics = std::mem::take(&mut self.input.diagnostics);
        Ok(self.doc)
    }

    fn is_at_xml_decl(&self) -> bool {
        self.input.looking_at(b"<?xml")
            && self
                .input
                .peek_at(5)
                .is_some_and(|b| b.is_ascii_whitespace())
    }

    // --- Misc (XML 1.0 §2.8 [27]) ---

    fn parse_misc(&mut self, parent: NodeId) -> Result<(), ParseError> {
        loop {
            self.input.skip_whitespace();
            if self.input.looking_at(b"<!--") {
                self.parse_comment(parent)?;
            } else if self.input.looking_at(b"<?") {
                self.parse_processing_instruction(parent)?;
            } else {
                return Ok(());
            }
        }
    }

    // --- Document type declaration (XML 1.0 §2.8 [28]) ---

    /// Records the DOCTYPE name and external identifiers, and reads the
    /// general entities declared in the internal subset.
    fn parse_doctype(&mut self, parent: NodeId) -> Result<(), ParseError> {
        self.input.expect_str(b"<!DOCTYPE")?;
        self.input.skip_whitespace_required()?;
        let name = self.input.parse_name()?;
        self.input.skip_whitespace();

        let (public_id, system_id) = self.parse_external_id()?;
        self.input.skip_whitespace();

        // The external subset is never read, so it may declare entities
        // this parser does not know about.
        let mut entities = EntityTable::default();
        entities.incomplete = system_id.is_some();
        if self.input.peek() == Some(b'[') {
            self.parse_internal_subset(&mut entities)?;
            self.input.skip_whitespace();
        }
        self.input.expect_byte(b'>')?;
        self.input.set_entities(entities);

        let node = self.doc.create_node(NodeKind::DocumentType {
            name,
            system_id,
            public_id,
        });
        self.doc.append_child(parent, node);
        Ok(())
    }

    /// Parses an optional `ExternalID` (XML 1.0 §4.2.2 [75]), returning
    /// `(public_id, system_id)`.
    fn parse_external_id(&mut self) -> Result<(Option<String>, Option<String>), ParseError> {
        if self.input.looking_at(b"PUBLIC") {
            self.input.advance(6);
            self.input.skip_whitespace_required()?;
            let public_id = self.input.parse_quoted_value()?;
            self.input.skip_whitespace_required()?;
            let system_id = self.input.parse_quoted_value()?;
            Ok((Some(public_id), Some(system_id)))
        } else if self.input.looking_at(b"SYSTEM") {
            self.input.advance(6);
            self.input.skip_whitespace_required()?;
            Ok((None, Some(self.input.parse_quoted_value()?)))
        } else {
            Ok((None, None))
        }
    }

    /// Reads the internal subset (XML 1.0 §2.8 [28b]). Entity declarations
    /// are recorded. Element, attribute-list and notation declarations are
    /// skipped, as are comments and processing instructions.
    fn parse_internal_subset(&mut self, entities: &mut EntityTable) -> Result<(), ParseError> {
        self.input.expect_byte(b'[')?;
        loop {
            self.input.skip_whitespace();
            match self.input.peek() {
                None => return Err(self.input.fatal("unexpected end of input in DOCTYPE")),
                Some(b']') => {
                    self.input.advance(1);
                    return Ok(());
                }
                Some(b'%') => {
                    // A parameter entity may declare anything.
                    self.input.advance(1);
                    self.input.parse_name()?;
                    self.input.expect_byte(b';')?;
                    entities.incomplete = true;
                }
                Some(b'<') if self.input.looking_at(b"<!ENTITY") => {
                    self.parse_entity_decl(entities)?;
                }
                Some(b'<') if self.input.looking_at(b"<!--") => {
                    parse_comment_content(&mut self.input)?;
                }
                Some(b'<') if self.input.looking_at(b"<?") => {
                    parse_pi_content(&mut self.input)?;
                }
                Some(b'<') if self.input.looking_at(b"<!") => self.skip_markup_decl()?,
                Some(_) => {
                    return Err(self
                        .input
                        .fatal("unexpected content in DOCTYPE internal subset"))
                }
            }
        }
    }

    /// Parses `<!ENTITY ...>` (XML 1.0 §4.2 [70]). Parameter entities are
    /// checked for shape and dropped.
    fn parse_entity_decl(&mut self, entities: &mut EntityTable) -> Result<(), ParseError> {
        self.input.expect_str(b"<!ENTITY")?;
        self.input.skip_whitespace_required()?;
        let parameter = self.input.peek() == Some(b'%');
        if parameter {
            self.input.advance(1);
            self.input.skip_whitespace_required()?;
        }
        let name = self.input.parse_name()?;
        if name.contains(':') {
            self.input
                .error_or_recover(format!("entity name '{name}' contains a colon"))?;
        }
        self.input.skip_whitespace_required()?;

        let (_, system_id) = self.parse_external_id()?;
        let value = match system_id {
            Some(_) => None,
            None => Some(self.input.parse_entity_value()?),
        };

        let had_ws = self.input.skip_whitespace();
        if self.input.looking_at(b"NDATA") {
            if value.is_some() || parameter {
                return Err(self
                    .input
                    .fatal("NDATA is only allowed on external general entities"));
            }
            if !had_ws {
                return Err(self.input.fatal("whitespace required before NDATA"));
            }
            self.input.advance(5);
            self.input.skip_whitespace_required()?;
            self.input.parse_name()?;
            self.input.skip_whitespace();
        }
        self.input.expect_byte(b'>')?;

        if !parameter {
            match value {
                Some(replacement) => entities.declare_internal(name, replacement),
                None => entities.declare_external(name),
            }
        }
        Ok(())
    }

    /// Skips a markup declaration other than `<!ENTITY`, honouring quoted
    /// literals that may contain `>`.
    fn skip_markup_decl(&mut self) -> Result<(), ParseError> {
        self.input.expect_str(b"<!")?;
        loop {
            match self.input.peek() {
                None => return Err(self.input.fatal("unexpected end of input in DOCTYPE")),
                Some(b'>') => {
                    self.input.advance(1);
                    return Ok(());
                }
                Some(b'"' | b'\'') => {
                    self.input.parse_quoted_value()?;
                }
                Some(_) => self.input.advance(1),
            }
        }
    }

    // --- Elements (XML 1.0 §3.1 [39]) ---

    fn parse_element(&mut self, parent: NodeId) -> Result<(), ParseError> {
        self.input.increment_depth()?;
        self.input.expect_byte(b'<')?;
        let qname = self.input.parse_name()?;
        let mut attributes: Vec<Attribute> = Vec::new();

        loop {
            let had_ws = self.input.skip_whitespace();
            if matches!(self.input.peek(), Some(b'>') | None) || self.input.looking_at(b"/>") {
                break;
            }
            if !had_ws {
                return Err(self.input.fatal("whitespace required between attributes"));
            }
            let attr = self.parse_attribute()?;
            if attributes
                .iter()
                .any(|a| a.name == attr.name && a.prefix == attr.prefix)
            {
                self.input
                    .error_or_recover(format!("duplicate attribute: '{}'", attr.qualified_name()))?;
                continue;
            }
            attributes.push(attr);
        }

        // Namespaces in XML 1.0 §3: bind declarations before resolving names.
        self.ns.push_scope();
        for attr in &attributes {
            if let Some(prefix) = attr.declared_prefix() {
                self.ns.bind(prefix.map(str::to_owned), attr.value.clone());
            }
        }

        let (prefix, local) = split_name(&qname);
        let namespace = self.resolve_prefix(prefix, true)?;
        for attr in &mut attributes {
            if attr.is_namespace_decl() {
                continue;
            }
            if let Some(p) = attr.prefix.as_deref() {
                attr.namespace = self.resolve_prefix(Some(p), false)?;
            }
        }

        let node = self.doc.create_node(NodeKind::Element {
            name: local.to_string(),
            prefix: prefix.map(str::to_owned),
            namespace,
            attributes,
        });
        self.doc.append_child(parent, node);

        if self.input.looking_at(b"/>") {
            self.input.advance(2);
        } else if self.input.peek() == Some(b'>') {
            self.input.advance(1);
            self.parse_content(node)?;
            self.parse_end_tag(&qname)?;
        } else {
            return Err(self.input.fatal("unexpected end of input in start tag"));
        }

        self.ns.pop_scope();
        self.input.decrement_depth();
        Ok(())
    }

    /// Resolves a prefix against the bindings in scope. Unprefixed
    /// attributes are never in a namespace.
    fn resolve_prefix(
        &mut self,
        prefix: Option<&str>,
        is_element: bool,
    ) -> Result<Option<String>, ParseError> {
        match prefix {
            None if !is_element => Ok(None),
            None => Ok(self.ns.resolve(None).map(str::to_owned)),
            Some(p) => match self.ns.resolve(Some(p)) {
                Some(uri) => Ok(Some(uri.to_owned())),
                None => {
                    self.input
                        .error_or_recover(format!("namespace prefix '{p}' is not declared"))?;
                    Ok(None)
                }
            },
        }
    }

    fn parse_end_tag(&mut self, qname: &str) -> Result<(), ParseError> {
        if self.input.at_end() {
            // Only reachable in recovery mode: close implicitly.
            return Ok(());
        }
        self.input.expect_str(b"</")?;
        let end_name = self.input.parse_name()?;
        self.input.skip_whitespace();
        self.input.expect_byte(b'>')?;
        if end_name != qname {
            self.input.error_or_recover(format!(
                "mismatched end tag: expected </{qname}>, found </{end_name}>"
            ))?;
        }
        Ok(())
    }

    fn parse_attribute(&mut self) -> Result<Attribute, ParseError> {
        let qname = self.input.parse_name()?;
        self.input.skip_whitespace();
        self.input.expect_byte(b'=')?;
        self.input.skip_whitespace();
        let value = self.input.parse_attribute_value()?;

        let (prefix, local) = split_name(&qname);
        Ok(Attribute {
            name: local.to_string(),
            value,
            prefix: prefix.map(str::to_owned),
            namespace: None,
        })
    }

    // --- Content (XML 1.0 §3.1 [43]) ---

    fn parse_content(&mut self, parent: NodeId) -> Result<(), ParseError> {
        loop {
            if self.input.at_end() {
                if self.fragment_root != Some(parent) {
                    self.input.error_or_recover(
                        "unexpected end of input in element content".to_string(),
                    )?;
                }
                return Ok(());
            }
            if self.input.looking_at(b"</") {
                return Ok(());
            }

            if self.input.looking_at(b"<![CDATA[") {
                let content = parse_cdata_content(&mut self.input)?;
                let node = self.doc.create_node(NodeKind::CData { content });
                self.doc.append_child(parent, node);
            } else if self.input.looking_at(b"<!--") {
                self.parse_comment(parent)?;
            } else if self.input.looking_at(b"<?") {
                self.parse_processing_instruction(parent)?;
            } else if self.input.peek() == Some(b'<') {
                self.parse_element(parent)?;
            } else {
                self.parse_char_data(parent)?;
            }
        }
    }

    // --- Character data (XML 1.0 §2.4 [14]) ---

    fn parse_char_data(&mut self, parent: NodeId) -> Result<(), ParseError> {
        let mut text = String::new();

        while let Some(b) = self.input.peek() {
            match b {
                b'<' => break,
                b'&' => match self.input.read_reference()? {
                    Reference::Text(value) => text.push_str(&value),
                    Reference::Entity { replacement, .. }
                        if !replacement.contains(['<', '&']) =>
                    {
                        text.push_str(&replacement);
                    }
                    Reference::Entity { name, replacement } => {
                        self.push_char_data(parent, std::mem::take(&mut text));
                        self.expand_entity(parent, &name, &replacement)?;
                    }
                },
                b']' if self.input.looking_at(b"]]>") => {
                    self.input
                        .error_or_recover("']]>' not allowed in character data".to_string())?;
                    text.push_str("]]>");
                    self.input.advance(3);
                }
                _ => text.push(self.input.next_char()?),
            }
            if text.len() > self.options.max_text_length {
                return Err(self.input.fatal(format!(
                    "text node length exceeds maximum ({})",
                    self.options.max_text_length
                )));
            }
        }

        self.push_char_data(parent, text);
        Ok(())
    }

    /// Appends character data under `parent`, extending a text node left
    /// there by an entity expansion.
    fn push_char_data(&mut self, parent: NodeId, text: String) {
        if text.is_empty()
            || (self.options.no_blanks && text.chars().all(|c| c.is_ascii_whitespace()))
        {
            return;
        }
        if let Some(last) = self.doc.last_child(parent) {
            if let NodeKind::Text { content } = &mut self.doc.node_mut(last).kind {
                content.push_str(&text);
                return;
            }
        }
        let node = self.doc.create_node(NodeKind::Text { content: text });
        self.doc.append_child(parent, node);
    }

    /// Parses the replacement text of an entity as content (XML 1.0 §4.4.3)
    /// in the namespace scope of the reference, then copies the result
    /// under `parent`.
    fn expand_entity(
        &mut self,
        parent: NodeId,
        name: &str,
        replacement: &str,
    ) -> Result<(), ParseError> {
        let mut sub = XmlParser {
            input: self.input.entity_input(name, replacement),
            doc: Document::new(),
            options: self.options.clone(),
            ns: self.ns.clone(),
            fragment_root: None,
        };
        let holder = sub.doc.root();
        sub.fragment_root = Some(holder);

        let mut result = sub.parse_content(holder);
        if result.is_ok() && !sub.input.at_end() {
            result = Err(sub.input.fatal(format!(
                "end tag in entity '{name}' has no matching start tag"
            )));
        }
        let XmlParser { input, doc, .. } = sub;
        self.input.absorb(input);
        result.map_err(|e| self.input.relocate(e))?;

        let children: Vec<NodeId> = doc.children(holder).collect();
        for child in children {
            if let NodeKind::Text { content } = &doc.node(child).kind {
                self.push_char_data(parent, content.clone());
            } else {
                let copy = self.doc.import_subtree(&doc, child);
                self.doc.append_child(parent, copy);
            }
        }
        Ok(())
    }

    fn parse_comment(&mut self, parent: NodeId) -> Result<(), ParseError> {
        let content = parse_comment_content(&mut self.input)?;
        let node = self.doc.create_node(NodeKind::Comment { content });
        self.doc.append_child(parent, node);
        Ok(())
    }

    fn parse_processing_instruction(&mut self, parent: NodeId) -> Result<(), ParseError> {
        let (target, data) = parse_pi_content(&mut self.input)?;
        let node = self
            .doc
            .create_node(NodeKind::ProcessingInstruction { target, data });
        self.doc.append_child(parent, node);
        Ok(())
    }
}
