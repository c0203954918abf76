//! HTML fragment parser.
//!
//! Covers the subset the renderer emits plus what hosts reasonably hand us:
//! elements with quoted/unquoted attributes, text with the standard named
//! entities, comments, doctype (skipped), void elements, and raw-text
//! `script`/`style` content. Not a general-purpose HTML5 parser.

use super::document::{Document, NodeId, NodeKind};
use crate::render::is_void;
use crate::{Error, Result};
use std::collections::BTreeMap;

/// Parse a full document.
pub fn parse_document(html: &str) -> Result<Document> {
    let mut doc = Document::new();
    let roots = parse_into(&mut doc, html)?;
    let root = doc.root();
    for node in roots {
        doc.append(root, node);
    }
    Ok(doc)
}

/// Parse a fragment into an existing arena, returning the unattached
/// top-level nodes in order.
pub fn parse_into(doc: &mut Document, html: &str) -> Result<Vec<NodeId>> {
    Parser {
        doc,
        input: html,
        pos: 0,
    }
    .run()
}

struct Parser<'a, 'd> {
    doc: &'d mut Document,
    input: &'a str,
    pos: usize,
}

impl Parser<'_, '_> {
    fn run(mut self) -> Result<Vec<NodeId>> {
        let mut roots = Vec::new();
        let mut stack: Vec<NodeId> = Vec::new();

        while self.pos < self.input.len() {
            if self.eat("<!--") {
                let node = self.comment()?;
                self.attach(node, &stack, &mut roots);
            } else if self.peek("</") {
                self.close_tag(&mut stack);
            } else if self.peek("<!") {
                self.skip_past('>');
            } else if self.peek_tag_start() {
                self.open_tag(&mut stack, &mut roots)?;
            } else if let Some(node) = self.text() {
                self.attach(node, &stack, &mut roots);
            }
        }
        Ok(roots)
    }

    fn attach(&mut self, node: NodeId, stack: &[NodeId], roots: &mut Vec<NodeId>) {
        match stack.last() {
            Some(parent) => self.doc.append(*parent, node),
            None => roots.push(node),
        }
    }

    fn rest(&self) -> &str {
        &self.input[self.pos..]
    }

    fn peek(&self, prefix: &str) -> bool {
        self.rest().starts_with(prefix)
    }

    fn eat(&mut self, prefix: &str) -> bool {
        if self.peek(prefix) {
            self.pos += prefix.len();
            true
        } else {
            false
        }
    }

    fn peek_tag_start(&self) -> bool {
        let rest = self.rest();
        rest.starts_with('<')
            && rest[1..]
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_alphabetic())
    }

    fn skip_past(&mut self, stop: char) {
        match self.rest().find(stop) {
            Some(at) => self.pos += at + 1,
            None => self.pos = self.input.len(),
        }
    }

    fn comment(&mut self) -> Result<NodeId> {
        let Some(end) = self.rest().find("-->") else {
            return Err(parse_error("unterminated comment"));
        };
        let text = self.rest()[..end].to_owned();
        self.pos += end + 3;
        Ok(self.doc.create(NodeKind::Comment(text)))
    }

    fn text(&mut self) -> Option<NodeId> {
        let end = self.rest().find('<').unwrap_or(self.rest().len());
        let raw = self.rest()[..end].to_owned();
        self.pos += end;
        if raw.is_empty() {
            // Lone `<` that opens nothing parseable; consume it as text.
            self.pos += 1;
            return Some(self.doc.create(NodeKind::Text("<".to_owned())));
        }
        Some(self.doc.create(NodeKind::Text(unescape(&raw))))
    }

    fn close_tag(&mut self, stack: &mut Vec<NodeId>) {
        self.pos += 2;
        let name = self.tag_name();
        self.skip_past('>');
        // Pop to the matching open element; unmatched closers are dropped.
        if let Some(at) = stack.iter().rposition(|id| self.element_tag(*id) == name) {
            stack.truncate(at);
        }
    }

    fn element_tag(&self, id: NodeId) -> String {
        match self.doc.kind(id) {
            NodeKind::Element { tag, .. } => tag.clone(),
            _ => String::new(),
        }
    }

    fn tag_name(&mut self) -> String {
        let rest = self.rest();
        let end = rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '-'))
            .unwrap_or(rest.len());
        let name = rest[..end].to_ascii_lowercase();
        self.pos += end;
        name
    }

    fn open_tag(&mut self, stack: &mut Vec<NodeId>, roots: &mut Vec<NodeId>) -> Result<()> {
        self.pos += 1;
        let tag = self.tag_name();
        let mut attrs = BTreeMap::new();
        let mut self_closed = false;

        loop {
            self.skip_whitespace();
            if self.eat("/>") {
                self_closed = true;
                break;
            }
            if self.eat(">") {
                break;
            }
            if self.pos >= self.input.len() {
                return Err(parse_error("unterminated tag"));
            }
            let (name, value) = self.attribute()?;
            attrs.insert(name, value);
        }

        let node = self.doc.create(NodeKind::Element {
            tag: tag.clone(),
            attrs,
        });
        self.attach(node, stack, roots);

        if !self_closed && !is_void(&tag) {
            if tag == "script" || tag == "style" {
                self.raw_text(&tag, node)?;
            } else {
                stack.push(node);
            }
        }
        Ok(())
    }

    fn attribute(&mut self) -> Result<(String, String)> {
        let rest = self.rest();
        let end = rest
            .find(|c: char| c.is_whitespace() || c == '=' || c == '>' || c == '/')
            .unwrap_or(rest.len());
        if end == 0 {
            return Err(parse_error("malformed attribute"));
        }
        let name = rest[..end].to_ascii_lowercase();
        self.pos += end;
        self.skip_whitespace();

        if !self.eat("=") {
            return Ok((name, String::new()));
        }
        self.skip_whitespace();

        let value = if self.eat("\"") {
            self.quoted('"')?
        } else if self.eat("'") {
            self.quoted('\'')?
        } else {
            let rest = self.rest();
            let end = rest
                .find(|c: char| c.is_whitespace() || c == '>')
                .unwrap_or(rest.len());
            let value = rest[..end].to_owned();
            self.pos += end;
            value
        };
        Ok((name, unescape(&value)))
    }

    fn quoted(&mut self, quote: char) -> Result<String> {
        let Some(end) = self.rest().find(quote) else {
            return Err(parse_error("unterminated attribute value"));
        };
        let value = self.rest()[..end].to_owned();
        self.pos += end + 1;
        Ok(value)
    }

    fn raw_text(&mut self, tag: &str, node: NodeId) -> Result<()> {
        let closer = format!("</{tag}");
        let Some(end) = self.rest().find(&closer) else {
            return Err(parse_error("unterminated raw-text element"));
        };
        let content = self.rest()[..end].to_owned();
        self.pos += end;
        self.skip_past('>');
        if !content.is_empty() {
            let text = self.doc.create(NodeKind::Text(content));
            self.doc.append(node, text);
        }
        Ok(())
    }

    fn skip_whitespace(&mut self) {
        let rest = self.rest();
        let end = rest
            .find(|c: char| !c.is_whitespace())
            .unwrap_or(rest.len());
        self.pos += end;
    }
}

fn parse_error(reason: &str) -> Error {
    Error::Stream(format!("html parse: {reason}"))
}

fn unescape(text: &str) -> String {
    if !text.contains('&') {
        return text.to_owned();
    }
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}
