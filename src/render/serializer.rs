//! Token-to-HTML serialization.

use super::token::Token;
use crate::signal::{DefinitionMessage, SignalId};
use crate::Result;
use std::collections::HashSet;

/// Tags that never take a closing tag.
pub const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

/// Whether a tag is self-closing.
pub fn is_void(tag: &str) -> bool {
    VOID_ELEMENTS.contains(&tag)
}

/// Escape text content (`&`, `<`, `>`).
pub fn escape_text(content: &str) -> String {
    let mut out = String::with_capacity(content.len());
    for c in content.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

/// Escape an attribute value (`&`, `<`, `>`, `"`, `'`).
pub fn escape_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Walks the token stream and emits HTML.
///
/// Stateful only for script deduplication: each distinct signal definition
/// is serialized once per document, however many tokens mention it.
#[derive(Default)]
pub struct HtmlSerializer {
    emitted: HashSet<SignalId>,
    suppress_definitions: bool,
}

impl HtmlSerializer {
    /// A serializer with an empty dedupe set.
    pub fn new() -> Self {
        Self::default()
    }

    /// A serializer that drops definition scripts entirely. Used for
    /// fragments spliced into a document that already carries them
    /// (suspense `_childrenHtml`, client re-renders).
    pub fn without_definitions() -> Self {
        Self {
            emitted: HashSet::new(),
            suppress_definitions: true,
        }
    }

    /// Append one token's HTML to `out`.
    pub fn serialize_token(&mut self, token: &Token, out: &mut String) -> Result<()> {
        match token {
            Token::OpenTag { tag, attrs } => {
                out.push('<');
                out.push_str(tag);
                for (name, value) in attrs {
                    out.push(' ');
                    out.push_str(name);
                    out.push_str("=\"");
                    out.push_str(&escape_attr(value));
                    out.push('"');
                }
                out.push('>');
            }
            Token::CloseTag { tag } => {
                if !is_void(tag) {
                    out.push_str("</");
                    out.push_str(tag);
                    out.push('>');
                }
            }
            Token::Text { content } => out.push_str(&escape_text(content)),
            Token::RawHtml { content } => out.push_str(content),
            Token::BindOpen { id } => {
                out.push_str("<!--^");
                out.push_str(id.as_str());
                out.push_str("-->");
            }
            Token::BindClose { id } => {
                out.push_str("<!--/");
                out.push_str(id.as_str());
                out.push_str("-->");
            }
            Token::SignalDefinition { signal } => {
                if !self.suppress_definitions && self.emitted.insert(signal.id().clone()) {
                    let payload = serde_json::to_string(&DefinitionMessage::new(signal.clone()))?;
                    out.push_str("<script>weaver.push(");
                    // Keep the inline payload from terminating its own tag.
                    out.push_str(&payload.replace('<', "\\u003c"));
                    out.push_str(")</script>");
                }
            }
            // Executables never reach the serializer; the delegate replaces
            // them with child sub-streams.
            Token::NodeExecutable { .. }
            | Token::ComputedExecutable { .. }
            | Token::SuspenseExecutable { .. } => {
                tracing::error!(?token, "executable token reached the serializer");
            }
        }
        Ok(())
    }

    /// Serialize a full token slice into one string.
    pub fn serialize_all(&mut self, tokens: &[Token], out: &mut String) -> Result<()> {
        for token in tokens {
            self.serialize_token(token, out)?;
        }
        Ok(())
    }
}
