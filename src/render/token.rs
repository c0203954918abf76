//! Render tokens.
//!
//! An element tree decomposes into a flat token sequence. Most tokens are
//! synchronous; the three executable variants mark subtrees whose content is
//! not synchronously available, and become chunk break points where the
//! delegate splices in child sub-streams.

use crate::signal::{Signal, SignalDef, SignalId};

/// One token of the render stream.
#[derive(Clone, Debug, PartialEq)]
pub enum Token {
    /// `<tag …>` with attributes already stringified.
    OpenTag {
        /// Tag name.
        tag: String,
        /// Attribute name/value pairs in emission order.
        attrs: Vec<(String, String)>,
    },
    /// `</tag>`.
    CloseTag {
        /// Tag name.
        tag: String,
    },
    /// Text content, escaped by the serializer.
    Text {
        /// Unescaped content.
        content: String,
    },
    /// Pre-serialized HTML, passed through verbatim.
    RawHtml {
        /// The markup.
        content: String,
    },
    /// Inline `<script>weaver.push(…)</script>` payload; deduplicated by id
    /// at serialization.
    SignalDefinition {
        /// The definition to serialize.
        signal: SignalDef,
    },
    /// `<!--^ID-->`.
    BindOpen {
        /// Bound signal id.
        id: SignalId,
    },
    /// `<!--/ID-->`.
    BindClose {
        /// Bound signal id.
        id: SignalId,
    },
    /// A node instance to execute asynchronously.
    NodeExecutable {
        /// The node signal.
        signal: Signal,
    },
    /// A computed whose value must be produced before its content exists.
    ComputedExecutable {
        /// The computed signal.
        signal: Signal,
    },
    /// A suspense boundary to resolve.
    SuspenseExecutable {
        /// The suspense signal.
        signal: Signal,
    },
}

impl Token {
    /// Whether this token breaks a synchronous chunk.
    pub fn is_executable(&self) -> bool {
        matches!(
            self,
            Token::NodeExecutable { .. }
                | Token::ComputedExecutable { .. }
                | Token::SuspenseExecutable { .. }
        )
    }

    /// Convenience constructor for text tokens.
    pub fn text(content: impl Into<String>) -> Self {
        Token::Text {
            content: content.into(),
        }
    }
}
