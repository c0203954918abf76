//! Declarative element tree.
//!
//! The tree is inert: it describes elements, literals, embedded signals, and
//! async subtrees, and it never executes anything. The renderer walks it on
//! the server; suspense definitions carry subtrees across the wire; node
//! logic returns new subtrees on both sides.
//!
//! Builders normalize as they go: children are flattened, and attribute and
//! event names are lowercased, so the server and client agree on the exact
//! attribute spelling (`onClick` becomes `onclick` before it is ever stored).
//!
//! ```rust,ignore
//! let view = el("div")
//!     .attr("class", "counter")
//!     .child(el("button").on("click", &increment).child("+"))
//!     .child(el("span").child(&count));
//! ```

use crate::signal::Signal;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;

/// A resolved-on-await subtree. Cloneable so a tree value can be stored and
/// rendered; has no wire form.
pub type DeferredTree = Shared<BoxFuture<'static, TreeNode>>;

/// One node of the declarative tree.
#[derive(Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TreeNode {
    /// Literal text content.
    Text(String),
    /// A flattened sequence of children.
    Fragment(Vec<TreeNode>),
    /// A tagged element with attributes and children.
    Element(Element),
    /// An embedded signal; registered lazily during tree traversal.
    Signal(Signal),
    /// Pre-serialized HTML, passed through unescaped.
    Raw(RawHtml),
    /// A subtree that resolves asynchronously. Renderer-side only: an
    /// unresolved promise has no wire form, so serializing one errors.
    #[serde(skip)]
    Deferred(DeferredTree),
}

/// Pre-serialized HTML content.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawHtml {
    /// The verbatim markup.
    pub raw: String,
}

/// A tagged element.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Element {
    /// Intrinsic tag name (`div`, `span`, …).
    pub tag: String,
    /// Attributes in insertion order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attrs: Vec<Attr>,
    /// Child nodes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TreeNode>,
}

/// One element attribute.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Attr {
    /// Lowercased attribute name; event props are `on` + event name.
    pub name: String,
    /// Literal or signal-bound value.
    pub value: AttrValue,
}

impl Attr {
    /// Whether this is an event prop (`onclick`, `oninput`, …).
    pub fn is_event(&self) -> bool {
        self.name.len() > 2 && self.name.starts_with("on")
    }
}

/// An attribute value: a JSON literal or a bound signal.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    /// Signal-bound; rendered as `data-w-<name>="<id>"` plus the literal
    /// current value for non-event attributes.
    Signal(Signal),
    /// Plain literal.
    Literal(serde_json::Value),
}

impl TreeNode {
    /// An empty fragment.
    pub fn empty() -> Self {
        TreeNode::Fragment(Vec::new())
    }

    /// Walk the tree depth-first, visiting every embedded signal.
    ///
    /// Visits signals in element attributes, signal children, and recursively
    /// the fallback/children trees of embedded suspense definitions. Deferred
    /// subtrees are opaque until resolved and are not entered.
    pub fn visit_signals(&self, visit: &mut impl FnMut(&Signal)) {
        match self {
            TreeNode::Text(_) | TreeNode::Raw(_) | TreeNode::Deferred(_) => {}
            TreeNode::Fragment(children) => {
                for child in children {
                    child.visit_signals(visit);
                }
            }
            TreeNode::Element(element) => {
                for attr in &element.attrs {
                    if let AttrValue::Signal(signal) = &attr.value {
                        visit(signal);
                    }
                }
                for child in &element.children {
                    child.visit_signals(visit);
                }
            }
            TreeNode::Signal(signal) => {
                visit(signal);
                // Suspense definitions embed whole subtrees of their own.
                if let crate::signal::SignalDef::Suspense {
                    fallback, children, ..
                } = signal.def()
                {
                    fallback.visit_signals(visit);
                    children.visit_signals(visit);
                }
            }
        }
    }

    /// Structural digest used for content-addressing suspense boundaries:
    /// tags, text, and embedded signal ids, independent of runtime state.
    pub(crate) fn digest_into(&self, buf: &mut String) {
        match self {
            TreeNode::Text(text) => {
                buf.push('t');
                buf.push_str(text);
            }
            TreeNode::Raw(raw) => {
                buf.push('r');
                buf.push_str(&raw.raw);
            }
            TreeNode::Fragment(children) => {
                buf.push('f');
                for child in children {
                    child.digest_into(buf);
                }
            }
            TreeNode::Element(element) => {
                buf.push('<');
                buf.push_str(&element.tag);
                for attr in &element.attrs {
                    buf.push(' ');
                    buf.push_str(&attr.name);
                    buf.push('=');
                    match &attr.value {
                        AttrValue::Signal(signal) => buf.push_str(signal.id().as_str()),
                        AttrValue::Literal(value) => buf.push_str(&value.to_string()),
                    }
                }
                for child in &element.children {
                    child.digest_into(buf);
                }
                buf.push('>');
            }
            TreeNode::Signal(signal) => {
                buf.push('$');
                buf.push_str(signal.id().as_str());
            }
            TreeNode::Deferred(_) => buf.push('?'),
        }
    }
}

impl fmt::Debug for TreeNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TreeNode::Text(text) => f.debug_tuple("Text").field(text).finish(),
            TreeNode::Fragment(children) => f.debug_tuple("Fragment").field(children).finish(),
            TreeNode::Element(element) => f.debug_tuple("Element").field(element).finish(),
            TreeNode::Signal(signal) => f.debug_tuple("Signal").field(signal).finish(),
            TreeNode::Raw(raw) => f.debug_tuple("Raw").field(raw).finish(),
            TreeNode::Deferred(_) => f.write_str("Deferred(..)"),
        }
    }
}

impl PartialEq for TreeNode {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (TreeNode::Text(a), TreeNode::Text(b)) => a == b,
            (TreeNode::Fragment(a), TreeNode::Fragment(b)) => a == b,
            (TreeNode::Element(a), TreeNode::Element(b)) => a == b,
            (TreeNode::Signal(a), TreeNode::Signal(b)) => a == b,
            (TreeNode::Raw(a), TreeNode::Raw(b)) => a == b,
            // Two deferred subtrees compare equal only if never; identity
            // lives in what they resolve to.
            _ => false,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────
// Builders
// ─────────────────────────────────────────────────────────────────────────

/// Start building an element.
pub fn el(tag: impl Into<String>) -> ElementBuilder {
    ElementBuilder {
        tag: tag.into(),
        attrs: Vec::new(),
        children: Vec::new(),
    }
}

/// A literal text node.
pub fn text(content: impl fmt::Display) -> TreeNode {
    TreeNode::Text(content.to_string())
}

/// A pre-serialized HTML node.
pub fn raw(html: impl Into<String>) -> TreeNode {
    TreeNode::Raw(RawHtml { raw: html.into() })
}

/// A flattened sequence of children.
pub fn fragment(children: impl IntoIterator<Item = TreeNode>) -> TreeNode {
    TreeNode::Fragment(children.into_iter().collect())
}

/// A subtree that resolves asynchronously.
pub fn deferred(future: impl Future<Output = TreeNode> + Send + 'static) -> TreeNode {
    TreeNode::Deferred(future.boxed().shared())
}

/// Builder for a tagged element.
pub struct ElementBuilder {
    tag: String,
    attrs: Vec<Attr>,
    children: Vec<TreeNode>,
}

impl ElementBuilder {
    /// Add a literal attribute.
    pub fn attr(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.attrs.push(Attr {
            name: name.into().to_ascii_lowercase(),
            value: AttrValue::Literal(value.into()),
        });
        self
    }

    /// Bind an attribute to a signal's value.
    pub fn bind(mut self, name: impl Into<String>, signal: &Signal) -> Self {
        self.attrs.push(Attr {
            name: name.into().to_ascii_lowercase(),
            value: AttrValue::Signal(signal.clone()),
        });
        self
    }

    /// Bind an event to a handler signal (`on("click", …)` stores `onclick`).
    pub fn on(mut self, event: impl Into<String>, handler: &Signal) -> Self {
        self.attrs.push(Attr {
            name: format!("on{}", event.into().to_ascii_lowercase()),
            value: AttrValue::Signal(handler.clone()),
        });
        self
    }

    /// Append a child node.
    pub fn child(mut self, child: impl Into<TreeNode>) -> Self {
        self.children.push(child.into());
        self
    }

    /// Append several child nodes.
    pub fn children(mut self, children: impl IntoIterator<Item = TreeNode>) -> Self {
        self.children.extend(children);
        self
    }

    /// Finish the element.
    pub fn build(self) -> TreeNode {
        TreeNode::Element(Element {
            tag: self.tag,
            attrs: self.attrs,
            children: self.children,
        })
    }
}

impl From<ElementBuilder> for TreeNode {
    fn from(builder: ElementBuilder) -> Self {
        builder.build()
    }
}

impl From<&Signal> for TreeNode {
    fn from(signal: &Signal) -> Self {
        TreeNode::Signal(signal.clone())
    }
}

impl From<Signal> for TreeNode {
    fn from(signal: Signal) -> Self {
        TreeNode::Signal(signal)
    }
}

impl From<&str> for TreeNode {
    fn from(content: &str) -> Self {
        TreeNode::Text(content.to_owned())
    }
}

impl From<String> for TreeNode {
    fn from(content: String) -> Self {
        TreeNode::Text(content)
    }
}

impl From<i64> for TreeNode {
    fn from(content: i64) -> Self {
        TreeNode::Text(content.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::SignalScope;

    #[test]
    fn test_builder_lowercases_events() {
        let scope = SignalScope::server();
        let handler = scope.logic("/logic/inc.ts");
        let TreeNode::Element(element) = el("button").on("Click", &handler).build() else {
            panic!("expected element");
        };
        assert_eq!(element.attrs[0].name, "onclick");
        assert!(element.attrs[0].is_event());
    }

    #[test]
    fn test_visit_signals_reaches_attrs_and_children() {
        let scope = SignalScope::server();
        let count = scope.state(0);
        let title = scope.state("hi");

        let tree = el("div")
            .bind("title", &title)
            .child(el("span").child(&count))
            .build();

        let mut seen = Vec::new();
        tree.visit_signals(&mut |s| seen.push(s.id().clone()));
        assert_eq!(seen, vec![title.id().clone(), count.id().clone()]);
    }

    #[test]
    fn test_text_children_from_literals() {
        let tree = el("p").child("a").child(42i64).build();
        let TreeNode::Element(element) = tree else {
            panic!("expected element");
        };
        assert_eq!(
            element.children,
            vec![TreeNode::Text("a".into()), TreeNode::Text("42".into())]
        );
    }
}
