//! The sink: bind-point discovery and in-place patching.
//!
//! Content bind points are comment pairs `<!--^ID-->…<!--/ID-->`, stored as
//! the sibling range between the delimiters. Attribute bind points are
//! `data-w-<name>="ID"` pairs. Multiple bind points may share an id. A
//! bind-point's range stays valid as long as its bracketing comments remain
//! in the DOM; every patch here preserves them.

use super::document::{Document, NodeId, NodeKind};
use super::parser::parse_into;
use crate::signal::SignalId;
use crate::Result;
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Clone, Copy, Debug)]
struct ContentBinding {
    open: NodeId,
    close: NodeId,
}

/// An attribute bound to a signal id.
#[derive(Clone, Debug)]
pub struct AttrBinding {
    /// The bound element.
    pub node: NodeId,
    /// The real attribute name (without the `data-w-` prefix).
    pub attr: String,
}

#[derive(Default)]
struct SinkInner {
    doc: Document,
    content: HashMap<SignalId, Vec<ContentBinding>>,
    attrs: HashMap<SignalId, Vec<AttrBinding>>,
}

/// The DOM patcher.
pub struct Sink {
    inner: RwLock<SinkInner>,
}

impl Sink {
    /// Wrap a parsed document and discover its bind points.
    pub fn new(doc: Document) -> Self {
        let mut inner = SinkInner {
            doc,
            content: HashMap::new(),
            attrs: HashMap::new(),
        };
        rescan(&mut inner);
        Self {
            inner: RwLock::new(inner),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, SinkInner> {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, SinkInner> {
        self.inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Replace the contents of every content bind point keyed by `id` with
    /// the parsed fragment, then rescan the document for bind markers the
    /// new content may have introduced.
    pub fn sync(&self, id: &SignalId, html: &str) -> Result<()> {
        let mut inner = self.write();
        let bindings = match inner.content.get(id) {
            Some(bindings) => bindings.clone(),
            None => return Ok(()),
        };

        for binding in bindings {
            let Some(parent) = inner.doc.parent(binding.open) else {
                continue;
            };
            // Clear the range: everything strictly between the delimiters.
            while let Some(next) = inner.doc.next_sibling(binding.open) {
                if next == binding.close {
                    break;
                }
                inner.doc.detach(next);
            }
            let fragment = parse_into(&mut inner.doc, html)?;
            for node in fragment {
                inner.doc.insert_before(parent, node, binding.close);
            }
        }

        rescan(&mut inner);
        tracing::trace!(id = %id, "synced content bind point");
        Ok(())
    }

    /// Set the (normalized) attribute on every element bound as `(id, attr)`.
    pub fn sync_attribute(&self, id: &SignalId, attr: &str, value: &str) {
        let mut inner = self.write();
        let bindings = match inner.attrs.get(id) {
            Some(bindings) => bindings.clone(),
            None => return,
        };
        for binding in bindings {
            if binding.attr == attr {
                inner.doc.set_attribute(binding.node, attr, value);
            }
        }
    }

    /// Attribute bindings for an id (excluding event bindings, which the
    /// dispatcher reads directly off the document).
    pub fn attribute_bindings(&self, id: &SignalId) -> Vec<AttrBinding> {
        self.read()
            .attrs
            .get(id)
            .map(|bindings| {
                bindings
                    .iter()
                    .filter(|b| !(b.attr.len() > 2 && b.attr.starts_with("on")))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether any bind point (content or attribute) exists for `id`.
    pub fn has_bind_point(&self, id: &SignalId) -> bool {
        let inner = self.read();
        inner.content.contains_key(id) || inner.attrs.contains_key(id)
    }

    /// Whether any content bind point for `id` currently has content.
    pub fn has_content(&self, id: &SignalId) -> bool {
        let inner = self.read();
        inner
            .content
            .get(id)
            .is_some_and(|bindings| {
                bindings.iter().any(|binding| {
                    inner.doc.next_sibling(binding.open) != Some(binding.close)
                })
            })
    }

    /// Whether some bind point of `child` sits inside some bind point of
    /// `ancestor`. Document-order interval containment: the delimiters are
    /// siblings, so everything between them in document order is inside.
    pub fn is_descendant(&self, child: &SignalId, ancestor: &SignalId) -> bool {
        let inner = self.read();
        let (Some(children), Some(ancestors)) =
            (inner.content.get(child), inner.content.get(ancestor))
        else {
            return false;
        };

        let position: HashMap<NodeId, usize> = inner
            .doc
            .document_order()
            .into_iter()
            .enumerate()
            .map(|(at, id)| (id, at))
            .collect();

        ancestors.iter().any(|outer| {
            let (Some(open), Some(close)) =
                (position.get(&outer.open), position.get(&outer.close))
            else {
                return false;
            };
            children.iter().any(|binding| {
                position
                    .get(&binding.open)
                    .is_some_and(|at| open < at && at < close)
            })
        })
    }

    /// Concatenated text of the first content bind point for `id`.
    pub fn text_of(&self, id: &SignalId) -> Option<String> {
        let inner = self.read();
        let binding = inner.content.get(id)?.first()?;
        let mut out = String::new();
        let mut cursor = inner.doc.next_sibling(binding.open);
        while let Some(node) = cursor {
            if node == binding.close {
                break;
            }
            out.push_str(&inner.doc.text_content(node));
            cursor = inner.doc.next_sibling(node);
        }
        Some(out)
    }

    /// Read access to the underlying document.
    pub fn with_document<R>(&self, f: impl FnOnce(&Document) -> R) -> R {
        f(&self.read().doc)
    }

    /// Serialize the current document (assertions and diagnostics).
    pub fn html(&self) -> String {
        self.read().doc.to_html()
    }
}

/// Full bind-point discovery pass.
fn rescan(inner: &mut SinkInner) {
    inner.content.clear();
    inner.attrs.clear();

    let mut open: HashMap<String, Vec<NodeId>> = HashMap::new();
    for node in inner.doc.document_order() {
        match inner.doc.kind(node) {
            NodeKind::Comment(text) => {
                if let Some(id) = text.strip_prefix('^') {
                    open.entry(id.to_owned()).or_default().push(node);
                } else if let Some(id) = text.strip_prefix('/') {
                    if let Some(opener) = open.get_mut(id).and_then(Vec::pop) {
                        inner
                            .content
                            .entry(SignalId::from(id))
                            .or_default()
                            .push(ContentBinding {
                                open: opener,
                                close: node,
                            });
                    }
                }
            }
            NodeKind::Element { attrs, .. } => {
                for (name, value) in attrs {
                    if let Some(attr) = name.strip_prefix("data-w-") {
                        inner
                            .attrs
                            .entry(SignalId::from(value.as_str()))
                            .or_default()
                            .push(AttrBinding {
                                node,
                                attr: attr.to_owned(),
                            });
                    }
                }
            }
            NodeKind::Text(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::parse_document;
    use pretty_assertions::assert_eq;

    fn sink(html: &str) -> Sink {
        Sink::new(parse_document(html).unwrap())
    }

    #[test]
    fn test_discovery_finds_content_and_attrs() {
        let sink = sink(
            r#"<div data-w-title="s1" title="x"><span><!--^s0-->0<!--/s0--></span></div>"#,
        );
        assert!(sink.has_bind_point(&SignalId::from("s0")));
        assert!(sink.has_bind_point(&SignalId::from("s1")));
        assert!(sink.has_content(&SignalId::from("s0")));
        assert_eq!(sink.text_of(&SignalId::from("s0")).as_deref(), Some("0"));
    }

    #[test]
    fn test_sync_replaces_range_and_preserves_markers() {
        let sink = sink("<span><!--^s0-->0<!--/s0--></span>");
        sink.sync(&SignalId::from("s0"), "1").unwrap();
        assert_eq!(sink.html(), "<span><!--^s0-->1<!--/s0--></span>");

        // The markers survive repeated patches.
        sink.sync(&SignalId::from("s0"), "2").unwrap();
        assert_eq!(sink.html(), "<span><!--^s0-->2<!--/s0--></span>");
    }

    #[test]
    fn test_sync_updates_every_bind_point_with_that_id() {
        let sink = sink("<b><!--^s0-->x<!--/s0--></b><i><!--^s0-->x<!--/s0--></i>");
        sink.sync(&SignalId::from("s0"), "y").unwrap();
        assert_eq!(sink.html(), "<b><!--^s0-->y<!--/s0--></b><i><!--^s0-->y<!--/s0--></i>");
    }

    #[test]
    fn test_sync_rescans_for_new_markers() {
        let sink = sink("<div><!--^a1--><!--/a1--></div>");
        sink.sync(&SignalId::from("a1"), "<span><!--^b2--><!--/b2--></span>")
            .unwrap();
        assert!(sink.has_bind_point(&SignalId::from("b2")));
        sink.sync(&SignalId::from("b2"), "inner").unwrap();
        assert_eq!(sink.text_of(&SignalId::from("b2")).as_deref(), Some("inner"));
    }

    #[test]
    fn test_sync_attribute() {
        let sink = sink(r#"<input value="a" data-w-value="s0">"#);
        sink.sync_attribute(&SignalId::from("s0"), "value", "b");
        assert_eq!(sink.html(), r#"<input data-w-value="s0" value="b">"#);
    }

    #[test]
    fn test_is_descendant_uses_interval_containment() {
        let sink = sink(
            "<div><!--^outer--><p><!--^inner-->x<!--/inner--></p><!--/outer--></div><!--^other--><!--/other-->",
        );
        assert!(sink.is_descendant(&SignalId::from("inner"), &SignalId::from("outer")));
        assert!(!sink.is_descendant(&SignalId::from("other"), &SignalId::from("outer")));
        assert!(!sink.is_descendant(&SignalId::from("outer"), &SignalId::from("inner")));
    }
}
