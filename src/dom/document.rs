//! Arena document.

use crate::render::{escape_attr, escape_text, is_void};
use std::collections::BTreeMap;

/// Index of a node in the document arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

/// What a node is.
#[derive(Clone, Debug)]
pub enum NodeKind {
    /// A tagged element with attributes.
    Element {
        /// Tag name, lowercased.
        tag: String,
        /// Attributes, name-sorted.
        attrs: BTreeMap<String, String>,
    },
    /// A text node (unescaped content).
    Text(String),
    /// A comment node (`<!--…-->` content without the delimiters).
    Comment(String),
}

/// One arena node. Detached nodes stay in the arena, unparented; the arena
/// never shrinks within a page session.
#[derive(Clone, Debug)]
pub struct DomNode {
    /// The node's content.
    pub kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// An arena-backed document tree with a synthetic root.
pub struct Document {
    nodes: Vec<DomNode>,
    root: NodeId,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// An empty document.
    pub fn new() -> Self {
        let root = DomNode {
            kind: NodeKind::Element {
                tag: "#document".to_owned(),
                attrs: BTreeMap::new(),
            },
            parent: None,
            children: Vec::new(),
        };
        Self {
            nodes: vec![root],
            root: NodeId(0),
        }
    }

    /// The synthetic root.
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Create an unattached node.
    pub fn create(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(DomNode {
            kind,
            parent: None,
            children: Vec::new(),
        });
        id
    }

    /// Borrow a node.
    pub fn node(&self, id: NodeId) -> &DomNode {
        &self.nodes[id.0]
    }

    /// The node's kind.
    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id.0].kind
    }

    /// The node's parent.
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    /// The node's children, in order.
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    /// Append `child` as the last child of `parent`.
    pub fn append(&mut self, parent: NodeId, child: NodeId) {
        self.detach(child);
        self.nodes[child.0].parent = Some(parent);
        self.nodes[parent.0].children.push(child);
    }

    /// Insert `child` into `parent` immediately before `reference`.
    pub fn insert_before(&mut self, parent: NodeId, child: NodeId, reference: NodeId) {
        self.detach(child);
        self.nodes[child.0].parent = Some(parent);
        let children = &mut self.nodes[parent.0].children;
        let at = children
            .iter()
            .position(|c| *c == reference)
            .unwrap_or(children.len());
        children.insert(at, child);
    }

    /// Unlink a node from its parent. The subtree stays intact.
    pub fn detach(&mut self, id: NodeId) {
        if let Some(parent) = self.nodes[id.0].parent.take() {
            self.nodes[parent.0].children.retain(|c| *c != id);
        }
    }

    /// The next sibling, if any.
    pub fn next_sibling(&self, id: NodeId) -> Option<NodeId> {
        let parent = self.parent(id)?;
        let siblings = self.children(parent);
        let at = siblings.iter().position(|c| *c == id)?;
        siblings.get(at + 1).copied()
    }

    /// Read an element attribute.
    pub fn attribute(&self, id: NodeId, name: &str) -> Option<&str> {
        match &self.nodes[id.0].kind {
            NodeKind::Element { attrs, .. } => attrs.get(name).map(String::as_str),
            _ => None,
        }
    }

    /// Set an element attribute; non-elements ignore the write.
    pub fn set_attribute(&mut self, id: NodeId, name: &str, value: &str) {
        if let NodeKind::Element { attrs, .. } = &mut self.nodes[id.0].kind {
            attrs.insert(name.to_owned(), value.to_owned());
        }
    }

    /// Comment content, if the node is a comment.
    pub fn comment_text(&self, id: NodeId) -> Option<&str> {
        match &self.nodes[id.0].kind {
            NodeKind::Comment(text) => Some(text.as_str()),
            _ => None,
        }
    }

    /// Attached nodes in document (preorder) order, root excluded.
    pub fn document_order(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(self.root).iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            out.push(id);
            stack.extend(self.children(id).iter().rev().copied());
        }
        out
    }

    /// Concatenated text of a subtree.
    pub fn text_content(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.collect_text(id, &mut out);
        out
    }

    fn collect_text(&self, id: NodeId, out: &mut String) {
        match &self.nodes[id.0].kind {
            NodeKind::Text(text) => out.push_str(text),
            NodeKind::Comment(_) => {}
            NodeKind::Element { .. } => {
                for child in self.children(id) {
                    self.collect_text(*child, out);
                }
            }
        }
    }

    /// First attached element carrying `name="value"`.
    pub fn find_by_attr(&self, name: &str, value: &str) -> Option<NodeId> {
        self.document_order()
            .into_iter()
            .find(|id| self.attribute(*id, name) == Some(value))
    }

    /// Serialize the document back to HTML (assertions and diagnostics).
    pub fn to_html(&self) -> String {
        let mut out = String::new();
        for child in self.children(self.root) {
            self.serialize_node(*child, &mut out);
        }
        out
    }

    fn serialize_node(&self, id: NodeId, out: &mut String) {
        match &self.nodes[id.0].kind {
            NodeKind::Text(text) => out.push_str(&escape_text(text)),
            NodeKind::Comment(text) => {
                out.push_str("<!--");
                out.push_str(text);
                out.push_str("-->");
            }
            NodeKind::Element { tag, attrs } => {
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
                if !is_void(tag) {
                    if tag == "script" || tag == "style" {
                        // Raw-text elements hold their content verbatim.
                        for child in self.children(id) {
                            if let NodeKind::Text(text) = self.kind(*child) {
                                out.push_str(text);
                            }
                        }
                    } else {
                        for child in self.children(id) {
                            self.serialize_node(*child, out);
                        }
                    }
                    out.push_str("</");
                    out.push_str(tag);
                    out.push('>');
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_append_and_order() {
        let mut doc = Document::new();
        let div = doc.create(NodeKind::Element {
            tag: "div".into(),
            attrs: BTreeMap::new(),
        });
        let hello = doc.create(NodeKind::Text("hello".into()));
        doc.append(doc.root(), div);
        doc.append(div, hello);

        assert_eq!(doc.document_order(), vec![div, hello]);
        assert_eq!(doc.text_content(div), "hello");
        assert_eq!(doc.to_html(), "<div>hello</div>");
    }

    #[test]
    fn test_insert_before_and_detach() {
        let mut doc = Document::new();
        let parent = doc.create(NodeKind::Element {
            tag: "p".into(),
            attrs: BTreeMap::new(),
        });
        doc.append(doc.root(), parent);
        let a = doc.create(NodeKind::Text("a".into()));
        let c = doc.create(NodeKind::Text("c".into()));
        doc.append(parent, a);
        doc.append(parent, c);

        let b = doc.create(NodeKind::Text("b".into()));
        doc.insert_before(parent, b, c);
        assert_eq!(doc.to_html(), "<p>abc</p>");

        doc.detach(b);
        assert_eq!(doc.to_html(), "<p>ac</p>");
    }
}
