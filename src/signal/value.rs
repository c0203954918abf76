//! Runtime value domain.
//!
//! Every registry slot holds a [`Value`]: an arbitrary JSON datum, a rendered
//! element tree, an async iterable, or the distinguished PENDING placeholder
//! meaning "valid placeholder; a real value is in flight".

use crate::tree::TreeNode;
use futures::stream::BoxStream;
use futures::Stream;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;

/// An async iterable value, as produced by client logic for reducer sources.
///
/// The underlying stream can be taken exactly once; the reducer that drains
/// it owns the iteration. Clones share the same take-once slot.
#[derive(Clone)]
pub struct ValueStream {
    inner: Arc<Mutex<Option<BoxStream<'static, Value>>>>,
}

impl ValueStream {
    /// Wrap a stream of items.
    pub fn new(stream: impl Stream<Item = Value> + Send + 'static) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(Box::pin(stream)))),
        }
    }

    /// Take the underlying stream, leaving the slot empty.
    pub async fn take(&self) -> Option<BoxStream<'static, Value>> {
        self.inner.lock().await.take()
    }
}

impl fmt::Debug for ValueStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ValueStream(..)")
    }
}

/// A runtime signal value.
#[derive(Clone, Debug)]
pub enum Value {
    /// Deferred; will be filled in by a later update.
    Pending,
    /// Any JSON datum. Arrays and objects are stored by reference upstream;
    /// here the clone-on-share cost is carried by `serde_json::Value`.
    Json(serde_json::Value),
    /// An element tree, as produced by node execution.
    Tree(TreeNode),
    /// An async iterable, consumed by reducers.
    Stream(ValueStream),
}

impl Value {
    /// Whether this is the PENDING placeholder.
    #[inline]
    pub fn is_pending(&self) -> bool {
        matches!(self, Value::Pending)
    }

    /// Borrow the JSON datum, if this is one.
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Value::Json(v) => Some(v),
            _ => None,
        }
    }

    /// Borrow the element tree, if this is one.
    pub fn as_tree(&self) -> Option<&TreeNode> {
        match self {
            Value::Tree(t) => Some(t),
            _ => None,
        }
    }

    /// Convenience accessor for integer logic arguments.
    pub fn as_i64(&self) -> Option<i64> {
        self.as_json().and_then(serde_json::Value::as_i64)
    }

    /// Convenience accessor for string logic arguments.
    pub fn as_str(&self) -> Option<&str> {
        self.as_json().and_then(serde_json::Value::as_str)
    }

    /// Whether this value survives the JSON serialization boundary.
    pub fn is_json(&self) -> bool {
        matches!(self, Value::Json(_))
    }

    /// Text form of a non-tree value: empty for PENDING, the bare string for
    /// JSON strings, compact JSON otherwise. Trees and streams have no text
    /// form; the renderer formats those.
    pub fn text_content(&self) -> Option<String> {
        match self {
            Value::Pending => Some(String::new()),
            Value::Json(serde_json::Value::String(s)) => Some(s.clone()),
            Value::Json(other) => Some(other.to_string()),
            Value::Tree(_) | Value::Stream(_) => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Pending, Value::Pending) => true,
            (Value::Json(a), Value::Json(b)) => a == b,
            (Value::Tree(a), Value::Tree(b)) => a == b,
            (Value::Stream(a), Value::Stream(b)) => Arc::ptr_eq(&a.inner, &b.inner),
            _ => false,
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Value::Json(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Json(v.into())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Json(serde_json::Value::from(v))
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Json(v.into())
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Json(v.into())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Json(v.into())
    }
}

impl From<TreeNode> for Value {
    fn from(v: TreeNode) -> Self {
        Value::Tree(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_pending_has_empty_text() {
        assert_eq!(Value::Pending.text_content().as_deref(), Some(""));
    }

    #[test]
    fn test_strings_render_bare() {
        assert_eq!(
            Value::from("hello").text_content().as_deref(),
            Some("hello")
        );
    }

    #[test]
    fn test_structured_json_renders_compact() {
        let v = Value::Json(json!({"a": 1}));
        assert_eq!(v.text_content().as_deref(), Some(r#"{"a":1}"#));
        assert_eq!(Value::from(7).text_content().as_deref(), Some("7"));
    }

    #[tokio::test]
    async fn test_stream_is_take_once() {
        let vs = ValueStream::new(futures::stream::iter(vec![Value::from(1)]));
        let shared = vs.clone();
        assert!(shared.take().await.is_some());
        assert!(vs.take().await.is_none());
    }
}
