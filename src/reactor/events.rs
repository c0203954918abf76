//! Delegated event dispatch.
//!
//! One dispatcher stands in for the single capture-phase listener per event
//! name: given an event and its target node, it walks up the document and
//! the first ancestor carrying `data-w-on<event>` names the handler, which
//! is enqueued into the delegate with the original event payload.

use super::delegate::DelegateWriter;
use crate::dom::{NodeId, Sink};
use crate::signal::SignalId;
use std::sync::Arc;

/// Document-level event fan-in.
pub struct EventDispatcher {
    sink: Arc<Sink>,
    writer: DelegateWriter,
}

impl EventDispatcher {
    /// A dispatcher routing into the given delegate.
    pub fn new(sink: Arc<Sink>, writer: DelegateWriter) -> Self {
        Self { sink, writer }
    }

    /// Dispatch an event that fired on `target`. Returns whether a binding
    /// was found.
    pub fn dispatch(&self, event: &str, target: NodeId, payload: serde_json::Value) -> bool {
        let attr = format!("data-w-on{}", event.to_ascii_lowercase());
        let handler = self.sink.with_document(|doc| {
            let mut cursor = Some(target);
            while let Some(node) = cursor {
                if let Some(id) = doc.attribute(node, &attr) {
                    return Some(SignalId::from(id));
                }
                cursor = doc.parent(node);
            }
            None
        });

        match handler {
            Some(id) => {
                tracing::debug!(event, handler = %id, "dispatching");
                self.writer.execute_signal_with_event(id, payload);
                true
            }
            None => false,
        }
    }

    /// Dispatch a click on `target`.
    pub fn click(&self, target: NodeId) -> bool {
        self.dispatch("click", target, serde_json::json!({ "type": "click" }))
    }
}
