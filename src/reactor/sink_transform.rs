//! The sink transform: the pipeline's terminal stage.
//!
//! Formats each update's value (empty for PENDING, text for primitives,
//! rendered HTML for trees) and writes it through the sink's content and
//! attribute bind points. Nothing else in the client mutates the document.

use super::delegate::Update;
use crate::dom::Sink;
use crate::logic::Executor;
use crate::render::{escape_text, ComponentDelegate};
use crate::signal::Value;
use crate::Result;
use std::sync::Arc;

/// Value-to-document stage.
pub struct SinkTransform {
    executor: Arc<Executor>,
    sink: Arc<Sink>,
}

impl SinkTransform {
    /// A transform writing through the given sink.
    pub fn new(executor: Arc<Executor>, sink: Arc<Sink>) -> Self {
        Self { executor, sink }
    }

    /// Apply one update to the document.
    pub async fn apply(&self, update: &Update) -> Result<()> {
        let html = value_html(&self.executor, &update.value).await?;
        self.sink.sync(&update.id, &html)?;

        if let Some(text) = update.value.text_content() {
            for binding in self.sink.attribute_bindings(&update.id) {
                self.sink.sync_attribute(&update.id, &binding.attr, &text);
            }
        }
        Ok(())
    }
}

/// HTML form of a value for insertion at a content bind point.
pub(crate) async fn value_html(executor: &Arc<Executor>, value: &Value) -> Result<String> {
    match value {
        Value::Tree(tree) => {
            ComponentDelegate::new(executor.clone())
                .render_fragment(tree.clone())
                .await
        }
        other => Ok(escape_text(&other.text_content().unwrap_or_default())),
    }
}
