//! Client reactor.
//!
//! A single cooperative loop processes one channel of commands (user
//! events, deferral completions, reducer drains), walks the dependency
//! graph, and emits `signal-update` tokens downstream through the suspense
//! and sink transforms, which turn them into in-place document edits.

mod delegate;
mod events;
mod sink_transform;
mod suspense;

pub use delegate::{Command, DelegateWriter, InflightTracker, SignalDelegate, Update};
pub use events::EventDispatcher;
pub use sink_transform::SinkTransform;
pub use suspense::SuspenseTransform;

use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;

/// Spawn the downstream half of the reactor: one task applying each update
/// through the suspense transform, then the sink transform, in order. The
/// single consumer keeps the document single-writer.
pub fn spawn_update_pipeline(
    suspense: SuspenseTransform,
    sink: SinkTransform,
    mut updates: UnboundedReceiver<Update>,
    inflight: Arc<InflightTracker>,
) {
    tokio::spawn(async move {
        while let Some(update) = updates.recv().await {
            if let Err(error) = suspense.process(&update).await {
                tracing::error!(id = %update.id, %error, "suspense transform failed");
            }
            if let Err(error) = sink.apply(&update).await {
                tracing::error!(id = %update.id, %error, "sink transform failed");
            }
            inflight.end();
        }
    });
}
