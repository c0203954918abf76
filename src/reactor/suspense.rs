//! The suspense transform: pending-dependency tracking and region swaps.
//!
//! Sits ahead of the sink transform. PENDING updates enroll the signal in
//! every suspense boundary whose bind point contains the signal's bind
//! point; the first enrollment swaps the region to the fallback. Concrete
//! updates retire enrollments; emptying a boundary swaps the children back
//! (instantly via the server-precomputed `_childrenHtml` when present) and
//! re-syncs the now-live computed bind points.

use super::delegate::Update;
use super::sink_transform::value_html;
use crate::dom::Sink;
use crate::logic::Executor;
use crate::render::ComponentDelegate;
use crate::signal::{SignalDef, SignalId};
use crate::tree::TreeNode;
use crate::Result;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

/// Pending-dependency tracking stage.
pub struct SuspenseTransform {
    executor: Arc<Executor>,
    sink: Arc<Sink>,
    pending: Mutex<HashMap<SignalId, HashSet<SignalId>>>,
}

impl SuspenseTransform {
    /// A transform over the given sink, seeded from the registry's suspense
    /// definitions (SSR-populated `pendingDeps` carry over).
    pub fn new(executor: Arc<Executor>, sink: Arc<Sink>) -> Self {
        let mut pending: HashMap<SignalId, HashSet<SignalId>> = HashMap::new();
        for def in executor.registry().get_all_signals() {
            if let SignalDef::Suspense {
                id, pending_deps, ..
            } = def
            {
                pending.insert(id, pending_deps.into_iter().collect());
            }
        }
        Self {
            executor,
            sink,
            pending: Mutex::new(pending),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SignalId, HashSet<SignalId>>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Process one update; the update itself always flows on to the sink.
    pub async fn process(&self, update: &Update) -> Result<()> {
        if update.value.is_pending() {
            for boundary in self.enroll(&update.id) {
                self.show_fallback(&boundary).await?;
            }
        } else {
            for boundary in self.retire(&update.id) {
                self.show_children(&boundary).await?;
            }
        }
        Ok(())
    }

    /// Add a pending signal to every boundary containing it; returns the
    /// boundaries that just gained their first pending dep.
    fn enroll(&self, id: &SignalId) -> Vec<SignalId> {
        let boundaries: Vec<SignalId> = {
            let pending = self.lock();
            pending.keys().cloned().collect()
        };

        let mut first = Vec::new();
        for boundary in boundaries {
            if !self.sink.is_descendant(id, &boundary) {
                continue;
            }
            let mut pending = self.lock();
            let Some(deps) = pending.get_mut(&boundary) else {
                continue;
            };
            let was_empty = deps.is_empty();
            if deps.insert(id.clone()) && was_empty {
                first.push(boundary);
            }
        }
        first
    }

    /// Remove a resolved signal from every boundary tracking it; returns the
    /// boundaries that just emptied.
    fn retire(&self, id: &SignalId) -> Vec<SignalId> {
        let mut emptied = Vec::new();
        let mut pending = self.lock();
        for (boundary, deps) in pending.iter_mut() {
            if deps.remove(id) && deps.is_empty() {
                emptied.push(boundary.clone());
            }
        }
        emptied
    }

    fn boundary_def(&self, id: &SignalId) -> Option<(TreeNode, TreeNode, Option<String>)> {
        match self.executor.registry().get_signal(id) {
            Some(SignalDef::Suspense {
                fallback,
                children,
                children_html,
                ..
            }) => Some((*fallback, *children, children_html)),
            _ => None,
        }
    }

    async fn show_fallback(&self, boundary: &SignalId) -> Result<()> {
        let Some((fallback, _, _)) = self.boundary_def(boundary) else {
            return Ok(());
        };
        tracing::debug!(id = %boundary, "suspense showing fallback");
        let html = self.render(fallback).await?;
        self.sink.sync(boundary, &html)
    }

    async fn show_children(&self, boundary: &SignalId) -> Result<()> {
        let Some((_, children, children_html)) = self.boundary_def(boundary) else {
            return Ok(());
        };
        tracing::debug!(id = %boundary, "suspense showing children");

        let html = match children_html {
            Some(html) => html,
            None => self.render(children).await?,
        };
        self.sink.sync(boundary, &html)?;

        // The swapped-in markup carries bind markers with stale (or empty)
        // content; push the current computed values into them.
        for def in self.executor.registry().get_all_signals() {
            if let SignalDef::Computed { id, .. } = &def {
                if !self.sink.is_descendant(id, boundary) {
                    continue;
                }
                if let Some(value) = self.executor.registry().get_value(id) {
                    if !value.is_pending() {
                        let html = value_html(&self.executor, &value).await?;
                        self.sink.sync(id, &html)?;
                    }
                }
            }
        }
        Ok(())
    }

    async fn render(&self, tree: TreeNode) -> Result<String> {
        ComponentDelegate::new(self.executor.clone())
            .render_fragment(tree)
            .await
    }
}
