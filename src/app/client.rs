//! Client orchestrator.
//!
//! Mirrors the browser bootstrap: the host page stubs
//! `window.weaver = {weaverQueue: [], push(m){…}}` before any serialized
//! signal scripts, then the runtime drains the queue and takes over.
//! Hydration here parses the rendered HTML, replays every queued
//! `weaver.push(…)` message into a fresh registry, wires the sink and the
//! reactor pipeline, and issues the initial commands.

use crate::dom::{parse_document, Document, NodeId, NodeKind, Sink};
use crate::logic::{Executor, ModuleLoader, RemoteExecutor, RemoteOptions, WorkerPool};
use crate::reactor::{
    spawn_update_pipeline, DelegateWriter, EventDispatcher, InflightTracker, SignalDelegate,
    SinkTransform, SuspenseTransform,
};
use crate::signal::{
    DefinitionMessage, LogicContext, Registry, Role, SignalDef, SignalId, SignalScope, Value,
};
use crate::Result;
use std::sync::Arc;
use tokio::sync::mpsc;

/// The client-side core: registry, executor, sink, reactor.
pub struct ClientWeaver {
    scope: SignalScope,
    registry: Arc<Registry>,
    executor: Arc<Executor>,
    sink: Arc<Sink>,
    writer: DelegateWriter,
    dispatcher: EventDispatcher,
    inflight: Arc<InflightTracker>,
}

/// Builder for [`ClientWeaver`].
pub struct ClientWeaverBuilder {
    loader: Arc<dyn ModuleLoader>,
    remote: RemoteOptions,
    workers: Option<Arc<WorkerPool>>,
}

impl ClientWeaverBuilder {
    /// Override the remote-execution endpoint.
    pub fn remote_options(mut self, remote: RemoteOptions) -> Self {
        self.remote = remote;
        self
    }

    /// Override the worker pool instead of sharing the process-wide one.
    pub fn worker_pool(mut self, workers: Arc<WorkerPool>) -> Self {
        self.workers = Some(workers);
        self
    }

    /// Parse server-rendered HTML, drain the bootstrap queue, and start the
    /// reactor.
    pub fn hydrate(self, html: &str) -> Result<ClientWeaver> {
        let doc = parse_document(html)?;
        let registry = Arc::new(Registry::new());
        for message in drain_bootstrap_queue(&doc) {
            registry.register_def(message.signal);
        }
        tracing::debug!(signals = registry.get_all_signals().len(), "hydrated registry");

        let workers = self
            .workers
            .unwrap_or_else(|| WorkerPool::shared(self.loader.clone()));
        let executor = Arc::new(
            Executor::new(registry.clone(), self.loader, Role::Client)
                .with_workers(workers)
                .with_remote(Arc::new(RemoteExecutor::new(self.remote))),
        );

        let sink = Arc::new(Sink::new(doc));
        let inflight = Arc::new(InflightTracker::new());
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        let writer = SignalDelegate::spawn(executor.clone(), update_tx, inflight.clone());
        spawn_update_pipeline(
            SuspenseTransform::new(executor.clone(), sink.clone()),
            SinkTransform::new(executor.clone(), sink.clone()),
            update_rx,
            inflight.clone(),
        );
        let dispatcher = EventDispatcher::new(sink.clone(), writer.clone());

        let client = ClientWeaver {
            scope: SignalScope::client(),
            registry,
            executor,
            sink,
            writer,
            dispatcher,
            inflight,
        };
        client.seed_initial_commands();
        Ok(client)
    }
}

impl ClientWeaver {
    /// Hydrate rendered HTML with default options.
    pub fn hydrate(html: &str, loader: Arc<dyn ModuleLoader>) -> Result<Self> {
        Self::builder(loader).hydrate(html)
    }

    /// Start building a client.
    pub fn builder(loader: Arc<dyn ModuleLoader>) -> ClientWeaverBuilder {
        ClientWeaverBuilder {
            loader,
            remote: RemoteOptions::default(),
            workers: None,
        }
    }

    /// Issue the initial command set: every reducer drains, and every
    /// computed that is client-context or enrolled in a suspense boundary's
    /// pending deps re-executes.
    fn seed_initial_commands(&self) {
        let defs = self.registry.get_all_signals();
        let pending_in_suspense: Vec<SignalId> = defs
            .iter()
            .filter_map(|def| match def {
                SignalDef::Suspense { pending_deps, .. } => Some(pending_deps.clone()),
                _ => None,
            })
            .flatten()
            .collect();

        for def in &defs {
            match def {
                SignalDef::Reducer { id, .. } => self.writer.execute_reducer(id.clone()),
                SignalDef::Computed { id, logic, .. } => {
                    let client_context = matches!(
                        self.registry.get_signal(logic),
                        Some(SignalDef::Logic {
                            context: Some(LogicContext::Client),
                            ..
                        })
                    );
                    if client_context || pending_in_suspense.contains(id) {
                        self.writer.execute_signal(id.clone());
                    }
                }
                _ => {}
            }
        }
    }

    /// The client-prefixed source-id scope.
    pub fn scope(&self) -> &SignalScope {
        &self.scope
    }

    /// The hydrated registry.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// The client executor.
    pub fn executor(&self) -> &Arc<Executor> {
        &self.executor
    }

    /// The document sink.
    pub fn sink(&self) -> &Arc<Sink> {
        &self.sink
    }

    /// The command writer into the delegate.
    pub fn writer(&self) -> &DelegateWriter {
        &self.writer
    }

    /// Write a state value and propagate (`signal-update`).
    pub fn update_signal(&self, id: &SignalId, value: impl Into<Value>) {
        self.writer.signal_update(id.clone(), value.into());
    }

    /// Dispatch an event that fired on `target`.
    pub fn dispatch_event(&self, event: &str, target: NodeId, payload: serde_json::Value) -> bool {
        self.dispatcher.dispatch(event, target, payload)
    }

    /// Dispatch a click on `target`.
    pub fn click(&self, target: NodeId) -> bool {
        self.dispatcher.click(target)
    }

    /// Find an element by attribute (test and driver convenience).
    pub fn find_by_attr(&self, name: &str, value: &str) -> Option<NodeId> {
        self.sink.with_document(|doc| doc.find_by_attr(name, value))
    }

    /// Text currently inside the first content bind point for `id`.
    pub fn text_of(&self, id: &SignalId) -> Option<String> {
        self.sink.text_of(id)
    }

    /// Serialize the live document.
    pub fn html(&self) -> String {
        self.sink.html()
    }

    /// Wait until the reactor is quiescent: no queued commands, no
    /// in-flight deferrals, no undelivered updates.
    pub async fn settle(&self) {
        self.inflight.settle().await;
    }
}

/// Extract every `weaver.push(…)` message from the document's inline
/// scripts, in document order. Non-queue scripts are ignored.
fn drain_bootstrap_queue(doc: &Document) -> Vec<DefinitionMessage> {
    let mut messages = Vec::new();
    for node in doc.document_order() {
        let NodeKind::Element { tag, .. } = doc.kind(node) else {
            continue;
        };
        if tag != "script" {
            continue;
        }
        let source = doc.text_content(node);
        let source = source.trim();
        let Some(body) = source
            .strip_prefix("weaver.push(")
            .and_then(|rest| rest.strip_suffix(")"))
        else {
            continue;
        };
        match serde_json::from_str::<DefinitionMessage>(body) {
            Ok(message) if message.kind == "signal-definition" => messages.push(message),
            Ok(message) => {
                tracing::debug!(kind = %message.kind, "ignoring unknown queue message")
            }
            Err(error) => tracing::warn!(%error, "malformed queue message"),
        }
    }
    messages
}
