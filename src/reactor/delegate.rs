//! The signal delegate: the reactor's command loop.
//!
//! The writable side accepts three command kinds; the readable side emits
//! `signal-update` tokens downstream. Commands are processed strictly in
//! order by one task, which is what makes propagation deterministic: for a
//! fixed input event, updates come out in topological order over the
//! dependency graph.

use crate::logic::{Arg, Deferred, Executor};
use crate::signal::{Registry, Role, SignalDef, SignalId, Value};
use crate::{Error, Result};
use futures::StreamExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Notify;

/// One command into the delegate.
#[derive(Debug)]
pub enum Command {
    /// Execute a signal (node, computed, handler, action). Handlers receive
    /// the triggering event.
    ExecuteSignal {
        /// Target signal.
        id: SignalId,
        /// Event payload for handlers.
        event: Option<serde_json::Value>,
    },
    /// Drain a reducer's source iterable.
    ExecuteReducer {
        /// Target reducer.
        id: SignalId,
    },
    /// Write a value and propagate to dependents.
    SignalUpdate {
        /// Updated signal.
        id: SignalId,
        /// New value.
        value: Value,
    },
}

/// One downstream token: a signal's new value.
#[derive(Debug)]
pub struct Update {
    /// Updated signal.
    pub id: SignalId,
    /// New value.
    pub value: Value,
}

/// Counts queued commands, in-flight deferrals, and undelivered updates, so
/// drivers can await quiescence.
#[derive(Default)]
pub struct InflightTracker {
    count: AtomicUsize,
    notify: Notify,
}

impl InflightTracker {
    /// A tracker at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one unit of pending work.
    pub fn begin(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    /// Retire one unit of pending work.
    pub fn end(&self) {
        if self.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.notify.notify_waiters();
        }
    }

    /// Wait until no work is queued or in flight.
    ///
    /// Work units hand off before retiring (a command emits its updates and
    /// spawns its deferrals before it ends), so the count only reaches zero
    /// at true quiescence.
    pub async fn settle(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Enroll for the wakeup before reading the count, or the last
            // `end` could slip between the load and the await.
            notified.as_mut().enable();
            if self.count.load(Ordering::SeqCst) == 0 {
                tokio::task::yield_now().await;
                if self.count.load(Ordering::SeqCst) == 0 {
                    return;
                }
                continue;
            }
            notified.await;
        }
    }
}

/// Cloneable writer into the delegate.
#[derive(Clone)]
pub struct DelegateWriter {
    tx: UnboundedSender<Command>,
    inflight: Arc<InflightTracker>,
}

impl DelegateWriter {
    /// Enqueue a command.
    pub fn send(&self, command: Command) {
        self.inflight.begin();
        if self.tx.send(command).is_err() {
            self.inflight.end();
            tracing::warn!("delegate loop is gone; dropping command");
        }
    }

    /// Enqueue `execute-signal`.
    pub fn execute_signal(&self, id: SignalId) {
        self.send(Command::ExecuteSignal { id, event: None });
    }

    /// Enqueue `execute-signal` with an event payload (handler dispatch).
    pub fn execute_signal_with_event(&self, id: SignalId, event: serde_json::Value) {
        self.send(Command::ExecuteSignal {
            id,
            event: Some(event),
        });
    }

    /// Enqueue `execute-reducer`.
    pub fn execute_reducer(&self, id: SignalId) {
        self.send(Command::ExecuteReducer { id });
    }

    /// Enqueue `signal-update`.
    pub fn signal_update(&self, id: SignalId, value: Value) {
        self.send(Command::SignalUpdate { id, value });
    }
}

/// The command loop. Construct with [`SignalDelegate::spawn`].
pub struct SignalDelegate {
    executor: Arc<Executor>,
    downstream: UnboundedSender<Update>,
    writer: DelegateWriter,
    inflight: Arc<InflightTracker>,
}

impl SignalDelegate {
    /// Spawn the loop task. Commands written through the returned writer are
    /// processed in order; updates flow into `downstream`.
    pub fn spawn(
        executor: Arc<Executor>,
        downstream: UnboundedSender<Update>,
        inflight: Arc<InflightTracker>,
    ) -> DelegateWriter {
        let (tx, rx) = mpsc::unbounded_channel();
        let writer = DelegateWriter {
            tx,
            inflight: inflight.clone(),
        };
        let delegate = SignalDelegate {
            executor,
            downstream,
            writer: writer.clone(),
            inflight,
        };
        tokio::spawn(delegate.run(rx));
        writer
    }

    async fn run(self, mut commands: UnboundedReceiver<Command>) {
        while let Some(command) = commands.recv().await {
            if let Err(error) = self.process(command).await {
                tracing::error!(%error, "command processing failed");
            }
            self.inflight.end();
        }
    }

    fn registry(&self) -> &Arc<Registry> {
        self.executor.registry()
    }

    /// Emit one update downstream. The pipeline consumer retires the unit.
    fn emit(&self, id: SignalId, value: Value) {
        self.inflight.begin();
        if self.downstream.send(Update { id, value }).is_err() {
            self.inflight.end();
        }
    }

    /// Pipe a deferral's eventual resolution back in as a `signal-update`
    /// through the root writer.
    fn pipe_deferred(&self, id: SignalId, deferred: Deferred) {
        let writer = self.writer.clone();
        let inflight = self.inflight.clone();
        inflight.begin();
        tokio::spawn(async move {
            match deferred.await {
                Ok(value) => writer.signal_update(id, value),
                Err(error) => tracing::error!(id = %id, %error, "deferred execution failed"),
            }
            inflight.end();
        });
    }

    async fn process(&self, command: Command) -> Result<()> {
        match command {
            Command::ExecuteSignal { id, event } => self.execute_signal(id, event).await,
            Command::SignalUpdate { id, value } => self.signal_update(id, value).await,
            Command::ExecuteReducer { id } => self.execute_reducer(id).await,
        }
    }

    async fn execute_signal(&self, id: SignalId, event: Option<serde_json::Value>) -> Result<()> {
        let def = self
            .registry()
            .get_signal(&id)
            .ok_or_else(|| Error::MissingDependency(id.clone()))?;

        match def {
            SignalDef::Node { .. } => {
                let tree = self.executor.execute_node(&id).await?;
                self.emit(id, Value::Tree(tree));
            }
            SignalDef::Computed { .. } => {
                let execution = self.executor.execute_computed(&id).await?;
                self.emit(id.clone(), execution.value);
                if let Some(deferred) = execution.deferred {
                    self.pipe_deferred(id, deferred);
                }
            }
            SignalDef::Handler { .. } => {
                let event = event.unwrap_or(serde_json::Value::Null);
                let result = self.executor.execute_handler(&id, event).await;
                self.finish_imperative(&id, result).await;
            }
            SignalDef::Action { .. } => {
                let result = self.executor.execute_action(&id).await;
                self.finish_imperative(&id, result).await;
            }
            _ => {
                tracing::debug!(id = %id, kind = def.kind(), "execute-signal is a no-op");
            }
        }
        Ok(())
    }

    /// Finish a handler or action run. Exceptions are logged and suppressed
    /// so event processing continues; completed mutator writes feed back as
    /// `signal-update` commands.
    async fn finish_imperative(
        &self,
        id: &SignalId,
        result: Result<crate::logic::HandlerOutcome>,
    ) {
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(error) => {
                tracing::error!(id = %id, %error, "handler failed");
                return;
            }
        };
        if let Some(deferred) = outcome.deferred {
            if let Err(error) = deferred.await {
                tracing::error!(id = %id, %error, "deferred handler failed");
                return;
            }
        }
        let writes = {
            let mut log = outcome
                .writes
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            std::mem::take(&mut *log)
        };
        for (target, value) in writes {
            self.writer.signal_update(target, value);
        }
    }

    async fn signal_update(&self, id: SignalId, value: Value) -> Result<()> {
        self.registry().set_value(&id, value.clone());
        self.emit(id.clone(), value);

        // Re-execute the transitive dependents, parents before children.
        // Handlers and actions never propagate; they are event-driven only.
        for dependent in self.registry().propagation_order(&id) {
            match self.registry().get_signal(&dependent) {
                Some(SignalDef::Computed { .. }) => {
                    match self.executor.recompute(&dependent).await {
                        Ok(execution) => {
                            self.emit(dependent.clone(), execution.value);
                            if let Some(deferred) = execution.deferred {
                                self.pipe_deferred(dependent, deferred);
                            }
                        }
                        // The old value is retained on failure.
                        Err(error) => {
                            tracing::warn!(id = %dependent, %error, "recompute failed")
                        }
                    }
                }
                Some(SignalDef::Node { .. }) => match self.executor.execute_node(&dependent).await
                {
                    Ok(tree) => self.emit(dependent, Value::Tree(tree)),
                    Err(error) => tracing::warn!(id = %dependent, %error, "node update failed"),
                },
                _ => {}
            }
        }
        Ok(())
    }

    /// Drain a reducer: materialize the source iterable (pre-executing a
    /// computed source if needed), then fold item by item, emitting each
    /// prefix accumulation in source order. Server-role reducers
    /// short-circuit to their init value.
    async fn execute_reducer(&self, id: SignalId) -> Result<()> {
        let def = self
            .registry()
            .get_signal(&id)
            .ok_or_else(|| Error::MissingDependency(id.clone()))?;
        let (source, reducer, init) = match &def {
            SignalDef::Reducer {
                source,
                reducer,
                init,
                ..
            } => (source.clone(), reducer.clone(), init.clone()),
            other => {
                return Err(Error::SignalKindMismatch {
                    id: id.clone(),
                    expected: "reducer",
                    actual: other.kind(),
                })
            }
        };

        if self.executor.role() == Role::Server {
            let value = Value::Json(init);
            self.registry().set_value(&id, value.clone());
            self.emit(id, value);
            return Ok(());
        }

        let source_value = self.materialize_source(&source).await?;
        let fold = self.executor.load_logic_fn(&reducer).await?;

        let mut acc = match self.registry().get_value(&id) {
            Some(value) if !value.is_pending() => value,
            _ => Value::Json(init),
        };
        self.registry().set_value(&id, acc.clone());

        match source_value {
            Value::Stream(stream) => {
                let Some(mut items) = stream.take().await else {
                    // Already drained by an earlier command.
                    return Ok(());
                };
                while let Some(item) = items.next().await {
                    acc = fold(vec![Arg::Value(acc), Arg::Value(item)]).await?;
                    self.registry().set_value(&id, acc.clone());
                    self.emit(id.clone(), acc.clone());
                }
            }
            Value::Json(serde_json::Value::Array(items)) => {
                for item in items {
                    acc = fold(vec![Arg::Value(acc), Arg::Value(Value::Json(item))]).await?;
                    self.registry().set_value(&id, acc.clone());
                    self.emit(id.clone(), acc.clone());
                }
            }
            other => {
                return Err(Error::Logic(format!(
                    "reducer source {source} is not iterable: {other:?}"
                )))
            }
        }
        Ok(())
    }

    async fn materialize_source(&self, source: &SignalId) -> Result<Value> {
        if let Some(value) = self.registry().get_value(source) {
            if !value.is_pending() {
                return Ok(value);
            }
        }
        if let Some(SignalDef::Computed { .. }) = self.registry().get_signal(source) {
            let execution = self.executor.execute_computed(source).await?;
            let value = match execution.deferred {
                Some(deferred) => {
                    let value = deferred.await?;
                    self.registry().set_value(source, value.clone());
                    value
                }
                None => execution.value,
            };
            return Ok(value);
        }
        self.registry()
            .get_value(source)
            .ok_or_else(|| Error::MissingDependency(source.clone()))
    }
}
