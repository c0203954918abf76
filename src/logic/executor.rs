//! The logic executor: context gating, timeout/deferral, marshalling.

use super::loader::{Arg, LogicFn, LogicFuture, ModuleLoader, MutatorCell, WriteLog};
use super::remote::RemoteExecutor;
use super::worker::WorkerPool;
use crate::signal::{LogicContext, Registry, Role, SignalDef, SignalId, Value};
use crate::tree::TreeNode;
use crate::{Error, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// The eventual result of a deferred execution. The underlying logic always
/// runs to completion; this is a join, not a cancellation handle.
pub type Deferred = BoxFuture<'static, Result<Value>>;

/// Immediate result of one logic execution.
pub struct Execution {
    /// The value available now, possibly PENDING if deferred.
    pub value: Value,
    /// Present when the timeout policy deferred the real result.
    pub deferred: Option<Deferred>,
}

/// Result of an action/handler execution: no value, but possibly a deferral
/// and the mutator writes performed so far.
pub struct HandlerOutcome {
    /// Present when the handler's logic was deferred.
    pub deferred: Option<Deferred>,
    /// Writes performed through mutator cells, in order.
    pub writes: WriteLog,
}

/// Executes logic signals against a registry, honoring each logic's declared
/// context, timeout, and argument marshalling rules.
pub struct Executor {
    registry: Arc<Registry>,
    loader: Arc<dyn ModuleLoader>,
    role: Role,
    workers: Arc<WorkerPool>,
    remote: Option<Arc<RemoteExecutor>>,
}

impl Executor {
    /// An executor over the given registry and loader, using the
    /// process-shared worker pool.
    pub fn new(registry: Arc<Registry>, loader: Arc<dyn ModuleLoader>, role: Role) -> Self {
        let workers = WorkerPool::shared(loader.clone());
        Self {
            registry,
            loader,
            role,
            workers,
            remote: None,
        }
    }

    /// Replace the worker pool (tests scope a pool to themselves).
    pub fn with_workers(mut self, workers: Arc<WorkerPool>) -> Self {
        self.workers = workers;
        self
    }

    /// Attach a remote executor for server-context logic (client role).
    pub fn with_remote(mut self, remote: Arc<RemoteExecutor>) -> Self {
        self.remote = Some(remote);
        self
    }

    /// The registry this executor reads and writes.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// The module loader.
    pub fn loader(&self) -> &Arc<dyn ModuleLoader> {
        &self.loader
    }

    /// Which side of the wire this executor runs on.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Execute a logic signal with pre-marshalled arguments.
    ///
    /// Context gating: client logic on the server role returns the init
    /// fallback (or PENDING) without loading the module; worker logic goes
    /// to the pool; isomorphic and same-role logic runs locally. Server
    /// logic on the client role is reached through [`Executor::recompute`]
    /// on its computed target, which carries the id the remote chain needs.
    pub async fn execute_logic(
        &self,
        logic: &SignalDef,
        args: Vec<Arg>,
        init_fallback: Option<Value>,
    ) -> Result<Execution> {
        let (src, timeout, context) = match logic {
            SignalDef::Logic {
                src,
                timeout,
                context,
                ..
            } => (src, *timeout, *context),
            other => return Err(kind_mismatch(other.id(), "logic", other)),
        };

        match (context, self.role) {
            (Some(LogicContext::Client), Role::Server) => {
                return Ok(Execution {
                    value: init_fallback.unwrap_or(Value::Pending),
                    deferred: None,
                });
            }
            (Some(LogicContext::Server), Role::Client) => {
                return Err(Error::Remote(format!(
                    "server-context module {src} must be reached through a computed target"
                )));
            }
            _ => {}
        }

        let future: LogicFuture = if context == Some(LogicContext::Worker) {
            let payload = worker_args(args)?;
            let workers = self.workers.clone();
            let src = src.clone();
            async move { workers.execute(&src, payload).await.map(Value::Json) }.boxed()
        } else {
            let f = self.loader.load(src).await?;
            f(args)
        };

        run_with_timeout(future, timeout, init_fallback).await
    }

    /// Execute a computed signal, reusing a concrete cached value.
    pub async fn execute_computed(&self, id: &SignalId) -> Result<Execution> {
        if let Some(value) = self.registry.get_value(id) {
            if !value.is_pending() {
                return Ok(Execution {
                    value,
                    deferred: None,
                });
            }
        }
        self.recompute(id).await
    }

    /// Execute a computed signal unconditionally. This is the propagation
    /// path: a dep changed, so the cache must not short-circuit.
    pub async fn recompute(&self, id: &SignalId) -> Result<Execution> {
        let def = self.signal(id)?;
        let (logic_id, deps, init) = match &def {
            SignalDef::Computed {
                logic, deps, init, ..
            } => (logic.clone(), deps.clone(), init.clone()),
            other => return Err(kind_mismatch(id, "computed", other)),
        };
        let logic = self.signal(&logic_id)?;

        if self.role == Role::Client {
            if let SignalDef::Logic {
                context: Some(LogicContext::Server),
                ..
            } = &logic
            {
                let remote = self
                    .remote
                    .as_ref()
                    .ok_or_else(|| Error::Remote("no remote executor configured".to_owned()))?;
                let value = Value::Json(remote.execute(&self.registry, id).await?);
                self.registry.set_value(id, value.clone());
                return Ok(Execution {
                    value,
                    deferred: None,
                });
            }
        }

        let log = WriteLog::default();
        let args = self.marshal_deps(&deps, &log)?;
        let execution = self
            .execute_logic(&logic, args, init.map(Value::Json))
            .await?;
        self.registry.set_value(id, execution.value.clone());
        Ok(execution)
    }

    /// Execute an action: mutation-capable deps, no event.
    pub async fn execute_action(&self, id: &SignalId) -> Result<HandlerOutcome> {
        let def = self.signal(id)?;
        let (logic_id, deps) = match &def {
            SignalDef::Action { logic, deps, .. } => (logic.clone(), deps.clone()),
            other => return Err(kind_mismatch(id, "action", other)),
        };
        self.run_imperative(&logic_id, &deps, None).await
    }

    /// Execute a handler with its triggering event prepended.
    pub async fn execute_handler(
        &self,
        id: &SignalId,
        event: serde_json::Value,
    ) -> Result<HandlerOutcome> {
        let def = self.signal(id)?;
        let (logic_id, deps) = match &def {
            SignalDef::Handler { logic, deps, .. } => (logic.clone(), deps.clone()),
            other => return Err(kind_mismatch(id, "handler", other)),
        };
        self.run_imperative(&logic_id, &deps, Some(event)).await
    }

    async fn run_imperative(
        &self,
        logic_id: &SignalId,
        deps: &[SignalId],
        event: Option<serde_json::Value>,
    ) -> Result<HandlerOutcome> {
        let logic = self.signal(logic_id)?;
        let log = WriteLog::default();
        let mut args = Vec::with_capacity(deps.len() + 1);
        if let Some(event) = event {
            args.push(Arg::Value(Value::Json(event)));
        }
        args.extend(self.marshal_deps(deps, &log)?);

        let execution = self.execute_logic(&logic, args, None).await?;
        Ok(HandlerOutcome {
            deferred: execution.deferred,
            writes: log,
        })
    }

    /// Instantiate a node: run its component logic over the marshalled props
    /// (canonical key order) and return the produced subtree.
    pub async fn execute_node(&self, id: &SignalId) -> Result<TreeNode> {
        let def = self.signal(id)?;
        let (logic_id, props) = match &def {
            SignalDef::Node { logic, props, .. } => (logic.clone(), props.clone()),
            other => return Err(kind_mismatch(id, "node", other)),
        };
        let logic = self.signal(&logic_id)?;

        let log = WriteLog::default();
        let mut args = Vec::with_capacity(props.len());
        for prop in props.values() {
            match prop {
                crate::signal::PropValue::Literal(value) => {
                    args.push(Arg::Value(Value::Json(value.clone())));
                }
                crate::signal::PropValue::Signal { signal } => {
                    let mut marshalled = self.marshal_deps(std::slice::from_ref(signal), &log)?;
                    args.push(marshalled.remove(0));
                }
            }
        }

        let execution = self.execute_logic(&logic, args, None).await?;
        let value = match execution.deferred {
            Some(deferred) => deferred.await?,
            None => execution.value,
        };
        let tree = match value {
            Value::Tree(tree) => tree,
            Value::Json(serde_json::Value::String(text)) => TreeNode::Text(text),
            other => {
                return Err(Error::Logic(format!(
                    "component logic for {id} returned a non-tree value: {other:?}"
                )))
            }
        };
        self.registry.set_value(id, Value::Tree(tree.clone()));
        Ok(tree)
    }

    /// Load the function behind a logic signal (reducer folding).
    pub async fn load_logic_fn(&self, logic_id: &SignalId) -> Result<LogicFn> {
        let def = self.signal(logic_id)?;
        match &def {
            SignalDef::Logic { src, .. } => self.loader.load(src).await,
            other => Err(kind_mismatch(logic_id, "logic", other)),
        }
    }

    /// Execute, in parallel, every computed whose logic context is
    /// non-client and whose value is absent, so their values appear in the
    /// initial HTML. Individual failures retain the absent value and are
    /// logged; the render proceeds.
    pub async fn pre_execute_server_logic(&self) {
        let jobs: Vec<SignalId> = self
            .registry
            .get_all_signals()
            .into_iter()
            .filter_map(|def| match &def {
                SignalDef::Computed { id, logic, .. } => {
                    if self.registry.get_value(id).is_some() {
                        return None;
                    }
                    match self.registry.get_signal(logic) {
                        Some(SignalDef::Logic {
                            context: Some(LogicContext::Client),
                            ..
                        }) => None,
                        Some(_) => Some(id.clone()),
                        None => None,
                    }
                }
                _ => None,
            })
            .collect();

        let results =
            futures::future::join_all(jobs.iter().map(|id| self.execute_computed(id))).await;
        for (id, result) in jobs.iter().zip(results) {
            if let Err(error) = result {
                tracing::warn!(id = %id, %error, "server pre-execution failed");
            }
        }
    }

    fn signal(&self, id: &SignalId) -> Result<SignalDef> {
        self.registry
            .get_signal(id)
            .ok_or_else(|| Error::MissingDependency(id.clone()))
    }

    /// Resolve declared dependencies to arguments: raw values by default,
    /// write-capable cells for mutators, the forwarded definition for
    /// references.
    fn marshal_deps(&self, deps: &[SignalId], log: &WriteLog) -> Result<Vec<Arg>> {
        deps.iter()
            .map(|dep_id| {
                let def = self.signal(dep_id)?;
                Ok(match def {
                    SignalDef::Mutator { target, .. } => Arg::Cell(MutatorCell::new(
                        self.registry.clone(),
                        target,
                        log.clone(),
                    )),
                    SignalDef::Reference { target, .. } => Arg::Signal(self.signal(&target)?),
                    _ => Arg::Value(self.registry.get_value(dep_id).unwrap_or(Value::Pending)),
                })
            })
            .collect()
    }
}

fn kind_mismatch(id: &SignalId, expected: &'static str, def: &SignalDef) -> Error {
    Error::SignalKindMismatch {
        id: id.clone(),
        expected,
        actual: def.kind(),
    }
}

fn worker_args(args: Vec<Arg>) -> Result<Vec<serde_json::Value>> {
    args.into_iter()
        .map(|arg| match arg {
            Arg::Value(Value::Json(value)) => Ok(value),
            other => Err(Error::Worker(format!(
                "worker logic arguments must be JSON, got {other:?}"
            ))),
        })
        .collect()
}

fn join_deferred(handle: JoinHandle<Result<Value>>) -> Deferred {
    async move {
        match handle.await {
            Ok(result) => result,
            Err(error) => Err(Error::Logic(format!("deferred logic task failed: {error}"))),
        }
    }
    .boxed()
}

/// Apply the deferral policy. No timeout runs inline; zero defers
/// immediately; positive races the execution against a timer. The race is
/// not a cancellation; the spawned logic runs to completion either way.
async fn run_with_timeout(
    future: LogicFuture,
    timeout: Option<u64>,
    init_fallback: Option<Value>,
) -> Result<Execution> {
    match timeout {
        None => Ok(Execution {
            value: future.await?,
            deferred: None,
        }),
        Some(0) => {
            let handle = tokio::spawn(future);
            Ok(Execution {
                value: init_fallback.unwrap_or(Value::Pending),
                deferred: Some(join_deferred(handle)),
            })
        }
        Some(ms) => {
            let mut handle = tokio::spawn(future);
            match tokio::time::timeout(Duration::from_millis(ms), &mut handle).await {
                Ok(Ok(result)) => Ok(Execution {
                    value: result?,
                    deferred: None,
                }),
                Ok(Err(error)) => Err(Error::Logic(format!("logic task failed: {error}"))),
                Err(_elapsed) => Ok(Execution {
                    value: Value::Pending,
                    deferred: Some(join_deferred(handle)),
                }),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::{ModuleRegistry, WorkerOptions};
    use crate::signal::{computed, computed_with_init, handler, mutator, SignalScope};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn harness() -> (Arc<Registry>, Arc<ModuleRegistry>, SignalScope) {
        (
            Arc::new(Registry::new()),
            Arc::new(ModuleRegistry::new()),
            SignalScope::server(),
        )
    }

    fn executor(registry: &Arc<Registry>, modules: &Arc<ModuleRegistry>, role: Role) -> Executor {
        let loader: Arc<dyn ModuleLoader> = modules.clone();
        let workers = Arc::new(WorkerPool::new(WorkerOptions::default(), loader.clone()));
        Executor::new(registry.clone(), loader, role).with_workers(workers)
    }

    #[tokio::test]
    async fn test_computed_executes_over_dep_values() {
        let (registry, modules, scope) = harness();
        modules.register_fn("/logic/double.ts", |args| async move {
            Ok(Value::from(args[0].as_i64().unwrap_or(0) * 2))
        });

        let count = scope.state(2);
        let doubled = computed(&scope.logic("/logic/double.ts"), &[count.clone()]);
        registry.register_signal(&doubled);

        let exec = executor(&registry, &modules, Role::Server);
        let result = exec.execute_computed(doubled.id()).await.unwrap();
        assert_eq!(result.value, Value::from(4));
        assert_eq!(registry.get_value(doubled.id()), Some(Value::from(4)));
    }

    #[tokio::test]
    async fn test_cached_value_short_circuits_but_recompute_does_not() {
        let (registry, modules, scope) = harness();
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let seen = calls.clone();
        modules.register_fn("/logic/count.ts", move |_| {
            let seen = seen.clone();
            async move {
                seen.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Ok(Value::from(1))
            }
        });

        let c = computed(&scope.logic("/logic/count.ts"), &[]);
        registry.register_signal(&c);

        let exec = executor(&registry, &modules, Role::Server);
        exec.execute_computed(c.id()).await.unwrap();
        exec.execute_computed(c.id()).await.unwrap();
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);

        exec.recompute(c.id()).await.unwrap();
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_client_logic_short_circuits_on_server() {
        let (registry, modules, scope) = harness();
        // Deliberately unregistered: the module must never load.
        let make = scope.client_logic("/logic/client_only.ts");
        let c = computed_with_init(&make, &[], json!("placeholder"));
        registry.register_signal(&c);

        let exec = executor(&registry, &modules, Role::Server);
        let result = exec.execute_computed(c.id()).await.unwrap();
        assert_eq!(result.value, Value::from("placeholder"));
        assert!(result.deferred.is_none());
    }

    #[tokio::test]
    async fn test_zero_timeout_defers_immediately() {
        let (registry, modules, scope) = harness();
        modules.register_fn("/logic/slow.ts", |_| async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(Value::from("done"))
        });

        let slow = scope.logic("/logic/slow.ts").with_timeout(0);
        let c = computed(&slow, &[]);
        registry.register_signal(&c);

        let exec = executor(&registry, &modules, Role::Server);
        let result = exec.execute_computed(c.id()).await.unwrap();
        assert!(result.value.is_pending());
        let deferred = result.deferred.expect("deferred channel");
        assert_eq!(deferred.await.unwrap(), Value::from("done"));
    }

    #[tokio::test]
    async fn test_positive_timeout_returns_fast_results_inline() {
        let (registry, modules, scope) = harness();
        modules.register_fn("/logic/fast.ts", |_| async { Ok(Value::from(7)) });

        let fast = scope.logic("/logic/fast.ts").with_timeout(1_000);
        let c = computed(&fast, &[]);
        registry.register_signal(&c);

        let exec = executor(&registry, &modules, Role::Server);
        let result = exec.execute_computed(c.id()).await.unwrap();
        assert_eq!(result.value, Value::from(7));
        assert!(result.deferred.is_none());
    }

    #[tokio::test]
    async fn test_handler_event_is_prepended_and_mutators_log_writes() {
        let (registry, modules, scope) = harness();
        modules.register_fn("/logic/inc.ts", |args| async move {
            let amount = args[0]
                .as_json()
                .and_then(|e| e.get("amount"))
                .and_then(serde_json::Value::as_i64)
                .unwrap_or(1);
            let cell = args[1].cell().expect("mutator cell");
            let current = cell.get().as_i64().unwrap_or(0);
            cell.set(current + amount);
            Ok(Value::Json(serde_json::Value::Null))
        });

        let count = scope.state(0);
        let on_click = handler(&scope.logic("/logic/inc.ts"), &[mutator(&count)]);
        registry.register_signal(&on_click);

        let exec = executor(&registry, &modules, Role::Server);
        let outcome = exec
            .execute_handler(on_click.id(), json!({"amount": 3}))
            .await
            .unwrap();

        assert_eq!(registry.get_value(count.id()), Some(Value::from(3)));
        let writes = outcome.writes.lock().unwrap();
        assert_eq!(writes.as_slice(), &[(count.id().clone(), Value::from(3))]);
    }

    #[tokio::test]
    async fn test_kind_mismatch_is_reported() {
        let (registry, modules, scope) = harness();
        let count = scope.state(0);
        registry.register_signal(&count);

        let exec = executor(&registry, &modules, Role::Server);
        let err = match exec.execute_computed(count.id()).await {
            Ok(_) => panic!("expected an error"),
            Err(e) => e,
        };
        assert!(matches!(err, Error::SignalKindMismatch { .. }));
    }

    #[tokio::test]
    async fn test_missing_dependency_is_reported() {
        let (registry, modules, _scope) = harness();
        let exec = executor(&registry, &modules, Role::Server);
        let err = match exec.execute_computed(&SignalId::from("deadbeef")).await {
            Ok(_) => panic!("expected an error"),
            Err(e) => e,
        };
        assert!(matches!(err, Error::MissingDependency(_)));
    }
}
