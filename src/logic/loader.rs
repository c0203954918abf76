//! Module loading and the logic calling convention.
//!
//! A logic module is, on the wire, a path string. At runtime it is a
//! [`LogicFn`]: an async function over marshalled arguments. Hosts register
//! functions against paths in a [`ModuleRegistry`] (the analogue of dynamic
//! import) or supply their own [`ModuleLoader`], the SSR loader hook, when
//! modules live behind a bundler.

use crate::signal::{Registry, SignalDef, SignalId, Value};
use crate::{Error, Result};
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, RwLock};

/// The future a logic function returns.
pub type LogicFuture = BoxFuture<'static, Result<Value>>;

/// An executable module's default export.
pub type LogicFn = Arc<dyn Fn(Vec<Arg>) -> LogicFuture + Send + Sync>;

/// Shared log of mutator writes performed during one execution; the caller
/// drains it to feed propagation.
pub type WriteLog = Arc<Mutex<Vec<(SignalId, Value)>>>;

/// A marshalled logic argument.
///
/// Dependencies resolve to raw values by default; `mutator` deps of actions
/// and handlers become write-capable cells; `reference` deps forward the
/// referenced definition itself.
#[derive(Clone, Debug)]
pub enum Arg {
    /// Raw dependency value (or the prepended handler event).
    Value(Value),
    /// Write access to a state signal.
    Cell(MutatorCell),
    /// A forwarded signal definition.
    Signal(SignalDef),
}

impl Arg {
    /// Borrow the raw value, if this argument is one.
    pub fn value(&self) -> Option<&Value> {
        match self {
            Arg::Value(value) => Some(value),
            _ => None,
        }
    }

    /// Borrow the mutator cell, if this argument is one.
    pub fn cell(&self) -> Option<&MutatorCell> {
        match self {
            Arg::Cell(cell) => Some(cell),
            _ => None,
        }
    }

    /// Borrow the forwarded definition, if this argument is one.
    pub fn signal(&self) -> Option<&SignalDef> {
        match self {
            Arg::Signal(def) => Some(def),
            _ => None,
        }
    }

    /// Convenience accessor for integer arguments.
    pub fn as_i64(&self) -> Option<i64> {
        self.value().and_then(Value::as_i64)
    }

    /// Convenience accessor for string arguments.
    pub fn as_str(&self) -> Option<&str> {
        self.value().and_then(Value::as_str)
    }

    /// Convenience accessor for JSON arguments.
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        self.value().and_then(Value::as_json)
    }
}

/// Write access to one state signal, handed to action/handler logic in place
/// of the raw value of a `mutator` dependency.
#[derive(Clone)]
pub struct MutatorCell {
    registry: Arc<Registry>,
    target: SignalId,
    log: WriteLog,
}

impl MutatorCell {
    pub(crate) fn new(registry: Arc<Registry>, target: SignalId, log: WriteLog) -> Self {
        Self {
            registry,
            target,
            log,
        }
    }

    /// The state signal this cell writes.
    pub fn target(&self) -> &SignalId {
        &self.target
    }

    /// Current value of the target.
    pub fn get(&self) -> Value {
        self.registry
            .get_value(&self.target)
            .unwrap_or(Value::Json(serde_json::Value::Null))
    }

    /// Write the target and record the write for propagation.
    pub fn set(&self, value: impl Into<Value>) {
        let value = value.into();
        self.registry.set_value(&self.target, value.clone());
        if let Ok(mut log) = self.log.lock() {
            log.push((self.target.clone(), value));
        }
    }
}

impl std::fmt::Debug for MutatorCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MutatorCell({})", self.target)
    }
}

/// Wrap an async closure as a [`LogicFn`].
pub fn logic_fn<F, Fut>(f: F) -> LogicFn
where
    F: Fn(Vec<Arg>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    Arc::new(move |args| f(args).boxed())
}

/// Resolves module paths to logic functions.
#[async_trait]
pub trait ModuleLoader: Send + Sync {
    /// Load the module's default export. Rejections surface as
    /// [`Error::ModuleLoadFailure`].
    async fn load(&self, src: &str) -> Result<LogicFn>;
}

/// In-memory module table with an optional path-rewrite hook, standing in
/// for the runtime's dynamic-import facility.
#[derive(Default)]
pub struct ModuleRegistry {
    modules: RwLock<HashMap<String, LogicFn>>,
    rewrite: Option<Box<dyn Fn(&str) -> String + Send + Sync>>,
}

impl ModuleRegistry {
    /// An empty module table.
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty table whose lookups first rewrite the path (used on the
    /// client, where absolute filesystem paths need remapping).
    pub fn with_rewrite(rewrite: impl Fn(&str) -> String + Send + Sync + 'static) -> Self {
        Self {
            modules: RwLock::new(HashMap::new()),
            rewrite: Some(Box::new(rewrite)),
        }
    }

    /// Register a module's default export under a path.
    pub fn register(&self, src: impl Into<String>, f: LogicFn) {
        let mut modules = self
            .modules
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        modules.insert(src.into(), f);
    }

    /// Register an async closure under a path.
    pub fn register_fn<F, Fut>(&self, src: impl Into<String>, f: F)
    where
        F: Fn(Vec<Arg>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.register(src, logic_fn(f));
    }
}

#[async_trait]
impl ModuleLoader for ModuleRegistry {
    async fn load(&self, src: &str) -> Result<LogicFn> {
        let path = match &self.rewrite {
            Some(rewrite) => rewrite(src),
            None => src.to_owned(),
        };
        let modules = self
            .modules
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        modules
            .get(&path)
            .cloned()
            .ok_or_else(|| Error::ModuleLoadFailure {
                src: src.to_owned(),
                reason: format!("no module registered at {path}"),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_registered_module_loads_and_runs() {
        let modules = ModuleRegistry::new();
        modules.register_fn("/logic/double.ts", |args| async move {
            Ok(Value::from(args[0].as_i64().unwrap_or(0) * 2))
        });

        let f = modules.load("/logic/double.ts").await.unwrap();
        let out = f(vec![Arg::Value(Value::from(21))]).await.unwrap();
        assert_eq!(out, Value::from(42));
    }

    #[tokio::test]
    async fn test_missing_module_is_a_load_failure() {
        let modules = ModuleRegistry::new();
        let err = match modules.load("/logic/absent.ts").await {
            Ok(_) => panic!("expected an error"),
            Err(e) => e,
        };
        assert!(matches!(err, Error::ModuleLoadFailure { .. }));
    }

    #[tokio::test]
    async fn test_rewrite_hook_remaps_paths() {
        let modules = ModuleRegistry::with_rewrite(|src| {
            src.strip_prefix("/srv/app").unwrap_or(src).to_owned()
        });
        modules.register_fn("/logic/noop.ts", |_| async { Ok(Value::from(1)) });

        assert!(modules.load("/srv/app/logic/noop.ts").await.is_ok());
    }
}
