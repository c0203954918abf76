//! Per-orchestrator signal registry.
//!
//! Three maps keyed by signal id: definitions, values, and dependents.
//! Reverse dependency edges are inserted at registration time, not at
//! execution time, so propagation is a pure graph walk. `set_value` is a
//! blind write; reactive propagation is driven by the delegate.

use super::def::SignalDef;
use super::factory::Signal;
use super::id::SignalId;
use super::value::Value;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Default)]
struct Inner {
    signals: HashMap<SignalId, SignalDef>,
    values: HashMap<SignalId, Value>,
    dependents: HashMap<SignalId, BTreeSet<SignalId>>,
    /// Insertion order, for deterministic iteration and chain serialization.
    order: Vec<SignalId>,
}

/// The per-orchestrator signal registry. Shared as `Arc<Registry>`; mutated
/// only from the owning role's single delegate task.
#[derive(Default)]
pub struct Registry {
    inner: RwLock<Inner>,
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    // Lock poisoning means a panicked reader/writer elsewhere; recover with
    // the inner data rather than cascading the panic.
    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a signal and, recursively, every definition it carries.
    /// Idempotent by id: re-registering an existing id is a no-op.
    pub fn register_signal(&self, signal: &Signal) {
        self.register_if_absent(signal);
    }

    /// Register a signal if its id is absent; returns whether it was
    /// inserted. Carried definitions are walked either way, since a known
    /// signal may be re-embedded with previously unseen references.
    pub fn register_if_absent(&self, signal: &Signal) -> bool {
        let inserted = self.register_def(signal.def().clone());
        for carried in signal.carried() {
            self.register_if_absent(carried);
        }
        inserted
    }

    /// Register a bare definition (wire side). Idempotent by id.
    pub fn register_def(&self, def: SignalDef) -> bool {
        let mut inner = self.write();
        let id = def.id().clone();
        if inner.signals.contains_key(&id) {
            return false;
        }

        for dep in def.dependencies() {
            inner
                .dependents
                .entry(dep.clone())
                .or_default()
                .insert(id.clone());
        }
        if let SignalDef::State { init, .. } = &def {
            if !inner.values.contains_key(&id) {
                inner.values.insert(id.clone(), Value::Json(init.clone()));
            }
        }

        tracing::debug!(id = %id, kind = def.kind(), "registered signal");
        inner.order.push(id.clone());
        inner.signals.insert(id, def);
        true
    }

    /// Replace a stored definition in place (same id). Used by the renderer
    /// to persist SSR-computed suspense fields; not part of the public
    /// registration surface.
    pub(crate) fn replace_def(&self, def: SignalDef) {
        let mut inner = self.write();
        let id = def.id().clone();
        if !inner.signals.contains_key(&id) {
            inner.order.push(id.clone());
        }
        inner.signals.insert(id, def);
    }

    /// Look up a definition.
    pub fn get_signal(&self, id: &SignalId) -> Option<SignalDef> {
        self.read().signals.get(id).cloned()
    }

    /// Look up a value.
    pub fn get_value(&self, id: &SignalId) -> Option<Value> {
        self.read().values.get(id).cloned()
    }

    /// Blind value write.
    pub fn set_value(&self, id: &SignalId, value: Value) {
        self.write().values.insert(id.clone(), value);
    }

    /// Whether a definition is registered.
    pub fn contains(&self, id: &SignalId) -> bool {
        self.read().signals.contains_key(id)
    }

    /// Direct dependents of a signal, in id order.
    pub fn get_dependents(&self, id: &SignalId) -> Vec<SignalId> {
        self.read()
            .dependents
            .get(id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Declared dependencies of a signal.
    pub fn get_dependencies(&self, id: &SignalId) -> Vec<SignalId> {
        self.read()
            .signals
            .get(id)
            .map(|def| def.dependencies().to_vec())
            .unwrap_or_default()
    }

    /// Every registered definition, in insertion order.
    pub fn get_all_signals(&self) -> Vec<SignalDef> {
        let inner = self.read();
        inner
            .order
            .iter()
            .filter_map(|id| inner.signals.get(id).cloned())
            .collect()
    }

    /// Transitive dependents of `from`, in topological order (parents before
    /// transitive dependents), excluding `from` itself.
    pub fn propagation_order(&self, from: &SignalId) -> Vec<SignalId> {
        let inner = self.read();

        // Reachable set over dependent edges.
        let mut reachable = BTreeSet::new();
        let mut frontier = VecDeque::from([from.clone()]);
        while let Some(id) = frontier.pop_front() {
            if let Some(dependents) = inner.dependents.get(&id) {
                for dependent in dependents {
                    if reachable.insert(dependent.clone()) {
                        frontier.push_back(dependent.clone());
                    }
                }
            }
        }

        // Kahn's algorithm over the induced subgraph. The derived-id scheme
        // forces a DAG, so this always drains. BTreeMap keeps the order
        // deterministic across runs.
        let mut in_degree: std::collections::BTreeMap<SignalId, usize> = reachable
            .iter()
            .map(|id| {
                let degree = inner
                    .signals
                    .get(id)
                    .map(|def| {
                        def.dependencies()
                            .iter()
                            .filter(|dep| reachable.contains(*dep))
                            .count()
                    })
                    .unwrap_or(0);
                (id.clone(), degree)
            })
            .collect();

        let mut ready: VecDeque<SignalId> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(id, _)| id.clone())
            .collect();
        let mut ordered = Vec::with_capacity(reachable.len());
        while let Some(id) = ready.pop_front() {
            if let Some(dependents) = inner.dependents.get(&id) {
                for dependent in dependents {
                    if let Some(degree) = in_degree.get_mut(dependent) {
                        *degree -= 1;
                        if *degree == 0 {
                            ready.push_back(dependent.clone());
                        }
                    }
                }
            }
            ordered.push(id);
        }
        ordered
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.read();
        f.debug_struct("Registry")
            .field("signals", &inner.signals.len())
            .field("values", &inner.values.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::{computed, handler, mutator, SignalScope};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_set_then_get() {
        let registry = Registry::new();
        let scope = SignalScope::server();
        let count = scope.state(0);
        registry.register_signal(&count);

        registry.set_value(count.id(), Value::from(5));
        assert_eq!(registry.get_value(count.id()), Some(Value::from(5)));
    }

    #[test]
    fn test_state_seeds_value_at_registration() {
        let registry = Registry::new();
        let scope = SignalScope::server();
        let name = scope.state("ada");
        registry.register_signal(&name);
        assert_eq!(registry.get_value(name.id()), Some(Value::from("ada")));
    }

    #[test]
    fn test_registration_is_idempotent() {
        let registry = Registry::new();
        let scope = SignalScope::server();
        let count = scope.state(0);

        registry.register_signal(&count);
        registry.set_value(count.id(), Value::from(9));
        registry.register_signal(&count);

        // Re-registering must not reset the live value.
        assert_eq!(registry.get_value(count.id()), Some(Value::from(9)));
        assert_eq!(registry.get_all_signals().len(), 1);
    }

    #[test]
    fn test_dependents_invert_dependencies() {
        let registry = Registry::new();
        let scope = SignalScope::server();
        let count = scope.state(0);
        let double = scope.logic("/logic/double.ts");
        let doubled = computed(&double, &[count.clone()]);

        registry.register_signal(&doubled);

        for dependent in registry.get_dependents(count.id()) {
            assert!(registry.get_dependencies(&dependent).contains(count.id()));
        }
        assert_eq!(registry.get_dependents(count.id()), vec![doubled.id().clone()]);
    }

    #[test]
    fn test_carried_chain_registers() {
        let registry = Registry::new();
        let scope = SignalScope::server();
        let count = scope.state(3);
        let inc = scope.logic("/logic/inc.ts");
        let on_click = handler(&inc, &[mutator(&count)]);

        registry.register_signal(&on_click);

        assert!(registry.contains(on_click.id()));
        assert!(registry.contains(inc.id()));
        assert!(registry.contains(count.id()));
        assert_eq!(registry.get_value(count.id()), Some(Value::from(3)));
    }

    #[test]
    fn test_propagation_order_is_topological() {
        let registry = Registry::new();
        let scope = SignalScope::server();
        let base = scope.state(1);
        let double = scope.logic("/logic/double.ts");
        let add = scope.logic("/logic/add.ts");

        let a = computed(&double, &[base.clone()]);
        let b = computed(&add, &[base.clone(), a.clone()]);
        registry.register_signal(&a);
        registry.register_signal(&b);

        let order = registry.propagation_order(base.id());
        let pos = |id: &SignalId| order.iter().position(|x| x == id).unwrap();
        assert_eq!(order.len(), 2);
        assert!(pos(a.id()) < pos(b.id()));
    }
}
