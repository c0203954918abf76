//! Signal construction.
//!
//! Source signals come from a [`SignalScope`] (which owns the role-prefixed
//! counter); derived signals come from the free factories below, whose ids
//! are pure functions of their inputs. Every factory returns a [`Signal`]:
//! the flat definition plus the carried full definitions of everything it
//! references, so a signal embedded in a tree can be registered lazily,
//! dependencies included, when the tree is first traversed.

use super::def::{LogicContext, PropValue, SignalDef};
use super::id::{derived_id, fnv1a, IdAllocator, Role, SignalId};
use crate::tree::TreeNode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A signal definition together with the definitions it references.
///
/// The carried definitions never hit the wire (each referenced signal is
/// serialized separately); they exist so registration can walk the whole
/// chain from any embedding point.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Signal {
    #[serde(flatten)]
    def: SignalDef,
    #[serde(skip)]
    carried: Vec<Signal>,
}

impl Signal {
    /// Wrap a bare definition (wire side; nothing carried).
    pub fn from_def(def: SignalDef) -> Self {
        Self {
            def,
            carried: Vec::new(),
        }
    }

    fn with_carried(def: SignalDef, carried: Vec<Signal>) -> Self {
        Self { def, carried }
    }

    /// The flat definition.
    #[inline]
    pub fn def(&self) -> &SignalDef {
        &self.def
    }

    /// The signal's stable id.
    #[inline]
    pub fn id(&self) -> &SignalId {
        self.def.id()
    }

    /// The kind discriminator.
    #[inline]
    pub fn kind(&self) -> &'static str {
        self.def.kind()
    }

    /// Full definitions of directly referenced signals.
    pub fn carried(&self) -> &[Signal] {
        &self.carried
    }

    /// For a logic signal, set the deferral timeout in milliseconds.
    /// Timeouts do not participate in identity.
    pub fn with_timeout(mut self, ms: u64) -> Self {
        if let SignalDef::Logic { timeout, .. } = &mut self.def {
            *timeout = Some(ms);
        }
        self
    }
}

impl PartialEq for Signal {
    fn eq(&self, other: &Self) -> bool {
        self.def == other.def
    }
}

/// Role-scoped factory for source signals.
///
/// The counter is the signal model's only mutable construction state;
/// scoping it to a value lets tests run both roles in one process without
/// colliding ids.
#[derive(Debug)]
pub struct SignalScope {
    ids: IdAllocator,
}

impl SignalScope {
    /// A scope allocating server-prefixed ids.
    pub fn server() -> Self {
        Self::new(Role::Server)
    }

    /// A scope allocating client-prefixed ids.
    pub fn client() -> Self {
        Self::new(Role::Client)
    }

    /// A scope for an explicit role.
    pub fn new(role: Role) -> Self {
        Self {
            ids: IdAllocator::new(role),
        }
    }

    /// The role this scope stamps onto source ids.
    pub fn role(&self) -> Role {
        self.ids.role()
    }

    /// A mutable source cell seeded with a JSON value.
    pub fn state(&self, init: impl Into<serde_json::Value>) -> Signal {
        Signal::from_def(SignalDef::State {
            id: self.ids.next(),
            init: init.into(),
        })
    }

    /// An isomorphic logic module reference.
    pub fn logic(&self, src: impl Into<String>) -> Signal {
        self.logic_in(src, None)
    }

    /// Logic pinned to the server; called from the client via RPC.
    pub fn server_logic(&self, src: impl Into<String>) -> Signal {
        self.logic_in(src, Some(LogicContext::Server))
    }

    /// Logic pinned to the client; the server substitutes the init fallback.
    pub fn client_logic(&self, src: impl Into<String>) -> Signal {
        self.logic_in(src, Some(LogicContext::Client))
    }

    /// Logic dispatched to the worker pool.
    pub fn worker_logic(&self, src: impl Into<String>) -> Signal {
        self.logic_in(src, Some(LogicContext::Worker))
    }

    fn logic_in(&self, src: impl Into<String>, context: Option<LogicContext>) -> Signal {
        Signal::from_def(SignalDef::Logic {
            id: self.ids.next(),
            src: src.into(),
            timeout: None,
            context,
        })
    }

    /// A component template over a logic signal.
    pub fn component(&self, logic: &Signal) -> Signal {
        Signal::with_carried(
            SignalDef::Component {
                id: self.ids.next(),
                logic: logic.id().clone(),
            },
            vec![logic.clone()],
        )
    }
}

fn dep_ids(deps: &[Signal]) -> Vec<SignalId> {
    deps.iter().map(|d| d.id().clone()).collect()
}

fn carried_with_logic(logic: &Signal, deps: &[Signal]) -> Vec<Signal> {
    let mut carried = Vec::with_capacity(deps.len() + 1);
    carried.push(logic.clone());
    carried.extend(deps.iter().cloned());
    carried
}

/// A derived value that re-executes when any dep changes.
pub fn computed(logic: &Signal, deps: &[Signal]) -> Signal {
    let ids = dep_ids(deps);
    Signal::with_carried(
        SignalDef::Computed {
            id: derived_id("computed", logic.id(), ids.iter(), None),
            logic: logic.id().clone(),
            deps: ids,
            init: None,
        },
        carried_with_logic(logic, deps),
    )
}

/// A derived value with a fallback used while a deferral is in flight.
/// The init does not participate in identity.
pub fn computed_with_init(
    logic: &Signal,
    deps: &[Signal],
    init: impl Into<serde_json::Value>,
) -> Signal {
    let mut signal = computed(logic, deps);
    if let SignalDef::Computed { init: slot, .. } = &mut signal.def {
        *slot = Some(init.into());
    }
    signal
}

/// An imperative op with mutation access (via mutators) to its deps.
pub fn action(logic: &Signal, deps: &[Signal]) -> Signal {
    let ids = dep_ids(deps);
    Signal::with_carried(
        SignalDef::Action {
            id: derived_id("action", logic.id(), ids.iter(), None),
            logic: logic.id().clone(),
            deps: ids,
        },
        carried_with_logic(logic, deps),
    )
}

/// An action with an initial event argument, referenced from event props.
pub fn handler(logic: &Signal, deps: &[Signal]) -> Signal {
    let ids = dep_ids(deps);
    Signal::with_carried(
        SignalDef::Handler {
            id: derived_id("handler", logic.id(), ids.iter(), None),
            logic: logic.id().clone(),
            deps: ids,
        },
        carried_with_logic(logic, deps),
    )
}

/// A handle exposing write access to a state signal.
pub fn mutator(state: &Signal) -> Signal {
    Signal::with_carried(
        SignalDef::Mutator {
            id: derived_id("mutator", state.id(), [], None),
            target: state.id().clone(),
        },
        vec![state.clone()],
    )
}

/// Opaque forwarding of a signal definition without unwrapping.
pub fn reference(signal: &Signal) -> Signal {
    Signal::with_carried(
        SignalDef::Reference {
            id: derived_id("reference", signal.id(), [], None),
            target: signal.id().clone(),
        },
        vec![signal.clone()],
    )
}

/// Folds an (async) iterable source into a reactive accumulator.
pub fn reducer(
    source: &Signal,
    reducer_logic: &Signal,
    init: impl Into<serde_json::Value>,
) -> Signal {
    Signal::with_carried(
        SignalDef::Reducer {
            id: derived_id("reducer", source.id(), [reducer_logic.id()], None),
            source: source.id().clone(),
            reducer: reducer_logic.id().clone(),
            init: init.into(),
        },
        vec![source.clone(), reducer_logic.clone()],
    )
}

/// A prop handed to [`node`]: a literal, or a signal whose changes re-execute
/// the node.
#[derive(Clone, Debug)]
pub enum NodeProp {
    /// Signal-valued prop.
    Signal(Signal),
    /// Literal prop.
    Literal(serde_json::Value),
}

impl From<&Signal> for NodeProp {
    fn from(signal: &Signal) -> Self {
        NodeProp::Signal(signal.clone())
    }
}

impl From<Signal> for NodeProp {
    fn from(signal: Signal) -> Self {
        NodeProp::Signal(signal)
    }
}

impl From<serde_json::Value> for NodeProp {
    fn from(value: serde_json::Value) -> Self {
        NodeProp::Literal(value)
    }
}

impl From<&str> for NodeProp {
    fn from(value: &str) -> Self {
        NodeProp::Literal(value.into())
    }
}

impl From<i64> for NodeProp {
    fn from(value: i64) -> Self {
        NodeProp::Literal(value.into())
    }
}

/// Instantiate a component template with concrete props.
///
/// The id hashes the component's logic id, the signal-prop ids, and a
/// canonical props digest (sorted keys; signal props contribute their id,
/// literal props their compact JSON form), so two nodes built anywhere from
/// the same component and props coincide.
pub fn node(
    component: &Signal,
    props: impl IntoIterator<Item = (&'static str, NodeProp)>,
) -> Signal {
    let logic = match component.def() {
        SignalDef::Component { logic, .. } => logic.clone(),
        // A bare logic signal can stand in as its own template.
        _ => component.id().clone(),
    };

    let mut flat = BTreeMap::new();
    let mut carried = vec![component.clone()];
    for (name, prop) in props {
        match prop {
            NodeProp::Signal(signal) => {
                flat.insert(
                    name.to_owned(),
                    PropValue::Signal {
                        signal: signal.id().clone(),
                    },
                );
                carried.push(signal);
            }
            NodeProp::Literal(value) => {
                flat.insert(name.to_owned(), PropValue::Literal(value));
            }
        }
    }

    let deps: Vec<SignalId> = flat
        .values()
        .filter_map(|prop| match prop {
            PropValue::Signal { signal } => Some(signal.clone()),
            PropValue::Literal(_) => None,
        })
        .collect();

    let mut digest = String::new();
    for (name, prop) in &flat {
        digest.push_str(name);
        digest.push('=');
        match prop {
            PropValue::Signal { signal } => digest.push_str(signal.as_str()),
            PropValue::Literal(value) => digest.push_str(&value.to_string()),
        }
        digest.push(';');
    }

    Signal::with_carried(
        SignalDef::Node {
            id: derived_id("node", &logic, deps.iter(), Some(&digest)),
            logic,
            component: component.id().clone(),
            props: flat,
            deps,
        },
        carried,
    )
}

/// A boundary that shows `fallback` while any descendant signal is PENDING.
///
/// Identity is a structural digest of both subtrees, so the same boundary
/// written twice coincides like any other derived signal.
pub fn suspense(fallback: impl Into<TreeNode>, children: impl Into<TreeNode>) -> Signal {
    let fallback = fallback.into();
    let children = children.into();

    let mut digest = String::from("suspense|");
    fallback.digest_into(&mut digest);
    digest.push('|');
    children.digest_into(&mut digest);

    Signal::from_def(SignalDef::Suspense {
        id: SignalId::from(format!("{:08x}", fnv1a(&digest))),
        fallback: Box::new(fallback),
        children: Box::new(children),
        pending_deps: Vec::new(),
        children_html: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn scope() -> SignalScope {
        SignalScope::server()
    }

    #[test]
    fn test_duplicate_construction_is_idempotent() {
        let scope = scope();
        let count = scope.state(0);
        let double = scope.logic("/logic/double.ts");

        let a = computed(&double, &[count.clone()]);
        let b = computed(&double, &[count.clone()]);
        assert_eq!(a.id(), b.id());
        assert_eq!(a, b);
    }

    #[test]
    fn test_node_id_canonicalizes_props() {
        let scope = scope();
        let logic = scope.logic("/components/card.ts");
        let template = scope.component(&logic);
        let name = scope.state("ada");

        let a = node(&template, [("title", NodeProp::from("hi")), ("who", NodeProp::from(&name))]);
        let b = node(&template, [("who", NodeProp::from(&name)), ("title", NodeProp::from("hi"))]);
        assert_eq!(a.id(), b.id());

        let c = node(&template, [("title", NodeProp::from("bye")), ("who", NodeProp::from(&name))]);
        assert_ne!(a.id(), c.id());
    }

    #[test]
    fn test_node_deps_are_signal_props() {
        let scope = scope();
        let template = scope.component(&scope.logic("/components/card.ts"));
        let who = scope.state("ada");

        let instance = node(&template, [("who", NodeProp::from(&who)), ("n", NodeProp::from(3))]);
        assert_eq!(instance.def().dependencies(), &[who.id().clone()]);
    }

    #[test]
    fn test_carried_definitions_cover_the_chain() {
        let scope = scope();
        let count = scope.state(0);
        let inc = scope.logic("/logic/inc.ts");
        let set_count = mutator(&count);
        let on_click = handler(&inc, &[set_count.clone()]);

        let carried: Vec<&str> = on_click.carried().iter().map(|s| s.kind()).collect();
        assert_eq!(carried, vec!["logic", "mutator"]);
        // The mutator in turn carries its state target.
        assert_eq!(on_click.carried()[1].carried()[0].id(), count.id());
    }

    #[test]
    fn test_timeout_does_not_change_identity() {
        let scope = scope();
        let fetch = scope.logic("/logic/fetch.ts");
        let deferred = fetch.clone().with_timeout(0);
        assert_eq!(fetch.id(), deferred.id());

        let a = computed(&fetch, &[]);
        let b = computed(&deferred, &[]);
        assert_eq!(a.id(), b.id());
    }

    #[test]
    fn test_suspense_identity_is_structural() {
        use crate::tree::{el, text};
        let a = suspense(text("loading"), el("div").child("done"));
        let b = suspense(text("loading"), el("div").child("done"));
        let c = suspense(text("loading"), el("div").child("other"));
        assert_eq!(a.id(), b.id());
        assert_ne!(a.id(), c.id());
    }
}
