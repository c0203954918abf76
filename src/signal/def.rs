//! Signal definitions: the wire-format tagged union.
//!
//! Every signal algorithm in the crate dispatches on the `kind` discriminator
//! of [`SignalDef`]; there is no trait object hierarchy. The serde shape is
//! exactly what rides inside `<script>weaver.push(…)</script>` blocks and the
//! remote-execution chain, so field names follow the wire (`ref`,
//! `pendingDeps`, `_childrenHtml`).

use super::SignalId;
use crate::tree::TreeNode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Where a logic module is allowed to run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogicContext {
    /// Runs on the server; invoked from the client via the remote executor.
    Server,
    /// Runs on the client; the server substitutes the init fallback.
    Client,
    /// Dispatched to the worker pool.
    Worker,
}

/// A node prop in flat (wire) form: a literal, or a reference to a signal.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropValue {
    /// Signal-valued prop, contributing its id to the node digest.
    Signal {
        /// Referenced signal id.
        signal: SignalId,
    },
    /// Literal prop, contributing its JSON form to the node digest.
    Literal(serde_json::Value),
}

/// The tagged union of signal kinds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SignalDef {
    /// Mutable source cell; the seeded value survives SSR.
    State {
        /// Stable id.
        id: SignalId,
        /// Initial (JSON) value.
        init: serde_json::Value,
    },

    /// Reference to an executable module whose default export is the function.
    Logic {
        /// Stable id.
        id: SignalId,
        /// Module path.
        src: String,
        /// Deferral policy in milliseconds; `None` is inline, `0` is
        /// immediately deferred, positive races a timer.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout: Option<u64>,
        /// Execution context; `None` is isomorphic.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        context: Option<LogicContext>,
    },

    /// Derived value; re-executes when any dep changes.
    Computed {
        /// Content-addressed id.
        id: SignalId,
        /// Logic signal id.
        logic: SignalId,
        /// Declared dependency ids.
        deps: Vec<SignalId>,
        /// Fallback value returned while a deferral is in flight.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        init: Option<serde_json::Value>,
    },

    /// Imperative op with mutation access to its deps.
    Action {
        /// Content-addressed id.
        id: SignalId,
        /// Logic signal id.
        logic: SignalId,
        /// Declared dependency ids.
        deps: Vec<SignalId>,
    },

    /// Action with an initial event argument; referenced from event props.
    Handler {
        /// Content-addressed id.
        id: SignalId,
        /// Logic signal id.
        logic: SignalId,
        /// Declared dependency ids.
        deps: Vec<SignalId>,
    },

    /// Handle exposing write access to a state signal.
    Mutator {
        /// Content-addressed id.
        id: SignalId,
        /// Target state signal id.
        #[serde(rename = "ref")]
        target: SignalId,
    },

    /// Opaque forwarding of a signal definition without unwrapping.
    Reference {
        /// Content-addressed id.
        id: SignalId,
        /// Forwarded signal id.
        #[serde(rename = "ref")]
        target: SignalId,
    },

    /// Folds an (async) iterable value into a reactive accumulator.
    Reducer {
        /// Content-addressed id.
        id: SignalId,
        /// Source signal id whose value is the iterable.
        source: SignalId,
        /// Reducer logic signal id.
        reducer: SignalId,
        /// Initial accumulator.
        init: serde_json::Value,
    },

    /// Template that, when instantiated with props, yields a node.
    Component {
        /// Stable id.
        id: SignalId,
        /// Logic signal id producing the subtree.
        logic: SignalId,
    },

    /// A component bound to concrete prop values/signals.
    Node {
        /// Content-addressed id.
        id: SignalId,
        /// The component's logic signal id.
        logic: SignalId,
        /// The component template id.
        component: SignalId,
        /// Props in canonical (sorted-key) order.
        props: BTreeMap<String, PropValue>,
        /// Signal-valued prop ids; re-executes when any changes.
        deps: Vec<SignalId>,
    },

    /// Boundary showing fallback while any descendant signal is PENDING.
    Suspense {
        /// Content-addressed id.
        id: SignalId,
        /// Shown while anything underneath is pending.
        fallback: Box<TreeNode>,
        /// Shown once all pending deps resolve.
        children: Box<TreeNode>,
        /// Descendant signal ids currently pending.
        #[serde(rename = "pendingDeps", default, skip_serializing_if = "Vec::is_empty")]
        pending_deps: Vec<SignalId>,
        /// Server-precomputed children HTML for instant client swap.
        #[serde(rename = "_childrenHtml", default, skip_serializing_if = "Option::is_none")]
        children_html: Option<String>,
    },
}

impl SignalDef {
    /// The signal's stable id.
    pub fn id(&self) -> &SignalId {
        match self {
            SignalDef::State { id, .. }
            | SignalDef::Logic { id, .. }
            | SignalDef::Computed { id, .. }
            | SignalDef::Action { id, .. }
            | SignalDef::Handler { id, .. }
            | SignalDef::Mutator { id, .. }
            | SignalDef::Reference { id, .. }
            | SignalDef::Reducer { id, .. }
            | SignalDef::Component { id, .. }
            | SignalDef::Node { id, .. }
            | SignalDef::Suspense { id, .. } => id,
        }
    }

    /// The kind discriminator as it appears on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            SignalDef::State { .. } => "state",
            SignalDef::Logic { .. } => "logic",
            SignalDef::Computed { .. } => "computed",
            SignalDef::Action { .. } => "action",
            SignalDef::Handler { .. } => "handler",
            SignalDef::Mutator { .. } => "mutator",
            SignalDef::Reference { .. } => "reference",
            SignalDef::Reducer { .. } => "reducer",
            SignalDef::Component { .. } => "component",
            SignalDef::Node { .. } => "node",
            SignalDef::Suspense { .. } => "suspense",
        }
    }

    /// Declared dependencies, as reversed into the dependents index at
    /// registration time. Only `computed`/`action`/`handler`/`node` have any.
    pub fn dependencies(&self) -> &[SignalId] {
        match self {
            SignalDef::Computed { deps, .. }
            | SignalDef::Action { deps, .. }
            | SignalDef::Handler { deps, .. }
            | SignalDef::Node { deps, .. } => deps,
            _ => &[],
        }
    }

    /// Every id this definition refers to, dependencies included; used by the
    /// remote-execution chain walk.
    pub fn referenced_ids(&self) -> Vec<SignalId> {
        match self {
            SignalDef::State { .. } => Vec::new(),
            SignalDef::Logic { .. } => Vec::new(),
            SignalDef::Computed { logic, deps, .. } => {
                let mut ids = vec![logic.clone()];
                ids.extend(deps.iter().cloned());
                ids
            }
            SignalDef::Action { logic, deps, .. } | SignalDef::Handler { logic, deps, .. } => {
                let mut ids = vec![logic.clone()];
                ids.extend(deps.iter().cloned());
                ids
            }
            SignalDef::Mutator { target, .. } | SignalDef::Reference { target, .. } => {
                vec![target.clone()]
            }
            SignalDef::Reducer {
                source, reducer, ..
            } => vec![source.clone(), reducer.clone()],
            SignalDef::Component { logic, .. } => vec![logic.clone()],
            SignalDef::Node {
                logic,
                component,
                deps,
                ..
            } => {
                let mut ids = vec![logic.clone(), component.clone()];
                ids.extend(deps.iter().cloned());
                ids
            }
            SignalDef::Suspense { .. } => Vec::new(),
        }
    }
}

/// The message shape pushed onto the bootstrap queue by inline scripts.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DefinitionMessage {
    /// Always `"signal-definition"`.
    pub kind: String,
    /// The serialized definition.
    pub signal: SignalDef,
}

impl DefinitionMessage {
    /// Wrap a definition for the wire.
    pub fn new(signal: SignalDef) -> Self {
        Self {
            kind: "signal-definition".to_owned(),
            signal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_state_wire_shape() {
        let def = SignalDef::State {
            id: SignalId::from("s0"),
            init: json!(0),
        };
        assert_eq!(
            serde_json::to_value(&def).unwrap(),
            json!({"kind": "state", "id": "s0", "init": 0})
        );
    }

    #[test]
    fn test_mutator_uses_ref_field() {
        let def = SignalDef::Mutator {
            id: SignalId::from("ab12cd34"),
            target: SignalId::from("s0"),
        };
        assert_eq!(
            serde_json::to_value(&def).unwrap(),
            json!({"kind": "mutator", "id": "ab12cd34", "ref": "s0"})
        );
    }

    #[test]
    fn test_logic_omits_absent_options() {
        let def = SignalDef::Logic {
            id: SignalId::from("s1"),
            src: "/logic/double.ts".to_owned(),
            timeout: None,
            context: None,
        };
        assert_eq!(
            serde_json::to_value(&def).unwrap(),
            json!({"kind": "logic", "id": "s1", "src": "/logic/double.ts"})
        );
    }

    #[test]
    fn test_definition_round_trips() {
        let def = SignalDef::Computed {
            id: SignalId::from("12345678"),
            logic: SignalId::from("s1"),
            deps: vec![SignalId::from("s0")],
            init: Some(json!(null)),
        };
        let encoded = serde_json::to_string(&def).unwrap();
        let decoded: SignalDef = serde_json::from_str(&encoded).unwrap();
        assert_eq!(def, decoded);
    }
}
