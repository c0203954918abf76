//! Signal model and registry.
//!
//! A signal is the universal reactive unit: a declarative record with a
//! stable string id and a `kind` discriminator. Source signals carry
//! role-prefixed counter ids; derived signals carry content-addressable ids,
//! which makes duplicate construction idempotent and lets the server and
//! client independently arrive at the same id for the same derived meaning.
//!
//! | Piece | Description |
//! |-------|-------------|
//! | [`SignalDef`] | Tagged union over the eleven signal kinds (wire format) |
//! | [`Signal`] | A definition plus the carried definitions it references |
//! | [`SignalScope`] | Role-scoped allocator for source ids (`s0`, `c3`, …) |
//! | [`Registry`] | Per-orchestrator id → definition/value/dependents maps |
//! | [`Value`] | Runtime value domain, including the PENDING placeholder |

mod def;
mod factory;
mod id;
mod registry;
mod value;

pub use def::{DefinitionMessage, LogicContext, PropValue, SignalDef};
pub use factory::{
    action, computed, computed_with_init, handler, mutator, node, reference, reducer, suspense,
    NodeProp, Signal, SignalScope,
};
pub use id::{derived_id, fnv1a, IdAllocator, Role, SignalId};
pub use registry::Registry;
pub use value::{Value, ValueStream};
