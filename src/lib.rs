//! # Weaver
//!
//! A signal-driven streaming HTML renderer with a reactive client runtime.
//!
//! Weaver serves server-rendered HTML as a byte stream, seeds the page with a
//! declarative description of reactive signals, and then drives in-place DOM
//! updates from user events, deferred asynchronous work, and external
//! iterables.
//!
//! ## Subsystems
//!
//! | Subsystem | Module | Description |
//! |-----------|--------|-------------|
//! | **Signal model** | [`signal`] | Content-addressable, serializable graph of reactive nodes |
//! | **Element tree** | [`tree`] | Inert declarative tree of elements, literals, and signals |
//! | **Logic execution** | [`logic`] | Module loading, context gating, timeouts, workers, RPC |
//! | **Streaming renderer** | [`render`] | Tree → token stream → chunked HTML, async subtrees in parallel |
//! | **Document & sink** | [`dom`] | Client document model, bind-point discovery, patching |
//! | **Client reactor** | [`reactor`] | Event-driven propagation, deferral completions, reducers |
//! | **Orchestrators** | [`app`] | [`app::ServerWeaver`] and [`app::ClientWeaver`] |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use weaver::prelude::*;
//!
//! let modules = Arc::new(ModuleRegistry::new());
//! modules.register_fn("/logic/double.ts", |args| async move {
//!     let x = args[0].as_i64().unwrap_or(0);
//!     Ok(Value::from(x * 2))
//! });
//!
//! let server = ServerWeaver::new(modules);
//! let count = server.scope().state(2);
//! let doubled = computed(&server.scope().logic("/logic/double.ts"), &[count.clone()]);
//!
//! let html = server
//!     .render_to_string(el("span").child(&doubled).into())
//!     .await?;
//! // <span><!--^a5…-->4<!--/a5…--></span><script>weaver.push(…)</script>…
//! ```
//!
//! On the client side, [`app::ClientWeaver::hydrate`] parses that HTML, drains
//! the serialized signal definitions, and starts the reactor; dispatched
//! events then patch the document in place through comment-delimited bind
//! points.
//!
//! ## Identity
//!
//! Source signals (`state`, `logic`, component templates) get counter ids
//! prefixed by process role (`s`/`c`). Derived signals hash their semantic
//! inputs with 32-bit FNV-1a, so building the same derivation twice, on
//! either side of the wire, yields the same id. See [`signal::derived_id`].

pub mod app;
pub mod dom;
pub mod logic;
pub mod reactor;
pub mod render;
pub mod signal;
pub mod tree;

use signal::SignalId;

/// Error type for Weaver operations.
///
/// One variant per failure category; execution errors surface as rejections
/// of the corresponding `execute_*` future.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An `execute_*` entry point was called on a signal of the wrong kind.
    #[error("signal kind mismatch for {id}: expected {expected}, got {actual}")]
    SignalKindMismatch {
        /// Offending signal id.
        id: SignalId,
        /// Kind the operation requires.
        expected: &'static str,
        /// Kind actually registered.
        actual: &'static str,
    },

    /// A referenced logic or dep signal is not in the registry.
    #[error("missing dependency: {0}")]
    MissingDependency(SignalId),

    /// Dynamic import or the host loader rejected.
    #[error("failed to load module {src}: {reason}")]
    ModuleLoadFailure {
        /// Module path as referenced by the logic signal.
        src: String,
        /// Loader-reported reason.
        reason: String,
    },

    /// User logic threw.
    #[error("logic exception: {0}")]
    Logic(String),

    /// A worker task errored or the worker died.
    #[error("worker failure: {0}")]
    Worker(String),

    /// Remote execution returned non-2xx or the transport failed.
    #[error("remote execution failed: {0}")]
    Remote(String),

    /// An inner stream of the render or reactor pipeline errored.
    #[error("stream pipeline error: {0}")]
    Stream(String),

    /// A value crossed the serialization boundary without being JSON-encodable.
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Generic error with preserved source.
    #[error("unexpected error: {0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for Weaver operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use weaver::prelude::*;
/// ```
pub mod prelude {
    pub use crate::app::{ClientWeaver, ServerWeaver};
    pub use crate::logic::{Arg, Executor, LogicFn, ModuleLoader, ModuleRegistry, WorkerPool};
    pub use crate::render::RenderOptions;
    pub use crate::signal::{
        action, computed, computed_with_init, handler, mutator, node, reference, reducer,
        suspense, NodeProp, Registry, Role, Signal, SignalDef, SignalId, SignalScope, Value,
    };
    pub use crate::tree::{el, fragment, raw, text, Element, TreeNode};
    pub use crate::{Error, Result};
}
