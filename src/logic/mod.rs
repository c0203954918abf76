//! Logic execution.
//!
//! Logic signals reference executable modules by path. Loading goes through
//! a [`ModuleLoader`] (the host's SSR loader on the server, the runtime's
//! dynamic-import analogue on the client), and execution is gated by the
//! logic's declared context: client logic short-circuits on the server,
//! server logic is reached from the client via the remote executor, worker
//! logic is dispatched to the pool, and isomorphic logic runs locally.

mod executor;
mod loader;
mod remote;
mod worker;

pub use executor::{Deferred, Execution, Executor, HandlerOutcome};
pub use loader::{logic_fn, Arg, LogicFn, LogicFuture, ModuleLoader, ModuleRegistry, MutatorCell, WriteLog};
pub use remote::{
    register_chain, serialize_chain, ChainEntry, ExecuteRequest, ExecuteResponse, RemoteExecutor,
    RemoteOptions,
};
pub use worker::{WorkerOptions, WorkerPool};
