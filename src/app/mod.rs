//! Top-level orchestrators.
//!
//! [`ServerWeaver`] owns the server-side core: a scope, a registry, an
//! executor, and the render entry points, plus the transport-free side of
//! the remote-execution endpoint. [`ClientWeaver`] hydrates rendered HTML
//! into a live reactor: it drains the bootstrap queue, discovers bind
//! points, and starts the delegate and update pipeline.

mod client;
mod server;

pub use client::{ClientWeaver, ClientWeaverBuilder};
pub use server::{ServerWeaver, ServerWeaverBuilder};
