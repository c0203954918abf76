//! Signal identity.
//!
//! Two id families share one string type. Source signals (`state`, `logic`,
//! component templates) get counter ids prefixed by process role so that
//! client-allocated ids never collide with server-allocated ones. Derived
//! signals hash their semantic inputs with 32-bit FNV-1a, rendered as eight
//! lowercase hex digits; the two alphabets cannot overlap.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Stable string identifier of a signal.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignalId(String);

impl SignalId {
    /// View the id as a string slice.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SignalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for SignalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SignalId({})", self.0)
    }
}

impl From<String> for SignalId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SignalId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Which side of the wire a process plays.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// Renders HTML, runs server-context logic, answers remote execution.
    Server,
    /// Hydrates HTML, drives the reactor, patches the document.
    Client,
}

impl Role {
    /// Source-id prefix for this role.
    pub fn prefix(self) -> char {
        match self {
            Role::Server => 's',
            Role::Client => 'c',
        }
    }
}

/// Counter allocator for source-signal ids.
///
/// One allocator per orchestrator; scoping the counter to a value keeps
/// tests that run both roles in one process from colliding.
#[derive(Debug)]
pub struct IdAllocator {
    role: Role,
    counter: AtomicU64,
}

impl IdAllocator {
    /// Create an allocator for the given role, starting at zero.
    pub fn new(role: Role) -> Self {
        Self {
            role,
            counter: AtomicU64::new(0),
        }
    }

    /// The role this allocator stamps onto ids.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Allocate the next source id (`s0`, `s1`, … or `c0`, `c1`, …).
    pub fn next(&self) -> SignalId {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        SignalId(format!("{}{}", self.role.prefix(), n))
    }
}

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// 32-bit FNV-1a over a string.
pub fn fnv1a(input: &str) -> u32 {
    let mut hash = FNV_OFFSET_BASIS;
    for byte in input.as_bytes() {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Derive a content-addressable id from a kind tag, a logic (or source) id,
/// dependency ids, and an optional extra digest (node props, suspense shape).
///
/// The result is a pure function of its inputs: calling a derived factory any
/// number of times with the same arguments yields exactly one id, on either
/// side of the wire.
pub fn derived_id<'a>(
    kind: &str,
    base: &SignalId,
    deps: impl IntoIterator<Item = &'a SignalId>,
    extra: Option<&str>,
) -> SignalId {
    let mut buf = String::with_capacity(32);
    buf.push_str(kind);
    buf.push('|');
    buf.push_str(base.as_str());
    for dep in deps {
        buf.push('|');
        buf.push_str(dep.as_str());
    }
    if let Some(extra) = extra {
        buf.push('|');
        buf.push_str(extra);
    }
    SignalId(format!("{:08x}", fnv1a(&buf)))
}
