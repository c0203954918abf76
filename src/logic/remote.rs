//! Remote execution of server-context logic from the client.
//!
//! The client serializes a chain: the target signal, its transitive
//! references, and values for `state` and already-computed JSON `computed`
//! leaves (which prune the walk). The chain is POSTed to the endpoint.
//! The server rebuilds a fresh registry from the chain, executes the target,
//! and returns its value.

use crate::signal::{Registry, Signal, SignalDef, SignalId, Value};
use crate::{Error, Result};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

/// Remote endpoint configuration.
#[derive(Clone, Debug)]
pub struct RemoteOptions {
    /// Execution endpoint. The default is the well-known path; hosts running
    /// the client against another origin supply an absolute URL.
    pub endpoint: String,
}

impl Default for RemoteOptions {
    fn default() -> Self {
        Self {
            endpoint: "/weaver/execute".to_owned(),
        }
    }
}

/// One signal of a serialized chain, with its value when it acts as a
/// pruning frontier.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChainEntry {
    /// The definition.
    pub signal: SignalDef,
    /// Present for `state` signals and pruned `computed` leaves.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
}

/// `POST /weaver/execute` request body.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteRequest {
    /// The signal to execute after the registry is rebuilt.
    pub target_id: SignalId,
    /// The serialized chain, target first.
    pub signals: Vec<ChainEntry>,
}

/// `POST /weaver/execute` response body.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecuteResponse {
    /// The target's computed value.
    pub value: serde_json::Value,
}

/// Serialize the chain rooted at `target`.
///
/// Pruning rule: a visited non-target `computed` whose value is
/// JSON-serializable contributes its definition and value but its
/// dependencies are not walked. The target itself is never pruned.
pub fn serialize_chain(registry: &Registry, target: &SignalId) -> Result<Vec<ChainEntry>> {
    let mut entries = Vec::new();
    let mut seen = HashSet::new();
    let mut frontier = VecDeque::from([target.clone()]);
    seen.insert(target.clone());

    while let Some(id) = frontier.pop_front() {
        let def = registry
            .get_signal(&id)
            .ok_or_else(|| Error::MissingDependency(id.clone()))?;

        let json_value = match registry.get_value(&id) {
            Some(Value::Json(value)) => Some(value),
            _ => None,
        };

        let (value, walk) = match &def {
            SignalDef::State { .. } => (json_value, false),
            SignalDef::Computed { .. } if id != *target => match json_value {
                Some(value) => (Some(value), false),
                None => (None, true),
            },
            _ => (None, true),
        };

        if walk {
            for referenced in def.referenced_ids() {
                if seen.insert(referenced.clone()) {
                    frontier.push_back(referenced);
                }
            }
        }
        entries.push(ChainEntry { signal: def, value });
    }

    tracing::debug!(target = %target, entries = entries.len(), "serialized execution chain");
    Ok(entries)
}

/// Rebuild a registry from a serialized chain: definitions first, then the
/// carried frontier values (which override any state init seeding).
pub fn register_chain(registry: &Registry, entries: &[ChainEntry]) {
    for entry in entries {
        registry.register_signal(&Signal::from_def(entry.signal.clone()));
    }
    for entry in entries {
        if let Some(value) = &entry.value {
            registry.set_value(entry.signal.id(), Value::Json(value.clone()));
        }
    }
}

/// HTTP client side of the execution endpoint.
pub struct RemoteExecutor {
    endpoint: String,
    client: reqwest::Client,
}

impl RemoteExecutor {
    /// A client for the configured endpoint.
    pub fn new(options: RemoteOptions) -> Self {
        Self {
            endpoint: options.endpoint,
            client: reqwest::Client::new(),
        }
    }

    /// Serialize the chain for `target`, POST it, and return the value.
    pub async fn execute(
        &self,
        registry: &Arc<Registry>,
        target: &SignalId,
    ) -> Result<serde_json::Value> {
        let request = ExecuteRequest {
            target_id: target.clone(),
            signals: serialize_chain(registry, target)?,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("posting execution chain to {}", self.endpoint))?;

        if !response.status().is_success() {
            return Err(Error::Remote(format!(
                "{} returned {}",
                self.endpoint,
                response.status()
            )));
        }

        let body: ExecuteResponse = response
            .json()
            .await
            .with_context(|| format!("decoding execution response from {}", self.endpoint))?;
        Ok(body.value)
    }
}
