//! Remote execution: chain serialization and server-side rebuild.
//!
//! The HTTP hop itself belongs to the host; these suites exercise the wire
//! types and the transport-free handler the endpoint wraps.

mod common;

use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use weaver::logic::{serialize_chain, ExecuteRequest};
use weaver::prelude::*;
use weaver::signal::SignalScope;

#[tokio::test]
async fn test_server_logic_executes_through_rebuilt_registry() {
    let modules = common::modules();

    // Client side: a computed over server-context logic, with live state.
    let scope = SignalScope::client();
    let user_id = scope.state(1);
    let fetch = scope.server_logic("/logic/fetch_user_by_id.ts");
    let user = computed(&fetch, &[user_id.clone()]);

    let registry = Arc::new(Registry::new());
    registry.register_signal(&user);
    // The user changed the id after hydration; the live value rides the
    // chain, not the init.
    registry.set_value(user_id.id(), Value::from(2));

    let request = ExecuteRequest {
        target_id: user.id().clone(),
        signals: serialize_chain(&registry, user.id()).unwrap(),
    };

    // Server side: fresh registry, execute, answer.
    let server = ServerWeaver::new(modules);
    let response = server.handle_execute(request).await.unwrap();
    assert_eq!(response.value, json!({"id": 2, "name": "user-2"}));
}

#[tokio::test]
async fn test_request_wire_shape_round_trips() {
    let scope = SignalScope::client();
    let user_id = scope.state(7);
    let fetch = scope.server_logic("/logic/fetch_user_by_id.ts");
    let user = computed(&fetch, &[user_id.clone()]);

    let registry = Arc::new(Registry::new());
    registry.register_signal(&user);

    let request = ExecuteRequest {
        target_id: user.id().clone(),
        signals: serialize_chain(&registry, user.id()).unwrap(),
    };
    let encoded = serde_json::to_value(&request).unwrap();

    // camelCase targetId, entries carrying {signal, value?}.
    assert_eq!(encoded["targetId"], json!(user.id().as_str()));
    let signals = encoded["signals"].as_array().unwrap();
    assert_eq!(signals.len(), 3);
    let state_entry = signals
        .iter()
        .find(|entry| entry["signal"]["kind"] == "state")
        .unwrap();
    assert_eq!(state_entry["value"], json!(7));

    let decoded: ExecuteRequest = serde_json::from_value(encoded).unwrap();
    assert_eq!(decoded.target_id, *user.id());
    assert_eq!(decoded.signals.len(), 3);
}

#[tokio::test]
async fn test_missing_chain_entry_rejects() {
    let modules = common::modules();
    let scope = SignalScope::client();
    let user_id = scope.state(1);
    let fetch = scope.server_logic("/logic/fetch_user_by_id.ts");
    let user = computed(&fetch, &[user_id.clone()]);

    let registry = Arc::new(Registry::new());
    registry.register_signal(&user);
    let mut signals = serialize_chain(&registry, user.id()).unwrap();
    // Drop the logic entry: the rebuilt registry cannot resolve it.
    signals.retain(|entry| entry.signal.id() != fetch.id());

    let server = ServerWeaver::new(modules);
    let err = server
        .handle_execute(ExecuteRequest {
            target_id: user.id().clone(),
            signals,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, Error::MissingDependency(_)));
}
