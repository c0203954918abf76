//! Shared fixtures for the integration suites.
//!
//! One module registry stands in for the host's bundle: every logic path
//! the scenarios reference resolves here, on both roles.

#![allow(dead_code)]

use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use weaver::logic::WorkerOptions;
use weaver::prelude::*;
use weaver::signal::ValueStream;
use weaver::tree::el;

/// A module registry covering the standard scenario logic.
pub fn modules() -> Arc<ModuleRegistry> {
    let modules = Arc::new(ModuleRegistry::new());

    modules.register_fn("/logic/double.ts", |args| async move {
        Ok(Value::from(args[0].as_i64().unwrap_or(0) * 2))
    });

    // Handler: event first, then the mutator cell for the counter.
    modules.register_fn("/logic/increment.ts", |args| async move {
        let cell = args[1].cell().expect("mutator cell");
        let current = cell.get().as_i64().unwrap_or(0);
        cell.set(current + 1);
        Ok(Value::Json(serde_json::Value::Null))
    });

    modules.register_fn("/logic/fetch_user.ts", |_| async {
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        Ok(Value::Json(json!({"name": "ada"})))
    });

    modules.register_fn("/logic/fetch_user_by_id.ts", |args| async move {
        let id = args[0].as_i64().unwrap_or(0);
        Ok(Value::Json(json!({"id": id, "name": format!("user-{id}")})))
    });

    modules.register_fn("/logic/make_stream.ts", |_| async {
        Ok(Value::Stream(ValueStream::new(futures::stream::iter(vec![
            Value::from(0),
            Value::from(1),
            Value::from(2),
        ]))))
    });

    modules.register_fn("/logic/append.ts", |args| async move {
        let mut acc = args[0].as_json().cloned().unwrap_or_else(|| json!([]));
        let item = args[1]
            .as_json()
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        acc.as_array_mut()
            .ok_or_else(|| Error::Logic("accumulator is not an array".to_owned()))?
            .push(item);
        Ok(Value::Json(acc))
    });

    modules.register_fn("/components/greeting.ts", |args| async move {
        let name = args[0].as_str().unwrap_or("world").to_owned();
        Ok(Value::Tree(el("p").child(format!("hi {name}")).build()))
    });

    modules
}

/// A worker pool scoped to the given modules, so suites never share the
/// process-wide singleton's loader.
pub fn isolated_pool(modules: &Arc<ModuleRegistry>) -> Arc<WorkerPool> {
    let loader: Arc<dyn ModuleLoader> = modules.clone();
    Arc::new(WorkerPool::new(WorkerOptions { max_workers: 2 }, loader))
}

/// Register a logic fn that counts its invocations.
pub fn counting_module(
    modules: &Arc<ModuleRegistry>,
    src: &str,
    result: i64,
) -> Arc<AtomicUsize> {
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = calls.clone();
    modules.register_fn(src, move |_| {
        let seen = seen.clone();
        async move {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(Value::from(result))
        }
    });
    calls
}
