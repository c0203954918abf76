//! Suspense: SSR fallback, pending tracking, children swap.

mod common;

use pretty_assertions::assert_eq;
use serde_json::json;
use weaver::prelude::*;

#[tokio::test]
async fn test_nothing_pending_renders_children_directly() {
    let modules = common::modules();
    let server = ServerWeaver::new(modules);
    let count = server.scope().state(3);
    let boundary = suspense(
        el("span").child("loading"),
        el("div").child(&count),
    );
    let html = server
        .render_to_string(el("main").child(&boundary).into())
        .await
        .unwrap();

    assert!(html.contains(&format!("<!--^{}-->3<!--/{}-->", count.id(), count.id())));
    assert!(!html.contains("<span>loading</span>"));
    assert!(!html.contains("_childrenHtml"));
}

#[tokio::test]
async fn test_deferred_suspense_end_to_end() {
    let modules = common::modules();
    let server = ServerWeaver::new(modules.clone());

    let fetch = server.scope().logic("/logic/fetch_user.ts").with_timeout(0);
    let user = computed(&fetch, &[]);
    let boundary = suspense(
        el("span").child("loading"),
        el("div").child(&user),
    );
    let html = server
        .render_to_string(el("main").child(&boundary).into())
        .await
        .unwrap();

    // SSR shows the fallback inside the suspense markers and inlines the
    // children's would-be HTML (empty user markers) into the definition.
    let sid = boundary.id().as_str();
    let uid = user.id().as_str();
    assert!(html.contains(&format!("<!--^{sid}--><span>loading</span><!--/{sid}-->")));
    assert!(html.contains("_childrenHtml"));
    assert!(html.contains(&format!(r#""pendingDeps":["{uid}"]"#)));

    let client = ClientWeaver::hydrate(&html, modules).unwrap();
    client.settle().await;

    // The deferred resolved on the client: children swapped in, user JSON
    // visible, fallback gone.
    assert_eq!(
        client.registry().get_value(user.id()),
        Some(Value::Json(json!({"name": "ada"})))
    );
    assert_eq!(
        client.text_of(user.id()).as_deref(),
        Some(r#"{"name":"ada"}"#)
    );
    // The region between the suspense markers is the children now, not the
    // fallback.
    assert_eq!(
        client.text_of(boundary.id()).as_deref(),
        Some(r#"{"name":"ada"}"#)
    );
}

#[tokio::test]
async fn test_client_side_pending_swaps_fallback_and_back() {
    let modules = common::modules();
    modules.register_fn("/logic/slow_double.ts", |args| async move {
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        Ok(Value::from(args[0].as_i64().unwrap_or(0) * 2))
    });

    let server = ServerWeaver::new(modules.clone());
    let count = server.scope().state(1);
    let slow = server.scope().logic("/logic/slow_double.ts").with_timeout(0);
    let doubled = computed(&slow, &[count.clone()]);
    let boundary = suspense(
        el("span").child("loading"),
        el("div").child(&doubled),
    );
    let html = server
        .render_to_string(el("main").child(&boundary).into())
        .await
        .unwrap();

    let client = ClientWeaver::hydrate(&html, modules).unwrap();
    client.settle().await;
    assert_eq!(client.text_of(doubled.id()).as_deref(), Some("2"));

    // A dep update defers the recompute: fallback shows while pending, then
    // the children swap back with the fresh value.
    client.update_signal(count.id(), 5);
    client.settle().await;
    assert_eq!(client.text_of(doubled.id()).as_deref(), Some("10"));
    assert_eq!(client.text_of(boundary.id()).as_deref(), Some("10"));
}
