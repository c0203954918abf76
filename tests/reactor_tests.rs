//! Client reactor: hydration, events, propagation, reducers.

mod common;

use pretty_assertions::assert_eq;
use serde_json::json;
use weaver::prelude::*;

#[tokio::test]
async fn test_counter_hydration_click_updates_span() {
    let modules = common::modules();
    let server = ServerWeaver::new(modules.clone());
    let count = server.scope().state(0);
    let increment = handler(
        &server.scope().logic("/logic/increment.ts"),
        &[mutator(&count)],
    );
    let html = server
        .render_to_string(
            el("div")
                .child(el("button").on("click", &increment).child("+"))
                .child(el("span").child(&count))
                .into(),
        )
        .await
        .unwrap();
    assert!(html.contains(&format!("<!--^{}-->0<!--/{}-->", count.id(), count.id())));

    let client = ClientWeaver::hydrate(&html, modules).unwrap();
    let button = client
        .find_by_attr("data-w-onclick", increment.id().as_str())
        .expect("button binding");
    assert!(client.click(button));
    client.settle().await;

    assert_eq!(client.text_of(count.id()).as_deref(), Some("1"));
    assert_eq!(client.registry().get_value(count.id()), Some(Value::from(1)));
    // The handler binding still resolves after the patch.
    assert!(client
        .find_by_attr("data-w-onclick", increment.id().as_str())
        .is_some());

    // A second click keeps folding over live state.
    client.click(button);
    client.settle().await;
    assert_eq!(client.text_of(count.id()).as_deref(), Some("2"));
}

#[tokio::test]
async fn test_computed_propagation_updates_dom() {
    let modules = common::modules();
    let server = ServerWeaver::new(modules.clone());
    let count = server.scope().state(2);
    let doubled = computed(&server.scope().logic("/logic/double.ts"), &[count.clone()]);
    let html = server
        .render_to_string(el("span").child(&doubled).into())
        .await
        .unwrap();
    assert!(html.contains(&format!("<!--^{}-->4<!--/{}-->", doubled.id(), doubled.id())));

    let client = ClientWeaver::hydrate(&html, modules).unwrap();
    client.update_signal(count.id(), 5);
    client.settle().await;

    assert_eq!(client.registry().get_value(doubled.id()), Some(Value::from(10)));
    assert_eq!(client.text_of(doubled.id()).as_deref(), Some("10"));
}

#[tokio::test]
async fn test_propagation_is_topological_through_chains() {
    let modules = common::modules();
    let server = ServerWeaver::new(modules.clone());
    let base = server.scope().state(1);
    let double = server.scope().logic("/logic/double.ts");
    let x2 = computed(&double, &[base.clone()]);
    let x4 = computed(&double, &[x2.clone()]);
    let html = server
        .render_to_string(
            el("div")
                .child(el("i").child(&x2))
                .child(el("b").child(&x4))
                .into(),
        )
        .await
        .unwrap();

    let client = ClientWeaver::hydrate(&html, modules).unwrap();
    client.update_signal(base.id(), 3);
    client.settle().await;

    assert_eq!(client.text_of(x2.id()).as_deref(), Some("6"));
    assert_eq!(client.text_of(x4.id()).as_deref(), Some("12"));
}

#[tokio::test]
async fn test_bound_attribute_updates_with_content() {
    let modules = common::modules();
    let server = ServerWeaver::new(modules.clone());
    let name = server.scope().state("ada");
    let html = server
        .render_to_string(
            el("div")
                .child(el("input").bind("value", &name))
                .child(el("span").child(&name))
                .into(),
        )
        .await
        .unwrap();

    let client = ClientWeaver::hydrate(&html, modules).unwrap();
    client.update_signal(name.id(), "lovelace");
    client.settle().await;

    assert_eq!(client.text_of(name.id()).as_deref(), Some("lovelace"));
    let input = client
        .find_by_attr("data-w-value", name.id().as_str())
        .expect("input binding");
    client
        .sink()
        .with_document(|doc| assert_eq!(doc.attribute(input, "value"), Some("lovelace")));
}

#[tokio::test]
async fn test_reducer_drains_stream_in_order() {
    let modules = common::modules();
    let server = ServerWeaver::new(modules.clone());
    let make = server.scope().client_logic("/logic/make_stream.ts");
    let source = computed(&make, &[]);
    let append = server.scope().logic("/logic/append.ts");
    let acc = reducer(&source, &append, json!([]));

    let html = server
        .render_to_string(el("span").child(&acc).into())
        .await
        .unwrap();
    // SSR shows the init value.
    assert!(html.contains(&format!("<!--^{}-->[]<!--/{}-->", acc.id(), acc.id())));

    let client = ClientWeaver::hydrate(&html, modules).unwrap();
    client.settle().await;

    assert_eq!(
        client.registry().get_value(acc.id()),
        Some(Value::Json(json!([0, 1, 2])))
    );
    assert_eq!(client.text_of(acc.id()).as_deref(), Some("[0,1,2]"));
}

#[tokio::test]
async fn test_reducer_over_empty_iterable_keeps_init() {
    let modules = common::modules();
    modules.register_fn("/logic/empty_stream.ts", |_| async {
        Ok(Value::Json(json!([])))
    });

    let server = ServerWeaver::new(modules.clone());
    let make = server.scope().client_logic("/logic/empty_stream.ts");
    let source = computed(&make, &[]);
    let append = server.scope().logic("/logic/append.ts");
    let acc = reducer(&source, &append, json!(["seed"]));

    let html = server
        .render_to_string(el("span").child(&acc).into())
        .await
        .unwrap();
    let client = ClientWeaver::hydrate(&html, modules).unwrap();
    client.settle().await;

    assert_eq!(
        client.registry().get_value(acc.id()),
        Some(Value::Json(json!(["seed"])))
    );
}

#[tokio::test]
async fn test_handler_exception_is_suppressed() {
    let modules = common::modules();
    modules.register_fn("/logic/explode.ts", |_| async {
        Err(Error::Logic("boom".to_owned()))
    });

    let server = ServerWeaver::new(modules.clone());
    let count = server.scope().state(0);
    let explode = handler(&server.scope().logic("/logic/explode.ts"), &[]);
    let increment = handler(
        &server.scope().logic("/logic/increment.ts"),
        &[mutator(&count)],
    );
    let html = server
        .render_to_string(
            el("div")
                .child(el("a").on("click", &explode).child("boom"))
                .child(el("b").on("click", &increment).child("+"))
                .child(el("span").child(&count))
                .into(),
        )
        .await
        .unwrap();

    let client = ClientWeaver::hydrate(&html, modules).unwrap();
    let bad = client
        .find_by_attr("data-w-onclick", explode.id().as_str())
        .unwrap();
    let good = client
        .find_by_attr("data-w-onclick", increment.id().as_str())
        .unwrap();

    // The failing handler is logged and suppressed; processing continues.
    client.click(bad);
    client.click(good);
    client.settle().await;
    assert_eq!(client.text_of(count.id()).as_deref(), Some("1"));
}

#[tokio::test]
async fn test_event_delegation_walks_ancestors() {
    let modules = common::modules();
    let server = ServerWeaver::new(modules.clone());
    let count = server.scope().state(0);
    let increment = handler(
        &server.scope().logic("/logic/increment.ts"),
        &[mutator(&count)],
    );
    let html = server
        .render_to_string(
            el("div")
                .on("click", &increment)
                .attr("id", "outer")
                .child(el("em").attr("id", "inner").child("deep"))
                .child(el("span").child(&count))
                .into(),
        )
        .await
        .unwrap();

    let client = ClientWeaver::hydrate(&html, modules).unwrap();
    let inner = client.find_by_attr("id", "inner").unwrap();
    // The event fires on a node with no binding; the ancestor handles it.
    assert!(client.dispatch_event("click", inner, json!({"type": "click"})));
    client.settle().await;
    assert_eq!(client.text_of(count.id()).as_deref(), Some("1"));

    // No binding anywhere up the chain: not handled.
    assert!(!client.dispatch_event("keydown", inner, json!({"type": "keydown"})));
}

#[tokio::test]
async fn test_deferred_computed_pipes_resolution() {
    let modules = common::modules();
    modules.register_fn("/logic/slow_value.ts", |_| async {
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        Ok(Value::from(99))
    });

    let server = ServerWeaver::new(modules.clone());
    let slow = server.scope().client_logic("/logic/slow_value.ts").with_timeout(0);
    let lazy = computed(&slow, &[]);
    let html = server
        .render_to_string(el("span").child(&lazy).into())
        .await
        .unwrap();

    let client = ClientWeaver::hydrate(&html, modules).unwrap();
    // Hydration kicks off the client-context computed; the deferred result
    // arrives as a later signal-update.
    client.settle().await;
    assert_eq!(client.registry().get_value(lazy.id()), Some(Value::from(99)));
    assert_eq!(client.text_of(lazy.id()).as_deref(), Some("99"));
}
