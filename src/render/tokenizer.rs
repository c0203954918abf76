//! Tree-to-token decomposition and signal harvesting.
//!
//! The synchronous half of the render pipeline: registering tree-borne
//! signals, classifying signal children, and producing the token runs the
//! delegate coalesces into chunks. Anything that needs execution comes back
//! as an executable token for the delegate to schedule.

use super::token::Token;
use crate::signal::{LogicContext, Registry, Signal, SignalDef};
use crate::tree::{AttrValue, Element, TreeNode};

/// Depth-first registration pass: insert every embedded signal (idempotently)
/// into the registry, along with its carried logic and dep definitions.
pub fn harvest_signals(tree: &TreeNode, registry: &Registry) {
    tree.visit_signals(&mut |signal| registry.register_signal(signal));
}

/// Whether a subtree contains no signals, async subtrees, or suspense
/// boundaries (the fast-path condition).
pub fn is_static(tree: &TreeNode) -> bool {
    match tree {
        TreeNode::Text(_) | TreeNode::Raw(_) => true,
        TreeNode::Signal(_) | TreeNode::Deferred(_) => false,
        TreeNode::Fragment(children) => children.iter().all(is_static),
        TreeNode::Element(element) => {
            element
                .attrs
                .iter()
                .all(|attr| matches!(attr.value, AttrValue::Literal(_)))
                && element.children.iter().all(is_static)
        }
    }
}

/// Tokenize a static subtree (no signals, no deferrals).
pub fn tokenize_static(tree: &TreeNode, out: &mut Vec<Token>) {
    match tree {
        TreeNode::Text(content) => out.push(Token::text(content.clone())),
        TreeNode::Raw(raw) => out.push(Token::RawHtml {
            content: raw.raw.clone(),
        }),
        TreeNode::Fragment(children) => {
            for child in children {
                tokenize_static(child, out);
            }
        }
        TreeNode::Element(element) => {
            let attrs = element
                .attrs
                .iter()
                .filter_map(|attr| match &attr.value {
                    AttrValue::Literal(value) => {
                        literal_attr_text(value).map(|text| (attr.name.clone(), text))
                    }
                    AttrValue::Signal(_) => None,
                })
                .collect();
            out.push(Token::OpenTag {
                tag: element.tag.clone(),
                attrs,
            });
            if !super::serializer::is_void(&element.tag) {
                for child in &element.children {
                    tokenize_static(child, out);
                }
                out.push(Token::CloseTag {
                    tag: element.tag.clone(),
                });
            }
        }
        TreeNode::Signal(_) | TreeNode::Deferred(_) => {
            tracing::error!("non-static subtree reached the static tokenizer");
        }
    }
}

/// Text form of a literal attribute; `null` drops the attribute.
fn literal_attr_text(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}

/// The value text currently backing a signal in the initial HTML: the live
/// registry value when present, the definition's init otherwise.
pub(crate) fn current_text(def: &SignalDef, registry: &Registry) -> String {
    if let Some(value) = registry.get_value(def.id()) {
        return value.text_content().unwrap_or_default();
    }
    match def {
        SignalDef::State { init, .. } | SignalDef::Reducer { init, .. } => json_text(init),
        _ => String::new(),
    }
}

fn json_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Emit `SignalDefinition` tokens for a signal and everything it carries.
/// The serializer deduplicates repeats by id.
pub(crate) fn definition_tokens(signal: &Signal, out: &mut Vec<Token>) {
    out.push(Token::SignalDefinition {
        signal: signal.def().clone(),
    });
    for carried in signal.carried() {
        definition_tokens(carried, out);
    }
}

/// Emit `SignalDefinition` tokens for every signal embedded in a subtree.
pub(crate) fn subtree_definition_tokens(tree: &TreeNode, out: &mut Vec<Token>) {
    tree.visit_signals(&mut |signal| definition_tokens(signal, out));
}

/// Open an element: the `OpenTag` token (literal and hydratable attributes)
/// plus definition tokens for every signal-bound attribute.
pub(crate) fn element_open_tokens(element: &Element, registry: &Registry, out: &mut Vec<Token>) {
    let mut attrs = Vec::with_capacity(element.attrs.len());
    let mut defs = Vec::new();

    for attr in &element.attrs {
        match &attr.value {
            AttrValue::Literal(value) => {
                if let Some(text) = literal_attr_text(value) {
                    attrs.push((attr.name.clone(), text));
                }
            }
            AttrValue::Signal(signal) => {
                if !attr.is_event() {
                    // The literal current value keeps first paint correct;
                    // the data-w twin keeps the binding hydratable.
                    attrs.push((attr.name.clone(), current_text(signal.def(), registry)));
                }
                attrs.push((format!("data-w-{}", attr.name), signal.id().to_string()));
                definition_tokens(signal, &mut defs);
            }
        }
    }

    out.push(Token::OpenTag {
        tag: element.tag.clone(),
        attrs,
    });
    out.append(&mut defs);
}

/// Tokenize a signal appearing in child position. Synchronously renderable
/// kinds append their tokens and return `None`; subtrees that need execution
/// return the executable token for the delegate to schedule.
pub(crate) fn signal_child_tokens(
    signal: &Signal,
    registry: &Registry,
    out: &mut Vec<Token>,
) -> Option<Token> {
    let id = signal.id().clone();
    match signal.def() {
        SignalDef::Node { .. } => {
            return Some(Token::NodeExecutable {
                signal: signal.clone(),
            })
        }
        SignalDef::Suspense { .. } => {
            return Some(Token::SuspenseExecutable {
                signal: signal.clone(),
            })
        }
        SignalDef::Computed { logic, .. } => {
            let value = registry.get_value(&id);
            let client_only = matches!(
                registry.get_signal(logic),
                Some(SignalDef::Logic {
                    context: Some(LogicContext::Client),
                    ..
                })
            );
            match value {
                // Concrete or PENDING: the current text (possibly empty)
                // renders inline between the markers.
                Some(_) => {}
                // Absent client-context values stay empty until hydration.
                None if client_only => {}
                // Absent and server-executable: defer to the delegate.
                None => {
                    return Some(Token::ComputedExecutable {
                        signal: signal.clone(),
                    })
                }
            }
        }
        // State, reducers, and the rest render their current/init text (or
        // nothing at all) synchronously.
        _ => {}
    }

    match signal.def() {
        SignalDef::State { .. } | SignalDef::Computed { .. } | SignalDef::Reducer { .. } => {
            out.push(Token::BindOpen { id: id.clone() });
            let text = current_text(signal.def(), registry);
            if !text.is_empty() {
                out.push(Token::text(text));
            }
            out.push(Token::BindClose { id });
            definition_tokens(signal, out);
        }
        // Non-visual kinds in child position contribute definitions only.
        _ => definition_tokens(signal, out),
    }
    None
}

/// Tokenize a computed after the delegate produced its value.
pub(crate) fn computed_result_tokens(signal: &Signal, registry: &Registry, out: &mut Vec<Token>) {
    let id = signal.id().clone();
    out.push(Token::BindOpen { id: id.clone() });
    let text = current_text(signal.def(), registry);
    if !text.is_empty() {
        out.push(Token::text(text));
    }
    out.push(Token::BindClose { id });
    definition_tokens(signal, out);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::{computed, SignalScope, Value};
    use crate::tree::el;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_static_detection() {
        let scope = SignalScope::server();
        let count = scope.state(0);

        assert!(is_static(&el("div").child("hi").build()));
        assert!(!is_static(&el("div").child(&count).build()));
        assert!(!is_static(&el("div").bind("title", &count).build()));
    }

    #[test]
    fn test_state_child_renders_markers_and_definition() {
        let registry = Registry::new();
        let scope = SignalScope::server();
        let count = scope.state(7);
        registry.register_signal(&count);

        let mut out = Vec::new();
        let executable = signal_child_tokens(&count, &registry, &mut out);
        assert!(executable.is_none());
        assert_eq!(
            out,
            vec![
                Token::BindOpen {
                    id: count.id().clone()
                },
                Token::text("7"),
                Token::BindClose {
                    id: count.id().clone()
                },
                Token::SignalDefinition {
                    signal: count.def().clone()
                },
            ]
        );
    }

    #[test]
    fn test_pending_child_renders_empty_markers() {
        let registry = Registry::new();
        let scope = SignalScope::server();
        let c = computed(&scope.logic("/logic/later.ts"), &[]);
        registry.register_signal(&c);
        registry.set_value(c.id(), Value::Pending);

        let mut out = Vec::new();
        assert!(signal_child_tokens(&c, &registry, &mut out).is_none());
        assert_eq!(out[0], Token::BindOpen { id: c.id().clone() });
        assert!(matches!(out[1], Token::BindClose { .. }));
    }

    #[test]
    fn test_unexecuted_computed_becomes_executable() {
        let registry = Registry::new();
        let scope = SignalScope::server();
        let c = computed(&scope.logic("/logic/later.ts"), &[]);
        registry.register_signal(&c);

        let mut out = Vec::new();
        let executable = signal_child_tokens(&c, &registry, &mut out);
        assert!(matches!(executable, Some(Token::ComputedExecutable { .. })));
        assert!(out.is_empty());
    }

    #[test]
    fn test_event_attrs_emit_only_the_data_twin() {
        let registry = Registry::new();
        let scope = SignalScope::server();
        let logic = scope.logic("/logic/inc.ts");
        let on_click = crate::signal::handler(&logic, &[]);
        registry.register_signal(&on_click);

        let TreeNode::Element(element) = el("button").on("click", &on_click).build() else {
            panic!("expected element");
        };
        let mut out = Vec::new();
        element_open_tokens(&element, &registry, &mut out);

        let Token::OpenTag { attrs, .. } = &out[0] else {
            panic!("expected open tag");
        };
        assert_eq!(
            attrs,
            &vec![("data-w-onclick".to_owned(), on_click.id().to_string())]
        );
    }

    #[test]
    fn test_bound_attrs_emit_value_and_data_twin() {
        let registry = Registry::new();
        let scope = SignalScope::server();
        let title = scope.state("hello");
        registry.register_signal(&title);

        let TreeNode::Element(element) = el("div").bind("title", &title).build() else {
            panic!("expected element");
        };
        let mut out = Vec::new();
        element_open_tokens(&element, &registry, &mut out);

        let Token::OpenTag { attrs, .. } = &out[0] else {
            panic!("expected open tag");
        };
        assert_eq!(
            attrs,
            &vec![
                ("title".to_owned(), "hello".to_owned()),
                ("data-w-title".to_owned(), title.id().to_string()),
            ]
        );
    }
}
