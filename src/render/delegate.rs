//! The component delegate: the stream-to-stream transform at the heart of
//! the renderer.
//!
//! The delegate walks the tree, coalescing synchronous tokens into chunks.
//! On reaching an executable subtree it splices a child sub-stream into the
//! output in place and spawns the execution, so children run in parallel
//! with later siblings while bytes still appear downstream in document
//! order: the flattener reads sub-streams in splice order.

use super::serializer::{is_void, HtmlSerializer};
use super::token::Token;
use super::tokenizer::{
    computed_result_tokens, definition_tokens, element_open_tokens, harvest_signals,
    signal_child_tokens, subtree_definition_tokens,
};
use crate::logic::Executor;
use crate::signal::{Registry, Signal, SignalDef, Value};
use crate::tree::TreeNode;
use crate::{Error, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::Arc;
use tokio::sync::mpsc::{self, Receiver, Sender};

const CHUNK_CHANNEL: usize = 16;

/// One hop of the delegate's output: a run of synchronous tokens, a spliced
/// child sub-stream, or a pipeline failure.
pub enum Chunk {
    /// Coalesced synchronous tokens.
    Tokens(Vec<Token>),
    /// A child sub-stream to drain in place.
    Child(Receiver<Chunk>),
    /// Aborts consumption; nothing after this is valid.
    Fail(String),
}

/// Tree-to-chunk transform over an executor.
#[derive(Clone)]
pub struct ComponentDelegate {
    executor: Arc<Executor>,
}

impl ComponentDelegate {
    /// A delegate executing against the given executor's registry.
    pub fn new(executor: Arc<Executor>) -> Self {
        Self { executor }
    }

    fn registry(&self) -> &Arc<Registry> {
        self.executor.registry()
    }

    /// Spawn the root transform: harvest the tree, pre-execute server
    /// logic, then walk. Returns the chunk stream to flatten.
    pub fn spawn(self, tree: TreeNode) -> Receiver<Chunk> {
        let (tx, rx) = mpsc::channel(CHUNK_CHANNEL);
        tokio::spawn(async move {
            harvest_signals(&tree, self.registry());
            self.executor.pre_execute_server_logic().await;

            let mut buf = Vec::new();
            let result = self.walk(&tree, &mut buf, &tx).await;
            match result {
                Ok(()) => {
                    let _ = flush(&mut buf, &tx).await;
                }
                Err(error) => {
                    tracing::error!(%error, "render delegate failed");
                    let _ = tx.send(Chunk::Fail(error.to_string())).await;
                }
            }
        });
        rx
    }

    fn walk<'a>(
        &'a self,
        node: &'a TreeNode,
        buf: &'a mut Vec<Token>,
        tx: &'a Sender<Chunk>,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            match node {
                TreeNode::Text(content) => buf.push(Token::text(content.clone())),
                TreeNode::Raw(raw) => buf.push(Token::RawHtml {
                    content: raw.raw.clone(),
                }),
                TreeNode::Fragment(children) => {
                    for child in children {
                        self.walk(child, buf, tx).await?;
                    }
                }
                TreeNode::Element(element) => {
                    element_open_tokens(element, self.registry(), buf);
                    if !is_void(&element.tag) {
                        for child in &element.children {
                            self.walk(child, buf, tx).await?;
                        }
                        buf.push(Token::CloseTag {
                            tag: element.tag.clone(),
                        });
                    }
                }
                TreeNode::Deferred(deferred) => {
                    let child = self.open_child(buf, tx).await?;
                    let delegate = self.clone();
                    let deferred = deferred.clone();
                    tokio::spawn(async move {
                        let subtree = deferred.await;
                        let result = delegate.render_deferred(subtree, child.clone()).await;
                        fail_guard(result, &child).await;
                    });
                }
                TreeNode::Signal(signal) => {
                    let Some(executable) = signal_child_tokens(signal, self.registry(), buf)
                    else {
                        return Ok(());
                    };
                    let child = self.open_child(buf, tx).await?;
                    let delegate = self.clone();
                    tokio::spawn(async move {
                        let result = match executable {
                            Token::NodeExecutable { signal } => {
                                delegate.render_node(signal, child.clone()).await
                            }
                            Token::ComputedExecutable { signal } => {
                                delegate.render_computed(signal, child.clone()).await
                            }
                            Token::SuspenseExecutable { signal } => {
                                delegate.render_suspense(signal, child.clone()).await
                            }
                            _ => Ok(()),
                        };
                        fail_guard(result, &child).await;
                    });
                }
            }
            Ok(())
        }
        .boxed()
    }

    /// Flush the buffer and splice a fresh child sub-stream at this point.
    async fn open_child(&self, buf: &mut Vec<Token>, tx: &Sender<Chunk>) -> Result<Sender<Chunk>> {
        flush(buf, tx).await?;
        let (child_tx, child_rx) = mpsc::channel(CHUNK_CHANNEL);
        tx.send(Chunk::Child(child_rx))
            .await
            .map_err(|_| closed())?;
        Ok(child_tx)
    }

    /// Harvest and stream a resolved async subtree into its sub-stream.
    async fn render_deferred(&self, subtree: TreeNode, tx: Sender<Chunk>) -> Result<()> {
        harvest_signals(&subtree, self.registry());
        self.executor.pre_execute_server_logic().await;
        let mut buf = Vec::new();
        self.walk(&subtree, &mut buf, &tx).await?;
        flush(&mut buf, &tx).await
    }

    /// Execute a node signal and stream its subtree inside bind markers.
    ///
    /// A module-load failure closes the sub-stream after the markers so the
    /// client can hydrate the node; other failures abort the pipeline.
    async fn render_node(&self, signal: Signal, tx: Sender<Chunk>) -> Result<()> {
        let id = signal.id().clone();
        match self.executor.execute_node(&id).await {
            Ok(subtree) => {
                harvest_signals(&subtree, self.registry());
                self.executor.pre_execute_server_logic().await;

                let mut buf = vec![Token::BindOpen { id: id.clone() }];
                self.walk(&subtree, &mut buf, &tx).await?;
                buf.push(Token::BindClose { id });
                definition_tokens(&signal, &mut buf);
                subtree_definition_tokens(&subtree, &mut buf);
                flush(&mut buf, &tx).await
            }
            Err(Error::ModuleLoadFailure { src, reason }) => {
                tracing::warn!(%src, %reason, "node SSR skipped; client will hydrate");
                let mut buf = vec![
                    Token::BindOpen { id: id.clone() },
                    Token::BindClose { id },
                ];
                definition_tokens(&signal, &mut buf);
                flush(&mut buf, &tx).await
            }
            Err(other) => Err(other),
        }
    }

    /// Execute a computed signal inline and emit its bound value.
    async fn render_computed(&self, signal: Signal, tx: Sender<Chunk>) -> Result<()> {
        if let Err(error) = self.executor.execute_computed(signal.id()).await {
            // Contained: the bind point stays empty, the definition still
            // ships, and the client can re-execute.
            tracing::warn!(id = %signal.id(), %error, "computed SSR failed");
        }
        let mut buf = Vec::new();
        computed_result_tokens(&signal, self.registry(), &mut buf);
        flush(&mut buf, &tx).await
    }

    /// Resolve a suspense boundary.
    ///
    /// With nothing pending the children stream straight through the
    /// markers. With any descendant PENDING, the fallback streams instead
    /// and the children's would-be HTML is pre-serialized into the emitted
    /// definition for an instant client swap.
    async fn render_suspense(&self, signal: Signal, tx: Sender<Chunk>) -> Result<()> {
        let (id, fallback, children) = match signal.def() {
            SignalDef::Suspense {
                id,
                fallback,
                children,
                ..
            } => (id.clone(), (**fallback).clone(), (**children).clone()),
            other => {
                return Err(Error::SignalKindMismatch {
                    id: other.id().clone(),
                    expected: "suspense",
                    actual: other.kind(),
                })
            }
        };

        let mut pending = Vec::new();
        children.visit_signals(&mut |descendant| {
            if matches!(self.registry().get_value(descendant.id()), Some(Value::Pending))
                && !pending.contains(descendant.id())
            {
                pending.push(descendant.id().clone());
            }
        });

        if pending.is_empty() {
            let mut buf = vec![Token::BindOpen { id: id.clone() }];
            self.walk(&children, &mut buf, &tx).await?;
            buf.push(Token::BindClose { id });
            buf.push(Token::SignalDefinition {
                signal: signal.def().clone(),
            });
            return flush(&mut buf, &tx).await;
        }

        let children_html = self.render_fragment(children.clone()).await?;
        let resolved = SignalDef::Suspense {
            id: id.clone(),
            fallback: Box::new(fallback.clone()),
            children: Box::new(children.clone()),
            pending_deps: pending,
            children_html: Some(children_html),
        };
        self.registry().replace_def(resolved.clone());

        let mut buf = vec![Token::BindOpen { id: id.clone() }];
        self.walk(&fallback, &mut buf, &tx).await?;
        buf.push(Token::BindClose { id });
        buf.push(Token::SignalDefinition { signal: resolved });
        subtree_definition_tokens(&children, &mut buf);
        flush(&mut buf, &tx).await
    }

    /// Render a subtree to a standalone HTML string through a nested
    /// pipeline, without definition scripts (the surrounding document
    /// already carries them).
    pub(crate) async fn render_fragment(&self, tree: TreeNode) -> Result<String> {
        let (tx, rx) = mpsc::channel(CHUNK_CHANNEL);
        let delegate = self.clone();
        tokio::spawn(async move {
            let mut buf = Vec::new();
            match delegate.walk(&tree, &mut buf, &tx).await {
                Ok(()) => {
                    let _ = flush(&mut buf, &tx).await;
                }
                Err(error) => {
                    let _ = tx.send(Chunk::Fail(error.to_string())).await;
                }
            }
        });

        let tokens = collect_tokens(rx).await?;
        let mut serializer = HtmlSerializer::without_definitions();
        let mut out = String::new();
        serializer.serialize_all(&tokens, &mut out)?;
        Ok(out)
    }
}

fn closed() -> Error {
    Error::Stream("chunk consumer closed".to_owned())
}

/// Convert a child-render failure into a `Fail` chunk so the parent stream
/// aborts instead of hanging on a silently closed sub-stream.
async fn fail_guard(result: Result<()>, tx: &Sender<Chunk>) {
    if let Err(error) = result {
        tracing::error!(%error, "child sub-stream failed");
        let _ = tx.send(Chunk::Fail(error.to_string())).await;
    }
}

async fn flush(buf: &mut Vec<Token>, tx: &Sender<Chunk>) -> Result<()> {
    if buf.is_empty() {
        return Ok(());
    }
    tx.send(Chunk::Tokens(std::mem::take(buf)))
        .await
        .map_err(|_| closed())
}

/// Drain a chunk stream depth-first into a flat token vector, preserving
/// splice order.
pub(crate) fn collect_tokens(mut rx: Receiver<Chunk>) -> BoxFuture<'static, Result<Vec<Token>>> {
    async move {
        let mut out = Vec::new();
        while let Some(chunk) = rx.recv().await {
            match chunk {
                Chunk::Tokens(mut tokens) => out.append(&mut tokens),
                Chunk::Child(child) => out.extend(collect_tokens(child).await?),
                Chunk::Fail(message) => return Err(Error::Stream(message)),
            }
        }
        Ok(out)
    }
    .boxed()
}

/// Forward a chunk stream, depth-first, as flat token batches.
pub(crate) fn flatten(
    mut rx: Receiver<Chunk>,
    tx: Sender<Result<Vec<Token>>>,
) -> BoxFuture<'static, ()> {
    async move {
        while let Some(chunk) = rx.recv().await {
            match chunk {
                Chunk::Tokens(tokens) => {
                    if tx.send(Ok(tokens)).await.is_err() {
                        return;
                    }
                }
                Chunk::Child(child) => flatten(child, tx.clone()).await,
                Chunk::Fail(message) => {
                    let _ = tx.send(Err(Error::Stream(message))).await;
                    return;
                }
            }
        }
    }
    .boxed()
}
