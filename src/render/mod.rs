//! Streaming renderer.
//!
//! Turns a tree of declarative values into a chunked UTF-8 HTML stream:
//! `tree → ComponentDelegate → token stream → HtmlSerializer → chunks`.
//! Async and pending subtrees execute in parallel while document order is
//! preserved on the wire; a fast path serializes fully static trees in one
//! pass.

mod delegate;
mod serializer;
mod token;
mod tokenizer;

pub use delegate::{Chunk, ComponentDelegate};
pub use serializer::{escape_attr, escape_text, is_void, HtmlSerializer, VOID_ELEMENTS};
pub use token::Token;
pub use tokenizer::{harvest_signals, is_static, tokenize_static};

use crate::logic::Executor;
use crate::tree::TreeNode;
use crate::Result;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc::{self, Receiver, Sender};

/// Renderer tuning.
#[derive(Clone, Copy, Debug)]
pub struct RenderOptions {
    /// Byte-size target for emitted chunks.
    pub chunk_size: usize,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self { chunk_size: 2048 }
    }
}

/// Render a tree to a stream of HTML chunks.
///
/// Static trees take the fast path: one synchronous serialization split into
/// sized chunks, the first flushed immediately. Anything with signals, async
/// subtrees, or suspense boundaries goes through the full pipeline.
pub fn render_to_stream(
    executor: Arc<Executor>,
    tree: TreeNode,
    options: RenderOptions,
) -> BoxStream<'static, Result<String>> {
    let chunk_size = options.chunk_size.max(1);

    if is_static(&tree) {
        let mut tokens = Vec::new();
        tokenize_static(&tree, &mut tokens);
        let mut serializer = HtmlSerializer::new();
        let mut html = String::new();
        if let Err(error) = serializer.serialize_all(&tokens, &mut html) {
            return futures::stream::iter(vec![Err(error)]).boxed();
        }
        let chunks = split_chunks(html, chunk_size);
        return futures::stream::iter(chunks.into_iter().map(Ok)).boxed();
    }

    let chunks = ComponentDelegate::new(executor).spawn(tree);
    let (token_tx, token_rx) = mpsc::channel(16);
    tokio::spawn(delegate::flatten(chunks, token_tx));

    let (out_tx, out_rx) = mpsc::channel(16);
    tokio::spawn(serialize_stream(token_rx, out_tx, chunk_size));

    receiver_stream(out_rx).boxed()
}

/// Render a tree to one HTML string.
pub async fn render_to_string(executor: Arc<Executor>, tree: TreeNode) -> Result<String> {
    let mut stream = render_to_stream(executor, tree, RenderOptions::default());
    let mut out = String::new();
    while let Some(chunk) = stream.next().await {
        out.push_str(&chunk?);
    }
    Ok(out)
}

async fn serialize_stream(
    mut tokens: Receiver<Result<Vec<Token>>>,
    out: Sender<Result<String>>,
    chunk_size: usize,
) {
    let mut serializer = HtmlSerializer::new();
    let mut buf = String::new();
    let mut first = true;

    while let Some(batch) = tokens.recv().await {
        let batch = match batch {
            Ok(batch) => batch,
            Err(error) => {
                tracing::error!(%error, "aborting render stream");
                let _ = out.send(Err(error)).await;
                return;
            }
        };
        for token in &batch {
            if let Err(error) = serializer.serialize_token(token, &mut buf) {
                let _ = out.send(Err(error)).await;
                return;
            }
        }
        // The first chunk flushes as soon as anything exists (TTFB); later
        // chunks wait for the size target.
        if (first && !buf.is_empty()) || buf.len() >= chunk_size {
            first = false;
            if out.send(Ok(std::mem::take(&mut buf))).await.is_err() {
                return;
            }
        }
    }
    if !buf.is_empty() {
        let _ = out.send(Ok(buf)).await;
    }
}

fn receiver_stream<T: Send + 'static>(rx: Receiver<T>) -> impl Stream<Item = T> + Send {
    futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    })
}

fn split_chunks(html: String, size: usize) -> Vec<String> {
    if html.len() <= size {
        return vec![html];
    }
    let mut chunks = Vec::new();
    let mut rest = html.as_str();
    while !rest.is_empty() {
        let mut cut = size.min(rest.len());
        while cut < rest.len() && !rest.is_char_boundary(cut) {
            cut += 1;
        }
        chunks.push(rest[..cut].to_owned());
        rest = &rest[cut..];
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_split_chunks_respects_char_boundaries() {
        let chunks = split_chunks("héllo wörld".repeat(40), 64);
        assert!(chunks.len() > 1);
        let rejoined: String = chunks.concat();
        assert_eq!(rejoined, "héllo wörld".repeat(40));
        assert!(chunks.iter().all(|c| c.len() <= 66));
    }

    #[test]
    fn test_small_documents_are_one_chunk() {
        assert_eq!(split_chunks("<p>hi</p>".to_owned(), 2048).len(), 1);
    }
}
