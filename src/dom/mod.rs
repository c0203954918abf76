//! Client-side document model and patcher.
//!
//! A lightweight arena DOM sufficient for hydration: elements, text, and
//! comment nodes (bind points are delimited by comment pairs, so comments
//! must survive parsing). The [`Sink`] discovers bind points once at
//! startup and patches content ranges and attributes in place as updates
//! arrive.

mod document;
mod parser;
mod sink;

pub use document::{Document, DomNode, NodeId, NodeKind};
pub use parser::{parse_document, parse_into};
pub use sink::{AttrBinding, Sink};
