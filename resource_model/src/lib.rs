//! Shared vocabulary between `cache_core` and whatever sits on top of it: the document model,
//! field extractors, the `Schema` descriptor, list-option types, the `ResourceClient` contract
//! the Informer consumes, and the closed error taxonomy every component in `cache_core` returns.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(missing_copy_implementations, missing_debug_implementations, missing_docs)]

pub mod client;
pub mod document;
pub mod error;
pub mod field;
pub mod options;
pub mod schema;

pub use client::{Item, Page, ResourceClient, WatchEvent};
pub use document::{Document, Segment};
pub use error::{Error, Result};
pub use field::{ExtractedValue, FieldExtractor, FieldType, IndirectField};
pub use options::{
    Filter, FilterOp, ListOptions, OrFilter, Pagination, Partition, ResumeToken, Sort,
    SortDirection, Summary,
};
pub use schema::{KindId, Schema};
