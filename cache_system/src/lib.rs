//! A tiny generic cache: given a key, either return the already-cached value or join an
//! already-running load for it, de-duplicating concurrent misses into a single loader call.
//!
//! The `CacheFactory` (in `cache_core`) uses this to make `CacheFor(kind, field_set)` safe to
//! call from many threads at once: the first caller starts the Informer for that cache, callers
//! that race it simply await the same in-flight construction instead of starting a second one.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_copy_implementations,
    missing_debug_implementations,
    missing_docs,
    clippy::explicit_iter_loop,
    clippy::future_not_send,
    clippy::clone_on_ref_ptr
)]

pub mod backend;
pub mod cache;
pub mod loader;

pub use cache::{Cache, CacheGetStatus, CachePeekStatus};
