//! Re-exports the tracing ecosystem crates used across the cache core so that every
//! crate in the workspace pins the same versions and macro set instead of depending
//! on `tracing` directly.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]

pub use tracing;
