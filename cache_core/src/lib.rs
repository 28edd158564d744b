//! SQLite-backed informer, query compiler, cache factory, and debounced notifier that mirror
//! upstream resource kinds into a local queryable cache.
//!
//! Modules map directly onto SPEC_FULL §4: [`store`] is the per-kind persistent mirror,
//! [`informer`] runs the list→watch loop feeding it, [`factory`] owns the keyed-by-
//! `(kind, field-set)` lifecycle of Store+Informer pairs, [`notifier`] fans out debounced
//! mutation notifications, [`schema_tracker`] watches for upstream catalogue drift, and
//! [`encryption`] and [`config`] are the ambient plumbing the others depend on.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(missing_copy_implementations, missing_debug_implementations, missing_docs)]

pub mod config;
pub mod encryption;
pub mod factory;
pub mod informer;
pub mod notifier;
pub mod schema_tracker;
pub mod store;

pub use config::Config;
pub use encryption::EncryptionManager;
pub use factory::{CacheFactory, CacheHandle, ClientSource};
pub use informer::{Informer, InformerState};
pub use notifier::{ListenerHandle, NotifyEvent, NotifyFilter, Notifier};
pub use schema_tracker::{CatalogueSource, SchemaFingerprint, SchemaTracker};
pub use store::Store;
