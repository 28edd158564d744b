//! A minimal metric registry.
//!
//! Every metric is registered once under a `(name, description)` pair and handed out as a
//! [`Metric`], which in turn produces per-attribute-set recorders. Recorders are cheap to
//! clone and safe to share across threads; the registry only exists to enumerate what has been
//! registered (e.g. for a future `/metrics` exporter), it does not itself read values.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(missing_debug_implementations, missing_docs, clippy::clone_on_ref_ptr)]

mod attributes;
mod counter;
mod histogram;
mod registry;

pub use attributes::Attributes;
pub use counter::U64Counter;
pub use histogram::{DurationHistogram, DurationHistogramOptions};
pub use registry::Registry;

use std::{fmt::Debug, sync::Arc};

/// A kind of metric that can be recorded under distinct [`Attributes`].
pub trait MetricKind: Clone + Debug + Default + Send + Sync + 'static {}

impl<T> MetricKind for T where T: Clone + Debug + Default + Send + Sync + 'static {}

/// A named, described metric of kind `T` producing one recorder per distinct [`Attributes`]
/// set observed.
#[derive(Debug)]
pub struct Metric<T>
where
    T: MetricKind,
{
    name: &'static str,
    description: &'static str,
    shared: Arc<parking_lot::Mutex<hashbrown_like::Map<Attributes, T>>>,
}

// A tiny insertion-ordered map so the same `Attributes` always round-trips to the same
// recorder instance without pulling in an extra dependency.
mod hashbrown_like {
    use std::collections::HashMap;
    use std::hash::Hash;

    #[derive(Debug, Default)]
    pub struct Map<K, V>(HashMap<K, V>);

    impl<K, V> Map<K, V>
    where
        K: Eq + Hash,
        V: Clone + Default,
    {
        pub fn get_or_create(&mut self, key: K) -> V {
            self.0.entry(key).or_insert_with(V::default).clone()
        }
    }
}

impl<T> Metric<T>
where
    T: MetricKind,
{
    fn new(name: &'static str, description: &'static str) -> Self {
        Self {
            name,
            description,
            shared: Default::default(),
        }
    }

    /// Name this metric was registered under.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Description this metric was registered with.
    pub fn description(&self) -> &'static str {
        self.description
    }

    /// Return the recorder for the given attribute set, creating it on first use.
    pub fn recorder(&self, attributes: impl Into<Attributes>) -> T {
        self.shared.lock().get_or_create(attributes.into())
    }
}

impl<T> Clone for Metric<T>
where
    T: MetricKind,
{
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            description: self.description,
            shared: Arc::clone(&self.shared),
        }
    }
}
