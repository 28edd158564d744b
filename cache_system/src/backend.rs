//! Storage backends for [`crate::cache::driver::CacheDriver`].

use std::{collections::HashMap, fmt::Debug, hash::Hash};

/// A place [`crate::cache::driver::CacheDriver`] keeps completed loads.
///
/// Implementations decide eviction policy; the driver only ever calls `get`/`set`.
pub trait CacheBackend: Debug + Send + 'static {
    /// Cache key.
    type K: Clone + Eq + Hash + Debug + Send + 'static;
    /// Cache value.
    type V: Clone + Debug + Send + 'static;

    /// Look up a key.
    fn get(&mut self, k: &Self::K) -> Option<Self::V>;

    /// Insert or overwrite a key.
    fn set(&mut self, k: Self::K, v: Self::V);

    /// Remove a key, if present.
    fn remove(&mut self, k: &Self::K);
}

impl<K, V> CacheBackend for HashMap<K, V>
where
    K: Clone + Eq + Hash + Debug + Send + 'static,
    V: Clone + Debug + Send + 'static,
{
    type K = K;
    type V = V;

    fn get(&mut self, k: &Self::K) -> Option<Self::V> {
        HashMap::get(self, k).cloned()
    }

    fn set(&mut self, k: Self::K, v: Self::V) {
        self.insert(k, v);
    }

    fn remove(&mut self, k: &Self::K) {
        HashMap::remove(self, k);
    }
}
