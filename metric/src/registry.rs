use crate::{Metric, MetricKind};
use parking_lot::Mutex;
use std::{any::Any, collections::BTreeMap, fmt::Debug, sync::Arc};

/// Tracks every [`Metric`] created via [`Registry::register_metric`], de-duplicated by name.
///
/// Calling `register_metric` twice with the same name returns clones of the same underlying
/// [`Metric`], so independent components (the Store, the Informer, the CacheFactory) can each
/// register a counter with the same name/description and land on the same series.
#[derive(Debug, Default)]
pub struct Registry {
    metrics: Mutex<BTreeMap<&'static str, Arc<dyn Any + Send + Sync>>>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or fetch an existing registration of) a metric of kind `T`.
    pub fn register_metric<T>(&self, name: &'static str, description: &'static str) -> Metric<T>
    where
        T: MetricKind,
    {
        let mut metrics = self.metrics.lock();
        let entry = metrics
            .entry(name)
            .or_insert_with(|| Arc::new(Metric::<T>::new(name, description)));
        entry
            .clone()
            .downcast::<Metric<T>>()
            .expect("metric re-registered under the same name with a different kind")
            .as_ref()
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::U64Counter;

    #[test]
    fn same_name_shares_series() {
        let registry = Registry::new();
        let a: Metric<U64Counter> = registry.register_metric("writes", "total writes");
        let b: Metric<U64Counter> = registry.register_metric("writes", "total writes");

        a.recorder([("kind", "secret")]).inc();
        assert_eq!(b.recorder([("kind", "secret")]).fetch(), 1);
    }
}
