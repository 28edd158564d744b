//! Advisory watcher over a kind's upstream field/column catalogue (SPEC_FULL §4.6).

use crate::factory::CacheFactory;
use observability_deps::tracing::{info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// A point-in-time fingerprint of a kind's schema: its field list and column set. Two
/// fingerprints that compare unequal mean the upstream catalogue changed under us.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaFingerprint(Vec<String>);

impl SchemaFingerprint {
    /// Build a fingerprint from an unordered set of column names.
    pub fn new(mut columns: Vec<String>) -> Self {
        columns.sort();
        columns.dedup();
        Self(columns)
    }
}

/// Polls a kind's catalogue for schema drift. Purely advisory: it never touches a Store
/// directly, only asks the [`CacheFactory`] to reset the kind, which remains the sole authority
/// on when a drop-and-recreate actually happens.
pub trait CatalogueSource: std::fmt::Debug + Send + Sync + 'static {
    /// Fetch the current fingerprint for `kind`, if the kind is known upstream.
    fn fingerprint(&self, kind: &str) -> Option<SchemaFingerprint>;
}

/// Drives [`CatalogueSource`] polling for a fixed set of kinds, calling
/// [`CacheFactory::reset`] whenever a fingerprint changes.
#[derive(Debug)]
pub struct SchemaTracker {
    factory: CacheFactory,
    catalogue: Arc<dyn CatalogueSource>,
    poll_interval: Duration,
    cancel: CancellationToken,
}

impl SchemaTracker {
    /// Construct a tracker that will poll `catalogue` every `poll_interval` and reset kinds
    /// through `factory`.
    pub fn new(factory: CacheFactory, catalogue: Arc<dyn CatalogueSource>, poll_interval: Duration) -> Self {
        Self {
            factory,
            catalogue,
            poll_interval,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop the poll loop; observed at its next tick.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Poll `kinds` forever (until [`SchemaTracker::stop`]), resetting any kind whose
    /// fingerprint has drifted since the last poll. Intended to be spawned onto its own task.
    pub async fn run(&self, kinds: &[String]) {
        let mut last: HashMap<String, SchemaFingerprint> = HashMap::new();

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }

            for kind in kinds {
                let Some(current) = self.catalogue.fingerprint(kind) else {
                    continue;
                };
                match last.get(kind) {
                    Some(previous) if previous == &current => {}
                    Some(_) => {
                        warn!(kind, "upstream schema drift detected, resetting cache");
                        if let Err(e) = self.factory.reset(kind).await {
                            warn!(kind, error = %e, "schema-triggered reset failed");
                        }
                        last.insert(kind.clone(), current);
                    }
                    None => {
                        info!(kind, "schema tracker baseline established");
                        last.insert(kind.clone(), current);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_ignores_column_order() {
        let a = SchemaFingerprint::new(vec!["b".into(), "a".into()]);
        let b = SchemaFingerprint::new(vec!["a".into(), "b".into()]);
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_detects_added_column() {
        let a = SchemaFingerprint::new(vec!["a".into()]);
        let b = SchemaFingerprint::new(vec!["a".into(), "b".into()]);
        assert_ne!(a, b);
    }
}
