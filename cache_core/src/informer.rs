//! Runs the canonical list→watch loop against one [`ResourceClient`] (SPEC_FULL §4.3).

use crate::notifier::Notifier;
use crate::store::Store;
use backoff::{Backoff, BackoffConfig};
use clock::TimeProvider;
use futures::StreamExt;
use metric::{Metric, U64Counter};
use observability_deps::tracing::{info, warn};
use parking_lot::Mutex;
use resource_model::{Error, Page, ResourceClient, WatchEvent};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Where an [`Informer`] is in the list→watch lifecycle (SPEC_FULL §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InformerState {
    /// Not yet started.
    Initial,
    /// Running the initial `list` loop.
    Listing,
    /// Initial list complete; about to start watching.
    Synced,
    /// Consuming the upstream watch stream.
    Watching,
    /// The watch ended (expired/gone/closed/invalidated); relisting.
    Resyncing,
    /// Torn down by the enclosing factory.
    Stopped,
}

struct Shared {
    state: Mutex<InformerState>,
    has_synced: std::sync::atomic::AtomicBool,
    cancel: CancellationToken,
    resync_notify: Notify,
}

/// Drives one kind's Store from its [`ResourceClient`].
#[derive(Debug)]
pub struct Informer {
    shared: Arc<Shared>,
    transitions: Metric<U64Counter>,
}

impl std::fmt::Debug for Shared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shared")
            .field("state", &*self.state.lock())
            .field("has_synced", &self.has_synced.load(std::sync::atomic::Ordering::Relaxed))
            .finish()
    }
}

impl Informer {
    /// Create a new, not-yet-started informer. Call [`Informer::run`] to drive it.
    pub fn new(registry: &metric::Registry) -> Self {
        let transitions: Metric<U64Counter> =
            registry.register_metric("informer_state_transitions_total", "informer state machine transitions");
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(InformerState::Initial),
                has_synced: std::sync::atomic::AtomicBool::new(false),
                cancel: CancellationToken::new(),
                resync_notify: Notify::new(),
            }),
            transitions,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> InformerState {
        *self.shared.state.lock()
    }

    /// True from the first successful *synced* transition onward (SPEC_FULL §4.3 HasSynced).
    pub fn has_synced(&self) -> bool {
        self.shared.has_synced.load(std::sync::atomic::Ordering::Acquire)
    }

    /// Request a stop; idempotent, and observed by the running loop at its next yield point.
    pub fn stop(&self) {
        self.shared.cancel.cancel();
        *self.shared.state.lock() = InformerState::Stopped;
    }

    /// Force the loop to discard its watch and relist, e.g. from a [`crate::schema_tracker::SchemaTracker`]
    /// invalidation or a [`crate::factory::CacheFactory`] reset.
    pub fn trigger_resync(&self) {
        self.shared.resync_notify.notify_one();
    }

    fn transition(&self, kind: &str, to: InformerState) {
        *self.shared.state.lock() = to;
        if to == InformerState::Synced {
            self.shared.has_synced.store(true, std::sync::atomic::Ordering::Release);
        }
        self.transitions.recorder([("kind", kind), ("to", state_label(to))]).inc();
        info!(kind, state = state_label(to), "informer state transition");
    }

    /// Drive the list→watch loop until stopped. Intended to be spawned onto its own task.
    ///
    /// `notifier` is told about every successful mutation; listeners coalesce and filter on
    /// their own schedule (SPEC_FULL §4.5). The Informer never has the object's prior state
    /// cheaply available, so it always reports `old = None` — a documented simplification (see
    /// DESIGN.md) that only affects listeners with a label-selector filter on a delete event.
    pub async fn run(
        &self,
        kind: &str,
        client: &dyn ResourceClient,
        store: &Store,
        chunk_size: u32,
        clock: &dyn TimeProvider,
        notifier: &Notifier,
    ) {
        let backoff_config = BackoffConfig::default();

        loop {
            if self.shared.cancel.is_cancelled() {
                self.transition(kind, InformerState::Stopped);
                return;
            }

            self.transition(kind, InformerState::Listing);
            let mut backoff = Backoff::new(&backoff_config);
            let revision = backoff
                .retry_all_errors(kind, || self.run_list(kind, client, store, chunk_size, notifier))
                .await
                .unwrap_or_else(|never| match never {});
            let _ = clock.now();

            self.transition(kind, InformerState::Synced);
            self.transition(kind, InformerState::Watching);

            match self.run_watch(kind, client, store, revision, notifier).await {
                Ok(()) => {
                    self.transition(kind, InformerState::Resyncing);
                }
                Err(e) => {
                    warn!(kind, error = %e, "watch loop ended, resyncing");
                    self.transition(kind, InformerState::Resyncing);
                }
            }

            if self.shared.cancel.is_cancelled() {
                self.transition(kind, InformerState::Stopped);
                return;
            }
        }
    }

    async fn run_list(
        &self,
        kind: &str,
        client: &dyn ResourceClient,
        store: &Store,
        chunk_size: u32,
        notifier: &Notifier,
    ) -> Result<i64, Error> {
        let mut resume: Option<String> = None;
        let mut first = true;
        let mut revision = 0;

        loop {
            let page: Page = client.list(chunk_size, resume.clone()).await?;
            revision = page.revision;

            if first {
                store.replace(&page, revision).await?;
                first = false;
            } else {
                for item in &page.items {
                    store.upsert(&item.key, &item.document, revision).await?;
                }
            }
            for item in &page.items {
                notifier.notify(&item.key, revision, None, Some(&item.document));
            }

            match &page.next_resume_token {
                Some(token) => resume = Some(token.clone()),
                None => break,
            }
        }

        info!(kind, revision, "initial list complete");
        Ok(revision)
    }

    async fn run_watch(
        &self,
        kind: &str,
        client: &dyn ResourceClient,
        store: &Store,
        since_revision: i64,
        notifier: &Notifier,
    ) -> Result<(), Error> {
        let mut stream = client.watch(since_revision).await?;

        loop {
            tokio::select! {
                _ = self.shared.cancel.cancelled() => return Ok(()),
                _ = self.shared.resync_notify.notified() => return Ok(()),
                event = stream.next() => {
                    match event {
                        None => return Ok(()),
                        Some(WatchEvent::Added(item)) | Some(WatchEvent::Modified(item)) => {
                            store.upsert(&item.key, &item.document, item.revision).await?;
                            notifier.notify(&item.key, item.revision, None, Some(&item.document));
                        }
                        Some(WatchEvent::Deleted { key, revision }) => {
                            store.delete(&key, revision).await?;
                            notifier.notify(&key, revision, None, None);
                        }
                        Some(WatchEvent::Expired) | Some(WatchEvent::Gone) => {
                            info!(kind, "watch horizon expired, resyncing");
                            return Ok(());
                        }
                        Some(WatchEvent::Error(e)) => {
                            if e.is_retryable() {
                                warn!(kind, error = %e, "transient watch error, resyncing");
                                return Ok(());
                            }
                            return Err(e);
                        }
                    }
                }
            }
        }
    }
}

fn state_label(state: InformerState) -> &'static str {
    match state {
        InformerState::Initial => "initial",
        InformerState::Listing => "listing",
        InformerState::Synced => "synced",
        InformerState::Watching => "watching",
        InformerState::Resyncing => "resyncing",
        InformerState::Stopped => "stopped",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_informer_starts_uninitialized() {
        let registry = metric::Registry::new();
        let informer = Informer::new(&registry);
        assert_eq!(informer.state(), InformerState::Initial);
        assert!(!informer.has_synced());
    }

    #[test]
    fn stop_is_idempotent() {
        let registry = metric::Registry::new();
        let informer = Informer::new(&registry);
        informer.stop();
        informer.stop();
        assert_eq!(informer.state(), InformerState::Stopped);
    }
}
