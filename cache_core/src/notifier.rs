//! Debounced, filtered mutation notifications (SPEC_FULL §4.5).

use observability_deps::tracing::warn;
use resource_model::Document;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// `{name?, namespace?, labelSelector?}` — a listener only sees mutations matching all of the
/// fields it sets.
#[derive(Debug, Clone, Default)]
pub struct NotifyFilter {
    /// Exact object name to match, if set.
    pub name: Option<String>,
    /// Exact namespace to match, if set.
    pub namespace: Option<String>,
    /// Label subset that must be present on the object, if set.
    pub label_selector: BTreeMap<String, String>,
}

impl NotifyFilter {
    /// Whether this filter matches `key`/`doc`. `doc` is `None` for delete events, in which case
    /// only name/namespace (derived from `key`) are checked; a label selector cannot be evaluated
    /// without the deleted object's last known labels, so it is skipped (documented
    /// simplification, see DESIGN.md).
    fn matches(&self, key: &str, doc: Option<&Document>) -> bool {
        let (key_namespace, key_name) = split_key(key);
        let namespace = doc
            .and_then(|d| d.get_path(&resource_model::document::parse_path("metadata.namespace")).as_storage_string())
            .or_else(|| key_namespace.map(str::to_string));
        let name = doc
            .and_then(|d| d.get_path(&resource_model::document::parse_path("metadata.name")).as_storage_string())
            .or_else(|| key_name.map(str::to_string));

        if let Some(want) = &self.name {
            if name.as_deref() != Some(want.as_str()) {
                return false;
            }
        }
        if let Some(want) = &self.namespace {
            if namespace.as_deref() != Some(want.as_str()) {
                return false;
            }
        }
        if !self.label_selector.is_empty() {
            match doc {
                Some(doc) => {
                    for (label, value) in &self.label_selector {
                        let path = resource_model::document::parse_path(&format!("metadata.labels.{label}"));
                        if doc.get_path(&path).as_storage_string().as_deref() != Some(value.as_str()) {
                            return false;
                        }
                    }
                }
                None => return true,
            }
        }
        true
    }
}

fn split_key(key: &str) -> (Option<&str>, Option<&str>) {
    match key.split_once('/') {
        Some((ns, name)) => (Some(ns), Some(name)),
        None => (None, Some(key)),
    }
}

/// One coalesced notification: the latest revision observed during a debounce window, and every
/// key that contributed to it.
#[derive(Debug, Clone)]
pub struct NotifyEvent {
    /// Latest revision seen during the debounce window.
    pub revision: i64,
    /// Every key that matched the listener's filter during the window.
    pub keys: BTreeSet<String>,
}

struct ListenerState {
    filter: NotifyFilter,
    debounce: Duration,
    pending: parking_lot::Mutex<Option<NotifyEvent>>,
    scheduled: AtomicBool,
    dead: AtomicBool,
    callback: parking_lot::Mutex<Box<dyn FnMut(NotifyEvent) + Send>>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for ListenerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerState")
            .field("filter", &self.filter)
            .field("debounce", &self.debounce)
            .field("dead", &self.dead.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl ListenerState {
    fn record(self: &Arc<Self>, key: &str, revision: i64, old: Option<&Document>, new: Option<&Document>) {
        if self.dead.load(Ordering::Acquire) {
            return;
        }
        if !self.filter.matches(key, new) && !self.filter.matches(key, old) {
            return;
        }

        {
            let mut pending = self.pending.lock();
            let event = pending.get_or_insert_with(|| NotifyEvent {
                revision,
                keys: BTreeSet::new(),
            });
            event.revision = event.revision.max(revision);
            event.keys.insert(key.to_string());
        }

        if !self.scheduled.swap(true, Ordering::AcqRel) {
            let this = Arc::clone(self);
            tokio::spawn(async move {
                tokio::select! {
                    _ = this.cancel.cancelled() => return,
                    _ = tokio::time::sleep(this.debounce) => {}
                }
                this.scheduled.store(false, Ordering::Release);
                let event = this.pending.lock().take();
                if let Some(event) = event {
                    this.fire(event);
                }
            });
        }
    }

    fn fire(&self, event: NotifyEvent) {
        let mut callback = self.callback.lock();
        let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
            (callback)(event);
        }));
        if result.is_err() {
            warn!("notifier listener panicked, deregistering");
            self.dead.store(true, Ordering::Release);
            self.cancel.cancel();
        }
    }
}

/// Handle returned by [`Notifier::register`]; dropping it (or calling
/// [`ListenerHandle::unregister`] explicitly) stops further delivery and drains any pending
/// timer.
#[derive(Debug)]
pub struct ListenerHandle {
    id: u64,
    notifier: Arc<NotifierShared>,
}

impl ListenerHandle {
    /// Stop delivery to this listener.
    pub fn unregister(self) {
        // Drop does the work; this just gives callers an explicit, named verb.
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        if let Some(state) = self.notifier.listeners.lock().remove(&self.id) {
            state.cancel.cancel();
        }
    }
}

#[derive(Debug)]
struct NotifierShared {
    listeners: parking_lot::Mutex<HashMap<u64, Arc<ListenerState>>>,
    next_id: AtomicU64,
}

/// Fans out every Store mutation to registered, debounced, filtered listeners (SPEC_FULL §4.5).
#[derive(Debug, Clone)]
pub struct Notifier {
    shared: Arc<NotifierShared>,
}

impl Notifier {
    /// Construct an empty notifier.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(NotifierShared {
                listeners: parking_lot::Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Register a new listener. The returned handle must be kept alive for as long as
    /// notifications are wanted; dropping it cancels delivery and drains any pending timer.
    pub fn register(
        &self,
        filter: NotifyFilter,
        debounce: Duration,
        callback: impl FnMut(NotifyEvent) + Send + 'static,
    ) -> ListenerHandle {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let state = Arc::new(ListenerState {
            filter,
            debounce,
            pending: parking_lot::Mutex::new(None),
            scheduled: AtomicBool::new(false),
            dead: AtomicBool::new(false),
            callback: parking_lot::Mutex::new(Box::new(callback)),
            cancel: CancellationToken::new(),
        });
        self.shared.listeners.lock().insert(id, state);
        ListenerHandle {
            id,
            notifier: Arc::clone(&self.shared),
        }
    }

    /// Notify every registered listener of a mutation. Called by the [`crate::informer::Informer`]
    /// after every successful `upsert`/`delete`.
    pub fn notify(&self, key: &str, revision: i64, old: Option<&Document>, new: Option<&Document>) {
        let listeners: Vec<Arc<ListenerState>> = self.shared.listeners.lock().values().cloned().collect();
        for listener in listeners {
            listener.record(key, revision, old, new);
        }
    }

    /// Number of currently registered listeners, for tests and diagnostics.
    pub fn listener_count(&self) -> usize {
        self.shared.listeners.lock().len()
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use resource_model::Document;
    use std::sync::mpsc;

    fn doc_with_name(name: &str) -> Document {
        let mut metadata = std::collections::BTreeMap::new();
        metadata.insert("name".to_string(), Document::String(name.to_string()));
        let mut top = std::collections::BTreeMap::new();
        top.insert("metadata".to_string(), Document::Map(metadata));
        Document::Map(top)
    }

    #[tokio::test(start_paused = true)]
    async fn burst_within_window_coalesces_to_one_notification() {
        let notifier = Notifier::new();
        let (tx, rx) = mpsc::channel();
        let _handle = notifier.register(
            NotifyFilter {
                name: Some("foo".into()),
                ..Default::default()
            },
            Duration::from_millis(100),
            move |event| {
                tx.send(event).expect("receiver gone");
            },
        );

        for revision in 1..=50 {
            notifier.notify("foo", revision, None, Some(&doc_with_name("foo")));
            tokio::time::advance(Duration::from_millis(1)).await;
        }

        tokio::time::advance(Duration::from_millis(150)).await;
        tokio::task::yield_now().await;

        let event = rx.try_recv().expect("expected exactly one notification");
        assert_eq!(event.revision, 50);
        assert!(rx.try_recv().is_err(), "expected no further notifications");
    }

    #[tokio::test(start_paused = true)]
    async fn non_matching_key_produces_no_notification() {
        let notifier = Notifier::new();
        let (tx, rx) = mpsc::channel();
        let _handle = notifier.register(
            NotifyFilter {
                name: Some("foo".into()),
                ..Default::default()
            },
            Duration::from_millis(100),
            move |event| {
                tx.send(event).expect("receiver gone");
            },
        );

        for revision in 1..=50 {
            notifier.notify("bar", revision, None, Some(&doc_with_name("bar")));
        }
        tokio::time::advance(Duration::from_millis(150)).await;
        tokio::task::yield_now().await;

        assert!(rx.try_recv().is_err());
    }
}
