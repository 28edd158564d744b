//! Keyed-by-`(kind, field-set)` cache of opened Stores/Informers, with refcounting, idle-TTL
//! teardown, and reset coordination (SPEC_FULL §4.4).

use crate::config::Config;
use crate::encryption::EncryptionManager;
use crate::informer::{Informer, InformerState};
use crate::notifier::Notifier;
use crate::store::{query::QueryResult, Store};
use async_trait::async_trait;
use cache_system::cache::driver::CacheDriver;
use cache_system::loader::Loader;
use cache_system::Cache;
use clock::TimeProvider;
use observability_deps::tracing::{info, warn};
use parking_lot::Mutex as PlMutex;
use resource_model::{Error, ResourceClient, Schema};
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Supplies a [`ResourceClient`] for a kind. The concrete upstream transport (auth, rate
/// limiting via `client_qps`/`client_burst`/`shared_rate_limit`) lives above this crate; the
/// factory only needs a handle to drive its Informer (SPEC_FULL §6).
pub trait ClientSource: Debug + Send + Sync + 'static {
    /// Build (or hand out a shared handle to) the client for `schema.kind`.
    fn client_for(&self, schema: &Schema) -> Arc<dyn ResourceClient>;
}

/// Cache identity: `(kind, field-set)`. Two callers opening the same kind with the same indexed
/// field set share one cache; a different field set populates a different `fields` schema and so
/// gets its own (SPEC_FULL §4.4).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
struct CacheKey {
    kind: String,
    fields: Vec<String>,
}

impl CacheKey {
    fn new(schema: &Schema) -> Self {
        let mut fields: Vec<String> = schema.indexed_fields.iter().map(|f| f.column_name()).collect();
        fields.sort();
        Self {
            kind: schema.kind.sanitized(),
            fields,
        }
    }
}

/// Everything backing one opened `(kind, field-set)` cache: the Store, its driving Informer, and
/// its Notifier, plus the background task running the Informer's list→watch loop.
#[derive(Debug)]
struct OpenedCache {
    store: Arc<Store>,
    informer: Arc<Informer>,
    notifier: Arc<Notifier>,
    task: JoinHandle<()>,
}

impl Drop for OpenedCache {
    fn drop(&mut self) {
        self.informer.stop();
        self.task.abort();
    }
}

type OpenResult = Result<Arc<OpenedCache>, Arc<Error>>;

#[derive(Debug)]
struct FactoryLoader {
    config: Config,
    registry: Arc<metric::Registry>,
    encryption: Arc<EncryptionManager>,
    clients: Arc<dyn ClientSource>,
    clock: Arc<dyn TimeProvider>,
}

#[async_trait]
impl Loader for FactoryLoader {
    type K = CacheKey;
    type V = OpenResult;
    type Extra = Arc<Schema>;

    async fn load(&self, k: Self::K, schema: Self::Extra) -> Self::V {
        self.open(&k, schema).await.map_err(Arc::new)
    }
}

impl FactoryLoader {
    async fn open(&self, k: &CacheKey, schema: Arc<Schema>) -> Result<Arc<OpenedCache>, Error> {
        let encrypt = self.config.encrypt_all;
        let path = self.config.db_dir.join(format!("{}.db", k.kind));
        let store = Store::open(&path, Arc::clone(&schema), Arc::clone(&self.encryption), encrypt, &self.registry)
            .await?;
        let store = Arc::new(store);
        let informer = Arc::new(Informer::new(&self.registry));
        let notifier = Arc::new(Notifier::new());

        let client = self.clients.client_for(&schema);
        let kind = schema.kind.to_string();
        let chunk_size = self.config.chunk_size;
        let task_store = Arc::clone(&store);
        let task_informer = Arc::clone(&informer);
        let task_notifier = Arc::clone(&notifier);
        let clock = Arc::clone(&self.clock);
        let task = tokio::spawn(async move {
            task_informer
                .run(&kind, client.as_ref(), &task_store, chunk_size, clock.as_ref(), &task_notifier)
                .await;
        });

        Ok(Arc::new(OpenedCache {
            store,
            informer,
            notifier,
            task,
        }))
    }
}

struct RefCount {
    count: AtomicUsize,
    idle_task: PlMutex<Option<JoinHandle<()>>>,
}

/// A checked-out cache. Dropping it releases the reference; after `idle_ttl` with no
/// outstanding handles the factory tears the cache down (SPEC_FULL §4.4).
#[derive(Debug)]
pub struct CacheHandle {
    key_kind: String,
    key_fields: Vec<String>,
    opened: Arc<OpenedCache>,
    factory: Arc<FactoryShared>,
}

impl CacheHandle {
    /// The underlying per-kind Store.
    pub fn store(&self) -> &Store {
        &self.opened.store
    }

    /// The Informer driving this cache.
    pub fn informer(&self) -> &Informer {
        &self.opened.informer
    }

    /// The debounced notifier for this cache.
    pub fn notifier(&self) -> &Notifier {
        &self.opened.notifier
    }

    /// Run a compiled list query, failing fast with [`Error::NotSynced`] until this cache's
    /// Informer has completed its initial list (SPEC_FULL §4.4/§7) — the `Store` alone cannot
    /// tell an empty-but-synced kind apart from one that simply hasn't listed yet.
    pub async fn list_by_options(&self, options: &resource_model::ListOptions) -> Result<QueryResult, Error> {
        if !self.opened.informer.has_synced() {
            return Err(Error::not_synced(&self.key_kind));
        }
        self.opened.store.list_by_options(options).await
    }

    fn key(&self) -> CacheKey {
        CacheKey {
            kind: self.key_kind.clone(),
            fields: self.key_fields.clone(),
        }
    }
}

impl Drop for CacheHandle {
    fn drop(&mut self) {
        self.factory.release(self.key());
    }
}

#[derive(Debug)]
struct FactoryShared {
    config: Config,
    driver: CacheDriver<CacheKey, OpenResult, Arc<Schema>>,
    refcounts: PlMutex<HashMap<CacheKey, Arc<RefCount>>>,
}

impl FactoryShared {
    fn release(self: &Arc<Self>, key: CacheKey) {
        let refcount = {
            let refcounts = self.refcounts.lock();
            match refcounts.get(&key) {
                Some(rc) => Arc::clone(rc),
                None => return,
            }
        };

        if refcount.count.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }

        let idle_ttl = self.config.idle_ttl;
        let this = Arc::clone(self);
        let key_for_task = key.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(idle_ttl).await;
            if refcount.count.load(Ordering::Acquire) == 0 {
                info!(kind = %key_for_task.kind, "idle TTL elapsed, tearing down cache");
                this.driver.evict(key_for_task.clone()).await;
                this.refcounts.lock().remove(&key_for_task);
            }
        });
        if let Some(rc) = self.refcounts.lock().get(&key) {
            *rc.idle_task.lock() = Some(handle);
        }
    }
}

/// Owns every opened `(kind, field-set)` cache, de-duplicating concurrent opens through a
/// single-flight [`cache_system::cache::driver::CacheDriver`] and coordinating reset/teardown
/// (SPEC_FULL §4.4).
#[derive(Debug, Clone)]
pub struct CacheFactory {
    shared: Arc<FactoryShared>,
}

impl CacheFactory {
    /// Construct a factory for the given configuration, metric registry, encryption manager,
    /// upstream client source, and clock.
    pub fn new(
        config: Config,
        registry: Arc<metric::Registry>,
        encryption: Arc<EncryptionManager>,
        clients: Arc<dyn ClientSource>,
        clock: Arc<dyn TimeProvider>,
    ) -> Self {
        let loader = Arc::new(FactoryLoader {
            config: config.clone(),
            registry,
            encryption,
            clients,
            clock,
        });
        let driver = CacheDriver::new(loader as _, Box::new(HashMap::new()));
        Self {
            shared: Arc::new(FactoryShared {
                config,
                driver,
                refcounts: PlMutex::new(HashMap::new()),
            }),
        }
    }

    /// Check out the cache for `schema`, opening it (or joining an in-flight open) if this is
    /// the first live reference.
    pub async fn cache_for(&self, schema: Arc<Schema>) -> Result<CacheHandle, Error> {
        let key = CacheKey::new(&schema);

        {
            let mut refcounts = self.shared.refcounts.lock();
            let entry = refcounts.entry(key.clone()).or_insert_with(|| {
                Arc::new(RefCount {
                    count: AtomicUsize::new(0),
                    idle_task: PlMutex::new(None),
                })
            });
            entry.count.fetch_add(1, Ordering::AcqRel);
            if let Some(task) = entry.idle_task.lock().take() {
                task.abort();
            }
        }

        let opened = self.shared.driver.get(key.clone(), schema).await;
        match opened {
            Ok(opened) => Ok(CacheHandle {
                key_kind: key.kind.clone(),
                key_fields: key.fields.clone(),
                opened,
                factory: Arc::clone(&self.shared),
            }),
            Err(e) => {
                self.shared.release(key);
                Err((*e).clone_for_caller())
            }
        }
    }

    /// Force teardown of `kind`'s cache (every field set), regardless of outstanding references.
    pub async fn stop(&self, kind: &str) {
        let keys: Vec<CacheKey> = self
            .shared
            .refcounts
            .lock()
            .keys()
            .filter(|k| k.kind == kind)
            .cloned()
            .collect();
        for key in keys {
            warn!(kind, "forced cache teardown");
            self.shared.driver.evict(key.clone()).await;
            self.shared.refcounts.lock().remove(&key);
        }
    }

    /// Drop and recreate `kind`'s on-disk state in place and nudge its Informer back into the
    /// *listing* state (SPEC_FULL §4.4). Existing [`CacheHandle`]s stay open throughout; queries
    /// racing the reset fail fast with [`Error::ResetInProgress`] (via [`CacheHandle::list_by_options`]
    /// going through [`Store::list_by_options`]) rather than observing a half-dropped Store.
    pub async fn reset(&self, kind: &str) -> Result<(), Error> {
        let keys: Vec<CacheKey> = self
            .shared
            .refcounts
            .lock()
            .keys()
            .filter(|k| k.kind == kind)
            .cloned()
            .collect();

        for key in keys {
            if let Some(Ok(opened)) = self.shared.driver.peek(key.clone(), ()).await {
                opened.store.begin_reset();
                let reset_result = opened.store.reset().await;
                if let Err(e) = reset_result {
                    opened.store.end_reset();
                    return Err(e);
                }
                opened.informer.trigger_resync();

                let opened = Arc::clone(&opened);
                tokio::spawn(async move {
                    wait_for_resync_cycle(&opened.informer).await;
                    opened.store.end_reset();
                });
            }
        }
        Ok(())
    }
}

/// Block until the Informer has gone through one full `Listing` cycle following a
/// [`Informer::trigger_resync`] call, polling the same way `cache_cli`'s `wait_for_sync` already
/// does rather than adding a second notification channel. `has_synced` cannot be reused here: it
/// latches true forever after the *first* sync and never reports a later resync starting or
/// finishing.
async fn wait_for_resync_cycle(informer: &Informer) {
    while informer.state() != InformerState::Listing {
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    while informer.state() == InformerState::Listing {
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
}

impl Error {
    /// Clone an `Arc<Error>` back into an owned `Error` for callers that expect one, preserving
    /// the variant but re-boxing any inner source as an opaque string (the original source isn't
    /// `Clone`, only `Error` variants with owned fields are).
    fn clone_for_caller(&self) -> Error {
        match self {
            Error::NotFound { key } => Error::NotFound { key: key.clone() },
            Error::Conflict { key, expected, actual } => Error::Conflict {
                key: key.clone(),
                expected: *expected,
                actual: *actual,
            },
            Error::ResetInProgress { kind } => Error::ResetInProgress { kind: kind.clone() },
            Error::NotSynced { kind } => Error::NotSynced { kind: kind.clone() },
            Error::BadRequest { message } => Error::BadRequest { message: message.clone() },
            Error::Sql { source } => Error::Sql {
                source: Box::new(std::io::Error::new(std::io::ErrorKind::Other, source.to_string())),
            },
            Error::Io { source } => Error::Io {
                source: std::io::Error::new(source.kind(), source.to_string()),
            },
            Error::Decode { key, message } => Error::Decode {
                key: key.clone(),
                message: message.clone(),
            },
            Error::InvalidConfig { message } => Error::InvalidConfig { message: message.clone() },
        }
    }
}
