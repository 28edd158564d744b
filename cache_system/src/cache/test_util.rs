//! A generic conformance test any [`Cache`] implementation can be run through.

use std::{
    collections::HashMap,
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::loader::Loader;

use super::{Cache, CacheGetStatus, CachePeekStatus};

/// Plugs a concrete [`Cache`] implementation into [`run_test_generic`].
pub trait TestAdapter: Send + Sync + 'static {
    /// Extra context passed to `get`.
    type GetExtra: Send;
    /// Extra context passed to `peek`.
    type PeekExtra: Send;
    /// The cache under test.
    type Cache: Cache<K = u8, V = String, GetExtra = Self::GetExtra, PeekExtra = Self::PeekExtra>;

    /// Build a fresh cache wired up to `loader`.
    fn construct(&self, loader: Arc<TestLoader>) -> Arc<Self::Cache>;

    /// Produce a `GetExtra` that carries `inner`.
    fn get_extra(&self, inner: bool) -> Self::GetExtra;

    /// Produce a `PeekExtra`.
    fn peek_extra(&self) -> Self::PeekExtra;
}

/// A [`Loader`] whose responses are scripted by the test and whose calls are recorded.
#[derive(Debug, Default)]
pub struct TestLoader {
    loaded: Mutex<Vec<(u8, bool)>>,
    responses: Mutex<HashMap<u8, String>>,
    blocking: Mutex<HashMap<u8, Arc<tokio::sync::Notify>>>,
}

impl TestLoader {
    /// Queue the value `load` should return the next time `k` is requested.
    pub fn mock_next(&self, k: u8, v: String) {
        self.responses.lock().insert(k, v);
    }

    /// Make `load(k, _)` wait on a notification before returning, so the test can observe an
    /// in-flight state.
    pub fn block_next(&self, k: u8) -> Arc<tokio::sync::Notify> {
        let notify = Arc::new(tokio::sync::Notify::new());
        self.blocking.lock().insert(k, Arc::clone(&notify));
        notify
    }

    /// All `(key, extra)` pairs seen by `load`, in call order.
    pub fn loaded(&self) -> Vec<(u8, bool)> {
        self.loaded.lock().clone()
    }
}

#[async_trait]
impl Loader for TestLoader {
    type K = u8;
    type V = String;
    type Extra = bool;

    async fn load(&self, k: Self::K, extra: Self::Extra) -> Self::V {
        self.loaded.lock().push((k, extra));

        if let Some(notify) = self.blocking.lock().remove(&k) {
            notify.notified().await;
        }

        self.responses
            .lock()
            .remove(&k)
            .unwrap_or_else(|| format!("value_{k}"))
    }
}

/// Exercise the hit/miss/side-load/dedup behavior every [`Cache`] implementation must provide.
pub async fn run_test_generic<A>(adapter: A)
where
    A: TestAdapter,
{
    let loader = Arc::new(TestLoader::default());
    let cache = adapter.construct(Arc::clone(&loader));

    // miss, then hit
    let (v, status) = cache
        .get_with_status(1, adapter.get_extra(true))
        .await;
    assert_eq!(v, "value_1");
    assert_eq!(status, CacheGetStatus::Miss);

    let (v, status) = cache
        .get_with_status(1, adapter.get_extra(false))
        .await;
    assert_eq!(v, "value_1");
    assert_eq!(status, CacheGetStatus::Hit);

    assert_eq!(loader.loaded(), vec![(1, true)]);

    // peek on an uncached, non-loading key returns nothing
    assert_eq!(cache.peek_with_status(2, adapter.peek_extra()).await, None);

    // concurrent misses for the same key join the one load
    let notify = loader.block_next(3);
    let cache_captured = Arc::clone(&cache);
    let get_extra = adapter.get_extra(true);
    let handle = tokio::spawn(async move { cache_captured.get_with_status(3, get_extra).await });

    // give the spawned get a chance to register itself as the running query
    tokio::task::yield_now().await;
    tokio::task::yield_now().await;

    let peeked = cache
        .peek_with_status(3, adapter.peek_extra())
        .await
        .expect("query for key 3 should be in flight");
    assert_eq!(peeked.1, CachePeekStatus::MissAlreadyLoading);

    notify.notify_one();
    let (v, status) = handle.await.unwrap();
    assert_eq!(v, "value_3");
    assert_eq!(status, CacheGetStatus::Miss);

    // side-loading overrides a cached value without calling the loader
    cache.set(1, "overridden".to_string()).await;
    let (v, _status) = cache
        .get_with_status(1, adapter.get_extra(false))
        .await;
    assert_eq!(v, "overridden");
    assert_eq!(loader.loaded().len(), 2);

    tokio::time::sleep(Duration::from_millis(1)).await;
}
