//! The function a [`crate::cache::driver::CacheDriver`] calls on a miss.

use async_trait::async_trait;
use std::fmt::Debug;

/// Loads a value for a key on a cache miss.
#[async_trait]
pub trait Loader: Debug + Send + Sync + 'static {
    /// Cache key.
    type K: Send + 'static;
    /// Cache value.
    type V: Send + 'static;
    /// Extra context passed alongside the key at call time (e.g. a deadline or span).
    type Extra: Send + 'static;

    /// Compute the value for `k`.
    async fn load(&self, k: Self::K, extra: Self::Extra) -> Self::V;
}

/// Adapt a plain async closure into a [`Loader`].
pub struct FunctionLoader<K, V, Extra, F> {
    loader: F,
    _phantom: std::marker::PhantomData<fn() -> (K, V, Extra)>,
}

impl<K, V, Extra, F> FunctionLoader<K, V, Extra, F> {
    /// Wrap `loader` as a [`Loader`].
    pub fn new(loader: F) -> Self {
        Self {
            loader,
            _phantom: std::marker::PhantomData,
        }
    }
}

impl<K, V, Extra, F> Debug for FunctionLoader<K, V, Extra, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionLoader").finish_non_exhaustive()
    }
}

#[async_trait]
impl<K, V, Extra, F, Fut> Loader for FunctionLoader<K, V, Extra, F>
where
    K: Send + 'static,
    V: Send + 'static,
    Extra: Send + 'static,
    F: Fn(K, Extra) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = V> + Send,
{
    type K = K;
    type V = V;
    type Extra = Extra;

    async fn load(&self, k: Self::K, extra: Self::Extra) -> Self::V {
        (self.loader)(k, extra).await
    }
}
