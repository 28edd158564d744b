//! The [`Cache`] trait and its single implementation, [`driver::CacheDriver`].

pub mod driver;

#[cfg(test)]
pub(crate) mod test_util;

use async_trait::async_trait;
use std::fmt::Debug;

/// How a [`Cache::get_with_status`] call was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheGetStatus {
    /// The value was already cached.
    Hit,

    /// The value was not cached and had to be loaded, with no other caller racing for it.
    Miss,

    /// The value was not cached, but another caller was already loading it, so this call joined
    /// that in-flight load instead of starting a second one.
    MissAlreadyLoading,
}

/// How a [`Cache::peek_with_status`] call was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePeekStatus {
    /// The value was already cached.
    Hit,

    /// The value was not cached, but another caller was already loading it, so this call joined
    /// that in-flight load instead of starting one.
    MissAlreadyLoading,
}

/// A generic key/value cache that de-duplicates concurrent misses for the same key.
#[async_trait]
pub trait Cache: Debug + Send + Sync + 'static {
    /// Cache key.
    type K: Send + 'static;
    /// Cache value.
    type V: Send + 'static;
    /// Extra context passed to [`Cache::get_with_status`] (e.g. a deadline).
    type GetExtra: Send + 'static;
    /// Extra context passed to [`Cache::peek_with_status`].
    type PeekExtra: Send + 'static;

    /// Get the value for `k`, loading it if necessary.
    async fn get_with_status(&self, k: Self::K, extra: Self::GetExtra) -> (Self::V, CacheGetStatus);

    /// Convenience wrapper around [`Cache::get_with_status`] that discards the status.
    async fn get(&self, k: Self::K, extra: Self::GetExtra) -> Self::V {
        self.get_with_status(k, extra).await.0
    }

    /// Look up `k` without starting a new load if it is neither cached nor already loading.
    async fn peek_with_status(
        &self,
        k: Self::K,
        extra: Self::PeekExtra,
    ) -> Option<(Self::V, CachePeekStatus)>;

    /// Convenience wrapper around [`Cache::peek_with_status`] that discards the status.
    async fn peek(&self, k: Self::K, extra: Self::PeekExtra) -> Option<Self::V> {
        self.peek_with_status(k, extra).await.map(|(v, _)| v)
    }

    /// Side-load a value, overriding any running query and any cached entry for `k`.
    async fn set(&self, k: Self::K, v: Self::V);

    /// Drop any cached entry and abort any running load for `k`, so the next [`Cache::get`]
    /// starts fresh.
    async fn evict(&self, k: Self::K);
}
