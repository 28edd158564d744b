//! Utilities shared by the test suites of every crate in the workspace.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(missing_debug_implementations, missing_docs)]

use std::sync::Once;

static LOG_SETUP: Once = Once::new();

/// Install a `tracing` subscriber driven by `RUST_LOG`, once per process.
///
/// Tests that want to see informer/store logging should call this first; repeated calls
/// (e.g. from many `#[test]` functions in the same binary) are cheap no-ops after the first.
pub fn maybe_start_logging() {
    LOG_SETUP.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .init();
    });
}

/// A scratch SQLite database file path inside a [`tempfile::TempDir`] that is deleted on drop.
#[derive(Debug)]
pub struct ScratchDb {
    _dir: tempfile::TempDir,
    path: std::path::PathBuf,
}

impl ScratchDb {
    /// Allocate a new, not-yet-created, scratch database path for `kind`.
    pub fn new(kind: &str) -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let path = dir.path().join(format!("{kind}.db"));
        Self { _dir: dir, path }
    }

    /// `sqlite:<path>?mode=rwc` connection URI for this scratch database.
    pub fn uri(&self) -> String {
        format!("sqlite:{}?mode=rwc", self.path.display())
    }

    /// Filesystem path of this scratch database, for APIs that take a bare path rather than a
    /// connection URI.
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

#[cfg(feature = "future_timeout")]
mod timeout {
    use std::{future::Future, time::Duration};

    /// Bound how long a test will wait on a future before panicking.
    ///
    /// Async tests that exercise debounce coalescing or watch-stream backoff should wrap their
    /// awaits in this so a regression hangs the one test instead of the whole run.
    pub async fn with_timeout<F>(duration: Duration, fut: F) -> F::Output
    where
        F: Future,
    {
        tokio::time::timeout(duration, fut)
            .await
            .expect("future did not complete within timeout")
    }
}

#[cfg(feature = "future_timeout")]
pub use timeout::with_timeout;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scratch_db_uri_points_at_kind_file() {
        let db = ScratchDb::new("widgets");
        assert!(db.uri().ends_with("widgets.db?mode=rwc"));
    }
}
