//! Process-wide configuration (SPEC_FULL §4.8).

use resource_model::Error;
use std::time::Duration;

/// Configuration for a [`crate::factory::CacheFactory`] and the Stores/Informers it creates.
///
/// Constructed once at process start (see `cache_cli` for the `clap`-driven entry point) and
/// threaded explicitly into the factory; nothing here is read from ambient global state.
#[derive(Debug, Clone)]
pub struct Config {
    /// Upstream client rate limit, queries per second.
    pub client_qps: f64,
    /// Upstream client burst allowance.
    pub client_burst: u32,
    /// If true, `client_qps`/`client_burst` are divided across concurrent clients rather than
    /// applied per client.
    pub shared_rate_limit: bool,
    /// If true, encrypt every kind's `blob` column, not just the default sensitive set.
    pub encrypt_all: bool,
    /// Writes per DEK before rotation.
    pub dek_rotate_writes: u64,
    /// Page size cap applied when a query specifies none.
    pub default_limit: u32,
    /// List-page size the Informer uses when paging through `list`.
    pub chunk_size: u32,
    /// Default listener coalescing interval.
    pub debounce_interval: Duration,
    /// Grace period before a zero-refcount cache is torn down.
    pub idle_ttl: Duration,
    /// Directory holding the per-kind SQLite files.
    pub db_dir: std::path::PathBuf,
    /// `RUST_LOG`-style filter string for the ambient tracing subscriber.
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            client_qps: 50.0,
            client_burst: 100,
            shared_rate_limit: false,
            encrypt_all: false,
            dek_rotate_writes: 150_000,
            default_limit: 100_000,
            chunk_size: 1_000,
            debounce_interval: Duration::from_millis(100),
            idle_ttl: Duration::from_secs(60),
            db_dir: std::path::PathBuf::from("."),
            log_filter: "info".to_string(),
        }
    }
}

impl Config {
    /// Validate the configuration, rejecting combinations that would only fail later inside a
    /// write (SPEC_FULL §4.8).
    pub fn validate(self) -> Result<Self, Error> {
        if self.dek_rotate_writes == 0 {
            return Err(Error::invalid_config("dek_rotate_writes must be > 0"));
        }
        if self.default_limit == 0 {
            return Err(Error::invalid_config("default_limit must be > 0"));
        }
        if self.chunk_size == 0 {
            return Err(Error::invalid_config("chunk_size must be > 0"));
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn zero_dek_rotate_writes_is_rejected() {
        let cfg = Config {
            dek_rotate_writes: 0,
            ..Config::default()
        };
        assert!(cfg.validate().is_err());
    }
}
