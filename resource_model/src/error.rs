//! The closed error taxonomy every component in `cache_core` returns (SPEC_FULL §7).
//!
//! Each variant boxes its underlying cause the way the reference codebase's `WriteBufferError`
//! does, so callers can match on a stable variant without losing the original error for logging.

use snafu::Snafu;
use std::fmt;

/// Result alias used throughout the cache core.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The HTTP status class a variant maps to, for the (out-of-scope) transport layer to reuse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    /// 400
    BadRequest,
    /// 404
    NotFound,
    /// 409
    Conflict,
    /// 503
    ServiceUnavailable,
    /// 500
    Internal,
}

/// The closed error taxonomy surfaced by the cache core.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    /// No row matches the requested key.
    #[snafu(display("not found: {key}"))]
    NotFound {
        /// The key that was not found.
        key: String,
    },

    /// A write observed a revision older than the row's current revision.
    #[snafu(display("conflict on {key}: expected revision {expected}, found {actual}"))]
    Conflict {
        /// Key in conflict.
        key: String,
        /// Revision the caller expected.
        expected: i64,
        /// Revision actually present.
        actual: i64,
    },

    /// The cache for this kind is mid-reset; retry shortly.
    #[snafu(display("cache for kind {kind} is resetting"))]
    ResetInProgress {
        /// Kind whose cache is resetting.
        kind: String,
    },

    /// The Informer for this kind has not completed its initial sync.
    #[snafu(display("cache for kind {kind} has not completed its initial sync"))]
    NotSynced {
        /// Kind whose cache is not yet synced.
        kind: String,
    },

    /// A malformed query: unknown field, invalid resume token, zero-size page, etc.
    #[snafu(display("bad request: {message}"))]
    BadRequest {
        /// Human-readable explanation.
        message: String,
    },

    /// A SQL-layer failure.
    #[snafu(display("sql error: {source}"))]
    Sql {
        /// Underlying driver error.
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// An I/O failure (file open, disk full, ...).
    #[snafu(display("io error: {source}"))]
    Io {
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A payload failed to decrypt or decode.
    #[snafu(display("decode error for {key}: {message}"))]
    Decode {
        /// Key whose payload failed to decode.
        key: String,
        /// Human-readable explanation.
        message: String,
    },

    /// The supplied [`crate::options::ListOptions`]/[`crate::schema::Schema`]/`Config`
    /// combination is structurally invalid (not a per-request bad request; a construction-time
    /// misconfiguration).
    #[snafu(display("invalid configuration: {message}"))]
    InvalidConfig {
        /// Human-readable explanation.
        message: String,
    },
}

impl Error {
    /// Construct a [`Error::BadRequest`].
    pub fn bad_request(message: impl fmt::Display) -> Self {
        Error::BadRequest {
            message: message.to_string(),
        }
    }

    /// Construct a [`Error::NotFound`].
    pub fn not_found(key: impl Into<String>) -> Self {
        Error::NotFound { key: key.into() }
    }

    /// Construct a [`Error::Decode`].
    pub fn decode(key: impl Into<String>, message: impl fmt::Display) -> Self {
        Error::Decode {
            key: key.into(),
            message: message.to_string(),
        }
    }

    /// Construct a [`Error::InvalidConfig`].
    pub fn invalid_config(message: impl fmt::Display) -> Self {
        Error::InvalidConfig {
            message: message.to_string(),
        }
    }

    /// Construct a [`Error::ResetInProgress`].
    pub fn reset_in_progress(kind: impl Into<String>) -> Self {
        Error::ResetInProgress { kind: kind.into() }
    }

    /// Construct a [`Error::NotSynced`].
    pub fn not_synced(kind: impl Into<String>) -> Self {
        Error::NotSynced { kind: kind.into() }
    }

    /// Whether the Informer's state machine should treat this error as transient and loop back
    /// to *listing* with backoff, rather than surface it to a caller (SPEC_FULL §7).
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Sql { .. } | Error::Io { .. })
    }

    /// The status class a transport layer should map this variant to (SPEC_FULL §6).
    pub fn status_class(&self) -> StatusClass {
        match self {
            Error::NotFound { .. } => StatusClass::NotFound,
            Error::Conflict { .. } => StatusClass::Conflict,
            Error::ResetInProgress { .. } | Error::NotSynced { .. } => StatusClass::ServiceUnavailable,
            Error::BadRequest { .. } => StatusClass::BadRequest,
            Error::Sql { .. } | Error::Io { .. } | Error::Decode { .. } | Error::InvalidConfig { .. } => {
                StatusClass::Internal
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_class_matches_taxonomy() {
        assert_eq!(
            Error::ResetInProgress { kind: "secrets".into() }.status_class(),
            StatusClass::ServiceUnavailable
        );
        assert_eq!(Error::bad_request("nope").status_class(), StatusClass::BadRequest);
    }

    #[test]
    fn sql_and_io_errors_are_retryable() {
        assert!(Error::Io {
            source: std::io::Error::new(std::io::ErrorKind::Other, "disk full")
        }
        .is_retryable());
        assert!(!Error::bad_request("nope").is_retryable());
    }
}
