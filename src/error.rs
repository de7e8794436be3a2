//! Error taxonomy for the file-serving engine.
//!
//! Mirrors the status-code taxonomy the handler dispatches on (§7): every
//! variant here corresponds to exactly one non-2xx outcome. `304 Not
//! Modified` is not an error at all and never constructs one; it's a
//! distinct short-circuit the handler builds directly.

use std::path::PathBuf;

use thiserror::Error;

/// Errors produced while resolving, caching, or serving a request path.
#[derive(Debug, Error)]
pub enum ServeError {
    /// Missing path, permission error on metadata, or prefix-escape. Maps to `404`.
    #[error("not found: {key}")]
    NotFound {
        /// The request-relative key that could not be resolved.
        key: String,
    },

    /// Permission denied opening the file itself (after a successful stat). Maps to `403`.
    #[error("forbidden: {path}")]
    Forbidden {
        /// The path that could not be opened.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Range request outside §4.7's satisfiable bounds. Maps to `416`.
    #[error("range not satisfiable for {key} (size {size}): {requested}")]
    RangeUnsatisfiable {
        /// The request-relative key.
        key: String,
        /// The resource's total size in bytes.
        size: u64,
        /// Human-readable description of the requested range.
        requested: String,
    },

    /// Out of file descriptors even after yielding once. Maps to `503`.
    #[error("server overloaded: {reason}")]
    Overloaded {
        /// What resource was exhausted.
        reason: &'static str,
    },

    /// Header assembly, socket write, or template render failure. Maps to `500`.
    #[error("internal error serving {key}: {reason}")]
    Internal {
        /// The request-relative key being served when the failure occurred.
        key: String,
        /// Description of the failure.
        reason: String,
    },
}

impl ServeError {
    /// Creates a [`ServeError::NotFound`].
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    /// Creates a [`ServeError::Forbidden`].
    pub fn forbidden(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Forbidden {
            path: path.into(),
            source,
        }
    }

    /// Creates a [`ServeError::RangeUnsatisfiable`].
    pub fn range_unsatisfiable(
        key: impl Into<String>,
        size: u64,
        requested: impl Into<String>,
    ) -> Self {
        Self::RangeUnsatisfiable {
            key: key.into(),
            size,
            requested: requested.into(),
        }
    }

    /// Creates a [`ServeError::Overloaded`].
    pub fn overloaded(reason: &'static str) -> Self {
        Self::Overloaded { reason }
    }

    /// Creates a [`ServeError::Internal`].
    pub fn internal(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Internal {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Maps this error to the HTTP status code the handler must reply with.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotFound { .. } => 404,
            Self::Forbidden { .. } => 403,
            Self::RangeUnsatisfiable { .. } => 416,
            Self::Overloaded { .. } => 503,
            Self::Internal { .. } => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_taxonomy() {
        assert_eq!(ServeError::not_found("x").status_code(), 404);
        assert_eq!(
            ServeError::forbidden("x", std::io::Error::other("denied")).status_code(),
            403
        );
        assert_eq!(
            ServeError::range_unsatisfiable("x", 10, "bytes=20-30").status_code(),
            416
        );
        assert_eq!(ServeError::overloaded("fd").status_code(), 503);
        assert_eq!(ServeError::internal("x", "write failed").status_code(), 500);
    }

    #[test]
    fn messages_carry_context() {
        let err = ServeError::range_unsatisfiable("big.bin", 20_000, "bytes=30000-");
        let msg = err.to_string();
        assert!(msg.contains("big.bin"));
        assert!(msg.contains("20000"));
    }
}
