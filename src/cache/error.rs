//! Error types for the cache module.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while addressing, writing or reading cache entries.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The endpoint cannot be turned into a cache location.
    #[error("cannot derive cache key from endpoint {endpoint}")]
    InvalidKey {
        /// The rejected endpoint.
        endpoint: String,
    },

    /// No entry exists for the key.
    #[error("cache entry not found: {path}")]
    NotFound {
        /// Where the entry was expected.
        path: PathBuf,
    },

    /// File system error while writing or opening an entry.
    #[error("cache IO error at {path}: {source}")]
    Io {
        /// The file or directory involved.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

impl CacheError {
    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates an invalid key error.
    pub fn invalid_key(endpoint: impl Into<String>) -> Self {
        Self::InvalidKey {
            endpoint: endpoint.into(),
        }
    }
}
