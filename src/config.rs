//! Explicit configuration shared by all components.
//!
//! A [`Config`] is built once by the caller and handed to the factories
//! below. Nothing is read from global state.

use std::path::PathBuf;

use crate::cache::{Cache, DEFAULT_COMPRESS_THRESHOLD};
use crate::harvest::{HarvestOptions, Harvester};
use crate::info::Describer;
use crate::paginate::{DEFAULT_MAX_REQUESTS, Paginator};
use crate::transport::{Transport, TransportError, TransportOptions};

/// Directory name of the default cache below the home directory.
pub const DEFAULT_CACHE_DIR: &str = ".oai-mirror";

/// Where and how harvested windows are stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheOptions {
    pub root: PathBuf,
    /// Entries at or above this many bytes are gzip-compressed.
    pub compress_threshold: usize,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            root: PathBuf::from(DEFAULT_CACHE_DIR),
            compress_threshold: DEFAULT_COMPRESS_THRESHOLD,
        }
    }
}

/// Composition of transport, cache and harvest settings.
#[derive(Debug, Clone)]
pub struct Config {
    pub transport: TransportOptions,
    pub cache: CacheOptions,
    pub harvest: HarvestOptions,
    /// Ceiling on HTTP exchanges per logical request; zero means unlimited.
    pub max_requests: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            transport: TransportOptions::default(),
            cache: CacheOptions::default(),
            harvest: HarvestOptions::default(),
            max_requests: DEFAULT_MAX_REQUESTS,
        }
    }
}

impl Config {
    /// Builds the HTTP transport.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Client`] if the HTTP client cannot be built.
    pub fn transport(&self) -> Result<Transport, TransportError> {
        Transport::new(self.transport.clone())
    }

    /// Builds a paginator over a fresh transport.
    ///
    /// # Errors
    ///
    /// See [`Config::transport`].
    pub fn paginator(&self) -> Result<Paginator, TransportError> {
        Ok(Paginator::new(self.transport()?, self.max_requests))
    }

    #[must_use]
    pub fn cache(&self) -> Cache {
        Cache::new(self.cache.root.clone()).with_compress_threshold(self.cache.compress_threshold)
    }

    /// Builds a harvester.
    ///
    /// # Errors
    ///
    /// See [`Config::transport`].
    pub fn harvester(&self) -> Result<Harvester, TransportError> {
        Ok(Harvester::new(
            self.paginator()?,
            self.cache(),
            self.harvest.clone(),
        ))
    }

    /// Builds a describer sharing the harvest settings' lenient codes.
    ///
    /// # Errors
    ///
    /// See [`Config::transport`].
    pub fn describer(&self) -> Result<Describer, TransportError> {
        Ok(Describer::new(
            self.paginator()?,
            self.harvest.lenient_codes.clone(),
        ))
    }
}
