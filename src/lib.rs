//! OAI-PMH Mirror Library
//!
//! This library harvests metadata from repositories speaking the Open Archives
//! Initiative Protocol for Metadata Harvesting (OAI-PMH) and mirrors it into a
//! local, time-sharded cache so repeated and incremental runs avoid redundant
//! network transfer.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`protocol`] - Request URL encoding and response envelope decoding
//! - [`transport`] - Single HTTP exchange with retry and exponential backoff
//! - [`paginate`] - Resumption-token pagination of list requests
//! - [`window`] - Calendar-aligned date window splitting
//! - [`cache`] - Atomically written, transparently compressed disk cache
//! - [`harvest`] - Incremental, cache-backed harvest orchestration
//! - [`info`] - Concurrent repository discovery under a deadline
//! - [`batch`] - Bounded-concurrency driver for many endpoints
//! - [`config`] - Explicit configuration shared by all components

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod batch;
pub mod cache;
pub mod config;
pub mod harvest;
pub mod info;
pub mod paginate;
pub mod protocol;
pub mod transport;
mod user_agent;
pub mod window;

// Re-export commonly used types
pub use batch::{BatchEngine, BatchError, BatchStats, DEFAULT_WORKERS, read_endpoint_list};
pub use cache::{Cache, CacheError, CacheKey, CacheShard, EntryInfo};
pub use config::{CacheOptions, Config};
pub use harvest::{HarvestError, HarvestOptions, HarvestStats, Harvester};
pub use info::{DescribeTimeout, Describer, RepositoryInfo, VerbFailure};
pub use paginate::{DEFAULT_MAX_REQUESTS, FetchError, PaginationError, Paginator};
pub use protocol::{OaiError, Request, RequestError, Response, Verb, build_url};
pub use transport::{RetryPolicy, Transport, TransportError, TransportOptions};
pub use window::{Window, WindowError, WindowUnit, split};
