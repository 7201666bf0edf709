//! Incremental, cache-backed harvesting.
//!
//! A [`Harvester`] turns one logical request into an XML stream on a sink.
//! `ListRecords` and `ListIdentifiers` are cut into calendar windows; each
//! window is fetched at most once and stored in the [`Cache`], then copied to
//! the sink from disk, so an interrupted run resumes at the first missing
//! window. Discovery verbs go straight to the paginator.

use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::PathBuf;

use chrono::{NaiveDate, Utc};
use quick_xml::escape::escape;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::cache::{Cache, CacheError, CacheKey, CacheShard};
use crate::paginate::{FetchError, Paginator};
use crate::protocol::{
    DATE_FORMAT, DEFAULT_PREFIX, NO_RECORDS_MATCH, NO_SET_HIERARCHY, Request, RequestError, Verb,
    build_url,
};
use crate::window::{Window, WindowError, WindowUnit, split};

/// Errors that abort a harvest.
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error(transparent)]
    Request(#[from] RequestError),

    #[error(transparent)]
    Window(#[from] WindowError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    /// A window could not be fetched.
    #[error("harvesting window {window} failed: {source}")]
    Fetch {
        /// The first window that failed.
        window: Window,
        #[source]
        source: FetchError,
    },

    /// A discovery request failed.
    #[error("{verb} request failed: {source}")]
    Discovery {
        verb: Verb,
        #[source]
        source: FetchError,
    },

    /// Writing to the output failed.
    #[error("writing output failed: {0}")]
    Sink(#[source] io::Error),

    /// Streaming a cache entry to the output failed.
    #[error("copying cache entry {path} failed: {source}")]
    Copy {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Output and window settings for harvests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarvestOptions {
    /// Synthetic element wrapping the whole output.
    pub root_tag: Option<String>,
    /// `xmlns:*` declarations on the root tag, emitted in key order.
    pub namespaces: BTreeMap<String, String>,
    pub window_unit: WindowUnit,
    /// Metadata prefix used when the request has none.
    pub default_prefix: String,
    /// Start date used when the repository does not report a usable
    /// earliest datestamp.
    pub earliest_fallback: NaiveDate,
    /// Protocol error codes treated as an empty result.
    pub lenient_codes: Vec<String>,
}

impl Default for HarvestOptions {
    fn default() -> Self {
        Self {
            root_tag: None,
            namespaces: default_namespaces(),
            window_unit: WindowUnit::default(),
            default_prefix: DEFAULT_PREFIX.to_string(),
            // 1970-01-01
            earliest_fallback: NaiveDate::default(),
            lenient_codes: default_lenient_codes(),
        }
    }
}

impl HarvestOptions {
    /// Returns true if the protocol error code counts as an empty result.
    #[must_use]
    pub fn is_lenient(&self, code: &str) -> bool {
        self.lenient_codes.iter().any(|lenient| lenient == code)
    }
}

/// Namespaces declared on the root tag unless overridden.
#[must_use]
pub fn default_namespaces() -> BTreeMap<String, String> {
    [
        ("dc", "http://purl.org/dc/elements/1.1/"),
        ("oai_dc", "http://www.openarchives.org/OAI/2.0/oai_dc/"),
        ("xsi", "http://www.w3.org/2001/XMLSchema-instance"),
    ]
    .into_iter()
    .map(|(prefix, uri)| (prefix.to_string(), uri.to_string()))
    .collect()
}

/// Protocol error codes that mean "nothing there" rather than failure.
#[must_use]
pub fn default_lenient_codes() -> Vec<String> {
    vec![NO_RECORDS_MATCH.to_string(), NO_SET_HIERARCHY.to_string()]
}

/// Counters for one harvest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HarvestStats {
    /// Windows covered by the request.
    pub windows: usize,
    /// Windows served from an existing cache entry.
    pub cache_hits: usize,
    /// Windows fetched from the repository.
    pub fetched: usize,
    /// Bytes written to the sink.
    pub bytes_written: u64,
}

/// Drives windowing, caching and pagination for one request at a time.
#[derive(Debug, Clone)]
pub struct Harvester {
    paginator: Paginator,
    cache: Cache,
    options: HarvestOptions,
}

impl Harvester {
    #[must_use]
    pub fn new(paginator: Paginator, cache: Cache, options: HarvestOptions) -> Self {
        Self {
            paginator,
            cache,
            options,
        }
    }

    #[must_use]
    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    #[must_use]
    pub fn options(&self) -> &HarvestOptions {
        &self.options
    }

    /// Harvests a request and streams the result to `sink`.
    ///
    /// On error the harvest stops at the first failing window and the
    /// closing root tag is not written. Windows completed before the failure
    /// stay cached.
    ///
    /// # Errors
    ///
    /// Returns [`HarvestError`] for invalid requests, unrecoverable fetch
    /// failures, cache failures and sink write failures.
    #[instrument(skip(self, request, sink), fields(endpoint = %request.endpoint, verb = ?request.verb))]
    pub async fn harvest<W: Write + ?Sized>(
        &self,
        request: &Request,
        sink: &mut W,
    ) -> Result<HarvestStats, HarvestError> {
        build_url(request)?;
        let verb = request.verb.ok_or(RequestError::MissingVerb)?;

        let mut stats = HarvestStats::default();
        self.start_document(sink, &mut stats)?;
        if verb.is_windowed() {
            self.harvest_windows(request, sink, &mut stats).await?;
        } else {
            self.harvest_direct(verb, request, sink, &mut stats).await?;
        }
        self.end_document(sink, &mut stats)?;
        sink.flush().map_err(HarvestError::Sink)?;

        info!(
            windows = stats.windows,
            cache_hits = stats.cache_hits,
            fetched = stats.fetched,
            bytes = stats.bytes_written,
            "harvest complete"
        );
        Ok(stats)
    }

    /// Fills in the start date, end date and metadata prefix when missing.
    ///
    /// The start date comes from the repository's earliest datestamp.
    pub async fn resolve_defaults(&self, request: &Request) -> Request {
        let mut resolved = request.clone();
        if resolved.prefix_or_empty().is_empty() {
            resolved.prefix = Some(self.options.default_prefix.clone());
        }
        if resolved.from.is_none() {
            resolved.from = Some(self.earliest_date(&request.endpoint).await);
        }
        if resolved.until.is_none() {
            resolved.until = Some(Utc::now().date_naive());
        }
        resolved
    }

    async fn earliest_date(&self, endpoint: &str) -> NaiveDate {
        let fallback = self.options.earliest_fallback;
        let identify = Request::new(endpoint, Verb::Identify);
        match self.paginator.fetch(&identify).await {
            Ok(response) => {
                let parsed = response
                    .identify
                    .as_ref()
                    .and_then(|identify| parse_datestamp(&identify.earliest_datestamp));
                if parsed.is_none() {
                    warn!(endpoint, %fallback, "no usable earliest datestamp");
                }
                parsed.unwrap_or(fallback)
            }
            Err(error) => {
                warn!(endpoint, %fallback, error = %error, "Identify failed");
                fallback
            }
        }
    }

    async fn harvest_windows<W: Write + ?Sized>(
        &self,
        request: &Request,
        sink: &mut W,
        stats: &mut HarvestStats,
    ) -> Result<(), HarvestError> {
        let request = self.resolve_defaults(request).await;
        let (Some(from), Some(until)) = (request.from, request.until) else {
            return Ok(());
        };
        let windows = split(from, until, self.options.window_unit)?;
        let shard = CacheShard::for_request(&request)?;
        debug!(
            from = %from.format(DATE_FORMAT),
            until = %until.format(DATE_FORMAT),
            windows = windows.len(),
            directory = %self.cache.directory(&shard).display(),
            "harvesting windows"
        );

        for window in windows {
            stats.windows += 1;
            let key = shard.key(window);
            if self.cache.has(&key) {
                debug!(%window, "cache hit");
                stats.cache_hits += 1;
            } else {
                self.fill(&request, &key).await?;
                stats.fetched += 1;
            }

            let mut entry = self.cache.get(&key)?;
            let copied = io::copy(&mut entry, sink).map_err(|source| HarvestError::Copy {
                path: self.cache.path(&key),
                source,
            })?;
            stats.bytes_written += copied;
        }
        Ok(())
    }

    async fn fill(&self, request: &Request, key: &CacheKey) -> Result<(), HarvestError> {
        let scoped = request.for_window(&key.window);
        let payload = match self.paginator.fetch(&scoped).await {
            Ok(response) => response.payload,
            Err(error) => match error.protocol_code() {
                // A lenient code after the first page leaves the window incomplete.
                Some(code) if error.pages() == 0 && self.options.is_lenient(code) => {
                    debug!(window = %key.window, code, "empty window");
                    error.into_partial().payload
                }
                _ => {
                    return Err(HarvestError::Fetch {
                        window: key.window,
                        source: error,
                    });
                }
            },
        };

        let entry = self.cache.put(key, |writer| {
            if !payload.is_empty() {
                writer.write_all(payload.as_bytes())?;
                writer.write_all(b"\n")?;
            }
            Ok(())
        })?;
        debug!(
            window = %key.window,
            bytes = entry.bytes,
            compressed = entry.compressed,
            "window cached"
        );
        Ok(())
    }

    async fn harvest_direct<W: Write + ?Sized>(
        &self,
        verb: Verb,
        request: &Request,
        sink: &mut W,
        stats: &mut HarvestStats,
    ) -> Result<(), HarvestError> {
        let payload = match self.paginator.fetch(request).await {
            Ok(response) => response.payload,
            Err(error) => match error.protocol_code() {
                Some(code) if error.pages() == 0 && self.options.is_lenient(code) => {
                    debug!(%verb, code, "empty result");
                    error.into_partial().payload
                }
                _ => return Err(HarvestError::Discovery { verb, source: error }),
            },
        };
        let document = format!("<{verb}>{payload}</{verb}>\n");
        write_counted(sink, document.as_bytes(), stats)
    }

    fn start_document<W: Write + ?Sized>(
        &self,
        sink: &mut W,
        stats: &mut HarvestStats,
    ) -> Result<(), HarvestError> {
        let Some(root) = self.options.root_tag.as_deref() else {
            return Ok(());
        };
        let mut tag = format!("<{root}");
        for (prefix, uri) in &self.options.namespaces {
            tag.push_str(&format!(" xmlns:{prefix}=\"{}\"", escape(uri.as_str())));
        }
        tag.push_str(">\n");
        write_counted(sink, tag.as_bytes(), stats)
    }

    fn end_document<W: Write + ?Sized>(
        &self,
        sink: &mut W,
        stats: &mut HarvestStats,
    ) -> Result<(), HarvestError> {
        match self.options.root_tag.as_deref() {
            Some(root) => write_counted(sink, format!("</{root}>\n").as_bytes(), stats),
            None => Ok(()),
        }
    }
}

fn write_counted<W: Write + ?Sized>(
    sink: &mut W,
    bytes: &[u8],
    stats: &mut HarvestStats,
) -> Result<(), HarvestError> {
    sink.write_all(bytes).map_err(HarvestError::Sink)?;
    stats.bytes_written += bytes.len() as u64;
    Ok(())
}

/// Parses the date part of an OAI datestamp (`YYYY-MM-DD...`).
fn parse_datestamp(datestamp: &str) -> Option<NaiveDate> {
    let date = datestamp.trim().get(..10)?;
    NaiveDate::parse_from_str(date, DATE_FORMAT).ok()
}
