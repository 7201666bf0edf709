//! OAI-PMH request encoding and response decoding.
//!
//! A [`Request`] describes one logical protocol request. [`build_url`] turns it
//! into a wire URL with deterministic, lexicographically ordered query
//! parameters, and [`Response::decode`] turns a response body into a typed
//! envelope while keeping record payloads verbatim.
//!
//! # Example
//!
//! ```
//! use oai_mirror::protocol::{Request, Verb, build_url};
//!
//! let request = Request::new("https://example.org/oai", Verb::ListRecords)
//!     .with_prefix("oai_dc")
//!     .with_set("physics");
//! let url = build_url(&request).unwrap();
//! assert_eq!(
//!     url.as_str(),
//!     "https://example.org/oai?metadataPrefix=oai_dc&set=physics&verb=ListRecords"
//! );
//! ```

mod error;
pub mod response;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::window::Window;

pub use error::{DecodeError, NO_RECORDS_MATCH, NO_SET_HIERARCHY, OaiError, RequestError};
pub use response::{Header, Identify, MetadataFormat, Record, Response, ResumptionToken, SetInfo};

/// Date format used on the wire and in cache file names.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Metadata prefix every repository must support.
pub const DEFAULT_PREFIX: &str = "oai_dc";

/// The six OAI-PMH protocol verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Verb {
    /// Repository self-description.
    Identify,
    /// Record headers only.
    ListIdentifiers,
    /// Set hierarchy.
    ListSets,
    /// Supported metadata formats.
    ListMetadataFormats,
    /// Full records.
    ListRecords,
    /// A single record by identifier.
    GetRecord,
}

impl Verb {
    /// All verbs in protocol order.
    pub const ALL: [Verb; 6] = [
        Verb::Identify,
        Verb::ListIdentifiers,
        Verb::ListSets,
        Verb::ListMetadataFormats,
        Verb::ListRecords,
        Verb::GetRecord,
    ];

    /// Returns the wire name of the verb.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Verb::Identify => "Identify",
            Verb::ListIdentifiers => "ListIdentifiers",
            Verb::ListSets => "ListSets",
            Verb::ListMetadataFormats => "ListMetadataFormats",
            Verb::ListRecords => "ListRecords",
            Verb::GetRecord => "GetRecord",
        }
    }

    /// Returns true for list requests that may be continued with a
    /// resumption token.
    #[must_use]
    pub fn is_paginated(self) -> bool {
        matches!(
            self,
            Verb::ListIdentifiers | Verb::ListRecords | Verb::ListSets
        )
    }

    /// Returns true for verbs harvested window by window through the cache.
    #[must_use]
    pub fn is_windowed(self) -> bool {
        matches!(self, Verb::ListIdentifiers | Verb::ListRecords)
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Verb {
    type Err = RequestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        if name.is_empty() {
            return Err(RequestError::MissingVerb);
        }
        Verb::ALL
            .into_iter()
            .find(|verb| verb.as_str() == name)
            .ok_or_else(|| RequestError::UnknownVerb {
                verb: name.to_string(),
            })
    }
}

/// One logical OAI-PMH request, which may take several HTTP exchanges to
/// fulfill.
///
/// A resumption token, when present, replaces every other argument on the
/// wire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Request {
    /// Base URL of the repository.
    pub endpoint: String,
    /// Protocol verb.
    pub verb: Option<Verb>,
    /// Lower datestamp bound (inclusive).
    pub from: Option<NaiveDate>,
    /// Upper datestamp bound (inclusive).
    pub until: Option<NaiveDate>,
    /// Set restriction.
    pub set: Option<String>,
    /// Metadata format.
    pub prefix: Option<String>,
    /// Record identifier for `GetRecord` and `ListMetadataFormats`.
    pub identifier: Option<String>,
    /// Flow control token from a previous page.
    pub resumption_token: Option<String>,
}

impl Request {
    /// Creates a request for the given endpoint and verb.
    pub fn new(endpoint: impl Into<String>, verb: Verb) -> Self {
        Self {
            endpoint: endpoint.into(),
            verb: Some(verb),
            ..Self::default()
        }
    }

    /// Sets the lower datestamp bound.
    #[must_use]
    pub fn with_from(mut self, from: NaiveDate) -> Self {
        self.from = Some(from);
        self
    }

    /// Sets the upper datestamp bound.
    #[must_use]
    pub fn with_until(mut self, until: NaiveDate) -> Self {
        self.until = Some(until);
        self
    }

    /// Sets the set restriction.
    #[must_use]
    pub fn with_set(mut self, set: impl Into<String>) -> Self {
        self.set = Some(set.into());
        self
    }

    /// Sets the metadata prefix.
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Sets the record identifier.
    #[must_use]
    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    /// Returns the continuation of this request for the given token.
    ///
    /// Only endpoint, verb and token are carried over.
    #[must_use]
    pub fn resume(&self, token: impl Into<String>) -> Self {
        Self {
            endpoint: self.endpoint.clone(),
            verb: self.verb,
            resumption_token: Some(token.into()),
            ..Self::default()
        }
    }

    /// Returns a copy of this request restricted to the dates of a window.
    #[must_use]
    pub fn for_window(&self, window: &Window) -> Self {
        Self {
            from: Some(window.from_date()),
            until: Some(window.until_date()),
            resumption_token: None,
            ..self.clone()
        }
    }

    /// Returns the set restriction, or an empty string.
    #[must_use]
    pub fn set_or_empty(&self) -> &str {
        non_empty(self.set.as_deref()).unwrap_or_default()
    }

    /// Returns the metadata prefix, or an empty string.
    #[must_use]
    pub fn prefix_or_empty(&self) -> &str {
        non_empty(self.prefix.as_deref()).unwrap_or_default()
    }
}

/// Builds the wire URL for a request.
///
/// With a resumption token the URL carries only `verb` and
/// `resumptionToken`. Otherwise verb-appropriate arguments are added when
/// present. Parameters are always emitted in lexicographic order.
///
/// # Errors
///
/// Returns [`RequestError`] when the endpoint or verb is missing or the
/// endpoint is not an absolute URL.
pub fn build_url(request: &Request) -> Result<Url, RequestError> {
    let endpoint = request.endpoint.trim();
    if endpoint.is_empty() {
        return Err(RequestError::MissingEndpoint);
    }
    let verb = request.verb.ok_or(RequestError::MissingVerb)?;

    let mut url = Url::parse(endpoint).map_err(|_| RequestError::InvalidEndpoint {
        endpoint: endpoint.to_string(),
    })?;
    if url.cannot_be_a_base() || url.host_str().is_none() {
        return Err(RequestError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
        });
    }

    let mut params: BTreeMap<&'static str, String> = BTreeMap::new();
    params.insert("verb", verb.as_str().to_string());

    if let Some(token) = non_empty(request.resumption_token.as_deref()) {
        params.insert("resumptionToken", token.to_string());
    } else {
        let mut add = |key: &'static str, value: Option<&str>| {
            if let Some(value) = non_empty(value) {
                params.insert(key, value.to_string());
            }
        };
        match verb {
            Verb::ListRecords | Verb::ListIdentifiers => {
                let from = request.from.map(|d| d.format(DATE_FORMAT).to_string());
                let until = request.until.map(|d| d.format(DATE_FORMAT).to_string());
                add("from", from.as_deref());
                add("until", until.as_deref());
                add("set", request.set.as_deref());
                add("metadataPrefix", request.prefix.as_deref());
            }
            Verb::GetRecord => {
                add("identifier", request.identifier.as_deref());
                add("metadataPrefix", request.prefix.as_deref());
            }
            Verb::ListMetadataFormats => {
                add("identifier", request.identifier.as_deref());
            }
            Verb::Identify | Verb::ListSets => {}
        }
    }

    url.query_pairs_mut()
        .extend_pairs(params.iter().map(|(key, value)| (*key, value.as_str())));
    Ok(url)
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
