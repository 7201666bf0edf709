//! Error types for the protocol module.
//!
//! Configuration problems with a request are separated from errors reported
//! by the repository itself and from envelopes that cannot be decoded.

use serde::Serialize;
use thiserror::Error;

/// Error code a repository returns when a list request matches nothing.
pub const NO_RECORDS_MATCH: &str = "noRecordsMatch";

/// Error code a repository returns for `ListSets` when it has no sets.
pub const NO_SET_HIERARCHY: &str = "noSetHierarchy";

/// Errors detected while building a request URL.
///
/// These are configuration errors: they are fatal immediately and never
/// retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    /// The request has no endpoint.
    #[error("request: an endpoint is required")]
    MissingEndpoint,

    /// The request has no verb.
    #[error("request: a verb is required")]
    MissingVerb,

    /// The verb name is not one of the six protocol verbs.
    #[error("unknown verb: {verb}")]
    UnknownVerb {
        /// The unrecognized verb name.
        verb: String,
    },

    /// The endpoint is not an absolute URL with a host.
    #[error("invalid endpoint URL: {endpoint}")]
    InvalidEndpoint {
        /// The rejected endpoint string.
        endpoint: String,
    },
}

/// An `<error code="...">` element reported by the repository.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{code}: {message}")]
pub struct OaiError {
    /// Protocol error code, e.g. `badArgument` or `noRecordsMatch`.
    pub code: String,
    /// Human-readable message from the repository, possibly empty.
    pub message: String,
}

impl OaiError {
    /// Creates a protocol error.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Returns true when this error carries the given code.
    #[must_use]
    pub fn is(&self, code: &str) -> bool {
        self.code == code
    }
}

/// The response body is not a well-formed OAI-PMH envelope.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed OAI-PMH envelope: {message}")]
pub struct DecodeError {
    message: String,
}

impl DecodeError {
    pub(crate) fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Returns the decoder's description of the problem.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}
