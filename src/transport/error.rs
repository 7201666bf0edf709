//! Error types for the transport module.

use std::time::Duration;

use thiserror::Error;

use crate::protocol::{DecodeError, OaiError, RequestError};

/// Errors that can occur during one logical OAI-PMH exchange.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The request could not be turned into a URL.
    #[error(transparent)]
    Request(#[from] RequestError),

    /// Network-level error (DNS resolution, connection refused, TLS errors, etc.)
    #[error("network error requesting {url}: {source}")]
    Network {
        /// The URL that failed.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// A single attempt timed out.
    #[error("timeout requesting {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// HTTP error response (4xx client errors, 5xx server errors).
    #[error("HTTP {status} requesting {url}")]
    HttpStatus {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
        /// The Retry-After header value, if present.
        retry_after: Option<String>,
    },

    /// The body is not a decodable OAI-PMH envelope.
    #[error("cannot decode response from {url}: {source}")]
    Decode {
        /// The URL whose response failed to decode.
        url: String,
        /// The decoder error.
        #[source]
        source: DecodeError,
    },

    /// The repository answered with an `<error>` element.
    #[error("OAI-PMH error: {0}")]
    Protocol(OaiError),

    /// The whole exchange, including backoff sleeps, exceeded its budget.
    #[error("request to {url} exceeded overall timeout of {timeout:?}")]
    DeadlineExceeded {
        /// The URL being requested.
        url: String,
        /// The overall budget.
        timeout: Duration,
    },

    /// The caller cancelled the exchange.
    #[error("request to {url} cancelled")]
    Cancelled {
        /// The URL being requested.
        url: String,
    },

    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

impl TransportError {
    /// Creates a network error from a reqwest error.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates an HTTP status error with an optional Retry-After header value.
    pub fn http_status(url: impl Into<String>, status: u16, retry_after: Option<String>) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates a decode error.
    pub fn decode(url: impl Into<String>, source: DecodeError) -> Self {
        Self::Decode {
            url: url.into(),
            source,
        }
    }

    /// Creates a cancellation error.
    pub fn cancelled(url: impl Into<String>) -> Self {
        Self::Cancelled { url: url.into() }
    }

    /// Returns the repository error, if this is a protocol error.
    #[must_use]
    pub fn protocol_error(&self) -> Option<&OaiError> {
        match self {
            Self::Protocol(error) => Some(error),
            _ => None,
        }
    }

    /// Returns the HTTP status, if the server answered with an error status.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status_display() {
        let error = TransportError::http_status("https://example.org/oai?verb=Identify", 503, None);
        assert_eq!(
            error.to_string(),
            "HTTP 503 requesting https://example.org/oai?verb=Identify"
        );
        assert_eq!(error.status(), Some(503));
    }

    #[test]
    fn test_protocol_error_accessor() {
        let error = TransportError::Protocol(OaiError::new("badArgument", "bad"));
        assert_eq!(error.protocol_error().map(|e| e.code.as_str()), Some("badArgument"));
        assert!(TransportError::timeout("u").protocol_error().is_none());
    }

    #[test]
    fn test_request_error_is_transparent() {
        let error = TransportError::from(RequestError::MissingEndpoint);
        assert_eq!(error.to_string(), "request: an endpoint is required");
    }
}
