//! Resumption-token pagination.
//!
//! A [`Paginator`] turns one logical request into as many HTTP exchanges as
//! the repository needs, following resumption tokens and appending every
//! page to one aggregate [`Response`] in server order. Pagination is strictly
//! sequential.

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::protocol::{OaiError, Request, Response};
use crate::transport::{Transport, TransportError};

/// Default ceiling on HTTP exchanges per logical request.
pub const DEFAULT_MAX_REQUESTS: usize = 1024;

/// Why pagination stopped early.
#[derive(Debug, Error)]
pub enum PaginationError {
    /// An exchange failed, or the repository reported an error.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The resumption chain did not end within the request ceiling.
    #[error("too many requests: resumption chain did not end after {limit} requests")]
    TooManyRequests {
        /// The configured ceiling.
        limit: usize,
    },
}

/// A failed fetch, carrying what was aggregated before the failure.
#[derive(Debug, Error)]
#[error("{source} (after {pages} pages)")]
pub struct FetchError {
    partial: Box<Response>,
    pages: usize,
    #[source]
    source: PaginationError,
}

impl FetchError {
    fn new(partial: Response, pages: usize, source: impl Into<PaginationError>) -> Self {
        Self {
            partial: Box::new(partial),
            pages,
            source: source.into(),
        }
    }

    /// The reason pagination stopped.
    #[must_use]
    pub fn error(&self) -> &PaginationError {
        &self.source
    }

    /// Aggregate of all pages received before the failure.
    ///
    /// When the very first exchange returned a protocol error, this is that
    /// envelope, error element included.
    #[must_use]
    pub fn partial(&self) -> &Response {
        &self.partial
    }

    /// Number of pages successfully received.
    #[must_use]
    pub fn pages(&self) -> usize {
        self.pages
    }

    /// The protocol error reported by the repository, if that is the cause.
    #[must_use]
    pub fn protocol_error(&self) -> Option<&OaiError> {
        match &self.source {
            PaginationError::Transport(error) => error.protocol_error(),
            PaginationError::TooManyRequests { .. } => None,
        }
    }

    /// The protocol error code, if the repository reported one.
    #[must_use]
    pub fn protocol_code(&self) -> Option<&str> {
        self.protocol_error().map(|error| error.code.as_str())
    }

    #[must_use]
    pub fn into_partial(self) -> Response {
        *self.partial
    }

    /// Splits into the partial aggregate and the cause.
    #[must_use]
    pub fn into_parts(self) -> (Response, PaginationError) {
        (*self.partial, self.source)
    }
}

/// Follows resumption tokens to completion.
#[derive(Debug, Clone)]
pub struct Paginator {
    transport: Transport,
    max_requests: usize,
}

impl Paginator {
    /// Creates a paginator. A `max_requests` of zero means unlimited.
    #[must_use]
    pub fn new(transport: Transport, max_requests: usize) -> Self {
        Self {
            transport,
            max_requests,
        }
    }

    #[must_use]
    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    #[must_use]
    pub fn max_requests(&self) -> usize {
        self.max_requests
    }

    /// Fetches a request to completion.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] carrying the partial aggregate when an exchange
    /// fails, the repository reports an error, or the request ceiling is hit.
    pub async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
        self.fetch_with_cancel(request, &CancellationToken::new())
            .await
    }

    /// Like [`Paginator::fetch`], passing a cancellation token to every
    /// exchange.
    ///
    /// # Errors
    ///
    /// See [`Paginator::fetch`].
    #[instrument(skip(self, request, cancel), fields(endpoint = %request.endpoint, verb = ?request.verb))]
    pub async fn fetch_with_cancel(
        &self,
        request: &Request,
        cancel: &CancellationToken,
    ) -> Result<Response, FetchError> {
        let mut aggregate = match self.transport.exchange(request, cancel).await {
            Ok(response) => response,
            Err(error) => return Err(FetchError::new(Response::default(), 0, error)),
        };
        let mut pages = 1usize;

        if let Some(error) = aggregate.error.clone() {
            return Err(FetchError::new(
                aggregate,
                0,
                TransportError::Protocol(error),
            ));
        }

        let paginated = request.verb.is_some_and(|verb| verb.is_paginated());
        if !paginated {
            return Ok(aggregate);
        }

        while let Some(token) = aggregate.next_token().map(ToString::to_string) {
            if self.max_requests > 0 && pages >= self.max_requests {
                warn!(limit = self.max_requests, "request ceiling reached");
                return Err(FetchError::new(
                    aggregate,
                    pages,
                    PaginationError::TooManyRequests {
                        limit: self.max_requests,
                    },
                ));
            }

            if let Some(current) = aggregate.resumption_token.as_ref() {
                debug!(
                    page = pages + 1,
                    cursor = ?current.cursor,
                    complete_list_size = ?current.complete_list_size,
                    "following resumption token"
                );
            }

            let next = request.resume(token);
            match self.transport.send_with_cancel(&next, cancel).await {
                Ok(page) => {
                    pages += 1;
                    aggregate.append_page(page);
                }
                Err(error) => return Err(FetchError::new(aggregate, pages, error)),
            }
        }

        debug!(
            pages,
            records = aggregate.records.len(),
            headers = aggregate.headers.len(),
            sets = aggregate.sets.len(),
            "pagination complete"
        );
        Ok(aggregate)
    }
}
