//! HTTP transport for OAI-PMH requests.
//!
//! A [`Transport`] performs one logical exchange: it builds the request URL,
//! issues an HTTP GET, retries transient failures with exponential backoff
//! and decodes the XML envelope. The whole exchange, backoff sleeps
//! included, is bounded by an overall timeout, and a cancellation token is
//! honored before each attempt and during every sleep.

mod error;
mod retry;

use std::time::Duration;

use reqwest::Client;
use reqwest::header::RETRY_AFTER;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::protocol::{Request, Response, build_url};
use crate::user_agent;

pub use error::TransportError;
pub use retry::{
    DEFAULT_MAX_ATTEMPTS, FailureType, RetryDecision, RetryPolicy, classify_error,
    parse_retry_after,
};

/// Default connection timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default timeout for a single attempt.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Default budget for one logical exchange, retries included.
pub const DEFAULT_OVERALL_TIMEOUT: Duration = Duration::from_secs(600);

/// Settings for the HTTP transport.
#[derive(Debug, Clone)]
pub struct TransportOptions {
    pub connect_timeout: Duration,
    /// Timeout for one HTTP attempt.
    pub request_timeout: Duration,
    /// Timeout for the whole exchange including backoff sleeps.
    pub overall_timeout: Duration,
    pub retry: RetryPolicy,
    pub user_agent: String,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            overall_timeout: DEFAULT_OVERALL_TIMEOUT,
            retry: RetryPolicy::default(),
            user_agent: user_agent::default_user_agent(),
        }
    }
}

/// Retrying HTTP client for OAI-PMH endpoints.
///
/// Cloning is cheap; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct Transport {
    client: Client,
    options: TransportOptions,
}

impl Transport {
    /// Creates a transport.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Client`] if the HTTP client cannot be built.
    pub fn new(options: TransportOptions) -> Result<Self, TransportError> {
        let client = Client::builder()
            .connect_timeout(options.connect_timeout)
            .timeout(options.request_timeout)
            .gzip(true)
            .user_agent(options.user_agent.clone())
            .build()
            .map_err(TransportError::Client)?;
        Ok(Self { client, options })
    }

    #[must_use]
    pub fn options(&self) -> &TransportOptions {
        &self.options
    }

    /// Performs one exchange and fails on a protocol error.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Protocol`] when the repository reports an
    /// error, and any other [`TransportError`] for URL, network, HTTP,
    /// decode or timeout failures.
    pub async fn send(&self, request: &Request) -> Result<Response, TransportError> {
        self.send_with_cancel(request, &CancellationToken::new())
            .await
    }

    /// Like [`Transport::send`], honoring a cancellation token.
    ///
    /// # Errors
    ///
    /// See [`Transport::send`]; additionally [`TransportError::Cancelled`].
    pub async fn send_with_cancel(
        &self,
        request: &Request,
        cancel: &CancellationToken,
    ) -> Result<Response, TransportError> {
        let mut response = self.exchange(request, cancel).await?;
        match response.error.take() {
            Some(error) => Err(TransportError::Protocol(error)),
            None => Ok(response),
        }
    }

    /// Performs one exchange and returns the decoded envelope, even when it
    /// carries a protocol error.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] for URL, network, HTTP, decode, timeout
    /// and cancellation failures.
    #[instrument(skip(self, request, cancel), fields(endpoint = %request.endpoint, verb = ?request.verb))]
    pub async fn exchange(
        &self,
        request: &Request,
        cancel: &CancellationToken,
    ) -> Result<Response, TransportError> {
        let url = build_url(request)?.to_string();
        let overall = self.options.overall_timeout;
        match tokio::time::timeout(overall, self.exchange_with_retry(&url, cancel)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::DeadlineExceeded {
                url,
                timeout: overall,
            }),
        }
    }

    async fn exchange_with_retry(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<Response, TransportError> {
        let policy = &self.options.retry;
        let mut attempt = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Err(TransportError::cancelled(url));
            }
            attempt += 1;
            debug!(url, attempt, "sending request");

            let error = match self.attempt(url).await {
                Ok(response) => return Ok(response),
                Err(error) => error,
            };

            let failure_type = classify_error(&error);
            match policy.should_retry(failure_type, attempt) {
                RetryDecision::Retry {
                    delay: backoff_delay,
                    attempt: next_attempt,
                } => {
                    let server_delay = retry_after_delay(&error);
                    let delay = server_delay.unwrap_or(backoff_delay);
                    info!(
                        url,
                        attempt = next_attempt,
                        max_attempts = policy.max_attempts(),
                        delay_ms = delay.as_millis(),
                        using_retry_after = server_delay.is_some(),
                        error = %error,
                        "retrying request"
                    );
                    tokio::select! {
                        () = cancel.cancelled() => return Err(TransportError::cancelled(url)),
                        () = tokio::time::sleep(delay) => {}
                    }
                }
                RetryDecision::DoNotRetry { reason } => {
                    debug!(url, %reason, "not retrying request");
                    return Err(error);
                }
            }
        }
    }

    async fn attempt(&self, url: &str) -> Result<Response, TransportError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| classify_reqwest(url, e))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(ToString::to_string);
            return Err(TransportError::http_status(url, status.as_u16(), retry_after));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| classify_reqwest(url, e))?;
        debug!(url, bytes = body.len(), "received response");
        Response::decode(&body).map_err(|e| TransportError::decode(url, e))
    }
}

fn classify_reqwest(url: &str, error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::timeout(url)
    } else {
        TransportError::network(url, error)
    }
}

/// Server-mandated delay from a 429 or 503 response.
fn retry_after_delay(error: &TransportError) -> Option<Duration> {
    match error {
        TransportError::HttpStatus {
            status: 429 | 503,
            retry_after: Some(value),
            ..
        } => parse_retry_after(value),
        _ => None,
    }
}
