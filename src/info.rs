//! Repository description under a deadline.
//!
//! [`Describer::describe`] runs `Identify`, `ListSets` and
//! `ListMetadataFormats` concurrently, one spawned task each, and collects
//! whatever arrives before the deadline. One verb failing never hides the
//! results of the others.

use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::paginate::{FetchError, Paginator};
use crate::protocol::response::{Identify, MetadataFormat, SetInfo};
use crate::protocol::{Request, Response, Verb};

/// Default deadline for describing one repository.
pub const DEFAULT_DESCRIBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Verbs run for every description.
pub const DISCOVERY_VERBS: [Verb; 3] = [Verb::Identify, Verb::ListSets, Verb::ListMetadataFormats];

/// Failure of one discovery verb.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerbFailure {
    pub verb: Verb,
    pub message: String,
}

impl VerbFailure {
    fn new(verb: Verb, message: impl Into<String>) -> Self {
        Self {
            verb,
            message: message.into(),
        }
    }
}

/// What a repository says about itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RepositoryInfo {
    pub endpoint: String,
    /// Wall time spent, in seconds.
    pub elapsed: f64,
    #[serde(rename = "id", skip_serializing_if = "Option::is_none")]
    pub identify: Option<Identify>,
    pub formats: Vec<MetadataFormat>,
    pub sets: Vec<SetInfo>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<VerbFailure>,
}

impl RepositoryInfo {
    fn new(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            ..Self::default()
        }
    }

    /// Returns the recorded failure for a verb, if any.
    #[must_use]
    pub fn failure(&self, verb: Verb) -> Option<&VerbFailure> {
        self.errors.iter().find(|failure| failure.verb == verb)
    }

    fn absorb(&mut self, verb: Verb, response: Response) {
        match verb {
            Verb::Identify => self.identify = response.identify,
            Verb::ListSets => self.sets = response.sets,
            Verb::ListMetadataFormats => self.formats = response.formats,
            _ => {}
        }
    }
}

/// The deadline elapsed before every verb reported.
///
/// Carries everything that did arrive, with a timeout failure recorded for
/// each outstanding verb.
#[derive(Debug, Error)]
#[error("describing {} timed out after {timeout:?}", .info.endpoint)]
pub struct DescribeTimeout {
    info: Box<RepositoryInfo>,
    pending: Vec<Verb>,
    timeout: Duration,
}

impl DescribeTimeout {
    #[must_use]
    pub fn info(&self) -> &RepositoryInfo {
        &self.info
    }

    #[must_use]
    pub fn into_info(self) -> RepositoryInfo {
        *self.info
    }

    /// Verbs that had not reported when the deadline elapsed.
    #[must_use]
    pub fn pending(&self) -> &[Verb] {
        &self.pending
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Runs the discovery fan-out.
#[derive(Debug, Clone)]
pub struct Describer {
    paginator: Paginator,
    lenient_codes: Vec<String>,
}

impl Describer {
    /// Creates a describer. Protocol errors whose code is in
    /// `lenient_codes` are logged instead of recorded.
    #[must_use]
    pub fn new(paginator: Paginator, lenient_codes: Vec<String>) -> Self {
        Self {
            paginator,
            lenient_codes,
        }
    }

    /// Describes a repository, waiting at most `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`DescribeTimeout`] with the partial result if the deadline
    /// elapses first. Late results are discarded and outstanding calls are
    /// asked to stop.
    #[instrument(skip(self), fields(timeout_ms = timeout.as_millis()))]
    pub async fn describe(
        &self,
        endpoint: &str,
        timeout: Duration,
    ) -> Result<RepositoryInfo, DescribeTimeout> {
        let started = Instant::now();
        let cancel = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel::<(Verb, Result<Response, FetchError>)>(DISCOVERY_VERBS.len());

        for verb in DISCOVERY_VERBS {
            let tx = tx.clone();
            let paginator = self.paginator.clone();
            let token = cancel.child_token();
            let request = Request::new(endpoint, verb);
            tokio::spawn(async move {
                let result = paginator.fetch_with_cancel(&request, &token).await;
                // The collector is gone once the deadline has passed.
                let _ = tx.send((verb, result)).await;
            });
        }
        drop(tx);

        let mut info = RepositoryInfo::new(endpoint);
        let mut pending = DISCOVERY_VERBS.to_vec();
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        let timed_out = loop {
            if pending.is_empty() {
                break false;
            }
            tokio::select! {
                message = rx.recv() => match message {
                    Some((verb, result)) => {
                        pending.retain(|p| *p != verb);
                        self.record(&mut info, verb, result);
                    }
                    None => break false,
                },
                () = &mut deadline => break true,
            }
        };
        info.elapsed = started.elapsed().as_secs_f64();

        if timed_out {
            cancel.cancel();
            for verb in &pending {
                info.errors
                    .push(VerbFailure::new(*verb, format!("timed out after {timeout:?}")));
            }
            info.errors.sort_by_key(|failure| failure.verb);
            warn!(endpoint, ?pending, "repository description timed out");
            return Err(DescribeTimeout {
                info: Box::new(info),
                pending,
                timeout,
            });
        }

        for verb in &pending {
            info.errors
                .push(VerbFailure::new(*verb, "worker exited without reporting"));
        }
        info.errors.sort_by_key(|failure| failure.verb);
        debug!(endpoint, elapsed = info.elapsed, "repository described");
        Ok(info)
    }

    fn record(&self, info: &mut RepositoryInfo, verb: Verb, result: Result<Response, FetchError>) {
        match result {
            Ok(response) => info.absorb(verb, response),
            Err(error) => {
                let lenient = error
                    .protocol_code()
                    .is_some_and(|code| self.lenient_codes.iter().any(|c| c == code));
                if lenient {
                    info!(%verb, error = %error, "repository reports empty result");
                } else {
                    warn!(%verb, error = %error, "discovery request failed");
                    info.errors.push(VerbFailure::new(verb, error.to_string()));
                }
                info.absorb(verb, error.into_partial());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repository_info_serializes_compact_names() {
        let info = RepositoryInfo {
            endpoint: "http://example.org/oai".to_string(),
            elapsed: 0.5,
            identify: Some(Identify {
                repository_name: "Example".to_string(),
                ..Identify::default()
            }),
            formats: Vec::new(),
            sets: vec![SetInfo {
                spec: "math".to_string(),
                name: "Mathematics".to_string(),
                description: None,
            }],
            errors: vec![VerbFailure::new(Verb::ListMetadataFormats, "boom")],
        };
        let json = serde_json::to_value(&info).unwrap_or_default();
        assert_eq!(json["id"]["name"], "Example");
        assert_eq!(json["sets"][0]["spec"], "math");
        assert_eq!(json["errors"][0]["verb"], "ListMetadataFormats");
        assert!(json["sets"][0].get("description").is_none());
    }

    #[test]
    fn test_errors_omitted_when_empty() {
        let info = RepositoryInfo::new("http://example.org/oai");
        let json = serde_json::to_value(&info).unwrap_or_default();
        assert!(json.get("errors").is_none());
        assert!(json.get("id").is_none());
    }

    #[test]
    fn test_failure_lookup() {
        let mut info = RepositoryInfo::new("http://example.org/oai");
        info.errors.push(VerbFailure::new(Verb::ListSets, "timed out"));
        assert!(info.failure(Verb::ListSets).is_some());
        assert!(info.failure(Verb::Identify).is_none());
    }
}
