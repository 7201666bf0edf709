//! Integration tests for the transport against a mock repository.

use std::time::{Duration, Instant};

use oai_mirror::{Request, RetryPolicy, Transport, TransportError, Verb};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, ResponseTemplate};

mod support;
use support::fixtures;
use support::socket_guard::start_mock_server_or_skip;

macro_rules! require_mock_server {
    () => {{
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };
        mock_server
    }};
}

fn transport() -> Transport {
    let config = fixtures::fast_config(std::path::Path::new("unused"));
    Transport::new(config.transport).unwrap()
}

fn identify_request(server: &wiremock::MockServer) -> Request {
    Request::new(format!("{}/oai", server.uri()), Verb::Identify)
}

#[tokio::test]
async fn test_send_decodes_identify() {
    let server = require_mock_server!();
    Mock::given(method("GET"))
        .and(path("/oai"))
        .and(query_param("verb", "Identify"))
        .respond_with(fixtures::xml(fixtures::identify("2001-02-03T04:05:06Z")))
        .expect(1)
        .mount(&server)
        .await;

    let response = transport().send(&identify_request(&server)).await.unwrap();
    let identify = response.identify.unwrap();
    assert_eq!(identify.repository_name, "Test Repository");
    assert_eq!(identify.earliest_datestamp, "2001-02-03T04:05:06Z");
}

#[tokio::test]
async fn test_503_then_success_is_retried() {
    let server = require_mock_server!();
    Mock::given(method("GET"))
        .and(path("/oai"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/oai"))
        .respond_with(fixtures::xml(fixtures::identify("2001-02-03")))
        .expect(1)
        .mount(&server)
        .await;

    let response = transport().send(&identify_request(&server)).await.unwrap();
    assert!(response.identify.is_some());
}

#[tokio::test]
async fn test_retry_after_header_is_honored() {
    let server = require_mock_server!();
    Mock::given(method("GET"))
        .and(path("/oai"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/oai"))
        .respond_with(fixtures::xml(fixtures::identify("2001-02-03")))
        .expect(1)
        .mount(&server)
        .await;

    assert!(transport().send(&identify_request(&server)).await.is_ok());
}

#[tokio::test]
async fn test_404_is_not_retried() {
    let server = require_mock_server!();
    Mock::given(method("GET"))
        .and(path("/oai"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let error = transport()
        .send(&identify_request(&server))
        .await
        .unwrap_err();
    assert_eq!(error.status(), Some(404));
}

#[tokio::test]
async fn test_persistent_500_gives_up_after_max_attempts() {
    let server = require_mock_server!();
    Mock::given(method("GET"))
        .and(path("/oai"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    let error = transport()
        .send(&identify_request(&server))
        .await
        .unwrap_err();
    assert_eq!(error.status(), Some(500));
}

#[tokio::test]
async fn test_protocol_error_is_not_retried() {
    let server = require_mock_server!();
    Mock::given(method("GET"))
        .and(path("/oai"))
        .respond_with(fixtures::xml(fixtures::oai_error("Identify", "badVerb")))
        .expect(1)
        .mount(&server)
        .await;

    let transport = transport();
    let request = identify_request(&server);
    let error = transport.send(&request).await.unwrap_err();
    assert_eq!(error.protocol_error().map(|e| e.code.as_str()), Some("badVerb"));
}

#[tokio::test]
async fn test_exchange_returns_error_envelope() {
    let server = require_mock_server!();
    Mock::given(method("GET"))
        .and(path("/oai"))
        .respond_with(fixtures::xml(fixtures::oai_error("ListSets", "noSetHierarchy")))
        .mount(&server)
        .await;

    let request = Request::new(format!("{}/oai", server.uri()), Verb::ListSets);
    let response = transport()
        .exchange(&request, &tokio_util::sync::CancellationToken::new())
        .await
        .unwrap();
    assert!(response.is_error());
    assert_eq!(response.error.unwrap().code, "noSetHierarchy");
}

#[tokio::test]
async fn test_malformed_body_is_a_decode_error() {
    let server = require_mock_server!();
    Mock::given(method("GET"))
        .and(path("/oai"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .expect(1)
        .mount(&server)
        .await;

    let error = transport()
        .send(&identify_request(&server))
        .await
        .unwrap_err();
    assert!(matches!(error, TransportError::Decode { .. }));
}

// ==================== Deadline and Cancellation Tests ====================

#[tokio::test]
async fn test_overall_timeout_bounds_the_retry_loop() {
    let server = require_mock_server!();
    Mock::given(method("GET"))
        .and(path("/oai"))
        .respond_with(ResponseTemplate::new(503).set_delay(Duration::from_millis(150)))
        .mount(&server)
        .await;

    let mut options = fixtures::fast_config(std::path::Path::new("unused")).transport;
    options.retry = RetryPolicy::new(10, Duration::from_millis(100), Duration::from_millis(100), 1.0)
        .with_max_jitter(Duration::ZERO);
    options.overall_timeout = Duration::from_millis(500);

    let started = Instant::now();
    let error = Transport::new(options)
        .unwrap()
        .send(&identify_request(&server))
        .await
        .unwrap_err();
    assert!(started.elapsed() < Duration::from_secs(2));
    match error {
        TransportError::DeadlineExceeded { timeout, .. } => {
            assert_eq!(timeout, Duration::from_millis(500));
        }
        other => panic!("expected deadline error, got {other}"),
    }
}

#[tokio::test]
async fn test_cancel_during_backoff_stops_before_next_attempt() {
    let server = require_mock_server!();
    Mock::given(method("GET"))
        .and(path("/oai"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    let mut options = fixtures::fast_config(std::path::Path::new("unused")).transport;
    options.retry = RetryPolicy::new(3, Duration::from_secs(10), Duration::from_secs(10), 1.0)
        .with_max_jitter(Duration::ZERO);
    let transport = Transport::new(options).unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let error = transport
        .send_with_cancel(&identify_request(&server), &cancel)
        .await
        .unwrap_err();
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(matches!(error, TransportError::Cancelled { .. }));
}
