//! Integration tests for resumption-token pagination.

use oai_mirror::{PaginationError, Paginator, Request, Transport, Verb};
use wiremock::matchers::{method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

mod support;
use support::fixtures::{self, list_records, record};
use support::socket_guard::start_mock_server_or_skip;

macro_rules! require_mock_server {
    () => {{
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };
        mock_server
    }};
}

fn paginator(max_requests: usize) -> Paginator {
    let config = fixtures::fast_config(std::path::Path::new("unused"));
    Paginator::new(Transport::new(config.transport).unwrap(), max_requests)
}

fn list_request(server: &MockServer) -> Request {
    Request::new(format!("{}/oai", server.uri()), Verb::ListRecords).with_prefix("oai_dc")
}

#[tokio::test]
async fn test_follows_token_chain_in_order() {
    let server = require_mock_server!();
    Mock::given(method("GET"))
        .and(path("/oai"))
        .and(query_param_is_missing("resumptionToken"))
        .and(query_param("metadataPrefix", "oai_dc"))
        .respond_with(fixtures::xml(list_records(&[record("a", "2020-01-01")], Some("t1"))))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(query_param("resumptionToken", "t1"))
        .respond_with(fixtures::xml(list_records(&[record("b", "2020-01-02")], Some("t2"))))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(query_param("resumptionToken", "t2"))
        .respond_with(fixtures::xml(list_records(&[record("c", "2020-01-03")], Some(""))))
        .expect(1)
        .mount(&server)
        .await;

    let response = paginator(100).fetch(&list_request(&server)).await.unwrap();
    let ids: Vec<_> = response
        .records
        .iter()
        .map(|r| r.header.identifier.as_str())
        .collect();
    assert_eq!(ids, ["a", "b", "c"]);
    assert_eq!(
        response.payload,
        [record("a", "2020-01-01"), record("b", "2020-01-02"), record("c", "2020-01-03")].join("\n")
    );
    assert_eq!(response.next_token(), None);
}

#[tokio::test]
async fn test_token_requests_carry_only_verb_and_token() {
    let server = require_mock_server!();
    Mock::given(method("GET"))
        .and(query_param_is_missing("resumptionToken"))
        .respond_with(fixtures::xml(list_records(&[record("a", "2020-01-01")], Some("next"))))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(query_param("verb", "ListRecords"))
        .and(query_param("resumptionToken", "next"))
        .and(query_param_is_missing("metadataPrefix"))
        .and(query_param_is_missing("from"))
        .and(query_param_is_missing("until"))
        .and(query_param_is_missing("set"))
        .respond_with(fixtures::xml(list_records(&[], Some(""))))
        .expect(1)
        .mount(&server)
        .await;

    let request = list_request(&server)
        .with_set("math")
        .with_from(chrono::NaiveDate::from_ymd_opt(2020, 1, 1).unwrap());
    let response = paginator(10).fetch(&request).await.unwrap();
    assert_eq!(response.records.len(), 1);
}

#[tokio::test]
async fn test_empty_token_means_single_call() {
    let server = require_mock_server!();
    Mock::given(method("GET"))
        .respond_with(fixtures::xml(list_records(&[record("a", "2020-01-01")], Some(""))))
        .expect(1)
        .mount(&server)
        .await;

    let response = paginator(10).fetch(&list_request(&server)).await.unwrap();
    assert_eq!(response.records.len(), 1);
}

#[tokio::test]
async fn test_constant_token_hits_request_ceiling() {
    let server = require_mock_server!();
    Mock::given(method("GET"))
        .respond_with(fixtures::xml(list_records(&[record("loop", "2020-01-01")], Some("same"))))
        .expect(5)
        .mount(&server)
        .await;

    let error = paginator(5)
        .fetch(&list_request(&server))
        .await
        .unwrap_err();
    assert!(matches!(
        error.error(),
        PaginationError::TooManyRequests { limit: 5 }
    ));
    assert_eq!(error.pages(), 5);
    assert_eq!(error.partial().records.len(), 5);
}

#[tokio::test]
async fn test_failure_mid_chain_keeps_partial_aggregate() {
    let server = require_mock_server!();
    Mock::given(method("GET"))
        .and(query_param_is_missing("resumptionToken"))
        .respond_with(fixtures::xml(list_records(&[record("a", "2020-01-01")], Some("t1"))))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(query_param("resumptionToken", "t1"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let error = paginator(10)
        .fetch(&list_request(&server))
        .await
        .unwrap_err();
    assert_eq!(error.pages(), 1);
    assert_eq!(error.partial().records.len(), 1);
    assert!(error.protocol_code().is_none());
}

#[tokio::test]
async fn test_first_page_protocol_error_returns_envelope() {
    let server = require_mock_server!();
    Mock::given(method("GET"))
        .respond_with(fixtures::xml(fixtures::oai_error("ListRecords", "noRecordsMatch")))
        .expect(1)
        .mount(&server)
        .await;

    let error = paginator(10)
        .fetch(&list_request(&server))
        .await
        .unwrap_err();
    assert_eq!(error.protocol_code(), Some("noRecordsMatch"));
    assert_eq!(error.pages(), 0);
    assert!(error.partial().payload.is_empty());
}

#[tokio::test]
async fn test_unlimited_ceiling_follows_long_chain() {
    let server = require_mock_server!();
    for page in 0..12 {
        let token = if page == 11 {
            String::new()
        } else {
            format!("p{}", page + 1)
        };
        let matcher = if page == 0 {
            Mock::given(query_param_is_missing("resumptionToken"))
        } else {
            Mock::given(query_param("resumptionToken", format!("p{page}").as_str()))
        };
        matcher
            .respond_with(fixtures::xml(list_records(
                &[record(&format!("r{page}"), "2020-01-01")],
                Some(token.as_str()),
            )))
            .expect(1)
            .mount(&server)
            .await;
    }

    let response = paginator(0).fetch(&list_request(&server)).await.unwrap();
    assert_eq!(response.records.len(), 12);
    assert_eq!(response.records[11].header.identifier, "r11");
}
