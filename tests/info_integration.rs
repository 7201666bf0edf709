//! Integration tests for the repository description fan-out.

use std::time::{Duration, Instant};

use oai_mirror::{Describer, Verb};
use tempfile::TempDir;
use wiremock::matchers::{method, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

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

fn describer(dir: &TempDir) -> Describer {
    fixtures::fast_config(dir.path()).describer().unwrap()
}

async fn mount(server: &MockServer, verb: &str, response: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(query_param("verb", verb))
        .respond_with(response)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_describe_collects_all_three_verbs() {
    let server = require_mock_server!();
    let dir = TempDir::new().unwrap();
    mount(&server, "Identify", fixtures::xml(fixtures::identify("2001-01-01"))).await;
    mount(&server, "ListSets", fixtures::xml(fixtures::list_sets(&["a", "b", "c"]))).await;
    mount(
        &server,
        "ListMetadataFormats",
        fixtures::xml(fixtures::list_metadata_formats(&["oai_dc", "marcxml"])),
    )
    .await;

    let endpoint = format!("{}/oai", server.uri());
    let info = describer(&dir)
        .describe(&endpoint, Duration::from_secs(5))
        .await
        .unwrap();

    assert_eq!(info.endpoint, endpoint);
    assert_eq!(info.identify.unwrap().repository_name, "Test Repository");
    assert_eq!(info.sets.len(), 3);
    assert_eq!(info.formats.len(), 2);
    assert_eq!(info.formats[1].prefix, "marcxml");
    assert!(info.errors.is_empty());
    assert!(info.elapsed > 0.0);
}

#[tokio::test]
async fn test_verbs_run_concurrently() {
    let server = require_mock_server!();
    let dir = TempDir::new().unwrap();
    let delay = Duration::from_millis(500);
    mount(
        &server,
        "Identify",
        fixtures::xml(fixtures::identify("2001-01-01")).set_delay(delay),
    )
    .await;
    mount(
        &server,
        "ListSets",
        fixtures::xml(fixtures::list_sets(&["a"])).set_delay(delay),
    )
    .await;
    mount(
        &server,
        "ListMetadataFormats",
        fixtures::xml(fixtures::list_metadata_formats(&["oai_dc"])).set_delay(delay),
    )
    .await;

    let started = Instant::now();
    let info = describer(&dir)
        .describe(&format!("{}/oai", server.uri()), Duration::from_secs(5))
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert!(elapsed >= delay);
    assert!(elapsed < Duration::from_millis(1200), "took {elapsed:?}");
    assert!(info.errors.is_empty());
    assert!(info.identify.is_some());
    assert_eq!(info.sets.len(), 1);
    assert_eq!(info.formats.len(), 1);
}

#[tokio::test]
async fn test_hung_verb_yields_partial_result_and_timeout_entry() {
    let server = require_mock_server!();
    let dir = TempDir::new().unwrap();
    mount(&server, "Identify", fixtures::xml(fixtures::identify("2001-01-01"))).await;
    mount(
        &server,
        "ListMetadataFormats",
        fixtures::xml(fixtures::list_metadata_formats(&["oai_dc"])),
    )
    .await;
    mount(
        &server,
        "ListSets",
        fixtures::xml(fixtures::list_sets(&["late"])).set_delay(Duration::from_secs(3)),
    )
    .await;

    let started = Instant::now();
    let timed_out = describer(&dir)
        .describe(&format!("{}/oai", server.uri()), Duration::from_millis(400))
        .await
        .unwrap_err();
    assert!(started.elapsed() < Duration::from_secs(2));

    assert_eq!(timed_out.pending(), [Verb::ListSets]);
    let info = timed_out.into_info();
    assert!(info.identify.is_some());
    assert_eq!(info.formats.len(), 1);
    assert!(info.sets.is_empty());
    let failure = info.failure(Verb::ListSets).unwrap();
    assert!(failure.message.contains("timed out"));
}

#[tokio::test]
async fn test_lenient_code_is_not_recorded() {
    let server = require_mock_server!();
    let dir = TempDir::new().unwrap();
    mount(&server, "Identify", fixtures::xml(fixtures::identify("2001-01-01"))).await;
    mount(
        &server,
        "ListSets",
        fixtures::xml(fixtures::oai_error("ListSets", "noSetHierarchy")),
    )
    .await;
    mount(
        &server,
        "ListMetadataFormats",
        fixtures::xml(fixtures::list_metadata_formats(&["oai_dc"])),
    )
    .await;

    let info = describer(&dir)
        .describe(&format!("{}/oai", server.uri()), Duration::from_secs(5))
        .await
        .unwrap();
    assert!(info.errors.is_empty());
    assert!(info.sets.is_empty());
}

#[tokio::test]
async fn test_one_failing_verb_keeps_the_others() {
    let server = require_mock_server!();
    let dir = TempDir::new().unwrap();
    mount(&server, "Identify", fixtures::xml(fixtures::identify("2001-01-01"))).await;
    mount(&server, "ListSets", fixtures::xml(fixtures::list_sets(&["a"]))).await;
    mount(&server, "ListMetadataFormats", ResponseTemplate::new(404)).await;

    let info = describer(&dir)
        .describe(&format!("{}/oai", server.uri()), Duration::from_secs(5))
        .await
        .unwrap();
    assert!(info.identify.is_some());
    assert_eq!(info.sets.len(), 1);
    assert_eq!(info.errors.len(), 1);
    let failure = info.failure(Verb::ListMetadataFormats).unwrap();
    assert!(failure.message.contains("404"));
}
