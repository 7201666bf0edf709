//! OAI-PMH response builders and fast test configuration.

use std::path::Path;
use std::time::Duration;

use oai_mirror::{Config, RetryPolicy};
use wiremock::ResponseTemplate;

/// Wraps a verb section in a complete OAI-PMH envelope.
pub fn envelope(verb: &str, section: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<OAI-PMH xmlns="http://www.openarchives.org/OAI/2.0/">
  <responseDate>2024-05-01T10:00:00Z</responseDate>
  <request verb="{verb}">http://localhost/oai</request>
  {section}
</OAI-PMH>"#
    )
}

pub fn identify(earliest_datestamp: &str) -> String {
    envelope(
        "Identify",
        &format!(
            "<Identify><repositoryName>Test Repository</repositoryName><baseURL>http://localhost/oai</baseURL><protocolVersion>2.0</protocolVersion><adminEmail>admin@example.org</adminEmail><earliestDatestamp>{earliest_datestamp}</earliestDatestamp><deletedRecord>no</deletedRecord><granularity>YYYY-MM-DD</granularity></Identify>"
        ),
    )
}

pub fn record(identifier: &str, datestamp: &str) -> String {
    format!(
        "<record><header><identifier>{identifier}</identifier><datestamp>{datestamp}</datestamp></header><metadata><dc:title xmlns:dc=\"http://purl.org/dc/elements/1.1/\">{identifier}</dc:title></metadata></record>"
    )
}

/// A `ListRecords` page; `token` of `Some("")` emits an empty token element.
pub fn list_records(records: &[String], token: Option<&str>) -> String {
    let token = match token {
        Some("") => "<resumptionToken/>".to_string(),
        Some(value) => format!("<resumptionToken>{value}</resumptionToken>"),
        None => String::new(),
    };
    envelope(
        "ListRecords",
        &format!("<ListRecords>{}{token}</ListRecords>", records.concat()),
    )
}

pub fn list_sets(specs: &[&str]) -> String {
    let sets: String = specs
        .iter()
        .map(|spec| format!("<set><setSpec>{spec}</setSpec><setName>Set {spec}</setName></set>"))
        .collect();
    envelope("ListSets", &format!("<ListSets>{sets}</ListSets>"))
}

pub fn list_metadata_formats(prefixes: &[&str]) -> String {
    let formats: String = prefixes
        .iter()
        .map(|prefix| {
            format!(
                "<metadataFormat><metadataPrefix>{prefix}</metadataPrefix><schema>http://localhost/{prefix}.xsd</schema><metadataNamespace>http://localhost/{prefix}/</metadataNamespace></metadataFormat>"
            )
        })
        .collect();
    envelope(
        "ListMetadataFormats",
        &format!("<ListMetadataFormats>{formats}</ListMetadataFormats>"),
    )
}

pub fn oai_error(verb: &str, code: &str) -> String {
    envelope(verb, &format!(r#"<error code="{code}">{code} reported</error>"#))
}

pub fn xml(body: String) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body.into_bytes(), "text/xml; charset=utf-8")
}

/// Retry policy with millisecond delays.
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy::new(3, Duration::from_millis(10), Duration::from_millis(50), 2.0)
        .with_max_jitter(Duration::from_millis(5))
}

/// Configuration rooted at `cache_root` with fast retries and short timeouts.
pub fn fast_config(cache_root: &Path) -> Config {
    let mut config = Config::default();
    config.transport.retry = fast_retry();
    config.transport.request_timeout = Duration::from_secs(5);
    config.transport.overall_timeout = Duration::from_secs(20);
    config.cache.root = cache_root.to_path_buf();
    config
}
