//! Integration tests for the HTTP-backed plugins
//!
//! These tests validate the wire behavior of `rest-read` and
//! `index-write` against a mock HTTP server:
//! - Pagination across `meta.next` cursors
//! - Date range and auth propagation
//! - Bulk NDJSON bodies and monthly index routing
//! - Delete-by-query clearing
//! - Error handling for upstream failures

use chrono::NaiveDate;
use futures::StreamExt;
use gleaner_common::DateRange;
use gleaner_core::{PluginError, PluginOptions, Record, SourcedRecord};
use serde_json::json;
use wiremock::matchers::{
    basic_auth, body_json, body_string_contains, header, method, path, query_param,
};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn date(month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, month, day).unwrap()
}

fn may_range(start: u32, end: u32) -> DateRange {
    DateRange::new(date(5, start), date(5, end)).unwrap()
}

fn rest_options(server: &MockServer) -> PluginOptions {
    PluginOptions::new("zamboni", "sources.zamboni", std::env::temp_dir())
        .with("endpoint", format!("{}/api/v1/downloads/", server.uri()))
        .with("kind", "downloads")
}

fn index_options(server: &MockServer) -> PluginOptions {
    PluginOptions::new("search", "targets.search", std::env::temp_dir())
        .with("url", server.uri())
        .with("index_prefix", "metrics")
}

fn sourced(month: u32, day: u32, count: i64) -> SourcedRecord {
    SourcedRecord::new(
        "ga",
        Record::new(date(month, day), "downloads").with_field("count", count),
    )
}

/// Helper to create a page with a cursor to the next one
fn page(counts: &[i64], next: Option<&str>) -> serde_json::Value {
    let objects: Vec<serde_json::Value> = counts
        .iter()
        .map(|count| json!({ "recorded": "2024-05-01", "count": count }))
        .collect();
    json!({ "objects": objects, "meta": { "next": next } })
}

// ============================================================================
// rest-read Tests
// ============================================================================

#[tokio::test]
async fn test_rest_source_walks_every_page() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/downloads/"))
        .and(query_param("start", "2024-05-01"))
        .and(query_param("end", "2024-05-02"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(page(&[11, 12], Some("/api/v1/downloads/?page=2"))),
        )
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/v1/downloads/"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(&[13], None)))
        .mount(&server)
        .await;

    let registry = gleaner_plugins::builtin();
    let source = registry
        .build_source("rest-read", &rest_options(&server))
        .unwrap();

    let stream = source.extract(may_range(1, 2)).await.unwrap();
    let items: Vec<_> = stream.collect().await;

    assert_eq!(items.len(), 3);
    let counts: Vec<i64> = items
        .into_iter()
        .map(|item| {
            let record = item.unwrap();
            assert_eq!(record.kind, "downloads");
            assert_eq!(record.date, date(5, 1));
            assert!(!record.payload.contains_key("recorded"));
            record.payload["count"].as_i64().unwrap()
        })
        .collect();
    assert_eq!(counts, vec![11, 12, 13]);
}

#[tokio::test]
async fn test_rest_source_sends_basic_auth() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/downloads/"))
        .and(basic_auth("ops", "sekrit"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(&[], None)))
        .expect(1)
        .mount(&server)
        .await;

    let options = rest_options(&server)
        .with("username", "ops")
        .with("password", "sekrit");
    let registry = gleaner_plugins::builtin();
    let source = registry.build_source("rest-read", &options).unwrap();

    let stream = source.extract(may_range(1, 1)).await.unwrap();
    let items: Vec<_> = stream.collect().await;
    assert!(items.is_empty());
}

#[tokio::test]
async fn test_rest_source_treats_a_missing_cursor_page_as_the_end() {
    let server = MockServer::start().await;

    // Page two is never mounted; the fetch comes back 404.
    Mock::given(method("GET"))
        .and(path("/api/v1/downloads/"))
        .and(query_param("start", "2024-05-01"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(&[11], Some("?page=2"))))
        .mount(&server)
        .await;

    let registry = gleaner_plugins::builtin();
    let source = registry
        .build_source("rest-read", &rest_options(&server))
        .unwrap();

    let stream = source.extract(may_range(1, 1)).await.unwrap();
    let items: Vec<_> = stream.collect().await;

    assert_eq!(items.len(), 1);
    assert!(items[0].is_ok());
}

#[tokio::test]
async fn test_rest_source_surfaces_upstream_5xx() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/downloads/"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let registry = gleaner_plugins::builtin();
    let source = registry
        .build_source("rest-read", &rest_options(&server))
        .unwrap();

    let mut stream = source.extract(may_range(1, 1)).await.unwrap();
    let first = stream.next().await.unwrap();
    let err = first.unwrap_err();
    assert!(matches!(err, PluginError::Server(_)));
    assert!(err.to_string().contains("500"));
}

#[tokio::test]
async fn test_rest_source_purge_issues_a_ranged_delete() {
    let server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/api/v1/downloads/"))
        .and(query_param("start", "2024-05-01"))
        .and(query_param("end", "2024-05-03"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let options = rest_options(&server).with("purge", true);
    let registry = gleaner_plugins::builtin();
    let source = registry.build_source("rest-read", &options).unwrap();

    source.purge(may_range(1, 3)).await.unwrap();
}

#[tokio::test]
async fn test_rest_source_purge_is_off_by_default() {
    let server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let registry = gleaner_plugins::builtin();
    let source = registry
        .build_source("rest-read", &rest_options(&server))
        .unwrap();

    source.purge(may_range(1, 3)).await.unwrap();
}

// ============================================================================
// index-write Tests
// ============================================================================

#[tokio::test]
async fn test_index_write_posts_one_bulk_body_with_monthly_routing() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/_bulk"))
        .and(header("content-type", "application/x-ndjson"))
        .and(body_string_contains("\"_index\":\"metrics_2024_05\""))
        .and(body_string_contains("\"_index\":\"metrics_2024_06\""))
        .and(body_string_contains("\"source_id\":\"ga\""))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "errors": false, "items": [] })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let registry = gleaner_plugins::builtin();
    let target = registry
        .build_target("index-write", &index_options(&server))
        .unwrap();

    target
        .inject(&[sourced(5, 31, 7), sourced(6, 1, 8)])
        .await
        .unwrap();
}

#[tokio::test]
async fn test_index_write_rejects_item_level_failures() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/_bulk"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "errors": true,
            "items": [{ "index": { "status": 400 } }]
        })))
        .mount(&server)
        .await;

    let registry = gleaner_plugins::builtin();
    let target = registry
        .build_target("index-write", &index_options(&server))
        .unwrap();

    let err = target.inject(&[sourced(5, 1, 7)]).await.unwrap_err();
    assert!(err.to_string().contains("item-level"));
}

#[tokio::test]
async fn test_index_write_surfaces_upstream_5xx() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/_bulk"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let registry = gleaner_plugins::builtin();
    let target = registry
        .build_target("index-write", &index_options(&server))
        .unwrap();

    let err = target.inject(&[sourced(5, 1, 7)]).await.unwrap_err();
    assert!(matches!(err, PluginError::Server(_)));
}

#[tokio::test]
async fn test_index_clear_deletes_from_every_monthly_index() {
    let server = MockServer::start().await;

    let expected_body = json!({
        "query": {
            "bool": {
                "filter": [
                    { "terms": { "source_id": ["ga"] } },
                    { "range": { "date": { "gte": "2024-05-30", "lte": "2024-06-02" } } },
                ]
            }
        }
    });

    Mock::given(method("POST"))
        .and(path("/metrics_2024_05,metrics_2024_06/_delete_by_query"))
        .and(query_param("ignore_unavailable", "true"))
        .and(body_json(expected_body))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "deleted": 7 })))
        .expect(1)
        .mount(&server)
        .await;

    let registry = gleaner_plugins::builtin();
    let target = registry
        .build_target("index-write", &index_options(&server))
        .unwrap();

    let range = DateRange::new(date(5, 30), date(6, 2)).unwrap();
    let removed = target.clear(range, &["ga".to_string()]).await.unwrap();
    assert_eq!(removed, 7);
}

#[tokio::test]
async fn test_index_clear_without_sources_makes_no_request() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let registry = gleaner_plugins::builtin();
    let target = registry
        .build_target("index-write", &index_options(&server))
        .unwrap();

    let removed = target.clear(may_range(1, 2), &[]).await.unwrap();
    assert_eq!(removed, 0);
}
