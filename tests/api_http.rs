// tests/api_http.rs
//
// HTTP-level tests for the public API Router without opening sockets.
// We exercise the router directly via tower::ServiceExt::oneshot; upstream
// providers are wiremock servers wired in through a TOML config.
//
// Covered:
// - GET /health
// - GET /api/feeds
// - GET /api/feeds/{feed}  (MISS → HIT header, query params, 404)
// - GET /debug/limits/{key}

use http::{Request, StatusCode};
use serde_json::Value as Json;
use shuttle_axum::axum::{
    body::{self, Body},
    Router,
};
use tower::ServiceExt as _; // for `oneshot`
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use portal_aggregator::app_from_config;
use portal_aggregator::config::AppConfig;

const BODY_LIMIT: usize = 1024 * 1024;

const RSS: &str = r#"<rss><channel>
<item><title>Kata Noi lifeguards return</title><category>Beach</category><pubDate>Tue, 10 Jun 2025 03:00:00 +0000</pubDate></item>
<item><title>Old Town night market</title><category>Food</category><pubDate>Tue, 10 Jun 2025 02:00:00 +0000</pubDate></item>
<item><title>Airport shuttle timetable</title><category>Travel</category><pubDate>Tue, 10 Jun 2025 01:00:00 +0000</pubDate></item>
</channel></rss>"#;

async fn upstream() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rss"))
        .respond_with(ResponseTemplate::new(200).set_body_string(RSS))
        .mount(&server)
        .await;
    server
}

fn test_router(server: &MockServer) -> Router {
    let toml = format!(
        r#"
[[feeds]]
name = "news"

[[feeds.sources]]
name = "island-rss"
url = "{uri}/rss"
kind = "rss"
timeout_ms = 2000
language = "en"

[[feeds]]
name = "empty"
"#,
        uri = server.uri()
    );
    let cfg = AppConfig::from_toml_str(&toml).expect("config");
    app_from_config(&cfg).expect("router")
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Option<String>, Json) {
    let req = Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .expect("build request");
    let resp = app.clone().oneshot(req).await.expect("oneshot");
    let status = resp.status();
    let cache = resp
        .headers()
        .get("x-aggregator-cache")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body");
    let json = serde_json::from_slice(&bytes).unwrap_or(Json::Null);
    (status, cache, json)
}

#[tokio::test]
async fn health_returns_ok() {
    let server = upstream().await;
    let app = test_router(&server);

    let req = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .expect("build GET /health");
    let resp = app.oneshot(req).await.expect("oneshot /health");
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT).await.unwrap();
    assert_eq!(&bytes[..], b"ok");
}

#[tokio::test]
async fn lists_configured_feeds() {
    let server = upstream().await;
    let app = test_router(&server);
    let (status, _, v) = get(&app, "/api/feeds").await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<_> = v
        .as_array()
        .expect("array")
        .iter()
        .map(|f| f["name"].as_str().unwrap_or_default().to_string())
        .collect();
    assert_eq!(names, vec!["news", "empty"]);
    assert_eq!(v[0]["sources"][0], "island-rss");
}

#[tokio::test]
async fn feed_is_fetched_then_served_from_cache() {
    let server = upstream().await;
    let app = test_router(&server);

    let (status, cache, v) = get(&app, "/api/feeds/news").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cache.as_deref(), Some("MISS"));
    assert_eq!(v["servedFromCache"], false);
    assert_eq!(v["items"].as_array().unwrap().len(), 3);
    assert_eq!(v["sourceOutcomes"][0]["status"], "success");
    assert_eq!(v["items"][0]["title"], "Kata Noi lifeguards return");

    let (_, cache, v) = get(&app, "/api/feeds/news").await;
    assert_eq!(cache.as_deref(), Some("HIT"));
    assert_eq!(v["servedFromCache"], true);
    assert_eq!(v["cacheStatus"], "hit");
}

#[tokio::test]
async fn query_params_filter_and_limit() {
    let server = upstream().await;
    let app = test_router(&server);

    let (_, _, v) = get(&app, "/api/feeds/news?category=food").await;
    let items = v["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["title"], "Old Town night market");

    let (_, _, v) = get(&app, "/api/feeds/news?limit=2&lang=en").await;
    assert_eq!(v["items"].as_array().unwrap().len(), 2);

    let (_, _, v) = get(&app, "/api/feeds/news?lang=th").await;
    assert!(v["items"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn feed_without_sources_still_answers() {
    let server = upstream().await;
    let app = test_router(&server);
    let (status, cache, v) = get(&app, "/api/feeds/empty").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cache.as_deref(), Some("MISS"));
    assert!(v["items"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn unknown_feed_is_404_json() {
    let server = upstream().await;
    let app = test_router(&server);
    let (status, cache, v) = get(&app, "/api/feeds/weather").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(cache.is_none());
    assert_eq!(v["error"], "unknown feed");
    assert_eq!(v["feed"], "weather");
}

#[tokio::test]
async fn debug_limits_shows_bucket_after_a_pass() {
    let server = upstream().await;
    let app = test_router(&server);

    let (status, _, _) = get(&app, "/debug/limits/news").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    get(&app, "/api/feeds/news").await;
    let (status, _, v) = get(&app, "/debug/limits/news").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v["windowCount"], 1);
    assert!(v["cooldownUntil"].is_null());
}
