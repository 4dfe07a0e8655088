//! End-to-end crawl scenarios against a mock server

mod common;

use common::{html_response, test_config};
use lantern::models::{ErrorKind, ScanStatus, Severity};
use lantern::Engine;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mount_leaf(server: &MockServer, p: &str) {
    Mock::given(method("GET"))
        .and(path(p))
        .respond_with(html_response("<html><body>leaf</body></html>"))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_single_static_page() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html_response(
            r#"<a href="/about">a</a><a href="https://other.test/">x</a>"#,
        ))
        .mount(&server)
        .await;
    mount_leaf(&server, "/about").await;

    let engine = Engine::new();
    let report = engine
        .scan_website(test_config(&server.uri()))
        .await
        .expect("scan");

    assert_eq!(report.results.len(), 2, "results: {:?}", report.results);
    assert!(report.results.iter().all(|r| r.status == ScanStatus::Success));

    let root = report
        .results
        .iter()
        .find(|r| r.url == format!("{}/", server.uri()))
        .expect("root result");
    assert_eq!(root.links, vec![format!("{}/about", server.uri())]);
    assert_eq!(root.depth, 0);

    let about = report
        .results
        .iter()
        .find(|r| r.url.ends_with("/about"))
        .expect("about result");
    assert!(about.links.is_empty());
    assert_eq!(about.depth, 1);

    // the cross-origin link never appears anywhere
    assert!(!report
        .results
        .iter()
        .any(|r| r.links.iter().any(|l| l.contains("other.test"))));
}

#[tokio::test]
async fn test_soft_404_detection() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(html_response("<h1>404 Not Found</h1>"))
        .mount(&server)
        .await;

    let mut config = test_config(&server.uri());
    config.url = format!("{}/missing", server.uri());

    let report = Engine::new().scan_website(config).await.expect("scan");

    assert_eq!(report.results.len(), 1);
    let result = &report.results[0];
    assert_eq!(result.status_code, Some(404));
    assert_eq!(result.status, ScanStatus::Error);
    assert_eq!(result.error_kind, Some(ErrorKind::Client));
    assert_eq!(result.error_severity, Some(Severity::Medium));
    let body = result.response_body.as_deref().expect("body prefix");
    assert!(body.contains("404 Not Found"));
}

#[tokio::test]
async fn test_soft_404_can_be_disabled() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(html_response("<h1>404 Not Found</h1>"))
        .mount(&server)
        .await;

    let mut config = test_config(&server.uri());
    config.url = format!("{}/missing", server.uri());
    config.detect_soft_errors = false;

    let report = Engine::new().scan_website(config).await.expect("scan");
    assert_eq!(report.results[0].status_code, Some(200));
    assert_eq!(report.results[0].status, ScanStatus::Success);
}

#[tokio::test]
async fn test_static_assets_never_scanned() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html_response(r#"<a href="/x.css">c</a><a href="/p">p</a>"#))
        .mount(&server)
        .await;
    mount_leaf(&server, "/p").await;

    let report = Engine::new()
        .scan_website(test_config(&server.uri()))
        .await
        .expect("scan");

    assert!(report.results.iter().any(|r| r.url.ends_with("/p")));
    assert!(!report.results.iter().any(|r| r.url.ends_with("/x.css")));
    // filtered as a static asset: not reported as a link either
    assert!(!report
        .results
        .iter()
        .any(|r| r.links.iter().any(|l| l.ends_with("/x.css"))));
}

#[tokio::test]
async fn test_path_regex_filter() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html_response(
            r#"<a href="/admin/x">a</a><a href="/public/y">b</a><a href="/api/v1/z">c</a>"#,
        ))
        .mount(&server)
        .await;
    mount_leaf(&server, "/admin/x").await;
    mount_leaf(&server, "/public/y").await;
    mount_leaf(&server, "/api/v1/z").await;

    let mut config = test_config(&server.uri());
    config.path_regex_filter = Some("/admin|/api".to_string());

    let report = Engine::new().scan_website(config).await.expect("scan");

    let scanned: Vec<&str> = report.results.iter().map(|r| r.url.as_str()).collect();
    assert!(scanned.iter().any(|u| u.ends_with("/admin/x")));
    assert!(scanned.iter().any(|u| u.ends_with("/api/v1/z")));
    assert!(!scanned.iter().any(|u| u.ends_with("/public/y")));

    // the filter gates enqueueing, not link reporting
    let root = report
        .results
        .iter()
        .find(|r| r.depth == 0)
        .expect("root result");
    assert!(root.links.iter().any(|l| l.ends_with("/public/y")));
}

#[tokio::test]
async fn test_invalid_regex_blocks_all_discovered_links() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html_response(r#"<a href="/next">n</a>"#))
        .mount(&server)
        .await;
    mount_leaf(&server, "/next").await;

    let mut config = test_config(&server.uri());
    config.path_regex_filter = Some("(unclosed".to_string());

    let report = Engine::new().scan_website(config).await.expect("scan");

    // the seed was enqueued before filtering applies; nothing else passes
    assert_eq!(report.results.len(), 1);
    assert!(report.results[0].url.ends_with('/'));
}

#[tokio::test]
async fn test_max_pages_cap() {
    let server = MockServer::start().await;

    let links: String = (1..=9)
        .map(|i| format!(r#"<a href="/p{i}">{i}</a>"#))
        .collect();
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html_response(&links))
        .mount(&server)
        .await;
    for i in 1..=9 {
        mount_leaf(&server, &format!("/p{i}")).await;
    }

    let mut config = test_config(&server.uri());
    config.max_pages = 1;

    let report = Engine::new().scan_website(config).await.expect("scan");
    assert_eq!(report.results.len(), 1);

    let mut config = test_config(&server.uri());
    config.max_pages = 4;
    let report = Engine::new().scan_website(config).await.expect("scan");
    assert_eq!(report.results.len(), 4);
}

#[tokio::test]
async fn test_depth_limiting() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html_response(r#"<a href="/level1">1</a>"#))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/level1"))
        .respond_with(html_response(r#"<a href="/level2">2</a>"#))
        .mount(&server)
        .await;
    mount_leaf(&server, "/level2").await;

    let mut config = test_config(&server.uri());
    config.max_depth = 2;

    let report = Engine::new().scan_website(config).await.expect("scan");

    let scanned: Vec<&str> = report.results.iter().map(|r| r.url.as_str()).collect();
    assert!(scanned.iter().any(|u| u.ends_with("/level1")));
    assert!(
        !scanned.iter().any(|u| u.ends_with("/level2")),
        "depth-2 link must not be enqueued: {scanned:?}"
    );
}

#[tokio::test]
async fn test_fragment_link_already_visited() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html_response(r##"<a href="#section">top</a>"##))
        .mount(&server)
        .await;

    let report = Engine::new()
        .scan_website(test_config(&server.uri()))
        .await
        .expect("scan");

    // "#section" normalizes to the seed itself, which was already claimed
    assert_eq!(report.results.len(), 1);
    assert_eq!(report.results[0].links, vec![format!("{}/", server.uri())]);
}

#[tokio::test]
async fn test_json_body_contributes_seeds() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(r#"{"next": "/api/page2", "count": 2}"#, "application/json"),
        )
        .mount(&server)
        .await;
    mount_leaf(&server, "/api/page2").await;

    let mut config = test_config(&server.uri());
    config.url = format!("{}/api", server.uri());

    let report = Engine::new().scan_website(config).await.expect("scan");

    assert!(report.results.iter().any(|r| r.url.ends_with("/api/page2")));
    let api = report
        .results
        .iter()
        .find(|r| r.url.ends_with("/api"))
        .expect("api result");
    assert_eq!(api.links, vec![format!("{}/api/page2", server.uri())]);
}

#[tokio::test]
async fn test_location_header_enqueued() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw("<html><body>ok</body></html>", "text/html")
                .append_header("Location", "/from-location"),
        )
        .mount(&server)
        .await;
    mount_leaf(&server, "/from-location").await;

    let report = Engine::new()
        .scan_website(test_config(&server.uri()))
        .await
        .expect("scan");

    assert!(report
        .results
        .iter()
        .any(|r| r.url.ends_with("/from-location")));
}

#[tokio::test]
async fn test_sitemap_seeds_frontier() {
    let server = MockServer::start().await;

    let sitemap = r#"<?xml version="1.0"?>
        <urlset>
          <url><loc>{base}/from-sitemap</loc></url>
        </urlset>"#
        .replace("{base}", &server.uri());
    Mock::given(method("GET"))
        .and(path("/sitemap.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(sitemap, "application/xml"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html_response("<html><body>home</body></html>"))
        .mount(&server)
        .await;
    mount_leaf(&server, "/from-sitemap").await;

    let report = Engine::new()
        .scan_website(test_config(&server.uri()))
        .await
        .expect("scan");

    let sm = report
        .results
        .iter()
        .find(|r| r.url.ends_with("/from-sitemap"))
        .expect("sitemap-seeded page scanned");
    assert_eq!(sm.depth, 0);
}

#[tokio::test]
async fn test_robots_disallow_mined_for_seeds() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw("User-agent: *\nDisallow: /secret\n", "text/plain"),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html_response("<html><body>home</body></html>"))
        .mount(&server)
        .await;
    mount_leaf(&server, "/secret").await;

    let report = Engine::new()
        .scan_website(test_config(&server.uri()))
        .await
        .expect("scan");

    // disallow rules are mined for discovery, not enforced
    assert!(report.results.iter().any(|r| r.url.ends_with("/secret")));
}

#[tokio::test]
async fn test_server_error_classified_and_summarized() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html_response(r#"<a href="/boom">b</a>"#))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/boom"))
        .respond_with(ResponseTemplate::new(500).set_body_raw("oops", "text/html"))
        .mount(&server)
        .await;

    let report = Engine::new()
        .scan_website(test_config(&server.uri()))
        .await
        .expect("scan");

    let boom = report
        .results
        .iter()
        .find(|r| r.url.ends_with("/boom"))
        .expect("boom result");
    assert_eq!(boom.status, ScanStatus::Error);
    assert_eq!(boom.status_code, Some(500));
    assert_eq!(boom.error_kind, Some(ErrorKind::Server));
    assert_eq!(boom.error_retryable, Some(true));
    assert_eq!(boom.response_body.as_deref(), Some("oops"));

    assert_eq!(report.error_summary.total, 1);
    assert_eq!(report.error_summary.by_kind["server"], 1);
    assert_eq!(report.error_summary.by_status[&500], 1);
    assert_eq!(report.error_summary.recent.len(), 1);
}

#[tokio::test]
async fn test_transport_failure_recorded_not_raised() {
    // point the crawl at a port nobody listens on
    let mut config = test_config("http://127.0.0.1:1");
    config.timeout_ms = 2000;

    let report = Engine::new().scan_website(config).await.expect("scan");

    assert_eq!(report.results.len(), 1);
    let result = &report.results[0];
    assert_eq!(result.status, ScanStatus::Error);
    assert!(result.links.is_empty());
    assert!(result.error.is_some());
    assert!(report.error_summary.total >= 1);
}

#[tokio::test]
async fn test_invalid_seed_fails_fast() {
    let err = Engine::new()
        .scan_website(lantern::ScanConfig::new("not a url"))
        .await
        .expect_err("must fail fast");
    assert!(err.to_string().contains("scan configuration"));
}

#[tokio::test]
async fn test_results_urls_unique() {
    let server = MockServer::start().await;

    // both pages link back to each other and to themselves
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html_response(r#"<a href="/">home</a><a href="/other">o</a>"#))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/other"))
        .respond_with(html_response(r#"<a href="/">home</a><a href="/other">o</a>"#))
        .mount(&server)
        .await;

    let report = Engine::new()
        .scan_website(test_config(&server.uri()))
        .await
        .expect("scan");

    let mut urls: Vec<&str> = report.results.iter().map(|r| r.url.as_str()).collect();
    urls.sort_unstable();
    let before = urls.len();
    urls.dedup();
    assert_eq!(before, urls.len(), "each URL is scanned at most once");
    assert_eq!(report.results.len(), 2);
}
