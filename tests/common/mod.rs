//! Common test utilities

use lantern::models::ScanConfig;
use wiremock::ResponseTemplate;

/// Creates a test ScanConfig pointing to a wiremock server
pub fn test_config(target: &str) -> ScanConfig {
    let mut config = ScanConfig::new(format!("{target}/"));
    config.max_depth = 3;
    config.max_pages = 50;
    config.max_concurrent = 2;
    config.timeout_ms = 5000;
    config
}

/// HTML response with the right Content-Type. wiremock's `set_body_string`
/// forces text/plain, so `set_body_raw` sets both body and content type.
pub fn html_response(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body.to_string(), "text/html")
}
