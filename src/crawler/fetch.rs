//! Fetch strategies: Lite (HTTP + static parse) and Rich (headless browser)
//!
//! Both honour the per-request deadline, send the session cookies and the
//! browser-like default headers, and return the same `FetchedPage` shape.
//! Status correction for soft errors (error pages served with a 200 code)
//! lives here because it applies to both strategies.

use crate::crawler::browser::BrowserFetcher;
use crate::error::Result;
use crate::http::HttpClient;
use std::time::{Duration, Instant};
use url::Url;

/// What a fetch produced, regardless of strategy
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub status_code: u16,
    pub body: String,
    pub content_type: Option<String>,
    /// `Location` header observed on the final response, when the stack exposes one
    pub location: Option<String>,
    /// Raw URL tokens pulled from the live DOM (Rich only); when present the
    /// scheduler uses these instead of re-parsing `body`
    pub dom_links: Option<Vec<String>>,
    pub response_time: Duration,
}

impl FetchedPage {
    pub fn is_json(&self) -> bool {
        self.content_type
            .as_deref()
            .map(|ct| ct.contains("application/json"))
            .unwrap_or(false)
    }
}

/// The two interchangeable page-rendering backends
pub enum FetchStrategy {
    /// Plain HTTP GET + static HTML parse
    Lite(HttpClient),
    /// Headless browser with interactive reveal
    Rich(BrowserFetcher),
}

impl FetchStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            FetchStrategy::Lite(_) => "lite",
            FetchStrategy::Rich(_) => "rich",
        }
    }

    /// Fetches one URL. The deadline is enforced by the underlying client
    /// (Lite) or the navigation timeout (Rich).
    pub async fn fetch(&self, url: &Url) -> Result<FetchedPage> {
        match self {
            FetchStrategy::Lite(client) => fetch_lite(client, url).await,
            FetchStrategy::Rich(browser) => browser.fetch(url).await,
        }
    }
}

async fn fetch_lite(client: &HttpClient, url: &Url) -> Result<FetchedPage> {
    let started = Instant::now();
    let response = client.get(url.as_str()).await?;

    let status_code = response.status().as_u16();
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_lowercase());
    let location = response
        .headers()
        .get(reqwest::header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body = response.text().await.unwrap_or_default();

    Ok(FetchedPage {
        status_code,
        body,
        content_type,
        location,
        dom_links: None,
        response_time: started.elapsed(),
    })
}

/// One soft-error rule: fire when any pattern matches and, where anchors are
/// given, at least one anchor substring is also present.
struct SoftErrorRule {
    code: u16,
    patterns: &'static [&'static str],
    anchors: Option<&'static [&'static str]>,
}

/// Tie order is 404 > 403 > 500 > 401: the first applicable rule wins
const SOFT_ERROR_RULES: &[SoftErrorRule] = &[
    SoftErrorRule {
        code: 404,
        patterns: &[
            "404",
            "not found",
            "page not found",
            "trang không tồn tại",
            "không tìm thấy",
        ],
        anchors: Some(&["404", "not found", "không tìm thấy"]),
    },
    SoftErrorRule {
        code: 403,
        patterns: &[
            "403",
            "forbidden",
            "access denied",
            "permission denied",
            "không có quyền",
            "bị cấm",
        ],
        anchors: None,
    },
    SoftErrorRule {
        code: 500,
        patterns: &["500", "internal server error", "server error", "lỗi máy chủ"],
        anchors: None,
    },
    SoftErrorRule {
        code: 401,
        patterns: &["401", "unauthorized", "authentication required", "chưa đăng nhập"],
        anchors: None,
    },
];

/// Rewrites a literal 200 whose body reads like an error page.
/// Non-200 statuses pass through untouched.
pub fn correct_soft_error(status_code: u16, body: &str) -> u16 {
    if status_code != 200 {
        return status_code;
    }
    let lower = body.to_lowercase();
    for rule in SOFT_ERROR_RULES {
        let pattern_hit = rule.patterns.iter().any(|p| lower.contains(p));
        if !pattern_hit {
            continue;
        }
        let anchored = rule
            .anchors
            .map(|anchors| anchors.iter().any(|a| lower.contains(a)))
            .unwrap_or(true);
        if anchored {
            return rule.code;
        }
    }
    status_code
}

/// Bounded body prefix stored on error results
pub fn error_body_prefix(body: &str) -> String {
    body.chars().take(1000).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_soft_404_detected() {
        assert_eq!(correct_soft_error(200, "<h1>404 Not Found</h1>"), 404);
        assert_eq!(correct_soft_error(200, "Trang không tồn tại - 404"), 404);
    }

    #[test]
    fn test_soft_403_unconditional() {
        assert_eq!(correct_soft_error(200, "Access Denied"), 403);
        assert_eq!(correct_soft_error(200, "Bạn không có quyền truy cập"), 403);
    }

    #[test]
    fn test_soft_500_and_401() {
        assert_eq!(correct_soft_error(200, "Internal Server Error"), 500);
        assert_eq!(correct_soft_error(200, "Authentication required"), 401);
    }

    #[test]
    fn test_tie_order_prefers_404() {
        // both 404 and 500 patterns present: 404 wins
        assert_eq!(
            correct_soft_error(200, "404 not found after a server error"),
            404
        );
    }

    #[test]
    fn test_real_statuses_untouched() {
        assert_eq!(correct_soft_error(301, "404 not found"), 301);
        assert_eq!(correct_soft_error(500, "fine"), 500);
    }

    #[test]
    fn test_clean_200_untouched() {
        assert_eq!(correct_soft_error(200, "<h1>Welcome</h1>"), 200);
        assert_eq!(correct_soft_error(200, "all good here"), 200);
    }

    #[test]
    fn test_error_body_prefix_bounded() {
        let body = "x".repeat(5000);
        assert_eq!(error_body_prefix(&body).len(), 1000);
        assert_eq!(error_body_prefix("short"), "short");
    }
}
