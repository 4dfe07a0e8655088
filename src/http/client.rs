//! HTTP client wrapper with session cookies, custom headers and request tracking

use crate::error::Result;
use crate::http::auth::CookieJar;
use reqwest::{Client, Response};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Default browser-like User-Agent, used unless `custom_headers` overrides it
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36";

/// HTTP client for crawl fetches. The cookie jar is serialized into a single
/// `Cookie` header at request time; custom headers are applied on top of the
/// defaults so operator-supplied values win.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    custom_headers: HashMap<String, String>,
    cookie_header: Option<String>,
    request_count: Arc<AtomicU64>,
}

impl HttpClient {
    /// Builds a client honouring the per-request deadline and redirect following
    pub fn new(
        timeout_ms: u64,
        custom_headers: &HashMap<String, String>,
        cookies: &CookieJar,
    ) -> Result<Self> {
        let has_custom_ua = custom_headers
            .keys()
            .any(|k| k.eq_ignore_ascii_case("user-agent"));

        let mut builder = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .redirect(reqwest::redirect::Policy::limited(10));
        if !has_custom_ua {
            builder = builder.user_agent(DEFAULT_USER_AGENT);
        }
        let client = builder.build()?;

        let cookie_header = if cookies.is_empty() {
            None
        } else {
            Some(cookies.header_value())
        };

        Ok(Self {
            client,
            custom_headers: custom_headers.clone(),
            cookie_header,
            request_count: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Sends a GET request with the session cookies and custom headers applied
    pub async fn get(&self, url: &str) -> Result<Response> {
        self.request_count.fetch_add(1, Ordering::Relaxed);

        let mut req = self.client.get(url);
        for (key, value) in &self.custom_headers {
            req = req.header(key.as_str(), value.as_str());
        }
        if let Some(ref cookie) = self.cookie_header {
            req = req.header("Cookie", cookie.as_str());
        }

        let response = req.send().await?;
        debug!("Response: {} for {}", response.status(), response.url());
        Ok(response)
    }

    /// Total requests issued through this client
    pub fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_builds_with_cookies() {
        let mut jar = CookieJar::new();
        jar.set("session", "abc123");
        let client =
            HttpClient::new(5000, &HashMap::new(), &jar).expect("client should build");
        assert_eq!(client.cookie_header.as_deref(), Some("session=abc123"));
        assert_eq!(client.request_count(), 0);
    }

    #[test]
    fn test_client_no_cookie_header_when_empty() {
        let client = HttpClient::new(5000, &HashMap::new(), &CookieJar::new())
            .expect("client should build");
        assert!(client.cookie_header.is_none());
    }
}
