//! Rich fetch backend: headless Chromium rendering
//!
//! Uses headless Chromium to render JavaScript-heavy pages, perform the
//! interactive reveal (scroll, expand, hover) and extract links from the live
//! DOM. Each scan opens a fresh page context so concurrent workers do not
//! interfere; the browser process itself is shared per session and closed at
//! scheduler shutdown. Only available with the `browser` feature; without it
//! the constructor fails and the engine downgrades to the Lite strategy.

#[cfg(feature = "browser")]
use crate::crawler::fetch::FetchedPage;
#[cfg(feature = "browser")]
use crate::http::auth::AuthOutcome;
#[cfg(feature = "browser")]
use crate::http::auth::CookieJar;
#[cfg(feature = "browser")]
use crate::models::ScanConfig;
#[cfg(feature = "browser")]
use chromiumoxide::cdp::browser_protocol::network::{
    CookieParam, EventResponseReceived, Headers, SetExtraHttpHeadersParams,
};
#[cfg(feature = "browser")]
use chromiumoxide::{Browser, BrowserConfig, Page};
#[cfg(feature = "browser")]
use futures::StreamExt;
#[cfg(feature = "browser")]
use std::sync::{Arc, Mutex};
#[cfg(feature = "browser")]
use std::time::{Duration, Instant};
#[cfg(feature = "browser")]
use tokio::time::{sleep, timeout};
#[cfg(feature = "browser")]
use tracing::{debug, info, warn};
#[cfg(feature = "browser")]
use url::Url;

use crate::error::{LanternError, Result};

/// Interactive reveal: smooth scroll top to bottom, mid and top jumps,
/// horizontal scroll when the document overflows, clicks on the first few
/// dropdown/tab/collapse/load-more triggers, and mouseenter on tooltip hosts.
#[cfg(feature = "browser")]
const REVEAL_JS: &str = r#"
(async () => {
    const sleep = (ms) => new Promise((resolve) => setTimeout(resolve, ms));
    const doc = document.scrollingElement || document.documentElement;

    const step = Math.max(window.innerHeight, 200);
    for (let y = 0; y < doc.scrollHeight; y += step) {
        window.scrollTo({ top: y, behavior: 'smooth' });
        await sleep(120);
    }
    window.scrollTo(0, doc.scrollHeight / 2);
    await sleep(80);
    window.scrollTo(0, 0);
    await sleep(80);
    if (doc.scrollWidth > window.innerWidth) {
        window.scrollTo(doc.scrollWidth, 0);
        await sleep(80);
        window.scrollTo(0, 0);
    }

    const clickFirst = (selector, limit) => {
        Array.from(document.querySelectorAll(selector))
            .slice(0, limit)
            .forEach((el) => { try { el.click(); } catch (e) {} });
    };
    clickFirst('[data-toggle="dropdown"], .dropdown-toggle, [aria-haspopup="true"]', 5);
    clickFirst('[role="tab"], [data-toggle="tab"], .nav-tabs a', 5);
    clickFirst('[data-toggle="collapse"], .accordion-toggle, details:not([open]) summary', 5);
    Array.from(document.querySelectorAll('button, a'))
        .filter((el) => /load more|show more|xem thêm/i.test(el.textContent || ''))
        .slice(0, 5)
        .forEach((el) => { try { el.click(); } catch (e) {} });
    Array.from(document.querySelectorAll('[title], [data-tooltip]'))
        .slice(0, 10)
        .forEach((el) => el.dispatchEvent(new MouseEvent('mouseenter', { bubbles: true })));

    await sleep(250);
    return true;
})()
"#;

/// Live-DOM link extraction mirroring the static catalogue, including a
/// TreeWalker pass over comment nodes. `__OPTS__` is replaced with the
/// session's extraction toggles before evaluation.
#[cfg(feature = "browser")]
const EXTRACT_JS_TEMPLATE: &str = r#"
(() => {
    const opts = __OPTS__;
    const seen = new Set();
    const out = [];
    const push = (value) => {
        if (typeof value !== 'string') return;
        const token = value.trim();
        if (!token || seen.has(token)) return;
        seen.add(token);
        out.push(token);
    };

    const jsPatterns = [
        /(?:href|url|link|location|window\.location|window\.open|location\.href)\s*[=:.(]\s*['"]([^'"]+)['"]/g,
        /(?:fetch|axios\.get|axios\.post|axios\.put|axios\.delete|axios|\$\.ajax|XMLHttpRequest|\.get|\.post|\.put|\.delete)\s*\(\s*['"]([^'"]+)['"]/g,
        /['"](https?:\/\/[^'"\s]+)['"]/g,
        /['"](\/[a-zA-Z0-9_\-\/.?&=]+)['"]/g,
    ];
    const cssPatterns = [
        /url\(\s*['"]?([^'")\s]+)['"]?\s*\)/g,
        /@import\s+['"]([^'"]+)['"]/g,
    ];
    const scanWith = (patterns, text) => {
        if (!text) return;
        for (const pattern of patterns) {
            pattern.lastIndex = 0;
            let m;
            while ((m = pattern.exec(text)) !== null) push(m[1]);
        }
    };
    const scanJs = (text) => scanWith(jsPatterns, text);
    const scanCss = (text) => { scanWith(cssPatterns, text); scanJs(text); };
    const scanBare = (text) => {
        if (!text) return;
        const re = /https?:\/\/[^\s"'<>()\[\]]+/g;
        let m;
        while ((m = re.exec(text)) !== null) push(m[0].replace(/[.,;]+$/, ''));
    };
    const dataMarker = /(href|url|link|action|path|route)/;
    const walkJson = (value) => {
        if (typeof value === 'string') {
            if (/^https?:\/\//.test(value) || /^\/[^\/]/.test(value)) push(value);
        } else if (Array.isArray(value)) {
            value.forEach(walkJson);
        } else if (value && typeof value === 'object') {
            Object.values(value).forEach(walkJson);
        }
    };

    const base = document.querySelector('base[href]');
    if (base) push(base.getAttribute('href'));
    document.querySelectorAll('a').forEach((a) => {
        push(a.getAttribute('href'));
        push(a.getAttribute('data-href'));
        push(a.getAttribute('data-url'));
    });
    document.querySelectorAll('area[href]').forEach((a) => push(a.getAttribute('href')));

    if (opts.onclick) {
        document.querySelectorAll('[onclick]').forEach((el) => scanJs(el.getAttribute('onclick')));
    }
    if (opts.data_attributes) {
        document.querySelectorAll('*').forEach((el) => {
            for (const attr of el.attributes) {
                if (attr.name.startsWith('data-') && dataMarker.test(attr.name.slice(5))) {
                    push(attr.value);
                }
            }
        });
    }
    if (opts.forms) {
        document.querySelectorAll('form[action]').forEach((f) => push(f.getAttribute('action')));
    }

    document.querySelectorAll('script:not([src])').forEach((s) => {
        const kind = s.getAttribute('type') || '';
        if (kind.includes('json')) {
            try { walkJson(JSON.parse(s.textContent)); } catch (e) {}
        } else {
            scanJs(s.textContent);
        }
    });
    document.querySelectorAll('style').forEach((s) => scanCss(s.textContent));
    document.querySelectorAll('[style]').forEach((el) => scanCss(el.getAttribute('style')));

    document.querySelectorAll('img[srcset], source[srcset]').forEach((el) => {
        (el.getAttribute('srcset') || '').split(',').forEach((candidate) => {
            push(candidate.trim().split(/\s+/)[0]);
        });
    });
    document.querySelectorAll('source[src]').forEach((el) => push(el.getAttribute('src')));
    document.querySelectorAll('video[poster]').forEach((el) => push(el.getAttribute('poster')));
    document.querySelectorAll('object[data]').forEach((el) => push(el.getAttribute('data')));
    document.querySelectorAll('embed[src]').forEach((el) => push(el.getAttribute('src')));

    if (opts.canonical) {
        document.querySelectorAll('meta[property], meta[name]').forEach((m) => {
            const key = m.getAttribute('property') || m.getAttribute('name') || '';
            if (['og:url', 'og:image', 'twitter:url', 'twitter:image'].includes(key)) {
                push(m.getAttribute('content'));
            }
        });
        document.querySelectorAll('link[rel][href]').forEach((l) => {
            const rels = (l.getAttribute('rel') || '').toLowerCase().split(/\s+/);
            const wanted = ['canonical', 'manifest', 'prefetch', 'preload', 'dns-prefetch', 'prerender'];
            if (rels.some((r) => wanted.includes(r))) push(l.getAttribute('href'));
        });
    }
    if (opts.meta_refresh) {
        document.querySelectorAll('meta[http-equiv]').forEach((m) => {
            if ((m.getAttribute('http-equiv') || '').toLowerCase() !== 'refresh') return;
            const match = /url\s*=\s*['"]?([^'">;\s]+)/i.exec(m.getAttribute('content') || '');
            if (match) push(match[1]);
        });
    }
    if (opts.interactive) {
        document.querySelectorAll('button, [role="button"], [role="link"]').forEach((el) => {
            for (const attr of el.attributes) {
                if (attr.name.startsWith('data-') && dataMarker.test(attr.name.slice(5))) {
                    push(attr.value);
                }
            }
        });
    }

    document.querySelectorAll('script[src]').forEach((s) => {
        const src = s.getAttribute('src');
        try {
            const resolved = new URL(src, location.href);
            if (resolved.hostname.toLowerCase() === location.hostname.toLowerCase()) push(src);
        } catch (e) {}
    });

    const walker = document.createTreeWalker(document.documentElement, NodeFilter.SHOW_COMMENT);
    while (walker.nextNode()) {
        scanBare(walker.currentNode.nodeValue);
        scanJs(walker.currentNode.nodeValue);
    }

    scanBare(document.body ? document.body.innerText : '');

    return out;
})()
"#;

/// Headless-browser page renderer shared by one scan session
#[cfg(feature = "browser")]
pub struct BrowserFetcher {
    browser: tokio::sync::Mutex<Browser>,
    custom_headers: std::collections::HashMap<String, String>,
    cookies: CookieJar,
    timeout_ms: u64,
    dynamic_wait_ms: u64,
    extract_js: String,
}

#[cfg(feature = "browser")]
impl BrowserFetcher {
    /// Launches headless Chromium. Errors here make the engine fall back to Lite.
    pub async fn new(config: &ScanConfig, cookies: &CookieJar) -> Result<Self> {
        let browser_config = BrowserConfig::builder()
            .no_sandbox()
            .window_size(1366, 900)
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .build()
            .map_err(LanternError::BrowserError)?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| LanternError::BrowserError(e.to_string()))?;

        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("Browser handler event error: {e}");
                }
            }
        });
        info!("Headless browser launched");

        let opts = serde_json::json!({
            "data_attributes": config.include_data_attributes,
            "onclick": config.include_onclick,
            "forms": config.include_forms,
            "meta_refresh": config.include_meta_refresh,
            "canonical": config.include_canonical,
            "interactive": config.include_interactive_elements,
        });
        let extract_js = EXTRACT_JS_TEMPLATE.replace("__OPTS__", &opts.to_string());

        Ok(Self {
            browser: tokio::sync::Mutex::new(browser),
            custom_headers: config.custom_headers.clone(),
            cookies: cookies.clone(),
            timeout_ms: config.timeout_ms,
            dynamic_wait_ms: config.dynamic_content_wait,
            extract_js,
        })
    }

    async fn new_page(&self) -> Result<Page> {
        let browser = self.browser.lock().await;
        browser
            .new_page("about:blank")
            .await
            .map_err(|e| LanternError::BrowserError(e.to_string()))
    }

    async fn prepare_page(&self, page: &Page, url: &Url) -> Result<()> {
        if !self.custom_headers.is_empty() {
            let headers = serde_json::json!(self.custom_headers);
            page.execute(SetExtraHttpHeadersParams::new(Headers::new(headers)))
                .await
                .map_err(|e| LanternError::BrowserError(e.to_string()))?;
        }
        if !self.cookies.is_empty() {
            let params: Vec<CookieParam> = self
                .cookies
                .iter()
                .filter_map(|(name, value)| {
                    CookieParam::builder()
                        .name(name)
                        .value(value)
                        .url(url.as_str())
                        .build()
                        .ok()
                })
                .collect();
            page.set_cookies(params)
                .await
                .map_err(|e| LanternError::BrowserError(e.to_string()))?;
        }
        Ok(())
    }

    /// Renders one URL in a fresh page context and extracts links from the
    /// live DOM. A navigation timeout salvages whatever content rendered and
    /// treats the page as 200.
    pub async fn fetch(&self, url: &Url) -> Result<FetchedPage> {
        let started = Instant::now();
        let page = self.new_page().await?;
        let outcome = self.fetch_on_page(&page, url, started).await;
        if let Err(e) = page.close().await {
            debug!("Failed to close page for {url}: {e}");
        }
        outcome
    }

    async fn fetch_on_page(
        &self,
        page: &Page,
        url: &Url,
        started: Instant,
    ) -> Result<FetchedPage> {
        self.prepare_page(page, url).await?;

        // Watch network responses: the last response for the navigation URL is
        // authoritative for the final status, overriding the goto result.
        let nav_status: Arc<Mutex<Option<(u16, String)>>> = Arc::new(Mutex::new(None));
        let watcher = {
            let mut events = page
                .event_listener::<EventResponseReceived>()
                .await
                .map_err(|e| LanternError::BrowserError(e.to_string()))?;
            let nav_status = Arc::clone(&nav_status);
            let nav_url = url.to_string();
            tokio::spawn(async move {
                while let Some(event) = events.next().await {
                    let response = &event.response;
                    if response.url == nav_url || response.url.trim_end_matches('/') == nav_url.trim_end_matches('/') {
                        let mut slot = nav_status.lock().expect("status lock");
                        *slot = Some((response.status as u16, response.mime_type.clone()));
                    }
                }
            })
        };

        let deadline = Duration::from_millis(self.timeout_ms);
        let mut timed_out = false;
        match timeout(deadline, page.goto(url.as_str())).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                watcher.abort();
                return Err(LanternError::BrowserError(e.to_string()));
            }
            Err(_) => {
                // salvage whatever rendered and treat the page as 200
                warn!("Navigation to {url} timed out; salvaging partial content");
                timed_out = true;
            }
        }

        sleep(Duration::from_millis(self.dynamic_wait_ms)).await;

        if let Err(e) = page.evaluate(REVEAL_JS).await {
            debug!("Interactive reveal failed on {url}: {e}");
        }

        let dom_links: Vec<String> = page
            .evaluate(self.extract_js.as_str())
            .await
            .ok()
            .and_then(|v| v.into_value().ok())
            .unwrap_or_default();

        let (status_code, mime_type) = {
            let slot = nav_status.lock().expect("status lock");
            slot.clone().unwrap_or((200, String::new()))
        };
        watcher.abort();

        let status_code = if timed_out { 200 } else { status_code };
        let is_json = mime_type.contains("json");
        let body = if is_json {
            // Chrome wraps raw JSON in a viewer document; innerText is the payload
            page.evaluate("document.body ? document.body.innerText : ''")
                .await
                .ok()
                .and_then(|v| v.into_value::<String>().ok())
                .unwrap_or_default()
        } else {
            page.content()
                .await
                .map_err(|e| LanternError::BrowserError(e.to_string()))?
        };

        Ok(FetchedPage {
            status_code,
            body,
            content_type: if mime_type.is_empty() { None } else { Some(mime_type) },
            location: None,
            dom_links: Some(dom_links),
            response_time: started.elapsed(),
        })
    }

    /// Browser-path form login: auto-detect fields with the same DOM queries
    /// as the HTTP negotiator, type with a per-keystroke delay, submit, and
    /// snapshot the resulting cookies and page URL.
    pub async fn login(
        &self,
        login_url: &Url,
        username: &str,
        password: &str,
        username_field: Option<&str>,
        password_field: Option<&str>,
    ) -> Result<AuthOutcome> {
        let page = self.new_page().await?;
        let outcome = self
            .login_on_page(&page, login_url, username, password, username_field, password_field)
            .await;
        if let Err(e) = page.close().await {
            debug!("Failed to close login page: {e}");
        }
        outcome
    }

    async fn login_on_page(
        &self,
        page: &Page,
        login_url: &Url,
        username: &str,
        password: &str,
        username_field: Option<&str>,
        password_field: Option<&str>,
    ) -> Result<AuthOutcome> {
        let deadline = Duration::from_millis(self.timeout_ms);
        timeout(deadline, page.goto(login_url.as_str()))
            .await
            .map_err(|_| LanternError::Deadline(self.timeout_ms))?
            .map_err(|e| LanternError::BrowserError(e.to_string()))?;

        let username_selector = match username_field {
            Some(name) => format!("input[name=\"{name}\"]"),
            None => "input[type=\"email\"], input[type=\"text\"][name*=\"user\" i], \
                     input[type=\"text\"][name*=\"login\" i], input[type=\"text\"][id*=\"user\" i], \
                     input[type=\"text\"][id*=\"login\" i]"
                .to_string(),
        };
        let password_selector = match password_field {
            Some(name) => format!("input[name=\"{name}\"]"),
            None => "input[type=\"password\"]".to_string(),
        };

        let user_el = page
            .find_element(&username_selector)
            .await
            .map_err(|e| LanternError::AuthError(format!("username field not found: {e}")))?;
        user_el
            .click()
            .await
            .map_err(|e| LanternError::BrowserError(e.to_string()))?;
        for ch in username.chars() {
            user_el
                .type_str(ch.to_string())
                .await
                .map_err(|e| LanternError::BrowserError(e.to_string()))?;
            sleep(Duration::from_millis(25)).await;
        }

        let pass_el = page
            .find_element(&password_selector)
            .await
            .map_err(|e| LanternError::AuthError(format!("password field not found: {e}")))?;
        pass_el
            .click()
            .await
            .map_err(|e| LanternError::BrowserError(e.to_string()))?;
        for ch in password.chars() {
            pass_el
                .type_str(ch.to_string())
                .await
                .map_err(|e| LanternError::BrowserError(e.to_string()))?;
            sleep(Duration::from_millis(25)).await;
        }

        match page
            .find_element("button[type=\"submit\"], input[type=\"submit\"]")
            .await
        {
            Ok(submit) => {
                submit
                    .click()
                    .await
                    .map_err(|e| LanternError::BrowserError(e.to_string()))?;
            }
            Err(_) => {
                pass_el
                    .press_key("Enter")
                    .await
                    .map_err(|e| LanternError::BrowserError(e.to_string()))?;
            }
        }

        if timeout(deadline, page.wait_for_navigation()).await.is_err() {
            debug!("Login navigation did not settle within the deadline");
        }
        sleep(Duration::from_millis(500)).await;

        let mut jar = CookieJar::new();
        let cookies = page
            .get_cookies()
            .await
            .map_err(|e| LanternError::BrowserError(e.to_string()))?;
        for cookie in cookies {
            jar.set(&cookie.name, &cookie.value);
        }

        let start_url = page
            .url()
            .await
            .ok()
            .flatten()
            .and_then(|u| Url::parse(&u).ok());

        info!("Browser login captured {} cookies", jar.len());
        Ok(AuthOutcome {
            cookies: jar,
            start_url,
        })
    }

    /// Deterministic teardown of the browser process
    pub async fn close(&self) {
        let mut browser = self.browser.lock().await;
        if let Err(e) = browser.close().await {
            warn!("Failed to close browser: {e}");
        }
        if let Err(e) = browser.wait().await {
            debug!("Browser process wait failed: {e}");
        }
    }
}

/// Stub when the `browser` feature is disabled: construction fails, which
/// makes the engine downgrade the Rich strategy to Lite.
#[cfg(not(feature = "browser"))]
pub struct BrowserFetcher;

#[cfg(not(feature = "browser"))]
impl BrowserFetcher {
    pub async fn new(
        _config: &crate::models::ScanConfig,
        _cookies: &crate::http::auth::CookieJar,
    ) -> Result<Self> {
        Err(LanternError::BrowserError(
            "headless browsing requires the 'browser' feature; \
             compile with: cargo build --features browser"
                .to_string(),
        ))
    }

    pub async fn fetch(&self, _url: &url::Url) -> Result<crate::crawler::fetch::FetchedPage> {
        Err(LanternError::BrowserError("browser feature disabled".to_string()))
    }

    pub async fn login(
        &self,
        _login_url: &url::Url,
        _username: &str,
        _password: &str,
        _username_field: Option<&str>,
        _password_field: Option<&str>,
    ) -> Result<crate::http::auth::AuthOutcome> {
        Err(LanternError::BrowserError("browser feature disabled".to_string()))
    }

    pub async fn close(&self) {}
}
