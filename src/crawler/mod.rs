//! Crawl engine: session-scoped breadth-first crawler
//!
//! `run_scan` is the engine entry point: it validates the seed, runs the
//! authentication preamble when credentials are configured, selects the fetch
//! strategy (downgrading Rich to Lite if the browser cannot launch), mines
//! sitemaps and robots.txt for extra seeds, drives the bounded-concurrency
//! scheduler until the frontier drains or a cap/stop intervenes, and returns
//! the accumulated report. Session state stays pollable for the configured
//! retention window afterwards.

pub mod browser;
pub mod classify;
pub mod discovery;
pub mod extractor;
pub mod fetch;
pub mod frontier;
pub mod scheduler;
pub mod urls;

use crate::crawler::browser::BrowserFetcher;
use crate::crawler::fetch::FetchStrategy;
use crate::crawler::scheduler::{ScanContext, Scheduler};
use crate::error::{LanternError, Result};
use crate::http::auth::{is_login_page, AuthOutcome, CookieJar, FormAuthenticator};
use crate::http::HttpClient;
use crate::models::{LogLevel, ScanConfig, ScanReport};
use crate::session::SessionRegistry;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use url::Url;
use uuid::Uuid;

/// Error entries included in the returned report's summary
const REPORT_RECENT_ERRORS: usize = 20;

/// Runs a complete crawl session. Fails fast on a malformed seed URL before
/// any session state is allocated; after that, failures are recorded in the
/// session rather than raised.
pub async fn run_scan(registry: &Arc<SessionRegistry>, config: ScanConfig) -> Result<ScanReport> {
    let base = Url::parse(config.url.trim()).map_err(|e| {
        LanternError::ConfigError(format!("unparseable seed URL {:?}: {e}", config.url))
    })?;
    if base.host_str().is_none() {
        return Err(LanternError::ConfigError(format!(
            "seed URL {:?} has no host",
            config.url
        )));
    }

    let scan_id = config
        .scan_id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let store = registry.initialize(&scan_id, config.max_log_entries);
    info!("Starting scan {scan_id} of {base}");

    // Rich strategy wants the browser up front; a launch failure downgrades
    // to Lite and the crawl continues.
    let mut browser: Option<BrowserFetcher> = None;
    if config.use_headless_browser {
        match BrowserFetcher::new(&config, &CookieJar::new()).await {
            Ok(b) => browser = Some(b),
            Err(e) => {
                warn!("Browser unavailable, using HTTP fetching: {e}");
            }
        }
    }

    // Authentication preamble: browser-driven when a browser is up, HTTP
    // form negotiation otherwise. Auth failures are swallowed; the crawl
    // proceeds unauthenticated.
    let mut cookies = CookieJar::new();
    let mut start_url = base.clone();
    let mut login_page_reverted = false;
    if config.has_credentials() {
        let outcome = match &browser {
            Some(b) => {
                let login_url = Url::parse(config.login_url.as_deref().unwrap_or_default())
                    .map_err(LanternError::UrlError);
                match login_url {
                    Ok(login_url) => {
                        b.login(
                            &login_url,
                            config.username.as_deref().unwrap_or_default(),
                            config.password.as_deref().unwrap_or_default(),
                            config.username_field.as_deref(),
                            config.password_field.as_deref(),
                        )
                        .await
                    }
                    Err(e) => Err(e),
                }
            }
            None => match FormAuthenticator::from_config(&config) {
                Ok(auth) => auth.login().await,
                Err(e) => Err(e),
            },
        };

        match outcome {
            Ok(AuthOutcome {
                cookies: jar,
                start_url: redirect,
            }) => {
                cookies = jar;
                if let Some(candidate) = redirect {
                    let (verified, reverted) =
                        verify_start_url(&config, &cookies, &base, candidate).await;
                    start_url = verified;
                    login_page_reverted = reverted;
                }
            }
            Err(e) => {
                warn!("Authentication failed, crawling unauthenticated: {e}");
            }
        }
    }

    let client = HttpClient::new(config.timeout_ms, &config.custom_headers, &cookies)?;

    // The browser was launched before the cookie jar existed; rebuild it so
    // page contexts carry the session cookies.
    let strategy = match browser {
        Some(b) if !cookies.is_empty() => {
            b.close().await;
            match BrowserFetcher::new(&config, &cookies).await {
                Ok(b) => FetchStrategy::Rich(b),
                Err(e) => {
                    warn!("Browser relaunch failed, using HTTP fetching: {e}");
                    FetchStrategy::Lite(client.clone())
                }
            }
        }
        Some(b) => FetchStrategy::Rich(b),
        None => FetchStrategy::Lite(client.clone()),
    };

    let ctx = Arc::new(ScanContext::new(
        &config,
        base.clone(),
        client,
        strategy,
        Arc::clone(&store),
    ));

    if login_page_reverted {
        ctx.emit(
            LogLevel::Warning,
            "Post-login page still looks like the login form; starting from the seed URL",
            Some(&base),
            None,
            None,
        );
    }
    ctx.emit(
        LogLevel::Info,
        format!("Scan started with {} strategy", ctx.strategy.name()),
        Some(&start_url),
        None,
        None,
    );

    let discovery_handles = discovery::discover_seeds(&ctx).await;
    ctx.enqueue_start(start_url);

    let scheduler = Scheduler::new(Arc::clone(&ctx));
    let run_outcome = scheduler.run().await;

    for handle in discovery_handles {
        handle.abort();
    }
    if let FetchStrategy::Rich(b) = &ctx.strategy {
        b.close().await;
    }
    run_outcome?;

    let results = store.snapshot_results();
    let error_summary = store.error_summary(REPORT_RECENT_ERRORS);
    ctx.emit(
        LogLevel::Info,
        format!(
            "Scan complete: {} pages, {} errors, {} requests",
            results.len(),
            error_summary.total,
            ctx.client.request_count()
        ),
        None,
        None,
        None,
    );

    let report = ScanReport {
        scan_id: scan_id.clone(),
        results,
        logs: store.snapshot_logs(),
        error_summary,
    };

    registry.schedule_eviction(
        scan_id,
        Duration::from_secs(config.log_retention_minutes * 60),
    );

    Ok(report)
}

/// Post-login verification: if the redirect target still looks like the
/// login page, fall back to the operator-supplied seed. Returns the start
/// URL and whether the fallback happened.
async fn verify_start_url(
    config: &ScanConfig,
    cookies: &CookieJar,
    base: &Url,
    candidate: Url,
) -> (Url, bool) {
    if candidate == *base {
        return (candidate, false);
    }

    let mut still_login = is_login_page(&candidate, "");
    if !still_login {
        if let Ok(client) = HttpClient::new(config.timeout_ms, &config.custom_headers, cookies)
        {
            if let Ok(response) = client.get(candidate.as_str()).await {
                let body = response.text().await.unwrap_or_default();
                still_login = is_login_page(&candidate, &body);
            }
        }
    }

    if still_login {
        warn!(
            "Post-login URL {candidate} still looks like a login page; starting from {base}"
        );
        (base.clone(), true)
    } else {
        (candidate, false)
    }
}
