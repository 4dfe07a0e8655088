//! Bounded-concurrency crawl scheduler
//!
//! A single coordinator loop keeps up to `max_concurrent` workers in flight.
//! Each worker scans one URL: fetch, extract, normalize, filter, enqueue,
//! append result, emit a log event. Worker failures are classified and
//! recorded; they never propagate into the coordinator or other workers.
//!
//! Shared structures (frontier, results, logs, error summary, run stats) each
//! sit behind their own mutex with O(1) critical sections; nothing suspends
//! while holding a lock.

use crate::crawler::classify::{classify, synthesized_status, Classification};
use crate::crawler::extractor::{self, ExtractOptions};
use crate::crawler::fetch::{correct_soft_error, error_body_prefix, FetchStrategy, FetchedPage};
use crate::crawler::frontier::{Frontier, FrontierEntry};
use crate::crawler::urls::{self, PathFilter};
use crate::error::{LanternError, Result};
use crate::http::HttpClient;
use crate::models::{
    LogLevel, ScanConfig, ScanLog, ScanPerformance, ScanProgress, ScanResult, ScanStats,
    ScanStatus, Severity,
};
use chrono::Utc;
use futures::FutureExt;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{debug, error, warn};
use url::Url;

/// Anti-stall timer: with free slots and a non-empty frontier, the
/// coordinator re-checks at least this often even if no worker completes
const ANTI_STALL: Duration = Duration::from_secs(2);

/// Consecutive empty-slot iterations with an unchanged queue before the
/// stuck-queue warning fires
const STUCK_QUEUE_ITERATIONS: u32 = 10;

/// Running aggregates for the performance snapshots
struct RunStats {
    links_found: usize,
    response_time_sum_ms: u64,
    response_time_count: u64,
    started: Instant,
}

impl RunStats {
    fn average_ms(&self) -> u64 {
        if self.response_time_count == 0 {
            0
        } else {
            self.response_time_sum_ms / self.response_time_count
        }
    }
}

/// Everything a worker needs, shared across the session
pub struct ScanContext {
    pub scan_id: String,
    pub base: Url,
    pub max_depth: u32,
    pub max_pages: usize,
    pub max_concurrent: usize,
    pub excluded_schemes: Vec<String>,
    pub filter: PathFilter,
    pub extract_opts: ExtractOptions,
    pub detect_soft_errors: bool,
    pub client: HttpClient,
    pub strategy: FetchStrategy,
    pub frontier: Mutex<Frontier>,
    pub store: Arc<crate::session::SessionStore>,
    stats: Mutex<RunStats>,
}

impl ScanContext {
    pub fn new(
        config: &ScanConfig,
        base: Url,
        client: HttpClient,
        strategy: FetchStrategy,
        store: Arc<crate::session::SessionStore>,
    ) -> Self {
        Self {
            scan_id: store.scan_id().to_string(),
            base,
            max_depth: config.max_depth,
            max_pages: config.max_pages.max(1),
            max_concurrent: config.max_concurrent.max(1),
            excluded_schemes: config.exclude_protocols.clone(),
            filter: PathFilter::new(config.path_regex_filter.as_deref()),
            extract_opts: ExtractOptions::from_config(config),
            detect_soft_errors: config.detect_soft_errors,
            client,
            strategy,
            frontier: Mutex::new(Frontier::new()),
            store,
            stats: Mutex::new(RunStats {
                links_found: 0,
                response_time_sum_ms: 0,
                response_time_count: 0,
                started: Instant::now(),
            }),
        }
    }

    /// Seeds a depth-0 candidate, applying the same-origin, static-asset and
    /// path-filter gates that apply to discovered links
    pub fn enqueue_seed(&self, url: Url) -> bool {
        if !urls::same_origin(&url, &self.base)
            || urls::is_static_asset(&url)
            || !self.filter.matches(&url)
        {
            return false;
        }
        self.frontier.lock().expect("frontier lock").push(url, 0)
    }

    /// Seeds the start URL itself; the path filter applies to discovered
    /// links only, never to the operator-supplied seed
    pub fn enqueue_start(&self, url: Url) {
        self.frontier.lock().expect("frontier lock").push(url, 0);
    }

    fn record_response_time(&self, ms: u64) {
        let mut stats = self.stats.lock().expect("stats lock");
        stats.response_time_sum_ms += ms;
        stats.response_time_count += 1;
    }

    fn add_links_found(&self, n: usize) {
        self.stats.lock().expect("stats lock").links_found += n;
    }

    /// Emits a log event carrying the progress, statistics and performance
    /// snapshots taken at emit time
    pub fn emit(
        &self,
        level: LogLevel,
        message: impl Into<String>,
        url: Option<&Url>,
        details: Option<String>,
        response_time_ms: Option<u64>,
    ) {
        let message = message.into();
        let (queue_size, visited_count) = {
            let frontier = self.frontier.lock().expect("frontier lock");
            (frontier.queue_len(), frontier.visited_count())
        };
        let urls_scanned = self.store.results_len();
        let errors = self.store.error_count();
        let (links_found, elapsed_ms, average_response_ms) = {
            let stats = self.stats.lock().expect("stats lock");
            (
                stats.links_found,
                stats.started.elapsed().as_millis() as u64,
                stats.average_ms(),
            )
        };

        let total = visited_count + queue_size;
        let percentage = if total > 0 {
            (urls_scanned as f64 / total as f64) * 100.0
        } else {
            0.0
        };

        match level {
            LogLevel::Info | LogLevel::Success => debug!("[{}] {message}", self.scan_id),
            LogLevel::Warning => warn!("[{}] {message}", self.scan_id),
            LogLevel::Error | LogLevel::Critical => error!("[{}] {message}", self.scan_id),
        }

        self.store.push_log(ScanLog {
            level,
            message,
            timestamp: Utc::now(),
            url: url.map(|u| u.to_string()),
            details,
            stats: ScanStats {
                urls_scanned,
                links_found,
                errors,
                queue_size,
                visited_count,
            },
            progress: ScanProgress {
                current: urls_scanned,
                total,
                percentage,
            },
            performance: ScanPerformance {
                response_time_ms,
                elapsed_ms,
                average_response_ms,
            },
        });
    }
}

/// Coordinator for one crawl session
pub struct Scheduler {
    ctx: Arc<ScanContext>,
}

impl Scheduler {
    pub fn new(ctx: Arc<ScanContext>) -> Self {
        Self { ctx }
    }

    /// Runs the crawl to completion, page cap, or stop. A stop finalizes
    /// cleanly: in-flight workers drain and their results are still recorded.
    pub async fn run(&self) -> Result<()> {
        let ctx = &self.ctx;
        let mut workers: JoinSet<()> = JoinSet::new();
        let mut stall_count: u32 = 0;
        let mut last_queue_len = usize::MAX;

        let stopped = loop {
            match ctx.store.wait_if_paused().await {
                Ok(()) => {}
                Err(LanternError::Stopped) => break true,
                Err(e) => return Err(e),
            }

            if ctx.store.results_len() >= ctx.max_pages {
                ctx.emit(
                    LogLevel::Info,
                    format!("Page cap of {} reached", ctx.max_pages),
                    None,
                    None,
                    None,
                );
                break false;
            }

            let mut spawned = false;
            while workers.len() < ctx.max_concurrent
                && ctx.store.results_len() + workers.len() < ctx.max_pages
            {
                let Some(entry) = self.claim_next() else { break };
                let worker_ctx = Arc::clone(ctx);
                workers.spawn(async move {
                    let url = entry.url.clone();
                    let depth = entry.depth;
                    let scan = scan_one(Arc::clone(&worker_ctx), entry);
                    if AssertUnwindSafe(scan).catch_unwind().await.is_err() {
                        record_failure(
                            &worker_ctx,
                            &url,
                            depth,
                            "worker panicked during scan".to_string(),
                            None,
                        );
                    }
                });
                spawned = true;
            }

            let queue_len = ctx.frontier.lock().expect("frontier lock").queue_len();
            if workers.is_empty() && queue_len == 0 {
                break false;
            }

            if !spawned && workers.len() < ctx.max_concurrent {
                if queue_len == last_queue_len {
                    stall_count += 1;
                    if stall_count > STUCK_QUEUE_ITERATIONS {
                        ctx.emit(
                            LogLevel::Warning,
                            format!("Queue size stuck at {queue_len}; continuing"),
                            None,
                            None,
                            None,
                        );
                        stall_count = 0;
                    }
                } else {
                    stall_count = 0;
                }
            } else {
                stall_count = 0;
            }
            last_queue_len = queue_len;

            if workers.len() >= ctx.max_concurrent {
                // every slot is busy: wait for any one worker
                workers.join_next().await;
            } else {
                tokio::select! {
                    _ = workers.join_next(), if !workers.is_empty() => {}
                    _ = tokio::time::sleep(ANTI_STALL) => {}
                }
            }
        };

        // settle remaining workers individually; their results still count
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                if e.is_panic() {
                    error!("Worker task panicked during drain: {e}");
                }
            }
        }

        if stopped {
            self.ctx
                .emit(LogLevel::Warning, "Scan stopped by user", None, None, None);
        }
        Ok(())
    }

    /// Claims the next scannable URL, marking it visited at dequeue time.
    /// Static assets are claimed (so they are never scanned again) but
    /// discarded without producing a result.
    fn claim_next(&self) -> Option<FrontierEntry> {
        let mut frontier = self.ctx.frontier.lock().expect("frontier lock");
        loop {
            let entry = frontier.claim_next()?;
            if urls::is_static_asset(&entry.url) {
                debug!("Skipping static asset {}", entry.url);
                continue;
            }
            return Some(entry);
        }
    }
}

/// Scans one URL end to end. Never returns an error: failures become error
/// results on the session store.
async fn scan_one(ctx: Arc<ScanContext>, entry: FrontierEntry) {
    let url = entry.url;
    let depth = entry.depth;

    match ctx.strategy.fetch(&url).await {
        Ok(page) => record_page(&ctx, &url, depth, page),
        Err(e) => {
            let message = match &e {
                LanternError::HttpError(re) if re.is_timeout() => {
                    format!("timeout: {re}")
                }
                LanternError::HttpError(re) if re.is_connect() => {
                    format!("connection refused: {re}")
                }
                other => other.to_string(),
            };
            record_failure(&ctx, &url, depth, message, None);
        }
    }
}

/// Post-fetch pipeline: status correction, extraction, normalization,
/// filtering, enqueueing, result append, log emit - in that order.
fn record_page(ctx: &ScanContext, url: &Url, depth: u32, page: FetchedPage) {
    let is_json = page.is_json();
    let FetchedPage {
        status_code,
        body,
        location,
        dom_links,
        response_time,
        ..
    } = page;

    let response_ms = response_time.as_millis() as u64;
    ctx.record_response_time(response_ms);

    let status_code = if ctx.detect_soft_errors {
        correct_soft_error(status_code, &body)
    } else {
        status_code
    };

    // Candidate tokens: live-DOM extraction when the Rich strategy supplied
    // one, otherwise the static catalogue; JSON bodies contribute their
    // URL-like string leaves either way.
    let mut raw_tokens: Vec<String> = match dom_links {
        Some(dom) => dom,
        None if is_json => extractor::extract_json_urls(&body),
        None => extractor::extract_urls(url, &body, &ctx.extract_opts),
    };
    if is_json {
        for token in extractor::extract_json_urls(&body) {
            if !raw_tokens.contains(&token) {
                raw_tokens.push(token);
            }
        }
    }
    if let Some(location) = &location {
        raw_tokens.push(location.clone());
    }

    let mut links: Vec<String> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut to_enqueue: Vec<Url> = Vec::new();
    for token in &raw_tokens {
        let Some(normalized) = urls::normalize(token, url, &ctx.excluded_schemes) else {
            continue;
        };
        if !urls::same_origin(&normalized, &ctx.base) {
            continue;
        }
        if urls::is_static_asset(&normalized) {
            continue;
        }
        if !seen.insert(normalized.to_string()) {
            continue;
        }
        links.push(normalized.to_string());
        if depth + 1 < ctx.max_depth && ctx.filter.matches(&normalized) {
            to_enqueue.push(normalized);
        }
    }

    {
        let mut frontier = ctx.frontier.lock().expect("frontier lock");
        for next in to_enqueue {
            frontier.push(next, depth + 1);
        }
    }

    ctx.add_links_found(links.len());
    let link_count = links.len();

    let is_success = (200..300).contains(&status_code);
    let mut result = ScanResult {
        url: url.to_string(),
        status: if is_success {
            ScanStatus::Success
        } else {
            ScanStatus::Error
        },
        status_code: Some(status_code),
        links,
        response_body: None,
        error: None,
        error_kind: None,
        error_severity: None,
        error_retryable: None,
        suggested_action: None,
        timestamp: Utc::now(),
        depth,
    };

    if is_success {
        ctx.store.try_append_result(result, ctx.max_pages);
        ctx.emit(
            LogLevel::Success,
            format!("Scanned {url} ({status_code}), {link_count} links"),
            Some(url),
            None,
            Some(response_ms),
        );
        return;
    }

    let message = format!("HTTP {status_code}");
    let classification = classify(Some(status_code), &message, Some(&body));
    if (400..600).contains(&status_code) {
        result.response_body = Some(error_body_prefix(&body));
    }
    apply_classification(&mut result, &message, &classification);

    ctx.store.record_error(
        url.as_str(),
        &message,
        classification.kind,
        classification.severity,
        Some(status_code),
    );
    ctx.store.try_append_result(result, ctx.max_pages);
    ctx.emit(
        level_for(classification.severity),
        format!("Error scanning {url}: {message}"),
        Some(url),
        Some(classification.suggested_action.clone()),
        Some(response_ms),
    );
}

/// Transport-level or panic failure: classify, synthesize a status where the
/// taxonomy defines one, and record an error result with no links
fn record_failure(
    ctx: &ScanContext,
    url: &Url,
    depth: u32,
    message: String,
    body: Option<&str>,
) {
    let classification = classify(None, &message, body);
    let status_code = synthesized_status(classification.kind);

    let mut result = ScanResult {
        url: url.to_string(),
        status: ScanStatus::Error,
        status_code,
        links: Vec::new(),
        response_body: body.map(error_body_prefix),
        error: None,
        error_kind: None,
        error_severity: None,
        error_retryable: None,
        suggested_action: None,
        timestamp: Utc::now(),
        depth,
    };
    apply_classification(&mut result, &message, &classification);

    ctx.store.record_error(
        url.as_str(),
        &message,
        classification.kind,
        classification.severity,
        status_code,
    );
    ctx.store.try_append_result(result, ctx.max_pages);
    ctx.emit(
        level_for(classification.severity),
        format!("Error scanning {url}: {message}"),
        Some(url),
        Some(classification.suggested_action.clone()),
        None,
    );
}

fn apply_classification(result: &mut ScanResult, message: &str, c: &Classification) {
    result.error = Some(message.to_string());
    result.error_kind = Some(c.kind);
    result.error_severity = Some(c.severity);
    result.error_retryable = Some(c.retryable);
    result.suggested_action = Some(c.suggested_action.clone());
}

fn level_for(severity: Severity) -> LogLevel {
    match severity {
        Severity::Critical => LogLevel::Critical,
        _ => LogLevel::Error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::auth::CookieJar;
    use crate::session::SessionRegistry;
    use std::collections::HashMap;

    fn context(max_pages: usize) -> Arc<ScanContext> {
        let mut config = ScanConfig::new("https://example.test/");
        config.max_pages = max_pages;
        let base = Url::parse("https://example.test/").expect("url");
        let client =
            HttpClient::new(1000, &HashMap::new(), &CookieJar::new()).expect("client");
        let registry = SessionRegistry::new();
        let store = registry.initialize("test-scan", 100);
        let strategy = FetchStrategy::Lite(client.clone());
        Arc::new(ScanContext::new(&config, base, client, strategy, store))
    }

    #[test]
    fn test_enqueue_seed_filters() {
        let ctx = context(10);
        assert!(ctx.enqueue_seed(Url::parse("https://example.test/page").expect("url")));
        // cross-origin rejected
        assert!(!ctx.enqueue_seed(Url::parse("https://other.test/page").expect("url")));
        // static asset rejected
        assert!(!ctx.enqueue_seed(Url::parse("https://example.test/app.js").expect("url")));
        assert_eq!(ctx.frontier.lock().expect("lock").queue_len(), 1);
    }

    #[test]
    fn test_record_page_success_and_enqueue() {
        let ctx = context(10);
        let url = Url::parse("https://example.test/").expect("url");
        let page = FetchedPage {
            status_code: 200,
            body: r#"<a href="/about">a</a><a href="https://other.test/">x</a>"#.to_string(),
            content_type: Some("text/html".to_string()),
            location: None,
            dom_links: None,
            response_time: Duration::from_millis(12),
        };
        record_page(&ctx, &url, 0, page);

        let results = ctx.store.snapshot_results();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, ScanStatus::Success);
        assert_eq!(results[0].links, vec!["https://example.test/about".to_string()]);
        assert!(results[0].response_body.is_none());

        let queued = ctx.frontier.lock().expect("lock").queue_len();
        assert_eq!(queued, 1);
    }

    #[test]
    fn test_record_page_soft_404() {
        let ctx = context(10);
        let url = Url::parse("https://example.test/missing").expect("url");
        let page = FetchedPage {
            status_code: 200,
            body: "<h1>404 Not Found</h1>".to_string(),
            content_type: Some("text/html".to_string()),
            location: None,
            dom_links: None,
            response_time: Duration::from_millis(8),
        };
        record_page(&ctx, &url, 0, page);

        let results = ctx.store.snapshot_results();
        assert_eq!(results[0].status_code, Some(404));
        assert_eq!(results[0].status, ScanStatus::Error);
        assert_eq!(results[0].error_kind, Some(crate::models::ErrorKind::Client));
        assert_eq!(results[0].error_severity, Some(Severity::Medium));
        let body = results[0].response_body.as_deref().expect("body prefix");
        assert!(body.contains("404 Not Found"));
    }

    #[test]
    fn test_record_page_depth_gate() {
        let mut config = ScanConfig::new("https://example.test/");
        config.max_depth = 1;
        let base = Url::parse("https://example.test/").expect("url");
        let client =
            HttpClient::new(1000, &HashMap::new(), &CookieJar::new()).expect("client");
        let registry = SessionRegistry::new();
        let store = registry.initialize("depth-scan", 100);
        let strategy = FetchStrategy::Lite(client.clone());
        let ctx = Arc::new(ScanContext::new(&config, base, client, strategy, store));

        let url = Url::parse("https://example.test/").expect("url");
        let page = FetchedPage {
            status_code: 200,
            body: r#"<a href="/next">n</a>"#.to_string(),
            content_type: Some("text/html".to_string()),
            location: None,
            dom_links: None,
            response_time: Duration::from_millis(5),
        };
        record_page(&ctx, &url, 0, page);

        // link reported but not enqueued: depth 1 is at the cap
        let results = ctx.store.snapshot_results();
        assert_eq!(results[0].links.len(), 1);
        assert_eq!(ctx.frontier.lock().expect("lock").queue_len(), 0);
    }

    #[test]
    fn test_record_failure_synthesizes_timeout_status() {
        let ctx = context(10);
        let url = Url::parse("https://example.test/slow").expect("url");
        record_failure(&ctx, &url, 2, "timeout: deadline elapsed".to_string(), None);

        let results = ctx.store.snapshot_results();
        assert_eq!(results[0].status_code, Some(408));
        assert_eq!(results[0].error_kind, Some(crate::models::ErrorKind::Timeout));
        assert_eq!(results[0].error_retryable, Some(true));
        assert!(results[0].links.is_empty());
        assert_eq!(results[0].depth, 2);
        assert_eq!(ctx.store.error_count(), 1);
    }

    #[test]
    fn test_emit_snapshots() {
        let ctx = context(10);
        ctx.enqueue_seed(Url::parse("https://example.test/a").expect("url"));
        ctx.emit(LogLevel::Info, "hello", None, None, Some(42));

        let logs = ctx.store.snapshot_logs();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].stats.queue_size, 1);
        assert_eq!(logs[0].progress.total, 1);
        assert_eq!(logs[0].performance.response_time_ms, Some(42));
    }
}
