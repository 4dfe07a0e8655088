//! Pre-crawl seed discovery from sitemaps and robots.txt
//!
//! Probes the well-known sitemap locations in order and mines robots.txt for
//! `Sitemap:` URLs and `Disallow:` paths. Everything found becomes a depth-0
//! seed candidate (subject to the usual same-origin/static/path-filter
//! gates); nothing here enforces robots policy. Child sitemaps referenced by
//! a sitemap index are fetched in the background and their URLs enqueued as
//! they arrive. Transport timeouts are swallowed silently; other failures
//! log a single warning and the crawl continues.

use crate::crawler::scheduler::ScanContext;
use crate::error::LanternError;
use crate::models::LogLevel;
use regex::Regex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::debug;
use url::Url;

/// Probe order for sitemap locations
const SITEMAP_PATHS: &[&str] = &[
    "/sitemap.xml",
    "/sitemap_index.xml",
    "/sitemap1.xml",
    "/sitemap-index.xml",
    "/sitemaps.xml",
];

/// Runs seed discovery against the crawl origin. Returns the handles of any
/// background child-sitemap fetches so the coordinator can reap them at
/// shutdown.
pub async fn discover_seeds(ctx: &Arc<ScanContext>) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();

    for path in SITEMAP_PATHS {
        let Ok(probe) = ctx.base.join(path) else { continue };
        match fetch_text(ctx, &probe).await {
            Ok(Some(body)) if looks_like_xml(&body) => {
                let (page_urls, child_sitemaps) = parse_sitemap(&body);
                let mut seeded = 0usize;
                for loc in &page_urls {
                    if let Ok(url) = Url::parse(loc) {
                        if ctx.enqueue_seed(url) {
                            seeded += 1;
                        }
                    }
                }
                ctx.emit(
                    LogLevel::Info,
                    format!("Sitemap {probe}: {seeded} seed URLs"),
                    Some(&probe),
                    None,
                    None,
                );
                for child in child_sitemaps {
                    if let Some(handle) = spawn_child_fetch(ctx, &child) {
                        handles.push(handle);
                    }
                }
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                warn_unless_timeout(ctx, &probe, &e);
                continue;
            }
        }
    }

    if let Ok(robots_url) = ctx.base.join("/robots.txt") {
        match fetch_text(ctx, &robots_url).await {
            Ok(Some(body)) => {
                let mut seeded = 0usize;
                for line in body.lines() {
                    let line = line.trim();
                    if let Some(value) = strip_directive(line, "sitemap:") {
                        if let Ok(url) = Url::parse(value) {
                            if let Some(handle) = spawn_child_fetch(ctx, url.as_str()) {
                                handles.push(handle);
                            }
                        }
                    } else if let Some(value) = strip_directive(line, "disallow:") {
                        if value.is_empty() || value == "/" {
                            continue;
                        }
                        // disallowed paths are mined for URL discovery, not obeyed
                        let candidate = value.trim_end_matches('*').trim_end_matches('$');
                        if let Ok(url) = ctx.base.join(candidate) {
                            if ctx.enqueue_seed(url) {
                                seeded += 1;
                            }
                        }
                    }
                }
                if seeded > 0 {
                    ctx.emit(
                        LogLevel::Info,
                        format!("robots.txt contributed {seeded} seed URLs"),
                        Some(&robots_url),
                        None,
                        None,
                    );
                }
            }
            Ok(None) => {}
            Err(e) => warn_unless_timeout(ctx, &robots_url, &e),
        }
    }

    handles
}

/// Background fetch of a child sitemap; its URLs are enqueued as they arrive
fn spawn_child_fetch(ctx: &Arc<ScanContext>, loc: &str) -> Option<JoinHandle<()>> {
    let url = Url::parse(loc).ok()?;
    if !crate::crawler::urls::same_origin(&url, &ctx.base) {
        return None;
    }
    let ctx = Arc::clone(ctx);
    Some(tokio::spawn(async move {
        match fetch_text(&ctx, &url).await {
            Ok(Some(body)) => {
                let (page_urls, _) = parse_sitemap(&body);
                for loc in &page_urls {
                    if let Ok(child) = Url::parse(loc) {
                        ctx.enqueue_seed(child);
                    }
                }
                debug!("Child sitemap {url}: {} URLs", page_urls.len());
            }
            Ok(None) => {}
            Err(e) => warn_unless_timeout(&ctx, &url, &e),
        }
    }))
}

/// GET returning the body for 2xx responses, `None` otherwise
async fn fetch_text(ctx: &ScanContext, url: &Url) -> crate::error::Result<Option<String>> {
    let response = ctx.client.get(url.as_str()).await?;
    if !response.status().is_success() {
        return Ok(None);
    }
    Ok(Some(response.text().await.unwrap_or_default()))
}

fn warn_unless_timeout(ctx: &ScanContext, url: &Url, e: &LanternError) {
    if let LanternError::HttpError(re) = e {
        if re.is_timeout() {
            debug!("Discovery fetch of {url} timed out");
            return;
        }
    }
    ctx.emit(
        LogLevel::Warning,
        format!("Discovery fetch of {url} failed: {e}"),
        Some(url),
        None,
        None,
    );
}

fn looks_like_xml(body: &str) -> bool {
    let head = body.trim_start();
    head.starts_with("<?xml") || head.starts_with("<urlset") || head.starts_with("<sitemapindex")
}

fn strip_directive<'a>(line: &'a str, directive: &str) -> Option<&'a str> {
    let lower = line.to_lowercase();
    if lower.starts_with(directive) {
        Some(line[directive.len()..].trim())
    } else {
        None
    }
}

/// Splits a sitemap body into page `<url><loc>` entries and child
/// `<sitemap><loc>` entries
fn parse_sitemap(body: &str) -> (Vec<String>, Vec<String>) {
    let mut pages = Vec::new();
    let mut children = Vec::new();

    if let Ok(re) = Regex::new(r"(?s)<url>.*?<loc>\s*([^<]+?)\s*</loc>") {
        for cap in re.captures_iter(body) {
            if let Some(m) = cap.get(1) {
                pages.push(m.as_str().to_string());
            }
        }
    }
    if let Ok(re) = Regex::new(r"(?s)<sitemap>.*?<loc>\s*([^<]+?)\s*</loc>") {
        for cap in re.captures_iter(body) {
            if let Some(m) = cap.get(1) {
                children.push(m.as_str().to_string());
            }
        }
    }

    (pages, children)
}
