//! URL normalization, origin testing and static-asset classification
//!
//! Crawl identity is path-only: both the fragment and the query string are
//! cleared during normalization, so `/page?tab=1` and `/page#top` collapse
//! into one frontier entry.

use regex::{Regex, RegexBuilder};
use tracing::warn;
use url::Url;

/// File extensions that mark a URL as a static asset
const STATIC_EXTENSIONS: &[&str] = &[
    // scripts and styles
    ".js", ".mjs", ".css", ".map",
    // images
    ".png", ".jpg", ".jpeg", ".gif", ".svg", ".ico", ".webp", ".avif", ".bmp",
    // fonts
    ".woff", ".woff2", ".ttf", ".eot", ".otf",
    // media
    ".mp3", ".mp4", ".avi", ".mov", ".webm", ".ogg", ".wav", ".flac",
    // archives
    ".zip", ".tar", ".gz", ".rar", ".7z", ".bz2",
    // documents
    ".pdf", ".doc", ".docx", ".xls", ".xlsx", ".ppt", ".pptx",
];

/// Well-known static directory segments
const STATIC_SEGMENTS: &[&str] = &[
    "/static/",
    "/assets/",
    "/public/",
    "/_next/static/",
    "/dist/",
    "/build/",
    "/vendor/",
    "/node_modules/",
    "/fonts/",
    "/images/",
    "/img/",
    "/media/",
];

/// Hostname prefixes that mark an entire host as asset-serving
const STATIC_HOST_PREFIXES: &[&str] = &["cdn.", "static.", "assets.", "media."];

/// Resolves `href` against `base` and canonicalizes it for crawl identity.
/// Returns `None` for empty refs, excluded schemes, and anything that is not
/// an http(s) URL after resolution. Fragment and query are always cleared.
pub fn normalize(href: &str, base: &Url, excluded_schemes: &[String]) -> Option<Url> {
    let trimmed = href.trim();
    if trimmed.is_empty() {
        return None;
    }

    let lower = trimmed.to_lowercase();
    if excluded_schemes
        .iter()
        .any(|scheme| lower.starts_with(&scheme.to_lowercase()))
    {
        return None;
    }

    let mut resolved = base.join(trimmed).ok()?;
    if resolved.scheme() != "http" && resolved.scheme() != "https" {
        return None;
    }
    resolved.set_fragment(None);
    resolved.set_query(None);
    Some(resolved)
}

/// Hostname-only origin test; scheme and port are deliberately not compared
pub fn same_origin(u: &Url, base: &Url) -> bool {
    match (u.host_str(), base.host_str()) {
        (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
        _ => false,
    }
}

/// True when the URL points at non-HTML content that is never worth scanning
pub fn is_static_asset(u: &Url) -> bool {
    let path = u.path().to_lowercase();

    if STATIC_EXTENSIONS.iter().any(|ext| path.ends_with(ext)) {
        return true;
    }
    if STATIC_SEGMENTS.iter().any(|seg| path.contains(seg)) {
        return true;
    }
    if let Some(host) = u.host_str() {
        let host = host.to_lowercase();
        if STATIC_HOST_PREFIXES.iter().any(|p| host.starts_with(p)) {
            return true;
        }
    }
    false
}

/// Compiled form of the `path_regex_filter` config option
#[derive(Debug)]
pub enum PathFilter {
    /// No pattern configured; everything matches
    All,
    Pattern(Regex),
    /// Invalid pattern; nothing matches
    MatchNothing,
}

impl PathFilter {
    pub fn new(pattern: Option<&str>) -> Self {
        match pattern {
            None => PathFilter::All,
            Some(p) if p.is_empty() => PathFilter::All,
            Some(p) => match RegexBuilder::new(p).case_insensitive(true).build() {
                Ok(re) => PathFilter::Pattern(re),
                Err(e) => {
                    warn!("Invalid path_regex_filter {p:?}: {e}; no URL will match");
                    PathFilter::MatchNothing
                }
            },
        }
    }

    /// Applies to the URL path only, case-insensitively
    pub fn matches(&self, u: &Url) -> bool {
        match self {
            PathFilter::All => true,
            PathFilter::Pattern(re) => re.is_match(u.path()),
            PathFilter::MatchNothing => false,
        }
    }
}
