//! Link extraction from static HTML
//!
//! Produces a deduplicated list of raw URL tokens in first-encountered order.
//! Tokens are emitted verbatim; normalization, origin and asset filtering all
//! happen downstream. The catalogue covers anchors, data-* attributes,
//! inline event handlers, forms, inline scripts and styles, media sources,
//! embedded JSON, HTML comments, metadata tags and interactive controls.
//! `<iframe>` sources are deliberately excluded.

use crate::crawler::urls;
use crate::models::ScanConfig;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use url::Url;

/// Extraction toggles mirroring the link-extraction config options
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    pub data_attributes: bool,
    pub onclick: bool,
    pub forms: bool,
    pub meta_refresh: bool,
    pub canonical: bool,
    pub interactive: bool,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            data_attributes: true,
            onclick: true,
            forms: true,
            meta_refresh: true,
            canonical: true,
            interactive: true,
        }
    }
}

impl ExtractOptions {
    pub fn from_config(config: &ScanConfig) -> Self {
        Self {
            data_attributes: config.include_data_attributes,
            onclick: config.include_onclick,
            forms: config.include_forms,
            meta_refresh: config.include_meta_refresh,
            canonical: config.include_canonical,
            interactive: config.include_interactive_elements,
        }
    }
}

/// Deduplicating collector preserving first-encountered order
struct Sink {
    seen: HashSet<String>,
    urls: Vec<String>,
}

impl Sink {
    fn new() -> Self {
        Self {
            seen: HashSet::new(),
            urls: Vec::new(),
        }
    }

    fn push(&mut self, raw: &str) {
        let token = raw.trim();
        if token.is_empty() {
            return;
        }
        if self.seen.insert(token.to_string()) {
            self.urls.push(token.to_string());
        }
    }
}

/// Attribute names whose value is treated as a URL when found on data-* attributes
const DATA_NAME_MARKERS: &[&str] = &["href", "url", "link", "action", "path", "route"];

/// Extracts candidate URL tokens from an HTML document
pub fn extract_urls(doc_url: &Url, html: &str, opts: &ExtractOptions) -> Vec<String> {
    let document = Html::parse_document(html);
    let mut sink = Sink::new();

    extract_base_and_anchors(&document, &mut sink);
    if opts.onclick {
        extract_onclick_handlers(&document, &mut sink);
    }
    if opts.data_attributes {
        extract_data_attributes(&document, &mut sink);
    }
    if opts.forms {
        extract_form_actions(&document, &mut sink);
    }
    extract_scripts_and_styles(&document, &mut sink);
    extract_media_sources(&document, &mut sink);
    extract_embedded_json(&document, &mut sink);
    extract_comments(&document, &mut sink);
    extract_metadata(&document, opts, &mut sink);
    if opts.interactive {
        extract_interactive(&document, &mut sink);
    }
    extract_same_origin_scripts(&document, doc_url, &mut sink);
    extract_text_urls(&document, &mut sink);

    sink.urls
}

fn select_all<'a>(
    document: &'a Html,
    selector: &str,
) -> impl Iterator<Item = ElementRef<'a>> + 'a {
    let parsed = Selector::parse(selector).ok();
    parsed
        .into_iter()
        .flat_map(move |sel| document.select(&sel).collect::<Vec<_>>())
}

fn extract_base_and_anchors(document: &Html, sink: &mut Sink) {
    for el in select_all(document, "base[href]") {
        if let Some(href) = el.value().attr("href") {
            sink.push(href);
        }
    }
    for el in select_all(document, "a") {
        for attr in ["href", "data-href", "data-url"] {
            if let Some(value) = el.value().attr(attr) {
                sink.push(value);
            }
        }
    }
    for el in select_all(document, "area[href]") {
        if let Some(href) = el.value().attr("href") {
            sink.push(href);
        }
    }
}

fn extract_onclick_handlers(document: &Html, sink: &mut Sink) {
    for el in select_all(document, "[onclick]") {
        if let Some(handler) = el.value().attr("onclick") {
            scan_js_text(handler, sink);
        }
    }
}

fn extract_data_attributes(document: &Html, sink: &mut Sink) {
    for el in select_all(document, "*") {
        for (name, value) in el.value().attrs() {
            if !name.starts_with("data-") {
                continue;
            }
            let suffix = &name[5..];
            if DATA_NAME_MARKERS.iter().any(|m| suffix.contains(m)) {
                sink.push(value);
            }
        }
    }
}

fn extract_form_actions(document: &Html, sink: &mut Sink) {
    for el in select_all(document, "form[action]") {
        if let Some(action) = el.value().attr("action") {
            sink.push(action);
        }
    }
}

fn extract_scripts_and_styles(document: &Html, sink: &mut Sink) {
    for el in select_all(document, "script:not([src])") {
        let kind = el.value().attr("type").unwrap_or("");
        if kind.contains("json") {
            continue; // handled by the JSON walker
        }
        let text: String = el.text().collect();
        scan_js_text(&text, sink);
    }
    for el in select_all(document, "style") {
        let text: String = el.text().collect();
        scan_css_text(&text, sink);
    }
    for el in select_all(document, "[style]") {
        if let Some(style) = el.value().attr("style") {
            scan_css_text(style, sink);
        }
    }
}

fn extract_media_sources(document: &Html, sink: &mut Sink) {
    for el in select_all(document, "img[srcset]") {
        if let Some(srcset) = el.value().attr("srcset") {
            scan_srcset(srcset, sink);
        }
    }
    for el in select_all(document, "source") {
        if let Some(src) = el.value().attr("src") {
            sink.push(src);
        }
        if let Some(srcset) = el.value().attr("srcset") {
            scan_srcset(srcset, sink);
        }
    }
    for el in select_all(document, "video[poster]") {
        if let Some(poster) = el.value().attr("poster") {
            sink.push(poster);
        }
    }
    for el in select_all(document, "object[data]") {
        if let Some(data) = el.value().attr("data") {
            sink.push(data);
        }
    }
    for el in select_all(document, "embed[src]") {
        if let Some(src) = el.value().attr("src") {
            sink.push(src);
        }
    }
}

fn extract_embedded_json(document: &Html, sink: &mut Sink) {
    for el in select_all(
        document,
        "script[type=\"application/ld+json\"], script[type=\"application/json\"]",
    ) {
        let text: String = el.text().collect();
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(&text) {
            walk_json(&value, sink);
        }
    }
}

fn extract_comments(document: &Html, sink: &mut Sink) {
    for node in document.tree.nodes() {
        if let Some(comment) = node.value().as_comment() {
            scan_bare_urls(comment, sink);
            scan_js_text(comment, sink);
        }
    }
}

fn extract_metadata(document: &Html, opts: &ExtractOptions, sink: &mut Sink) {
    if opts.canonical {
        for el in select_all(document, "meta[property], meta[name]") {
            let key = el
                .value()
                .attr("property")
                .or_else(|| el.value().attr("name"))
                .unwrap_or("");
            let wanted = matches!(
                key,
                "og:url" | "og:image" | "twitter:url" | "twitter:image"
            );
            if wanted {
                if let Some(content) = el.value().attr("content") {
                    sink.push(content);
                }
            }
        }
        for el in select_all(document, "link[rel][href]") {
            let rel = el.value().attr("rel").unwrap_or("").to_lowercase();
            let wanted = [
                "canonical",
                "manifest",
                "prefetch",
                "preload",
                "dns-prefetch",
                "prerender",
            ]
            .iter()
            .any(|r| rel.split_whitespace().any(|token| token == *r));
            if wanted {
                if let Some(href) = el.value().attr("href") {
                    sink.push(href);
                }
            }
        }
    }
    if opts.meta_refresh {
        for el in select_all(document, "meta[http-equiv]") {
            let equiv = el.value().attr("http-equiv").unwrap_or("");
            if !equiv.eq_ignore_ascii_case("refresh") {
                continue;
            }
            if let Some(content) = el.value().attr("content") {
                if let Ok(re) = Regex::new(r#"(?i)url\s*=\s*['"]?([^'">;\s]+)"#) {
                    if let Some(cap) = re.captures(content) {
                        if let Some(m) = cap.get(1) {
                            sink.push(m.as_str());
                        }
                    }
                }
            }
        }
    }
}

fn extract_interactive(document: &Html, sink: &mut Sink) {
    for sel in ["[role=\"button\"]", "[role=\"link\"]", "button"] {
        for el in select_all(document, sel) {
            for (name, value) in el.value().attrs() {
                if name.starts_with("data-") {
                    let suffix = &name[5..];
                    if DATA_NAME_MARKERS.iter().any(|m| suffix.contains(m)) {
                        sink.push(value);
                    }
                }
            }
            if let Some(handler) = el.value().attr("onclick") {
                scan_js_text(handler, sink);
            }
        }
    }
}

/// `<script src>` is only followed when it stays on the document's host
fn extract_same_origin_scripts(document: &Html, doc_url: &Url, sink: &mut Sink) {
    for el in select_all(document, "script[src]") {
        if let Some(src) = el.value().attr("src") {
            if let Ok(resolved) = doc_url.join(src.trim()) {
                if urls::same_origin(&resolved, doc_url) {
                    sink.push(src);
                }
            }
        }
    }
}

fn extract_text_urls(document: &Html, sink: &mut Sink) {
    let text: String = document.root_element().text().collect::<Vec<_>>().join(" ");
    scan_bare_urls(&text, sink);
}

/// Each srcset candidate is a URL followed by an optional width/density descriptor
fn scan_srcset(srcset: &str, sink: &mut Sink) {
    for candidate in srcset.split(',') {
        if let Some(url) = candidate.trim().split_whitespace().next() {
            sink.push(url);
        }
    }
}

/// JS URL-literal patterns applied to script bodies, onclick handlers and comments
fn scan_js_text(text: &str, sink: &mut Sink) {
    let patterns = [
        // assignments and calls through href/url/location/window.open
        r#"(?:href|url|link|location|window\.location|window\.open|location\.href)\s*[=:.(]\s*['"]([^'"]+)['"]"#,
        // network call sites
        r#"(?:fetch|axios\.get|axios\.post|axios\.put|axios\.delete|axios|\$\.ajax|XMLHttpRequest|\.get|\.post|\.put|\.delete)\s*\(\s*['"]([^'"]+)['"]"#,
        // bare absolute string literals
        r#"['"](https?://[^'"\s]+)['"]"#,
        // bare root-relative string literals
        r#"['"](/[a-zA-Z0-9_\-/.?&=]+)['"]"#,
    ];

    for pattern in &patterns {
        if let Ok(re) = Regex::new(pattern) {
            for cap in re.captures_iter(text) {
                if let Some(m) = cap.get(1) {
                    sink.push(m.as_str());
                }
            }
        }
    }
}

/// CSS url(...) and @import patterns for style blocks and style attributes
fn scan_css_text(text: &str, sink: &mut Sink) {
    let patterns = [
        r#"url\(\s*['"]?([^'")\s]+)['"]?\s*\)"#,
        r#"@import\s+['"]([^'"]+)['"]"#,
    ];
    for pattern in &patterns {
        if let Ok(re) = Regex::new(pattern) {
            for cap in re.captures_iter(text) {
                if let Some(m) = cap.get(1) {
                    sink.push(m.as_str());
                }
            }
        }
    }
}

/// Bare absolute URLs in prose or comments
fn scan_bare_urls(text: &str, sink: &mut Sink) {
    if let Ok(re) = Regex::new(r#"https?://[^\s"'<>()\[\]]+"#) {
        for m in re.find_iter(text) {
            sink.push(m.as_str().trim_end_matches(['.', ',', ';']));
        }
    }
}

/// Walks a JSON tree emitting string leaves that look like URLs
fn walk_json(value: &serde_json::Value, sink: &mut Sink) {
    match value {
        serde_json::Value::String(s) => {
            let is_absolute = s.starts_with("http://") || s.starts_with("https://");
            let is_rooted = s.starts_with('/') && s.len() > 1 && !s[1..].starts_with('/');
            if is_absolute || is_rooted {
                sink.push(s);
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                walk_json(item, sink);
            }
        }
        serde_json::Value::Object(map) => {
            for item in map.values() {
                walk_json(item, sink);
            }
        }
        _ => {}
    }
}

/// Collects URL-like string leaves from a standalone JSON document
/// (used by the fetch strategies for `application/json` responses)
pub fn extract_json_urls(body: &str) -> Vec<String> {
    let mut sink = Sink::new();
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        walk_json(&value, &mut sink);
    }
    sink.urls
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc_url() -> Url {
        Url::parse("https://example.test/").expect("valid url")
    }

    fn extract(html: &str) -> Vec<String> {
        extract_urls(&doc_url(), html, &ExtractOptions::default())
    }

    #[test]
    fn test_anchor_variants() {
        let html = r##"
            <a href="/one">1</a>
            <a data-href="/two">2</a>
            <a data-url="/three">3</a>
            <area href="/map-region">
            <base href="https://example.test/base/">
        "##;
        let urls = extract(html);
        for expected in ["/one", "/two", "/three", "/map-region", "https://example.test/base/"] {
            assert!(urls.contains(&expected.to_string()), "missing {expected}");
        }
    }

    #[test]
    fn test_dedup_first_seen_order() {
        let html = r#"<a href="/a">x</a><a href="/b">y</a><a href="/a">z</a>"#;
        let urls = extract(html);
        assert_eq!(urls, vec!["/a".to_string(), "/b".to_string()]);
    }

    #[test]
    fn test_onclick_patterns() {
        let html = r#"
            <div onclick="window.location = '/go-here'">go</div>
            <span onclick="fetch('/api/items')">load</span>
            <b onclick="doThing('https://example.test/abs')">abs</b>
        "#;
        let urls = extract(html);
        assert!(urls.contains(&"/go-here".to_string()));
        assert!(urls.contains(&"/api/items".to_string()));
        assert!(urls.contains(&"https://example.test/abs".to_string()));
    }

    #[test]
    fn test_onclick_toggle_off() {
        let html = r#"<div onclick="window.location='/hidden'">x</div>"#;
        let opts = ExtractOptions {
            onclick: false,
            ..ExtractOptions::default()
        };
        let urls = extract_urls(&doc_url(), html, &opts);
        assert!(!urls.contains(&"/hidden".to_string()));
    }

    #[test]
    fn test_data_attributes() {
        let html = r#"
            <div data-link="/from-data-link"></div>
            <div data-api-url="/from-data-api"></div>
            <div data-color="blue"></div>
        "#;
        let urls = extract(html);
        assert!(urls.contains(&"/from-data-link".to_string()));
        assert!(urls.contains(&"/from-data-api".to_string()));
        assert!(!urls.contains(&"blue".to_string()));
    }

    #[test]
    fn test_form_action_and_toggle() {
        let html = r#"<form action="/search"><input name="q"></form>"#;
        assert!(extract(html).contains(&"/search".to_string()));

        let opts = ExtractOptions {
            forms: false,
            ..ExtractOptions::default()
        };
        assert!(!extract_urls(&doc_url(), html, &opts).contains(&"/search".to_string()));
    }

    #[test]
    fn test_inline_script_and_style() {
        let html = r#"
            <script>const next = '/paged/2'; fetch('/api/feed');</script>
            <style>.hero { background: url(/img/hero.png); } @import '/css/extra.css';</style>
            <div style="background-image: url('/img/inline.png')"></div>
        "#;
        let urls = extract(html);
        for expected in [
            "/paged/2",
            "/api/feed",
            "/img/hero.png",
            "/css/extra.css",
            "/img/inline.png",
        ] {
            assert!(urls.contains(&expected.to_string()), "missing {expected}");
        }
    }

    #[test]
    fn test_media_sources() {
        let html = r#"
            <img srcset="/img/a-1x.png 1x, /img/a-2x.png 2x">
            <video poster="/img/poster.jpg"><source src="/vid/clip.mp4"></video>
            <object data="/doc/spec.pdf"></object>
            <embed src="/embed/thing.swf">
        "#;
        let urls = extract(html);
        for expected in [
            "/img/a-1x.png",
            "/img/a-2x.png",
            "/img/poster.jpg",
            "/vid/clip.mp4",
            "/doc/spec.pdf",
            "/embed/thing.swf",
        ] {
            assert!(urls.contains(&expected.to_string()), "missing {expected}");
        }
    }

    #[test]
    fn test_embedded_json() {
        let html = r#"
            <script type="application/ld+json">
            {"@context": "https://schema.org", "url": "https://example.test/item", "nested": {"page": "/deep/page"}}
            </script>
        "#;
        let urls = extract(html);
        assert!(urls.contains(&"https://example.test/item".to_string()));
        assert!(urls.contains(&"/deep/page".to_string()));
    }

    #[test]
    fn test_comments_scanned() {
        let html = "<!-- staging copy at https://example.test/staging -->";
        let urls = extract(html);
        assert!(urls.contains(&"https://example.test/staging".to_string()));
    }

    #[test]
    fn test_metadata_tags() {
        let html = r#"
            <meta property="og:url" content="https://example.test/canonical-og">
            <meta name="twitter:image" content="/img/card.png">
            <link rel="canonical" href="https://example.test/the-page">
            <link rel="preload" href="/fonts/main.woff2">
            <link rel="stylesheet" href="/css/skip-me.css">
            <meta http-equiv="refresh" content="3; url=/redirect-target">
        "#;
        let urls = extract(html);
        assert!(urls.contains(&"https://example.test/canonical-og".to_string()));
        assert!(urls.contains(&"/img/card.png".to_string()));
        assert!(urls.contains(&"https://example.test/the-page".to_string()));
        assert!(urls.contains(&"/fonts/main.woff2".to_string()));
        assert!(urls.contains(&"/redirect-target".to_string()));
        assert!(!urls.contains(&"/css/skip-me.css".to_string()));
    }

    #[test]
    fn test_meta_refresh_toggle() {
        let html = r#"<meta http-equiv="refresh" content="0;url=/away">"#;
        let opts = ExtractOptions {
            meta_refresh: false,
            ..ExtractOptions::default()
        };
        assert!(!extract_urls(&doc_url(), html, &opts).contains(&"/away".to_string()));
    }

    #[test]
    fn test_script_src_same_origin_only() {
        let html = r#"
            <script src="/js/app.js"></script>
            <script src="https://thirdparty.test/lib.js"></script>
        "#;
        let urls = extract(html);
        assert!(urls.contains(&"/js/app.js".to_string()));
        assert!(!urls.iter().any(|u| u.contains("thirdparty.test")));
    }

    #[test]
    fn test_iframe_excluded() {
        let html = r#"<iframe src="/embedded/app"></iframe>"#;
        assert!(!extract(html).contains(&"/embedded/app".to_string()));
    }

    #[test]
    fn test_visible_text_urls() {
        let html = "<p>Docs live at https://example.test/docs, enjoy.</p>";
        let urls = extract(html);
        assert!(urls.contains(&"https://example.test/docs".to_string()));
    }

    #[test]
    fn test_json_urls_helper() {
        let body = r#"{"items": [{"link": "/items/1"}, {"link": "https://example.test/items/2"}], "count": 2}"#;
        let urls = extract_json_urls(body);
        assert_eq!(
            urls,
            vec!["/items/1".to_string(), "https://example.test/items/2".to_string()]
        );
    }
}
