//! Core data models for the Lantern crawler

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Severity level attached to classified errors
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Critical => write!(f, "critical"),
            Severity::High => write!(f, "high"),
            Severity::Medium => write!(f, "medium"),
            Severity::Low => write!(f, "low"),
        }
    }
}

/// Category of a classified failure
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    Timeout,
    Network,
    Server,
    Client,
    Unknown,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Timeout => write!(f, "timeout"),
            ErrorKind::Network => write!(f, "network"),
            ErrorKind::Server => write!(f, "server"),
            ErrorKind::Client => write!(f, "client"),
            ErrorKind::Unknown => write!(f, "unknown"),
        }
    }
}

/// Outcome of scanning a single URL
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Success,
    Error,
}

/// Log event level for the streaming sink
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
    Critical,
}

/// Configuration for a scan session. Immutable once the scan starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Seed URL (required)
    pub url: String,
    /// Login form URL; authentication runs only when url, username and password are all set
    #[serde(default)]
    pub login_url: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Form field name for the username; auto-detected when absent
    #[serde(default)]
    pub username_field: Option<String>,
    /// Form field name for the password; auto-detected when absent
    #[serde(default)]
    pub password_field: Option<String>,
    /// Links discovered at this depth or beyond are not enqueued
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,
    /// Scheduler halts once this many results have been recorded
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
    /// Per-request and per-navigation deadline in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Upper bound on concurrently scanning workers
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Merged over the default browser-like headers; custom wins
    #[serde(default)]
    pub custom_headers: HashMap<String, String>,
    /// Case-insensitive regex applied to the URL path; only matching URLs are enqueued
    #[serde(default)]
    pub path_regex_filter: Option<String>,
    /// Selects the Rich (headless browser) fetch strategy
    #[serde(default)]
    pub use_headless_browser: bool,
    /// Opaque session identifier; generated when absent
    #[serde(default)]
    pub scan_id: Option<String>,
    #[serde(default = "default_true")]
    pub include_data_attributes: bool,
    #[serde(default = "default_true")]
    pub include_onclick: bool,
    #[serde(default = "default_true")]
    pub include_forms: bool,
    #[serde(default = "default_true")]
    pub include_meta_refresh: bool,
    #[serde(default = "default_true")]
    pub include_canonical: bool,
    #[serde(default = "default_true")]
    pub include_interactive_elements: bool,
    /// URL schemes that fail normalization outright
    #[serde(default = "default_exclude_protocols")]
    pub exclude_protocols: Vec<String>,
    /// Rewrite 200 responses whose body looks like an error page
    #[serde(default = "default_true")]
    pub detect_soft_errors: bool,
    /// Ring-buffer capacity for the per-session log
    #[serde(default = "default_max_log_entries")]
    pub max_log_entries: usize,
    /// Post-crawl TTL for the session store, in minutes
    #[serde(default = "default_log_retention_minutes")]
    pub log_retention_minutes: u64,
    /// Delay after navigation settles before extraction (Rich only), in milliseconds
    #[serde(default = "default_dynamic_content_wait")]
    pub dynamic_content_wait: u64,
}

fn default_max_depth() -> u32 {
    3
}

fn default_max_pages() -> usize {
    100
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_max_concurrent() -> usize {
    5
}

fn default_true() -> bool {
    true
}

fn default_exclude_protocols() -> Vec<String> {
    ["javascript:", "mailto:", "tel:", "data:", "blob:"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_max_log_entries() -> usize {
    1000
}

fn default_log_retention_minutes() -> u64 {
    5
}

fn default_dynamic_content_wait() -> u64 {
    1500
}

impl ScanConfig {
    /// Creates a config for the given seed URL with all defaults
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            login_url: None,
            username: None,
            password: None,
            username_field: None,
            password_field: None,
            max_depth: default_max_depth(),
            max_pages: default_max_pages(),
            timeout_ms: default_timeout_ms(),
            max_concurrent: default_max_concurrent(),
            custom_headers: HashMap::new(),
            path_regex_filter: None,
            use_headless_browser: false,
            scan_id: None,
            include_data_attributes: true,
            include_onclick: true,
            include_forms: true,
            include_meta_refresh: true,
            include_canonical: true,
            include_interactive_elements: true,
            exclude_protocols: default_exclude_protocols(),
            detect_soft_errors: true,
            max_log_entries: default_max_log_entries(),
            log_retention_minutes: default_log_retention_minutes(),
            dynamic_content_wait: default_dynamic_content_wait(),
        }
    }

    /// True when all three form-login inputs are present
    pub fn has_credentials(&self) -> bool {
        self.login_url.is_some() && self.username.is_some() && self.password.is_some()
    }
}

/// Result of scanning a single URL
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResult {
    pub url: String,
    pub status: ScanStatus,
    /// Absent on transport failure before any response arrived
    pub status_code: Option<u16>,
    /// Same-origin normalized URLs found on this page
    pub links: Vec<String>,
    /// Bounded body prefix, populated only for 4xx/5xx statuses
    pub response_body: Option<String>,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub error_severity: Option<Severity>,
    pub error_retryable: Option<bool>,
    pub suggested_action: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub depth: u32,
}

/// Statistics snapshot attached to every log event
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanStats {
    pub urls_scanned: usize,
    pub links_found: usize,
    pub errors: usize,
    pub queue_size: usize,
    pub visited_count: usize,
}

/// Progress snapshot attached to every log event
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanProgress {
    pub current: usize,
    pub total: usize,
    pub percentage: f64,
}

/// Performance snapshot attached to every log event
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanPerformance {
    /// Response time of the event's own request, when it had one
    pub response_time_ms: Option<u64>,
    /// Elapsed time since the scan started
    pub elapsed_ms: u64,
    /// Mean of all response times observed so far
    pub average_response_ms: u64,
}

/// One entry in the per-session log ring buffer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanLog {
    #[serde(rename = "type")]
    pub level: LogLevel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub url: Option<String>,
    pub details: Option<String>,
    pub stats: ScanStats,
    pub progress: ScanProgress,
    pub performance: ScanPerformance,
}

/// One entry in the error summary's recent tail
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub url: String,
    pub message: String,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
}

/// Aggregate view of every error observed during a crawl
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorSummary {
    pub total: usize,
    pub by_kind: HashMap<String, usize>,
    pub by_severity: HashMap<String, usize>,
    pub by_status: HashMap<u16, usize>,
    pub recent: Vec<ErrorEntry>,
}

/// Final document returned by a completed (or stopped) scan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanReport {
    pub scan_id: String,
    pub results: Vec<ScanResult>,
    pub logs: Vec<ScanLog>,
    pub error_summary: ErrorSummary,
}

/// Acknowledgement for pause/resume/stop operations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpAck {
    pub success: bool,
    pub message: String,
}
