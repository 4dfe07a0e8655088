//! Error classification and the per-session error summary
//!
//! Maps raw failures (HTTP statuses, transport errors, crash-like bodies) to
//! a `{kind, severity, retryable, suggested_action}` tuple, applied in
//! priority order. The classifier is a pure function; the ledger aggregates
//! classified events for the final report.

use crate::models::{ErrorEntry, ErrorKind, ErrorSummary, Severity};
use chrono::Utc;
use std::collections::HashMap;

/// How many recent errors the ledger retains
const RECENT_TAIL: usize = 50;

/// Classification of one raw failure
#[derive(Debug, Clone)]
pub struct Classification {
    pub kind: ErrorKind,
    pub severity: Severity,
    pub retryable: bool,
    pub suggested_action: String,
}

const TIMEOUT_MARKERS: &[&str] = &[
    "timeout",
    "timed out",
    "und_err_headers_timeout",
    "etimedout",
    "timeouterror",
    "abort",
];

const NETWORK_MARKERS: &[&str] = &[
    "econnrefused",
    "enotfound",
    "econnreset",
    "econnaborted",
    "connection refused",
    "connection reset",
    "dns error",
    "failed to lookup",
    "network unreachable",
];

const CRASH_MARKERS: &[&str] = &["out of memory", "memory", "crash", "fatal"];

/// Classifies a raw failure. Rules apply in priority order: HTTP status
/// first, then message markers, then crash-like body content.
pub fn classify(status: Option<u16>, message: &str, body: Option<&str>) -> Classification {
    if let Some(code) = status {
        match code {
            500..=599 => {
                return Classification {
                    kind: ErrorKind::Server,
                    severity: Severity::High,
                    retryable: true,
                    suggested_action: "Server-side failure; retry later or check server logs"
                        .to_string(),
                }
            }
            401 | 403 => {
                return Classification {
                    kind: ErrorKind::Client,
                    severity: Severity::High,
                    retryable: false,
                    suggested_action: "Access denied; verify credentials or session cookies"
                        .to_string(),
                }
            }
            429 => {
                return Classification {
                    kind: ErrorKind::Client,
                    severity: Severity::Medium,
                    retryable: true,
                    suggested_action: "Rate limited; reduce concurrency or retry later"
                        .to_string(),
                }
            }
            408 => {
                return Classification {
                    kind: ErrorKind::Client,
                    severity: Severity::Medium,
                    retryable: true,
                    suggested_action: "Request timed out at the server; retry with a longer deadline"
                        .to_string(),
                }
            }
            400..=499 => {
                return Classification {
                    kind: ErrorKind::Client,
                    severity: Severity::Medium,
                    retryable: false,
                    suggested_action: "Client error; the URL may be stale or require parameters"
                        .to_string(),
                }
            }
            _ => {}
        }
    }

    let message_lower = message.to_lowercase();
    if TIMEOUT_MARKERS.iter().any(|m| message_lower.contains(m)) {
        return Classification {
            kind: ErrorKind::Timeout,
            severity: Severity::Medium,
            retryable: true,
            suggested_action: "Deadline exceeded; raise timeout_ms or reduce concurrency"
                .to_string(),
        };
    }
    if NETWORK_MARKERS.iter().any(|m| message_lower.contains(m)) {
        return Classification {
            kind: ErrorKind::Network,
            severity: Severity::High,
            retryable: true,
            suggested_action: "Network failure; check DNS and connectivity to the target"
                .to_string(),
        };
    }

    let crashy = body
        .map(|b| {
            let lower = b.to_lowercase();
            CRASH_MARKERS.iter().any(|m| lower.contains(m))
        })
        .unwrap_or(false)
        || CRASH_MARKERS.iter().any(|m| message_lower.contains(m));
    if crashy {
        return Classification {
            kind: ErrorKind::Unknown,
            severity: Severity::Critical,
            retryable: false,
            suggested_action: "Crash-like response; inspect the target process health"
                .to_string(),
        };
    }

    Classification {
        kind: ErrorKind::Unknown,
        severity: Severity::Medium,
        retryable: false,
        suggested_action: "Unclassified failure; inspect the error message".to_string(),
    }
}

/// Synthesized status code for failures that never produced a response
pub fn synthesized_status(kind: ErrorKind) -> Option<u16> {
    match kind {
        ErrorKind::Timeout => Some(408),
        ErrorKind::Network => Some(503),
        _ => None,
    }
}

/// Aggregates classified error events for one scan session.
/// Counting is event-based: the same URL failing twice counts twice.
#[derive(Debug, Default)]
pub struct ErrorLedger {
    total: usize,
    by_kind: HashMap<String, usize>,
    by_severity: HashMap<String, usize>,
    by_status: HashMap<u16, usize>,
    recent: Vec<ErrorEntry>,
}

impl ErrorLedger {
    pub fn record(
        &mut self,
        url: &str,
        message: &str,
        kind: ErrorKind,
        severity: Severity,
        status_code: Option<u16>,
    ) {
        self.total += 1;
        *self.by_kind.entry(kind.to_string()).or_insert(0) += 1;
        *self.by_severity.entry(severity.to_string()).or_insert(0) += 1;
        if let Some(code) = status_code {
            *self.by_status.entry(code).or_insert(0) += 1;
        }
        if self.recent.len() >= RECENT_TAIL {
            self.recent.remove(0);
        }
        self.recent.push(ErrorEntry {
            url: url.to_string(),
            message: message.to_string(),
            severity,
            timestamp: Utc::now(),
        });
    }

    pub fn total(&self) -> usize {
        self.total
    }

    /// Snapshot with the recent tail trimmed to the newest `recent_limit` entries
    pub fn snapshot(&self, recent_limit: usize) -> ErrorSummary {
        let skip = self.recent.len().saturating_sub(recent_limit);
        ErrorSummary {
            total: self.total,
            by_kind: self.by_kind.clone(),
            by_severity: self.by_severity.clone(),
            by_status: self.by_status.clone(),
            recent: self.recent[skip..].to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_server_errors() {
        let c = classify(Some(500), "", None);
        assert_eq!(c.kind, ErrorKind::Server);
        assert_eq!(c.severity, Severity::High);
        assert!(c.retryable);

        let c = classify(Some(503), "", None);
        assert_eq!(c.kind, ErrorKind::Server);
    }

    #[test]
    fn test_classify_auth_errors_not_retryable() {
        for code in [401, 403] {
            let c = classify(Some(code), "", None);
            assert_eq!(c.kind, ErrorKind::Client);
            assert_eq!(c.severity, Severity::High);
            assert!(!c.retryable);
        }
    }

    #[test]
    fn test_classify_retryable_client_errors() {
        for code in [429, 408] {
            let c = classify(Some(code), "", None);
            assert_eq!(c.severity, Severity::Medium);
            assert!(c.retryable, "{code} should be retryable");
        }
        let c = classify(Some(404), "", None);
        assert!(!c.retryable);
    }

    #[test]
    fn test_classify_timeout_by_message() {
        let c = classify(None, "operation timed out after 10s", None);
        assert_eq!(c.kind, ErrorKind::Timeout);
        assert!(c.retryable);
        assert_eq!(synthesized_status(c.kind), Some(408));

        let c = classify(None, "UND_ERR_HEADERS_TIMEOUT", None);
        assert_eq!(c.kind, ErrorKind::Timeout);
    }

    #[test]
    fn test_classify_network_by_message() {
        let c = classify(None, "ECONNREFUSED 127.0.0.1:80", None);
        assert_eq!(c.kind, ErrorKind::Network);
        assert_eq!(c.severity, Severity::High);
        assert_eq!(synthesized_status(c.kind), Some(503));
    }

    #[test]
    fn test_classify_crash_body_is_critical() {
        let c = classify(None, "", Some("FATAL: out of memory"));
        assert_eq!(c.kind, ErrorKind::Unknown);
        assert_eq!(c.severity, Severity::Critical);
        assert!(!c.retryable);
    }

    #[test]
    fn test_status_takes_priority_over_message() {
        let c = classify(Some(500), "timeout", None);
        assert_eq!(c.kind, ErrorKind::Server);
    }

    #[test]
    fn test_classify_unknown_default() {
        let c = classify(None, "mystery", None);
        assert_eq!(c.kind, ErrorKind::Unknown);
        assert_eq!(c.severity, Severity::Medium);
        assert_eq!(synthesized_status(c.kind), None);
    }

    #[test]
    fn test_ledger_counts_and_tail() {
        let mut ledger = ErrorLedger::default();
        for i in 0..60 {
            ledger.record(
                &format!("https://example.test/{i}"),
                "boom",
                ErrorKind::Server,
                Severity::High,
                Some(500),
            );
        }
        assert_eq!(ledger.total(), 60);
        let summary = ledger.snapshot(20);
        assert_eq!(summary.total, 60);
        assert_eq!(summary.by_kind["server"], 60);
        assert_eq!(summary.by_status[&500], 60);
        assert_eq!(summary.recent.len(), 20);
        assert!(summary.recent[19].url.ends_with("/59"));
    }
}
