//! Per-scan session state: control flags, log ring buffer, results snapshot
//!
//! One `SessionRegistry` owns every live scan session. External observers use
//! it to pause/resume/stop a crawl and to poll the log and result tails while
//! the crawl is still running. A session survives for a configurable TTL
//! after its crawl ends, then the eviction task removes it.

use crate::crawler::classify::ErrorLedger;
use crate::error::{LanternError, Result};
use crate::models::{ErrorSummary, OpAck, ScanLog, ScanResult};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

/// Pause poll cadence inside `wait_if_paused`
const PAUSE_POLL: Duration = Duration::from_millis(100);

/// Control-plane flags for one scan session
#[derive(Debug, Clone, Copy, Default)]
pub struct ControlFlags {
    pub is_paused: bool,
    pub is_stopped: bool,
}

/// In-memory store for one scan session
pub struct SessionStore {
    scan_id: String,
    max_log_entries: usize,
    control: Mutex<ControlFlags>,
    logs: Mutex<VecDeque<ScanLog>>,
    results: Mutex<Vec<ScanResult>>,
    errors: Mutex<ErrorLedger>,
}

impl SessionStore {
    fn new(scan_id: &str, max_log_entries: usize) -> Self {
        Self {
            scan_id: scan_id.to_string(),
            max_log_entries: max_log_entries.max(1),
            control: Mutex::new(ControlFlags::default()),
            logs: Mutex::new(VecDeque::new()),
            results: Mutex::new(Vec::new()),
            errors: Mutex::new(ErrorLedger::default()),
        }
    }

    pub fn scan_id(&self) -> &str {
        &self.scan_id
    }

    pub fn pause(&self) {
        self.control.lock().expect("control lock").is_paused = true;
    }

    pub fn resume(&self) {
        self.control.lock().expect("control lock").is_paused = false;
    }

    /// Stop is sticky; a stopped session cannot be resumed
    pub fn stop(&self) {
        self.control.lock().expect("control lock").is_stopped = true;
    }

    pub fn control_snapshot(&self) -> ControlFlags {
        *self.control.lock().expect("control lock")
    }

    /// Yields until the session is unpaused. Raises `Stopped` once the stop
    /// flag is observed, which the coordinator catches to finalize cleanly.
    pub async fn wait_if_paused(&self) -> Result<()> {
        loop {
            let flags = self.control_snapshot();
            if flags.is_stopped {
                return Err(LanternError::Stopped);
            }
            if !flags.is_paused {
                return Ok(());
            }
            tokio::time::sleep(PAUSE_POLL).await;
        }
    }

    /// Appends a log entry, dropping the oldest entry on overflow
    pub fn push_log(&self, entry: ScanLog) {
        let mut logs = self.logs.lock().expect("log lock");
        if logs.len() >= self.max_log_entries {
            logs.pop_front();
        }
        logs.push_back(entry);
    }

    pub fn snapshot_logs(&self) -> Vec<ScanLog> {
        self.logs.lock().expect("log lock").iter().cloned().collect()
    }

    /// Appends a result unless the page cap has been reached
    pub fn try_append_result(&self, result: ScanResult, max_pages: usize) -> bool {
        let mut results = self.results.lock().expect("results lock");
        if results.len() >= max_pages {
            return false;
        }
        results.push(result);
        true
    }

    pub fn results_len(&self) -> usize {
        self.results.lock().expect("results lock").len()
    }

    pub fn snapshot_results(&self) -> Vec<ScanResult> {
        self.results.lock().expect("results lock").clone()
    }

    pub fn record_error(
        &self,
        url: &str,
        message: &str,
        kind: crate::models::ErrorKind,
        severity: crate::models::Severity,
        status_code: Option<u16>,
    ) {
        self.errors
            .lock()
            .expect("error lock")
            .record(url, message, kind, severity, status_code);
    }

    pub fn error_count(&self) -> usize {
        self.errors.lock().expect("error lock").total()
    }

    pub fn error_summary(&self, recent_limit: usize) -> ErrorSummary {
        self.errors.lock().expect("error lock").snapshot(recent_limit)
    }
}

/// Owner of every live scan session, keyed by scan id
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Arc<SessionStore>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the session store for a new scan; both control flags start false
    pub fn initialize(&self, scan_id: &str, max_log_entries: usize) -> Arc<SessionStore> {
        let store = Arc::new(SessionStore::new(scan_id, max_log_entries));
        self.sessions
            .lock()
            .expect("session lock")
            .insert(scan_id.to_string(), Arc::clone(&store));
        store
    }

    pub fn get(&self, scan_id: &str) -> Option<Arc<SessionStore>> {
        self.sessions.lock().expect("session lock").get(scan_id).cloned()
    }

    /// Polls against an evicted session return empty, not an error
    pub fn logs(&self, scan_id: &str) -> Vec<ScanLog> {
        self.get(scan_id).map(|s| s.snapshot_logs()).unwrap_or_default()
    }

    pub fn results(&self, scan_id: &str) -> Vec<ScanResult> {
        self.get(scan_id).map(|s| s.snapshot_results()).unwrap_or_default()
    }

    pub fn pause(&self, scan_id: &str) -> OpAck {
        match self.get(scan_id) {
            Some(store) => {
                store.pause();
                OpAck {
                    success: true,
                    message: format!("Scan {scan_id} paused"),
                }
            }
            None => unknown_session(scan_id),
        }
    }

    pub fn resume(&self, scan_id: &str) -> OpAck {
        match self.get(scan_id) {
            Some(store) => {
                store.resume();
                OpAck {
                    success: true,
                    message: format!("Scan {scan_id} resumed"),
                }
            }
            None => unknown_session(scan_id),
        }
    }

    pub fn stop(&self, scan_id: &str) -> OpAck {
        match self.get(scan_id) {
            Some(store) => {
                store.stop();
                OpAck {
                    success: true,
                    message: format!("Scan {scan_id} stopping"),
                }
            }
            None => unknown_session(scan_id),
        }
    }

    fn cleanup(&self, scan_id: &str) {
        self.sessions.lock().expect("session lock").remove(scan_id);
        debug!("Evicted scan session {scan_id}");
    }

    /// Schedules TTL eviction of the session store and its control state
    pub fn schedule_eviction(self: &Arc<Self>, scan_id: String, ttl: Duration) {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            registry.cleanup(&scan_id);
        });
    }
}

fn unknown_session(scan_id: &str) -> OpAck {
    OpAck {
        success: false,
        message: format!("No active scan with id {scan_id}"),
    }
}
