//! The engine surface: five RPC-shaped operations over the session registry
//!
//! `scan_website` is long-running; observers stream progress through
//! `get_scan_logs`/`get_scan_results` and steer the crawl with
//! `pause_scan`/`resume_scan`/`stop_scan`. All inputs and outputs are
//! JSON-serializable so any transport can sit in front of this type.

use crate::crawler;
use crate::error::Result;
use crate::models::{OpAck, ScanConfig, ScanLog, ScanReport, ScanResult};
use crate::session::SessionRegistry;
use std::sync::Arc;

/// Owns every scan session for the lifetime of the process
pub struct Engine {
    registry: Arc<SessionRegistry>,
}

impl Engine {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(SessionRegistry::new()),
        }
    }

    /// Crawls the configured site to completion and returns the report.
    /// While this runs, the other operations observe and steer the session.
    pub async fn scan_website(&self, config: ScanConfig) -> Result<ScanReport> {
        crawler::run_scan(&self.registry, config).await
    }

    /// Current log buffer contents; empty after the session's TTL eviction
    pub fn get_scan_logs(&self, scan_id: &str) -> Vec<ScanLog> {
        self.registry.logs(scan_id)
    }

    /// Current results snapshot; empty after the session's TTL eviction
    pub fn get_scan_results(&self, scan_id: &str) -> Vec<ScanResult> {
        self.registry.results(scan_id)
    }

    pub fn pause_scan(&self, scan_id: &str) -> OpAck {
        self.registry.pause(scan_id)
    }

    pub fn resume_scan(&self, scan_id: &str) -> OpAck {
        self.registry.resume(scan_id)
    }

    pub fn stop_scan(&self, scan_id: &str) -> OpAck {
        self.registry.stop(scan_id)
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

/// One-shot convenience: run a scan on a throwaway engine
pub async fn scan(config: ScanConfig) -> Result<ScanReport> {
    Engine::new().scan_website(config).await
}
