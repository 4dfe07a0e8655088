//! Lantern - authenticated breadth-first web crawler
//!
//! Given a seed URL and optional form-login credentials, Lantern discovers
//! every same-origin page reachable from the seed and reports, per URL, the
//! final HTTP status (corrected when error content is served with a 200),
//! the outbound same-origin links, the response time and, for error
//! responses, a bounded body prefix. Live crawls can be paused, resumed and
//! stopped, and their log/result tails polled while they run.

pub mod crawler;
pub mod engine;
pub mod error;
pub mod http;
pub mod models;
pub mod session;

pub use engine::{scan, Engine};
pub use error::{LanternError, Result};
pub use models::{ScanConfig, ScanLog, ScanReport, ScanResult};
