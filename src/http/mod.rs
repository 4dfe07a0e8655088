//! HTTP client and authentication for the Lantern crawler

pub mod auth;
pub mod client;

pub use auth::{AuthOutcome, CookieJar, FormAuthenticator};
pub use client::HttpClient;
