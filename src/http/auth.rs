//! Form-login negotiation for authenticated crawls
//!
//! One-shot pre-crawl step: fetch the login page, discover the form fields
//! and CSRF token, post the credentials with manual redirect handling, merge
//! cookies across both responses, and retry exactly once on a 419 token
//! mismatch. The output is a cookie jar and an optional post-login start URL;
//! the crawl engine consumes both and never touches the jar again.

use crate::error::{LanternError, Result};
use crate::http::client::DEFAULT_USER_AGENT;
use crate::models::ScanConfig;
use percent_encoding::percent_decode_str;
use reqwest::{Client, StatusCode};
use scraper::{Html, Selector};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Session cookies as a name → value map, serialized to a `Cookie` header at
/// request time. Merging is last-write-wins by name.
#[derive(Debug, Clone, Default)]
pub struct CookieJar {
    cookies: BTreeMap<String, String>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    pub fn set(&mut self, name: &str, value: &str) {
        self.cookies.insert(name.to_string(), value.to_string());
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.cookies.iter()
    }

    /// Absorbs every `Set-Cookie` header on a response, URL-decoding values
    pub fn merge_response(&mut self, response: &reqwest::Response) {
        for header in response.headers().get_all(reqwest::header::SET_COOKIE) {
            if let Ok(raw) = header.to_str() {
                self.merge_set_cookie(raw);
            }
        }
    }

    /// Parses one `Set-Cookie` line; only the leading name=value pair matters
    pub fn merge_set_cookie(&mut self, raw: &str) {
        let pair = raw.split(';').next().unwrap_or(raw).trim();
        if let Some((name, value)) = pair.split_once('=') {
            let decoded = percent_decode_str(value)
                .decode_utf8()
                .map(|c| c.into_owned())
                .unwrap_or_else(|_| value.to_string());
            self.cookies.insert(name.trim().to_string(), decoded);
        }
    }

    /// Serializes the jar into a single `Cookie` header value
    pub fn header_value(&self) -> String {
        self.cookies
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Output of the login preamble
#[derive(Debug, Clone)]
pub struct AuthOutcome {
    pub cookies: CookieJar,
    /// Redirect target captured from the login response, when any
    pub start_url: Option<Url>,
}

/// What the login-page HTML told us about the form
#[derive(Debug, Clone)]
struct LoginForm {
    action: Option<String>,
    method: String,
    wants_json: bool,
    username_field: String,
    password_field: String,
    csrf_token: Option<String>,
}

/// HTTP form-login negotiator
pub struct FormAuthenticator {
    client: Client,
    login_url: Url,
    username: String,
    password: String,
    username_field: Option<String>,
    password_field: Option<String>,
}

impl FormAuthenticator {
    pub fn from_config(config: &ScanConfig) -> Result<Self> {
        let login_url = config
            .login_url
            .as_deref()
            .ok_or_else(|| LanternError::AuthError("login_url is required".into()))?;
        let login_url = Url::parse(login_url)?;
        let username = config
            .username
            .clone()
            .ok_or_else(|| LanternError::AuthError("username is required".into()))?;
        let password = config
            .password
            .clone()
            .ok_or_else(|| LanternError::AuthError("password is required".into()))?;

        // Redirects stay manual so the post-login Location can be captured
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .user_agent(DEFAULT_USER_AGENT)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            client,
            login_url,
            username,
            password,
            username_field: config.username_field.clone(),
            password_field: config.password_field.clone(),
        })
    }

    /// Runs the full negotiation, retrying once on a 419 CSRF mismatch
    pub async fn login(&self) -> Result<AuthOutcome> {
        let mut jar = CookieJar::new();

        let html = self.fetch_login_page(&mut jar).await?;
        let form = self.discover_form(&html, &jar);
        debug!(
            "Login form: action={:?} method={} user_field={} pass_field={}",
            form.action, form.method, form.username_field, form.password_field
        );

        let (status, location) = self.submit(&form, &mut jar).await?;

        let (status, location) = if status.as_u16() == 419 {
            info!("Login returned 419 (CSRF mismatch); refreshing token and retrying once");
            let html = self.fetch_login_page(&mut jar).await?;
            let form = self.discover_form(&html, &jar);
            self.submit(&form, &mut jar).await?
        } else {
            (status, location)
        };

        if !status.is_success() && !status.is_redirection() {
            warn!("Login POST returned {status}; continuing with captured cookies");
        }
        info!("Authentication captured {} cookies", jar.len());

        let start_url = location.and_then(|loc| self.login_url.join(&loc).ok());
        Ok(AuthOutcome {
            cookies: jar,
            start_url,
        })
    }

    async fn fetch_login_page(&self, jar: &mut CookieJar) -> Result<String> {
        let mut req = self.client.get(self.login_url.as_str());
        if !jar.is_empty() {
            req = req.header("Cookie", jar.header_value());
        }
        let response = req.send().await?;
        jar.merge_response(&response);
        Ok(response.text().await?)
    }

    /// Field and token discovery over the login page DOM
    fn discover_form(&self, html: &str, jar: &CookieJar) -> LoginForm {
        let document = Html::parse_document(html);

        let csrf_token = discover_csrf_token(&document, jar);

        let username_field = self
            .username_field
            .clone()
            .or_else(|| detect_username_field(&document))
            .unwrap_or_else(|| "username".to_string());
        let password_field = self
            .password_field
            .clone()
            .or_else(|| detect_password_field(&document))
            .unwrap_or_else(|| "password".to_string());

        let form_el = select_login_form(&document);
        let action = form_el
            .as_ref()
            .and_then(|f| f.value().attr("action"))
            .map(str::to_string);
        let method = form_el
            .as_ref()
            .and_then(|f| f.value().attr("method"))
            .unwrap_or("post")
            .to_lowercase();
        let wants_json = form_el
            .as_ref()
            .and_then(|f| f.value().attr("enctype"))
            .map(|e| e.to_lowercase().contains("json"))
            .unwrap_or(false);

        LoginForm {
            action,
            method,
            wants_json,
            username_field,
            password_field,
            csrf_token,
        }
    }

    /// Posts credentials; returns the response status and any Location target
    async fn submit(
        &self,
        form: &LoginForm,
        jar: &mut CookieJar,
    ) -> Result<(StatusCode, Option<String>)> {
        let target = match &form.action {
            Some(action) if !action.trim().is_empty() => self.login_url.join(action)?,
            _ => self.login_url.clone(),
        };

        let mut params = BTreeMap::new();
        params.insert(form.username_field.clone(), self.username.clone());
        params.insert(form.password_field.clone(), self.password.clone());
        if let Some(token) = &form.csrf_token {
            for alias in ["_token", "csrf_token", "authenticity_token"] {
                params.insert(alias.to_string(), token.clone());
            }
        }

        let mut req = if form.method == "get" {
            self.client.get(target.as_str()).query(&params)
        } else if form.wants_json {
            self.client.post(target.as_str()).json(&params)
        } else {
            self.client.post(target.as_str()).form(&params)
        };

        req = req
            .header("Referer", self.login_url.as_str())
            .header("Origin", self.login_url.origin().ascii_serialization());
        if !jar.is_empty() {
            req = req.header("Cookie", jar.header_value());
        }
        if let Some(token) = &form.csrf_token {
            req = req
                .header("X-XSRF-TOKEN", token.as_str())
                .header("X-CSRF-TOKEN", token.as_str());
        }

        let response = req.send().await?;
        let status = response.status();
        let location = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        jar.merge_response(&response);

        Ok((status, location))
    }
}

/// CSRF discovery order: hidden inputs, then meta tags, then the XSRF cookie
fn discover_csrf_token(document: &Html, jar: &CookieJar) -> Option<String> {
    for name in ["_token", "csrf_token", "authenticity_token"] {
        let selector = format!("input[name=\"{name}\"]");
        let parsed = Selector::parse(&selector);
        if let Ok(sel) = parsed {
            if let Some(el) = document.select(&sel).next() {
                if let Some(value) = el.value().attr("value") {
                    return Some(value.to_string());
                }
            }
        }
    }
    for name in ["csrf-token", "_token"] {
        let selector = format!("meta[name=\"{name}\"]");
        let parsed = Selector::parse(&selector);
        if let Ok(sel) = parsed {
            if let Some(el) = document.select(&sel).next() {
                if let Some(content) = el.value().attr("content") {
                    return Some(content.to_string());
                }
            }
        }
    }
    jar.get("XSRF-TOKEN").map(str::to_string)
}

/// First text/email input whose name or id mentions user or login
fn detect_username_field(document: &Html) -> Option<String> {
    let sel = Selector::parse("input").ok()?;
    for el in document.select(&sel) {
        let input_type = el.value().attr("type").unwrap_or("text").to_lowercase();
        if input_type != "text" && input_type != "email" {
            continue;
        }
        let name = el.value().attr("name").unwrap_or("");
        let id = el.value().attr("id").unwrap_or("");
        let haystack = format!("{} {}", name, id).to_lowercase();
        if haystack.contains("user") || haystack.contains("login") {
            if !name.is_empty() {
                return Some(name.to_string());
            }
        }
    }
    None
}

fn detect_password_field(document: &Html) -> Option<String> {
    let sel = Selector::parse("input[type=\"password\"]").ok()?;
    document
        .select(&sel)
        .next()
        .and_then(|el| el.value().attr("name"))
        .map(str::to_string)
}

/// Prefers the form that actually contains a password input
fn select_login_form(document: &Html) -> Option<scraper::ElementRef<'_>> {
    let form_sel = Selector::parse("form").ok()?;
    let pass_sel = Selector::parse("input[type=\"password\"]").ok()?;
    let mut first = None;
    for form in document.select(&form_sel) {
        if first.is_none() {
            first = Some(form);
        }
        if form.select(&pass_sel).next().is_some() {
            return Some(form);
        }
    }
    first
}

/// Heuristic for the post-login verification step: does this page still look
/// like the login page?
pub fn is_login_page(url: &Url, body: &str) -> bool {
    let url_lower = url.as_str().to_lowercase();
    if url_lower.contains("login") || url_lower.contains("dang-nhap") {
        return true;
    }
    let body_lower = body.to_lowercase();
    ["login", "đăng nhập", "dang-nhap"]
        .iter()
        .any(|token| body_lower.contains(token))
}
