//! Content fetching: retrieve raw bytes and content-type for a source URL.
//!
//! ## Why the protocol fallback?
//!
//! Plenty of legacy image sources answer 404 on one scheme while serving the
//! same path fine on the other (misconfigured redirects, partial TLS
//! migrations). On a 404 the fetcher retries exactly once with http/https
//! swapped; a second failure is final. Everything else — timeout, non-200,
//! transport error — collapses to "not found" here: the batch-level retry
//! state machine is the only recovery path, so the fetcher carries no
//! backoff of its own.
//!
//! The trait seam exists so tests and embedders can substitute the network:
//! the default [`HttpFetcher`] is a thin reqwest client with a fixed 60 s
//! timeout.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;
use tracing::{debug, warn};

/// Fixed per-request timeout; a hung fetch must not stall its batch slot.
pub const FETCH_TIMEOUT_SECS: u64 = 60;

/// Raw bytes plus the server-declared content type, as fetched.
#[derive(Debug, Clone)]
pub struct FetchedImage {
    pub bytes: Vec<u8>,
    /// Value of the `content-type` response header, passed through to
    /// storage unchanged so derivatives serve with the source's type.
    pub content_type: Option<String>,
}

/// Retrieves image bytes for a (already normalised) URL.
///
/// Returns `None` for anything that should count as "not found" — the
/// caller marks the image failed and the batch retries later. Implementors
/// must not panic and must not retry beyond the single protocol swap.
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Option<FetchedImage>;
}

static SCHEME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z][a-zA-Z0-9+.-]*://").expect("valid regex"));

/// Ensure the URL carries a scheme, defaulting to plain http.
///
/// - `//host/path` (protocol-relative) → `http://host/path`
/// - `://host/path` (malformed prefix) → `http://host/path`
/// - `host/path` (bare) → `http://host/path`
/// - anything already schemed passes through untouched.
pub fn normalize_url(raw: &str) -> String {
    if SCHEME_RE.is_match(raw) {
        raw.to_string()
    } else if let Some(rest) = raw.strip_prefix("//") {
        format!("http://{rest}")
    } else if raw.starts_with("://") {
        format!("http{raw}")
    } else {
        format!("http://{raw}")
    }
}

/// Swap http↔https on a normalised URL, for the 404 fallback.
fn swap_protocol(url: &str) -> Option<String> {
    if let Some(rest) = url.strip_prefix("https://") {
        Some(format!("http://{rest}"))
    } else {
        url.strip_prefix("http://")
            .map(|rest| format!("https://{rest}"))
    }
}

/// Production fetcher: reqwest GET with a fixed timeout.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Build a fetcher with the default 60 s timeout.
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(FETCH_TIMEOUT_SECS))
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            // Builder only fails on TLS backend misconfiguration, which is
            // compiled in; fall back to the default client in that case.
            .unwrap_or_default();
        Self { client }
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response, reqwest::Error> {
        self.client.get(url).send().await
    }

    async fn read_body(response: reqwest::Response, url: &str) -> Option<FetchedImage> {
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        match response.bytes().await {
            Ok(bytes) => Some(FetchedImage {
                bytes: bytes.to_vec(),
                content_type,
            }),
            Err(e) => {
                warn!("Error reading body of {url}: {e}");
                None
            }
        }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContentFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Option<FetchedImage> {
        let response = match self.get(url).await {
            Ok(r) => r,
            Err(e) if e.is_timeout() => {
                warn!("Timeout fetching {url}");
                return None;
            }
            Err(e) => {
                warn!("Error fetching {url}: {e}");
                return None;
            }
        };

        match response.status() {
            reqwest::StatusCode::OK => Self::read_body(response, url).await,
            reqwest::StatusCode::NOT_FOUND => {
                // Some sources redirect inconsistently between schemes.
                let Some(alt) = swap_protocol(url) else {
                    warn!("Couldn't get {url} - status code: 404");
                    return None;
                };
                debug!("Trying different protocol: {alt}");
                match self.get(&alt).await {
                    Ok(retry) if retry.status() == reqwest::StatusCode::OK => {
                        Self::read_body(retry, &alt).await
                    }
                    Ok(retry) => {
                        warn!("Couldn't get {alt} - status code: {}", retry.status());
                        None
                    }
                    Err(e) => {
                        warn!("Error fetching {alt}: {e}");
                        None
                    }
                }
            }
            status => {
                warn!("Couldn't get {url} - status code: {status}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_bare_host() {
        assert_eq!(
            normalize_url("cdn.example.com/a.jpg"),
            "http://cdn.example.com/a.jpg"
        );
    }

    #[test]
    fn normalize_protocol_relative() {
        assert_eq!(
            normalize_url("//cdn.example.com/a.jpg"),
            "http://cdn.example.com/a.jpg"
        );
    }

    #[test]
    fn normalize_malformed_scheme_prefix() {
        assert_eq!(
            normalize_url("://cdn.example.com/a.jpg"),
            "http://cdn.example.com/a.jpg"
        );
    }

    #[test]
    fn normalize_passes_through_schemed_urls() {
        assert_eq!(
            normalize_url("https://cdn.example.com/a.jpg"),
            "https://cdn.example.com/a.jpg"
        );
        assert_eq!(
            normalize_url("http://cdn.example.com/a.jpg"),
            "http://cdn.example.com/a.jpg"
        );
    }

    #[test]
    fn swap_protocol_both_ways() {
        assert_eq!(
            swap_protocol("http://a/x.jpg").as_deref(),
            Some("https://a/x.jpg")
        );
        assert_eq!(
            swap_protocol("https://a/x.jpg").as_deref(),
            Some("http://a/x.jpg")
        );
        assert_eq!(swap_protocol("ftp://a/x.jpg"), None);
    }
}
