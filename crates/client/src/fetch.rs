//! Outbound HTTP fetcher.
//!
//! Redirects are followed manually (not via reqwest's redirect policy)
//! so every hop gets a fresh SSRF check before the client connects to
//! it. Retries classify failures into transport/status/fatal buckets
//! and back off with jitter; a broadcast channel publishes redacted
//! start/end/error telemetry for callers that want to observe fetch
//! activity without threading a logger through every call site.

use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use reqwest::{Client, StatusCode, header};
use superfetch_core::{FetchErrorCode, redact_url};
use tokio::net::lookup_host;
use tokio::sync::broadcast;
use url::Url;

use crate::url_validator::{UrlValidationError, validate_and_normalize_url, validate_resolved_addrs};

const DEFAULT_USER_AGENT: &str = "superfetch/0.1";
const DEFAULT_MAX_REDIRECTS: usize = 5;
const RETRY_BASE_DELAY_MS: u64 = 250;
const RETRY_MAX_DELAY: Duration = Duration::from_secs(5);
const SLOW_REQUEST_THRESHOLD: Duration = Duration::from_millis(5000);

/// Headers a caller-supplied `customHeaders` map is never allowed to
/// override, case-insensitive.
const BLOCKED_CUSTOM_HEADERS: &[&str] = &[
    "host",
    "content-length",
    "connection",
    "transfer-encoding",
    "upgrade",
    "user-agent",
    "accept-encoding",
    "cookie",
    "authorization",
    "proxy-authorization",
];

/// Filter a caller-supplied header map against `BLOCKED_CUSTOM_HEADERS`
/// and trim values, dropping anything that fails to parse as a valid
/// header name/value rather than erroring the whole request.
pub fn sanitize_custom_headers(raw: &std::collections::HashMap<String, String>) -> header::HeaderMap {
    let mut headers = header::HeaderMap::new();
    for (name, value) in raw {
        let lower = name.trim().to_ascii_lowercase();
        if lower.is_empty() || BLOCKED_CUSTOM_HEADERS.contains(&lower.as_str()) {
            continue;
        }
        let Ok(header_name) = header::HeaderName::from_bytes(lower.as_bytes()) else { continue };
        let Ok(header_value) = header::HeaderValue::from_str(value.trim()) else { continue };
        headers.insert(header_name, header_value);
    }
    headers
}

#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub max_bytes: usize,
    pub timeout: Duration,
    pub max_redirects: usize,
    pub max_retries: u32,
    pub user_agent: String,
    pub accept: Option<String>,
    /// Caller-supplied headers sent on every hop, alongside `User-Agent`
    /// and `Accept`. Invalid names/values are rejected by the caller
    /// before they reach here (see `header::HeaderMap`'s own parsing).
    pub extra_headers: header::HeaderMap,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            max_bytes: 5 * 1024 * 1024,
            timeout: Duration::from_secs(15),
            max_redirects: DEFAULT_MAX_REDIRECTS,
            max_retries: 2,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            accept: None,
            extra_headers: header::HeaderMap::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub final_url: Url,
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub body: String,
    pub fetch_ms: u64,
}

#[derive(Debug, Clone)]
pub enum FetchEvent {
    Started { request_id: String, url: String },
    Finished { request_id: String, url: String, status: u16, elapsed_ms: u64 },
    Failed { request_id: String, url: String, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailureClass {
    RetryableTransport,
    RetryableStatus,
    Fatal,
}

fn classify_status(status: StatusCode) -> FailureClass {
    match status.as_u16() {
        429 | 500..=599 => FailureClass::RetryableStatus,
        _ => FailureClass::Fatal,
    }
}

/// Outbound fetcher with SSRF-safe manual redirect handling.
pub struct Fetcher {
    http: Client,
    telemetry: broadcast::Sender<FetchEvent>,
}

impl Fetcher {
    pub fn new() -> Result<Self, superfetch_core::Error> {
        let http = Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .use_rustls_tls()
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()
            .map_err(|e| superfetch_core::Error::Internal(format!("failed to build HTTP client: {e}")))?;

        let (telemetry, _) = broadcast::channel(128);
        Ok(Self { http, telemetry })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FetchEvent> {
        self.telemetry.subscribe()
    }

    fn emit(&self, event: FetchEvent) {
        let _ = self.telemetry.send(event);
    }

    /// Fetch `input`, following redirects manually (each hop is
    /// SSRF-validated before connecting) and retrying transient
    /// failures with exponential backoff and jitter.
    pub async fn fetch(&self, input: &str, options: &FetchOptions) -> Result<FetchResponse, superfetch_core::Error> {
        let request_id = next_request_id();
        let redacted = redact_url(input);
        self.emit(FetchEvent::Started { request_id: request_id.clone(), url: redacted.clone() });

        let start = Instant::now();
        let mut attempt = 0u32;

        loop {
            match self.fetch_once(input, options).await {
                Ok(response) => {
                    let elapsed = start.elapsed();
                    if elapsed > SLOW_REQUEST_THRESHOLD {
                        tracing::warn!(url = %redacted, elapsed_ms = elapsed.as_millis(), "slow fetch");
                    }
                    self.emit(FetchEvent::Finished {
                        request_id,
                        url: redacted,
                        status: response.status.as_u16(),
                        elapsed_ms: elapsed.as_millis() as u64,
                    });
                    return Ok(response);
                }
                Err((err, class)) => {
                    if class == FailureClass::Fatal || attempt >= options.max_retries {
                        self.emit(FetchEvent::Failed {
                            request_id,
                            url: redacted,
                            message: err.to_string(),
                        });
                        return Err(err);
                    }
                    let delay = backoff_delay(attempt);
                    tracing::debug!(attempt, delay_ms = delay.as_millis(), "retrying fetch");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn fetch_once(
        &self, input: &str, options: &FetchOptions,
    ) -> Result<FetchResponse, (superfetch_core::Error, FailureClass)> {
        let mut current = validate_and_normalize_url(input)
            .map_err(|e| (validation_error(input, e), FailureClass::Fatal))?;

        for hop in 0..=options.max_redirects {
            self.revalidate_resolved(&current)
                .await
                .map_err(|e| (e, FailureClass::Fatal))?;

            let mut request = self.http.get(current.as_str()).timeout(options.timeout).header(
                header::USER_AGENT,
                options.user_agent.as_str(),
            );
            if let Some(accept) = &options.accept {
                request = request.header(header::ACCEPT, accept.as_str());
            } else {
                request = request.header(
                    header::ACCEPT,
                    "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
                );
            }
            request = request.headers(options.extra_headers.clone());

            let start = Instant::now();
            let response = request.send().await.map_err(|e| {
                let code = if e.is_timeout() {
                    superfetch_core::Error::Timeout(current.to_string())
                } else {
                    superfetch_core::Error::fetch(current.to_string(), FetchErrorCode::NoData, e.to_string())
                };
                (code, FailureClass::RetryableTransport)
            })?;

            let status = response.status();

            if status.is_redirection() {
                let location = response
                    .headers()
                    .get(header::LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| {
                        (
                            superfetch_core::Error::fetch(
                                current.to_string(),
                                FetchErrorCode::BadRedirect,
                                "redirect with no Location header".to_string(),
                            ),
                            FailureClass::Fatal,
                        )
                    })?;
                let next = current.join(location).map_err(|e| {
                    (
                        superfetch_core::Error::fetch(
                            current.to_string(),
                            FetchErrorCode::BadRedirect,
                            e.to_string(),
                        ),
                        FailureClass::Fatal,
                    )
                })?;
                if hop == options.max_redirects {
                    return Err((
                        superfetch_core::Error::fetch(
                            current.to_string(),
                            FetchErrorCode::BadRedirect,
                            "too many redirects".to_string(),
                        ),
                        FailureClass::Fatal,
                    ));
                }
                current = validate_and_normalize_url(next.as_str()).map_err(|e| {
                    (
                        superfetch_core::Error::fetch(next.to_string(), FetchErrorCode::Blocked, e.to_string()),
                        FailureClass::Fatal,
                    )
                })?;
                continue;
            }

            if !status.is_success() {
                let class = classify_status(status);
                return Err((
                    superfetch_core::Error::fetch(
                        current.to_string(),
                        FetchErrorCode::Status(status.as_u16()),
                        format!("upstream returned status {status}"),
                    ),
                    class,
                ));
            }

            if let Some(len) = response.content_length()
                && len as usize > options.max_bytes
            {
                return Err((
                    superfetch_core::Error::fetch(
                        current.to_string(),
                        FetchErrorCode::NoData,
                        format!("content-length {len} exceeds max_bytes {}", options.max_bytes),
                    ),
                    FailureClass::Fatal,
                ));
            }

            let content_type =
                response.headers().get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok()).map(str::to_string);
            let final_url = response.url().clone();

            let bytes = read_bounded(response, options.max_bytes).await.map_err(|e| (e, FailureClass::Fatal))?;
            let body = String::from_utf8_lossy(&bytes).into_owned();
            let fetch_ms = start.elapsed().as_millis() as u64;

            return Ok(FetchResponse { final_url, status, content_type, body, fetch_ms });
        }

        Err((
            superfetch_core::Error::fetch(current.to_string(), FetchErrorCode::BadRedirect, "too many redirects".to_string()),
            FailureClass::Fatal,
        ))
    }

    /// Re-run DNS resolution for the current hop and re-check every
    /// resolved address against the blocklist, closing the window
    /// between hostname validation and the actual TCP connection.
    async fn revalidate_resolved(&self, url: &Url) -> Result<(), superfetch_core::Error> {
        let host = url.host_str().ok_or_else(|| superfetch_core::Error::UrlValidation("missing host".into()))?;
        if let Ok(ip) = host.parse::<IpAddr>() {
            return validate_resolved_addrs(&[ip])
                .map_err(|e| superfetch_core::Error::UrlValidation(e.to_string()));
        }

        let port = url.port_or_known_default().unwrap_or(443);
        let addrs: Vec<SocketAddr> = lookup_host((host, port))
            .await
            .map_err(|e| superfetch_core::Error::UrlValidation(format!("DNS resolution failed: {e}")))?
            .collect();

        if addrs.is_empty() {
            return Err(superfetch_core::Error::UrlValidation("DNS resolution returned no addresses".into()));
        }

        let ips: Vec<IpAddr> = addrs.iter().map(|a| a.ip()).collect();
        validate_resolved_addrs(&ips).map_err(|e| superfetch_core::Error::UrlValidation(e.to_string()))
    }
}

impl Default for Fetcher {
    fn default() -> Self {
        Self::new().expect("default reqwest client configuration is always valid")
    }
}

async fn read_bounded(response: reqwest::Response, max_bytes: usize) -> Result<Vec<u8>, superfetch_core::Error> {
    let bytes = response
        .bytes()
        .await
        .map_err(|e| superfetch_core::Error::Internal(format!("error reading response body: {e}")))?;
    if bytes.len() > max_bytes {
        return Err(superfetch_core::Error::fetch(
            String::new(),
            FetchErrorCode::NoData,
            format!("response body exceeds max_bytes {max_bytes}"),
        ));
    }
    Ok(bytes.to_vec())
}

fn validation_error(input: &str, err: UrlValidationError) -> superfetch_core::Error {
    use UrlValidationError::*;
    match err {
        BlockedHostname(_) | BlockedIp(_) => {
            superfetch_core::Error::fetch(input.to_string(), FetchErrorCode::Blocked, err.to_string())
        }
        _ => superfetch_core::Error::UrlValidation(err.to_string()),
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    let base = RETRY_BASE_DELAY_MS * 2u64.pow(attempt);
    let jitter_pct = pseudo_jitter(attempt);
    let millis = (base as f64 * jitter_pct) as u64;
    Duration::from_millis(millis).min(RETRY_MAX_DELAY)
}

/// Deterministic-but-spread jitter in `[0.8, 1.2]`, avoiding a
/// `rand` dependency for a single call site.
fn pseudo_jitter(attempt: u32) -> f64 {
    let wobble = (attempt as u64).wrapping_mul(2654435761) % 400;
    0.8 + (wobble as f64 / 1000.0)
}

fn next_request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_options_default() {
        let options = FetchOptions::default();
        assert_eq!(options.max_redirects, DEFAULT_MAX_REDIRECTS);
        assert_eq!(options.user_agent, DEFAULT_USER_AGENT);
    }

    #[test]
    fn test_classify_status_retryable() {
        assert_eq!(classify_status(StatusCode::TOO_MANY_REQUESTS), FailureClass::RetryableStatus);
        assert_eq!(classify_status(StatusCode::BAD_GATEWAY), FailureClass::RetryableStatus);
        assert_eq!(classify_status(StatusCode::INTERNAL_SERVER_ERROR), FailureClass::RetryableStatus);
    }

    #[test]
    fn test_classify_status_fatal() {
        assert_eq!(classify_status(StatusCode::NOT_FOUND), FailureClass::Fatal);
        assert_eq!(classify_status(StatusCode::FORBIDDEN), FailureClass::Fatal);
    }

    #[test]
    fn test_backoff_delay_grows_and_caps() {
        let d0 = backoff_delay(0);
        let d3 = backoff_delay(3);
        assert!(d0 < d3);
        assert!(backoff_delay(10) <= RETRY_MAX_DELAY);
    }

    #[test]
    fn test_backoff_jitter_within_bounds() {
        for attempt in 0..5 {
            let jitter = pseudo_jitter(attempt);
            assert!((0.8..=1.2).contains(&jitter));
        }
    }

    #[test]
    fn test_next_request_id_increments() {
        let a = next_request_id();
        let b = next_request_id();
        assert_ne!(a, b);
    }

    #[test]
    fn test_sanitize_custom_headers_drops_blocked() {
        let mut raw = std::collections::HashMap::new();
        raw.insert("Host".to_string(), "evil.example".to_string());
        raw.insert("Authorization".to_string(), "Bearer x".to_string());
        raw.insert("X-Custom".to_string(), "  value  ".to_string());

        let headers = sanitize_custom_headers(&raw);
        assert!(!headers.contains_key("host"));
        assert!(!headers.contains_key("authorization"));
        assert_eq!(headers.get("x-custom").unwrap(), "value");
    }

    #[test]
    fn test_sanitize_custom_headers_drops_unparsable() {
        let mut raw = std::collections::HashMap::new();
        raw.insert("X-Bad\nName".to_string(), "value".to_string());
        let headers = sanitize_custom_headers(&raw);
        assert!(headers.is_empty());
    }

    #[tokio::test]
    async fn test_fetcher_new_builds() {
        assert!(Fetcher::new().is_ok());
    }

    #[tokio::test]
    async fn test_fetch_rejects_blocked_host() {
        let fetcher = Fetcher::new().unwrap();
        let result = fetcher.fetch("http://169.254.169.254/latest/meta-data", &FetchOptions::default()).await;
        assert!(result.is_err());
    }
}
