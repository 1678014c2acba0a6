//! Streamable-HTTP surface: the `/mcp` endpoint plus health checks and
//! cached-markdown downloads.
//!
//! Middleware runs host allowlist, then origin allowlist, then the
//! CORS short-circuit for every route, and auth/rate-limit/session
//! admission around `/mcp` specifically.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::{HeaderMap, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use rmcp::transport::streamable_http_server::StreamableHttpService;
use rmcp::transport::streamable_http_server::session::local::LocalSessionManager;
use serde_json::json;
use superfetch_core::AppConfig;
use tower_http::trace::TraceLayer;

use crate::handler::{AppState, SuperfetchServer};

pub fn build_router(handler: SuperfetchServer, state: AppState) -> Router {
    let mcp_service = StreamableHttpService::new(
        move || Ok(handler.clone()),
        LocalSessionManager::default().into(),
        Default::default(),
    );

    // `/mcp` alone carries auth, the rate limiter, and the admission
    // layer that feeds our capacity/TTL-aware `SessionManager`;
    // `LocalSessionManager` above still owns the wire-level session
    // bookkeeping rmcp's transport needs.
    let mcp_router = Router::new()
        .nest_service("/mcp", mcp_service)
        .layer(axum::middleware::from_fn_with_state(state.clone(), session_admission))
        .layer(axum::middleware::from_fn_with_state(state.clone(), rate_limit))
        .layer(axum::middleware::from_fn_with_state(state.clone(), auth_gate));

    Router::new()
        .route("/health", get(health))
        .route("/mcp/downloads/:namespace/:hash", get(download))
        .merge(mcp_router)
        .layer(axum::middleware::from_fn(cors_short_circuit))
        .layer(axum::middleware::from_fn_with_state(state.clone(), origin_allowlist))
        .layer(axum::middleware::from_fn_with_state(state.clone(), host_allowlist))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<AppState>, Query(query): Query<HashMap<String, String>>, headers: HeaderMap) -> impl IntoResponse {
    let mut body = json!({
        "status": "ok",
        "name": "superfetch",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime": state.started_at.elapsed().as_secs_f64(),
    });

    let verbose_requested = query.get("verbose").map(String::as_str) == Some("true");
    if verbose_requested && is_authorized(&headers, &state.config) {
        body["activeSessions"] = json!(state.sessions.active_count().await);
        body["cacheKeys"] = json!(state.cache.keys().await.len());
        body["workerPool"] = json!({"queueDepth": 0, "activeWorkers": 0, "capacity": 1});
    }

    Json(body)
}

/// Serve a cached Markdown document as a file download. `hash` accepts
/// the `{urlHash}` or `{urlHash}.{varyHash}` form used by cache keys.
async fn download(
    State(state): State<AppState>, Path((namespace, hash)): Path<(String, String)>,
) -> Result<Response, StatusCode> {
    if namespace != "markdown" || !is_valid_hash(&hash) {
        return Err(StatusCode::NOT_FOUND);
    }

    let key = format!("{namespace}:{hash}");
    let Some(entry) = state.cache.get(&key).await else { return Err(StatusCode::NOT_FOUND) };

    let file_name = sanitize_file_name(entry.title.as_deref().unwrap_or("document"));
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, "text/markdown; charset=utf-8".parse().unwrap());
    headers.insert(
        header::CONTENT_DISPOSITION,
        format!("attachment; filename=\"{file_name}.md\"").parse().unwrap(),
    );
    headers.insert(header::CACHE_CONTROL, "private, max-age=0, no-cache".parse().unwrap());
    headers.insert("X-Content-Type-Options", "nosniff".parse().unwrap());

    Ok((headers, entry.content).into_response())
}

fn is_valid_hash(hash: &str) -> bool {
    (8..=64).contains(&hash.len()) && hash.chars().all(|c| c.is_ascii_hexdigit() || c == '.')
}

fn sanitize_file_name(raw: &str) -> String {
    let cleaned: String =
        raw.chars().map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '-' }).collect();
    let trimmed = cleaned.trim_matches('-');
    if trimmed.is_empty() { "document".to_string() } else { trimmed.chars().take(80).collect() }
}

/// Short-circuits `OPTIONS` with a bare 200 and otherwise passes the
/// request through untouched. No `Access-Control-Allow-*` headers are
/// ever added; MCP clients are not browsers.
async fn cors_short_circuit(request: axum::extract::Request, next: axum::middleware::Next) -> Response {
    if request.method() == Method::OPTIONS {
        return StatusCode::OK.into_response();
    }
    next.run(request).await
}

fn forbidden(code: &str, message: &str) -> Response {
    (StatusCode::FORBIDDEN, Json(json!({"error": message, "code": code}))).into_response()
}

/// Strip a leading IPv6 bracket pair or a trailing `:port`, then
/// lowercase. Bare (unbracketed) IPv6 literals contain multiple
/// colons and are left untouched rather than mistaking one for a port
/// separator.
fn normalize_host(raw: &str) -> String {
    let first = raw.split(',').next().unwrap_or(raw).trim();
    let host = if let Some(rest) = first.strip_prefix('[') {
        rest.split(']').next().unwrap_or(rest)
    } else if first.matches(':').count() == 1 {
        first.split(':').next().unwrap_or(first)
    } else {
        first
    };
    host.to_lowercase()
}

fn host_allowed(host: &str, config: &AppConfig) -> bool {
    if host == "localhost" || host == "127.0.0.1" || host == "::1" {
        return true;
    }
    let configured_host = config.host.to_lowercase();
    if configured_host != "0.0.0.0" && host == configured_host {
        return true;
    }
    config.allowed_hosts.iter().any(|h| h.to_lowercase() == host)
}

async fn host_allowlist(
    State(state): State<AppState>, headers: HeaderMap, request: axum::extract::Request, next: axum::middleware::Next,
) -> Response {
    let Some(raw_host) = headers.get(header::HOST).and_then(|v| v.to_str().ok()) else {
        return forbidden("HOST_NOT_ALLOWED", "Host header is required");
    };
    if !host_allowed(&normalize_host(raw_host), &state.config) {
        return forbidden("HOST_NOT_ALLOWED", "host is not in the allowlist");
    }
    next.run(request).await
}

/// A missing `Origin` passes: MCP clients are typically non-browser
/// processes that never send one.
async fn origin_allowlist(
    State(state): State<AppState>, headers: HeaderMap, request: axum::extract::Request, next: axum::middleware::Next,
) -> Response {
    if let Some(origin) = headers.get(header::ORIGIN).and_then(|v| v.to_str().ok())
        && let Ok(parsed) = url::Url::parse(origin)
        && let Some(host) = parsed.host_str()
        && !host_allowed(&host.to_lowercase(), &state.config)
    {
        return forbidden("ORIGIN_NOT_ALLOWED", "origin is not in the allowlist");
    }
    next.run(request).await
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers.get(header::AUTHORIZATION)?.to_str().ok()?.strip_prefix("Bearer ")
}

/// Static bearer-token check shared by `/health?verbose=true` and the
/// `/mcp` auth gate. `auth_mode = oauth` still checks against the
/// locally configured token set here; live introspection against
/// `oauth.introspection_url` is not wired up.
fn is_authorized(headers: &HeaderMap, config: &AppConfig) -> bool {
    let Some(token) = bearer_token(headers) else { return false };
    config.api_key.as_deref() == Some(token) || config.access_tokens.iter().any(|t| t == token)
}

/// No auth is enforced on `/mcp` when neither `API_KEY` nor
/// `ACCESS_TOKENS` is configured, matching an open local-dev setup.
async fn auth_gate(
    State(state): State<AppState>, headers: HeaderMap, request: axum::extract::Request, next: axum::middleware::Next,
) -> Response {
    let auth_configured = state.config.api_key.is_some() || !state.config.access_tokens.is_empty();
    if auth_configured && !is_authorized(&headers, &state.config) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"jsonrpc": "2.0", "error": {"code": -32001, "message": "missing or invalid bearer token"}, "id": null})),
        )
            .into_response();
    }
    next.run(request).await
}

pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    buckets: Mutex<HashMap<String, (Instant, u32)>>,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self { max_requests, window, buckets: Mutex::new(HashMap::new()) }
    }

    /// Returns `Ok(())` when the request is admitted, or `Err(seconds)`
    /// with the ceil seconds remaining until the window resets.
    fn check(&self, key: &str) -> Result<(), u64> {
        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        let entry = buckets.entry(key.to_string()).or_insert((now, 0));
        if now.duration_since(entry.0) > self.window {
            *entry = (now, 0);
        }
        entry.1 += 1;
        if entry.1 <= self.max_requests {
            return Ok(());
        }
        let elapsed = now.duration_since(entry.0);
        let remaining = self.window.saturating_sub(elapsed);
        let retry_after_secs = remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0);
        Err(retry_after_secs.max(1))
    }

    /// Drop buckets untouched for over an hour so a long tail of
    /// one-shot IPs doesn't grow the map forever.
    fn evict_stale(&self) {
        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        buckets.retain(|_, (started, _)| now.duration_since(*started) <= Duration::from_secs(3600));
    }

    pub fn spawn_cleanup(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(300));
            loop {
                interval.tick().await;
                limiter.evict_stale();
            }
        })
    }
}

async fn rate_limit(
    State(state): State<AppState>, ConnectInfo(addr): ConnectInfo<SocketAddr>, headers: HeaderMap,
    request: axum::extract::Request, next: axum::middleware::Next,
) -> Response {
    let key = client_ip(&headers, addr, &state.config.trusted_proxies);
    match state.rate_limiter.check(&key) {
        Ok(()) => next.run(request).await,
        Err(retry_after_secs) => {
            let mut resp_headers = HeaderMap::new();
            resp_headers.insert(header::RETRY_AFTER, retry_after_secs.to_string().parse().unwrap());
            (
                StatusCode::TOO_MANY_REQUESTS,
                resp_headers,
                Json(json!({"jsonrpc": "2.0", "error": {"code": -32008, "message": "rate limit exceeded"}})),
            )
                .into_response()
        }
    }
}

/// Only consults `X-Real-IP`/`X-Forwarded-For` when the socket peer is
/// one of `trusted_proxies` (or that set is empty); otherwise the
/// socket peer is authoritative, closing the header-spoofing bypass.
fn client_ip(headers: &HeaderMap, fallback: SocketAddr, trusted_proxies: &[String]) -> String {
    let peer = fallback.ip().to_string();
    let trust_forwarding_headers = trusted_proxies.is_empty() || trusted_proxies.iter().any(|p| p == &peer);
    if !trust_forwarding_headers {
        return peer;
    }

    if let Some(real_ip) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        return real_ip.trim().to_string();
    }
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|s| s.trim().to_string())
        .unwrap_or(peer)
}

/// Layers §4.5's capacity/TTL admission control on top of rmcp's own
/// wire-level session manager: a fresh `/mcp` call without a known
/// `Mcp-Session-Id` reserves a slot before it's let through, and the
/// slot is promoted once the transport hands back the id it minted.
async fn session_admission(
    State(state): State<AppState>, headers: HeaderMap, request: axum::extract::Request, next: axum::middleware::Next,
) -> Response {
    let session_header = headers.get("mcp-session-id").and_then(|v| v.to_str().ok()).map(str::to_string);

    if let Some(id) = &session_header {
        if request.method() == Method::DELETE {
            state.sessions.close(id).await;
        } else {
            state.sessions.touch(id).await;
        }
        return next.run(request).await;
    }

    let Some(slot) = state.sessions.reserve_slot().await else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"jsonrpc": "2.0", "error": {"code": -32000, "message": "session capacity exceeded"}, "id": null})),
        )
            .into_response();
    };

    let response = next.run(request).await;
    if let Some(new_id) = response.headers().get("mcp-session-id").and_then(|v| v.to_str().ok()) {
        slot.promote(new_id.to_string()).await;
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_valid_hash() {
        assert!(is_valid_hash("deadbeef00000000"));
        assert!(is_valid_hash("deadbeef00000000.abc123def456"));
        assert!(!is_valid_hash("short"));
        assert!(!is_valid_hash("not-hex-at-all-not-hex-at-all!!"));
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("Hello World!"), "Hello-World-");
        assert_eq!(sanitize_file_name("../../etc/passwd"), "etc-passwd");
        assert_eq!(sanitize_file_name(""), "document");
    }

    #[test]
    fn test_rate_limiter_blocks_after_threshold() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        assert!(limiter.check("1.2.3.4").is_ok());
        assert!(limiter.check("1.2.3.4").is_ok());
        assert!(limiter.check("1.2.3.4").is_err());
        assert!(limiter.check("5.6.7.8").is_ok());
    }

    #[test]
    fn test_rate_limiter_retry_after_is_bounded_by_window() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        assert!(limiter.check("1.2.3.4").is_ok());
        let retry_after = limiter.check("1.2.3.4").unwrap_err();
        assert!(retry_after >= 1 && retry_after <= 60);
    }

    #[test]
    fn test_normalize_host_strips_port_and_lowercases() {
        assert_eq!(normalize_host("Example.com:8080"), "example.com");
        assert_eq!(normalize_host("example.com"), "example.com");
    }

    #[test]
    fn test_normalize_host_keeps_bracketed_ipv6() {
        assert_eq!(normalize_host("[::1]:8080"), "::1");
        assert_eq!(normalize_host("[::1]"), "::1");
    }

    #[test]
    fn test_normalize_host_takes_first_of_comma_list() {
        assert_eq!(normalize_host("a.example.com, b.example.com"), "a.example.com");
    }

    #[test]
    fn test_host_allowed_loopback_and_configured() {
        let config = AppConfig { host: "api.example.com".into(), ..Default::default() };
        assert!(host_allowed("localhost", &config));
        assert!(host_allowed("127.0.0.1", &config));
        assert!(host_allowed("api.example.com", &config));
        assert!(!host_allowed("evil.example", &config));
    }

    #[test]
    fn test_host_allowed_respects_explicit_allowlist() {
        let config = AppConfig { allowed_hosts: vec!["trusted.example".into()], ..Default::default() };
        assert!(host_allowed("trusted.example", &config));
        assert!(!host_allowed("untrusted.example", &config));
    }

    #[test]
    fn test_client_ip_ignores_forwarded_headers_from_untrusted_peer() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "9.9.9.9".parse().unwrap());
        let fallback: SocketAddr = "203.0.113.5:443".parse().unwrap();
        assert_eq!(client_ip(&headers, fallback, &["10.0.0.1".to_string()]), "203.0.113.5");
    }

    #[test]
    fn test_client_ip_trusts_forwarded_headers_from_trusted_peer() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "9.9.9.9, 10.0.0.1".parse().unwrap());
        let fallback: SocketAddr = "10.0.0.1:443".parse().unwrap();
        assert_eq!(client_ip(&headers, fallback, &["10.0.0.1".to_string()]), "9.9.9.9");
    }

    #[test]
    fn test_client_ip_prefers_real_ip_over_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", "9.9.9.9".parse().unwrap());
        headers.insert("x-forwarded-for", "8.8.8.8".parse().unwrap());
        let fallback: SocketAddr = "127.0.0.1:443".parse().unwrap();
        assert_eq!(client_ip(&headers, fallback, &[]), "9.9.9.9");
    }

    #[test]
    fn test_is_authorized_checks_api_key_and_access_tokens() {
        let config = AppConfig { api_key: Some("secret".into()), access_tokens: vec!["other".into()], ..Default::default() };
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Bearer secret".parse().unwrap());
        assert!(is_authorized(&headers, &config));

        headers.insert(header::AUTHORIZATION, "Bearer other".parse().unwrap());
        assert!(is_authorized(&headers, &config));

        headers.insert(header::AUTHORIZATION, "Bearer wrong".parse().unwrap());
        assert!(!is_authorized(&headers, &config));
    }
}
