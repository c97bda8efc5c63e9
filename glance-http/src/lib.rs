//! Rate-limit-aware HTTP executor shared by the Glance API clients.
//!
//! - Request options: `Auth` (bearer or query-param key), query params, timeout
//! - Retries HTTP 429 honoring `retry-after` / `x-rate-limit-reset`, with an
//!   exponential fallback schedule; retries 5xx and transport errors on a
//!   shorter schedule; all other non-2xx statuses fail immediately
//! - Typed errors so callers can branch on rate-limiting without string
//!   matching, carrying the reset hint when the platform supplied one
//!
//! Caching is deliberately not done here; the resource clients own that.
//!
//! Security: bearer values are sanitized before use and logs only ever
//! include the auth kind, not the secret.

use rand::Rng;
use reqwest::header::{HeaderMap, HeaderValue, RETRY_AFTER};
use reqwest::{Client, Url};
pub use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::borrow::Cow;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::time::sleep;

const RATE_LIMIT_RESET_HEADER: &str = "x-rate-limit-reset";

// ==============================
// Errors
// ==============================

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("invalid URL: {0}")]
    Url(String),
    #[error("request build failed: {0}")]
    Build(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("decode error: {0}, body_snippet: {1}")]
    Decode(String, String),
    #[error("rate limited: {message}, retry_after_secs={retry_after_secs:?}")]
    RateLimited {
        retry_after_secs: Option<u64>,
        message: String,
        request_id: String,
    },
    #[error("server error {status} after retries: {message}")]
    Server {
        status: StatusCode,
        message: String,
        request_id: String,
    },
    #[error("request rejected {status}: {message}")]
    Api {
        status: StatusCode,
        message: String,
        request_id: String,
    },
}

impl HttpError {
    /// True for the rate-limit failure callers may absorb via cached data.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, HttpError::RateLimited { .. })
    }

    /// Reset hint in seconds, when the platform supplied one.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            HttpError::RateLimited {
                retry_after_secs, ..
            } => *retry_after_secs,
            _ => None,
        }
    }
}

// ==============================
// Auth & Request Options
// ==============================

/// Authentication strategies supported by the executor.
#[derive(Clone, Debug)]
pub enum Auth<'a> {
    /// Authorization: Bearer <token>
    Bearer(&'a str),
    /// Auth via query param (e.g. the video platform's `key`)
    Query { name: &'a str, value: Cow<'a, str> },
    None,
}

/// Per-request tuning knobs.
#[derive(Clone, Debug, Default)]
pub struct RequestOpts<'a> {
    pub timeout: Option<Duration>,
    pub auth: Option<Auth<'a>>,
    pub query: Option<Vec<(&'a str, Cow<'a, str>)>>, // e.g. [("max_results", "20".into())]
}

// ==============================
// Client
// ==============================

#[derive(Clone)]
pub struct HttpClient {
    base: Url,
    inner: Client,
    pub default_timeout: Duration,
    pub max_attempts: usize,
}

impl HttpClient {
    /// Construct a client anchored to a base URL.
    ///
    /// Defaults: 30s per-request timeout, 3 attempts per request.
    pub fn new(base: &str) -> Result<Self, HttpError> {
        let base = Url::parse(base).map_err(|e| HttpError::Url(e.to_string()))?;
        let inner = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| HttpError::Build(e.to_string()))?;
        Ok(Self {
            base,
            inner,
            default_timeout: Duration::from_secs(30),
            max_attempts: 3,
        })
    }

    pub fn with_timeout(mut self, dur: Duration) -> Self {
        self.default_timeout = dur;
        self
    }

    pub fn with_attempts(mut self, n: usize) -> Self {
        self.max_attempts = n.max(1);
        self
    }

    /// GET JSON with per-request options (auth/query/timeout).
    pub async fn get_json<T>(&self, path: &str, opts: RequestOpts<'_>) -> Result<T, HttpError>
    where
        T: DeserializeOwned,
    {
        self.request_json(Method::GET, path, opts).await
    }

    /// Issue a request and decode the 2xx body as JSON, retrying rate-limit
    /// and transient-server responses up to the attempt bound.
    pub async fn request_json<T>(
        &self,
        method: Method,
        path: &str,
        opts: RequestOpts<'_>,
    ) -> Result<T, HttpError>
    where
        T: DeserializeOwned,
    {
        // Absolute paths are used as-is, relative ones join the base.
        let url = match Url::parse(path) {
            Ok(abs) => abs,
            Err(_) => self
                .base
                .join(path)
                .map_err(|e| HttpError::Url(e.to_string()))?,
        };

        let auth_kind = match &opts.auth {
            Some(Auth::Bearer(_)) => "bearer",
            Some(Auth::Query { .. }) => "query",
            Some(Auth::None) | None => "none",
        };

        for attempt in 0..self.max_attempts {
            let last_attempt = attempt + 1 == self.max_attempts;

            let mut rb = self.inner.request(method.clone(), url.clone());
            rb = rb.timeout(opts.timeout.unwrap_or(self.default_timeout));

            if let Some(q) = &opts.query {
                let pairs: Vec<(&str, &str)> = q.iter().map(|(k, v)| (*k, v.as_ref())).collect();
                rb = rb.query(&pairs);
            }

            match &opts.auth {
                Some(Auth::Bearer(tok)) => {
                    let tok = sanitize_api_key(tok)?;
                    rb = rb.bearer_auth(tok);
                }
                Some(Auth::Query { name, value }) => {
                    rb = rb.query(&[(*name, value.as_ref())]);
                }
                Some(Auth::None) | None => {}
            }

            tracing::debug!(
                attempt = attempt + 1,
                max_attempts = self.max_attempts,
                method = %method,
                host_path = %format!("{}{}", url.domain().unwrap_or("-"), url.path()),
                auth_kind,
                "http.request.start"
            );

            let resp = match rb.send().await {
                Ok(resp) => resp,
                Err(err) => {
                    if last_attempt {
                        tracing::warn!(error = %err, "http.network_error");
                        return Err(HttpError::Network(err.to_string()));
                    }
                    let delay = server_backoff(attempt, rand::thread_rng().gen_range(0.0..1.0));
                    tracing::warn!(
                        attempt = attempt + 1,
                        backoff_ms = delay.as_millis() as u64,
                        error = %err,
                        "http.retrying.network"
                    );
                    sleep(delay).await;
                    continue;
                }
            };

            let status = resp.status();
            let headers = resp.headers().clone();
            let bytes = match resp.bytes().await {
                Ok(bytes) => bytes,
                Err(err) => {
                    if last_attempt {
                        tracing::warn!(error = %err, "http.network_error.body");
                        return Err(HttpError::Network(err.to_string()));
                    }
                    let delay = server_backoff(attempt, rand::thread_rng().gen_range(0.0..1.0));
                    tracing::warn!(
                        attempt = attempt + 1,
                        backoff_ms = delay.as_millis() as u64,
                        error = %err,
                        "http.retrying.network_body"
                    );
                    sleep(delay).await;
                    continue;
                }
            };

            let request_id = headers
                .get("x-request-id")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("-")
                .to_string();
            let snippet = snip_body(&bytes);

            tracing::debug!(
                %status,
                body_len = bytes.len(),
                x_request_id = %request_id,
                rate_limit_remaining = ?header_str(&headers, "x-rate-limit-remaining"),
                "http.response"
            );

            if status.is_success() {
                return serde_json::from_slice::<T>(&bytes).map_err(|e| {
                    tracing::warn!(
                        serde_err = %e,
                        body_snippet = %snippet,
                        "http.response.decode_error"
                    );
                    HttpError::Decode(e.to_string(), snippet)
                });
            }

            let message = extract_error_message(&bytes);

            if status == StatusCode::TOO_MANY_REQUESTS {
                let hint = rate_limit_reset_hint(&headers, unix_now_secs());
                if last_attempt {
                    tracing::warn!(
                        %status,
                        retry_after_secs = ?hint,
                        message = %message,
                        "http.rate_limited"
                    );
                    return Err(HttpError::RateLimited {
                        retry_after_secs: hint,
                        message,
                        request_id,
                    });
                }
                let wait = match hint {
                    Some(secs) => Duration::from_secs(secs),
                    None => rate_limit_backoff(attempt, rand::thread_rng().gen_range(0..=5)),
                };
                tracing::warn!(
                    attempt = attempt + 1,
                    backoff_ms = wait.as_millis() as u64,
                    message = %message,
                    "http.retrying.rate_limited"
                );
                sleep(wait).await;
                continue;
            }

            if status.is_server_error() {
                if last_attempt {
                    tracing::warn!(%status, message = %message, "http.server_error");
                    return Err(HttpError::Server {
                        status,
                        message,
                        request_id,
                    });
                }
                let wait = server_backoff(attempt, rand::thread_rng().gen_range(0.0..1.0));
                tracing::warn!(
                    attempt = attempt + 1,
                    %status,
                    backoff_ms = wait.as_millis() as u64,
                    message = %message,
                    "http.retrying.server"
                );
                sleep(wait).await;
                continue;
            }

            // 4xx other than 429 is not transient; fail without retry.
            tracing::warn!(%status, message = %message, body_snippet = %snippet, "http.error");
            return Err(HttpError::Api {
                status,
                message,
                request_id,
            });
        }

        unreachable!("retry loop always returns on the final attempt")
    }
}

// ==============================
// Backoff helpers
// ==============================

/// Seconds to wait for a 429, per the response headers: `retry-after` wins,
/// else `x-rate-limit-reset` (epoch seconds) minus now, clamped at zero.
fn rate_limit_reset_hint(headers: &HeaderMap, now_epoch: u64) -> Option<u64> {
    if let Some(secs) = headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
    {
        return Some(secs);
    }
    headers
        .get(RATE_LIMIT_RESET_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(|reset| reset.saturating_sub(now_epoch))
}

/// Fallback 429 schedule when the platform sends no reset hint.
fn rate_limit_backoff(attempt: usize, jitter_secs: u64) -> Duration {
    Duration::from_secs(60u64.saturating_mul(1 << attempt) + jitter_secs)
}

/// Transient-server (and transport) schedule.
fn server_backoff(attempt: usize, jitter: f64) -> Duration {
    Duration::from_secs_f64((1u64 << attempt) as f64 + jitter)
}

fn unix_now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

// ==============================
// Body helpers
// ==============================

fn extract_error_message(body: &[u8]) -> String {
    // Platform style: {"errors":[{"message":"...", "detail":"...", "title":"..."}]}
    #[derive(Deserialize)]
    struct ErrList {
        errors: Vec<ErrItem>,
    }
    #[derive(Deserialize)]
    struct ErrItem {
        #[serde(default)]
        message: String,
        #[serde(default)]
        detail: String,
        #[serde(default)]
        title: String,
    }

    // Generic: {"message":"..."} or {"detail":"..."} or {"error":"..."}
    #[derive(Deserialize)]
    struct Msg {
        #[serde(default)]
        message: String,
        #[serde(default)]
        detail: String,
        #[serde(default)]
        error: String,
    }

    if let Ok(list) = serde_json::from_slice::<ErrList>(body) {
        if let Some(first) = list.errors.into_iter().next() {
            for field in [first.message, first.detail, first.title] {
                if !field.is_empty() {
                    return field;
                }
            }
        }
    }
    if let Ok(m) = serde_json::from_slice::<Msg>(body) {
        for field in [m.message, m.detail, m.error] {
            if !field.is_empty() {
                return field;
            }
        }
    }
    snip_body(body)
}

fn snip_body(body: &[u8]) -> String {
    let mut snip = String::from_utf8_lossy(body).to_string();
    if snip.len() > 500 {
        snip.truncate(500);
        snip.push_str("...");
    }
    snip
}

fn sanitize_api_key(raw: &str) -> Result<String, HttpError> {
    let mut s = raw
        .trim()
        .trim_matches(|c| c == '"' || c == '\'')
        .to_string();
    s.retain(|ch| !ch.is_ascii_whitespace());

    if !s.is_ascii() {
        return Err(HttpError::Build("API key contains non-ASCII bytes".into()));
    }
    if s.bytes().any(|b| b < 0x20 || b == 0x7F) {
        return Err(HttpError::Build(
            "API key contains control characters".into(),
        ));
    }

    HeaderValue::from_str(&format!("Bearer {}", s))
        .map_err(|e| HttpError::Build(format!("invalid Authorization header: {e}")))?;
    Ok(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut h = HeaderMap::new();
        for (k, v) in pairs {
            h.insert(
                reqwest::header::HeaderName::from_bytes(k.as_bytes()).unwrap(),
                HeaderValue::from_str(v).unwrap(),
            );
        }
        h
    }

    #[test]
    fn retry_after_header_wins() {
        let h = headers(&[("retry-after", "12"), ("x-rate-limit-reset", "9999999999")]);
        assert_eq!(rate_limit_reset_hint(&h, 1_000), Some(12));
    }

    #[test]
    fn reset_epoch_is_relative_to_now() {
        let h = headers(&[("x-rate-limit-reset", "1500")]);
        assert_eq!(rate_limit_reset_hint(&h, 1_000), Some(500));
    }

    #[test]
    fn reset_in_the_past_clamps_to_zero() {
        let h = headers(&[("x-rate-limit-reset", "900")]);
        assert_eq!(rate_limit_reset_hint(&h, 1_000), Some(0));
    }

    #[test]
    fn no_headers_means_no_hint() {
        assert_eq!(rate_limit_reset_hint(&HeaderMap::new(), 1_000), None);
    }

    #[test]
    fn unparseable_headers_are_ignored() {
        let h = headers(&[("retry-after", "soon"), ("x-rate-limit-reset", "n/a")]);
        assert_eq!(rate_limit_reset_hint(&h, 1_000), None);
    }

    #[test]
    fn rate_limit_backoff_doubles_from_sixty() {
        assert_eq!(rate_limit_backoff(0, 0), Duration::from_secs(60));
        assert_eq!(rate_limit_backoff(1, 0), Duration::from_secs(120));
        assert_eq!(rate_limit_backoff(2, 5), Duration::from_secs(245));
    }

    #[test]
    fn server_backoff_is_exponential_with_jitter() {
        assert_eq!(server_backoff(0, 0.0), Duration::from_secs(1));
        assert_eq!(server_backoff(2, 0.5), Duration::from_secs_f64(4.5));
    }

    #[test]
    fn extracts_platform_error_detail() {
        let body = br#"{"errors":[{"detail":"Too Many Requests","title":"t"}]}"#;
        assert_eq!(extract_error_message(body), "Too Many Requests");
    }

    #[test]
    fn extracts_generic_message() {
        let body = br#"{"message":"quota exceeded"}"#;
        assert_eq!(extract_error_message(body), "quota exceeded");
    }

    #[test]
    fn falls_back_to_body_snippet() {
        assert_eq!(extract_error_message(b"plain text"), "plain text");
    }

    #[test]
    fn sanitize_strips_whitespace_and_quotes() {
        assert_eq!(sanitize_api_key(" \"abc def\" ").unwrap(), "abcdef");
        assert!(sanitize_api_key("k\u{00e9}y").is_err());
    }

    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    /// One-endpoint HTTP stub that always answers with the given status line
    /// and headers, counting connections (the client closes after each
    /// response, so connections == attempts).
    async fn spawn_stub(status_line: &'static str, extra_headers: &'static str, body: &'static str) -> (String, Arc<AtomicUsize>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let served = hits.clone();
        tokio::spawn(async move {
            loop {
                let Ok((mut sock, _)) = listener.accept().await else {
                    return;
                };
                served.fetch_add(1, Ordering::SeqCst);
                let mut buf = [0u8; 2048];
                let _ = sock.read(&mut buf).await;
                let resp = format!(
                    "HTTP/1.1 {status_line}\r\n{extra_headers}content-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = sock.write_all(resp.as_bytes()).await;
            }
        });
        (format!("http://{addr}"), hits)
    }

    #[tokio::test]
    async fn persistent_429_fails_after_exactly_three_attempts() {
        let (base, hits) = spawn_stub(
            "429 Too Many Requests",
            "retry-after: 0\r\n",
            r#"{"errors":[{"detail":"Too Many Requests"}]}"#,
        )
        .await;

        let client = HttpClient::new(&base).unwrap();
        let err = client
            .get_json::<serde_json::Value>("anything", RequestOpts::default())
            .await
            .unwrap_err();

        assert!(err.is_rate_limited());
        assert_eq!(err.retry_after_secs(), Some(0));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn plain_4xx_fails_immediately_without_retry() {
        let (base, hits) = spawn_stub(
            "404 Not Found",
            "",
            r#"{"message":"no such resource"}"#,
        )
        .await;

        let client = HttpClient::new(&base).unwrap();
        let err = client
            .get_json::<serde_json::Value>("missing", RequestOpts::default())
            .await
            .unwrap_err();

        match err {
            HttpError::Api {
                status, message, ..
            } => {
                assert_eq!(status, StatusCode::NOT_FOUND);
                assert_eq!(message, "no such resource");
            }
            other => panic!("expected Api error, got {other:?}"),
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn rate_limited_exposes_hint() {
        let err = HttpError::RateLimited {
            retry_after_secs: Some(90),
            message: "limited".into(),
            request_id: "-".into(),
        };
        assert!(err.is_rate_limited());
        assert_eq!(err.retry_after_secs(), Some(90));
        assert_eq!(
            HttpError::Network("boom".into()).retry_after_secs(),
            None
        );
    }
}
