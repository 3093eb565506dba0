//! Per-client-IP request limiting with burst detection and temporary bans.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    Json,
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderMap, HeaderName, HeaderValue, Request, StatusCode, header::RETRY_AFTER},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use serde_json::json;
use tokio::time::Instant;
use tracing::warn;

use crate::{application::error::ErrorReport, config::RateLimitSettings};

const SOURCE: &str = "infra::http::rate_limit";
const RATE_LIMITED_METRIC: &str = "hemicycle_http_rate_limited_total";
const VIOLATION_WINDOW: Duration = Duration::from_secs(60);
const DEFAULT_SCOPE: &str = "*";

const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Per-minute ceilings for routes that deviate from the default.
///
/// `/api/extraction` and `/api/debats` are mounted by the embedding
/// application through [`build_router_with`](super::build_router_with).
const PATH_LIMITS: [(&str, u32); 3] = [("/api/extraction", 10), ("/api/debats", 60), ("/health", 200)];

/// Headers consulted for the client address, in order, before the socket peer.
const CLIENT_IP_HEADERS: [&str; 4] = [
    "cf-connecting-ip",
    "x-forwarded-for",
    "x-real-ip",
    "x-client-ip",
];

#[derive(Debug, Clone)]
pub struct RateLimitPolicy {
    pub window: Duration,
    pub per_minute: u32,
    pub burst_window: Duration,
    pub burst: u32,
    pub ban: Duration,
    pub violation_threshold: u32,
}

impl From<&RateLimitSettings> for RateLimitPolicy {
    fn from(settings: &RateLimitSettings) -> Self {
        Self {
            window: settings.window,
            per_minute: settings.per_minute.get(),
            burst_window: settings.burst_window,
            burst: settings.burst.get(),
            ban: settings.ban,
            violation_threshold: settings.violation_threshold,
        }
    }
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            per_minute: 100,
            burst_window: Duration::from_secs(10),
            burst: 200,
            ban: Duration::from_secs(600),
            violation_threshold: 5,
        }
    }
}

/// Outcome of [`RateLimiter::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { limit: u32, remaining: u32 },
    Limited { limit: u32, retry_after: Duration },
    Banned { retry_after: Duration },
}

#[derive(Debug, Clone)]
pub struct RateLimiter {
    policy: RateLimitPolicy,
    requests: Arc<DashMap<String, Vec<Instant>>>,
    violations: Arc<DashMap<String, Vec<Instant>>>,
    bans: Arc<DashMap<String, Instant>>,
}

impl RateLimiter {
    pub fn new(policy: RateLimitPolicy) -> Self {
        Self {
            policy,
            requests: Arc::new(DashMap::new()),
            violations: Arc::new(DashMap::new()),
            bans: Arc::new(DashMap::new()),
        }
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    /// Ceiling applied to `path`: the first configured route whose segments
    /// prefix the path, otherwise the default per-minute limit.
    pub fn limit_for(&self, path: &str) -> u32 {
        self.route_for(path).1
    }

    /// Bucket scope and ceiling for `path`. Routes with their own ceiling are
    /// counted separately from the rest of the client's traffic.
    fn route_for(&self, path: &str) -> (&'static str, u32) {
        PATH_LIMITS
            .iter()
            .find(|(prefix, _)| {
                path == *prefix
                    || path
                        .strip_prefix(prefix)
                        .is_some_and(|rest| rest.starts_with('/'))
            })
            .copied()
            .unwrap_or((DEFAULT_SCOPE, self.policy.per_minute))
    }

    pub fn check(&self, client: &str, path: &str) -> RateDecision {
        let now = Instant::now();

        if let Some(until) = self.bans.get(client).map(|entry| *entry) {
            if until > now {
                return RateDecision::Banned {
                    retry_after: until - now,
                };
            }
            self.bans.remove(client);
        }

        let (scope, limit) = self.route_for(path);
        let window = self.policy.window;
        let burst_window = self.policy.burst_window;

        let mut entry = self.requests.entry(format!("{client}:{scope}")).or_default();
        entry.retain(|instant| now.duration_since(*instant) < window);

        let in_burst = entry
            .iter()
            .filter(|instant| now.duration_since(**instant) < burst_window)
            .count();
        let over_burst = in_burst >= self.policy.burst as usize;
        let over_limit = entry.len() >= limit as usize;

        if over_burst || over_limit {
            drop(entry);
            let retry_after = if over_burst { burst_window } else { window };
            if self.record_violation(client, now) {
                return RateDecision::Banned {
                    retry_after: self.policy.ban,
                };
            }
            return RateDecision::Limited { limit, retry_after };
        }

        entry.push(now);
        let remaining = limit.saturating_sub(entry.len() as u32);
        RateDecision::Allowed { limit, remaining }
    }

    /// Returns `true` when the violation starts a ban.
    fn record_violation(&self, client: &str, now: Instant) -> bool {
        let mut entry = self.violations.entry(client.to_string()).or_default();
        entry.retain(|instant| now.duration_since(*instant) < VIOLATION_WINDOW);
        entry.push(now);

        if entry.len() as u32 > self.policy.violation_threshold {
            entry.clear();
            drop(entry);
            self.bans.insert(client.to_string(), now + self.policy.ban);
            warn!(
                component = SOURCE,
                client,
                ban_secs = self.policy.ban.as_secs(),
                "client temporarily banned"
            );
            return true;
        }
        false
    }

    /// Drop expired timestamps, empty buckets and lapsed bans. Returns how many
    /// clients were forgotten.
    pub fn prune(&self) -> usize {
        let now = Instant::now();
        let window = self.policy.window;
        let before = self.requests.len() + self.violations.len() + self.bans.len();

        self.requests.retain(|_, stamps| {
            stamps.retain(|instant| now.duration_since(*instant) < window);
            !stamps.is_empty()
        });
        self.violations.retain(|_, stamps| {
            stamps.retain(|instant| now.duration_since(*instant) < VIOLATION_WINDOW);
            !stamps.is_empty()
        });
        self.bans.retain(|_, until| *until > now);

        before - (self.requests.len() + self.violations.len() + self.bans.len())
    }

    /// Number of live (client, route) buckets.
    pub fn tracked_buckets(&self) -> usize {
        self.requests.len()
    }

    pub fn is_banned(&self, client: &str) -> bool {
        self.bans
            .get(client)
            .is_some_and(|until| *until > Instant::now())
    }
}

/// Resolve the caller's address from proxy headers, falling back to the peer.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    CLIENT_IP_HEADERS
        .iter()
        .filter_map(|name| headers.get(*name))
        .filter_map(|value| value.to_str().ok())
        .filter_map(|value| value.split(',').next())
        .map(str::trim)
        .find(|value| !value.is_empty())
        .map(str::to_string)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

pub async fn rate_limit(
    State(limiter): State<RateLimiter>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let client = client_ip(request.headers(), peer);
    let path = request.uri().path().to_string();

    match limiter.check(&client, &path) {
        RateDecision::Allowed { limit, remaining } => {
            let mut response = next.run(request).await;
            let headers = response.headers_mut();
            headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(limit));
            headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(remaining));
            headers.insert(
                X_RATELIMIT_RESET,
                HeaderValue::from(limiter.policy().window.as_secs()),
            );
            response
        }
        RateDecision::Limited { limit, retry_after } => {
            metrics::counter!(RATE_LIMITED_METRIC).increment(1);
            let secs = retry_after.as_secs().max(1);
            let body = json!({
                "error": "Rate limit exceeded",
                "message": format!("Too many requests. Limit: {limit} requests per minute"),
                "retry_after": format!("{secs} seconds"),
            });
            let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
            let headers = response.headers_mut();
            headers.insert(RETRY_AFTER, HeaderValue::from(secs));
            headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(limit));
            headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(0u32));
            headers.insert(X_RATELIMIT_RESET, HeaderValue::from(secs));
            ErrorReport::from_message(
                SOURCE,
                StatusCode::TOO_MANY_REQUESTS,
                format!("client {client} exceeded {limit} requests on {path}"),
            )
            .attach(&mut response);
            response
        }
        RateDecision::Banned { retry_after } => {
            metrics::counter!(RATE_LIMITED_METRIC).increment(1);
            let secs = retry_after.as_secs().max(1);
            let body = json!({
                "error": "Too many requests",
                "message": "Your IP has been temporarily blocked due to excessive requests",
                "retry_after": format!("{} minutes", secs.div_ceil(60)),
            });
            let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(secs));
            ErrorReport::from_message(
                SOURCE,
                StatusCode::TOO_MANY_REQUESTS,
                format!("client {client} is banned"),
            )
            .attach(&mut response);
            response
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(per_minute: u32, burst: u32, threshold: u32) -> RateLimitPolicy {
        RateLimitPolicy {
            per_minute,
            burst,
            violation_threshold: threshold,
            ..RateLimitPolicy::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn allows_until_limit_then_rejects() {
        let limiter = RateLimiter::new(policy(3, 100, 10));

        for expected in [2, 1, 0] {
            assert_eq!(
                limiter.check("1.2.3.4", "/api/debates"),
                RateDecision::Allowed {
                    limit: 3,
                    remaining: expected
                }
            );
        }
        assert!(matches!(
            limiter.check("1.2.3.4", "/api/debates"),
            RateDecision::Limited { limit: 3, .. }
        ));
        // other clients are unaffected
        assert!(matches!(
            limiter.check("5.6.7.8", "/api/debates"),
            RateDecision::Allowed { .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn window_slides() {
        let limiter = RateLimiter::new(policy(1, 100, 10));
        assert!(matches!(
            limiter.check("ip", "/"),
            RateDecision::Allowed { .. }
        ));
        assert!(matches!(
            limiter.check("ip", "/"),
            RateDecision::Limited { .. }
        ));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(matches!(
            limiter.check("ip", "/"),
            RateDecision::Allowed { .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn burst_ceiling_applies_within_short_window() {
        let limiter = RateLimiter::new(policy(100, 2, 10));
        limiter.check("ip", "/");
        limiter.check("ip", "/");

        assert_eq!(
            limiter.check("ip", "/"),
            RateDecision::Limited {
                limit: 100,
                retry_after: Duration::from_secs(10)
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_violations_ban_the_client() {
        let limiter = RateLimiter::new(policy(1, 100, 2));
        limiter.check("ip", "/");
        limiter.check("ip", "/");
        limiter.check("ip", "/");

        assert!(matches!(
            limiter.check("ip", "/"),
            RateDecision::Banned { .. }
        ));
        assert!(limiter.is_banned("ip"));

        tokio::time::advance(Duration::from_secs(601)).await;
        assert!(!limiter.is_banned("ip"));
        assert!(matches!(
            limiter.check("ip", "/"),
            RateDecision::Allowed { .. }
        ));
    }

    #[test]
    fn path_limits_match_whole_segments() {
        let limiter = RateLimiter::new(RateLimitPolicy::default());
        assert_eq!(limiter.limit_for("/api/extraction"), 10);
        assert_eq!(limiter.limit_for("/api/extraction/42"), 10);
        assert_eq!(limiter.limit_for("/api/extractions"), 100);
        assert_eq!(limiter.limit_for("/health/detailed"), 200);
        assert_eq!(limiter.limit_for("/api/debats"), 60);
    }

    #[tokio::test(start_paused = true)]
    async fn prune_forgets_idle_clients() {
        let limiter = RateLimiter::new(RateLimitPolicy::default());
        limiter.check("a", "/");
        limiter.check("b", "/");
        assert_eq!(limiter.tracked_buckets(), 2);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(limiter.prune(), 2);
        assert_eq!(limiter.tracked_buckets(), 0);
    }

    #[test]
    fn client_ip_prefers_proxy_headers() {
        let peer: SocketAddr = "10.0.0.9:5555".parse().expect("addr");

        let mut headers = HeaderMap::new();
        assert_eq!(client_ip(&headers, Some(peer)), "10.0.0.9");

        headers.insert("x-real-ip", HeaderValue::from_static("7.7.7.7"));
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("1.1.1.1, 2.2.2.2"),
        );
        assert_eq!(client_ip(&headers, Some(peer)), "1.1.1.1");

        headers.insert("cf-connecting-ip", HeaderValue::from_static("9.9.9.9"));
        assert_eq!(client_ip(&headers, Some(peer)), "9.9.9.9");

        assert_eq!(client_ip(&HeaderMap::new(), None), "unknown");
    }
}
