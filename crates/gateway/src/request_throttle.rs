use std::{
    net::{IpAddr, SocketAddr},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use {
    axum::{
        extract::{ConnectInfo, State},
        http::HeaderMap,
        middleware::Next,
        response::{IntoResponse, Response},
    },
    dashmap::{DashMap, mapref::entry::Entry},
    tracing::warn,
    wagate_config::RateLimitConfig,
};

use crate::{error::ApiError, state::AppState};

const CLEANUP_EVERY_REQUESTS: u64 = 512;

/// Fixed-window request counter keyed by client address.
#[derive(Clone)]
pub struct RequestThrottle {
    limit: RateLimit,
    buckets: Arc<DashMap<IpAddr, WindowState>>,
    requests_seen: Arc<AtomicU64>,
}

#[derive(Debug, Clone, Copy)]
struct WindowState {
    started_at: Instant,
    count: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimit {
    pub max_requests: usize,
    pub window: Duration,
}

impl From<&RateLimitConfig> for RateLimit {
    fn from(cfg: &RateLimitConfig) -> Self {
        Self {
            max_requests: cfg.max_requests,
            window: cfg.window(),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum ThrottleDecision {
    Allowed,
    Denied { retry_after: Duration },
}

impl RequestThrottle {
    #[must_use]
    pub fn new(limit: RateLimit) -> Self {
        Self {
            limit,
            buckets: Arc::new(DashMap::new()),
            requests_seen: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn check(&self, ip: IpAddr) -> ThrottleDecision {
        self.check_at(ip, Instant::now())
    }

    fn check_at(&self, ip: IpAddr, now: Instant) -> ThrottleDecision {
        let limit = self.limit;
        if limit.max_requests == 0 {
            return ThrottleDecision::Denied {
                retry_after: limit.window.max(Duration::from_secs(1)),
            };
        }

        let decision = match self.buckets.entry(ip) {
            Entry::Occupied(mut occupied) => {
                let state = occupied.get_mut();
                let elapsed = now.duration_since(state.started_at);
                if elapsed >= limit.window {
                    state.started_at = now;
                    state.count = 1;
                    ThrottleDecision::Allowed
                } else if state.count < limit.max_requests {
                    state.count += 1;
                    ThrottleDecision::Allowed
                } else {
                    ThrottleDecision::Denied {
                        retry_after: limit.window.saturating_sub(elapsed),
                    }
                }
            },
            Entry::Vacant(vacant) => {
                vacant.insert(WindowState {
                    started_at: now,
                    count: 1,
                });
                ThrottleDecision::Allowed
            },
        };

        self.cleanup_if_needed(now);
        decision
    }

    fn cleanup_if_needed(&self, now: Instant) {
        let seen = self.requests_seen.fetch_add(1, Ordering::Relaxed) + 1;
        if !seen.is_multiple_of(CLEANUP_EVERY_REQUESTS) {
            return;
        }
        let window = self.limit.window;
        self.buckets
            .retain(|_, state| now.duration_since(state.started_at) < window);
    }
}

pub async fn throttle_gate(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    let client_ip = resolve_client_ip(request.headers(), addr, state.trust_proxy);
    match state.throttle.check(client_ip) {
        ThrottleDecision::Allowed => next.run(request).await,
        ThrottleDecision::Denied { retry_after } => {
            warn!(
                ip = %client_ip,
                path = request.uri().path(),
                retry_after_secs = retry_after.as_secs(),
                "rate limit exceeded"
            );
            ApiError::RateLimited { retry_after }.into_response()
        },
    }
}

fn resolve_client_ip(headers: &HeaderMap, addr: SocketAddr, trust_proxy: bool) -> IpAddr {
    if trust_proxy && let Some(ip) = extract_forwarded_ip(headers) {
        return ip;
    }
    addr.ip()
}

fn extract_forwarded_ip(headers: &HeaderMap) -> Option<IpAddr> {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

    if let Some(xff) = header("x-forwarded-for")
        && let Some(ip) = xff
            .split(',')
            .find_map(|candidate| parse_ip(candidate.trim()))
    {
        return Some(ip);
    }

    ["x-real-ip", "cf-connecting-ip"]
        .into_iter()
        .find_map(|name| header(name).and_then(|v| parse_ip(v.trim())))
}

fn parse_ip(value: &str) -> Option<IpAddr> {
    if value.is_empty() {
        return None;
    }
    if let Ok(ip) = value.parse::<IpAddr>() {
        return Some(ip);
    }
    if let Ok(addr) = value.parse::<SocketAddr>() {
        return Some(addr.ip());
    }
    None
}
