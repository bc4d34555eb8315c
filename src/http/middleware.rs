//! Axum middleware enforcing a segment's rate limit.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde::Serialize;
use tracing::{debug, warn};

use super::identity::{ClientIdentity, IdentityResolver, IdentitySource};
use crate::ratelimit::{RateLimitStatus, RateLimiter};

/// Machine-readable code carried by every 429 body.
pub const RATE_LIMIT_EXCEEDED: &str = "rate_limit_exceeded";

const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Body of a 429 response.
#[derive(Debug, Serialize)]
pub struct RateLimitExceededBody {
    /// Human readable message
    pub error: &'static str,
    /// Stable error code
    pub code: &'static str,
    /// Seconds until the window resets
    pub retry_after: u64,
}

/// Middleware state: the limiter for one segment and how to identify callers.
#[derive(Debug, Clone)]
pub struct RateLimitLayer {
    limiter: Arc<RateLimiter>,
    identity: Arc<IdentityResolver>,
}

impl RateLimitLayer {
    /// Create a layer for `limiter`.
    pub fn new(limiter: Arc<RateLimiter>, identity: IdentityResolver) -> Self {
        Self {
            limiter,
            identity: Arc::new(identity),
        }
    }

    /// The limiter this layer enforces.
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Guard every route currently in `router` with this layer.
    pub fn protect<S>(self, router: Router<S>) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        router.route_layer(middleware::from_fn_with_state(self, enforce_rate_limit))
    }
}

/// Admit or refuse the request before it reaches the handler.
///
/// A [`ClientIdentity`] already present in the request extensions takes
/// precedence over the configured [`IdentityResolver`].
///
/// Refused requests get a `429 Too Many Requests` JSON response and the inner
/// handler is never called. Admitted responses carry `X-RateLimit-*` headers.
pub async fn enforce_rate_limit(
    State(layer): State<RateLimitLayer>,
    request: Request,
    next: Next,
) -> Response {
    let identity = match request.extensions().get::<ClientIdentity>() {
        Some(supplied) => supplied.clone(),
        None => {
            let peer = request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip());
            layer.identity.resolve(request.headers(), peer)
        }
    };

    let status = layer.limiter.check(&identity.value);

    if !status.decision.is_admit() {
        if identity.source == IdentitySource::Fallback {
            warn!(
                segment = %layer.limiter.segment(),
                "Shared unknown-client bucket exhausted"
            );
        } else {
            debug!(
                segment = %layer.limiter.segment(),
                client = %identity.value,
                "Request rejected by rate limiter"
            );
        }
        return too_many_requests(&status);
    }

    let mut response = next.run(request).await;
    apply_rate_limit_headers(response.headers_mut(), &status);
    response
}

/// Build the 429 response for a rejected request.
pub fn too_many_requests(status: &RateLimitStatus) -> Response {
    let retry_after = retry_after_secs(status);
    let body = RateLimitExceededBody {
        error: "Too many requests",
        code: RATE_LIMIT_EXCEEDED,
        retry_after,
    };

    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    let headers = response.headers_mut();
    apply_rate_limit_headers(headers, status);
    headers.insert(axum::http::header::RETRY_AFTER, HeaderValue::from(retry_after));
    response
}

fn apply_rate_limit_headers(headers: &mut HeaderMap, status: &RateLimitStatus) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(status.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(status.remaining));
    headers.insert(X_RATELIMIT_RESET, HeaderValue::from(status.reset_at_ms));
}

/// Whole seconds until reset, rounded up and never zero.
fn retry_after_secs(status: &RateLimitStatus) -> u64 {
    let millis = u64::try_from(status.retry_after.as_millis()).unwrap_or(u64::MAX);
    millis.div_ceil(1000).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::{CounterStore, ManualClock, RateLimitPolicy};
    use axum::body::Body;
    use axum::routing::get;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tower::ServiceExt;

    struct Fixture {
        router: Router,
        calls: Arc<AtomicUsize>,
        clock: Arc<ManualClock>,
    }

    fn fixture(max_hits: u64, identity: IdentityResolver) -> Fixture {
        let clock = Arc::new(ManualClock::new(0));
        let policy = RateLimitPolicy::new("login", max_hits, Duration::from_millis(1000)).unwrap();
        let limiter =
            Arc::new(RateLimiter::with_clock(policy, CounterStore::new(), clock.clone()).unwrap());

        let calls = Arc::new(AtomicUsize::new(0));
        let handler_calls = Arc::clone(&calls);
        let routes = Router::new().route(
            "/login",
            get(move || {
                let calls = Arc::clone(&handler_calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    "welcome"
                }
            }),
        );

        Fixture {
            router: RateLimitLayer::new(limiter, identity).protect(routes),
            calls,
            clock,
        }
    }

    fn request_from(peer: &str, headers: &[(&'static str, &'static str)]) -> Request {
        let mut builder = axum::http::Request::builder().uri("/login");
        for &(name, value) in headers {
            builder = builder.header(name, value);
        }
        let mut request = builder.body(Body::empty()).unwrap();
        let addr: SocketAddr = format!("{}:40000", peer).parse().unwrap();
        request.extensions_mut().insert(ConnectInfo(addr));
        request
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_admitted_requests_reach_handler() {
        let fx = fixture(2, IdentityResolver::direct());

        let response = fx.router.clone().oneshot(request_from("1.2.3.4", &[])).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-ratelimit-limit"], "2");
        assert_eq!(response.headers()["x-ratelimit-remaining"], "1");
        assert_eq!(response.headers()["x-ratelimit-reset"], "1000");
        assert_eq!(fx.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rejected_request_gets_429_without_handler() {
        let fx = fixture(2, IdentityResolver::direct());

        for _ in 0..2 {
            let response = fx.router.clone().oneshot(request_from("1.2.3.4", &[])).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        fx.clock.set(250);
        let response = fx.router.clone().oneshot(request_from("1.2.3.4", &[])).await.unwrap();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()["retry-after"], "1");
        assert_eq!(response.headers()["x-ratelimit-remaining"], "0");
        assert_eq!(fx.calls.load(Ordering::SeqCst), 2);

        let body = body_json(response).await;
        assert_eq!(body["error"], "Too many requests");
        assert_eq!(body["code"], RATE_LIMIT_EXCEEDED);
        assert_eq!(body["retry_after"], 1);
    }

    #[tokio::test]
    async fn test_window_expiry_readmits() {
        let fx = fixture(1, IdentityResolver::direct());

        fx.router.clone().oneshot(request_from("1.2.3.4", &[])).await.unwrap();
        let response = fx.router.clone().oneshot(request_from("1.2.3.4", &[])).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        fx.clock.set(1001);
        let response = fx.router.clone().oneshot(request_from("1.2.3.4", &[])).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_peers_limited_independently() {
        let fx = fixture(1, IdentityResolver::direct());

        fx.router.clone().oneshot(request_from("1.2.3.4", &[])).await.unwrap();
        let response = fx.router.clone().oneshot(request_from("5.6.7.8", &[])).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_spoofed_header_does_not_bypass_quota() {
        let fx = fixture(1, IdentityResolver::direct());

        fx.router
            .clone()
            .oneshot(request_from("1.2.3.4", &[("x-forwarded-for", "9.9.9.1")]))
            .await
            .unwrap();
        let response = fx
            .router
            .clone()
            .oneshot(request_from("1.2.3.4", &[("x-forwarded-for", "9.9.9.2")]))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_trusted_proxy_clients_limited_independently() {
        let proxy = "10.0.0.1".parse().unwrap();
        let fx = fixture(1, IdentityResolver::new(vec![proxy]));

        let first = fx
            .router
            .clone()
            .oneshot(request_from("10.0.0.1", &[("x-forwarded-for", "9.9.9.1")]))
            .await
            .unwrap();
        let second = fx
            .router
            .clone()
            .oneshot(request_from("10.0.0.1", &[("x-forwarded-for", "9.9.9.2")]))
            .await
            .unwrap();
        let repeat = fx
            .router
            .clone()
            .oneshot(request_from("10.0.0.1", &[("x-forwarded-for", "9.9.9.1")]))
            .await
            .unwrap();

        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(second.status(), StatusCode::OK);
        assert_eq!(repeat.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_missing_peer_shares_unknown_bucket() {
        let fx = fixture(1, IdentityResolver::direct());
        let anonymous = || axum::http::Request::builder().uri("/login").body(Body::empty()).unwrap();

        let first = fx.router.clone().oneshot(anonymous()).await.unwrap();
        let second = fx.router.clone().oneshot(anonymous()).await.unwrap();

        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_supplied_identity_overrides_peer() {
        let fx = fixture(1, IdentityResolver::direct());
        let as_user = |user: &str| {
            let mut request = request_from("1.2.3.4", &[]);
            request.extensions_mut().insert(ClientIdentity::supplied(user));
            request
        };

        let alice = fx.router.clone().oneshot(as_user("user-alice")).await.unwrap();
        let bob = fx.router.clone().oneshot(as_user("user-bob")).await.unwrap();
        let alice_again = fx.router.clone().oneshot(as_user("user-alice")).await.unwrap();
        let anonymous = fx.router.clone().oneshot(request_from("1.2.3.4", &[])).await.unwrap();

        assert_eq!(alice.status(), StatusCode::OK);
        assert_eq!(bob.status(), StatusCode::OK);
        assert_eq!(alice_again.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(anonymous.status(), StatusCode::OK);
        assert_eq!(fx.calls.load(Ordering::SeqCst), 3);
    }
}
