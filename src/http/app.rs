//! Routes served by the bundled gateway binary.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;

use super::identity::IdentityResolver;
use super::middleware::RateLimitLayer;
use crate::ratelimit::{CounterStore, SegmentTable};

#[derive(Clone)]
struct AppState {
    store: CounterStore,
    segments: Arc<SegmentTable>,
}

#[derive(Debug, Serialize)]
struct SegmentStats {
    segment: String,
    max_hits: u64,
    window_ms: u64,
    active_clients: usize,
}

#[derive(Debug, Serialize)]
struct Stats {
    records: usize,
    segments: Vec<SegmentStats>,
}

/// Build the gateway router.
///
/// - `GET /health`: unlimited liveness probe
/// - `GET /stats`: active counter records per segment
/// - `GET|POST /api/{segment}`: one route per configured segment, guarded by
///   that segment's limiter
pub fn build_router(
    segments: Arc<SegmentTable>,
    store: CounterStore,
    identity: IdentityResolver,
) -> Router {
    let mut router: Router<AppState> = Router::new()
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler));

    for (segment, limiter) in segments.iter() {
        let name = segment.to_string();
        let handler = move || {
            let name = name.clone();
            async move { Json(json!({ "status": "accepted", "segment": name })) }
        };

        let route: Router<AppState> = Router::new().route(
            &format!("/api/{}", segment),
            get(handler.clone()).post(handler),
        );
        let layer = RateLimitLayer::new(Arc::clone(limiter), identity.clone());
        router = router.merge(layer.protect(route));
    }

    router.with_state(AppState { store, segments })
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn stats_handler(State(state): State<AppState>) -> Json<Stats> {
    let segments = state
        .segments
        .iter()
        .map(|(segment, limiter)| SegmentStats {
            segment: segment.to_string(),
            max_hits: limiter.policy().max_hits,
            window_ms: limiter.policy().window_ms,
            active_clients: limiter.active_clients(),
        })
        .collect();

    Json(Stats {
        records: state.store.len(),
        segments,
    })
}
