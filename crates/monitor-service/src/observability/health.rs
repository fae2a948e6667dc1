//! Health endpoints for the monitor.
//!
//! The embedding host mounts this router next to its own:
//! - `GET /health` - Liveness probe, 200 while the process runs
//! - `GET /ready` - Readiness probe, 200 while the controller accepts views
//!
//! Readiness starts false, turns true when the controller actor is running
//! and drops back as soon as shutdown begins. A draining monitor stays
//! live so in-flight views can finish.

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Readiness flag shared by the controller and the health router.
#[derive(Debug, Default)]
pub struct HealthState {
    accepting_views: AtomicBool,
}

impl HealthState {
    /// Not ready until the controller says so.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_ready(&self) {
        self.accepting_views.store(true, Ordering::SeqCst);
    }

    pub fn set_not_ready(&self) {
        self.accepting_views.store(false, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.accepting_views.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Serialize)]
struct ReadinessBody {
    status: &'static str,
}

/// Router with `/health` and `/ready`.
pub fn health_router(health_state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(|| async { StatusCode::OK }))
        .route("/ready", get(readiness))
        .with_state(health_state)
}

async fn readiness(State(state): State<Arc<HealthState>>) -> (StatusCode, Json<ReadinessBody>) {
    if state.is_ready() {
        (StatusCode::OK, Json(ReadinessBody { status: "ready" }))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadinessBody {
                status: "draining",
            }),
        )
    }
}
