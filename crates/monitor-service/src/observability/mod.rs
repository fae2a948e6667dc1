//! Observability for the monitor: tracing setup, metrics and health.
//!
//! # Privacy by Default
//!
//! Actor loops use `#[instrument(skip_all)]` with explicit safe fields.
//! Participant and session ids appear in logs, never in metric labels, and
//! warning text and frame contents are never logged.
//!
//! # Metrics
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `monitor_views_active` | Gauge | none |
//! | `monitor_peer_links_active` | Gauge | none |
//! | `monitor_peer_links_closed_total` | Counter | `reason` |
//! | `monitor_offers_rejected_total` | Counter | none |
//! | `monitor_frames_total` | Counter | `outcome` |
//! | `monitor_warnings_total` | Counter | `outcome` |
//! | `monitor_reconcile_duration_seconds` | Histogram | none |
//! | `monitor_reconcile_partial_total` | Counter | none |
//! | `monitor_actor_panics_total` | Counter | `actor_type` |

pub mod health;
pub mod metrics;
pub mod server;

pub use health::{health_router, HealthState};
pub use metrics::init_metrics_recorder;
pub use server::{serve_health, HealthServer};

use common::config::ObservabilityConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over the configured level when set.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init_tracing(config: &ObservabilityConfig) -> Result<(), String> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .map_err(|e| format!("Invalid log filter: {e}"))?;

    let registry = tracing_subscriber::registry().with(filter);

    let result = if config.json_logs {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };

    result.map_err(|e| format!("Failed to install tracing subscriber: {e}"))
}
