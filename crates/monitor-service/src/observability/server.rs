//! HTTP server for the health router and the Prometheus `/metrics` page.
//!
//! The listener is bound before the server task is spawned so a bad
//! address or a port in use fails startup instead of a background task.

use super::health::{health_router, HealthState};
use crate::config::MonitorConfig;
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// A running health server.
#[derive(Debug)]
pub struct HealthServer {
    /// Address actually bound (resolves port 0).
    pub local_addr: SocketAddr,
    pub task: JoinHandle<()>,
}

/// Bind `config.health_bind_address` and serve `/health`, `/ready` and,
/// when a Prometheus handle is given, `/metrics`.
///
/// The server stops gracefully once `cancel_token` is cancelled.
///
/// # Errors
///
/// Returns an error if the address does not parse or cannot be bound.
pub async fn serve_health(
    config: &MonitorConfig,
    health_state: Arc<HealthState>,
    prometheus: Option<PrometheusHandle>,
    cancel_token: CancellationToken,
) -> Result<HealthServer, String> {
    let addr: SocketAddr = config.health_bind_address.parse().map_err(|e| {
        error!(
            target: "monitor.observability",
            error = %e,
            addr = %config.health_bind_address,
            "Invalid health bind address"
        );
        format!("Invalid health bind address: {e}")
    })?;

    let mut app = health_router(health_state);
    if let Some(handle) = prometheus {
        app = app.merge(Router::new().route(
            "/metrics",
            axum::routing::get(move || {
                let handle = handle.clone();
                async move { handle.render() }
            }),
        ));
    }

    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!(
            target: "monitor.observability",
            error = %e,
            addr = %addr,
            "Failed to bind health server"
        );
        format!("Failed to bind health server to {addr}: {e}")
    })?;
    let local_addr = listener
        .local_addr()
        .map_err(|e| format!("Failed to read health server address: {e}"))?;

    let task = tokio::spawn(async move {
        info!(target: "monitor.observability", addr = %local_addr, "Health server starting");
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            cancel_token.cancelled().await;
            info!(target: "monitor.observability", "Health server shutting down");
        });
        if let Err(e) = server.await {
            error!(target: "monitor.observability", error = %e, "Health server failed");
        }
    });

    Ok(HealthServer { local_addr, task })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    fn local_config() -> MonitorConfig {
        MonitorConfig {
            health_bind_address: "127.0.0.1:0".to_string(),
            ..MonitorConfig::default()
        }
    }

    async fn http_get(addr: SocketAddr, path: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.expect("connect");
        let request =
            format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn test_serves_readiness_on_configured_address() {
        let state = Arc::new(HealthState::new());
        let cancel_token = CancellationToken::new();
        let server = serve_health(
            &local_config(),
            Arc::clone(&state),
            None,
            cancel_token.clone(),
        )
        .await
        .expect("server should bind");

        let response = http_get(server.local_addr, "/ready").await;
        assert!(response.starts_with("HTTP/1.1 503"), "{response}");

        state.set_ready();
        let response = http_get(server.local_addr, "/ready").await;
        assert!(response.starts_with("HTTP/1.1 200"), "{response}");
        assert!(response.ends_with(r#"{"status":"ready"}"#), "{response}");

        // No Prometheus handle, no metrics page
        let response = http_get(server.local_addr, "/metrics").await;
        assert!(response.starts_with("HTTP/1.1 404"), "{response}");

        cancel_token.cancel();
        server.task.await.unwrap();
    }

    #[tokio::test]
    async fn test_metrics_page_served_with_prometheus_handle() {
        let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
        let cancel_token = CancellationToken::new();
        let server = serve_health(
            &local_config(),
            Arc::new(HealthState::new()),
            Some(recorder.handle()),
            cancel_token.clone(),
        )
        .await
        .unwrap();

        let response = http_get(server.local_addr, "/metrics").await;
        assert!(response.starts_with("HTTP/1.1 200"), "{response}");

        cancel_token.cancel();
        server.task.await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_bind_address_rejected() {
        let config = MonitorConfig {
            health_bind_address: "not-an-address".to_string(),
            ..MonitorConfig::default()
        };
        let result = serve_health(
            &config,
            Arc::new(HealthState::new()),
            None,
            CancellationToken::new(),
        )
        .await;
        assert!(matches!(result, Err(e) if e.contains("Invalid health bind address")));
    }

    #[tokio::test]
    async fn test_port_in_use_rejected() {
        let cancel_token = CancellationToken::new();
        let first = serve_health(
            &local_config(),
            Arc::new(HealthState::new()),
            None,
            cancel_token.clone(),
        )
        .await
        .unwrap();

        let taken = MonitorConfig {
            health_bind_address: first.local_addr.to_string(),
            ..MonitorConfig::default()
        };
        let result = serve_health(
            &taken,
            Arc::new(HealthState::new()),
            None,
            CancellationToken::new(),
        )
        .await;
        assert!(matches!(result, Err(e) if e.contains("Failed to bind")));

        cancel_token.cancel();
        first.task.await.unwrap();
    }
}
