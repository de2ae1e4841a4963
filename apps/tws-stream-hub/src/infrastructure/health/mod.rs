//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for health checks, upstream status reporting, and Prometheus
//! metrics. Used by container orchestrators, load balancers, and monitoring
//! systems.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Kubernetes liveness probe (simple OK)
//! - `GET /readyz` - Kubernetes readiness probe (checks upstream connection)
//! - `GET /metrics` - Prometheus metrics in text format

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::domain::resource::StreamState;
use crate::infrastructure::facade::StreamHub;
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy", "degraded", or "unhealthy".
    pub status: HealthStatus,
    /// Hub version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Upstream session status.
    pub upstream: UpstreamStatus,
    /// Stream statistics.
    pub streams: StreamsStatus,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Upstream connected, no failed streams.
    Healthy,
    /// Upstream connected but some streams have failed.
    Degraded,
    /// Upstream disconnected.
    Unhealthy,
}

/// Upstream session status.
#[derive(Debug, Clone, Serialize)]
pub struct UpstreamStatus {
    /// Whether the upstream session is connected.
    pub connected: bool,
}

/// Stream statistics.
#[derive(Debug, Clone, Serialize)]
pub struct StreamsStatus {
    /// Total registered streams.
    pub total: usize,
    /// Streams currently consuming events.
    pub running: usize,
    /// Streams latched in a failed state.
    pub failed: usize,
    /// Registered stream count per family.
    pub by_family: BTreeMap<String, usize>,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    hub: Arc<StreamHub>,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(version: String, hub: Arc<StreamHub>) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            hub,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let app = router(self.state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "health server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("health server stopped");
        Ok(())
    }
}

fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    if state.hub.is_connected() {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let summaries = state.hub.summaries();
    let connected = state.hub.is_connected();

    let mut running = 0usize;
    let mut failed = 0usize;
    let mut by_family: BTreeMap<String, usize> = BTreeMap::new();
    for summary in &summaries {
        match summary.state {
            StreamState::Running => running += 1,
            StreamState::Failed(_) => failed += 1,
            StreamState::Completed | StreamState::Cancelled => {}
        }
        *by_family.entry(summary.family.as_str().to_string()).or_default() += 1;
    }

    HealthResponse {
        status: determine_health_status(connected, failed),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        upstream: UpstreamStatus { connected },
        streams: StreamsStatus {
            total: summaries.len(),
            running,
            failed,
            by_family,
        },
    }
}

const fn determine_health_status(connected: bool, failed_streams: usize) -> HealthStatus {
    if !connected {
        return HealthStatus::Unhealthy;
    }
    if failed_streams > 0 {
        return HealthStatus::Degraded;
    }
    HealthStatus::Healthy
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::application::ports::{MockUpstreamSession, NotificationSink};
    use crate::domain::resource::{Family, ResourceUri};
    use crate::infrastructure::config::HubConfig;

    struct NullSink;

    impl NotificationSink for NullSink {
        fn notify(&self, _family: Family, _uri: &ResourceUri) {}
    }

    fn state_with_connection(connected: bool) -> Arc<HealthServerState> {
        let mut session = MockUpstreamSession::new();
        session.expect_is_connected().return_const(connected);
        let hub = Arc::new(StreamHub::new(
            Arc::new(session),
            Arc::new(NullSink),
            &HubConfig::default(),
        ));
        Arc::new(HealthServerState::new("0.1.0-test".to_string(), hub))
    }

    #[test]
    fn health_status_serialization() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Healthy).unwrap(),
            "\"healthy\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Degraded).unwrap(),
            "\"degraded\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Unhealthy).unwrap(),
            "\"unhealthy\""
        );
    }

    #[test]
    fn status_reflects_connection_and_failures() {
        assert_eq!(determine_health_status(true, 0), HealthStatus::Healthy);
        assert_eq!(determine_health_status(true, 2), HealthStatus::Degraded);
        assert_eq!(determine_health_status(false, 0), HealthStatus::Unhealthy);
        assert_eq!(determine_health_status(false, 2), HealthStatus::Unhealthy);
    }

    #[test]
    fn response_counts_streams() {
        let state = state_with_connection(true);
        let response = build_health_response(&state);
        assert_eq!(response.status, HealthStatus::Healthy);
        assert_eq!(response.streams.total, 0);
        assert_eq!(response.streams.failed, 0);
        assert!(response.upstream.connected);
    }

    #[tokio::test]
    async fn liveness_always_ok() {
        let app = router(state_with_connection(false));
        let response = app
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn readiness_follows_connection() {
        let ready = router(state_with_connection(true))
            .oneshot(Request::get("/readyz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(ready.status(), StatusCode::OK);

        let not_ready = router(state_with_connection(false))
            .oneshot(Request::get("/readyz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(not_ready.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn health_endpoint_reports_unhealthy_when_disconnected() {
        let app = router(state_with_connection(false));
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
