//! HTTP surface for probes, Prometheus scraping and operator stats

use crate::metrics::collector::MetricsCollector;
use crate::service::app::AppState;
use crate::service::health::{HealthCheck, HealthStatus};
use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info};

const SERVICE_NAME: &str = "mmf";

#[derive(Debug, Clone)]
pub struct HealthServerConfig {
    pub port: u16,
    /// Interface to bind; "0.0.0.0" listens everywhere
    pub host: String,
}

impl Default for HealthServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            host: "0.0.0.0".to_string(),
        }
    }
}

impl HealthServerConfig {
    fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid health server address {}:{}", self.host, self.port))
    }
}

/// What every handler can see
#[derive(Clone)]
pub struct HealthServerState {
    pub metrics_collector: Arc<MetricsCollector>,
    /// Absent until the service is wired; probes then answer 503
    pub app_state: Option<Arc<AppState>>,
}

pub struct HealthServer {
    config: HealthServerConfig,
    state: HealthServerState,
    stop_tx: watch::Sender<bool>,
}

impl HealthServer {
    pub fn new(config: HealthServerConfig, metrics_collector: Arc<MetricsCollector>) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            config,
            state: HealthServerState {
                metrics_collector,
                app_state: None,
            },
            stop_tx,
        }
    }

    pub fn with_app_state(mut self, app_state: Arc<AppState>) -> Self {
        self.state.app_state = Some(app_state);
        self
    }

    /// Serve until `stop` is called
    pub async fn start(&self) -> Result<()> {
        let addr = self.config.bind_addr()?;
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind health server to {}", addr))?;
        info!("Serving probes and metrics on http://{}", addr);

        let mut stop_rx = self.stop_tx.subscribe();
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                while !*stop_rx.borrow_and_update() {
                    if stop_rx.changed().await.is_err() {
                        break;
                    }
                }
            })
            .await?;

        info!("Health server on {} stopped", addr);
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        self.stop_tx.send_replace(true);
        Ok(())
    }

    fn router(&self) -> Router {
        Router::new()
            .route("/", get(index))
            .route("/health", get(health))
            .route("/ready", get(|state: State<HealthServerState>| probe(state, Probe::Readiness)))
            .route("/alive", get(|state: State<HealthServerState>| probe(state, Probe::Liveness)))
            .route("/metrics", get(metrics))
            .route("/stats", get(stats))
            .with_state(self.state.clone())
    }
}

#[derive(Debug, Clone, Copy)]
enum Probe {
    Readiness,
    Liveness,
}

fn not_initialized() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({
            "service": SERVICE_NAME,
            "status": HealthStatus::Unhealthy,
            "error": "Service not initialized",
        })),
    )
        .into_response()
}

fn status_code(status: HealthStatus) -> StatusCode {
    match status {
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
    }
}

async fn index() -> Json<Value> {
    Json(json!({
        "service": SERVICE_NAME,
        "version": crate::VERSION,
        "endpoints": ["/health", "/ready", "/alive", "/metrics", "/stats"],
    }))
}

async fn probe(State(state): State<HealthServerState>, kind: Probe) -> Response {
    let Some(app_state) = state.app_state else {
        return not_initialized();
    };
    debug!("{:?} probe", kind);

    let outcome = match kind {
        Probe::Readiness => HealthCheck::readiness_check(app_state).await,
        Probe::Liveness => HealthCheck::liveness_check(app_state).await,
    };
    let status = outcome.unwrap_or_else(|e| {
        error!("{:?} probe failed: {}", kind, e);
        HealthStatus::Unhealthy
    });
    (status_code(status), Json(json!({ "status": status }))).into_response()
}

async fn health(State(state): State<HealthServerState>) -> Response {
    let Some(app_state) = state.app_state else {
        return not_initialized();
    };

    match HealthCheck::check(app_state).await {
        Ok(report) => (
            status_code(report.status),
            Json(json!({
                "status": report.status,
                "service": report.service,
                "version": report.version,
                "checks": report.checks,
            })),
        )
            .into_response(),
        Err(e) => {
            error!("Health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "service": SERVICE_NAME, "status": HealthStatus::Unhealthy })),
            )
                .into_response()
        }
    }
}

/// Prometheus text exposition of the service registry
async fn metrics(State(state): State<HealthServerState>) -> Response {
    let families = state.metrics_collector.registry().gather();
    let encoder = TextEncoder::new();

    match encoder.encode_to_string(&families) {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, encoder.format_type().to_string())],
            body,
        )
            .into_response(),
        Err(e) => {
            error!("Could not encode {} metric families: {}", families.len(), e);
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics unavailable").into_response()
        }
    }
}

/// Waiting players per queue and running lifecycles
async fn stats(State(state): State<HealthServerState>) -> Response {
    let Some(app_state) = state.app_state else {
        return not_initialized();
    };

    match HealthCheck::check(app_state).await {
        Ok(report) => Json(json!({
            "service": {
                "name": report.service,
                "version": report.version,
                "status": report.status,
                "uptimeSeconds": report.stats.uptime_seconds,
            },
            "queues": report.stats.waiting_by_queue,
            "players": {
                "waiting": report.stats.players_waiting,
                "connected": report.stats.connected_players,
            },
            "lifecycles": { "active": report.stats.active_lifecycles },
            "timestamp": report.timestamp,
        }))
        .into_response(),
        Err(e) => {
            error!("Stats unavailable: {}", e);
            not_initialized()
        }
    }
}
