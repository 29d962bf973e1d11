//! Health surface
//!
//! `GET /health` reports every supervised worker and answers 200 while
//! every worker is running, 503 otherwise. `GET /metrics` serves the
//! Prometheus registry.

use super::metrics;
use crate::{Result, SyncFlowError};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::net::TcpListener;

/// Lifecycle state of a supervised worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    /// Launched, no heartbeat yet
    Starting,
    Running,
    /// Failed; may be waiting for a restart
    Error,
    Stopped,
}

impl WorkerStatus {
    pub fn is_up(self) -> bool {
        matches!(self, WorkerStatus::Starting | WorkerStatus::Running)
    }
}

/// One worker as shown on the health endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerHealth {
    pub name: String,
    pub status: WorkerStatus,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub pid: Option<u32>,
    pub restarts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

/// Body of `GET /health`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub workers: Vec<WorkerHealth>,
}

impl HealthReport {
    /// Healthy iff there is at least one worker and all of them are running
    pub fn from_workers(workers: Vec<WorkerHealth>) -> Self {
        let all_running =
            !workers.is_empty() && workers.iter().all(|w| w.status == WorkerStatus::Running);
        let status = if all_running {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        };
        Self { status, workers }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }

    pub fn worker(&self, name: &str) -> Option<&WorkerHealth> {
        self.workers.iter().find(|w| w.name == name)
    }
}

impl Default for HealthReport {
    fn default() -> Self {
        Self::from_workers(Vec::new())
    }
}

/// Health report shared between the supervisor loop and the HTTP server
#[derive(Debug, Clone, Default)]
pub struct SharedHealth(Arc<RwLock<HealthReport>>);

impl SharedHealth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> HealthReport {
        self.0.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn publish(&self, report: HealthReport) {
        metrics::set_health_status(report.is_healthy());
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = report;
    }
}

/// Build the health router
pub fn router(state: SharedHealth) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_text))
        .with_state(state)
}

/// Serve the health router until the task is dropped
pub async fn serve(addr: &str, state: SharedHealth) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| SyncFlowError::Supervisor(format!("Failed to bind {}: {}", addr, e)))?;

    tracing::info!(addr = addr, "Health endpoint listening");

    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn health(State(state): State<SharedHealth>) -> impl IntoResponse {
    let report = state.snapshot();
    let code = if report.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(report))
}

async fn metrics_text() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::encode_metrics(),
    )
}
