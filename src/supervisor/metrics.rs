//! Prometheus metrics for the supervisor
//!
//! Worker liveness comes from the supervisor's own bookkeeping; sync
//! counters come from the cycle reports the workers send over stdout.

use crate::sync::CycleReport;
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram_vec, CounterVec,
    Encoder, Gauge, GaugeVec, HistogramVec, TextEncoder,
};

lazy_static! {
    /// Counter: worker restarts per tenant
    pub static ref WORKER_RESTARTS: CounterVec = register_counter_vec!(
        "syncflow_worker_restarts_total",
        "Automatic worker restarts by tenant",
        &["tenant"]
    )
    .expect("Failed to create worker_restarts metric");

    /// Gauge: worker running (1) or not (0)
    pub static ref WORKER_UP: GaugeVec = register_gauge_vec!(
        "syncflow_worker_up",
        "Whether the tenant's worker is running",
        &["tenant"]
    )
    .expect("Failed to create worker_up metric");

    /// Counter: heartbeats received per tenant
    pub static ref HEARTBEATS: CounterVec = register_counter_vec!(
        "syncflow_heartbeats_total",
        "Heartbeats received from workers",
        &["tenant"]
    )
    .expect("Failed to create heartbeats metric");

    /// Gauge: supervisor health status (1 = healthy, 0 = degraded)
    pub static ref HEALTH_STATUS: Gauge = register_gauge!(
        "syncflow_health_status",
        "Supervisor health status (1 = healthy, 0 = degraded)"
    )
    .expect("Failed to create health_status metric");

    /// Counter: sync cycles by tenant and outcome
    pub static ref SYNC_CYCLES: CounterVec = register_counter_vec!(
        "syncflow_sync_cycles_total",
        "Completed sync cycles by tenant and status",
        &["tenant", "status"]
    )
    .expect("Failed to create sync_cycles metric");

    /// Counter: tracker writes by tenant and action
    pub static ref SYNC_ACTIONS: CounterVec = register_counter_vec!(
        "syncflow_sync_actions_total",
        "Actions performed by sync cycles",
        &["tenant", "action"]
    )
    .expect("Failed to create sync_actions metric");

    /// Histogram: sync cycle duration per tenant (seconds)
    pub static ref SYNC_DURATION: HistogramVec = register_histogram_vec!(
        "syncflow_sync_duration_seconds",
        "Duration of sync cycles",
        &["tenant"],
        vec![0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]
    )
    .expect("Failed to create sync_duration metric");
}

/// Record an automatic restart
pub fn record_restart(tenant: &str) {
    WORKER_RESTARTS.with_label_values(&[tenant]).inc();
}

/// Set whether a worker is up
pub fn set_worker_up(tenant: &str, up: bool) {
    WORKER_UP
        .with_label_values(&[tenant])
        .set(if up { 1.0 } else { 0.0 });
}

/// Record a heartbeat
pub fn record_heartbeat(tenant: &str) {
    HEARTBEATS.with_label_values(&[tenant]).inc();
}

/// Set health status
pub fn set_health_status(healthy: bool) {
    HEALTH_STATUS.set(if healthy { 1.0 } else { 0.0 });
}

/// Record a finished sync cycle
pub fn record_cycle(report: &CycleReport) {
    let tenant = report.tenant.as_str();
    let status = if report.is_clean() { "success" } else { "partial" };
    SYNC_CYCLES.with_label_values(&[tenant, status]).inc();

    for (action, count) in [
        ("create_issue", report.issues_created),
        ("sync_status", report.statuses_synced),
        ("comment", report.comments_posted),
        ("attachment", report.attachments_copied),
    ] {
        if count > 0 {
            SYNC_ACTIONS
                .with_label_values(&[tenant, action])
                .inc_by(count as f64);
        }
    }

    SYNC_DURATION
        .with_label_values(&[tenant])
        .observe(report.duration_ms as f64 / 1000.0);
}

/// Encode all metrics as Prometheus text format
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
