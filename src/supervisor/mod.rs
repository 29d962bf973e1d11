//! Worker supervisor
//!
//! Runs one isolated worker process per tenant and keeps it alive.
//!
//! # Architecture
//!
//! - **daemon**: Event loop over worker events, staleness checks and restart timers
//! - **process**: Launching workers and signalling them
//! - **protocol**: Line-delimited JSON messages workers write to stdout
//! - **health**: `/health` and `/metrics` endpoints
//! - **metrics**: Prometheus counters and gauges
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use syncflow::supervisor::{ProcessLauncher, Supervisor, SupervisorConfig};
//!
//! let config = SupervisorConfig::new("/etc/syncflow/tenants")
//!     .with_health_addr(Some("0.0.0.0:9464".to_string()));
//! let launcher = Arc::new(ProcessLauncher::current_exe()?);
//! let mut supervisor = Supervisor::from_config_dir(config, launcher)?;
//! supervisor.run().await?;
//! ```

mod daemon;
pub mod health;
pub mod metrics;
mod process;
pub mod protocol;

pub use daemon::{
    Supervisor, SupervisorConfig, DEFAULT_HEALTH_ADDR, HEARTBEAT_TIMEOUT, MAX_RESTARTS,
    MONITOR_INTERVAL, RESTART_BACKOFF, SHUTDOWN_GRACE,
};
pub use health::{HealthReport, HealthStatus, SharedHealth, WorkerHealth, WorkerStatus};
pub use process::{
    Envelope, EventSender, ProcessLauncher, WorkerEvent, WorkerHandle, WorkerLauncher, WorkerSpec,
};
pub use protocol::{WorkerMessage, EXIT_CONFIG, EXIT_OK};
