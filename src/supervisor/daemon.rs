//! Supervisor daemon
//!
//! Keeps one worker per tenant alive. Workers move through
//! `starting -> running -> (error | stopped)`:
//! - A worker becomes running with its first heartbeat
//! - A worker that exits non-zero, or goes quiet for longer than the
//!   heartbeat timeout, is put in error and restarted after a backoff, up to
//!   a fixed number of restarts
//! - Exit code 78 (bad configuration) is an error that is never restarted,
//!   exit code 0 is a clean stop
//! - On shutdown every worker gets SIGTERM, then SIGKILL after a grace period

use super::health::{HealthReport, SharedHealth, WorkerHealth, WorkerStatus};
use super::metrics;
use super::process::{Envelope, WorkerEvent, WorkerHandle, WorkerLauncher, WorkerSpec};
use super::protocol::{WorkerMessage, EXIT_CONFIG, EXIT_OK};
use crate::config::load_tenants;
use crate::{Result, SyncFlowError};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, sleep_until, Instant};

/// Restarts allowed per worker before it stays in error
pub const MAX_RESTARTS: u32 = 3;

/// Delay before an automatic restart
pub const RESTART_BACKOFF: Duration = Duration::from_secs(5);

/// Silence after which a worker counts as hung
pub const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(60);

/// How often heartbeat staleness is checked
pub const MONITOR_INTERVAL: Duration = Duration::from_secs(30);

/// Time between SIGTERM and SIGKILL on shutdown
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Default listen address of the health endpoint
pub const DEFAULT_HEALTH_ADDR: &str = "127.0.0.1:9464";

/// Supervisor configuration
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Directory holding one configuration file per tenant
    pub config_dir: PathBuf,

    pub max_restarts: u32,

    pub restart_backoff: Duration,

    pub heartbeat_timeout: Duration,

    pub monitor_interval: Duration,

    pub shutdown_grace: Duration,

    /// Health endpoint address; `None` disables it
    pub health_addr: Option<String>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            config_dir: crate::config::default_config_dir(),
            max_restarts: MAX_RESTARTS,
            restart_backoff: RESTART_BACKOFF,
            heartbeat_timeout: HEARTBEAT_TIMEOUT,
            monitor_interval: MONITOR_INTERVAL,
            shutdown_grace: SHUTDOWN_GRACE,
            health_addr: Some(DEFAULT_HEALTH_ADDR.to_string()),
        }
    }
}

impl SupervisorConfig {
    /// Create a config for a tenant configuration directory
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
            ..Default::default()
        }
    }

    /// Set the restart limit
    pub fn with_max_restarts(mut self, max_restarts: u32) -> Self {
        self.max_restarts = max_restarts;
        self
    }

    /// Set the restart backoff
    pub fn with_restart_backoff(mut self, backoff: Duration) -> Self {
        self.restart_backoff = backoff;
        self
    }

    /// Set the heartbeat timeout
    pub fn with_heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout = timeout;
        self
    }

    /// Set the staleness check interval
    pub fn with_monitor_interval(mut self, interval: Duration) -> Self {
        self.monitor_interval = interval;
        self
    }

    /// Set the shutdown grace period
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Set or disable the health endpoint address
    pub fn with_health_addr(mut self, addr: Option<String>) -> Self {
        self.health_addr = addr;
        self
    }
}

/// Supervision state of one tenant's worker
struct WorkerUnit {
    spec: WorkerSpec,
    status: WorkerStatus,
    generation: u64,
    handle: Option<Box<dyn WorkerHandle>>,
    started_at: Instant,
    last_seen: Option<Instant>,
    last_heartbeat: Option<DateTime<Utc>>,
    restarts: u32,
    restart_at: Option<Instant>,
    last_error: Option<String>,
}

impl WorkerUnit {
    fn new(spec: WorkerSpec) -> Self {
        Self {
            spec,
            status: WorkerStatus::Stopped,
            generation: 0,
            handle: None,
            started_at: Instant::now(),
            last_seen: None,
            last_heartbeat: None,
            restarts: 0,
            restart_at: None,
            last_error: None,
        }
    }

    fn name(&self) -> &str {
        &self.spec.tenant
    }

    fn health(&self) -> WorkerHealth {
        WorkerHealth {
            name: self.spec.tenant.clone(),
            status: self.status,
            last_heartbeat: self.last_heartbeat,
            pid: self.handle.as_ref().and_then(|h| h.pid()),
            restarts: self.restarts,
            last_error: self.last_error.clone(),
        }
    }
}

/// Worker supervisor
pub struct Supervisor {
    config: SupervisorConfig,
    launcher: Arc<dyn WorkerLauncher>,
    workers: Vec<WorkerUnit>,
    health: SharedHealth,
    event_tx: mpsc::UnboundedSender<Envelope>,
    event_rx: mpsc::UnboundedReceiver<Envelope>,
}

impl Supervisor {
    /// Create a supervisor for the given workers
    pub fn new(
        config: SupervisorConfig,
        specs: Vec<WorkerSpec>,
        launcher: Arc<dyn WorkerLauncher>,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let supervisor = Self {
            config,
            launcher,
            workers: specs.into_iter().map(WorkerUnit::new).collect(),
            health: SharedHealth::new(),
            event_tx,
            event_rx,
        };
        supervisor.publish();
        supervisor
    }

    /// Create a supervisor for every valid tenant in the config directory
    ///
    /// Rejected documents are logged and left out.
    pub fn from_config_dir(
        config: SupervisorConfig,
        launcher: Arc<dyn WorkerLauncher>,
    ) -> Result<Self> {
        let report = load_tenants(&config.config_dir)?;
        if report.tenants.is_empty() {
            return Err(SyncFlowError::Config(format!(
                "No valid tenant configuration in {}",
                config.config_dir.display()
            )));
        }

        let specs = report
            .tenants
            .into_iter()
            .map(|entry| WorkerSpec::new(entry.name, entry.path))
            .collect();
        Ok(Self::new(config, specs, launcher))
    }

    /// Handle to the published health report
    pub fn health(&self) -> SharedHealth {
        self.health.clone()
    }

    /// Run until SIGTERM or SIGINT, serving the health endpoint if enabled
    pub async fn run(&mut self) -> Result<()> {
        let server = self.config.health_addr.clone().map(|addr| {
            let state = self.health.clone();
            tokio::spawn(async move {
                if let Err(e) = super::health::serve(&addr, state).await {
                    tracing::error!(error = %e, "Health endpoint failed");
                }
            })
        });

        let result = self.run_until(shutdown_signal()).await;

        if let Some(server) = server {
            server.abort();
        }
        result
    }

    /// Run until `shutdown` completes, then stop every worker
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tracing::info!(workers = self.workers.len(), "Supervisor starting");
        for index in 0..self.workers.len() {
            self.launch(index);
        }
        self.publish();

        let period = self.config.monitor_interval;
        let mut monitor = interval_at(Instant::now() + period, period);
        tokio::pin!(shutdown);

        loop {
            let next_restart = self.workers.iter().filter_map(|w| w.restart_at).min();

            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Shutdown requested");
                    break;
                }
                _ = monitor.tick() => self.check_heartbeats(),
                Some(envelope) = self.event_rx.recv() => self.handle_event(envelope),
                _ = sleep_until(next_restart.unwrap_or_else(Instant::now)), if next_restart.is_some() => {
                    self.restart_due();
                }
            }
            self.publish();
        }

        self.shutdown().await;
        self.publish();
        tracing::info!("Supervisor stopped");
        Ok(())
    }

    fn launch(&mut self, index: usize) {
        let unit = &mut self.workers[index];
        unit.generation += 1;
        unit.started_at = Instant::now();
        unit.last_seen = None;
        unit.restart_at = None;

        match self
            .launcher
            .launch(&unit.spec, unit.generation, self.event_tx.clone())
        {
            Ok(handle) => {
                unit.handle = Some(handle);
                unit.status = WorkerStatus::Starting;
                metrics::set_worker_up(&unit.spec.tenant, true);
            }
            Err(e) => {
                tracing::error!(tenant = %unit.spec.tenant, error = %e, "Failed to launch worker");
                self.fail(index, e.to_string());
            }
        }
    }

    fn handle_event(&mut self, envelope: Envelope) {
        let Some(index) = self
            .workers
            .iter()
            .position(|w| w.spec.tenant == envelope.tenant)
        else {
            return;
        };
        if self.workers[index].generation != envelope.generation {
            tracing::debug!(
                tenant = %envelope.tenant,
                generation = envelope.generation,
                "Ignoring event from replaced worker"
            );
            return;
        }

        match envelope.event {
            WorkerEvent::Message(message) => self.handle_message(index, message),
            WorkerEvent::Exited(code) => self.handle_exit(index, code),
        }
    }

    fn handle_message(&mut self, index: usize, message: WorkerMessage) {
        let unit = &mut self.workers[index];
        if !unit.status.is_up() {
            return;
        }
        unit.last_seen = Some(Instant::now());

        match message {
            WorkerMessage::Heartbeat { at, .. } => {
                unit.last_heartbeat = Some(at);
                metrics::record_heartbeat(&unit.spec.tenant);
            }
            WorkerMessage::Cycle { report, .. } => {
                unit.last_heartbeat = Some(Utc::now());
                metrics::record_cycle(&report);
            }
        }

        if unit.status == WorkerStatus::Starting {
            tracing::info!(tenant = %unit.spec.tenant, "Worker running");
            unit.status = WorkerStatus::Running;
        }
    }

    fn handle_exit(&mut self, index: usize, code: Option<i32>) {
        let unit = &mut self.workers[index];
        unit.handle = None;
        metrics::set_worker_up(&unit.spec.tenant, false);

        match code {
            Some(EXIT_OK) => {
                tracing::info!(tenant = %unit.spec.tenant, "Worker exited cleanly");
                unit.status = WorkerStatus::Stopped;
            }
            Some(EXIT_CONFIG) => {
                tracing::error!(
                    tenant = %unit.spec.tenant,
                    "Worker rejected its configuration, not restarting"
                );
                unit.status = WorkerStatus::Error;
                unit.last_error = Some("configuration error".to_string());
                unit.restart_at = None;
            }
            Some(code) => self.fail(index, format!("exited with code {}", code)),
            None => self.fail(index, "terminated by signal".to_string()),
        }
    }

    /// Kill workers that missed their heartbeat deadline
    fn check_heartbeats(&mut self) {
        let now = Instant::now();
        let timeout = self.config.heartbeat_timeout;

        let stale: Vec<usize> = self
            .workers
            .iter()
            .enumerate()
            .filter(|(_, w)| w.status.is_up())
            .filter(|(_, w)| now.duration_since(w.last_seen.unwrap_or(w.started_at)) > timeout)
            .map(|(index, _)| index)
            .collect();

        for index in stale {
            let unit = &mut self.workers[index];
            tracing::warn!(
                tenant = %unit.name(),
                timeout_secs = timeout.as_secs(),
                "No heartbeat from worker, killing it"
            );
            if let Some(mut handle) = unit.handle.take() {
                handle.kill();
            }
            // The killed process's exit is not this worker's concern anymore.
            unit.generation += 1;
            metrics::set_worker_up(&unit.spec.tenant, false);
            self.fail(index, "heartbeat timeout".to_string());
        }
    }

    /// Put a worker in error and schedule a restart if any are left
    fn fail(&mut self, index: usize, reason: String) {
        let max_restarts = self.config.max_restarts;
        let backoff = self.config.restart_backoff;
        let unit = &mut self.workers[index];

        unit.status = WorkerStatus::Error;
        unit.last_error = Some(reason.clone());

        if unit.restarts < max_restarts {
            unit.restart_at = Some(Instant::now() + backoff);
            tracing::warn!(
                tenant = %unit.name(),
                reason = %reason,
                restarts = unit.restarts,
                backoff_secs = backoff.as_secs(),
                "Worker failed, restarting after backoff"
            );
        } else {
            unit.restart_at = None;
            tracing::error!(
                tenant = %unit.name(),
                reason = %reason,
                restarts = unit.restarts,
                "Worker failed, restart limit reached"
            );
        }
    }

    fn restart_due(&mut self) {
        let now = Instant::now();
        let due: Vec<usize> = self
            .workers
            .iter()
            .enumerate()
            .filter(|(_, w)| w.restart_at.is_some_and(|at| at <= now))
            .map(|(index, _)| index)
            .collect();

        for index in due {
            let unit = &mut self.workers[index];
            unit.restarts += 1;
            metrics::record_restart(&unit.spec.tenant);
            tracing::info!(tenant = %unit.name(), attempt = unit.restarts, "Restarting worker");
            self.launch(index);
        }
    }

    /// SIGTERM every live worker, SIGKILL whatever is left after the grace period
    async fn shutdown(&mut self) {
        for unit in &mut self.workers {
            unit.restart_at = None;
            match unit.handle.as_mut() {
                Some(handle) => {
                    tracing::info!(tenant = %unit.spec.tenant, pid = ?handle.pid(), "Stopping worker");
                    handle.terminate();
                }
                None => unit.status = WorkerStatus::Stopped,
            }
        }

        let deadline = Instant::now() + self.config.shutdown_grace;
        while self.workers.iter().any(|w| w.handle.is_some()) {
            tokio::select! {
                _ = sleep_until(deadline) => break,
                envelope = self.event_rx.recv() => {
                    let Some(envelope) = envelope else { break };
                    if let WorkerEvent::Exited(_) = envelope.event {
                        if let Some(unit) = self.workers.iter_mut().find(|w| {
                            w.spec.tenant == envelope.tenant && w.generation == envelope.generation
                        }) {
                            unit.handle = None;
                            unit.status = WorkerStatus::Stopped;
                        }
                    }
                }
            }
        }

        for unit in &mut self.workers {
            if let Some(mut handle) = unit.handle.take() {
                tracing::warn!(tenant = %unit.spec.tenant, "Worker ignored SIGTERM, killing it");
                handle.kill();
            }
            unit.status = WorkerStatus::Stopped;
            metrics::set_worker_up(&unit.spec.tenant, false);
        }
    }

    fn publish(&self) {
        self.health.publish(HealthReport::from_workers(
            self.workers.iter().map(WorkerUnit::health).collect(),
        ));
    }
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut sigterm, mut sigint) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(term), Ok(int)) => (term, int),
        (Err(e), _) | (_, Err(e)) => {
            tracing::error!(error = %e, "Failed to set up signal handlers, using Ctrl-C only");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => tracing::info!("Received SIGTERM, initiating graceful shutdown"),
        _ = sigint.recv() => tracing::info!("Received SIGINT, initiating graceful shutdown"),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("Received Ctrl-C, initiating graceful shutdown");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// What a fake worker does when launched
    #[derive(Clone, Copy)]
    enum Behavior {
        HeartbeatOnce,
        ExitWith(i32),
    }

    #[derive(Default)]
    struct Calls {
        launches: Vec<u64>,
        terminated: usize,
        killed: usize,
    }

    struct FakeLauncher {
        behavior: Behavior,
        calls: Arc<Mutex<Calls>>,
    }

    struct FakeHandle {
        tenant: String,
        generation: u64,
        events: mpsc::UnboundedSender<Envelope>,
        calls: Arc<Mutex<Calls>>,
    }

    impl WorkerHandle for FakeHandle {
        fn pid(&self) -> Option<u32> {
            Some(1000 + self.generation as u32)
        }

        fn terminate(&mut self) {
            self.calls.lock().unwrap().terminated += 1;
            let _ = self.events.send(Envelope {
                tenant: self.tenant.clone(),
                generation: self.generation,
                event: WorkerEvent::Exited(Some(0)),
            });
        }

        fn kill(&mut self) {
            self.calls.lock().unwrap().killed += 1;
        }
    }

    impl WorkerLauncher for FakeLauncher {
        fn launch(
            &self,
            spec: &WorkerSpec,
            generation: u64,
            events: mpsc::UnboundedSender<Envelope>,
        ) -> Result<Box<dyn WorkerHandle>> {
            self.calls.lock().unwrap().launches.push(generation);
            let event = match self.behavior {
                Behavior::HeartbeatOnce => {
                    WorkerEvent::Message(WorkerMessage::heartbeat(&spec.tenant))
                }
                Behavior::ExitWith(code) => WorkerEvent::Exited(Some(code)),
            };
            let _ = events.send(Envelope {
                tenant: spec.tenant.clone(),
                generation,
                event,
            });
            Ok(Box::new(FakeHandle {
                tenant: spec.tenant.clone(),
                generation,
                events,
                calls: self.calls.clone(),
            }))
        }
    }

    fn supervisor(behavior: Behavior) -> (Supervisor, Arc<Mutex<Calls>>) {
        let calls = Arc::new(Mutex::new(Calls::default()));
        let launcher = Arc::new(FakeLauncher {
            behavior,
            calls: calls.clone(),
        });
        let config = SupervisorConfig::new("/nonexistent").with_health_addr(None);
        let supervisor = Supervisor::new(
            config,
            vec![WorkerSpec::new("acme", "/nonexistent/acme.json")],
            launcher,
        );
        (supervisor, calls)
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_becomes_running_and_stops_on_shutdown() {
        let (mut supervisor, calls) = supervisor(Behavior::HeartbeatOnce);
        let health = supervisor.health();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            supervisor
                .run_until(async {
                    let _ = stop_rx.await;
                })
                .await
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        let report = health.snapshot();
        assert!(report.is_healthy());
        assert_eq!(report.worker("acme").unwrap().status, WorkerStatus::Running);
        assert_eq!(report.worker("acme").unwrap().pid, Some(1001));

        stop_tx.send(()).unwrap();
        task.await.unwrap().unwrap();

        assert_eq!(health.snapshot().worker("acme").unwrap().status, WorkerStatus::Stopped);
        let calls = calls.lock().unwrap();
        assert_eq!(calls.terminated, 1);
        assert_eq!(calls.killed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_worker_is_killed_and_restarted() {
        let (mut supervisor, calls) = supervisor(Behavior::HeartbeatOnce);
        let health = supervisor.health();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            supervisor
                .run_until(async {
                    let _ = stop_rx.await;
                })
                .await
        });

        // Silent since t=0; the check at t=60 is not past the timeout yet.
        tokio::time::sleep(Duration::from_secs(70)).await;
        assert_eq!(calls.lock().unwrap().killed, 0);

        // Killed at t=90, relaunched at t=95.
        tokio::time::sleep(Duration::from_secs(30)).await;
        {
            let calls = calls.lock().unwrap();
            assert_eq!(calls.killed, 1);
            assert_eq!(calls.launches, vec![1, 2]);
        }
        let worker = health.snapshot().worker("acme").cloned().unwrap();
        assert_eq!(worker.status, WorkerStatus::Running);
        assert_eq!(worker.restarts, 1);

        tokio::time::sleep(Duration::from_secs(400)).await;
        {
            let calls = calls.lock().unwrap();
            assert_eq!(calls.launches, vec![1, 2, 3, 4]);
            assert_eq!(calls.killed, 4);
        }
        let report = health.snapshot();
        assert!(!report.is_healthy());
        let worker = report.worker("acme").unwrap();
        assert_eq!(worker.status, WorkerStatus::Error);
        assert_eq!(worker.restarts, MAX_RESTARTS);
        assert_eq!(worker.last_error.as_deref(), Some("heartbeat timeout"));

        stop_tx.send(()).unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_config_error_is_not_restarted() {
        let (mut supervisor, calls) = supervisor(Behavior::ExitWith(EXIT_CONFIG));
        let health = supervisor.health();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            supervisor
                .run_until(async {
                    let _ = stop_rx.await;
                })
                .await
        });

        tokio::time::sleep(Duration::from_secs(120)).await;
        let report = health.snapshot();
        assert!(!report.is_healthy());
        assert_eq!(report.worker("acme").unwrap().status, WorkerStatus::Error);
        assert_eq!(calls.lock().unwrap().launches, vec![1]);

        stop_tx.send(()).unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_crash_restarts_up_to_limit() {
        let (mut supervisor, calls) = supervisor(Behavior::ExitWith(1));
        let health = supervisor.health();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            supervisor
                .run_until(async {
                    let _ = stop_rx.await;
                })
                .await
        });

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(calls.lock().unwrap().launches.len(), 1);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(calls.lock().unwrap().launches, vec![1, 2, 3, 4]);
        let worker = health.snapshot().worker("acme").cloned().unwrap();
        assert_eq!(worker.status, WorkerStatus::Error);
        assert_eq!(worker.restarts, MAX_RESTARTS);

        stop_tx.send(()).unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_clean_exit_is_stopped() {
        let (mut supervisor, calls) = supervisor(Behavior::ExitWith(EXIT_OK));
        let health = supervisor.health();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            supervisor
                .run_until(async {
                    let _ = stop_rx.await;
                })
                .await
        });

        tokio::time::sleep(Duration::from_secs(30)).await;
        let report = health.snapshot();
        assert!(!report.is_healthy());
        assert_eq!(report.worker("acme").unwrap().status, WorkerStatus::Stopped);
        assert_eq!(calls.lock().unwrap().launches.len(), 1);

        stop_tx.send(()).unwrap();
        task.await.unwrap().unwrap();
    }
}
