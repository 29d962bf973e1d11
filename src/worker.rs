//! Tenant worker
//!
//! The process the supervisor starts for one tenant. It loads and checks
//! the tenant's configuration, then runs a sync cycle every poll interval
//! and reports liveness on stdout until SIGTERM or SIGINT.
//!
//! Everything runs on a single-threaded runtime, so a cycle that hogs the
//! thread also stops heartbeats and the supervisor notices.

use crate::config::{validate_tenant_result, TenantConfig};
use crate::error::ErrorClass;
use crate::model::ProjectRole;
use crate::store::{SqliteStore, StoreConfig};
use crate::supervisor::protocol::{WorkerMessage, EXIT_CONFIG, EXIT_OK};
use crate::sync::{CycleReport, Orchestrator};
use crate::tracker::{IssueTracker, JiraClient};
use crate::{Result, SyncFlowError};
use std::collections::BTreeSet;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

/// How often a worker reports liveness
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Exit code for failures worth a restart
const EXIT_FAILURE: i32 = 1;

const WRITER_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Run a worker for the tenant configured in `config_path`
///
/// Returns the process exit code: 0 after a requested stop, 78 when the
/// configuration is unusable, 1 for anything else.
pub fn run(config_path: &Path) -> i32 {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!(error = %e, "Failed to start worker runtime");
            return EXIT_FAILURE;
        }
    };

    runtime.block_on(async {
        let orchestrator = match prepare(config_path).await {
            Ok(orchestrator) => orchestrator,
            Err(e) => {
                tracing::error!(config = %config_path.display(), error = %e, "Worker failed to start");
                return exit_code_for(&e);
            }
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(write_messages(rx));

        serve(orchestrator, HEARTBEAT_INTERVAL, tx, shutdown_signal()).await;

        let _ = tokio::time::timeout(WRITER_FLUSH_TIMEOUT, writer).await;
        EXIT_OK
    })
}

fn exit_code_for(error: &SyncFlowError) -> i32 {
    match error.class() {
        ErrorClass::Configuration => EXIT_CONFIG,
        _ => EXIT_FAILURE,
    }
}

/// Load the tenant, check it against the tracker and open its store
pub async fn prepare(config_path: &Path) -> Result<Orchestrator> {
    let config = TenantConfig::load(config_path)?;
    validate_tenant_result(&config)?;

    let tracker = JiraClient::new(&config.jira)?;
    preflight(&config, &tracker).await?;

    let store = SqliteStore::open(StoreConfig::new(config.database_path()))?;

    tracing::info!(
        tenant = %config.name,
        source = %config.source_project_key,
        target = %config.target_project_key,
        interval_secs = config.sync_interval().as_secs(),
        "Worker ready"
    );

    Ok(Orchestrator::new(
        Arc::new(config),
        Arc::new(tracker),
        Arc::new(store),
    ))
}

/// Check credentials and both projects against the tracker
///
/// Rejected credentials or a missing project are configuration errors.
/// Rule statuses the tracker does not know about are only reported, since
/// permissions can hide statuses that still work.
pub async fn preflight(config: &TenantConfig, tracker: &dyn IssueTracker) -> Result<()> {
    let user = tracker
        .current_user()
        .await
        .map_err(|e| as_config_error(e, "Authentication failed"))?;
    tracing::info!(
        tenant = %config.name,
        user = user.display_name.as_deref().unwrap_or("unknown"),
        "Tracker authentication succeeded"
    );

    for role in [ProjectRole::Source, ProjectRole::Target] {
        let key = config.project_key(role);
        tracker.project(key).await.map_err(|e| {
            as_config_error(e, &format!("{} project {} is not accessible", role, key))
        })?;
    }

    for (role, required) in rule_statuses(config) {
        if required.is_empty() {
            continue;
        }
        let key = config.project_key(role);
        match tracker.project_statuses(key).await {
            Ok(known) => {
                let missing: Vec<&String> =
                    required.iter().filter(|s| !known.contains(s)).collect();
                if !missing.is_empty() {
                    tracing::warn!(
                        tenant = %config.name,
                        project = %key,
                        missing = ?missing,
                        "Rule statuses not found in project"
                    );
                }
            }
            Err(e) => {
                tracing::warn!(project = %key, error = %e, "Could not check project statuses");
            }
        }
    }

    Ok(())
}

/// Keep transient failures restartable, make everything else fatal
fn as_config_error(error: SyncFlowError, context: &str) -> SyncFlowError {
    match error.class() {
        ErrorClass::Transient => error,
        _ => SyncFlowError::Config(format!("{}: {}", context, error)),
    }
}

/// Statuses the enabled rules expect to exist, per project
///
/// Trigger statuses belong to the project the rule watches, destination
/// statuses to the project it acts on. Wildcards and templated statuses
/// are left out.
pub fn rule_statuses(config: &TenantConfig) -> Vec<(ProjectRole, BTreeSet<String>)> {
    let mut source = BTreeSet::new();
    let mut target = BTreeSet::new();

    for rule in config.rules.iter().filter(|r| r.enabled) {
        if !rule.is_wildcard() {
            let status = rule.source_status.trim().to_string();
            if rule.direction.applies_to(ProjectRole::Source) {
                source.insert(status.clone());
            }
            if rule.direction.applies_to(ProjectRole::Target) {
                target.insert(status);
            }
        }

        let destination = rule
            .actions
            .target_status
            .as_deref()
            .or(rule.target_status.as_deref())
            .map(str::trim)
            .filter(|s| !s.is_empty() && !s.contains("${"));
        if let Some(status) = destination {
            match rule.target_project {
                ProjectRole::Source => source.insert(status.to_string()),
                ProjectRole::Target => target.insert(status.to_string()),
            };
        }
    }

    vec![(ProjectRole::Source, source), (ProjectRole::Target, target)]
}

/// Run cycles and heartbeats until `shutdown` completes
///
/// The first cycle starts immediately. A cycle in progress is abandoned
/// on shutdown; the next start picks up from the last saved watermark.
pub async fn serve<F>(
    orchestrator: Orchestrator,
    heartbeat_every: Duration,
    out: mpsc::UnboundedSender<WorkerMessage>,
    shutdown: F,
) where
    F: Future<Output = ()>,
{
    let tenant = orchestrator.config().name.clone();
    let heartbeat = tokio::spawn(heartbeat_loop(tenant.clone(), heartbeat_every, out.clone()));

    let mut ticker = tokio::time::interval(orchestrator.config().sync_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {}
        }

        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!(tenant = %tenant, "Stopping during sync cycle");
                break;
            }
            result = orchestrator.run_cycle(false) => report_cycle(&tenant, result, &out),
        }
    }

    heartbeat.abort();
    tracing::info!(tenant = %tenant, "Worker stopped");
}

fn report_cycle(
    tenant: &str,
    result: Result<CycleReport>,
    out: &mpsc::UnboundedSender<WorkerMessage>,
) {
    match result {
        Ok(report) => {
            let _ = out.send(WorkerMessage::cycle(&report));
        }
        Err(e) => {
            tracing::error!(tenant = %tenant, error = %e, "Sync cycle aborted");
        }
    }
}

async fn heartbeat_loop(
    tenant: String,
    every: Duration,
    out: mpsc::UnboundedSender<WorkerMessage>,
) {
    let mut ticker = tokio::time::interval(every);
    loop {
        ticker.tick().await;
        if out.send(WorkerMessage::heartbeat(&tenant)).is_err() {
            break;
        }
    }
}

/// Write protocol messages to stdout, one per line
async fn write_messages(mut rx: mpsc::UnboundedReceiver<WorkerMessage>) {
    let mut stdout = tokio::io::stdout();
    while let Some(message) = rx.recv().await {
        let line = match message.to_line() {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to encode worker message");
                continue;
            }
        };
        let written = async {
            stdout.write_all(line.as_bytes()).await?;
            stdout.write_all(b"\n").await?;
            stdout.flush().await
        };
        if let Err(e) = written.await {
            tracing::error!(error = %e, "Lost stdout, supervisor gone");
            break;
        }
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
        _ = sigterm.recv() => tracing::info!("Received SIGTERM"),
        _ = sigint.recv() => tracing::info!("Received SIGINT"),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
