//! Worker processes
//!
//! [`WorkerLauncher`] starts one worker per tenant and reports what the
//! worker says and when it exits through a channel. [`ProcessLauncher`]
//! runs `syncflow worker --config <file>` as a child process.

use super::protocol::WorkerMessage;
use crate::{Result, SyncFlowError};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};

const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// What the supervisor needs to start a tenant's worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSpec {
    pub tenant: String,
    pub config_path: PathBuf,
}

impl WorkerSpec {
    pub fn new(tenant: impl Into<String>, config_path: impl Into<PathBuf>) -> Self {
        Self {
            tenant: tenant.into(),
            config_path: config_path.into(),
        }
    }
}

/// Something a worker did
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    Message(WorkerMessage),
    /// Process ended; `None` when terminated by a signal
    Exited(Option<i32>),
}

/// Worker event tagged with the launch it belongs to
///
/// The generation increases with every launch of a tenant's worker, so
/// events from a replaced process can be told apart.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub tenant: String,
    pub generation: u64,
    pub event: WorkerEvent,
}

pub type EventSender = mpsc::UnboundedSender<Envelope>;

/// Control over one launched worker
pub trait WorkerHandle: Send {
    fn pid(&self) -> Option<u32>;

    /// Ask the worker to stop (SIGTERM)
    fn terminate(&mut self);

    /// Stop the worker immediately (SIGKILL)
    fn kill(&mut self);
}

/// Starts workers
pub trait WorkerLauncher: Send + Sync {
    fn launch(
        &self,
        spec: &WorkerSpec,
        generation: u64,
        events: EventSender,
    ) -> Result<Box<dyn WorkerHandle>>;
}

/// Launches workers as child processes of a `syncflow` binary
pub struct ProcessLauncher {
    program: PathBuf,
    leading_args: Vec<String>,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
        }
    }

    /// Arguments placed before the `worker` subcommand
    pub fn with_leading_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.leading_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Launch workers with the running executable
    pub fn current_exe() -> Result<Self> {
        Ok(Self::new(std::env::current_exe()?))
    }
}

impl WorkerLauncher for ProcessLauncher {
    fn launch(
        &self,
        spec: &WorkerSpec,
        generation: u64,
        events: EventSender,
    ) -> Result<Box<dyn WorkerHandle>> {
        let mut child = Command::new(&self.program)
            .args(&self.leading_args)
            .arg("worker")
            .arg("--config")
            .arg(&spec.config_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                SyncFlowError::Supervisor(format!(
                    "Failed to start worker for {}: {}",
                    spec.tenant, e
                ))
            })?;

        let pid = child.id();
        let stdout = child.stdout.take().ok_or_else(|| {
            SyncFlowError::Supervisor(format!("Worker for {} has no stdout", spec.tenant))
        })?;
        let (kill_tx, mut kill_rx) = oneshot::channel::<()>();
        let tenant = spec.tenant.clone();

        tracing::info!(tenant = %tenant, pid = ?pid, generation, "Worker launched");

        tokio::spawn(async move {
            let send = |event: WorkerEvent| {
                let _ = events.send(Envelope {
                    tenant: tenant.clone(),
                    generation,
                    event,
                });
            };

            let mut lines = BufReader::new(stdout).lines();
            let mut stdout_open = true;
            let mut kill_requested = false;

            let status = loop {
                tokio::select! {
                    line = lines.next_line(), if stdout_open => match line {
                        Ok(Some(line)) => match WorkerMessage::parse_line(&line) {
                            Some(message) => send(WorkerEvent::Message(message)),
                            None => tracing::debug!(tenant = %tenant, line = %line, "Ignoring worker output"),
                        },
                        Ok(None) => stdout_open = false,
                        Err(e) => {
                            tracing::debug!(tenant = %tenant, error = %e, "Worker stdout closed");
                            stdout_open = false;
                        }
                    },
                    _ = &mut kill_rx, if !kill_requested => {
                        kill_requested = true;
                        if let Err(e) = child.start_kill() {
                            tracing::warn!(tenant = %tenant, error = %e, "Failed to kill worker");
                        }
                    }
                    status = child.wait() => break status,
                }
            };

            // Lines written right before exit may still be buffered in the pipe.
            while stdout_open {
                match tokio::time::timeout(DRAIN_TIMEOUT, lines.next_line()).await {
                    Ok(Ok(Some(line))) => {
                        if let Some(message) = WorkerMessage::parse_line(&line) {
                            send(WorkerEvent::Message(message));
                        }
                    }
                    _ => stdout_open = false,
                }
            }

            let code = match status {
                Ok(status) => status.code(),
                Err(e) => {
                    tracing::warn!(tenant = %tenant, error = %e, "Failed to wait for worker");
                    None
                }
            };
            send(WorkerEvent::Exited(code));
        });

        Ok(Box::new(ChildHandle {
            tenant: spec.tenant.clone(),
            pid,
            kill_tx: Some(kill_tx),
        }))
    }
}

struct ChildHandle {
    tenant: String,
    pid: Option<u32>,
    kill_tx: Option<oneshot::Sender<()>>,
}

impl WorkerHandle for ChildHandle {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn terminate(&mut self) {
        let Some(pid) = self.pid else {
            return;
        };
        if let Err(e) = send_sigterm(pid) {
            tracing::warn!(tenant = %self.tenant, pid, error = %e, "Failed to send SIGTERM, killing");
            self.kill();
        }
    }

    fn kill(&mut self) {
        if let Some(tx) = self.kill_tx.take() {
            let _ = tx.send(());
        }
    }
}

#[cfg(unix)]
fn send_sigterm(pid: u32) -> std::io::Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let pid = i32::try_from(pid)
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "pid out of range"))?;
    kill(Pid::from_raw(pid), Signal::SIGTERM).map_err(std::io::Error::from)
}

#[cfg(not(unix))]
fn send_sigterm(_pid: u32) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "graceful termination needs unix signals",
    ))
}
