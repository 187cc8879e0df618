//! # Tunnel Supervisor
//!
//! Exposes the local UI port through third-party relays (cloudflared, localtunnel,
//! zrok). Each relay is an external process that prints its public address somewhere
//! in its output; the supervisor launches them, scans their output and surfaces the
//! first matching address per tunnel.
//!
//! ## Lifecycle
//!
//! ```text
//! Idle --start()--> Starting --> Running --stop()--> Stopping --> Stopped
//!   \___________________________stop()_____________________________/
//! ```
//!
//! - Tunnels can only be added while `Idle`.
//! - `start()` spawns every tunnel via `sh -c` in its own process group. A tunnel whose
//!   program is missing or fails to spawn is recorded and skipped; the rest still run.
//! - One reader task per tunnel drains stdout and stderr. The first pattern match wins;
//!   later matches are ignored.
//! - `stop()` sends SIGTERM to each process group, waits out a grace period, kills
//!   survivors and joins the readers. It is idempotent.
//! - Dropping the supervisor kills any processes it still owns.
//!
//! A tunnel that never reports a URL is logged, not retried.

mod reader;
mod spec;

pub use reader::{OutputBuffer, SharedOutput, TUNNEL_OUTPUT_LINES, TunnelReader};
pub use spec::{
    CLOUDFLARED_PATTERN, LOCALTUNNEL_PATTERN, PORT_PLACEHOLDER, TunnelSpec, ZROK_PATTERN,
    default_tunnels, extract_url, zrok_enable_command,
};

use crate::runner::{GroupSignal, isolate_group, signal_group};
use nbboot_common::supervisor_state::{SupervisorState, SupervisorStateMachine};
use reader::lock_output;
use std::{
    fmt,
    future::Future,
    process::Stdio,
    sync::{Arc, Mutex},
    time::Duration,
};
use thiserror::Error;
use tokio::{
    process::{Child, Command},
    sync::watch,
    task::JoinHandle,
};

/// Default time between SIGTERM and SIGKILL on `stop()`.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// A tunnel that could not be started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnFailure {
    pub name: String,
    pub reason: String,
}

impl fmt::Display for SpawnFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.reason)
    }
}

#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("{} tunnel(s) failed to start: {}", .failures.len(), join_failures(.failures))]
    Spawn { failures: Vec<SpawnFailure> },

    #[error("invalid URL pattern for tunnel '{name}': {source}")]
    InvalidPattern {
        name: String,
        #[source]
        source: regex::Error,
    },

    #[error("tunnel supervisor is {state}: {reason}")]
    InvalidState {
        state: SupervisorState,
        reason: &'static str,
    },
}

fn join_failures(failures: &[SpawnFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// A public address reported by a tunnel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelUrl {
    pub name: String,
    pub url: String,
    pub note: Option<String>,
}

/// What [`TunnelSupervisor::run_scoped`] observed while its body ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopedRun<T> {
    pub output: T,
    /// The result of [`TunnelSupervisor::wait_for_urls`], or `None` when the body
    /// finished before the wait did.
    pub urls: Option<Vec<TunnelUrl>>,
}

/// Point-in-time view of one tunnel.
#[derive(Debug, Clone)]
pub struct TunnelReport {
    pub name: String,
    pub url: Option<String>,
    pub status: TunnelStatus,
    pub recent_output: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TunnelStatus {
    /// Output is still being read.
    Live,
    /// Both output streams closed; the process has exited or detached.
    OutputClosed,
    /// Terminated by `stop()`.
    Stopped,
    SpawnFailed(String),
}

/// A spawned tunnel. Owned solely by its supervisor.
struct TunnelProcess {
    spec: TunnelSpec,
    child: Option<Child>,
    pid: Option<u32>,
    url: watch::Receiver<Option<String>>,
    output: SharedOutput,
    reader: Option<JoinHandle<()>>,
}

impl TunnelProcess {
    fn status(&self, state: SupervisorState) -> TunnelStatus {
        if state.is_terminal() {
            return TunnelStatus::Stopped;
        }
        match &self.reader {
            Some(handle) if !handle.is_finished() => TunnelStatus::Live,
            _ => TunnelStatus::OutputClosed,
        }
    }
}

/// Launches tunnel processes for one local port and tracks their public URLs.
pub struct TunnelSupervisor {
    port: u16,
    specs: Vec<TunnelSpec>,
    processes: Vec<TunnelProcess>,
    failures: Vec<SpawnFailure>,
    state: SupervisorStateMachine,
    url_timeout: Option<Duration>,
    grace_period: Duration,
    announce: bool,
}

impl fmt::Debug for TunnelSupervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TunnelSupervisor")
            .field("port", &self.port)
            .field("state", &self.state.current())
            .field("tunnels", &self.specs.len())
            .finish()
    }
}

impl TunnelSupervisor {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            specs: Vec::new(),
            processes: Vec::new(),
            failures: Vec::new(),
            state: SupervisorStateMachine::new(),
            url_timeout: None,
            grace_period: DEFAULT_GRACE_PERIOD,
            announce: true,
        }
    }

    /// Upper bound for [`wait_for_urls`](Self::wait_for_urls). `None` waits until every
    /// tunnel reports or closes its output.
    pub fn with_url_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.url_timeout = timeout;
        self
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Do not print `* Running on:` lines.
    pub fn quiet(mut self) -> Self {
        self.announce = false;
        self
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn state(&self) -> SupervisorState {
        self.state.current()
    }

    /// Register a tunnel. Only allowed before `start()`.
    pub fn add_tunnel(
        &mut self,
        command_template: impl Into<String>,
        name: impl Into<String>,
        url_pattern: &str,
        note: Option<String>,
    ) -> Result<(), TunnelError> {
        let spec = TunnelSpec::new(command_template, name, url_pattern, note)?;
        self.add_spec(spec)
    }

    pub fn add_spec(&mut self, spec: TunnelSpec) -> Result<(), TunnelError> {
        let state = self.state.current();
        if state != SupervisorState::Idle {
            return Err(TunnelError::InvalidState {
                state,
                reason: "tunnels can only be added before start",
            });
        }
        self.specs.push(spec);
        Ok(())
    }

    /// Spawn every registered tunnel.
    ///
    /// Tunnels that fail to spawn are skipped and returned together in
    /// [`TunnelError::Spawn`]; the others keep running either way.
    pub fn start(&mut self) -> Result<(), TunnelError> {
        self.state
            .transition_to_starting()
            .map_err(|reason| TunnelError::InvalidState {
                state: self.state.current(),
                reason,
            })?;

        tracing::info!(
            "Starting {} tunnel(s) for port {}",
            self.specs.len(),
            self.port
        );
        for spec in self.specs.clone() {
            match self.spawn_one(&spec) {
                Ok(process) => self.processes.push(process),
                Err(reason) => {
                    tracing::warn!("Tunnel '{}' failed to start: {}", spec.name(), reason);
                    self.failures.push(SpawnFailure {
                        name: spec.name().to_string(),
                        reason,
                    });
                }
            }
        }

        self.state
            .transition_to_running()
            .map_err(|reason| TunnelError::InvalidState {
                state: self.state.current(),
                reason,
            })?;

        if self.failures.is_empty() {
            Ok(())
        } else {
            Err(TunnelError::Spawn {
                failures: self.failures.clone(),
            })
        }
    }

    fn spawn_one(&self, spec: &TunnelSpec) -> Result<TunnelProcess, String> {
        if let Some(program) = spec.program()
            && let Err(e) = which::which(program)
        {
            return Err(format!("`{program}` not found: {e}"));
        }

        let command = spec.command_for(self.port);
        tracing::debug!("Spawning tunnel '{}': {}", spec.name(), command);

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        isolate_group(&mut cmd);

        let mut child = cmd.spawn().map_err(|e| e.to_string())?;
        let pid = child.id();

        let (url_tx, url_rx) = watch::channel(None);
        let output: SharedOutput = Arc::new(Mutex::new(OutputBuffer::default()));
        let reader = TunnelReader {
            name: spec.name().to_string(),
            pattern: spec.url_pattern().clone(),
            note: spec.note().map(str::to_string),
            url: url_tx,
            output: output.clone(),
            announce: self.announce,
        };
        let handle = tokio::spawn(reader.run(child.stdout.take(), child.stderr.take()));

        Ok(TunnelProcess {
            spec: spec.clone(),
            child: Some(child),
            pid,
            url: url_rx,
            output,
            reader: Some(handle),
        })
    }

    /// Spawn failures recorded by `start()`.
    pub fn failures(&self) -> &[SpawnFailure] {
        &self.failures
    }

    /// URLs reported so far, in registration order.
    pub fn urls(&self) -> Vec<TunnelUrl> {
        self.processes
            .iter()
            .filter_map(|p| {
                p.url.borrow().clone().map(|url| TunnelUrl {
                    name: p.spec.name().to_string(),
                    url,
                    note: p.spec.note().map(str::to_string),
                })
            })
            .collect()
    }

    /// Wait until every tunnel has reported a URL or closed its output, bounded by the
    /// configured URL timeout. Returns whatever was found.
    pub async fn wait_for_urls(&self) -> Vec<TunnelUrl> {
        let waits = self.processes.iter().map(|p| {
            let mut rx = p.url.clone();
            async move {
                // Err means the reader finished without a URL
                let _ = rx.wait_for(Option::is_some).await;
            }
        });
        let all = futures::future::join_all(waits);

        match self.url_timeout {
            Some(limit) => {
                if tokio::time::timeout(limit, all).await.is_err() {
                    tracing::warn!("Timed out after {:?} waiting for tunnel URLs", limit);
                }
            }
            None => {
                all.await;
            }
        }

        let urls = self.urls();
        for p in &self.processes {
            if p.url.borrow().is_none() {
                tracing::warn!("Tunnel '{}' did not report a URL", p.spec.name());
            }
        }
        urls
    }

    /// Per-tunnel URL, status and recent output, including tunnels that failed to spawn.
    pub fn reports(&self) -> Vec<TunnelReport> {
        let state = self.state.current();
        let mut reports: Vec<TunnelReport> = self
            .processes
            .iter()
            .map(|p| TunnelReport {
                name: p.spec.name().to_string(),
                url: p.url.borrow().clone(),
                status: p.status(state),
                recent_output: lock_output(&p.output).lines(),
            })
            .collect();
        reports.extend(self.failures.iter().map(|f| TunnelReport {
            name: f.name.clone(),
            url: None,
            status: TunnelStatus::SpawnFailed(f.reason.clone()),
            recent_output: Vec::new(),
        }));
        reports
    }

    /// Terminate every tunnel. Safe to call repeatedly.
    pub async fn stop(&mut self) {
        match self.state.current() {
            SupervisorState::Stopped | SupervisorState::Stopping => return,
            SupervisorState::Idle => {
                let _ = self.state.transition_to_stopped();
                return;
            }
            SupervisorState::Starting | SupervisorState::Running => {}
        }
        if self.state.transition_to_stopping().is_err() {
            return;
        }

        for p in &self.processes {
            if let Some(pid) = p.pid {
                tracing::info!("Stopping tunnel '{}'", p.spec.name());
                signal_group(pid, GroupSignal::Terminate);
            }
        }

        let deadline = tokio::time::Instant::now() + self.grace_period;
        for p in &mut self.processes {
            let Some(mut child) = p.child.take() else {
                continue;
            };
            match tokio::time::timeout_at(deadline, child.wait()).await {
                Ok(Ok(status)) => {
                    tracing::debug!("Tunnel '{}' exited: {}", p.spec.name(), status);
                }
                Ok(Err(e)) => {
                    tracing::warn!("Failed to reap tunnel '{}': {}", p.spec.name(), e);
                }
                Err(_) => {
                    tracing::warn!(
                        "Tunnel '{}' ignored SIGTERM for {:?}, killing",
                        p.spec.name(),
                        self.grace_period
                    );
                    if let Some(pid) = p.pid {
                        signal_group(pid, GroupSignal::Kill);
                    }
                    let _ = child.kill().await;
                }
            }
        }

        for p in &mut self.processes {
            if let Some(handle) = p.reader.take() {
                let abort = handle.abort_handle();
                // Detached grandchildren can hold the pipes open.
                if tokio::time::timeout(self.grace_period, handle).await.is_err() {
                    abort.abort();
                }
            }
        }

        let _ = self.state.transition_to_stopped();
        tracing::info!("All tunnels stopped");
    }

    /// Start the tunnels, run `body`, then stop the tunnels whatever `body` returned.
    ///
    /// While `body` runs, the URL wait (bounded by the URL timeout) runs beside it so
    /// tunnels that never report are logged. Spawn failures are logged and do not
    /// prevent `body` from running.
    pub async fn run_scoped<F>(&mut self, body: F) -> Result<ScopedRun<F::Output>, TunnelError>
    where
        F: Future,
    {
        match self.start() {
            Ok(()) => {}
            Err(TunnelError::Spawn { failures }) => {
                tracing::warn!(
                    "Continuing with {} of {} tunnel(s); failed: {}",
                    self.processes.len(),
                    self.specs.len(),
                    join_failures(&failures)
                );
            }
            Err(e) => return Err(e),
        }

        tokio::pin!(body);
        let (finished, urls) = tokio::select! {
            output = &mut body => (Some(output), None),
            urls = self.wait_for_urls() => (None, Some(urls)),
        };
        if let Some(urls) = &urls {
            tracing::info!(
                "{} of {} tunnel(s) reported a URL",
                urls.len(),
                self.processes.len()
            );
        }
        let output = match finished {
            Some(output) => output,
            None => body.await,
        };

        self.stop().await;
        Ok(ScopedRun { output, urls })
    }
}

impl Drop for TunnelSupervisor {
    fn drop(&mut self) {
        for p in &mut self.processes {
            if let Some(mut child) = p.child.take() {
                if let Some(pid) = p.pid {
                    signal_group(pid, GroupSignal::Kill);
                }
                let _ = child.start_kill();
            }
            if let Some(handle) = p.reader.take() {
                handle.abort();
            }
        }
    }
}
