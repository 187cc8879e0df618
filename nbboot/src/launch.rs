//! # UI Launch
//!
//! Builds the foreground command for the installed UI and runs it inside the tunnel
//! supervisor's scope. The UI inherits the notebook's stdio. Cancelling the token
//! (Ctrl-C in the driver) terminates the UI's process group; the tunnels are stopped
//! either way once the UI is gone.

use crate::{
    config::BootstrapConfig,
    platform::{PlatformConfig, UiFlavor},
    runner::{
        CommandResult, CommandRunner, CommandSpec, GroupSignal, escape_path,
        escape_shell_argument, isolate_group, signal_group,
    },
    tunnel::{TunnelError, TunnelSupervisor, zrok_enable_command},
};
use chrono::{DateTime, TimeDelta, Utc};
use std::{
    path::{Path, PathBuf},
    process::{ExitStatus, Stdio},
    time::Duration,
};
use thiserror::Error;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Time the UI gets to exit after SIGTERM before it is killed.
pub const UI_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Subtracted from the recorded start so the timer does not begin at zero.
const TIMER_OFFSET_SECS: i64 = 5;

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("Failed to start UI: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Failed waiting for UI: {0}")]
    Wait(#[source] std::io::Error),

    #[error("Failed to write session timer {}: {source}", .path.display())]
    Timer {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Tunnel(#[from] TunnelError),
}

/// How the foreground UI ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchOutcome {
    Exited(ExitStatus),
    Interrupted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchPlan {
    pub flavor: UiFlavor,
    pub ui_root: PathBuf,
    pub port: u16,
    pub ngrok_token: Option<String>,
    pub extra_args: Vec<String>,
}

impl LaunchPlan {
    pub fn new(platform: &PlatformConfig, config: &BootstrapConfig) -> Self {
        Self {
            flavor: config.ui,
            ui_root: config.ui.ui_root(platform),
            port: config.port(),
            ngrok_token: config.ngrok_token.clone().filter(|t| !t.is_empty()),
            extra_args: config.launch_args.clone(),
        }
    }

    pub fn command(&self) -> String {
        let mut command = format!("cd {} && ", escape_path(&self.ui_root));
        match self.flavor {
            UiFlavor::ComfyUi => {
                command.push_str(&format!("python main.py --listen --port {}", self.port));
            }
            UiFlavor::Sdw => {
                command.push_str(&format!("python launch.py --port={}", self.port));
                if let Some(token) = &self.ngrok_token {
                    command.push_str(&format!(" --ngrok {}", escape_shell_argument(token)));
                }
                command.push_str(
                    " --api --xformers --theme dark --enable-insecure-extension-access \
                     --disable-console-progressbars --disable-safe-unpickle --no-half-vae",
                );
            }
        }
        for arg in &self.extra_args {
            command.push(' ');
            command.push_str(&escape_shell_argument(arg));
        }
        command
    }

    /// `static/colabTimer.txt` for sdw, which shows session uptime from it.
    pub fn timer_file(&self) -> Option<PathBuf> {
        match self.flavor {
            UiFlavor::Sdw => Some(self.ui_root.join("static").join("colabTimer.txt")),
            UiFlavor::ComfyUi => None,
        }
    }
}

/// Epoch seconds written to the session timer for a session started at `started`.
pub fn timer_epoch(started: DateTime<Utc>) -> i64 {
    (started - TimeDelta::seconds(TIMER_OFFSET_SECS)).timestamp()
}

pub async fn write_session_timer(path: &Path, started: DateTime<Utc>) -> Result<(), LaunchError> {
    let timer_err = |source| LaunchError::Timer {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(timer_err)?;
    }
    tokio::fs::write(path, timer_epoch(started).to_string())
        .await
        .map_err(timer_err)
}

/// Register this machine with zrok. Output is captured, not shown.
pub async fn enable_zrok(runner: &CommandRunner, token: &str) -> CommandResult {
    let spec = CommandSpec::new(zrok_enable_command(token), "Enable zrok");
    runner.clone().quiet().run(&spec, true).await
}

/// Run `command` in the foreground until it exits or `cancel` fires.
pub async fn run_ui(command: &str, cancel: CancellationToken) -> Result<LaunchOutcome, LaunchError> {
    tracing::info!("Launching UI: {}", command);
    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .kill_on_drop(true);
    isolate_group(&mut cmd);

    let mut child = cmd.spawn().map_err(LaunchError::Spawn)?;
    let pid = child.id();

    tokio::select! {
        status = child.wait() => {
            let status = status.map_err(LaunchError::Wait)?;
            tracing::info!("UI exited: {}", status);
            Ok(LaunchOutcome::Exited(status))
        }
        _ = cancel.cancelled() => {
            tracing::info!("Interrupted, stopping UI");
            if let Some(pid) = pid {
                signal_group(pid, GroupSignal::Terminate);
            }
            if tokio::time::timeout(UI_GRACE_PERIOD, child.wait()).await.is_err() {
                if let Some(pid) = pid {
                    signal_group(pid, GroupSignal::Kill);
                }
                let _ = child.kill().await;
            }
            Ok(LaunchOutcome::Interrupted)
        }
    }
}

/// Write the session timer if the flavour uses one, then run the UI with the tunnels up.
pub async fn launch(
    plan: &LaunchPlan,
    supervisor: &mut TunnelSupervisor,
    cancel: CancellationToken,
) -> Result<LaunchOutcome, LaunchError> {
    if let Some(path) = plan.timer_file()
        && let Err(e) = write_session_timer(&path, Utc::now()).await
    {
        tracing::warn!("{}", e);
    }
    let command = plan.command();
    let run = supervisor.run_scoped(run_ui(&command, cancel)).await?;
    if run.urls.is_none() {
        tracing::debug!("UI ended before every tunnel reported");
    }
    run.output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::Platform;

    fn plan(flavor: UiFlavor) -> LaunchPlan {
        let config = BootstrapConfig {
            ui: flavor,
            ..Default::default()
        };
        LaunchPlan::new(&PlatformConfig::new(Platform::Kaggle), &config)
    }

    #[test]
    fn test_comfyui_command() {
        assert_eq!(
            plan(UiFlavor::ComfyUi).command(),
            "cd '/home/ComfyUI' && python main.py --listen --port 8188"
        );
        assert_eq!(plan(UiFlavor::ComfyUi).timer_file(), None);
    }

    #[test]
    fn test_sdw_command_with_ngrok_and_extra_args() {
        let mut plan = plan(UiFlavor::Sdw);
        plan.ngrok_token = Some("tok".into());
        plan.extra_args = vec!["--medvram".into()];
        let command = plan.command();
        assert!(command.starts_with("cd '/home/sdw' && python launch.py --port=7860 --ngrok 'tok' --api"));
        assert!(command.ends_with("--no-half-vae '--medvram'"));
        assert_eq!(
            plan.timer_file(),
            Some(PathBuf::from("/home/sdw/static/colabTimer.txt"))
        );
    }

    #[test]
    fn test_sdw_command_without_ngrok() {
        assert!(!plan(UiFlavor::Sdw).command().contains("--ngrok"));
    }

    #[tokio::test]
    async fn test_session_timer_is_backdated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("static/colabTimer.txt");
        let started = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        write_session_timer(&path, started).await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "1699999995");
    }

    #[tokio::test]
    async fn test_run_ui_reports_exit_status() {
        let outcome = run_ui("exit 3", CancellationToken::new()).await.unwrap();
        match outcome {
            LaunchOutcome::Exited(status) => assert_eq!(status.code(), Some(3)),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_run_ui_cancelled() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });
        let started = std::time::Instant::now();
        let outcome = run_ui("sleep 30", cancel).await.unwrap();
        assert_eq!(outcome, LaunchOutcome::Interrupted);
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
