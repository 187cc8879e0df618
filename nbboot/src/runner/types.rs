use std::time::Duration;
use thiserror::Error;

/// A shell command plus the human-readable label printed while it runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub command: String,
    pub description: String,
}

impl CommandSpec {
    pub fn new(command: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            description: description.into(),
        }
    }
}

impl<C: Into<String>, D: Into<String>> From<(C, D)> for CommandSpec {
    fn from((command, description): (C, D)) -> Self {
        Self::new(command, description)
    }
}

/// Output of a command that exited successfully.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    /// Combined stdout/stderr text, in arrival order. `None` unless captured.
    pub output: Option<String>,
}

/// Why a command counts as failed.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("exited with status {code}")]
    NonZeroExit { code: i32, output: Option<String> },

    #[error("failed to spawn shell: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("timed out after {0:?}")]
    TimedOut(Duration),

    #[error("worker panicked: {0}")]
    Panicked(String),
}

impl CommandError {
    /// Captured output attached to the failure, if any.
    pub fn output(&self) -> Option<&str> {
        match self {
            CommandError::NonZeroExit { output, .. } => output.as_deref(),
            _ => None,
        }
    }

    /// Exit code of the process. Signals and spawn failures have none.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            CommandError::NonZeroExit { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Outcome of one executed command. Write-once; `succeeded` is derived.
#[derive(Debug)]
pub struct CommandResult {
    pub description: String,
    pub outcome: Result<CommandOutput, CommandError>,
    pub elapsed: Duration,
}

impl CommandResult {
    pub fn succeeded(&self) -> bool {
        self.outcome.is_ok()
    }

    /// Captured text regardless of success.
    pub fn output(&self) -> Option<&str> {
        match &self.outcome {
            Ok(out) => out.output.as_deref(),
            Err(e) => e.output(),
        }
    }
}

/// Success/error counts folded from a set of results.
#[derive(Debug, Default)]
pub struct BatchSummary {
    pub success_count: usize,
    pub error_count: usize,
    pub elapsed: Duration,
    pub results: Vec<CommandResult>,
}

impl BatchSummary {
    pub fn from_results(results: Vec<CommandResult>, elapsed: Duration) -> Self {
        let success_count = results.iter().filter(|r| r.succeeded()).count();
        Self {
            success_count,
            error_count: results.len() - success_count,
            elapsed,
            results,
        }
    }

    /// Fold another phase into this one. Elapsed times add up.
    pub fn merge(&mut self, other: BatchSummary) {
        self.success_count += other.success_count;
        self.error_count += other.error_count;
        self.elapsed += other.elapsed;
        self.results.extend(other.results);
    }

    pub fn total(&self) -> usize {
        self.success_count + self.error_count
    }

    pub fn failures(&self) -> impl Iterator<Item = &CommandResult> {
        self.results.iter().filter(|r| !r.succeeded())
    }

    /// `N of M commands failed. All completed within: T secs`
    pub fn summary_line(&self) -> String {
        format!(
            "{} of {} commands failed. All completed within: {} secs",
            self.error_count,
            self.total(),
            crate::terminal_output::format_secs(self.elapsed)
        )
    }
}
