//! # Command Runner
//!
//! Executes opaque shell commands (package installs, archive downloads, git updates)
//! and reports success and elapsed time for each.
//!
//! ## Execution modes
//!
//! - **`run`**: one command through `sh -c`. With `capture_output` the combined
//!   stdout/stderr lines are collected in arrival order; otherwise output is discarded.
//! - **`run_batch`**: strictly sequential, in list order. A failure never stops the batch.
//! - **`run_parallel`**: a bounded pool (a `Semaphore` over a `JoinSet`). Results are
//!   gathered as tasks complete. A panicking worker is counted as a failure and does not
//!   cancel its siblings.
//!
//! Individual failures are data, carried in [`CommandResult::outcome`]. Callers fold
//! them into a [`BatchSummary`] and print one aggregate line at the end.

mod process;
mod quote;
mod types;

pub use process::{GroupSignal, isolate_group, signal_group};
pub use quote::{escape_path, escape_shell_argument};
pub use types::{BatchSummary, CommandError, CommandOutput, CommandResult, CommandSpec};

use crate::terminal_output::TerminalOutput;
use futures::FutureExt;
use std::{
    any::Any,
    future::Future,
    panic::AssertUnwindSafe,
    path::PathBuf,
    process::{ExitStatus, Stdio},
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::{Child, Command},
    sync::Semaphore,
    task::JoinSet,
};

/// Default size of the parallel worker pool.
pub const DEFAULT_MAX_WORKERS: usize = 4;

/// Shell command executor.
///
/// Cheap to clone; the parallel pool hands a clone to every worker.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    shell: String,
    working_dir: Option<PathBuf>,
    timeout: Option<Duration>,
    /// Echo captured output to the terminal (debug mode).
    echo: bool,
    /// Print the `> description` progress line for each command.
    announce: bool,
}

impl Default for CommandRunner {
    fn default() -> Self {
        Self {
            shell: "sh".to_string(),
            working_dir: None,
            timeout: None,
            echo: false,
            announce: true,
        }
    }
}

impl CommandRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Per-command time limit. `None` waits forever.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    /// Suppress the per-command progress lines.
    pub fn quiet(mut self) -> Self {
        self.announce = false;
        self
    }

    /// Run a single command and record its outcome.
    pub async fn run(&self, spec: &CommandSpec, capture_output: bool) -> CommandResult {
        if self.announce {
            TerminalOutput::step(&spec.description).await;
        }
        tracing::debug!(command = %spec.command, "Running '{}'", spec.description);

        let start = Instant::now();
        let outcome = self.execute(&spec.command, capture_output).await;
        let elapsed = start.elapsed();

        match &outcome {
            Ok(out) => {
                tracing::debug!("'{}' finished in {:?}", spec.description, elapsed);
                if self.echo
                    && let Some(text) = &out.output
                {
                    TerminalOutput::command_output(text).await;
                }
            }
            Err(e) => {
                tracing::warn!("'{}' failed after {:?}: {}", spec.description, elapsed, e);
                if self.announce {
                    TerminalOutput::step_failed(&spec.description, e).await;
                }
                if self.echo
                    && let Some(text) = e.output()
                {
                    TerminalOutput::command_output(text).await;
                }
            }
        }

        CommandResult {
            description: spec.description.clone(),
            outcome,
            elapsed,
        }
    }

    /// Run every command in order. Later commands run even if earlier ones fail.
    pub async fn run_batch(&self, commands: &[CommandSpec], capture_output: bool) -> BatchSummary {
        let start = Instant::now();
        let mut results = Vec::with_capacity(commands.len());
        for spec in commands {
            results.push(self.run(spec, capture_output).await);
        }
        BatchSummary::from_results(results, start.elapsed())
    }

    /// Run commands on a pool of at most `max_workers` concurrent processes.
    ///
    /// `results` are in completion order, not submission order.
    pub async fn run_parallel(
        &self,
        commands: Vec<CommandSpec>,
        capture_output: bool,
        max_workers: usize,
    ) -> BatchSummary {
        let runner = self.clone();
        run_pool(commands, max_workers, move |spec| {
            let runner = runner.clone();
            async move { runner.run(&spec, capture_output).await }
        })
        .await
    }

    async fn execute(&self, command: &str, capture: bool) -> Result<CommandOutput, CommandError> {
        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        if capture {
            cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        } else {
            cmd.stdout(Stdio::null()).stderr(Stdio::null());
        }
        isolate_group(&mut cmd);

        let mut child = cmd.spawn()?;

        let (status, output) = match self.timeout {
            Some(limit) => {
                match tokio::time::timeout(limit, wait_collecting(&mut child, capture)).await {
                    Ok(result) => result?,
                    Err(_) => {
                        if let Some(pid) = child.id() {
                            signal_group(pid, GroupSignal::Kill);
                        }
                        let _ = child.kill().await;
                        return Err(CommandError::TimedOut(limit));
                    }
                }
            }
            None => wait_collecting(&mut child, capture).await?,
        };

        if status.success() {
            Ok(CommandOutput { output })
        } else {
            Err(CommandError::NonZeroExit {
                code: status.code().unwrap_or(-1),
                output,
            })
        }
    }
}

/// Drain piped stdout/stderr line by line, then reap the child.
async fn wait_collecting(
    child: &mut Child,
    capture: bool,
) -> std::io::Result<(ExitStatus, Option<String>)> {
    let mut lines = Vec::new();

    if let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) {
        let mut stdout_lines = BufReader::new(stdout).lines();
        let mut stderr_lines = BufReader::new(stderr).lines();
        let (mut stdout_open, mut stderr_open) = (true, true);

        while stdout_open || stderr_open {
            tokio::select! {
                line = stdout_lines.next_line(), if stdout_open => match line {
                    Ok(Some(line)) => lines.push(line),
                    Ok(None) => stdout_open = false,
                    Err(e) => {
                        tracing::warn!("Error reading stdout: {}", e);
                        stdout_open = false;
                    }
                },
                line = stderr_lines.next_line(), if stderr_open => match line {
                    Ok(Some(line)) => lines.push(line),
                    Ok(None) => stderr_open = false,
                    Err(e) => {
                        tracing::warn!("Error reading stderr: {}", e);
                        stderr_open = false;
                    }
                },
            }
        }
    }

    let status = child.wait().await?;
    Ok((status, capture.then(|| lines.join("\n"))))
}

/// Bounded fan-out of `job` over `commands`, collecting results as they complete.
pub(crate) async fn run_pool<F, Fut>(
    commands: Vec<CommandSpec>,
    max_workers: usize,
    job: F,
) -> BatchSummary
where
    F: Fn(CommandSpec) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = CommandResult> + Send + 'static,
{
    let start = Instant::now();
    let permits = Arc::new(Semaphore::new(max_workers.max(1)));
    let job = Arc::new(job);
    let mut tasks = JoinSet::new();

    for spec in commands {
        let permits = permits.clone();
        let job = job.clone();
        tasks.spawn(async move {
            let _permit = permits.acquire_owned().await;
            let description = spec.description.clone();
            let started = Instant::now();
            match AssertUnwindSafe(async move { job(spec).await })
                .catch_unwind()
                .await
            {
                Ok(result) => result,
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    tracing::error!("Worker for '{}' panicked: {}", description, message);
                    CommandResult {
                        description,
                        outcome: Err(CommandError::Panicked(message)),
                        elapsed: started.elapsed(),
                    }
                }
            }
        });
    }

    let mut results = Vec::with_capacity(tasks.len());
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(result) => results.push(result),
            Err(e) => {
                tracing::error!("Worker task failed to join: {}", e);
                results.push(CommandResult {
                    description: "worker task".to_string(),
                    outcome: Err(CommandError::Panicked(e.to_string())),
                    elapsed: Duration::ZERO,
                });
            }
        }
    }

    BatchSummary::from_results(results, start.elapsed())
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::logging::init_test_logging;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_pool_counts_panicking_worker_as_failure() {
        init_test_logging();
        let commands: Vec<CommandSpec> = (0..5)
            .map(|i| CommandSpec::new(format!("job {i}"), format!("job {i}")))
            .collect();

        let summary = run_pool(commands, 2, |spec| async move {
            if spec.description == "job 3" {
                panic!("job 3 exploded");
            }
            CommandResult {
                description: spec.description,
                outcome: Ok(CommandOutput::default()),
                elapsed: Duration::ZERO,
            }
        })
        .await;

        assert_eq!(summary.total(), 5);
        assert_eq!(summary.success_count, 4);
        assert_eq!(summary.error_count, 1);
        let failed = summary.failures().next().unwrap();
        assert_eq!(failed.description, "job 3");
        assert!(matches!(
            &failed.outcome,
            Err(CommandError::Panicked(msg)) if msg.contains("exploded")
        ));
    }

    #[tokio::test]
    async fn test_pool_respects_worker_bound() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let commands: Vec<CommandSpec> = (0..8)
            .map(|i| CommandSpec::new("", format!("job {i}")))
            .collect();

        let (a, p) = (active.clone(), peak.clone());
        let summary = run_pool(commands, 3, move |spec| {
            let (active, peak) = (a.clone(), p.clone());
            async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                CommandResult {
                    description: spec.description,
                    outcome: Ok(CommandOutput::default()),
                    elapsed: Duration::ZERO,
                }
            }
        })
        .await;

        assert_eq!(summary.success_count, 8);
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    /// Fisher-Yates over `0..n` driven by a 64-bit LCG, so the order is fixed per seed.
    fn seeded_permutation(n: usize, seed: u64) -> Vec<usize> {
        let mut order: Vec<usize> = (0..n).collect();
        let mut state = seed;
        for i in (1..n).rev() {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            let j = ((state >> 33) % (i as u64 + 1)) as usize;
            order.swap(i, j);
        }
        order
    }

    #[tokio::test]
    async fn test_pool_seeded_interleaving() {
        const JOBS: usize = 10;
        let ranks = seeded_permutation(JOBS, 0x5EED);
        assert_eq!(ranks, [1, 5, 3, 7, 2, 6, 8, 9, 0, 4]);

        // job i sleeps ranks[i] steps and fails when its rank is a multiple of 3
        let expected_failures = ranks.iter().filter(|r| *r % 3 == 0).count();
        let mut by_rank: Vec<usize> = (0..JOBS).collect();
        by_rank.sort_by_key(|&i| ranks[i]);
        let expected_order: Vec<String> = by_rank.iter().map(|i| format!("job {i}")).collect();
        let submitted: Vec<String> = (0..JOBS).map(|i| format!("job {i}")).collect();
        assert_ne!(expected_order, submitted);

        let commands: Vec<CommandSpec> = submitted
            .iter()
            .map(|d| CommandSpec::new("", d.clone()))
            .collect();
        let job_ranks = Arc::new(ranks);
        let summary = run_pool(commands, JOBS, move |spec| {
            let ranks = job_ranks.clone();
            async move {
                let index: usize = spec
                    .description
                    .trim_start_matches("job ")
                    .parse()
                    .unwrap();
                let rank = ranks[index];
                tokio::time::sleep(Duration::from_millis(25 * rank as u64)).await;
                let outcome = if rank % 3 == 0 {
                    Err(CommandError::NonZeroExit {
                        code: 1,
                        output: None,
                    })
                } else {
                    Ok(CommandOutput::default())
                };
                CommandResult {
                    description: spec.description,
                    outcome,
                    elapsed: Duration::ZERO,
                }
            }
        })
        .await;

        assert_eq!(expected_failures, 4);
        assert_eq!(summary.error_count, expected_failures);
        assert_eq!(summary.success_count, JOBS - expected_failures);
        let completed: Vec<&str> = summary
            .results
            .iter()
            .map(|r| r.description.as_str())
            .collect();
        assert_eq!(completed, expected_order);
    }

    #[test]
    fn test_run_future_is_send() {
        fn assert_send<T: Send>(_: &T) {}
        let runner = CommandRunner::new();
        let spec = CommandSpec::new("true", "noop");
        let fut = runner.run(&spec, false);
        assert_send(&fut);
    }

    #[tokio::test]
    async fn test_zero_workers_still_runs() {
        let summary = CommandRunner::new()
            .quiet()
            .run_parallel(vec![CommandSpec::new("true", "noop")], false, 0)
            .await;
        assert_eq!(summary.success_count, 1);
    }

    #[test]
    fn test_panic_message_variants() {
        let s: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(s.as_ref()), "static");
        let s: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(s.as_ref()), "owned");
        let s: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(s.as_ref()), "unknown panic");
    }
}
