//! Per-tunnel output scanning.
//!
//! A [`TunnelReader`] drains a child's stdout and stderr line by line. The first line
//! matching the tunnel's pattern fills the URL slot; every line lands in a bounded
//! [`OutputBuffer`] so a tunnel that never reports a URL can still be diagnosed.

use super::spec::extract_url;
use crate::terminal_output::TerminalOutput;
use regex::Regex;
use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    sync::watch,
};

/// Number of recent output lines retained per tunnel.
pub const TUNNEL_OUTPUT_LINES: usize = 100;

/// Fixed-capacity FIFO of recent lines. Oldest lines are evicted first.
#[derive(Debug, Clone)]
pub struct OutputBuffer {
    lines: VecDeque<String>,
    capacity: usize,
}

impl OutputBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, line: String) {
        if self.lines.len() >= self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.iter().cloned().collect()
    }
}

impl Default for OutputBuffer {
    fn default() -> Self {
        Self::new(TUNNEL_OUTPUT_LINES)
    }
}

/// Shared handle to a tunnel's output buffer.
pub type SharedOutput = Arc<Mutex<OutputBuffer>>;

pub(crate) fn lock_output(buffer: &SharedOutput) -> std::sync::MutexGuard<'_, OutputBuffer> {
    buffer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Scans one tunnel's output. Consumed by [`TunnelReader::run`].
pub struct TunnelReader {
    pub name: String,
    pub pattern: Regex,
    pub note: Option<String>,
    pub url: watch::Sender<Option<String>>,
    pub output: SharedOutput,
    /// Print `* Running on: ...` when the URL is found.
    pub announce: bool,
}

impl TunnelReader {
    /// Record one line. Returns the URL if this line set the slot.
    pub async fn consume_line(&self, line: String) -> Option<String> {
        let found = extract_url(&self.pattern, &line).map(str::to_string);
        lock_output(&self.output).push(line);

        let url = found?;
        let recorded = self.url.send_if_modified(|slot| {
            if slot.is_none() {
                *slot = Some(url.clone());
                true
            } else {
                false
            }
        });
        if !recorded {
            tracing::trace!("Ignoring later URL match for '{}': {}", self.name, url);
            return None;
        }

        tracing::info!("Tunnel '{}' is reachable at {}", self.name, url);
        if self.announce {
            TerminalOutput::tunnel_url(&url, self.note.as_deref()).await;
        }
        Some(url)
    }

    /// Read both streams until they close.
    pub async fn run<O, E>(self, stdout: Option<O>, stderr: Option<E>)
    where
        O: AsyncRead + Unpin,
        E: AsyncRead + Unpin,
    {
        let mut stdout_lines = stdout.map(|s| BufReader::new(s).lines());
        let mut stderr_lines = stderr.map(|s| BufReader::new(s).lines());

        loop {
            let (stdout_open, stderr_open) = (stdout_lines.is_some(), stderr_lines.is_some());
            if !stdout_open && !stderr_open {
                break;
            }

            tokio::select! {
                line = next_line(&mut stdout_lines), if stdout_open => match line {
                    Some(line) => { self.consume_line(line).await; }
                    None => stdout_lines = None,
                },
                line = next_line(&mut stderr_lines), if stderr_open => match line {
                    Some(line) => { self.consume_line(line).await; }
                    None => stderr_lines = None,
                },
            }
        }

        if self.url.borrow().is_none() {
            tracing::warn!(
                "Tunnel '{}' closed its output without reporting a URL",
                self.name
            );
        } else {
            tracing::debug!("Tunnel '{}' output closed", self.name);
        }
    }
}

async fn next_line<R>(lines: &mut Option<tokio::io::Lines<BufReader<R>>>) -> Option<String>
where
    R: AsyncRead + Unpin,
{
    let lines = lines.as_mut()?;
    match lines.next_line().await {
        Ok(line) => line,
        Err(e) => {
            tracing::warn!("Error reading tunnel output: {}", e);
            None
        }
    }
}
