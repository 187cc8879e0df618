//! # Terminal Output
//!
//! Human-readable progress lines for the notebook cell. Everything here goes to
//! `stdout`, which is what notebook frontends render inline; structured diagnostics
//! go through `tracing` and end up in the log file instead.
//!
//! Line formats:
//!
//! ```text
//! [+] Installing initial requirements
//!     > Install aria2
//! Error at [Install aria2]: exited with status 100
//! [+] Installing initial requirements completed in: 12.31 secs
//! [+] 1 of 10 commands failed. All completed within: 95.02 secs
//! * Running on: https://abc123.trycloudflare.com
//! ```

use std::time::Duration;
use tokio::io::{AsyncWriteExt, stdout};

const RULE_WIDTH: usize = 80;

/// Terminal output utility for bootstrap progress.
pub struct TerminalOutput;

impl TerminalOutput {
    async fn write_line(line: &str) {
        let mut out = stdout();
        let mut buf = String::with_capacity(line.len() + 1);
        buf.push_str(line);
        buf.push('\n');
        // One write per line keeps lines from concurrent tasks intact.
        let _ = out.write_all(buf.as_bytes()).await;
        let _ = out.flush().await;
    }

    /// `[+] <title>`
    pub async fn section(title: &str) {
        Self::write_line(&format!("[+] {title}")).await;
    }

    /// `[+] <title> completed in: <secs> secs`
    pub async fn section_done(title: &str, elapsed: Duration) {
        Self::write_line(&format!(
            "[+] {title} completed in: {} secs",
            format_secs(elapsed)
        ))
        .await;
    }

    pub async fn step(description: &str) {
        Self::write_line(&format!("    > {description}")).await;
    }

    pub async fn step_failed(description: &str, error: &(dyn std::fmt::Display + Sync)) {
        let line = format_step_failed(description, error);
        Self::write_line(&line).await;
    }

    /// Echo captured subprocess output, skipping whitespace-only content.
    pub async fn command_output(content: &str) {
        if !should_display(content) {
            return;
        }
        Self::write_line(content.trim_end()).await;
    }

    /// Announce a public tunnel URL.
    pub async fn tunnel_url(url: &str, note: Option<&str>) {
        Self::write_line(&format_tunnel_line(url, note)).await;
    }

    pub async fn info(message: &str) {
        Self::write_line(message).await;
    }

    /// Horizontal rule between phases.
    pub async fn rule() {
        Self::write_line(&"-".repeat(RULE_WIDTH)).await;
    }
}

/// Seconds with two decimals, as used in every elapsed-time line.
pub fn format_secs(elapsed: Duration) -> String {
    format!("{:.2}", elapsed.as_secs_f64())
}

pub fn format_step_failed(description: &str, error: &dyn std::fmt::Display) -> String {
    format!("Error at [{description}]: {error}")
}

pub fn format_tunnel_line(url: &str, note: Option<&str>) -> String {
    match note {
        Some(note) if !note.is_empty() => format!("* Running on: {url} {note}"),
        _ => format!("* Running on: {url}"),
    }
}

/// Returns true when `content` has anything besides whitespace.
pub fn should_display(content: &str) -> bool {
    !content.trim().is_empty()
}
