//! # Asset Downloads
//!
//! Turns a [`ResolvedManifest`] into shell commands and runs them group by group:
//!
//! - extension entries are `git clone`d inside the extensions directory;
//! - file entries are fetched with `aria2c` (16 connections, resumable), with an
//!   `Authorization: Bearer` header for Hugging Face URLs when a token is set;
//! - `fuse:` entries are symlinked into the destination.

use crate::{
    manifest::{ManifestEntry, ResolvedGroup, ResolvedManifest, is_huggingface_url},
    runner::{BatchSummary, CommandRunner, CommandSpec, escape_path, escape_shell_argument},
    terminal_output::{TerminalOutput, format_secs},
};
use std::path::Path;
use std::time::Instant;

const ARIA2_FLAGS: &str = "--console-log-level=error -c -x 16 -s 16 -k 1M";

#[derive(Debug, Clone, Default)]
pub struct AssetDownloader {
    hf_token: Option<String>,
}

impl AssetDownloader {
    pub fn new(hf_token: Option<String>) -> Self {
        Self {
            hf_token: hf_token.filter(|t| !t.is_empty()),
        }
    }

    /// Command for one entry of `group`. `None` when the entry has nothing to fetch.
    pub fn command_for(&self, group: &ResolvedGroup, entry: &ManifestEntry) -> Option<CommandSpec> {
        let dst = &group.destination;
        match entry {
            ManifestEntry::Fuse { path } => fuse_spec(Path::new(path), dst),
            _ if group.category.is_extension() => {
                let url = entry.url()?;
                Some(CommandSpec::new(
                    format!("cd {} && git clone {}", escape_path(dst), escape_shell_argument(url)),
                    format!("Clone {url}"),
                ))
            }
            _ => {
                let url = entry.url()?;
                let mut command = format!("aria2c {ARIA2_FLAGS} -d {}", escape_path(dst));
                if let Some(name) = entry.filename() {
                    command.push_str(&format!(" -o {}", escape_shell_argument(&name)));
                }
                if let Some(token) = self.hf_token.as_deref()
                    && is_huggingface_url(url)
                {
                    let header = format!("Authorization: Bearer {token}");
                    command.push_str(&format!(" --header={}", escape_shell_argument(&header)));
                }
                command.push(' ');
                command.push_str(&escape_shell_argument(url));
                let label = entry.filename().unwrap_or_else(|| url.to_string());
                Some(CommandSpec::new(command, format!("Download {label}")))
            }
        }
    }

    pub fn commands_for(&self, group: &ResolvedGroup) -> Vec<CommandSpec> {
        group
            .entries
            .iter()
            .filter_map(|entry| self.command_for(group, entry))
            .collect()
    }

    /// Download every group in order. Failed entries are counted, never fatal.
    pub async fn download(
        &self,
        manifest: &ResolvedManifest,
        runner: &CommandRunner,
        capture_output: bool,
    ) -> BatchSummary {
        let start = Instant::now();
        let mut summary = BatchSummary::default();

        for warning in &manifest.warnings {
            TerminalOutput::info(&warning.to_string()).await;
        }

        for group in &manifest.groups {
            let commands = self.commands_for(group);
            if commands.is_empty() {
                continue;
            }
            if let Err(e) = tokio::fs::create_dir_all(&group.destination).await {
                tracing::warn!(
                    "Could not create {}: {}",
                    group.destination.display(),
                    e
                );
            }
            TerminalOutput::rule().await;
            TerminalOutput::info(&format!("[+] Downloading {}.", group.key)).await;
            summary.merge(runner.run_batch(&commands, capture_output).await);
        }

        summary.elapsed = start.elapsed();
        TerminalOutput::rule().await;
        TerminalOutput::info(&format!(
            "[+] Download completed within {} secs.",
            format_secs(summary.elapsed)
        ))
        .await;
        summary
    }
}

/// `ln -sfn <path> <dst>/<name>`
fn fuse_spec(path: &Path, dst: &Path) -> Option<CommandSpec> {
    let name = path.file_name()?;
    Some(CommandSpec::new(
        format!("ln -sfn {} {}", escape_path(path), escape_path(&dst.join(name))),
        format!("Link {}", path.display()),
    ))
}
