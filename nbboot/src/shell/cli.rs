//! # nbboot CLI
//!
//! Command-line definition and the top-level bootstrap sequence:
//!
//! 1. detect the platform (fatal when unknown);
//! 2. load the TOML configuration and apply flag overrides;
//! 3. run the install plan and probe the GPU runtime;
//! 4. resolve the manifest and download assets;
//! 5. print the aggregate summary;
//! 6. open tunnels and run the UI until it exits or Ctrl-C.
//!
//! Individual command failures only show up in the summary line. The process exits
//! non-zero only for detection, configuration or logging failures.

use crate::{
    assets::AssetDownloader,
    config::{BootstrapConfig, load_config},
    install::{InstallPlan, TorchInfo},
    launch::{LaunchOutcome, LaunchPlan, enable_zrok, launch},
    manifest::{ManifestSource, UiLayout, parse_manifest, resolve},
    platform::{PlatformConfig, UiFlavor},
    public_ip,
    runner::{BatchSummary, CommandRunner},
    terminal_output::TerminalOutput,
    tunnel::{TunnelSupervisor, default_tunnels},
    utils::logging::init_logging,
};
use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

/// nbboot: bootstrap a Stable-Diffusion web UI inside a Colab or Kaggle notebook.
#[derive(Parser, Debug, Clone, Default)]
#[command(author, version, about)]
pub struct Cli {
    /// UI to install and launch
    #[arg(long, value_enum)]
    pub ui: Option<UiFlavor>,

    /// TOML configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Remote manifest URL (pastebin links are rewritten to their raw form)
    #[arg(long, alias = "pastebin")]
    pub manifest_url: Option<String>,

    /// Hugging Face token, sent as a bearer header to huggingface.co
    #[arg(long)]
    pub hf_token: Option<String>,

    /// CivitAI API key appended to civitai.com download URLs
    #[arg(long)]
    pub civitai_api_key: Option<String>,

    /// zrok account token; enables the zrok tunnel
    #[arg(long)]
    pub zrok_token: Option<String>,

    /// ngrok token passed to the sdw launcher
    #[arg(long)]
    pub ngrok_token: Option<String>,

    /// UI port (default 8188 for ComfyUI, 7860 for sdw)
    #[arg(long)]
    pub port: Option<u16>,

    /// Size of the parallel install pool
    #[arg(long)]
    pub max_workers: Option<usize>,

    /// Skip package and UI installation
    #[arg(long)]
    pub skip_install: bool,

    /// Skip manifest downloads
    #[arg(long)]
    pub skip_downloads: bool,

    /// Do not open tunnels or start the UI
    #[arg(long)]
    pub no_launch: bool,

    /// Echo command output and enable debug logging
    #[arg(long)]
    pub debug: bool,

    /// Log to stderr instead of file
    #[arg(long)]
    pub log_to_stderr: bool,
}

impl Cli {
    /// Apply flags on top of file configuration. Flags win when given.
    pub fn apply_to(&self, config: &mut BootstrapConfig) {
        if let Some(ui) = self.ui {
            config.ui = ui;
        }
        if let Some(port) = self.port {
            config.port = Some(port);
        }
        if let Some(workers) = self.max_workers {
            config.max_workers = workers;
        }
        override_string(&mut config.manifest_url, &self.manifest_url);
        override_string(&mut config.hf_token, &self.hf_token);
        override_string(&mut config.civitai_api_key, &self.civitai_api_key);
        override_string(&mut config.zrok_token, &self.zrok_token);
        override_string(&mut config.ngrok_token, &self.ngrok_token);
        config.debug |= self.debug;
    }
}

fn override_string(target: &mut Option<String>, flag: &Option<String>) {
    if let Some(value) = flag.as_ref().filter(|v| !v.is_empty()) {
        *target = Some(value.clone());
    }
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.debug { "debug" } else { "info" };
    let log_guard = init_logging(log_level, !cli.log_to_stderr)?;

    let platform = match PlatformConfig::from_process_env() {
        Ok(platform) => platform,
        Err(e) => {
            tracing::error!("{}", e);
            println!("{e}");
            // exit skips destructors; flush the log file first
            drop(log_guard);
            std::process::exit(1);
        }
    };
    tracing::info!("Detected platform: {}", platform.platform);

    let mut config = match &cli.config {
        Some(path) => load_config(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => BootstrapConfig::default(),
    };
    cli.apply_to(&mut config);
    config.validate().context("Invalid configuration after applying flags")?;

    let platform = match &config.root {
        Some(root) => platform.with_root(root),
        None => platform,
    };

    let result = bootstrap(&cli, &platform, &config).await;
    drop(log_guard);
    result
}

/// Run every enabled phase. Only setup errors are returned; command failures are
/// reported in the summary line.
pub async fn bootstrap(cli: &Cli, platform: &PlatformConfig, config: &BootstrapConfig) -> Result<()> {
    let runner = CommandRunner::new()
        .with_timeout(config.command_timeout())
        .with_echo(config.debug);
    let capture = config.debug;
    let client = reqwest::Client::new();
    let ui_root = config.ui.ui_root(platform);
    let mut summary = BatchSummary::default();

    if !cli.skip_install {
        tokio::fs::create_dir_all(&ui_root)
            .await
            .with_context(|| format!("Failed to create {}", ui_root.display()))?;
        let plan = InstallPlan::new(platform, config);
        if plan.is_empty() {
            tracing::info!("Install plan is empty");
        } else {
            tracing::info!("Install plan: {} commands", plan.len());
        }
        summary.merge(
            plan.execute(&runner, platform, capture, config.max_workers)
                .await,
        );
        TorchInfo::report(&runner).await;
    }

    if !cli.skip_downloads {
        summary.merge(download_assets(&runner, &client, platform, config, capture).await);
    }

    TerminalOutput::rule().await;
    TerminalOutput::info(&format!("[+] {}", summary.summary_line())).await;
    tracing::info!("{}", summary.summary_line());
    for failed in summary.failures() {
        tracing::warn!("Failed: {}", failed.description);
    }

    if cli.no_launch {
        return Ok(());
    }
    launch_with_tunnels(&runner, &client, platform, config).await
}

async fn download_assets(
    runner: &CommandRunner,
    client: &reqwest::Client,
    platform: &PlatformConfig,
    config: &BootstrapConfig,
    capture: bool,
) -> BatchSummary {
    let Some(source) = ManifestSource::resolve(config.manifest_url.as_deref(), &platform.root) else {
        tracing::info!("No manifest configured, skipping downloads");
        return BatchSummary::default();
    };

    let bearer = source.bearer(config.hf_token.as_deref());
    let text = match source.load(client, bearer).await {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!("{}", e);
            TerminalOutput::info(&e.to_string()).await;
            return BatchSummary::default();
        }
    };

    let layout = UiLayout::new(config.ui, config.ui.ui_root(platform));
    let resolved = resolve(&parse_manifest(&text), &layout, config.civitai_api_key.as_deref());
    tracing::info!(
        "Manifest resolved: {} entries, {} skipped categories",
        resolved.entry_count(),
        resolved.warnings.len()
    );
    if resolved.is_empty() {
        tracing::info!("Manifest has nothing to download");
    }

    AssetDownloader::new(config.hf_token.clone())
        .download(&resolved, runner, capture)
        .await
}

async fn launch_with_tunnels(
    runner: &CommandRunner,
    client: &reqwest::Client,
    platform: &PlatformConfig,
    config: &BootstrapConfig,
) -> Result<()> {
    let public_ip = public_ip::lookup(client).await;

    let mut zrok_ready = false;
    if let Some(token) = config.zrok_token.as_deref().filter(|t| !t.is_empty()) {
        let result = enable_zrok(runner, token).await;
        zrok_ready = result.succeeded();
        if !zrok_ready {
            tracing::warn!("zrok enable failed, skipping zrok tunnel");
        }
    }

    let mut supervisor = TunnelSupervisor::new(config.port())
        .with_url_timeout(config.tunnel_url_timeout())
        .with_grace_period(config.tunnel_grace_period());
    for spec in default_tunnels(public_ip.as_deref(), zrok_ready)? {
        supervisor.add_spec(spec)?;
    }

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    let interrupt_listener = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    TerminalOutput::rule().await;
    let plan = LaunchPlan::new(platform, config);
    let outcome = launch(&plan, &mut supervisor, cancel).await;
    interrupt_listener.abort();

    for report in supervisor.reports() {
        tracing::debug!(
            "Tunnel '{}' ended {:?} with url {:?}",
            report.name,
            report.status,
            report.url
        );
    }

    match outcome {
        Ok(LaunchOutcome::Exited(status)) if !status.success() => {
            tracing::warn!("UI exited with {}", status);
        }
        Ok(_) => {}
        Err(e) => {
            tracing::error!("{}", e);
            TerminalOutput::info(&e.to_string()).await;
        }
    }
    Ok(())
}
