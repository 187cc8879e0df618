//! # Install Plan
//!
//! The installation is three phases of shell commands:
//!
//! 1. **initial** (sequential): system packages and CLI tools everything else needs.
//! 2. **parallel**: tunnel binaries, downloaded concurrently on the worker pool.
//! 3. **resource** (sequential): UI archives, the git update of the checkout, the
//!    default download list and any configured extra commands.
//!
//! Each phase is folded into a [`BatchSummary`]; failures never stop later phases.

use crate::{
    config::BootstrapConfig,
    platform::{PlatformConfig, UiFlavor},
    runner::{BatchSummary, CommandRunner, CommandSpec, escape_path, escape_shell_argument},
    terminal_output::TerminalOutput,
};
use std::path::{Path, PathBuf};
use std::time::Instant;

pub const CLOUDFLARED_URL: &str =
    "https://github.com/cloudflare/cloudflared/releases/latest/download/cloudflared-linux-amd64";
pub const FRP_VERSION: &str = "0.58.1";
pub const ZROK_VERSION: &str = "0.4.23";

/// Shell expression printing the interpreter's `major.minor`.
const PYTHON_VERSION_PROBE: &str =
    r#"$(python3 -c 'import sys; print("%d.%d" % sys.version_info[:2])')"#;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallPlan {
    pub initial: Vec<CommandSpec>,
    pub parallel: Vec<CommandSpec>,
    pub resource: Vec<CommandSpec>,
}

impl InstallPlan {
    pub fn new(platform: &PlatformConfig, config: &BootstrapConfig) -> Self {
        let flavor = config.ui;
        let root = platform.root.as_path();
        let ui_root = flavor.ui_root(platform);

        let mut resource = vec![archive_spec(
            root,
            &config.archive_base_url,
            flavor.archive_stem(),
            &escape_path(&ui_root),
            "Install UI",
        )];
        if flavor == UiFlavor::Sdw {
            resource.push(archive_spec(
                root,
                &config.archive_base_url,
                "site-packages",
                &site_packages_dir(config.python_version.as_deref()),
                "Prepare Packages",
            ));
            resource.push(archive_spec(
                root,
                &config.archive_base_url,
                "cache",
                "/",
                "Prepare Huggingface Cache",
            ));
        }
        resource.push(update_spec(&ui_root, &config.branch));
        if let Some(url) = &config.download_list_url {
            resource.push(download_list_spec(root, url));
        }
        resource.extend(config.extra_commands_for(platform.platform));

        Self {
            initial: initial_specs(flavor),
            parallel: parallel_specs(flavor, root),
            resource,
        }
    }

    pub fn len(&self) -> usize {
        self.initial.len() + self.parallel.len() + self.resource.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run all three phases and return the combined summary.
    pub async fn execute(
        &self,
        runner: &CommandRunner,
        platform: &PlatformConfig,
        capture_output: bool,
        max_workers: usize,
    ) -> BatchSummary {
        let mut total = BatchSummary::default();

        let title = "Installing initial requirements";
        TerminalOutput::section(title).await;
        let initial = runner.run_batch(&self.initial, capture_output).await;
        TerminalOutput::section_done(title, initial.elapsed).await;
        total.merge(initial);

        TerminalOutput::section(&format!(
            "Installing parallel commands for [{}]",
            platform.platform
        ))
        .await;
        let parallel_start = Instant::now();
        let parallel = runner
            .run_parallel(self.parallel.clone(), capture_output, max_workers)
            .await;
        TerminalOutput::section_done("Parallel commands", parallel_start.elapsed()).await;
        total.merge(parallel);

        let title = "Installing resource commands";
        TerminalOutput::section(title).await;
        let resource = runner.run_batch(&self.resource, capture_output).await;
        TerminalOutput::section_done(title, resource.elapsed).await;
        total.merge(resource);

        total
    }
}

fn initial_specs(flavor: UiFlavor) -> Vec<CommandSpec> {
    let media = match flavor {
        UiFlavor::ComfyUi => CommandSpec::new(
            "apt-get -y install lz4 && apt -y install ffmpeg",
            "Install lz4 ffmpeg",
        ),
        UiFlavor::Sdw => CommandSpec::new("apt-get -y install lz4", "Install lz4"),
    };
    vec![
        CommandSpec::new("apt-get update", "Update package list"),
        CommandSpec::new("apt -y install aria2", "Install aria2"),
        media,
        CommandSpec::new("pip install colorama", "Install colorama"),
        CommandSpec::new("npm install -g localtunnel", "Install localtunnel"),
    ]
}

fn parallel_specs(flavor: UiFlavor, root: &Path) -> Vec<CommandSpec> {
    let root_q = escape_path(root);
    let zrok_tar = format!("zrok_{ZROK_VERSION}_linux_amd64.tar.gz");
    let mut specs = vec![
        CommandSpec::new(
            format!("curl -s -Lo /usr/bin/cl {CLOUDFLARED_URL} && chmod +x /usr/bin/cl"),
            "Install cloudflared",
        ),
        CommandSpec::new(
            format!(
                "cd {root_q} && curl -sLO https://github.com/openziti/zrok/releases/download/v{ZROK_VERSION}/{zrok_tar} \
                 && tar -xzf {zrok_tar} && rm -rf {zrok_tar} && mv {root_q}/zrok /usr/bin"
            ),
            "Install zrok",
        ),
    ];
    if flavor == UiFlavor::ComfyUi {
        let frp_dir = format!("frp_{FRP_VERSION}_linux_amd64");
        specs.insert(
            1,
            CommandSpec::new(
                format!(
                    "cd {root_q} && wget -q https://github.com/fatedier/frp/releases/download/v{FRP_VERSION}/{frp_dir}.tar.gz \
                     && tar -xzf {frp_dir}.tar.gz -C /usr/bin --strip-components=1 {frp_dir}/frpc && rm {frp_dir}.tar.gz"
                ),
                "Install Frp",
            ),
        );
    }
    specs
}

/// Fetch `<base>/<stem>.tar.lz4` into `root`, extract it into `target`, delete the archive.
///
/// `target` is inserted verbatim so callers can pass shell expressions.
fn archive_spec(root: &Path, base_url: &str, stem: &str, target: &str, description: &str) -> CommandSpec {
    let root_q = escape_path(root);
    let archive = format!("{stem}.tar.lz4");
    let url = format!("{}/{archive}", base_url.trim_end_matches('/'));
    CommandSpec::new(
        format!(
            "cd {root_q} && aria2c --console-log-level=error -c -x 16 -s 16 -k 1M {} -o {archive} \
             && tar -xI lz4 -f {archive} --directory={target} && rm {}",
            escape_shell_argument(&url),
            escape_path(&root.join(&archive)),
        ),
        description,
    )
}

fn update_spec(ui_root: &Path, branch: &str) -> CommandSpec {
    let branch = escape_shell_argument(branch);
    CommandSpec::new(
        format!(
            "cd {} && git reset --hard && git pull && git switch {branch} && git pull && git reset --hard",
            escape_path(ui_root)
        ),
        "Update UI",
    )
}

fn download_list_spec(root: &Path, url: &str) -> CommandSpec {
    CommandSpec::new(
        format!(
            "aria2c --console-log-level=error --allow-overwrite=true -d {} -o {} {}",
            escape_path(root),
            crate::manifest::DEFAULT_MANIFEST_FILE,
            escape_shell_argument(url)
        ),
        "Fetch download list",
    )
}

/// Conda site-packages directory for the given or probed Python version.
pub fn site_packages_dir(python_version: Option<&str>) -> String {
    match python_version {
        Some(version) => escape_path(&PathBuf::from(format!(
            "/opt/conda/lib/python{version}/site-packages"
        ))),
        None => format!("/opt/conda/lib/python{PYTHON_VERSION_PROBE}/site-packages"),
    }
}

/// Torch, CUDA and GPU availability as reported by the notebook's Python.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TorchInfo {
    pub torch: String,
    pub cuda: String,
    pub gpu: bool,
}

impl TorchInfo {
    pub fn probe_spec() -> CommandSpec {
        CommandSpec::new(
            r#"python3 -c "import torch; print(f'{torch.__version__}|{torch.version.cuda}|{torch.cuda.is_available()}')""#,
            "Probe PyTorch",
        )
    }

    /// Parse the probe's last `version|cuda|bool` line, ignoring any warnings before it.
    pub fn parse(output: &str) -> Option<Self> {
        output.lines().rev().find_map(|line| {
            let mut parts = line.trim().split('|');
            let (torch, cuda, gpu) = (parts.next()?, parts.next()?, parts.next()?);
            if parts.next().is_some() || torch.is_empty() {
                return None;
            }
            Some(Self {
                torch: torch.to_string(),
                cuda: cuda.to_string(),
                gpu: gpu == "True",
            })
        })
    }

    pub fn summary_line(&self) -> String {
        let gpu = if self.gpu { "Yes." } else { "GPU not detected." };
        format!(
            "[+] PyTorch Version: {} | Cuda: {} | GPU Access: {gpu}",
            self.torch, self.cuda
        )
    }

    /// Run the probe and print its summary. Informational only.
    pub async fn report(runner: &CommandRunner) -> Option<Self> {
        let result = runner.clone().quiet().run(&Self::probe_spec(), true).await;
        let info = result.output().and_then(Self::parse);
        match &info {
            Some(info) => TerminalOutput::info(&info.summary_line()).await,
            None => tracing::info!("PyTorch probe unavailable: {:?}", result.outcome.err()),
        }
        info
    }
}
