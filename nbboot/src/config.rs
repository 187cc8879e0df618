//! # Bootstrap Configuration
//!
//! Everything the driver needs besides the detected platform. Values come from an
//! optional TOML file; every field has a default so an empty file (or no file) is a
//! complete configuration. Command-line flags are applied on top by `shell::cli`.
//!
//! ```toml
//! ui = "sdw"
//! port = 7860
//! max_workers = 4
//! command_timeout_secs = 1800
//!
//! [[extra_commands]]
//! command = "pip install xformers==0.0.26.post1"
//! description = "Install xformers for Kaggle"
//! platform = "kaggle"
//! ```

use crate::{
    platform::{Platform, UiFlavor},
    runner::{CommandSpec, DEFAULT_MAX_WORKERS},
    tunnel::DEFAULT_GRACE_PERIOD,
};
use serde::{Deserialize, Serialize};
use std::{
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;

pub const DEFAULT_ARCHIVE_BASE_URL: &str =
    "https://huggingface.co/datasets/Carmeninkunming/fast-repo-kaggle/resolve/main";
pub const DEFAULT_BRANCH: &str = "master";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// A command added to the resource phase, optionally only on one platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExtraCommand {
    pub command: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
}

impl ExtraCommand {
    pub fn applies_to(&self, platform: Platform) -> bool {
        self.platform.is_none_or(|p| p == platform)
    }

    pub fn to_spec(&self) -> CommandSpec {
        CommandSpec::new(&self.command, &self.description)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BootstrapConfig {
    pub ui: UiFlavor,
    /// Overrides the platform root (`/content` or `/home`).
    pub root: Option<PathBuf>,
    /// UI port. Defaults per flavour when unset.
    pub port: Option<u16>,
    pub max_workers: usize,
    /// Branch the UI checkout is switched to after extraction.
    pub branch: String,
    /// Base URL the `*.tar.lz4` archives are fetched from.
    pub archive_base_url: String,
    /// Python `major.minor` for the sdw site-packages archive. Probed when unset.
    pub python_version: Option<String>,
    pub command_timeout_secs: Option<u64>,
    pub tunnel_url_timeout_secs: Option<u64>,
    pub tunnel_grace_period_secs: u64,
    /// Remote manifest (pastebin or any raw text URL).
    pub manifest_url: Option<String>,
    /// Downloaded to `<root>/download_list.txt` during the resource phase.
    pub download_list_url: Option<String>,
    pub hf_token: Option<String>,
    pub civitai_api_key: Option<String>,
    pub zrok_token: Option<String>,
    pub ngrok_token: Option<String>,
    /// Echo subprocess output.
    pub debug: bool,
    pub extra_commands: Vec<ExtraCommand>,
    /// Appended to the UI launch command.
    pub launch_args: Vec<String>,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            ui: UiFlavor::default(),
            root: None,
            port: None,
            max_workers: DEFAULT_MAX_WORKERS,
            branch: DEFAULT_BRANCH.to_string(),
            archive_base_url: DEFAULT_ARCHIVE_BASE_URL.to_string(),
            python_version: None,
            command_timeout_secs: None,
            tunnel_url_timeout_secs: None,
            tunnel_grace_period_secs: DEFAULT_GRACE_PERIOD.as_secs(),
            manifest_url: None,
            download_list_url: None,
            hf_token: None,
            civitai_api_key: None,
            zrok_token: None,
            ngrok_token: None,
            debug: false,
            extra_commands: Vec::new(),
            launch_args: Vec::new(),
        }
    }
}

impl BootstrapConfig {
    pub fn port(&self) -> u16 {
        self.port.unwrap_or(match self.ui {
            UiFlavor::ComfyUi => 8188,
            UiFlavor::Sdw => 7860,
        })
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_secs.map(Duration::from_secs)
    }

    pub fn tunnel_url_timeout(&self) -> Option<Duration> {
        self.tunnel_url_timeout_secs.map(Duration::from_secs)
    }

    pub fn tunnel_grace_period(&self) -> Duration {
        Duration::from_secs(self.tunnel_grace_period_secs)
    }

    /// Extra commands for `platform`, in file order.
    pub fn extra_commands_for(&self, platform: Platform) -> Vec<CommandSpec> {
        self.extra_commands
            .iter()
            .filter(|c| c.applies_to(platform))
            .map(ExtraCommand::to_spec)
            .collect()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_workers == 0 {
            return Err(ConfigError::Invalid("max_workers must be at least 1".into()));
        }
        if self.port == Some(0) {
            return Err(ConfigError::Invalid("port must be non-zero".into()));
        }
        if self.branch.trim().is_empty() {
            return Err(ConfigError::Invalid("branch must not be empty".into()));
        }
        Ok(())
    }
}

/// Load and validate a TOML configuration file.
pub fn load_config(path: &Path) -> Result<BootstrapConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let config: BootstrapConfig = toml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    config.validate()?;
    tracing::debug!("Loaded configuration from {}", path.display());
    Ok(config)
}
