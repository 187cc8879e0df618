//! # Host Platform Detection
//!
//! The bootstrapper only runs inside hosted notebooks. The host is identified from
//! environment variables the notebook runtimes set:
//!
//! | Variable                 | Condition  | Platform | Root       |
//! |--------------------------|------------|----------|------------|
//! | `COLAB_GPU`              | present    | Colab    | `/content` |
//! | `KAGGLE_KERNEL_RUN_TYPE` | non-empty  | Kaggle   | `/home`    |
//!
//! Detection is a pure function of an environment snapshot so that the driver reads
//! the process environment exactly once and tests can pass any map they like.

use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fmt,
    path::{Path, PathBuf},
};
use thiserror::Error;

pub const COLAB_ENV: &str = "COLAB_GPU";
pub const KAGGLE_ENV: &str = "KAGGLE_KERNEL_RUN_TYPE";

/// Hosted notebook platforms the bootstrapper knows how to prepare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Colab,
    Kaggle,
}

impl Platform {
    /// Filesystem root everything is installed under.
    pub fn root(&self) -> &'static Path {
        match self {
            Platform::Colab => Path::new("/content"),
            Platform::Kaggle => Path::new("/home"),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Colab => write!(f, "Colab"),
            Platform::Kaggle => write!(f, "Kaggle"),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Error. Environment not detected")]
pub struct EnvironmentDetectionError;

/// Detected platform plus the root path derived from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformConfig {
    pub platform: Platform,
    pub root: PathBuf,
}

impl PlatformConfig {
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            root: platform.root().to_path_buf(),
        }
    }

    /// Override the root, used by tests and `--root`-style configuration.
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    /// Snapshot the process environment and detect the platform from it.
    pub fn from_process_env() -> Result<Self, EnvironmentDetectionError> {
        let snapshot: HashMap<String, String> = std::env::vars().collect();
        detect(&snapshot)
    }
}

/// Detect the hosting platform from an environment snapshot.
///
/// Colab wins when both markers are present.
pub fn detect(env: &HashMap<String, String>) -> Result<PlatformConfig, EnvironmentDetectionError> {
    if env.contains_key(COLAB_ENV) {
        return Ok(PlatformConfig::new(Platform::Colab));
    }
    match env.get(KAGGLE_ENV) {
        Some(value) if !value.is_empty() => Ok(PlatformConfig::new(Platform::Kaggle)),
        _ => Err(EnvironmentDetectionError),
    }
}

/// Which web UI gets installed and launched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum UiFlavor {
    #[default]
    #[value(name = "comfyui")]
    ComfyUi,
    Sdw,
}

impl UiFlavor {
    /// Directory name of the UI checkout below the platform root.
    pub fn dir_name(&self) -> &'static str {
        match self {
            UiFlavor::ComfyUi => "ComfyUI",
            UiFlavor::Sdw => "sdw",
        }
    }

    pub fn ui_root(&self, platform: &PlatformConfig) -> PathBuf {
        platform.root.join(self.dir_name())
    }

    /// Archive stem published for this flavour (`<stem>.tar.lz4`).
    pub fn archive_stem(&self) -> &'static str {
        match self {
            UiFlavor::ComfyUi => "cui",
            UiFlavor::Sdw => "sdw",
        }
    }
}

impl fmt::Display for UiFlavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UiFlavor::ComfyUi => write!(f, "ComfyUI"),
            UiFlavor::Sdw => write!(f, "sdw"),
        }
    }
}
