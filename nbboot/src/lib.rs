//! # nbboot
//!
//! Bootstraps a Stable-Diffusion web UI (ComfyUI or the sdw web UI) inside a hosted
//! notebook. The crate detects the host platform, installs system packages and UI
//! archives through a bounded command runner, resolves an asset manifest into
//! downloads, exposes the UI port through supervised tunnel processes and finally
//! runs the UI in the foreground.
//!
//! ## Modules
//!
//! - **`runner`**: shell command execution, sequential batches and a bounded worker pool.
//! - **`tunnel`**: tunnel process supervision and public URL extraction.
//! - **`manifest`**: asset manifest parsing and category resolution.
//! - **`assets`**: turns a resolved manifest into download, clone and link commands.
//! - **`install`**: the per-flavour installation plan.
//! - **`launch`**: the foreground UI server.
//! - **`public_ip`**: public address lookup for the localtunnel note.
//! - **`platform`**: host notebook detection.
//! - **`config`**: TOML configuration with defaults.
//! - **`shell`**: the `nbboot` binary entry point.

pub mod assets;
pub mod config;
pub mod install;
pub mod launch;
pub mod manifest;
pub mod platform;
pub mod public_ip;
pub mod runner;
pub mod shell;
pub mod terminal_output;
pub mod tunnel;
pub mod utils;
