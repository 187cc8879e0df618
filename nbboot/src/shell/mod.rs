//! # Shell Module
//!
//! Entry point and command-line handling for the `nbboot` binary.

pub mod cli;

pub use cli::{Cli, bootstrap, run};
