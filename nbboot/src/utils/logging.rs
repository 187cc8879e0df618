//! # Logging Initialization
//!
//! Sets up the global `tracing` subscriber for the `nbboot` binary.
//!
//! - **Environment filter**: `RUST_LOG` wins when set; otherwise the filter is
//!   `<level>,nbboot=debug`.
//! - **File logging (default)**: a daily rolling `nbboot.log` in the user cache
//!   directory resolved through `directories`. ANSI colors are disabled there.
//! - **Stderr**: used when `log_to_file` is false, or when the cache directory is
//!   missing or not writable.
//!
//! [`init_logging`] hands back the file writer's [`WorkerGuard`]. Hold it for the
//! life of the process and drop it before any early `process::exit`, otherwise
//! buffered lines never reach the file.
//!
//! Notebook cells show stdout and stderr interleaved, so file logging keeps the
//! progress lines printed by [`crate::terminal_output`] readable.

use anyhow::Result;
use directories::ProjectDirs;
use std::{io::stderr, path::Path, sync::Once};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{EnvFilter, fmt::layer, prelude::*};

static INIT: Once = Once::new();

/// Initialize verbose logging for tests.
pub fn init_test_logging() {
    let _ = init_logging("trace", false).expect("Failed to initialize test logging");
}

/// Default filter directive used when `RUST_LOG` is not set.
pub fn default_filter(log_level: &str) -> String {
    format!("{log_level},nbboot=debug")
}

/// Initializes the logging system.
///
/// Only the first call has any effect. When it logs to a file, the returned guard
/// flushes the background writer on drop.
pub fn init_logging(log_level: &str, log_to_file: bool) -> Result<Option<WorkerGuard>> {
    let mut file_guard = None;
    INIT.call_once(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_filter(log_level)));

        if log_to_file
            && let Some(proj_dirs) = ProjectDirs::from("com", "nbboot", "nbboot")
            && let Some((non_blocking, guard)) = file_writer(proj_dirs.cache_dir())
        {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(layer().with_writer(non_blocking).with_ansi(false))
                .init();
            file_guard = Some(guard);
            return;
        }

        tracing_subscriber::registry()
            .with(env_filter)
            .with(layer().with_writer(stderr).with_ansi(true))
            .init();
    });

    Ok(file_guard)
}

/// Non-blocking writer onto a daily rolling `nbboot.log` in `log_dir`, or `None`
/// when the directory is unusable.
fn file_writer(log_dir: &Path) -> Option<(NonBlocking, WorkerGuard)> {
    if !test_write_permission(log_dir) {
        return None;
    }
    // tracing_appender::rolling::daily panics on permission errors
    let appender = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        tracing_appender::rolling::daily(log_dir, "nbboot.log")
    }))
    .ok()?;
    Some(tracing_appender::non_blocking(appender))
}

/// Returns true if `dir` can be created and written to.
fn test_write_permission(dir: &Path) -> bool {
    if std::fs::create_dir_all(dir).is_err() {
        return false;
    }

    let marker = dir.join(".nbboot_log_test");
    match std::fs::write(&marker, "test") {
        Ok(()) => {
            let _ = std::fs::remove_file(&marker);
            true
        }
        Err(_) => false,
    }
}
