//! Quoting for values interpolated into `sh -c` command strings.

use std::path::Path;

/// Wrap `value` in single quotes so the shell reads it as one literal word.
///
/// Embedded single quotes are closed, emitted inside double quotes, and reopened.
pub fn escape_shell_argument(value: &str) -> String {
    if value.contains('\'') {
        format!("'{}'", value.replace('\'', "'\"'\"'"))
    } else {
        format!("'{}'", value)
    }
}

pub fn escape_path(path: &Path) -> String {
    escape_shell_argument(&path.to_string_lossy())
}
