use std::path::PathBuf;

use thiserror::Error;

/// Errors that abort an invocation before any renderer spawns.
///
/// Child-process failures are never surfaced here; they land in the
/// per-slot reports of the `TaskResult` and are governed by fail-fast.
#[derive(Error, Debug)]
pub enum ExecError {
    #[error("invalid configuration: {0}")]
    Config(#[from] stmpo_core::ConfigError),
    #[error("pre-task hook {program} failed: {reason}")]
    Hook { program: String, reason: String },
    #[error("cannot prepare log directory {}: {source}", path.display())]
    LogDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
