use std::io::IsTerminal;
use std::path::PathBuf;

use crate::logger::format::LoggerFormat;

#[derive(Debug, Clone)]
pub struct LoggerConfig {
    pub format: LoggerFormat,
    /// Env-filter directive string (`info`, `stmpo=debug`, ...).
    pub level: String,
    pub with_targets: bool,
    pub use_color: bool,
    /// Write the orchestrator log to this file instead of stdout.
    ///
    /// A render task's log must travel with the job, so file output replaces
    /// stdout entirely rather than teeing.
    pub file: Option<PathBuf>,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        let use_color = cfg!(test) || std::io::stdout().is_terminal();
        Self {
            format: LoggerFormat::Text,
            level: "info".to_string(),
            with_targets: true,
            use_color,
            file: None,
        }
    }
}
