use std::fs::File;
use std::sync::Arc;

use time::{UtcOffset, format_description::well_known::Rfc3339};
use tracing::Subscriber;
use tracing_subscriber::{
    EnvFilter, fmt, fmt::time::OffsetTime, layer::SubscriberExt, util::SubscriberInitExt,
};

use crate::logger::{config::LoggerConfig, error::LoggerError};

pub struct Logger;

impl Logger {
    pub fn text(cfg: &LoggerConfig) -> Result<(), LoggerError> {
        let filter = mk_filter(&cfg.level)?;
        match mk_sink(cfg)? {
            Some(file) => {
                let fmt_layer = fmt::layer()
                    .with_ansi(false)
                    .with_target(cfg.with_targets)
                    .with_timer(mk_timer())
                    .with_writer(file);
                init_with(tracing_subscriber::registry().with(filter).with(fmt_layer))
            }
            None => {
                let fmt_layer = fmt::layer()
                    .with_ansi(cfg.use_color)
                    .with_target(cfg.with_targets)
                    .with_timer(mk_timer());
                init_with(tracing_subscriber::registry().with(filter).with(fmt_layer))
            }
        }
    }

    pub fn json(cfg: &LoggerConfig) -> Result<(), LoggerError> {
        let filter = mk_filter(&cfg.level)?;
        match mk_sink(cfg)? {
            Some(file) => {
                let fmt_layer = fmt::layer()
                    .json()
                    .with_ansi(false)
                    .with_target(cfg.with_targets)
                    .with_timer(mk_timer())
                    .with_writer(file);
                init_with(tracing_subscriber::registry().with(filter).with(fmt_layer))
            }
            None => {
                let fmt_layer = fmt::layer()
                    .json()
                    .with_ansi(false)
                    .with_target(cfg.with_targets)
                    .with_timer(mk_timer());
                init_with(tracing_subscriber::registry().with(filter).with(fmt_layer))
            }
        }
    }
}

fn mk_filter(level: &str) -> Result<EnvFilter, LoggerError> {
    EnvFilter::try_new(level).map_err(|_| LoggerError::InvalidLogLevel(level.to_string()))
}

fn mk_timer() -> OffsetTime<Rfc3339> {
    let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
    OffsetTime::new(offset, Rfc3339)
}

fn mk_sink(cfg: &LoggerConfig) -> Result<Option<Arc<File>>, LoggerError> {
    let Some(path) = &cfg.file else {
        return Ok(None);
    };
    let file = File::create(path).map_err(|e| LoggerError::LogFile {
        path: path.display().to_string(),
        source: e,
    })?;
    Ok(Some(Arc::new(file)))
}

fn as_error(e: impl std::fmt::Display) -> LoggerError {
    let s = e.to_string();
    if s.contains("SetGlobalDefaultError") {
        LoggerError::AlreadyInitialized
    } else {
        LoggerError::InitializationFailed(s)
    }
}

fn init_with<S>(subscriber: S) -> Result<(), LoggerError>
where
    S: Subscriber + Send + Sync + 'static,
{
    subscriber.try_init().map_err(as_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::LoggerFormat;

    #[test]
    fn bad_level_is_rejected_before_install() {
        let cfg = LoggerConfig {
            level: "not-a-level=".into(),
            ..Default::default()
        };
        assert!(matches!(
            Logger::text(&cfg),
            Err(LoggerError::InvalidLogLevel(_))
        ));
    }

    #[test]
    fn unwritable_file_is_reported() {
        let cfg = LoggerConfig {
            format: LoggerFormat::Json,
            file: Some("/nonexistent-dir/stmpo.log".into()),
            ..Default::default()
        };
        assert!(matches!(Logger::json(&cfg), Err(LoggerError::LogFile { .. })));
    }
}
