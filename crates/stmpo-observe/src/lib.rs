mod logger;

pub use logger::{LoggerConfig, LoggerError, LoggerFormat, logger_init};
