use std::path::PathBuf;

use thiserror::Error;

/// Invalid or contradictory planning input. Fatal before anything spawns.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid frame range: start={start}, end={end}")]
    InvalidFrameRange { start: i64, end: i64 },
    #[error("maxConcurrency must be >= 1, got {0}")]
    InvalidMaxConcurrency(u32),
    #[error("ramPerProcessGb must be > 0, got {0}")]
    InvalidRamBudget(f64),
    #[error("threads-per-process tuning must be >= 1")]
    InvalidThreadTuning,
    #[error(
        "refusing parallel render of single video file {output} with concurrency {concurrency}; \
         use an image sequence or concurrency=1"
    )]
    ParallelVideoOutput { output: String, concurrency: u32 },
}

/// Malformed or unreadable NUMA map. Recoverable: callers degrade to
/// unpinned execution.
#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("cannot read numa map {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("numa map {} is not valid JSON: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("numa map has no nodes")]
    Empty,
    #[error("node {0} has an empty cpu list")]
    EmptyNode(String),
    #[error("cpu {cpu} appears in more than one node")]
    DuplicateCpu { cpu: u32 },
}

/// Host resource counters could not be read. Recoverable: planning falls
/// back to a single worker.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("cannot determine logical core count: {0}")]
    LogicalCores(String),
    #[error("cannot determine total ram: {0}")]
    TotalRam(String),
}
