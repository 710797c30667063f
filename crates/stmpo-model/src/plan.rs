use serde::{Deserialize, Serialize};

/// How the worker count was decided.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PlanSource {
    /// Caller supplied an explicit concurrency (clamped to bounds).
    Explicit,
    /// Derived from host RAM/CPU counters.
    Auto,
    /// Host resource query failed; degraded to a single worker.
    Fallback { reason: String },
}

/// Resolved concurrency for one task invocation.
///
/// Computed once, before anything is spawned, and never mutated afterward.
/// `workers` is always in `[1, max_concurrency]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConcurrencyPlan {
    pub workers: u32,
    pub source: PlanSource,
    /// RAM-derived ceiling used in auto mode (informational).
    pub ram_bound: u32,
    /// CPU-derived ceiling used in auto mode (informational).
    pub cpu_bound: u32,
}
