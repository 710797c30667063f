use serde::{Deserialize, Serialize};

/// Live resource counters of the worker host.
///
/// Queried once at task start and never refreshed; the plan derived from it
/// holds for the lifetime of the invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostResources {
    /// Schedulable hardware threads as seen by the OS.
    pub logical_cores: u32,
    /// Total physical RAM in bytes.
    pub total_ram_bytes: u64,
    /// OS family (`linux`, `windows`, `macos`, ...).
    pub os: String,
    pub hostname: String,
}

impl HostResources {
    pub fn total_ram_gb(&self) -> f64 {
        self.total_ram_bytes as f64 / (1024.0 * 1024.0 * 1024.0)
    }
}
