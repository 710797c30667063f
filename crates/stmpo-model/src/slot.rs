use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::{AffinityBlock, FrameRange};

/// Execution state of one worker slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SlotStatus {
    /// Not yet spawned.
    Pending,
    /// Child process is alive.
    Running,
    /// Child exited with code 0.
    Succeeded,
    /// Child exited nonzero, or could not be spawned at all.
    Failed,
    /// Child exceeded its per-child timeout and was killed. Counts as a
    /// failure for the overall classification.
    TimedOut,
    /// Child was killed before reaching its own outcome: a sibling failed
    /// under fail-fast, or the task was cancelled from outside.
    Terminated,
}

impl SlotStatus {
    /// Returns `true` once the slot can no longer transition.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SlotStatus::Pending | SlotStatus::Running)
    }

    /// Only `Succeeded` contributes to an overall success.
    pub fn is_success(&self) -> bool {
        matches!(self, SlotStatus::Succeeded)
    }
}

/// Final record of one worker slot, as surfaced in the task report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotReport {
    pub index: usize,
    pub frames: FrameRange,
    /// CPUs the slot was pinned to, absent when it ran unpinned.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpus: Option<AffinityBlock>,
    pub status: SlotStatus,
    /// Exit code when the child exited on its own.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// Per-slot log sink location.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_path: Option<PathBuf>,
    /// Failure detail (spawn error text, timeout note, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::SlotStatus;

    #[test]
    fn only_pending_and_running_are_non_terminal() {
        assert!(!SlotStatus::Pending.is_terminal());
        assert!(!SlotStatus::Running.is_terminal());
        for s in [
            SlotStatus::Succeeded,
            SlotStatus::Failed,
            SlotStatus::TimedOut,
            SlotStatus::Terminated,
        ] {
            assert!(s.is_terminal());
        }
    }
}
