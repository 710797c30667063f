use serde::{Deserialize, Serialize};

use crate::{ConcurrencyPlan, SlotReport};

/// Overall classification of one task invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TaskOutcome {
    /// Every slot succeeded.
    Success,
    /// At least one slot failed, timed out, or was terminated.
    RenderFailed,
    /// Planning/startup failed before any child ran.
    StartupFailed,
}

impl TaskOutcome {
    /// Process exit code convention consumed by the job system:
    /// 0 = all slots succeeded, 1 = render failures, 2 = nothing ever ran.
    pub fn exit_code(&self) -> i32 {
        match self {
            TaskOutcome::Success => 0,
            TaskOutcome::RenderFailed => 1,
            TaskOutcome::StartupFailed => 2,
        }
    }
}

/// Aggregate result of one task invocation.
///
/// Built once after supervision ends; immutable thereafter. Every slot that
/// was planned appears here with a terminal status, including slots that a
/// fail-fast cancellation never let run to completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    pub outcome: TaskOutcome,
    pub slots: Vec<SlotReport>,
    pub plan: ConcurrencyPlan,
}

impl TaskResult {
    /// Classify from per-slot statuses: success only if every slot succeeded.
    pub fn from_slots(plan: ConcurrencyPlan, slots: Vec<SlotReport>) -> Self {
        let outcome = if !slots.is_empty() && slots.iter().all(|s| s.status.is_success()) {
            TaskOutcome::Success
        } else {
            TaskOutcome::RenderFailed
        };
        Self {
            outcome,
            slots,
            plan,
        }
    }
}
