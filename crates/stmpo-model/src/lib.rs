mod flag;
pub use flag::Flag;

mod env;
pub use env::{KeyValue, TaskEnv};

mod frames;
pub use frames::FrameRange;

mod host;
pub use host::HostResources;

mod topology;
pub use topology::{NumaNode, NumaTopology};

mod plan;
pub use plan::{ConcurrencyPlan, PlanSource};

mod affinity;
pub use affinity::AffinityBlock;

mod slot;
pub use slot::{SlotReport, SlotStatus};

mod result;
pub use result::{TaskOutcome, TaskResult};

mod input;
pub use input::{HookCommand, LogSettings, PlannerTuning, TaskInput};

/// Timeout value in milliseconds.
///
/// Job-system convention: the field is always present and `0` means "no limit".
pub type TimeoutMs = u64;
