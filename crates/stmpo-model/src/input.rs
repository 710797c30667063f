use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::{Flag, FrameRange, TaskEnv, TimeoutMs};

/// Opaque collaborator command run before or after supervision
/// (output-directory creation, font install/cleanup).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookCommand {
    pub program: PathBuf,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
}

/// Auto-concurrency tunables.
///
/// The per-process thread appetite of the renderer differs sharply between
/// MFR on (one process fans out internally) and MFR off; neither number is
/// something to hard-code, so both travel with the bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannerTuning {
    /// Threads one renderer process is assumed to use with MFR enabled.
    pub threads_per_process_mfr: u32,
    /// Threads one renderer process is assumed to use with MFR disabled.
    pub threads_per_process: u32,
}

impl Default for PlannerTuning {
    fn default() -> Self {
        Self {
            threads_per_process_mfr: 16,
            threads_per_process: 4,
        }
    }
}

/// Logger settings carried in the bundle; applied once per invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogSettings {
    /// Env-filter level string (`info`, `debug`, `stmpo=trace`, ...).
    #[serde(default)]
    pub level: Option<String>,
    /// `text` (default) or `json`.
    #[serde(default)]
    pub format: Option<String>,
    /// Orchestrator log file; stdout when absent.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

fn default_max_concurrency() -> u32 {
    32
}

fn default_ram_per_process_gb() -> f64 {
    10.0
}

fn default_mfr_max_cpu_percent() -> u8 {
    100
}

fn default_spawn_delay_ms() -> u64 {
    2_000
}

fn default_child_grace_ms() -> u64 {
    10_000
}

/// One task bundle, as written by the submitter and handed over by the job
/// system. This is the single external input of an invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskInput {
    /// Project/scene file the renderer loads.
    pub project: PathBuf,
    /// Composition name; optional when a render-queue index is used instead.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comp: Option<String>,
    /// Render-queue index within the project.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rq_index: Option<u32>,
    /// Output path/pattern handed to the renderer.
    pub output: String,
    /// Render-settings template name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rs_template: Option<String>,
    /// Output-module template name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub om_template: Option<String>,

    /// Full inclusive frame range of this task.
    pub frames: FrameRange,
    /// Renderer executable spawned per slot.
    pub renderer_path: PathBuf,

    /// Explicit worker count; `0` selects auto planning.
    #[serde(default)]
    pub concurrency: u32,
    /// Upper bound on the worker count in both modes.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: u32,
    /// Advisory RAM budget per worker, used only by auto planning.
    #[serde(default = "default_ram_per_process_gb")]
    pub ram_per_process_gb: f64,
    #[serde(default)]
    pub planner: PlannerTuning,

    /// Multi-frame rendering inside each renderer process.
    #[serde(default)]
    pub multi_frame_rendering: Flag,
    /// `-mfr <flag> <percent>` second argument; ignored by the renderer when
    /// MFR is off but required on the command line either way.
    #[serde(default = "default_mfr_max_cpu_percent")]
    pub mfr_max_cpu_percent: u8,

    /// CPU pinning on/off.
    #[serde(default)]
    pub affinity: Flag,
    /// NUMA map file (node id -> logical CPU ids). Absence or malformed
    /// content degrades to unpinned execution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub numa_map: Option<PathBuf>,

    /// Kill all siblings as soon as one slot fails.
    #[serde(default)]
    pub fail_fast: Flag,
    /// Stagger between child spawns.
    #[serde(default = "default_spawn_delay_ms")]
    pub spawn_delay_ms: u64,
    /// Grace between terminate and kill when shutting a child down.
    #[serde(default = "default_child_grace_ms")]
    pub child_grace_ms: u64,
    /// Per-child wall-clock limit; `0` = none.
    #[serde(default)]
    pub child_timeout_ms: TimeoutMs,
    /// Whole-task wall-clock limit; `0` = none.
    #[serde(default)]
    pub task_timeout_ms: TimeoutMs,

    /// Environment overrides merged over the parent environment.
    #[serde(default, skip_serializing_if = "TaskEnv::is_empty")]
    pub env: TaskEnv,
    /// Directory for per-slot log files.
    pub log_dir: PathBuf,
    #[serde(default)]
    pub log: LogSettings,

    /// Ordered hooks run before any child spawns; a failure here is fatal.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pre_task_hooks: Vec<HookCommand>,
    /// Ordered hooks run after supervision, best effort.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub post_task_hooks: Vec<HookCommand>,
}
