use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use stmpo_core::{ConfigError, allocate, load_topology_best_effort, plan, planner::PlanConfig,
    query_host_resources, split};
use stmpo_model::{HookCommand, TaskInput, TaskResult};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::command::renderer_command;
use crate::error::ExecError;
use crate::pin::{CpuPinner, select_pinner};
use crate::supervisor::{SupervisorConfig, WorkerSlot, run};

/// Container formats that cannot be written by several processes at once.
const SINGLE_WRITER_EXTS: &[&str] = &[".mov", ".mp4", ".avi", ".mxf", ".mkv"];

/// One task invocation, end to end: plan concurrency, split frames, allocate
/// affinity, supervise, aggregate.
///
/// Everything before supervision is fatal on error (the task never starts);
/// once children are spawned, failures flow through the fail-fast policy into
/// the final `TaskResult` instead.
pub struct Orchestrator {
    input: TaskInput,
    cancel: CancellationToken,
    pinner: Option<Arc<dyn CpuPinner>>,
}

impl Orchestrator {
    pub fn new(input: TaskInput) -> Self {
        Self {
            input,
            cancel: CancellationToken::new(),
            pinner: None,
        }
    }

    /// Token for external termination (OS signal, job-system task timeout).
    /// Cancelling it stops all running children, best effort.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Replace the platform pinning capability. Used by tests.
    pub fn with_pinner(mut self, pinner: Arc<dyn CpuPinner>) -> Self {
        self.pinner = Some(pinner);
        self
    }

    pub async fn execute(self) -> Result<TaskResult, ExecError> {
        let input = &self.input;

        if input.frames.end < input.frames.start {
            return Err(ConfigError::InvalidFrameRange {
                start: input.frames.start,
                end: input.frames.end,
            }
            .into());
        }

        // Planning depends only on host counters; topology comes later and
        // only influences pinning.
        let host = query_host_resources();
        let plan_cfg = PlanConfig {
            explicit: input.concurrency,
            max_concurrency: input.max_concurrency,
            ram_per_process_gb: input.ram_per_process_gb,
            multi_frame_rendering: input.multi_frame_rendering.is_on(),
            tuning: input.planner,
        };
        let plan = plan(&plan_cfg, host.as_ref())?;

        let subranges = split(input.frames, plan.workers)?;
        let workers = subranges.len() as u32;
        check_output_shape(&input.output, workers)?;

        let topology = if input.affinity.is_on() {
            load_topology_best_effort(input.numa_map.as_deref())
        } else {
            info!(target: "stmpo.exec.orchestrator", "affinity disabled by flag");
            None
        };
        let logical = host.as_ref().map(|h| h.logical_cores).unwrap_or(0);
        let pinner = self
            .pinner
            .clone()
            .unwrap_or_else(|| select_pinner(input.affinity.is_on(), topology.is_some(), logical));
        let blocks = allocate(topology.as_ref(), workers, pinner.group_span());

        info!(
            target: "stmpo.exec.orchestrator",
            workers,
            frames = %input.frames,
            pinned = blocks.is_some(),
            source = ?plan.source,
            "plan resolved"
        );

        for hook in &input.pre_task_hooks {
            run_hook(hook).await.map_err(|reason| ExecError::Hook {
                program: hook.program.display().to_string(),
                reason,
            })?;
        }

        // The output-directory hook owns this normally; creating it here too
        // costs nothing and avoids a race when the hook list is empty.
        if let Some(parent) = Path::new(&input.output).parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                warn!(target: "stmpo.exec.orchestrator", error = %e, "could not pre-create output dir");
            }
        }
        tokio::fs::create_dir_all(&input.log_dir)
            .await
            .map_err(|e| ExecError::LogDir {
                path: input.log_dir.clone(),
                source: e,
            })?;

        let slots: Vec<WorkerSlot> = subranges
            .iter()
            .enumerate()
            .map(|(i, &frames)| WorkerSlot {
                index: i,
                frames,
                block: blocks.as_ref().and_then(|b| b.get(i)).cloned(),
                command: renderer_command(input, frames),
                log_path: input.log_dir.join(format!("render-slot-{i}.log")),
            })
            .collect();

        let sup_cfg = SupervisorConfig {
            fail_fast: input.fail_fast.is_on(),
            child_timeout: (input.child_timeout_ms > 0)
                .then(|| Duration::from_millis(input.child_timeout_ms)),
            spawn_delay: Duration::from_millis(input.spawn_delay_ms),
            grace: Duration::from_millis(input.child_grace_ms),
            ..SupervisorConfig::default()
        };

        if input.task_timeout_ms > 0 {
            let token = self.cancel.clone();
            let limit = Duration::from_millis(input.task_timeout_ms);
            tokio::spawn(async move {
                tokio::select! {
                    _ = sleep(limit) => {
                        warn!(target: "stmpo.exec.orchestrator", "task timeout; terminating all children");
                        token.cancel();
                    }
                    _ = token.cancelled() => {}
                }
            });
        }

        let reports = run(slots, sup_cfg, pinner, self.cancel.clone()).await;

        for hook in &input.post_task_hooks {
            if let Err(reason) = run_hook(hook).await {
                warn!(
                    target: "stmpo.exec.orchestrator",
                    program = %hook.program.display(),
                    reason,
                    "post-task hook failed"
                );
            }
        }

        let result = TaskResult::from_slots(plan, reports);
        info!(
            target: "stmpo.exec.orchestrator",
            outcome = ?result.outcome,
            slots = result.slots.len(),
            "task finished"
        );
        Ok(result)
    }
}

/// Refuse to point several renderer processes at one video container file.
fn check_output_shape(output: &str, workers: u32) -> Result<(), ConfigError> {
    if workers <= 1 {
        return Ok(());
    }
    let lower = output.to_ascii_lowercase();
    if SINGLE_WRITER_EXTS.iter().any(|ext| lower.ends_with(ext)) {
        return Err(ConfigError::ParallelVideoOutput {
            output: output.to_string(),
            concurrency: workers,
        });
    }
    Ok(())
}

/// Run one collaborator hook to completion, capturing its output.
async fn run_hook(hook: &HookCommand) -> Result<(), String> {
    info!(
        target: "stmpo.exec.orchestrator",
        program = %hook.program.display(),
        args = ?hook.args,
        "running hook"
    );
    let out = tokio::process::Command::new(&hook.program)
        .args(&hook.args)
        .output()
        .await
        .map_err(|e| format!("spawn: {e}"))?;

    if !out.stdout.is_empty() {
        debug!(target: "stmpo.exec.hook", "{}", String::from_utf8_lossy(&out.stdout).trim_end());
    }
    if !out.stderr.is_empty() {
        debug!(target: "stmpo.exec.hook", "{}", String::from_utf8_lossy(&out.stderr).trim_end());
    }
    if !out.status.success() {
        let tail = String::from_utf8_lossy(&out.stderr);
        return Err(match out.status.code() {
            Some(code) => format!("exit code {code}: {}", tail.trim_end()),
            None => "terminated by signal".to_string(),
        });
    }
    Ok(())
}
