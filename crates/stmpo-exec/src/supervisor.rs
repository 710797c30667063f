use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use stmpo_model::{AffinityBlock, FrameRange, SlotReport, SlotStatus};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::{Instant, sleep, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::command::SlotCommand;
use crate::pin::CpuPinner;

/// One unit of supervision: a sub-range paired with its command, an optional
/// affinity block, and the per-slot log sink location.
#[derive(Debug, Clone)]
pub struct WorkerSlot {
    pub index: usize,
    pub frames: FrameRange,
    pub block: Option<AffinityBlock>,
    pub command: SlotCommand,
    pub log_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Terminate all siblings as soon as one slot fails or times out.
    pub fail_fast: bool,
    /// Wall-clock limit per child; `None` = unlimited.
    pub child_timeout: Option<Duration>,
    /// Stagger between child spawns; slot `i` waits `i * spawn_delay`.
    pub spawn_delay: Duration,
    /// Grace between terminate and kill when shutting a child down.
    pub grace: Duration,
    /// Interval of the progress heartbeat while children run.
    pub heartbeat: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            fail_fast: true,
            child_timeout: None,
            spawn_delay: Duration::from_secs(2),
            grace: Duration::from_secs(10),
            heartbeat: Duration::from_secs(30),
        }
    }
}

/// Spawn and supervise all slots until every one reaches a terminal status.
///
/// Children run concurrently; their output is drained continuously so no
/// child can stall a sibling by filling a pipe. The returned reports are
/// ordered by slot index and always cover every slot, including slots a
/// fail-fast cancellation never let finish (status `Terminated`).
///
/// `cancel` doubles as the external termination signal: cancelling it from
/// outside (OS signal, task-level timeout) terminates all running children
/// regardless of the fail-fast flag.
pub async fn run(
    slots: Vec<WorkerSlot>,
    cfg: SupervisorConfig,
    pinner: Arc<dyn CpuPinner>,
    cancel: CancellationToken,
) -> Vec<SlotReport> {
    let total = slots.len();
    let started = Instant::now();

    // Kept aside so a panicked supervision task still yields a report.
    let meta: Vec<(FrameRange, Option<AffinityBlock>, PathBuf)> = slots
        .iter()
        .map(|s| (s.frames, s.block.clone(), s.log_path.clone()))
        .collect();
    let mut finished: Vec<Option<SlotReport>> = std::iter::repeat_with(|| None).take(total).collect();
    let board = ProgressBoard::new(meta.iter().map(|(frames, _, _)| *frames));

    let mut set = JoinSet::new();
    for slot in slots {
        let delay = cfg.spawn_delay * slot.index as u32;
        set.spawn(run_slot(
            slot,
            delay,
            cfg.child_timeout,
            cfg.grace,
            Arc::clone(&pinner),
            Arc::clone(&board),
            cancel.clone(),
        ));
    }

    let heartbeat = cfg.heartbeat.max(Duration::from_millis(100));
    let mut ticker = tokio::time::interval_at(started + heartbeat, heartbeat);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let mut done = 0usize;
    while done < total {
        tokio::select! {
            joined = set.join_next() => {
                let Some(joined) = joined else { break };
                done += 1;
                match joined {
                    Ok(report) => {
                        let idx = report.index;
                        board.mark_done(idx, report.status);
                        let ok = report.status.is_success();
                        if ok {
                            info!(
                                target: "stmpo.exec.supervisor",
                                slot = report.index,
                                frames = %report.frames,
                                "slot succeeded"
                            );
                        } else {
                            warn!(
                                target: "stmpo.exec.supervisor",
                                slot = report.index,
                                frames = %report.frames,
                                status = ?report.status,
                                code = report.exit_code,
                                "slot did not succeed"
                            );
                        }
                        if !ok && cfg.fail_fast && !cancel.is_cancelled() {
                            warn!(
                                target: "stmpo.exec.supervisor",
                                slot = report.index,
                                "fail-fast: terminating remaining slots"
                            );
                            cancel.cancel();
                        }
                        finished[idx] = Some(report);
                    }
                    Err(e) => {
                        // kill_on_drop reaps the orphaned child.
                        error!(target: "stmpo.exec.supervisor", error = %e, "supervision task aborted");
                        if cfg.fail_fast && !cancel.is_cancelled() {
                            cancel.cancel();
                        }
                    }
                }
            }
            _ = ticker.tick() => {
                board.log_heartbeat(done, total, started.elapsed());
            }
        }
    }

    finished
        .into_iter()
        .enumerate()
        .map(|(i, r)| {
            r.unwrap_or_else(|| SlotReport {
                index: i,
                frames: meta[i].0,
                cpus: meta[i].1.clone(),
                status: SlotStatus::Failed,
                exit_code: None,
                log_path: Some(meta[i].2.clone()),
                error: Some("supervision task aborted".into()),
            })
        })
        .collect()
}

/// Live per-slot view kept current by the slot futures and read by the
/// heartbeat, so a stuck host can be correlated with the frames on it.
struct ProgressBoard {
    slots: Mutex<Vec<SlotProgress>>,
}

struct SlotProgress {
    frames: FrameRange,
    status: SlotStatus,
    started: Option<Instant>,
}

impl ProgressBoard {
    fn new(frames: impl Iterator<Item = FrameRange>) -> Arc<Self> {
        let slots = frames
            .map(|frames| SlotProgress {
                frames,
                status: SlotStatus::Pending,
                started: None,
            })
            .collect();
        Arc::new(Self {
            slots: Mutex::new(slots),
        })
    }

    fn mark_running(&self, index: usize) {
        if let Ok(mut slots) = self.slots.lock() {
            slots[index].status = SlotStatus::Running;
            slots[index].started = Some(Instant::now());
        }
    }

    fn mark_done(&self, index: usize, status: SlotStatus) {
        if let Ok(mut slots) = self.slots.lock() {
            slots[index].status = status;
        }
    }

    fn log_heartbeat(&self, done: usize, total: usize, elapsed: Duration) {
        info!(
            target: "stmpo.exec.supervisor",
            running = total - done,
            done,
            elapsed_s = elapsed.as_secs(),
            "heartbeat"
        );
        let Ok(slots) = self.slots.lock() else { return };
        for (slot, s) in slots.iter().enumerate() {
            if s.status == SlotStatus::Running {
                info!(
                    target: "stmpo.exec.supervisor",
                    slot,
                    frames = %s.frames,
                    elapsed_s = s.started.map(|t| t.elapsed().as_secs()).unwrap_or(0),
                    "slot running"
                );
            }
        }
    }
}

enum WaitOutcome {
    Exited(std::io::Result<std::process::ExitStatus>),
    Cancelled,
    TimedOut,
}

async fn run_slot(
    slot: WorkerSlot,
    delay: Duration,
    child_timeout: Option<Duration>,
    grace: Duration,
    pinner: Arc<dyn CpuPinner>,
    board: Arc<ProgressBoard>,
    cancel: CancellationToken,
) -> SlotReport {
    let mut report = SlotReport {
        index: slot.index,
        frames: slot.frames,
        cpus: slot.block.clone(),
        status: SlotStatus::Pending,
        exit_code: None,
        log_path: Some(slot.log_path.clone()),
        error: None,
    };

    if !delay.is_zero() {
        tokio::select! {
            _ = sleep(delay) => {}
            _ = cancel.cancelled() => {}
        }
    }
    if cancel.is_cancelled() {
        report.status = SlotStatus::Terminated;
        report.error = Some("cancelled before spawn".into());
        return report;
    }

    let log = match tokio::fs::File::create(&slot.log_path).await {
        Ok(f) => f,
        Err(e) => {
            report.status = SlotStatus::Failed;
            report.error = Some(format!("log sink: {e}"));
            return report;
        }
    };

    let mut cmd = Command::new(&slot.command.program);
    cmd.args(&slot.command.args);
    for (k, v) in &slot.command.env {
        cmd.env(k, v);
    }
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.kill_on_drop(true);

    info!(
        target: "stmpo.exec.supervisor",
        slot = slot.index,
        frames = %slot.frames,
        program = %slot.command.program.display(),
        "launching"
    );
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            warn!(target: "stmpo.exec.supervisor", slot = slot.index, error = %e, "spawn failed");
            report.status = SlotStatus::Failed;
            report.error = Some(format!("spawn: {e}"));
            return report;
        }
    };
    report.status = SlotStatus::Running;
    board.mark_running(slot.index);
    let pid = child.id().unwrap_or_default();

    // Pin after spawn: affinity APIs want a live process handle. A failed
    // pin downgrades the slot to unpinned, never aborts it.
    if let Some(block) = &slot.block {
        match pinner.pin(pid, block) {
            Ok(()) => {
                info!(target: "stmpo.exec.supervisor", slot = slot.index, pid, cpus = %block, "affinity applied");
            }
            Err(e) => {
                warn!(target: "stmpo.exec.supervisor", slot = slot.index, pid, error = %e, "pin failed; slot runs unpinned");
                report.cpus = None;
            }
        }
    }

    // Both pipes feed one writer so the log file stays line-atomic.
    let (tx, mut rx) = mpsc::channel::<String>(256);
    let mut drains = JoinSet::new();
    if let Some(stdout) = child.stdout.take() {
        drains.spawn(drain_lines(stdout, slot.index, pid, tx.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        drains.spawn(drain_lines(stderr, slot.index, pid, tx.clone()));
    }
    drop(tx);
    let writer = tokio::spawn(async move {
        let mut log = log;
        while let Some(line) = rx.recv().await {
            let _ = log.write_all(line.as_bytes()).await;
            let _ = log.write_all(b"\n").await;
        }
        let _ = log.flush().await;
    });

    let deadline = child_timeout.map(|t| Instant::now() + t);
    let outcome = tokio::select! {
        status = child.wait() => WaitOutcome::Exited(status),
        _ = cancel.cancelled() => WaitOutcome::Cancelled,
        _ = wait_deadline(deadline) => WaitOutcome::TimedOut,
    };

    match outcome {
        WaitOutcome::Exited(Ok(status)) => {
            report.exit_code = status.code();
            if status.success() {
                report.status = SlotStatus::Succeeded;
            } else {
                report.status = SlotStatus::Failed;
                report.error = Some(match status.code() {
                    Some(code) => format!("exit code: {code}"),
                    None => "terminated by signal".to_string(),
                });
            }
        }
        WaitOutcome::Exited(Err(e)) => {
            report.status = SlotStatus::Failed;
            report.error = Some(format!("wait: {e}"));
        }
        WaitOutcome::Cancelled => {
            debug!(target: "stmpo.exec.supervisor", slot = slot.index, pid, "cancelled; stopping child");
            kill_graceful(&mut child, grace).await;
            report.status = SlotStatus::Terminated;
            report.error = Some("terminated by policy".into());
        }
        WaitOutcome::TimedOut => {
            warn!(target: "stmpo.exec.supervisor", slot = slot.index, pid, "child timeout; stopping child");
            kill_graceful(&mut child, grace).await;
            report.status = SlotStatus::TimedOut;
            report.error = Some(format!(
                "timed out after {}s",
                child_timeout.unwrap_or_default().as_secs_f64()
            ));
        }
    }

    // Collect the output tail before reporting.
    while drains.join_next().await.is_some() {}
    let _ = writer.await;

    report
}

/// Forward one child stream line by line. Renderers interleave binary
/// progress output with text, so invalid UTF-8 is replaced rather than
/// treated as end-of-stream: dropping the reader early would sever the pipe
/// and fail a healthy child on its next write.
async fn drain_lines<R>(reader: R, slot: usize, pid: u32, tx: mpsc::Sender<String>)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::with_capacity(256);
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                while matches!(buf.last(), Some(b'\n' | b'\r')) {
                    buf.pop();
                }
                let line = String::from_utf8_lossy(&buf).into_owned();
                debug!(target: "stmpo.exec.child", slot, pid, "{line}");
                if tx.send(line).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!(target: "stmpo.exec.child", slot, pid, error = %e, "stream closed");
                break;
            }
        }
    }
}

async fn wait_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(d) => sleep_until(d).await,
        None => std::future::pending().await,
    }
}

#[cfg(unix)]
async fn kill_graceful(child: &mut Child, grace: Duration) {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;
    if let Some(id) = child.id() {
        let _ = kill(Pid::from_raw(id as i32), Signal::SIGTERM);
        if tokio::time::timeout(grace, child.wait()).await.is_ok() {
            return;
        }
    }
    let _ = child.kill().await;
}

#[cfg(windows)]
async fn kill_graceful(child: &mut Child, _grace: Duration) {
    let _ = child.kill().await;
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::pin::NoopPinner;

    fn shell_slot(index: usize, script: &str, dir: &std::path::Path) -> WorkerSlot {
        WorkerSlot {
            index,
            frames: FrameRange::new(index as i64 * 10, index as i64 * 10 + 9),
            block: None,
            command: SlotCommand {
                program: "/bin/sh".into(),
                args: vec!["-c".into(), script.into()],
                env: vec![],
            },
            log_path: dir.join(format!("slot-{index}.log")),
        }
    }

    fn test_cfg(fail_fast: bool) -> SupervisorConfig {
        SupervisorConfig {
            fail_fast,
            child_timeout: None,
            spawn_delay: Duration::ZERO,
            grace: Duration::from_millis(200),
            heartbeat: Duration::from_secs(30),
        }
    }

    async fn run_slots(slots: Vec<WorkerSlot>, cfg: SupervisorConfig) -> Vec<SlotReport> {
        run(slots, cfg, Arc::new(NoopPinner), CancellationToken::new()).await
    }

    #[tokio::test]
    async fn all_slots_succeed() {
        let dir = tempfile::tempdir().unwrap();
        let slots = (0..3)
            .map(|i| shell_slot(i, "echo rendering", dir.path()))
            .collect();
        let reports = run_slots(slots, test_cfg(true)).await;
        assert_eq!(reports.len(), 3);
        for (i, r) in reports.iter().enumerate() {
            assert_eq!(r.index, i);
            assert_eq!(r.status, SlotStatus::Succeeded);
            assert_eq!(r.exit_code, Some(0));
        }
    }

    #[tokio::test]
    async fn fail_fast_terminates_siblings_early() {
        let dir = tempfile::tempdir().unwrap();
        let mut slots = vec![shell_slot(0, "sleep 0.1; exit 7", dir.path())];
        for i in 1..4 {
            slots.push(shell_slot(i, "sleep 5", dir.path()));
        }

        let started = std::time::Instant::now();
        let reports = run_slots(slots, test_cfg(true)).await;
        let elapsed = started.elapsed();

        assert!(elapsed < Duration::from_secs(3), "waited too long: {elapsed:?}");
        assert_eq!(reports[0].status, SlotStatus::Failed);
        assert_eq!(reports[0].exit_code, Some(7));
        for r in &reports[1..] {
            assert_eq!(r.status, SlotStatus::Terminated, "slot {}", r.index);
        }
    }

    #[tokio::test]
    async fn without_fail_fast_every_slot_finishes() {
        let dir = tempfile::tempdir().unwrap();
        let slots = vec![
            shell_slot(0, "exit 1", dir.path()),
            shell_slot(1, "sleep 0.3; echo ok", dir.path()),
            shell_slot(2, "sleep 0.3", dir.path()),
        ];
        let reports = run_slots(slots, test_cfg(false)).await;
        assert_eq!(reports[0].status, SlotStatus::Failed);
        assert_eq!(reports[1].status, SlotStatus::Succeeded);
        assert_eq!(reports[2].status, SlotStatus::Succeeded);
        assert!(reports.iter().all(|r| r.status.is_terminal()));
    }

    #[tokio::test]
    async fn child_timeout_is_enforced() {
        let dir = tempfile::tempdir().unwrap();
        let slots = vec![shell_slot(0, "sleep 5", dir.path())];
        let cfg = SupervisorConfig {
            child_timeout: Some(Duration::from_millis(200)),
            ..test_cfg(false)
        };

        let started = std::time::Instant::now();
        let reports = run_slots(slots, cfg).await;
        assert!(started.elapsed() < Duration::from_secs(3));
        assert_eq!(reports[0].status, SlotStatus::TimedOut);
        assert!(reports[0].error.as_deref().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn spawn_failure_is_a_slot_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut bad = shell_slot(0, "true", dir.path());
        bad.command.program = "/no/such/renderer".into();
        let slots = vec![bad, shell_slot(1, "sleep 5", dir.path())];

        let started = std::time::Instant::now();
        let reports = run_slots(slots, test_cfg(true)).await;
        assert!(started.elapsed() < Duration::from_secs(3));
        assert_eq!(reports[0].status, SlotStatus::Failed);
        assert!(reports[0].error.as_deref().unwrap().starts_with("spawn:"));
        assert_eq!(reports[1].status, SlotStatus::Terminated);
    }

    #[tokio::test]
    async fn external_cancellation_terminates_everything() {
        let dir = tempfile::tempdir().unwrap();
        let slots = (0..2).map(|i| shell_slot(i, "sleep 5", dir.path())).collect();
        let cancel = CancellationToken::new();
        let killer = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(100)).await;
            killer.cancel();
        });

        let started = std::time::Instant::now();
        let reports = run(slots, test_cfg(false), Arc::new(NoopPinner), cancel).await;
        assert!(started.elapsed() < Duration::from_secs(3));
        assert!(reports.iter().all(|r| r.status == SlotStatus::Terminated));
    }

    #[tokio::test]
    async fn invalid_utf8_does_not_sever_the_log_drain() {
        let dir = tempfile::tempdir().unwrap();
        let slots = vec![shell_slot(
            0,
            "printf 'before\\n'; printf '\\377\\376bad\\n'; sleep 0.3; printf 'after\\n'",
            dir.path(),
        )];
        let reports = run_slots(slots, test_cfg(true)).await;
        assert_eq!(reports[0].status, SlotStatus::Succeeded);
        assert_eq!(reports[0].exit_code, Some(0));

        let log = std::fs::read_to_string(reports[0].log_path.as_ref().unwrap()).unwrap();
        assert!(log.contains("before"), "log was: {log}");
        assert!(log.contains("after"), "log was: {log}");
    }

    #[test]
    fn progress_board_tracks_slot_phases() {
        let board = ProgressBoard::new([FrameRange::new(0, 9), FrameRange::new(10, 19)].into_iter());
        board.mark_running(1);
        {
            let slots = board.slots.lock().unwrap();
            assert_eq!(slots[0].status, SlotStatus::Pending);
            assert_eq!(slots[1].status, SlotStatus::Running);
            assert!(slots[1].started.is_some());
        }
        board.mark_done(1, SlotStatus::Succeeded);
        let slots = board.slots.lock().unwrap();
        assert_eq!(slots[1].status, SlotStatus::Succeeded);
    }

    #[tokio::test]
    async fn heartbeat_fires_while_children_run() {
        let dir = tempfile::tempdir().unwrap();
        let slots = vec![shell_slot(0, "sleep 0.3", dir.path())];
        let cfg = SupervisorConfig {
            heartbeat: Duration::from_millis(50),
            ..test_cfg(false)
        };
        let reports = run_slots(slots, cfg).await;
        assert_eq!(reports[0].status, SlotStatus::Succeeded);
    }

    #[tokio::test]
    async fn both_streams_reach_the_log_sink() {
        let dir = tempfile::tempdir().unwrap();
        let slots = vec![shell_slot(0, "echo out-line; echo err-line 1>&2", dir.path())];
        let reports = run_slots(slots, test_cfg(true)).await;
        assert_eq!(reports[0].status, SlotStatus::Succeeded);

        let log = std::fs::read_to_string(reports[0].log_path.as_ref().unwrap()).unwrap();
        assert!(log.contains("out-line"), "log was: {log}");
        assert!(log.contains("err-line"), "log was: {log}");
    }
}
