use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use uuid::Uuid;

use stmpo_exec::Orchestrator;
use stmpo_model::{LogSettings, TaskInput, TaskOutcome};
use stmpo_observe::{LoggerConfig, logger_init};

const TASK_FILE_ENV: &str = "STMPO_TASK_FILE";

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            // The logger may not exist yet at this point (bad CLI, unreadable
            // bundle), so stderr is the only reliable channel.
            eprintln!("stmpo-agent: {e:#}");
            exit_code_for(TaskOutcome::StartupFailed)
        }
    }
}

async fn run() -> anyhow::Result<ExitCode> {
    let path = bundle_path()?;
    let raw = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("reading task bundle {}", path.display()))?;
    let input: TaskInput =
        serde_json::from_str(&raw).with_context(|| format!("parsing task bundle {}", path.display()))?;

    init_logging(&input.log)?;

    let invocation = Uuid::new_v4();
    info!(
        target: "stmpo.agent",
        %invocation,
        bundle = %path.display(),
        project = %input.project.display(),
        frames = %input.frames,
        "task bundle loaded"
    );

    let orchestrator = Orchestrator::new(input);
    watch_signals(orchestrator.cancel_token());

    match orchestrator.execute().await {
        Ok(result) => {
            // Machine-readable report for the job system; logs stay on the
            // logger's own sink.
            println!("{}", serde_json::to_string_pretty(&result)?);
            info!(target: "stmpo.agent", %invocation, outcome = ?result.outcome, "done");
            Ok(exit_code_for(result.outcome))
        }
        Err(e) => {
            error!(target: "stmpo.agent", %invocation, error = %e, "task failed before any child ran");
            Ok(exit_code_for(TaskOutcome::StartupFailed))
        }
    }
}

/// Bundle path from argv[1], falling back to `STMPO_TASK_FILE`.
fn bundle_path() -> anyhow::Result<PathBuf> {
    if let Some(arg) = std::env::args_os().nth(1) {
        return Ok(PathBuf::from(arg));
    }
    if let Some(env) = std::env::var_os(TASK_FILE_ENV) {
        return Ok(PathBuf::from(env));
    }
    anyhow::bail!("usage: stmpo-agent <task-bundle.json> (or set {TASK_FILE_ENV})");
}

fn init_logging(settings: &LogSettings) -> anyhow::Result<()> {
    let mut cfg = LoggerConfig::default();
    if let Some(format) = &settings.format {
        cfg.format = format.parse()?;
    }
    if let Some(level) = &settings.level {
        cfg.level = level.clone();
    }
    cfg.file = settings.file.clone();
    logger_init(&cfg).context("installing logger")?;
    Ok(())
}

/// Cancel the task on Ctrl+C, and on SIGTERM where the platform has one.
/// Cancellation is cooperative; the supervisor turns it into graceful child
/// shutdown.
fn watch_signals(cancel: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};
            let mut term = match signal(SignalKind::terminate()) {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!(target: "stmpo.agent", error = %e, "cannot install SIGTERM handler");
                    return;
                }
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!(target: "stmpo.agent", "interrupt received"),
                _ = term.recv() => info!(target: "stmpo.agent", "termination requested"),
            }
        }
        #[cfg(not(unix))]
        {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!(target: "stmpo.agent", "interrupt received");
            }
        }
        cancel.cancel();
    });
}

fn exit_code_for(outcome: TaskOutcome) -> ExitCode {
    ExitCode::from(outcome.exit_code() as u8)
}
