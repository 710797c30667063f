use std::path::PathBuf;

use stmpo_model::{FrameRange, TaskInput};

/// Fully resolved command for one worker slot: program, argv, and the
/// environment overrides merged over the parent environment at spawn time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

/// Build the renderer invocation for one sub-range.
///
/// The renderer expects `-mfr <ON|OFF> <maxCpuPercent>` with the percentage
/// present even when MFR is off (it is ignored in that case).
pub fn renderer_command(input: &TaskInput, frames: FrameRange) -> SlotCommand {
    let mut args: Vec<String> = vec![
        "-project".into(),
        input.project.display().to_string(),
        "-output".into(),
        input.output.clone(),
        "-sound".into(),
        "OFF".into(),
        "-s".into(),
        frames.start.to_string(),
        "-e".into(),
        frames.end.to_string(),
    ];

    if let Some(comp) = &input.comp {
        args.push("-comp".into());
        args.push(comp.clone());
    }
    if let Some(rq) = input.rq_index {
        args.push("-rqindex".into());
        args.push(rq.to_string());
    }
    if let Some(rs) = &input.rs_template {
        args.push("-RStemplate".into());
        args.push(rs.clone());
    }
    if let Some(om) = &input.om_template {
        args.push("-OMtemplate".into());
        args.push(om.clone());
    }

    args.push("-mfr".into());
    args.push(if input.multi_frame_rendering.is_on() {
        "ON".into()
    } else {
        "OFF".into()
    });
    args.push(input.mfr_max_cpu_percent.to_string());

    let env = input
        .env
        .iter()
        .map(|kv| (kv.key().to_string(), kv.value().to_string()))
        .collect();

    SlotCommand {
        program: input.renderer_path.clone(),
        args,
        env,
    }
}
