use stmpo_model::{ConcurrencyPlan, HostResources, PlanSource, PlannerTuning};
use tracing::{info, warn};

use crate::error::{ConfigError, HostError};

/// Planning inputs, lifted out of the task bundle.
#[derive(Debug, Clone)]
pub struct PlanConfig {
    /// Explicit worker count; `0` selects auto mode.
    pub explicit: u32,
    pub max_concurrency: u32,
    pub ram_per_process_gb: f64,
    pub multi_frame_rendering: bool,
    pub tuning: PlannerTuning,
}

/// Derive the worker count for one task.
///
/// Explicit requests are clamped into `[1, max_concurrency]`. Auto mode takes
/// the smaller of a RAM bound (80% of physical RAM divided by the per-process
/// budget) and a CPU bound (logical cores divided by the per-process thread
/// appetite), floor-rounded throughout so resource pressure always errs on
/// the side of fewer workers. A failed host query degrades to one worker with
/// a recorded reason; only nonsensical configuration is an error.
pub fn plan(
    cfg: &PlanConfig,
    host: Result<&HostResources, &HostError>,
) -> Result<ConcurrencyPlan, ConfigError> {
    if cfg.max_concurrency < 1 {
        return Err(ConfigError::InvalidMaxConcurrency(cfg.max_concurrency));
    }
    if cfg.explicit == 0 && cfg.ram_per_process_gb <= 0.0 {
        return Err(ConfigError::InvalidRamBudget(cfg.ram_per_process_gb));
    }
    if cfg.tuning.threads_per_process == 0 || cfg.tuning.threads_per_process_mfr == 0 {
        return Err(ConfigError::InvalidThreadTuning);
    }

    if cfg.explicit > 0 {
        let workers = cfg.explicit.clamp(1, cfg.max_concurrency);
        info!(
            target: "stmpo.core.planner",
            workers,
            requested = cfg.explicit,
            "explicit concurrency"
        );
        return Ok(ConcurrencyPlan {
            workers,
            source: PlanSource::Explicit,
            ram_bound: 0,
            cpu_bound: 0,
        });
    }

    let host = match host {
        Ok(h) => h,
        Err(e) => {
            warn!(
                target: "stmpo.core.planner",
                error = %e,
                "host resources unavailable; planning a single worker"
            );
            return Ok(ConcurrencyPlan {
                workers: 1,
                source: PlanSource::Fallback {
                    reason: e.to_string(),
                },
                ram_bound: 1,
                cpu_bound: 1,
            });
        }
    };

    let ram_bound = ((host.total_ram_gb() * 0.8 / cfg.ram_per_process_gb) as u32).max(1);
    let threads_per_process = if cfg.multi_frame_rendering {
        cfg.tuning.threads_per_process_mfr
    } else {
        cfg.tuning.threads_per_process
    };
    let cpu_bound = (host.logical_cores / threads_per_process).max(1);

    let workers = ram_bound.min(cpu_bound).min(cfg.max_concurrency).max(1);
    info!(
        target: "stmpo.core.planner",
        workers,
        ram_bound,
        cpu_bound,
        max = cfg.max_concurrency,
        mfr = cfg.multi_frame_rendering,
        "auto concurrency"
    );
    Ok(ConcurrencyPlan {
        workers,
        source: PlanSource::Auto,
        ram_bound,
        cpu_bound,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(cores: u32, ram_gb: u64) -> HostResources {
        HostResources {
            logical_cores: cores,
            total_ram_bytes: ram_gb * 1024 * 1024 * 1024,
            os: "linux".into(),
            hostname: "render-01".into(),
        }
    }

    fn cfg(explicit: u32, max: u32, ram_per: f64, mfr: bool) -> PlanConfig {
        PlanConfig {
            explicit,
            max_concurrency: max,
            ram_per_process_gb: ram_per,
            multi_frame_rendering: mfr,
            tuning: PlannerTuning::default(),
        }
    }

    #[test]
    fn explicit_is_clamped_to_max() {
        let h = host(8, 32);
        let p = plan(&cfg(100, 12, 10.0, true), Ok(&h)).unwrap();
        assert_eq!(p.workers, 12);
        assert_eq!(p.source, PlanSource::Explicit);
    }

    #[test]
    fn auto_respects_ram_bound() {
        // 32 GB * 0.8 / 10 GB = 2.56 -> floor 2
        let h = host(256, 32);
        let p = plan(&cfg(0, 32, 10.0, false), Ok(&h)).unwrap();
        assert_eq!(p.ram_bound, 2);
        assert_eq!(p.workers, 2);
        assert_eq!(p.source, PlanSource::Auto);
    }

    #[test]
    fn auto_respects_cpu_bound_under_mfr() {
        // Big render node: 256 cores, 1024 GB, 32 GB/process, max 24, MFR on.
        // ram bound = floor(1024*0.8/32) = 25, cpu bound = 256/16 = 16.
        let h = host(256, 1024);
        let p = plan(&cfg(0, 24, 32.0, true), Ok(&h)).unwrap();
        assert_eq!(p.ram_bound, 25);
        assert_eq!(p.cpu_bound, 16);
        assert_eq!(p.workers, 16);
    }

    #[test]
    fn mfr_off_uses_smaller_divisor() {
        let h = host(64, 1024);
        let on = plan(&cfg(0, 64, 1.0, true), Ok(&h)).unwrap();
        let off = plan(&cfg(0, 64, 1.0, false), Ok(&h)).unwrap();
        assert_eq!(on.cpu_bound, 4);
        assert_eq!(off.cpu_bound, 16);
        assert!(off.workers >= on.workers);
    }

    #[test]
    fn never_below_one_even_on_tiny_hosts() {
        let h = host(1, 1);
        let p = plan(&cfg(0, 32, 64.0, true), Ok(&h)).unwrap();
        assert_eq!(p.workers, 1);
    }

    #[test]
    fn failed_host_query_falls_back_to_one() {
        let err = HostError::TotalRam("no /proc".into());
        let p = plan(&cfg(0, 32, 10.0, true), Err(&err)).unwrap();
        assert_eq!(p.workers, 1);
        assert!(matches!(p.source, PlanSource::Fallback { .. }));
    }

    #[test]
    fn explicit_mode_ignores_failed_host_query() {
        let err = HostError::LogicalCores("eperm".into());
        let p = plan(&cfg(4, 32, 10.0, true), Err(&err)).unwrap();
        assert_eq!(p.workers, 4);
        assert_eq!(p.source, PlanSource::Explicit);
    }

    #[test]
    fn zero_max_concurrency_is_a_config_error() {
        let h = host(8, 32);
        assert!(matches!(
            plan(&cfg(0, 0, 10.0, true), Ok(&h)),
            Err(ConfigError::InvalidMaxConcurrency(0))
        ));
    }
}
