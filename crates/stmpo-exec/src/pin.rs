use std::sync::Arc;

use stmpo_model::AffinityBlock;
use thiserror::Error;

/// Platform pin call failed for a live child. Recoverable per slot: the
/// caller logs a warning and the child runs unpinned.
#[derive(Debug, Error)]
pub enum PinError {
    #[error("empty affinity block")]
    EmptyBlock,
    #[error("cpu pinning is not supported on this platform")]
    Unsupported,
    #[error("affinity call failed for pid {pid}: {source}")]
    Syscall {
        pid: u32,
        #[source]
        source: std::io::Error,
    },
}

/// Capability for pinning an already-spawned child to an affinity block.
///
/// Platform differences (POSIX CPU sets vs. Windows processor groups) live
/// behind this trait; the allocator and supervisor never branch on the
/// platform themselves.
pub trait CpuPinner: Send + Sync {
    fn name(&self) -> &'static str;

    /// Width of one processor group when a flat mask cannot address every
    /// CPU on this host; `None` on hosts with a single flat mask space.
    fn group_span(&self) -> Option<u32> {
        None
    }

    /// Pin `pid` to the block. Called once per slot, right after spawn:
    /// every supported affinity API operates on a live process handle.
    fn pin(&self, pid: u32, block: &AffinityBlock) -> Result<(), PinError>;
}

/// Fallback used when affinity is disabled, the topology is absent, or the
/// platform has no pinning support. Pinning "succeeds" by doing nothing.
pub struct NoopPinner;

impl CpuPinner for NoopPinner {
    fn name(&self) -> &'static str {
        "noop"
    }

    fn pin(&self, _pid: u32, _block: &AffinityBlock) -> Result<(), PinError> {
        Ok(())
    }
}

#[cfg(target_os = "linux")]
pub struct PosixPinner;

#[cfg(target_os = "linux")]
impl CpuPinner for PosixPinner {
    fn name(&self) -> &'static str {
        "posix"
    }

    fn pin(&self, pid: u32, block: &AffinityBlock) -> Result<(), PinError> {
        if block.cpus.is_empty() {
            return Err(PinError::EmptyBlock);
        }
        unsafe {
            let mut set: libc::cpu_set_t = std::mem::zeroed();
            libc::CPU_ZERO(&mut set);
            for &cpu in &block.cpus {
                libc::CPU_SET(cpu as usize, &mut set);
            }
            let rc = libc::sched_setaffinity(
                pid as libc::pid_t,
                std::mem::size_of::<libc::cpu_set_t>(),
                &set,
            );
            if rc != 0 {
                return Err(PinError::Syscall {
                    pid,
                    source: std::io::Error::last_os_error(),
                });
            }
        }
        Ok(())
    }
}

/// Windows pinner, aware of processor groups: above 64 logical CPUs a single
/// mask cannot address the whole host, so blocks carry a group id and the
/// mask is built from within-group bit positions. The allocator guarantees a
/// block never spans groups.
#[cfg(windows)]
pub struct WindowsPinner {
    span: Option<u32>,
}

#[cfg(windows)]
impl WindowsPinner {
    const GROUP_WIDTH: u32 = 64;

    pub fn new(logical_cores: u32) -> Self {
        let span = (logical_cores > Self::GROUP_WIDTH).then_some(Self::GROUP_WIDTH);
        Self { span }
    }
}

#[cfg(windows)]
impl CpuPinner for WindowsPinner {
    fn name(&self) -> &'static str {
        "windows"
    }

    fn group_span(&self) -> Option<u32> {
        self.span
    }

    fn pin(&self, pid: u32, block: &AffinityBlock) -> Result<(), PinError> {
        use windows_sys::Win32::Foundation::CloseHandle;
        use windows_sys::Win32::System::Threading::{
            OpenProcess, PROCESS_QUERY_LIMITED_INFORMATION, PROCESS_SET_INFORMATION,
            SetProcessAffinityMask,
        };

        if block.cpus.is_empty() {
            return Err(PinError::EmptyBlock);
        }
        let width = self.span.unwrap_or(Self::GROUP_WIDTH);
        let mut mask: usize = 0;
        for &cpu in &block.cpus {
            mask |= 1usize << (cpu % width) as usize;
        }

        // The mask applies within the process's current group; a freshly
        // spawned child that landed in a different group fails the call and
        // the slot proceeds unpinned.
        unsafe {
            let handle = OpenProcess(
                PROCESS_SET_INFORMATION | PROCESS_QUERY_LIMITED_INFORMATION,
                0,
                pid,
            );
            if handle.is_null() {
                return Err(PinError::Syscall {
                    pid,
                    source: std::io::Error::last_os_error(),
                });
            }
            let rc = SetProcessAffinityMask(handle, mask);
            let err = std::io::Error::last_os_error();
            CloseHandle(handle);
            if rc == 0 {
                return Err(PinError::Syscall { pid, source: err });
            }
        }
        Ok(())
    }
}

/// Pick the pinning capability for this invocation.
///
/// No-op when affinity is disabled or no usable topology exists; otherwise
/// the platform variant. Unsupported platforms degrade to no-op with a
/// warning rather than failing the task.
pub fn select_pinner(
    affinity_enabled: bool,
    topology_present: bool,
    logical_cores: u32,
) -> Arc<dyn CpuPinner> {
    if !affinity_enabled || !topology_present {
        return Arc::new(NoopPinner);
    }
    cfg_if::cfg_if! {
        if #[cfg(target_os = "linux")] {
            let _ = logical_cores;
            Arc::new(PosixPinner)
        } else if #[cfg(windows)] {
            Arc::new(WindowsPinner::new(logical_cores))
        } else {
            let _ = logical_cores;
            tracing::warn!(target: "stmpo.exec.pin", os = std::env::consts::OS, "no pinning support; running unpinned");
            Arc::new(NoopPinner)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_affinity_selects_noop() {
        assert_eq!(select_pinner(false, true, 8).name(), "noop");
        assert_eq!(select_pinner(true, false, 8).name(), "noop");
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn posix_pinner_pins_own_process() {
        // Pin to the cpu we are currently allowed on; cpu 0 exists everywhere.
        let block = AffinityBlock::new(vec![0]);
        PosixPinner.pin(std::process::id(), &block).unwrap();
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn posix_pinner_rejects_empty_block() {
        let block = AffinityBlock::new(vec![]);
        assert!(matches!(
            PosixPinner.pin(std::process::id(), &block),
            Err(PinError::EmptyBlock)
        ));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn stale_pid_reports_syscall_error() {
        // PID 0 targets "this process" for sched_setaffinity, so use an id
        // that cannot exist instead.
        let block = AffinityBlock::new(vec![0]);
        assert!(matches!(
            PosixPinner.pin(u32::MAX - 1, &block),
            Err(PinError::Syscall { .. })
        ));
    }
}
