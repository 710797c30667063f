use std::thread::available_parallelism;

use stmpo_model::HostResources;
use tracing::debug;

use crate::error::HostError;

/// Read the live resource counters of this host.
///
/// Independent of the NUMA map: planning only needs these numbers, so this
/// must succeed (or fail) on its own. Callers treat a failure as "plan one
/// worker", never as a fatal error.
pub fn query_host_resources() -> Result<HostResources, HostError> {
    let logical_cores = available_parallelism()
        .map_err(|e| HostError::LogicalCores(e.to_string()))?
        .get() as u32;

    let total_ram_bytes = total_ram_bytes()?;

    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.to_str().map(str::to_owned))
        .unwrap_or_else(|| "unknown".to_string());

    let host = HostResources {
        logical_cores,
        total_ram_bytes,
        os: std::env::consts::OS.to_string(),
        hostname,
    };
    debug!(
        target: "stmpo.core.host",
        cores = host.logical_cores,
        ram_gb = format!("{:.1}", host.total_ram_gb()),
        os = %host.os,
        host = %host.hostname,
        "host resources"
    );
    Ok(host)
}

#[cfg(target_os = "linux")]
fn total_ram_bytes() -> Result<u64, HostError> {
    let meminfo = std::fs::read_to_string("/proc/meminfo")
        .map_err(|e| HostError::TotalRam(e.to_string()))?;
    parse_meminfo_total(&meminfo).ok_or_else(|| HostError::TotalRam("MemTotal not found".into()))
}

#[cfg(windows)]
fn total_ram_bytes() -> Result<u64, HostError> {
    use windows_sys::Win32::System::SystemInformation::{GlobalMemoryStatusEx, MEMORYSTATUSEX};

    let mut status: MEMORYSTATUSEX = unsafe { std::mem::zeroed() };
    status.dwLength = std::mem::size_of::<MEMORYSTATUSEX>() as u32;
    let rc = unsafe { GlobalMemoryStatusEx(&mut status) };
    if rc == 0 {
        return Err(HostError::TotalRam(
            std::io::Error::last_os_error().to_string(),
        ));
    }
    Ok(status.ullTotalPhys)
}

#[cfg(target_os = "macos")]
fn total_ram_bytes() -> Result<u64, HostError> {
    let mut size: u64 = 0;
    let mut len = std::mem::size_of::<u64>();
    let rc = unsafe {
        libc::sysctlbyname(
            c"hw.memsize".as_ptr(),
            &mut size as *mut u64 as *mut libc::c_void,
            &mut len,
            std::ptr::null_mut(),
            0,
        )
    };
    if rc != 0 {
        return Err(HostError::TotalRam(
            std::io::Error::last_os_error().to_string(),
        ));
    }
    Ok(size)
}

#[cfg(not(any(target_os = "linux", target_os = "macos", windows)))]
fn total_ram_bytes() -> Result<u64, HostError> {
    Err(HostError::TotalRam(format!(
        "unsupported platform: {}",
        std::env::consts::OS
    )))
}

/// MemTotal line is reported in kB.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_meminfo_total(meminfo: &str) -> Option<u64> {
    for line in meminfo.lines() {
        if let Some(rest) = line.strip_prefix("MemTotal:") {
            let kb: u64 = rest.trim().trim_end_matches("kB").trim().parse().ok()?;
            return Some(kb * 1024);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::parse_meminfo_total;

    #[test]
    fn meminfo_total_is_parsed() {
        let sample = "MemTotal:       131072000 kB\nMemFree:        1024 kB\n";
        assert_eq!(parse_meminfo_total(sample), Some(131_072_000 * 1024));
    }

    #[test]
    fn missing_total_yields_none() {
        assert_eq!(parse_meminfo_total("MemFree: 1 kB\n"), None);
    }

    #[cfg(any(target_os = "linux", target_os = "macos", windows))]
    #[test]
    fn host_query_succeeds_without_topology() {
        let host = super::query_host_resources().unwrap();
        assert!(host.logical_cores >= 1);
        assert!(host.total_ram_bytes > 0);
    }
}
