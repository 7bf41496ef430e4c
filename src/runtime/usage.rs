//! Resource usage sampling for running agents
//!
//! Read from procfs on Linux; other platforms report nothing.

use chrono::{DateTime, Utc};

/// Point-in-time resource usage of one process
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceUsage {
    /// Resident set size in MiB
    pub memory_mb: f64,
    /// Average CPU use since start, in percent of one core
    pub cpu_percent: f64,
}

/// Sample usage of `pid`, started at `started_at`
///
/// Returns `None` when the process is gone or the platform has no procfs.
pub async fn sample(pid: u32, started_at: DateTime<Utc>) -> Option<ResourceUsage> {
    sample_impl(pid, started_at).await
}

#[cfg(target_os = "linux")]
async fn sample_impl(pid: u32, started_at: DateTime<Utc>) -> Option<ResourceUsage> {
    let status = tokio::fs::read_to_string(format!("/proc/{}/status", pid))
        .await
        .ok()?;
    let stat = tokio::fs::read_to_string(format!("/proc/{}/stat", pid))
        .await
        .ok()?;

    let memory_mb = parse_vm_rss_kb(&status)? as f64 / 1024.0;
    let ticks = parse_cpu_ticks(&stat)?;
    let elapsed = (Utc::now() - started_at).num_milliseconds() as f64 / 1000.0;
    let cpu_percent = match clock_ticks_per_second() {
        Some(hz) if elapsed > 0.0 => (ticks as f64 / hz) / elapsed * 100.0,
        _ => 0.0,
    };

    Some(ResourceUsage {
        memory_mb,
        cpu_percent,
    })
}

#[cfg(not(target_os = "linux"))]
async fn sample_impl(_pid: u32, _started_at: DateTime<Utc>) -> Option<ResourceUsage> {
    None
}

#[cfg(target_os = "linux")]
fn clock_ticks_per_second() -> Option<f64> {
    use nix::unistd::{sysconf, SysconfVar};

    match sysconf(SysconfVar::CLK_TCK) {
        Ok(Some(hz)) if hz > 0 => Some(hz as f64),
        _ => None,
    }
}

/// `VmRSS:    1234 kB` from `/proc/<pid>/status`
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_vm_rss_kb(status: &str) -> Option<u64> {
    status
        .lines()
        .find_map(|line| line.strip_prefix("VmRSS:"))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|kb| kb.parse().ok())
}

/// utime + stime from `/proc/<pid>/stat`
///
/// The command name may contain spaces and parentheses, so fields are
/// counted from the last `)`.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_cpu_ticks(stat: &str) -> Option<u64> {
    let after_comm = &stat[stat.rfind(')')? + 1..];
    let fields: Vec<&str> = after_comm.split_whitespace().collect();
    // After the comm field: state is index 0, utime 11, stime 12
    let utime: u64 = fields.get(11)?.parse().ok()?;
    let stime: u64 = fields.get(12)?.parse().ok()?;
    Some(utime + stime)
}
