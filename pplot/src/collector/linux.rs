use super::{CollectorError, CollectorResult, ProcessCollector, ProcessSnapshot, ProcessStatus};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io;
use std::path::Path;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Linux's USER_HZ on every mainstream architecture.
const FALLBACK_CLOCK_TICKS: u64 = 100;
const FALLBACK_PAGE_SIZE: u64 = 4096;

#[derive(Clone)]
struct CpuSample {
    total_ticks: u64, // utime + stime
    timestamp: Instant,
}

/// The subset of `/proc/<pid>/stat` the collector reads.
#[derive(Debug, Clone, PartialEq)]
struct StatFields {
    state: char,
    ppid: u32,
    utime: u64,
    stime: u64,
    num_threads: u64,
    start_time_ticks: u64,
    vsize: u64,
    rss_pages: u64,
}

pub struct LinuxProcessCollector {
    page_size: u64,
    clock_ticks: u64,
    boot_time: u64,
    // Keyed by (pid, start time) so a recycled pid starts a fresh baseline
    cpu_samples: Mutex<HashMap<(u32, u64), CpuSample>>,
}

impl LinuxProcessCollector {
    pub fn new() -> Self {
        let page_size = Self::sysconf(libc::_SC_PAGESIZE).unwrap_or(FALLBACK_PAGE_SIZE);
        let clock_ticks = Self::sysconf(libc::_SC_CLK_TCK).unwrap_or(FALLBACK_CLOCK_TICKS);
        let boot_time = Self::get_boot_time();
        Self {
            page_size,
            clock_ticks,
            boot_time,
            cpu_samples: Mutex::new(HashMap::new()),
        }
    }

    fn sysconf(name: libc::c_int) -> Option<u64> {
        let value = unsafe { libc::sysconf(name) };
        (value > 0).then_some(value as u64)
    }

    fn get_boot_time() -> u64 {
        let stat = fs::read_to_string("/proc/stat").unwrap_or_default();
        for line in stat.lines() {
            if let Some(value) = line.strip_prefix("btime ") {
                return value.trim().parse().unwrap_or(0);
            }
        }
        0
    }

    fn read_stat(&self, pid: u32) -> CollectorResult<StatFields> {
        let content =
            fs::read_to_string(format!("/proc/{}/stat", pid)).map_err(|e| map_io_error(pid, e))?;
        // An empty read means the process went away between open and read
        if content.is_empty() {
            return Err(CollectorError::NoSuchProcess(pid));
        }
        parse_stat(pid, &content)
    }

    fn ticks_to_seconds(&self, ticks: u64) -> f64 {
        ticks as f64 / self.clock_ticks as f64
    }

    fn cpu_percent(&self, pid: u32, start_time_ticks: u64, total_ticks: u64) -> f64 {
        let now = Instant::now();
        let mut samples = self.cpu_samples.lock().unwrap_or_else(PoisonError::into_inner);
        let percent = match samples.get(&(pid, start_time_ticks)) {
            Some(prev) => {
                let tick_delta = total_ticks.saturating_sub(prev.total_ticks);
                let time_delta = now.duration_since(prev.timestamp).as_secs_f64();
                if time_delta > 0.0 {
                    (self.ticks_to_seconds(tick_delta) / time_delta) * 100.0
                } else {
                    0.0
                }
            }
            None => 0.0, // First sample establishes the baseline
        };
        samples.insert(
            (pid, start_time_ticks),
            CpuSample {
                total_ticks,
                timestamp: now,
            },
        );
        percent
    }

    /// Remove CPU baselines for processes that no longer exist
    fn retain_baselines(&self, live: &HashSet<(u32, u64)>) {
        let mut samples = self.cpu_samples.lock().unwrap_or_else(PoisonError::into_inner);
        samples.retain(|key, _| live.contains(key));
    }
}

impl Default for LinuxProcessCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessCollector for LinuxProcessCollector {
    fn exists(&self, pid: u32) -> bool {
        pid != 0 && Path::new(&format!("/proc/{}", pid)).exists()
    }

    fn status(&self, pid: u32) -> CollectorResult<ProcessStatus> {
        let stat = self.read_stat(pid)?;
        Ok(ProcessStatus::from_state_char(stat.state))
    }

    fn create_time(&self, pid: u32) -> CollectorResult<SystemTime> {
        let stat = self.read_stat(pid)?;
        let secs = self.boot_time as f64 + self.ticks_to_seconds(stat.start_time_ticks);
        Ok(UNIX_EPOCH + Duration::from_secs_f64(secs))
    }

    fn snapshot(&self, pid: u32) -> CollectorResult<ProcessSnapshot> {
        let stat = self.read_stat(pid)?;
        let cpu_percent = self.cpu_percent(pid, stat.start_time_ticks, stat.utime + stat.stime);
        Ok(ProcessSnapshot {
            pid,
            cpu_user_seconds: self.ticks_to_seconds(stat.utime),
            cpu_system_seconds: self.ticks_to_seconds(stat.stime),
            cpu_percent: Some(cpu_percent),
            thread_count: stat.num_threads,
            memory_rss_bytes: stat.rss_pages * self.page_size,
            memory_vms_bytes: stat.vsize,
        })
    }

    fn children(&self, pid: u32) -> CollectorResult<Vec<u32>> {
        let mut by_parent: HashMap<u32, Vec<u32>> = HashMap::new();
        let mut live = HashSet::new();
        let mut target_seen = false;
        for entry in fs::read_dir("/proc")?.flatten() {
            let Some(candidate) = entry.file_name().to_str().and_then(|n| n.parse::<u32>().ok())
            else {
                continue;
            };
            // Processes exit while the table is being walked
            let Ok(stat) = self.read_stat(candidate) else {
                continue;
            };
            target_seen |= candidate == pid;
            live.insert((candidate, stat.start_time_ticks));
            by_parent.entry(stat.ppid).or_default().push(candidate);
        }
        if !target_seen {
            return Err(CollectorError::NoSuchProcess(pid));
        }

        let mut descendants = Vec::new();
        let mut pending = vec![pid];
        while let Some(parent) = pending.pop() {
            if let Some(kids) = by_parent.get(&parent) {
                descendants.extend_from_slice(kids);
                pending.extend_from_slice(kids);
            }
        }
        descendants.sort_unstable();

        self.retain_baselines(&live);
        Ok(descendants)
    }

    fn supports_open_files(&self) -> bool {
        true
    }

    fn open_files(&self, pid: u32) -> CollectorResult<u64> {
        let entries =
            fs::read_dir(format!("/proc/{}/fd", pid)).map_err(|e| map_io_error(pid, e))?;
        Ok(entries.count() as u64)
    }
}

fn map_io_error(pid: u32, err: io::Error) -> CollectorError {
    match err.kind() {
        io::ErrorKind::NotFound => CollectorError::NoSuchProcess(pid),
        io::ErrorKind::PermissionDenied => CollectorError::AccessDenied(pid),
        _ if err.raw_os_error() == Some(libc::ESRCH) => CollectorError::NoSuchProcess(pid),
        _ => CollectorError::Io(err),
    }
}

fn parse_stat(pid: u32, content: &str) -> CollectorResult<StatFields> {
    let parse_err = || CollectorError::Parse { pid, what: "stat" };
    // comm may itself contain spaces and parentheses; fields resume after the last ')'
    let rest = content
        .rfind(')')
        .map(|idx| &content[idx + 1..])
        .ok_or_else(parse_err)?;
    let parts: Vec<&str> = rest.split_whitespace().collect();
    if parts.len() < 22 {
        return Err(parse_err());
    }
    let field = |idx: usize| parts[idx].parse::<u64>().map_err(|_| parse_err());

    Ok(StatFields {
        state: parts[0].chars().next().ok_or_else(parse_err)?,
        ppid: parts[1].parse().map_err(|_| parse_err())?,
        utime: field(11)?,
        stime: field(12)?,
        num_threads: field(17)?,
        start_time_ticks: field(19)?,
        vsize: field(20)?,
        rss_pages: parts[21].parse::<i64>().map_err(|_| parse_err())?.max(0) as u64,
    })
}
