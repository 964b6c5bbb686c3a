//! Process information collector (reads /proc on Linux)

pub mod fake;
#[cfg(target_os = "linux")]
mod linux;

pub use fake::{FakeCollector, FakeProcess};
#[cfg(target_os = "linux")]
pub use linux::LinuxProcessCollector;

use std::time::SystemTime;
use thiserror::Error;

pub type CollectorResult<T> = std::result::Result<T, CollectorError>;

#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("no such process: {0}")]
    NoSuchProcess(u32),

    #[error("access denied to process {0}")]
    AccessDenied(u32),

    #[error("could not parse {what} for process {pid}")]
    Parse { pid: u32, what: &'static str },

    #[error("{0} is not supported on this platform")]
    Unsupported(&'static str),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CollectorError {
    /// The process vanished or can't be read; callers treat this as a
    /// per-process condition rather than a failure of the collector.
    pub fn is_transient(&self) -> bool {
        matches!(self, CollectorError::NoSuchProcess(_) | CollectorError::AccessDenied(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    Running,
    Sleeping,
    Stopped,
    Zombie,
    Dead,
    Other,
}

impl ProcessStatus {
    /// Maps the single-letter state from `/proc/<pid>/stat`.
    pub fn from_state_char(state: char) -> Self {
        match state {
            'R' => ProcessStatus::Running,
            'S' | 'D' | 'I' | 'W' => ProcessStatus::Sleeping,
            'T' | 't' => ProcessStatus::Stopped,
            'Z' => ProcessStatus::Zombie,
            'X' | 'x' => ProcessStatus::Dead,
            _ => ProcessStatus::Other,
        }
    }

    pub fn is_alive(self) -> bool {
        !matches!(self, ProcessStatus::Zombie | ProcessStatus::Dead)
    }
}

/// Point-in-time resource usage of one process.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessSnapshot {
    pub pid: u32,
    pub cpu_user_seconds: f64,
    pub cpu_system_seconds: f64,
    /// `None` when the collector cannot compute a reading at all. The first
    /// snapshot of a process reports `Some(0.0)` and serves as the baseline.
    pub cpu_percent: Option<f64>,
    pub thread_count: u64,
    pub memory_rss_bytes: u64,
    pub memory_vms_bytes: u64,
}

pub trait ProcessCollector: Send + Sync {
    fn exists(&self, pid: u32) -> bool;
    fn status(&self, pid: u32) -> CollectorResult<ProcessStatus>;
    fn create_time(&self, pid: u32) -> CollectorResult<SystemTime>;
    /// Reads every metric in one query to keep the race window small.
    fn snapshot(&self, pid: u32) -> CollectorResult<ProcessSnapshot>;
    /// All live descendants of `pid`, transitively, in ascending pid order.
    fn children(&self, pid: u32) -> CollectorResult<Vec<u32>>;
    fn supports_open_files(&self) -> bool;
    fn open_files(&self, pid: u32) -> CollectorResult<u64>;
}

impl<C: ProcessCollector + ?Sized> ProcessCollector for Box<C> {
    fn exists(&self, pid: u32) -> bool {
        (**self).exists(pid)
    }

    fn status(&self, pid: u32) -> CollectorResult<ProcessStatus> {
        (**self).status(pid)
    }

    fn create_time(&self, pid: u32) -> CollectorResult<SystemTime> {
        (**self).create_time(pid)
    }

    fn snapshot(&self, pid: u32) -> CollectorResult<ProcessSnapshot> {
        (**self).snapshot(pid)
    }

    fn children(&self, pid: u32) -> CollectorResult<Vec<u32>> {
        (**self).children(pid)
    }

    fn supports_open_files(&self) -> bool {
        (**self).supports_open_files()
    }

    fn open_files(&self, pid: u32) -> CollectorResult<u64> {
        (**self).open_files(pid)
    }
}

/// Collector for the host platform, if one exists.
#[cfg(target_os = "linux")]
pub fn host_collector() -> Option<Box<dyn ProcessCollector>> {
    Some(Box::new(LinuxProcessCollector::new()))
}

#[cfg(not(target_os = "linux"))]
pub fn host_collector() -> Option<Box<dyn ProcessCollector>> {
    None
}
