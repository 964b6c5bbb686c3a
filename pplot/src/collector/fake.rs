//! Scripted in-memory collector for exercising the sampler without real processes.

use super::{CollectorError, CollectorResult, ProcessCollector, ProcessSnapshot, ProcessStatus};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, SystemTime};

#[derive(Debug, Clone)]
pub struct FakeProcess {
    pub pid: u32,
    pub parent: Option<u32>,
    pub status: ProcessStatus,
    pub create_time: SystemTime,
    pub snapshot: ProcessSnapshot,
    /// `None` makes the open-files query fail with access denied.
    pub open_files: Option<u64>,
}

impl FakeProcess {
    pub fn new(pid: u32) -> Self {
        Self {
            pid,
            parent: None,
            status: ProcessStatus::Running,
            create_time: SystemTime::now() - Duration::from_secs(10),
            snapshot: ProcessSnapshot {
                pid,
                cpu_user_seconds: 1.5,
                cpu_system_seconds: 0.25,
                cpu_percent: Some(12.5),
                thread_count: 4,
                memory_rss_bytes: 8 * 1024 * 1024,
                memory_vms_bytes: 64 * 1024 * 1024,
            },
            open_files: Some(7),
        }
    }

    pub fn child_of(pid: u32, parent: u32) -> Self {
        Self {
            parent: Some(parent),
            ..Self::new(pid)
        }
    }

    pub fn with_cpu_percent(mut self, cpu_percent: Option<f64>) -> Self {
        self.snapshot.cpu_percent = cpu_percent;
        self
    }

    pub fn with_open_files(mut self, open_files: Option<u64>) -> Self {
        self.open_files = open_files;
        self
    }
}

#[derive(Default)]
struct FakeState {
    processes: BTreeMap<u32, FakeProcess>,
    // pid -> remaining snapshots before the process turns into a zombie
    zombie_after: HashMap<u32, u32>,
    // listed by `children` but gone by the time they are queried
    vanish_on_snapshot: Vec<u32>,
    snapshot_calls: HashMap<u32, u32>,
}

pub struct FakeCollector {
    state: Mutex<FakeState>,
    open_files_supported: bool,
}

impl FakeCollector {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState::default()),
            open_files_supported: true,
        }
    }

    pub fn without_open_files_support(mut self) -> Self {
        self.open_files_supported = false;
        self
    }

    pub fn with_process(self, process: FakeProcess) -> Self {
        self.insert(process);
        self
    }

    pub fn insert(&self, process: FakeProcess) {
        self.lock().processes.insert(process.pid, process);
    }

    pub fn remove(&self, pid: u32) {
        self.lock().processes.remove(&pid);
    }

    /// The process reports zombie status once it has been snapshotted `snapshots` times.
    pub fn zombie_after(&self, pid: u32, snapshots: u32) {
        self.lock().zombie_after.insert(pid, snapshots);
    }

    /// Keeps `pid` visible to `children` but fails its first snapshot as if it had exited.
    pub fn vanish_on_snapshot(&self, pid: u32) {
        self.lock().vanish_on_snapshot.push(pid);
    }

    pub fn snapshot_calls(&self, pid: u32) -> u32 {
        self.lock().snapshot_calls.get(&pid).copied().unwrap_or(0)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for FakeCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessCollector for FakeCollector {
    fn exists(&self, pid: u32) -> bool {
        self.lock().processes.contains_key(&pid)
    }

    fn status(&self, pid: u32) -> CollectorResult<ProcessStatus> {
        let state = self.lock();
        let process = state
            .processes
            .get(&pid)
            .ok_or(CollectorError::NoSuchProcess(pid))?;
        match state.zombie_after.get(&pid) {
            Some(0) => Ok(ProcessStatus::Zombie),
            _ => Ok(process.status),
        }
    }

    fn create_time(&self, pid: u32) -> CollectorResult<SystemTime> {
        self.lock()
            .processes
            .get(&pid)
            .map(|p| p.create_time)
            .ok_or(CollectorError::NoSuchProcess(pid))
    }

    fn snapshot(&self, pid: u32) -> CollectorResult<ProcessSnapshot> {
        let mut state = self.lock();
        *state.snapshot_calls.entry(pid).or_insert(0) += 1;
        if let Some(idx) = state.vanish_on_snapshot.iter().position(|&p| p == pid) {
            state.vanish_on_snapshot.remove(idx);
            state.processes.remove(&pid);
            return Err(CollectorError::NoSuchProcess(pid));
        }
        if let Some(remaining) = state.zombie_after.get_mut(&pid) {
            *remaining = remaining.saturating_sub(1);
        }
        state
            .processes
            .get(&pid)
            .map(|p| p.snapshot.clone())
            .ok_or(CollectorError::NoSuchProcess(pid))
    }

    fn children(&self, pid: u32) -> CollectorResult<Vec<u32>> {
        let state = self.lock();
        if !state.processes.contains_key(&pid) {
            return Err(CollectorError::NoSuchProcess(pid));
        }
        let mut descendants = Vec::new();
        let mut pending = vec![pid];
        while let Some(parent) = pending.pop() {
            for child in state.processes.values().filter(|p| p.parent == Some(parent)) {
                descendants.push(child.pid);
                pending.push(child.pid);
            }
        }
        descendants.sort_unstable();
        Ok(descendants)
    }

    fn supports_open_files(&self) -> bool {
        self.open_files_supported
    }

    fn open_files(&self, pid: u32) -> CollectorResult<u64> {
        if !self.open_files_supported {
            return Err(CollectorError::Unsupported("open file counting"));
        }
        let state = self.lock();
        let process = state
            .processes
            .get(&pid)
            .ok_or(CollectorError::NoSuchProcess(pid))?;
        process.open_files.ok_or(CollectorError::AccessDenied(pid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_children_are_transitive_and_sorted() {
        let collector = FakeCollector::new()
            .with_process(FakeProcess::new(10))
            .with_process(FakeProcess::child_of(30, 10))
            .with_process(FakeProcess::child_of(20, 10))
            .with_process(FakeProcess::child_of(25, 30))
            .with_process(FakeProcess::new(99));
        assert_eq!(collector.children(10).unwrap(), vec![20, 25, 30]);
        assert!(collector.children(30).unwrap() == vec![25]);
        assert!(matches!(collector.children(1), Err(CollectorError::NoSuchProcess(1))));
    }

    #[test]
    fn test_zombie_after_snapshots() {
        let collector = FakeCollector::new().with_process(FakeProcess::new(1));
        collector.zombie_after(1, 2);
        collector.snapshot(1).unwrap();
        assert_eq!(collector.status(1).unwrap(), ProcessStatus::Running);
        collector.snapshot(1).unwrap();
        assert_eq!(collector.status(1).unwrap(), ProcessStatus::Zombie);
        assert_eq!(collector.snapshot_calls(1), 2);
    }
}
