//! The polling loop: query the target (and its descendants) once per tick and
//! push one fixed-schema row per process into a sink.

use crate::collector::{CollectorError, ProcessCollector, ProcessStatus};
use crate::record::{Sample, SampleKind, Schema};
use crate::sink::RecordSink;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct SessionOptions {
    pub poll_interval: Duration,
    pub max_iterations: Option<u64>,
    pub include_children: bool,
    pub collect_open_files: bool,
    pub headers: bool,
    pub flush_each_tick: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            max_iterations: None,
            include_children: true,
            collect_open_files: false,
            headers: true,
            flush_each_tick: false,
        }
    }
}

impl SessionOptions {
    pub fn with_interval_secs(mut self, secs: f64) -> Result<Self> {
        self.poll_interval = interval_from_secs(secs)?;
        Ok(self)
    }

    pub fn with_max_iterations(mut self, max_iterations: Option<u64>) -> Self {
        self.max_iterations = max_iterations;
        self
    }
}

pub fn interval_from_secs(secs: f64) -> Result<Duration> {
    if !secs.is_finite() || secs <= 0.0 {
        return Err(Error::Configuration(format!(
            "poll interval must be a positive number of seconds, got {}",
            secs
        )));
    }
    Duration::try_from_secs_f64(secs)
        .map_err(|e| Error::Configuration(format!("invalid poll interval {}: {}", secs, e)))
}

/// Number of ticks that fit in `timeout_secs`; always at least one.
pub fn iterations_for_timeout(timeout_secs: f64, interval: Duration) -> Result<u64> {
    if !timeout_secs.is_finite() || timeout_secs <= 0.0 {
        return Err(Error::Configuration(format!(
            "timeout must be a positive number of seconds, got {}",
            timeout_secs
        )));
    }
    let ticks = (timeout_secs / interval.as_secs_f64()).floor() as u64;
    Ok(ticks.max(1))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Exited,
    Zombie,
    NoCpuBaseline,
    StopRequested,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum Outcome {
    /// Collection finished: the process is gone or the caller asked to stop.
    Terminated(StopReason),
    /// The cap was hit while the process may still be running.
    IterationLimitReached,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub outcome: Outcome,
    pub ticks: u64,
    pub rows: u64,
}

enum Tick {
    Samples(Vec<Sample>),
    Stop(StopReason),
}

pub struct Sampler<'a, C: ProcessCollector + ?Sized> {
    collector: &'a C,
    options: SessionOptions,
    stop_when: Option<Box<dyn FnMut() -> bool + 'a>>,
}

impl<'a, C: ProcessCollector + ?Sized> Sampler<'a, C> {
    pub fn new(collector: &'a C, options: SessionOptions) -> Self {
        Self {
            collector,
            options,
            stop_when: None,
        }
    }

    /// Checked once per tick, after the tick's rows are written.
    pub fn stop_when(mut self, predicate: impl FnMut() -> bool + 'a) -> Self {
        self.stop_when = Some(Box::new(predicate));
        self
    }

    /// Validates the options and resolves the column set for the session.
    pub fn schema(&self) -> Result<Schema> {
        if self.options.poll_interval.is_zero() {
            return Err(Error::Configuration("poll interval must be positive".into()));
        }
        if self.options.max_iterations == Some(0) {
            return Err(Error::Configuration("max iterations must be at least 1".into()));
        }
        if self.options.collect_open_files && !self.collector.supports_open_files() {
            return Err(Error::Configuration(
                "open file counting is only supported on POSIX and Windows hosts".into(),
            ));
        }
        Ok(Schema::new(self.options.collect_open_files))
    }

    pub fn run(&mut self, pid: u32, sink: &mut dyn RecordSink) -> Result<RunSummary> {
        let schema = self.schema()?;

        if !self.collector.exists(pid) {
            return Err(Error::TargetNotFound(pid));
        }
        let created = match self.collector.create_time(pid) {
            Ok(created) => created,
            Err(CollectorError::NoSuchProcess(_)) => return Err(Error::TargetNotFound(pid)),
            Err(e) => return Err(e.into()),
        };

        info!(
            "Sampling PID {} every {:?} (children: {}, open files: {})",
            pid,
            self.options.poll_interval,
            self.options.include_children,
            self.options.collect_open_files
        );

        if self.options.headers {
            sink.write_header(&schema.names())?;
            if self.options.flush_each_tick {
                sink.flush()?;
            }
        }

        let mut ticks = 0u64;
        let mut rows = 0u64;
        let mut last_elapsed = 0.0f64;
        loop {
            let elapsed = SystemTime::now()
                .duration_since(created)
                .map(|d| d.as_secs_f64())
                .unwrap_or(0.0)
                .max(last_elapsed);
            last_elapsed = elapsed;

            let samples = match self.collect_tick(pid, elapsed, &schema)? {
                Tick::Samples(samples) => samples,
                Tick::Stop(reason) => {
                    info!("Stopped sampling PID {} after {} ticks: {:?}", pid, ticks, reason);
                    return Ok(RunSummary {
                        outcome: Outcome::Terminated(reason),
                        ticks,
                        rows,
                    });
                }
            };

            for sample in &samples {
                sink.write_row(&sample.row(&schema))?;
            }
            if self.options.flush_each_tick {
                sink.flush()?;
            }
            ticks += 1;
            rows += samples.len() as u64;
            debug!("Tick {}: {} rows at {:.3}s", ticks, samples.len(), elapsed);

            if self.stop_when.as_mut().is_some_and(|stop| stop()) {
                info!("Stop requested after {} ticks", ticks);
                return Ok(RunSummary {
                    outcome: Outcome::Terminated(StopReason::StopRequested),
                    ticks,
                    rows,
                });
            }
            if self.options.max_iterations.is_some_and(|max| ticks >= max) {
                info!("Reached {} iterations with PID {} still running", ticks, pid);
                return Ok(RunSummary {
                    outcome: Outcome::IterationLimitReached,
                    ticks,
                    rows,
                });
            }

            std::thread::sleep(self.options.poll_interval);
        }
    }

    fn collect_tick(&self, pid: u32, elapsed: f64, schema: &Schema) -> Result<Tick> {
        match self.collector.status(pid) {
            Ok(ProcessStatus::Zombie) => return Ok(Tick::Stop(StopReason::Zombie)),
            Ok(status) if !status.is_alive() => return Ok(Tick::Stop(StopReason::Exited)),
            Ok(_) => {}
            Err(CollectorError::NoSuchProcess(_)) => return Ok(Tick::Stop(StopReason::Exited)),
            Err(e) => return Err(e.into()),
        }

        let main = match self.collector.snapshot(pid) {
            Ok(snapshot) => snapshot,
            Err(CollectorError::NoSuchProcess(_)) => return Ok(Tick::Stop(StopReason::Exited)),
            Err(e) => return Err(e.into()),
        };

        let mut children = Vec::new();
        if self.options.include_children {
            let pids = match self.collector.children(pid) {
                Ok(pids) => pids,
                Err(CollectorError::NoSuchProcess(_)) => {
                    return Ok(Tick::Stop(StopReason::Exited))
                }
                Err(e) => return Err(e.into()),
            };
            for child in pids {
                match self.collector.snapshot(child) {
                    Ok(snapshot) => children.push(snapshot),
                    Err(e) if e.is_transient() => {
                        debug!("Skipping child {}: {}", child, e);
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }

        let main_files = self.open_files(schema, pid)?;
        // Without a main-process baseline there is nothing meaningful to record
        if main.cpu_percent.is_none() {
            return Ok(Tick::Stop(StopReason::NoCpuBaseline));
        }
        let mut samples = Vec::with_capacity(children.len() + 1);
        samples.push(Sample::from_snapshot(SampleKind::Main, elapsed, &main, main_files));
        for child in &children {
            let files = self.open_files(schema, child.pid)?;
            samples.push(Sample::from_snapshot(SampleKind::Child, elapsed, child, files));
        }
        Ok(Tick::Samples(samples))
    }

    fn open_files(&self, schema: &Schema, pid: u32) -> Result<Option<u64>> {
        if !schema.includes_open_files() {
            return Ok(None);
        }
        match self.collector.open_files(pid) {
            Ok(count) => Ok(Some(count)),
            Err(e) if e.is_transient() => {
                warn!("Open file count unavailable for PID {}: {}", pid, e);
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Runs a single session with no stop predicate.
pub fn profile_process<C: ProcessCollector + ?Sized>(
    collector: &C,
    pid: u32,
    options: SessionOptions,
    sink: &mut dyn RecordSink,
) -> Result<RunSummary> {
    Sampler::new(collector, options).run(pid, sink)
}
