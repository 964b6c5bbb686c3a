//! Reads a recorded stream back and pivots it into per-process time series.

use crate::record::SampleKind;
use crate::sink::SinkOptions;
use crate::{Error, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::io::Read;

const MIB: f64 = 1024.0 * 1024.0;

/// Columns that can be summarised, with their axis labels.
pub const PLOT_COLUMNS: [(&str, &str); 7] = [
    ("memory_rss", "RSS Memory (MB)"),
    ("memory_vms", "VMS Memory (MB)"),
    ("cpu_percent", "CPU Usage (%)"),
    ("cpu_time_user", "CPU Time, user (s)"),
    ("cpu_time_sys", "CPU Time, system (s)"),
    ("threads_num", "# threads"),
    ("files_num", "# files"),
];

pub const DEFAULT_PLOT_COLUMNS: [&str; 2] = ["memory_rss", "cpu_percent"];

// (stream column, plot column, scale)
const CONVERSIONS: [(&str, &str, f64); 7] = [
    ("memory_rss_bytes", "memory_rss", 1.0 / MIB),
    ("memory_vms_bytes", "memory_vms", 1.0 / MIB),
    ("cpu_percent", "cpu_percent", 1.0),
    ("cpu_time_user_secs", "cpu_time_user", 1.0),
    ("cpu_time_sys_secs", "cpu_time_sys", 1.0),
    ("threads_num", "threads_num", 1.0),
    ("files_num", "files_num", 1.0),
];

pub fn plot_label(column: &str) -> Option<&'static str> {
    PLOT_COLUMNS
        .iter()
        .find(|(name, _)| *name == column)
        .map(|(_, label)| *label)
}

/// Parses a comma-delimited list of plot columns, rejecting unknown names.
pub fn parse_plot_columns(list: &str) -> Result<Vec<String>> {
    let columns: Vec<String> = list
        .split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect();
    let unknown: Vec<&str> = columns
        .iter()
        .map(String::as_str)
        .filter(|c| plot_label(c).is_none())
        .collect();
    if !unknown.is_empty() {
        return Err(Error::Configuration(format!("unknown columns: {}", unknown.join(", "))));
    }
    if columns.is_empty() {
        return Err(Error::Configuration("no columns selected".into()));
    }
    Ok(columns)
}

/// Identifies one process in a run; main sorts ahead of children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessKey {
    pub kind: SampleKind,
    pub pid: u32,
}

impl fmt::Display for ProcessKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self.kind {
            SampleKind::Main => "Main",
            SampleKind::Child => "Child",
        };
        write!(f, "{} ({})", label, self.pid)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub elapsed_secs: f64,
    /// Keyed by plot column; `None` where the stream had the placeholder.
    pub values: BTreeMap<&'static str, Option<f64>>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Summary {
    pub samples: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub last: f64,
}

impl Summary {
    fn from_values(values: &[f64]) -> Option<Self> {
        let last = *values.last()?;
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        Some(Summary {
            samples: values.len(),
            min,
            max,
            mean,
            last,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunSeries {
    columns: Vec<&'static str>,
    processes: BTreeMap<ProcessKey, Vec<Point>>,
}

impl RunSeries {
    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    /// Plot columns present in the stream.
    pub fn columns(&self) -> &[&'static str] {
        &self.columns
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| *c == column)
    }

    pub fn processes(&self) -> impl Iterator<Item = &ProcessKey> {
        self.processes.keys()
    }

    pub fn points(&self, key: &ProcessKey) -> &[Point] {
        self.processes.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// `(elapsed, value)` pairs of one process, skipping missing values.
    pub fn series(&self, key: &ProcessKey, column: &str) -> Vec<(f64, f64)> {
        self.points(key)
            .iter()
            .filter_map(|p| p.values.get(column).copied().flatten().map(|v| (p.elapsed_secs, v)))
            .collect()
    }

    /// Sum over all processes at each elapsed time.
    pub fn total(&self, column: &str) -> Vec<(f64, f64)> {
        let mut sums: Vec<(f64, f64)> = Vec::new();
        for key in self.processes.keys() {
            for (elapsed, value) in self.series(key, column) {
                match sums.iter_mut().find(|(t, _)| *t == elapsed) {
                    Some((_, sum)) => *sum += value,
                    None => sums.push((elapsed, value)),
                }
            }
        }
        sums.sort_by(|a, b| a.0.total_cmp(&b.0));
        sums
    }

    pub fn summarize(&self, column: &str) -> Vec<(ProcessKey, Summary)> {
        self.processes
            .keys()
            .filter_map(|key| {
                let values: Vec<f64> =
                    self.series(key, column).into_iter().map(|(_, v)| v).collect();
                Summary::from_values(&values).map(|s| (*key, s))
            })
            .collect()
    }
}

/// Parses a stream written by [`crate::sink::DelimitedSink`]. The header
/// decides which columns are available; `type`, `pid` and `elapsed_secs` are required.
pub fn read_series<R: Read>(reader: R, options: &SinkOptions) -> Result<RunSeries> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .delimiter(options.delimiter()?)
        .has_headers(true)
        .from_reader(reader);
    let headers = csv_reader.headers()?.clone();
    // A session that failed before its header leaves a zero-byte stream
    if headers.is_empty() {
        return Ok(RunSeries {
            columns: Vec::new(),
            processes: BTreeMap::new(),
        });
    }
    let position = |name: &str| headers.iter().position(|h| h.trim() == name);
    let required = |name: &str| {
        position(name).ok_or_else(|| Error::Stream(format!("missing column '{}'", name)))
    };
    let kind_idx = required("type")?;
    let pid_idx = required("pid")?;
    let elapsed_idx = required("elapsed_secs")?;
    let present: Vec<(usize, &'static str, f64)> = CONVERSIONS
        .iter()
        .filter_map(|(stream, plot, scale)| position(*stream).map(|idx| (idx, *plot, *scale)))
        .collect();

    let mut series = RunSeries {
        columns: present.iter().map(|(_, plot, _)| *plot).collect(),
        processes: BTreeMap::new(),
    };

    for (line, record) in csv_reader.records().enumerate() {
        let record = record?;
        let field = |idx: usize| record.get(idx).map(str::trim).unwrap_or("");
        let bad = |what: &str| Error::Stream(format!("row {}: invalid {}", line + 1, what));
        let kind: SampleKind = field(kind_idx).parse().map_err(|_| bad("type"))?;
        let pid: u32 = field(pid_idx).parse().map_err(|_| bad("pid"))?;
        let elapsed_secs: f64 = field(elapsed_idx).parse().map_err(|_| bad("elapsed_secs"))?;

        let mut values = BTreeMap::new();
        for (idx, plot, scale) in &present {
            let raw = field(*idx);
            let value = if raw == options.placeholder || raw.is_empty() {
                None
            } else {
                Some(raw.parse::<f64>().map_err(|_| bad(*plot))? * *scale)
            };
            values.insert(*plot, value);
        }
        series
            .processes
            .entry(ProcessKey { kind, pid })
            .or_default()
            .push(Point {
                elapsed_secs,
                values,
            });
    }
    Ok(series)
}

#[cfg(test)]
mod tests {
    use super::*;

    const STREAM: &str = "\
type,pid,elapsed_secs,cpu_time_user_secs,cpu_time_sys_secs,cpu_percent,threads_num,memory_rss_bytes,memory_vms_bytes,files_num
main,10,1.0,0.1,0.0,0.0,1,1048576,4194304,3
child,11,1.0,0.0,0.0,0.0,1,2097152,4194304,-
main,10,2.0,0.3,0.1,50.0,2,3145728,4194304,4
child,11,2.0,0.1,0.0,10.0,1,2097152,4194304,5
";

    #[test]
    fn test_pivot_by_process() {
        let series = read_series(STREAM.as_bytes(), &SinkOptions::default()).unwrap();
        let keys: Vec<_> = series.processes().copied().collect();
        assert_eq!(
            keys,
            vec![
                ProcessKey { kind: SampleKind::Main, pid: 10 },
                ProcessKey { kind: SampleKind::Child, pid: 11 },
            ]
        );
        assert_eq!(series.series(&keys[0], "memory_rss"), vec![(1.0, 1.0), (2.0, 3.0)]);
        // placeholder is a gap, not a zero
        assert_eq!(series.series(&keys[1], "files_num"), vec![(2.0, 5.0)]);
        assert!(series.has_column("files_num"));
        assert_eq!(keys[0].to_string(), "Main (10)");
    }

    #[test]
    fn test_total_and_summary() {
        let series = read_series(STREAM.as_bytes(), &SinkOptions::default()).unwrap();
        assert_eq!(series.total("memory_rss"), vec![(1.0, 3.0), (2.0, 5.0)]);
        let summary = series.summarize("cpu_percent");
        assert_eq!(summary.len(), 2);
        let (key, main) = summary[0];
        assert_eq!(key.kind, SampleKind::Main);
        assert_eq!(main.max, 50.0);
        assert_eq!(main.mean, 25.0);
        assert_eq!(main.last, 50.0);
        assert_eq!(main.samples, 2);
    }

    #[test]
    fn test_header_only_stream_is_empty() {
        let header = STREAM.lines().next().unwrap();
        let series = read_series(header.as_bytes(), &SinkOptions::default()).unwrap();
        assert!(series.is_empty());
    }

    #[test]
    fn test_zero_byte_stream_is_empty() {
        let series = read_series("".as_bytes(), &SinkOptions::default()).unwrap();
        assert!(series.is_empty());
        assert!(series.columns().is_empty());
        assert!(series.summarize("memory_rss").is_empty());
    }

    #[test]
    fn test_missing_required_column() {
        let err = read_series("pid,elapsed_secs\n1,0.5\n".as_bytes(), &SinkOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::Stream(_)));
    }

    #[test]
    fn test_parse_plot_columns() {
        assert_eq!(
            parse_plot_columns("memory_rss, cpu_percent").unwrap(),
            vec!["memory_rss".to_string(), "cpu_percent".to_string()]
        );
        assert!(parse_plot_columns("memory_rss,bogus").is_err());
        assert!(parse_plot_columns("").is_err());
    }
}
