//! Fixed record schema written once per sampled process per tick

use crate::collector::ProcessSnapshot;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleKind {
    Main,
    Child,
}

impl SampleKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SampleKind::Main => "main",
            SampleKind::Child => "child",
        }
    }
}

impl fmt::Display for SampleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SampleKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "main" => Ok(SampleKind::Main),
            "child" => Ok(SampleKind::Child),
            other => Err(format!("unknown sample type '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub description: &'static str,
}

pub const OPEN_FILES_COLUMN: &str = "files_num";

/// Every column in stream order. `files_num` is only present when open-file
/// counting is enabled for the session.
pub const COLUMNS: [Column; 10] = [
    Column {
        name: "type",
        description: "main or child",
    },
    Column {
        name: "pid",
        description: "Process ID",
    },
    Column {
        name: "elapsed_secs",
        description: "Cumulative time since the main process was created",
    },
    Column {
        name: "cpu_time_user_secs",
        description: "Time spent executing in user mode",
    },
    Column {
        name: "cpu_time_sys_secs",
        description: "Time spent executing in kernel mode",
    },
    Column {
        name: "cpu_percent",
        description: "Percentage of CPU time used since the previous sample of the process",
    },
    Column {
        name: "threads_num",
        description: "Number of threads currently used",
    },
    Column {
        name: "memory_rss_bytes",
        description: "Resident Set Size; the non-swapped physical memory used",
    },
    Column {
        name: "memory_vms_bytes",
        description: "Virtual Memory Size; the virtual memory used",
    },
    Column {
        name: OPEN_FILES_COLUMN,
        description: "Number of file descriptors (POSIX) or handles (Windows) used",
    },
];

/// Column set of one sampling session, fixed before the first row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schema {
    open_files: bool,
}

impl Schema {
    pub fn new(open_files: bool) -> Self {
        Self { open_files }
    }

    pub fn includes_open_files(&self) -> bool {
        self.open_files
    }

    pub fn columns(&self) -> impl Iterator<Item = &'static Column> + '_ {
        COLUMNS
            .iter()
            .filter(move |c| self.open_files || c.name != OPEN_FILES_COLUMN)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.columns().map(|c| c.name).collect()
    }

    pub fn len(&self) -> usize {
        if self.open_files {
            COLUMNS.len()
        } else {
            COLUMNS.len() - 1
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One rendered cell of a row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Field {
    Kind(SampleKind),
    Int(u64),
    Float(f64),
    Unavailable,
}

impl Field {
    pub fn render(&self, placeholder: &str) -> String {
        match self {
            Field::Kind(kind) => kind.as_str().to_string(),
            Field::Int(value) => value.to_string(),
            Field::Float(value) => value.to_string(),
            Field::Unavailable => placeholder.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub kind: SampleKind,
    pub pid: u32,
    pub elapsed_seconds: f64,
    pub cpu_user_seconds: f64,
    pub cpu_system_seconds: f64,
    pub cpu_percent: f64,
    pub thread_count: u64,
    pub memory_rss_bytes: u64,
    pub memory_vms_bytes: u64,
    pub open_files_count: Option<u64>,
}

impl Sample {
    /// A missing CPU reading is recorded as 0.0; the sampler decides
    /// separately whether a missing main-process reading ends the session.
    pub fn from_snapshot(
        kind: SampleKind,
        elapsed_seconds: f64,
        snapshot: &ProcessSnapshot,
        open_files_count: Option<u64>,
    ) -> Self {
        Self {
            kind,
            pid: snapshot.pid,
            elapsed_seconds,
            cpu_user_seconds: snapshot.cpu_user_seconds,
            cpu_system_seconds: snapshot.cpu_system_seconds,
            cpu_percent: snapshot.cpu_percent.unwrap_or(0.0),
            thread_count: snapshot.thread_count,
            memory_rss_bytes: snapshot.memory_rss_bytes,
            memory_vms_bytes: snapshot.memory_vms_bytes,
            open_files_count,
        }
    }

    /// Values in the column order of `schema`.
    pub fn row(&self, schema: &Schema) -> Vec<Field> {
        let mut row = Vec::with_capacity(schema.len());
        row.push(Field::Kind(self.kind));
        row.push(Field::Int(u64::from(self.pid)));
        row.push(Field::Float(self.elapsed_seconds));
        row.push(Field::Float(self.cpu_user_seconds));
        row.push(Field::Float(self.cpu_system_seconds));
        row.push(Field::Float(self.cpu_percent));
        row.push(Field::Int(self.thread_count));
        row.push(Field::Int(self.memory_rss_bytes));
        row.push(Field::Int(self.memory_vms_bytes));
        if schema.includes_open_files() {
            row.push(self.open_files_count.map_or(Field::Unavailable, Field::Int));
        }
        row
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> ProcessSnapshot {
        ProcessSnapshot {
            pid: 77,
            cpu_user_seconds: 1.25,
            cpu_system_seconds: 0.5,
            cpu_percent: None,
            thread_count: 2,
            memory_rss_bytes: 4096,
            memory_vms_bytes: 8192,
        }
    }

    #[test]
    fn test_schema_without_open_files() {
        let schema = Schema::new(false);
        assert_eq!(
            schema.names(),
            vec![
                "type",
                "pid",
                "elapsed_secs",
                "cpu_time_user_secs",
                "cpu_time_sys_secs",
                "cpu_percent",
                "threads_num",
                "memory_rss_bytes",
                "memory_vms_bytes",
            ]
        );
        assert_eq!(schema.len(), 9);
    }

    #[test]
    fn test_schema_with_open_files() {
        let schema = Schema::new(true);
        assert_eq!(schema.len(), 10);
        assert!(!schema.is_empty());
        assert_eq!(schema.names().last(), Some(&OPEN_FILES_COLUMN));
    }

    #[test]
    fn test_row_matches_schema_width() {
        let sample = Sample::from_snapshot(SampleKind::Child, 3.5, &snapshot(), None);
        assert_eq!(sample.cpu_percent, 0.0);
        for open_files in [false, true] {
            let schema = Schema::new(open_files);
            assert_eq!(sample.row(&schema).len(), schema.len());
        }
        assert_eq!(sample.row(&Schema::new(true))[9], Field::Unavailable);
        assert_eq!(sample.row(&Schema::new(true))[0].render("-"), "child");
    }

    #[test]
    fn test_field_rendering() {
        assert_eq!(Field::Int(42).render("-"), "42");
        assert_eq!(Field::Float(0.25).render("-"), "0.25");
        assert_eq!(Field::Unavailable.render("NA"), "NA");
        assert_eq!("main".parse::<SampleKind>(), Ok(SampleKind::Main));
        assert!("other".parse::<SampleKind>().is_err());
    }
}
