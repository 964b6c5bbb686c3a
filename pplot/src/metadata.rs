//! JSON sidecar describing one profiling run

use crate::sampler::{Outcome, RunSummary};
use crate::Result;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub command: Vec<String>,
    pub pid: u32,
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
    pub interval_secs: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<u64>,
    pub include_children: bool,
    pub columns: Vec<String>,
    #[serde(flatten)]
    pub outcome: Outcome,
    pub ticks: u64,
    pub rows: u64,
    pub version: String,
}

impl RunMetadata {
    pub fn with_summary(mut self, summary: &RunSummary) -> Self {
        self.outcome = summary.outcome;
        self.ticks = summary.ticks;
        self.rows = summary.rows;
        self
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content + "\n")?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}
