//! Configuration management (TOML)

use crate::sampler::{interval_from_secs, SessionOptions};
use crate::sink::{SinkOptions, DEFAULT_PLACEHOLDER, DEFAULT_SEPARATOR};
use crate::supervisor::CommandOutput;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,
    pub sampling: SamplingConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub log_level: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    pub interval_secs: f64,
    pub include_children: bool,
    pub collect_open_files: bool,
    pub headers: bool,
    pub separator: char,
    pub placeholder: String,
    pub flush_each_tick: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub folder: PathBuf,
    pub command_output: CommandOutput,
    pub write_metadata: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        GeneralConfig {
            log_level: "info".to_string(),
        }
    }
}

impl Default for SamplingConfig {
    fn default() -> Self {
        SamplingConfig {
            interval_secs: 1.0,
            include_children: true,
            collect_open_files: false,
            headers: true,
            separator: DEFAULT_SEPARATOR,
            placeholder: DEFAULT_PLACEHOLDER.to_string(),
            flush_each_tick: false,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        OutputConfig {
            folder: PathBuf::from("pplot_out"),
            command_output: CommandOutput::File,
            write_metadata: true,
        }
    }
}

impl SamplingConfig {
    pub fn session_options(&self, max_iterations: Option<u64>) -> Result<SessionOptions> {
        Ok(SessionOptions {
            poll_interval: interval_from_secs(self.interval_secs)?,
            max_iterations,
            include_children: self.include_children,
            collect_open_files: self.collect_open_files,
            headers: self.headers,
            flush_each_tick: self.flush_each_tick,
        })
    }

    pub fn sink_options(&self) -> SinkOptions {
        SinkOptions {
            separator: self.separator,
            placeholder: self.placeholder.clone(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        directories::ProjectDirs::from("", "", "pplot")
            .map(|dirs| dirs.config_dir().join("config.toml"))
            .unwrap_or_else(|| PathBuf::from("config.toml"))
    }
}
