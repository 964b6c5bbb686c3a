//! Crate-wide error type

use crate::collector::CollectorError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("process {0} not found")]
    TargetNotFound(u32),

    #[error("process query failed: {0}")]
    Collector(#[from] CollectorError),

    #[error("record stream error: {0}")]
    Csv(#[from] csv::Error),

    #[error("malformed record stream: {0}")]
    Stream(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}
