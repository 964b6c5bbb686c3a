//! Sample a process (and its descendants) at a fixed interval into a
//! delimited record stream, and read such streams back as time series.

pub mod collector;
pub mod config;
pub mod error;
pub mod metadata;
pub mod record;
pub mod sampler;
pub mod series;
pub mod sink;
pub mod supervisor;

pub use error::{Error, Result};
pub use sampler::{profile_process, Outcome, RunSummary, Sampler, SessionOptions, StopReason};
