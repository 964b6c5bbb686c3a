//! Command-line definitions (clap)

use clap::{Args, Parser, Subcommand};
use pplot::config::SamplingConfig;
use pplot::supervisor::CommandOutput;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about = "Profile a process's memory/CPU usage and summarise it")]
pub struct Cli {
    /// More log output (repeat for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file (defaults to the platform config dir)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Execute a command and profile it
    Exec(ExecArgs),
    /// Profile an already running process
    Record(RecordArgs),
    /// Summarise a previously recorded stream per process
    Summary(SummaryArgs),
    /// Show the available columns and exit
    Columns,
}

/// Sampling flags shared by `exec` and `record`; unset flags fall back to the config file.
#[derive(Args, Debug, Clone, Default)]
pub struct SamplingArgs {
    /// Polling interval (seconds)
    #[arg(short, long)]
    pub interval: Option<f64>,

    /// Do not collect child process data
    #[arg(long)]
    pub no_child: bool,

    /// Also record open file descriptor counts
    #[arg(long)]
    pub files: bool,

    /// Field separator of the record stream
    #[arg(long)]
    pub separator: Option<char>,

    /// Token written for unavailable values
    #[arg(long)]
    pub placeholder: Option<String>,

    /// Flush the stream after every tick
    #[arg(long)]
    pub flush: bool,

    /// Do not write the header row
    #[arg(long)]
    pub no_headers: bool,
}

impl SamplingArgs {
    pub fn apply(&self, sampling: &mut SamplingConfig) {
        if let Some(interval) = self.interval {
            sampling.interval_secs = interval;
        }
        if self.no_child {
            sampling.include_children = false;
        }
        if self.files {
            sampling.collect_open_files = true;
        }
        if let Some(separator) = self.separator {
            sampling.separator = separator;
        }
        if let Some(placeholder) = &self.placeholder {
            sampling.placeholder = placeholder.clone();
        }
        if self.flush {
            sampling.flush_each_tick = true;
        }
        if self.no_headers {
            sampling.headers = false;
        }
    }
}

#[derive(Args, Debug)]
pub struct ExecArgs {
    #[command(flatten)]
    pub sampling: SamplingArgs,

    /// Stop profiling after this many seconds (the command is killed)
    #[arg(short, long)]
    pub timeout: Option<f64>,

    /// Mode for stdout/stderr of the command
    #[arg(short = 'c', long, value_enum)]
    pub command_output: Option<CommandOutput>,

    /// Folder for output files
    #[arg(short, long)]
    pub outfolder: Option<PathBuf>,

    /// Basename for output files (defaults to the current date and time)
    #[arg(short = 'n', long)]
    pub basename: Option<String>,

    /// Columns to summarise
    #[arg(short, long, value_name = "COMMA-DELIMITED")]
    pub plot_cols: Option<String>,

    /// Do not write the JSON metadata sidecar
    #[arg(long)]
    pub no_metadata: bool,

    /// Command to run, e.g. `pplot exec -- python script.py`
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

#[derive(Args, Debug)]
pub struct RecordArgs {
    #[command(flatten)]
    pub sampling: SamplingArgs,

    /// Process to sample
    pub pid: u32,

    /// Stop after this many ticks
    #[arg(short = 'm', long)]
    pub max_iterations: Option<u64>,

    /// Write the stream here instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct SummaryArgs {
    /// Path to the CSV file containing the process data
    pub path: PathBuf,

    /// Columns to summarise
    #[arg(short, long, value_name = "COMMA-DELIMITED")]
    pub plot_cols: Option<String>,

    /// Field separator of the record stream
    #[arg(long)]
    pub separator: Option<char>,
}
