//! Launches the profiled command and tracks whether it is still running.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use tracing::{debug, warn};

/// Where the profiled command's stdout/stderr go.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CommandOutput {
    Hide,
    Screen,
    #[default]
    File,
}

pub struct Supervisor {
    child: Child,
    argv: Vec<String>,
}

impl Supervisor {
    /// Spawns `argv` directly (no shell). With [`CommandOutput::File`] the
    /// streams go to `<basename>.out.log` / `<basename>.err.log` in `folder`.
    pub fn spawn(
        argv: &[String],
        output: CommandOutput,
        folder: &Path,
        basename: &str,
    ) -> Result<Self> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| Error::Configuration("no command given".into()))?;

        let (stdout, stderr) = match output {
            CommandOutput::Hide => (Stdio::null(), Stdio::null()),
            CommandOutput::Screen => (Stdio::inherit(), Stdio::inherit()),
            CommandOutput::File => {
                let out = File::create(folder.join(format!("{}.out.log", basename)))?;
                let err = File::create(folder.join(format!("{}.err.log", basename)))?;
                (Stdio::from(out), Stdio::from(err))
            }
        };

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .spawn()?;
        debug!("Spawned {:?} as PID {}", argv, child.id());
        Ok(Self {
            child,
            argv: argv.to_vec(),
        })
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    pub fn command_line(&self) -> String {
        self.argv.join(" ")
    }

    /// Non-blocking; reaps the child if it has finished.
    pub fn has_exited(&mut self) -> bool {
        match self.child.try_wait() {
            Ok(status) => status.is_some(),
            Err(e) => {
                warn!("Failed to poll PID {}: {}", self.child.id(), e);
                true
            }
        }
    }

    /// Kills the command unless it already finished.
    pub fn kill(&mut self) -> Result<()> {
        if self.child.try_wait()?.is_some() {
            return Ok(());
        }
        match self.child.kill() {
            Ok(()) => Ok(()),
            // Raced with the process exiting on its own
            Err(e) if e.kind() == io::ErrorKind::InvalidInput => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn wait(&mut self) -> Result<ExitStatus> {
        Ok(self.child.wait()?)
    }
}

/// A single argument containing whitespace (e.g. `"sleep 1"`) is split into
/// words; anything else is used as-is.
pub fn split_command(args: &[String]) -> Vec<String> {
    match args {
        [single] if single.split_whitespace().count() > 1 => {
            single.split_whitespace().map(str::to_string).collect()
        }
        _ => args.to_vec(),
    }
}
