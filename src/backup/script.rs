//! Runs the external backup script.

use std::io;
use std::path::PathBuf;
use std::process::{Command, ExitStatus, Stdio};

use derive_more::{Display, Error};

use super::{ExecutionContext, Invoker};

/// Failure of a single script invocation.
#[derive(Debug, Display, Error)]
pub enum ScriptError {
    /// The script could not be started.
    #[display("backup script could not be started: {_0}")]
    Spawn(io::Error),
    /// The script ran but exited unsuccessfully.
    #[display("backup script failed with {_0}")]
    ExitStatus(#[error(ignore)] ExitStatus),
}

/// The backup executable. Backup and retention logic lives entirely in the script, which gets
/// the database coordinates through the variables of [ExecutionContext::envs].
#[derive(Debug, Clone)]
pub struct Script {
    path: PathBuf,
}

impl Script {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        if path.is_relative() {
            log::warn!(target: "backup::script", "script path is relative: {}", path.display());
        }

        Self { path }
    }
}

impl Invoker for Script {
    fn invoke(&self, ctx: &ExecutionContext) -> Result<(), ScriptError> {
        log::debug!(
            target: "backup::script",
            "Running {} for database {} into {}",
            self.path.display(),
            ctx.database(),
            ctx.backup_dir.display()
        );

        // stdout and stderr are inherited so the script's output ends up next to ours
        let status = Command::new(&self.path)
            .envs(ctx.envs())
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .map_err(ScriptError::Spawn)?;
        log::trace!(target: "backup::script", "{} exited with {status}", self.path.display());

        if status.success() {
            Ok(())
        } else {
            Err(ScriptError::ExitStatus(status))
        }
    }
}
