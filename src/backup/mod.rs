//! One backup run over all configured databases.
//!
//! Every connection string goes through `parse → build context → invoke → report`, strictly one
//! database after another. A malformed connection string aborts the run before anything is
//! invoked for it. A failing script is reported as failure and then aborts the rest of the run.

pub mod connection;
pub mod context;
pub mod script;

pub use connection::{ConnectionDescriptor, MalformedConnectionString};
pub use context::ExecutionContext;
pub use script::{Script, ScriptError};

use derive_more::{Display, Error, From};

use crate::config::RunParameters;
use crate::metrics::{MetricsSink, Outcome, Reporter};

/// Runs the backup of a single database.
pub trait Invoker {
    fn invoke(&self, ctx: &ExecutionContext) -> Result<(), ScriptError>;
}

#[derive(Debug, Display, Error, From)]
/// Errors aborting a backup run.
pub enum RunError {
    /// A connection string is malformed, i.e. the configuration is broken.
    #[display("{_0}")]
    #[from]
    MalformedConnectionString(MalformedConnectionString),
    /// The backup script failed for `database`.
    #[display("backup of database {database} failed: {source}")]
    BackupExecutionFailed {
        database: String,
        source: ScriptError,
    },
}

/// Drives backup runs with a fixed [Invoker] and [Reporter].
pub struct Orchestrator<I, S> {
    params: RunParameters,
    invoker: I,
    reporter: Reporter<S>,
}

impl<I: Invoker, S: MetricsSink> Orchestrator<I, S> {
    pub fn new(params: RunParameters, invoker: I, reporter: Reporter<S>) -> Self {
        Self {
            params,
            invoker,
            reporter,
        }
    }

    pub fn reporter(&self) -> &Reporter<S> {
        &self.reporter
    }

    /// Backs up the databases of `connection_strings` in order.
    pub fn run_once<T: AsRef<str>>(&mut self, connection_strings: &[T]) -> Result<(), RunError> {
        log::info!(
            target: "backup",
            "Starting backups process: {} database(s), backup dir {}",
            connection_strings.len(),
            self.params.backup_dir.display()
        );

        for raw in connection_strings {
            let descriptor = ConnectionDescriptor::parse(raw.as_ref()).inspect_err(|e| {
                log::error!(target: "backup", "Aborting run on invalid configuration: {e}");
            })?;
            let ctx = ExecutionContext::new(descriptor, &self.params);
            let database = ctx.database().to_string();

            log::info!(target: "backup", "Starting backup of database {database}");
            if let Err(source) = self.invoker.invoke(&ctx) {
                log::error!(target: "backup", "Backup of database {database} failed: {source}");
                self.reporter.report(&database, Outcome::Failure);
                return Err(RunError::BackupExecutionFailed { database, source });
            }

            self.reporter.report(&database, Outcome::Success);
            log::info!(target: "backup", "Backup of database {database} successful");
        }

        log::info!(target: "backup", "Finished backups process");
        Ok(())
    }
}
