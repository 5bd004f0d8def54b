use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use log::LevelFilter;

use crate::config::{FileConfig, RunParameters};
use crate::schedule::DEFAULT_SCHEDULE;

#[derive(Parser, Debug)]
#[command(
    name = "pg-backup",
    version,
    about = "pg-backup - a simple CLI to help with PostgreSQL backups",
    long_about = None
)]
pub struct Cli {
    /// Verbosity of the command output.
    #[arg(long, global = true)]
    pub verbose: Option<LevelFilter>,

    /// TOML file with defaults for the flags below.
    #[arg(long, global = true, env = "PG_BACKUP_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub action: Action,
}

#[derive(Subcommand, Debug)]
pub enum Action {
    /// Starts the backup process, running the backups on a cron schedule.
    #[command(alias = "s")]
    Start(StartArgs),
    /// Executes the backup script once for every database.
    #[command(alias = "b")]
    Backup(RunArgs),
}

#[derive(Args, Debug, Default, Clone)]
pub struct RunArgs {
    /// Connection string to the database to backup.
    ///
    /// The environment variable takes one connection string per line.
    #[arg(
        long = "connection-string",
        short = 'c',
        env = "PG_BACKUP_CONNECTION_STRINGS",
        value_delimiter = '\n'
    )]
    pub connection_strings: Vec<String>,

    /// Path to the script to execute. [default: /var/scripts/backup.sh]
    #[arg(long, short = 's', env = "PG_BACKUP_SCRIPT_PATH")]
    pub script_path: Option<PathBuf>,

    /// Path to the directory where the backups are stored. [default: /backups]
    #[arg(long, short = 'b', env = "PG_BACKUP_DIR")]
    pub backup_dir: Option<PathBuf>,

    /// Push gateway to send metrics to.
    #[arg(long, short = 'p', env = "PUSH_GATEWAY")]
    pub push_gateway: Option<String>,

    /// Job label. [default: pg-backup]
    #[arg(long, short = 'j', env = "PG_BACKUP_JOB")]
    pub job: Option<String>,

    /// Number of days to keep old backups. [default: 7]
    #[arg(long, short = 'd', env = "PG_BACKUP_DAYS_OLD")]
    pub days_old: Option<u32>,
}

#[derive(Args, Debug, Default, Clone)]
pub struct StartArgs {
    #[command(flatten)]
    pub run: RunArgs,

    /// Cron schedule. [default: every minute]
    #[arg(long, short = 'r', env = "CRON_SCHEDULE")]
    pub cron_schedule: Option<String>,
}

impl RunArgs {
    /// Connection strings from the command line, or else from the config file.
    ///
    /// Blank entries, e.g. from a trailing newline in the environment, are dropped.
    pub fn connection_strings(&self, file: &FileConfig) -> Vec<String> {
        let connection_strings = if self.connection_strings.is_empty() {
            &file.connection_strings
        } else {
            &self.connection_strings
        };

        connection_strings
            .iter()
            .filter(|raw| !raw.trim().is_empty())
            .cloned()
            .collect()
    }

    pub fn run_parameters(&self, file: &FileConfig) -> RunParameters {
        let defaults = RunParameters::default();

        RunParameters {
            backup_dir: self
                .backup_dir
                .clone()
                .or_else(|| file.backup_dir.clone())
                .unwrap_or(defaults.backup_dir),
            days_old: self
                .days_old
                .or(file.days_old)
                .unwrap_or(defaults.days_old),
            script_path: self
                .script_path
                .clone()
                .or_else(|| file.script_path.clone())
                .unwrap_or(defaults.script_path),
            job: self
                .job
                .clone()
                .or_else(|| file.job.clone())
                .unwrap_or(defaults.job),
            push_gateway: self
                .push_gateway
                .clone()
                .or_else(|| file.push_gateway.clone())
                .filter(|address| !address.trim().is_empty()),
        }
    }
}

impl StartArgs {
    pub fn cron_schedule(&self, file: &FileConfig) -> String {
        self.cron_schedule
            .clone()
            .or_else(|| file.cron_schedule.clone())
            .filter(|schedule| !schedule.trim().is_empty())
            .unwrap_or_else(|| {
                log::warn!(target: "config", "No cron schedule set, using default: {DEFAULT_SCHEDULE}");
                DEFAULT_SCHEDULE.to_string()
            })
    }
}
