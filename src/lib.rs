//! Periodic PostgreSQL backups.
//!
//! The backup itself is done by an external script, invoked once per configured database with
//! the connection details in `PG*` environment variables (see [`backup::ExecutionContext`]).
//! The outcome of every backup is pushed as a Unix timestamp to a Prometheus Pushgateway.
//! Runs are started once from the command line or on a cron schedule ([`schedule`]).

#![forbid(unsafe_code)]

pub mod backup;
pub mod cli;
pub mod config;
pub mod metrics;
pub mod schedule;
