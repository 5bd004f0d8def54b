//! Success and failure timestamps per database, forwarded to a Prometheus Pushgateway.
//!
//! The [Reporter] owns the [BackupMetrics] collector instead of a process wide registry.
//! Pushing is best effort: a failed push is logged and never affects the outcome of a run.

pub mod push;

use std::collections::BTreeMap;
use std::fmt::Write;

use chrono::Utc;
use derive_more::Display;

pub use push::{MetricsForwardFailed, PushGateway};

const SUCCESS_NAME: &str = "pg_backup_last_success";
const SUCCESS_HELP: &str = "Unix time when the script is executed";
const FAILURE_NAME: &str = "pg_backup_last_failure";
const FAILURE_HELP: &str = "Unix time when the script is executed and failed";
const LABEL: &str = "database";

/// Result of the backup of one database.
#[derive(Copy, Clone, Debug, Display, PartialEq, Eq)]
pub enum Outcome {
    #[display("success")]
    Success,
    #[display("failure")]
    Failure,
}

/// The two gauge families `pg_backup_last_success` and `pg_backup_last_failure`,
/// each labeled by database and holding a Unix timestamp.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BackupMetrics {
    last_success: BTreeMap<String, i64>,
    last_failure: BTreeMap<String, i64>,
}

impl BackupMetrics {
    fn family_mut(&mut self, outcome: Outcome) -> &mut BTreeMap<String, i64> {
        match outcome {
            Outcome::Success => &mut self.last_success,
            Outcome::Failure => &mut self.last_failure,
        }
    }

    fn family(&self, outcome: Outcome) -> &BTreeMap<String, i64> {
        match outcome {
            Outcome::Success => &self.last_success,
            Outcome::Failure => &self.last_failure,
        }
    }

    /// Sets the gauge of `database` to `timestamp`, replacing the previous value.
    pub fn set(&mut self, outcome: Outcome, database: &str, timestamp: i64) {
        self.family_mut(outcome)
            .insert(database.to_string(), timestamp);
    }

    /// Sets the gauge of `database` to now and returns the timestamp.
    pub fn set_to_current_time(&mut self, outcome: Outcome, database: &str) -> i64 {
        let now = Utc::now().timestamp();
        self.set(outcome, database, now);
        now
    }

    /// Latest observation of `database`.
    pub fn last(&self, outcome: Outcome, database: &str) -> Option<i64> {
        self.family(outcome).get(database).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.last_success.is_empty() && self.last_failure.is_empty()
    }

    /// Renders both families in the Prometheus text exposition format.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (name, help, family) in [
            (SUCCESS_NAME, SUCCESS_HELP, &self.last_success),
            (FAILURE_NAME, FAILURE_HELP, &self.last_failure),
        ] {
            if family.is_empty() {
                continue;
            }

            // writing into a String can't fail
            let _ = writeln!(out, "# HELP {name} {help}");
            let _ = writeln!(out, "# TYPE {name} gauge");
            for (database, timestamp) in family {
                let _ = writeln!(out, "{name}{{{LABEL}=\"{}\"}} {timestamp}", escape(database));
            }
        }
        out
    }
}

fn escape(label_value: &str) -> String {
    label_value
        .replace('\\', r"\\")
        .replace('"', r#"\""#)
        .replace('\n', r"\n")
}

/// Destination of the collected metrics.
pub trait MetricsSink {
    /// Replaces the metrics of `job` with `metrics`.
    fn push(&self, job: &str, metrics: &BackupMetrics) -> Result<(), MetricsForwardFailed>;
}

impl<S: MetricsSink + ?Sized> MetricsSink for &S {
    fn push(&self, job: &str, metrics: &BackupMetrics) -> Result<(), MetricsForwardFailed> {
        (**self).push(job, metrics)
    }
}

/// Records outcomes and forwards them to the sink.
#[derive(Debug)]
pub struct Reporter<S> {
    metrics: BackupMetrics,
    sink: Option<S>,
    job: String,
}

impl<S: MetricsSink> Reporter<S> {
    pub fn new(metrics: BackupMetrics, sink: Option<S>, job: impl Into<String>) -> Self {
        Self {
            metrics,
            sink,
            job: job.into(),
        }
    }

    pub fn metrics(&self) -> &BackupMetrics {
        &self.metrics
    }

    /// Records `outcome` for `database` and pushes the metrics.
    ///
    /// Never fails: push errors are only logged.
    pub fn report(&mut self, database: &str, outcome: Outcome) {
        let timestamp = self.metrics.set_to_current_time(outcome, database);
        log::debug!(target: "metrics", "Recorded {outcome} of database {database} at {timestamp}");

        let Some(sink) = &self.sink else {
            log::warn!(target: "metrics", "Push gateway not set, skipping metrics push");
            return;
        };

        if let Err(e) = sink.push(&self.job, &self.metrics) {
            log::error!(target: "metrics", "Pushing {outcome} metric of database {database} failed: {e}");
        }
    }
}

/// In-memory sink recording every push.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct MemorySink {
    pushes: std::cell::RefCell<Vec<(String, BackupMetrics)>>,
    fail: bool,
}

#[cfg(test)]
impl MemorySink {
    pub(crate) fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub(crate) fn pushes(&self) -> Vec<(String, BackupMetrics)> {
        self.pushes.borrow().clone()
    }
}

#[cfg(test)]
impl MetricsSink for MemorySink {
    fn push(&self, job: &str, metrics: &BackupMetrics) -> Result<(), MetricsForwardFailed> {
        self.pushes
            .borrow_mut()
            .push((job.to_string(), metrics.clone()));
        if self.fail {
            Err(MetricsForwardFailed::Status(
                reqwest::StatusCode::SERVICE_UNAVAILABLE,
            ))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_records_and_pushes() {
        let sink = MemorySink::default();
        let mut reporter = Reporter::new(BackupMetrics::default(), Some(&sink), "nightly");

        reporter.report("orders", Outcome::Success);
        reporter.report("billing", Outcome::Failure);

        let pushes = sink.pushes();
        assert_eq!(pushes.len(), 2);
        assert_eq!(pushes[0].0, "nightly");
        assert!(pushes[0].1.last(Outcome::Success, "orders").is_some());
        assert!(pushes[0].1.last(Outcome::Failure, "billing").is_none());
        assert_eq!(&pushes[1].1, reporter.metrics());
    }

    #[test]
    fn report_without_sink_still_records() {
        let mut reporter = Reporter::<PushGateway>::new(BackupMetrics::default(), None, "job");

        reporter.report("orders", Outcome::Failure);

        assert!(reporter.metrics().last(Outcome::Failure, "orders").is_some());
        assert!(reporter.metrics().last(Outcome::Success, "orders").is_none());
    }

    #[test]
    fn failing_push_is_swallowed() {
        let sink = MemorySink::failing();
        let mut reporter = Reporter::new(BackupMetrics::default(), Some(&sink), "job");

        reporter.report("orders", Outcome::Success);

        assert_eq!(sink.pushes().len(), 1);
        assert!(reporter.metrics().last(Outcome::Success, "orders").is_some());
    }

    #[test]
    fn later_observation_overwrites_earlier() {
        let mut metrics = BackupMetrics::default();
        metrics.set(Outcome::Success, "orders", 10);
        metrics.set(Outcome::Success, "orders", 20);

        assert_eq!(metrics.last(Outcome::Success, "orders"), Some(20));
    }

    #[test]
    fn renders_text_exposition_format() {
        let mut metrics = BackupMetrics::default();
        metrics.set(Outcome::Success, "orders", 1_700_000_000);
        metrics.set(Outcome::Success, "billing", 1_700_000_100);
        metrics.set(Outcome::Failure, "we\"ird", 1_700_000_200);

        assert_eq!(
            metrics.render(),
            "# HELP pg_backup_last_success Unix time when the script is executed\n\
             # TYPE pg_backup_last_success gauge\n\
             pg_backup_last_success{database=\"billing\"} 1700000100\n\
             pg_backup_last_success{database=\"orders\"} 1700000000\n\
             # HELP pg_backup_last_failure Unix time when the script is executed and failed\n\
             # TYPE pg_backup_last_failure gauge\n\
             pg_backup_last_failure{database=\"we\\\"ird\"} 1700000200\n"
        );
    }

    #[test]
    fn empty_metrics_render_nothing() {
        assert_eq!(BackupMetrics::default().render(), "");
    }
}
