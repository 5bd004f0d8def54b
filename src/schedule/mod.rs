//! Recurring backup runs driven by a cron expression.

use std::sync::{Arc, Mutex, TryLockError};

use derive_more::{Display, Error};
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};
use tokio_util::sync::CancellationToken;

/// Every minute.
pub const DEFAULT_SCHEDULE: &str = "* * * * *";

#[derive(Debug, Display, Error)]
/// Errors of the recurring scheduler.
pub enum ScheduleError {
    /// The schedule expression couldn't be registered or the scheduler didn't start.
    #[display("Registering schedule {schedule:?} failed: {source}")]
    RegistrationFailed {
        schedule: String,
        source: JobSchedulerError,
    },
    /// The scheduler didn't stop cleanly.
    #[display("Shutting down the scheduler failed: {_0}")]
    ShutdownFailed(JobSchedulerError),
}

/// Brings a classic five field expression into the six field form (with seconds) the
/// scheduler expects. Other expressions are passed on unchanged.
pub fn normalize(schedule: &str) -> String {
    let schedule = schedule.trim();
    if schedule.split_whitespace().count() == 5 {
        format!("0 {schedule}")
    } else {
        schedule.to_string()
    }
}

/// Runs `run` on every tick of `schedule` until `shutdown` is cancelled.
///
/// `run` blocks and is executed on a blocking worker. Its errors are logged and the schedule
/// keeps going. A tick that fires while the previous run is still busy is skipped.
pub async fn run_forever<F, E>(
    schedule: &str,
    run: F,
    shutdown: CancellationToken,
) -> Result<(), ScheduleError>
where
    F: FnMut() -> Result<(), E> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let normalized = normalize(schedule);
    let registration_failed = |source: JobSchedulerError| ScheduleError::RegistrationFailed {
        schedule: schedule.to_string(),
        source,
    };

    let mut scheduler = JobScheduler::new().await.map_err(registration_failed)?;

    let run = Arc::new(Mutex::new(run));
    let job = Job::new_async(normalized.as_str(), move |_uuid, _lock| {
        let run = Arc::clone(&run);
        Box::pin(async move {
            let tick = tokio::task::spawn_blocking(move || {
                let mut run = match run.try_lock() {
                    Ok(run) => run,
                    Err(TryLockError::WouldBlock) => {
                        log::warn!(target: "schedule", "Previous run still in progress, skipping tick");
                        return;
                    }
                    Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
                };

                if let Err(e) = (*run)() {
                    log::error!(target: "schedule", "Error during backup: {e}");
                }
            });

            if let Err(e) = tick.await {
                log::error!(target: "schedule", "Backup run panicked: {e}");
            }
        })
    })
    .map_err(registration_failed)?;

    scheduler.add(job).await.map_err(registration_failed)?;
    scheduler.start().await.map_err(registration_failed)?;
    log::info!(target: "schedule", "Started with cron schedule {schedule:?}");

    shutdown.cancelled().await;

    log::info!(target: "schedule", "Shutting down");
    scheduler
        .shutdown()
        .await
        .map_err(ScheduleError::ShutdownFailed)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    #[test]
    fn five_fields_get_seconds() {
        assert_eq!(normalize(DEFAULT_SCHEDULE), "0 * * * * *");
        assert_eq!(normalize(" 30 3 * * SUN "), "0 30 3 * * SUN");
    }

    #[test]
    fn six_fields_pass_through() {
        assert_eq!(normalize("*/5 * * * * *"), "*/5 * * * * *");
    }

    #[tokio::test]
    async fn invalid_expression_is_rejected() {
        let err = run_forever(
            "not a schedule",
            || Ok::<_, String>(()),
            CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert!(
            matches!(err, ScheduleError::RegistrationFailed { ref schedule, .. } if schedule == "not a schedule"),
            "{err}"
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn runs_on_ticks_until_cancelled() {
        let runs = Arc::new(AtomicUsize::new(0));
        let shutdown = CancellationToken::new();

        let counter = Arc::clone(&runs);
        let scheduled = tokio::spawn(run_forever(
            "* * * * * *",
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Err("failing runs don't stop the schedule")
            },
            shutdown.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(3500)).await;
        shutdown.cancel();
        scheduled.await.unwrap().unwrap();

        assert!(runs.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn busy_run_skips_ticks() {
        let runs = Arc::new(AtomicUsize::new(0));
        let running = Arc::new(AtomicBool::new(false));
        let overlapped = Arc::new(AtomicBool::new(false));
        let shutdown = CancellationToken::new();

        let (counter, busy, overlap) = (
            Arc::clone(&runs),
            Arc::clone(&running),
            Arc::clone(&overlapped),
        );
        let scheduled = tokio::spawn(run_forever(
            "* * * * * *",
            move || {
                if busy.swap(true, Ordering::SeqCst) {
                    overlap.store(true, Ordering::SeqCst);
                }
                counter.fetch_add(1, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(2500));
                busy.store(false, Ordering::SeqCst);
                Ok::<_, String>(())
            },
            shutdown.clone(),
        ));

        // about six ticks, of which at most three can start a run
        tokio::time::sleep(Duration::from_millis(6200)).await;
        shutdown.cancel();
        scheduled.await.unwrap().unwrap();

        let runs = runs.load(Ordering::SeqCst);
        assert!((1..=3).contains(&runs), "{runs} runs");
        assert!(!overlapped.load(Ordering::SeqCst));
    }
}
