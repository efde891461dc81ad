//! Per-task recurring runner: executes one refresh function on a fixed
//! interval with bounded retry, and stays cancellable at every wait.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::RefreshError;

/// Consecutive failures tolerated before the scheduler halts for good.
pub const MAX_CONSECUTIVE_FAILURES: u32 = 30;

/// Cool-down between failed attempts.
pub const RETRY_COOLDOWN: Duration = Duration::from_secs(30);

/// The refresh operation the scheduler drives. Side effects (persistence,
/// callbacks) belong to the function itself, not the scheduler.
pub type RefreshFn =
    Arc<dyn Fn() -> BoxFuture<'static, Result<(), RefreshError>> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Idle,
    Running,
}

struct Inner {
    status: Status,
    cancel: CancellationToken,
}

/// Recurring runner owned by exactly one task.
///
/// `start` on a running scheduler is a no-op; `stop` cancels the current
/// run's token, which interrupts any in-progress interval or cool-down wait,
/// so stopping has bounded latency regardless of where the loop is.
pub struct Scheduler {
    app_id: String,
    name: String,
    interval: Duration,
    inner: Arc<Mutex<Inner>>,
}

impl Scheduler {
    pub fn new(app_id: &str, name: &str, interval: Duration) -> Self {
        Self {
            app_id: app_id.to_owned(),
            name: name.to_owned(),
            interval,
            inner: Arc::new(Mutex::new(Inner {
                status: Status::Idle,
                cancel: CancellationToken::new(),
            })),
        }
    }

    pub fn status(&self) -> Status {
        self.inner.lock().expect("scheduler lock poisoned").status
    }

    /// Launch the run loop after `initial_delay`. No-op when already running.
    pub fn start(&self, initial_delay: Duration, refresh: RefreshFn) {
        let cancel = {
            let mut inner = self.inner.lock().expect("scheduler lock poisoned");
            if inner.status == Status::Running {
                debug!(app_id = %self.app_id, task = %self.name, "scheduler already running");
                return;
            }
            inner.status = Status::Running;
            inner.cancel = CancellationToken::new();
            inner.cancel.clone()
        };

        info!(
            app_id = %self.app_id,
            task = %self.name,
            delay_secs = initial_delay.as_secs(),
            "scheduler started"
        );

        let name = self.name.clone();
        let app_id = self.app_id.clone();
        let interval = self.interval;
        let inner = Arc::clone(&self.inner);
        tokio::spawn(run_loop(
            app_id,
            name,
            interval,
            initial_delay,
            inner,
            cancel,
            refresh,
        ));
    }

    /// Set the status to Idle and interrupt the run loop at its next
    /// cancellation point (including mid-wait).
    pub fn stop(&self) {
        let mut inner = self.inner.lock().expect("scheduler lock poisoned");
        inner.status = Status::Idle;
        inner.cancel.cancel();
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_loop(
    app_id: String,
    name: String,
    interval: Duration,
    initial_delay: Duration,
    inner: Arc<Mutex<Inner>>,
    cancel: CancellationToken,
    refresh: RefreshFn,
) {
    if !cancellable_wait(&cancel, initial_delay).await {
        return;
    }

    let mut failures: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            return;
        }

        debug!(%app_id, task = %name, "refresh attempt started");
        match refresh().await {
            Ok(()) => {
                failures = 0;
                info!(%app_id, task = %name, "refresh attempt succeeded");
                if !cancellable_wait(&cancel, interval).await {
                    return;
                }
            }
            Err(err) => {
                failures += 1;
                warn!(
                    %app_id,
                    task = %name,
                    failures,
                    %err,
                    "refresh attempt failed, retrying in {}s",
                    RETRY_COOLDOWN.as_secs()
                );

                if failures >= MAX_CONSECUTIVE_FAILURES {
                    error!(
                        %app_id,
                        task = %name,
                        failures,
                        "retry ceiling reached, scheduler halted until restarted"
                    );
                    let mut guard = inner.lock().expect("scheduler lock poisoned");
                    // stop() may have raced us with a newer run; only this
                    // run's still-live token may flip the status.
                    if !cancel.is_cancelled() {
                        guard.status = Status::Idle;
                        guard.cancel.cancel();
                    }
                    return;
                }

                if !cancellable_wait(&cancel, RETRY_COOLDOWN).await {
                    return;
                }
            }
        }
    }
}

/// Sleep for `duration`, waking early on cancellation. Returns false when
/// the wait was interrupted.
async fn cancellable_wait(cancel: &CancellationToken, duration: Duration) -> bool {
    if duration.is_zero() {
        return !cancel.is_cancelled();
    }

    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = sleep(duration) => true,
    }
}

/// Initial delay after recovery: wait out the remainder of the interval,
/// except when the persisted timestamp is stale (elapsed >= interval) or in
/// the future (elapsed <= 0), both of which start immediately.
pub fn recovery_delay(interval: Duration, elapsed_secs: i64) -> Duration {
    let interval_secs = interval.as_secs() as i64;
    let delay = interval_secs - elapsed_secs;
    if delay <= 0 || delay >= interval_secs {
        Duration::ZERO
    } else {
        Duration::from_secs(delay as u64)
    }
}
