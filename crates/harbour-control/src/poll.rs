//! Bounded polling against the control plane.
//!
//! A [`Poller`] owns one phase's time budget. Every control-plane call made
//! through it is bounded by the per-request timeout, transient failures are
//! retried with exponential backoff, and the whole phase gives up once its
//! deadline passes or the release is cancelled. Nothing here sleeps past the
//! deadline.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::Timing;
use crate::error::ControlPlaneError;
use crate::outcome::TimeoutCause;

/// Result of a single status probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe<T> {
    /// The awaited condition holds.
    Ready(T),
    /// Not there yet; check again after the poll interval.
    Pending,
}

/// Why polling stopped without a result.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PollError {
    /// The phase deadline passed.
    #[error("phase deadline elapsed")]
    Elapsed,

    /// Too many consecutive transient failures.
    #[error("gave up after {attempts} consecutive failures: {source}")]
    Exhausted {
        /// Consecutive failed calls.
        attempts: u32,
        /// The last failure.
        source: ControlPlaneError,
    },

    /// The control plane refused a call outright.
    #[error("control plane refused the call: {0}")]
    Rejected(ControlPlaneError),

    /// The release was cancelled.
    #[error("cancelled")]
    Cancelled,
}

impl PollError {
    /// Describe this error as the cause of a phase timeout.
    #[must_use]
    pub fn into_timeout_cause(self) -> TimeoutCause {
        match self {
            Self::Elapsed => TimeoutCause::Elapsed,
            Self::Cancelled => TimeoutCause::Cancelled,
            Self::Exhausted { attempts, source } => TimeoutCause::ControlPlane {
                attempts,
                error: source.to_string(),
            },
            Self::Rejected(source) => TimeoutCause::ControlPlane {
                attempts: 1,
                error: source.to_string(),
            },
        }
    }
}

/// Time-budgeted caller for one release phase.
#[derive(Debug)]
pub struct Poller {
    interval: Duration,
    request_timeout: Duration,
    max_consecutive_errors: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
    started: Instant,
    deadline: Instant,
    cancel: CancellationToken,
}

impl Poller {
    /// Start a phase that may run for at most `max_wait`.
    #[must_use]
    pub fn new(timing: &Timing, max_wait: Duration, cancel: CancellationToken) -> Self {
        let started = Instant::now();
        Self {
            interval: timing.interval,
            request_timeout: timing.request_timeout,
            max_consecutive_errors: timing.max_consecutive_errors.max(1),
            initial_backoff: timing.initial_backoff,
            max_backoff: timing.max_backoff,
            started,
            deadline: started + max_wait,
            cancel,
        }
    }

    /// Time spent in this phase so far.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Time left before the phase deadline.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Run one control-plane call under the per-request timeout.
    ///
    /// The timeout shrinks to whatever is left of the phase near its deadline.
    pub async fn call<T, F>(&self, fut: F) -> Result<T, ControlPlaneError>
    where
        F: Future<Output = Result<T, ControlPlaneError>>,
    {
        let budget = self.request_timeout.min(self.remaining());
        match tokio::time::timeout(budget, fut).await {
            Ok(result) => result,
            Err(_) => Err(ControlPlaneError::Timeout(budget)),
        }
    }

    /// Call `op` until it succeeds, retrying transient failures.
    ///
    /// Used for actions such as starting a task, where the caller makes the
    /// operation safe to repeat.
    pub async fn retry<T, F, Fut>(&self, mut op: F) -> Result<T, PollError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ControlPlaneError>>,
    {
        let mut failures = 0;
        loop {
            self.check()?;
            match self.attempt(op()).await? {
                Ok(value) => return Ok(value),
                Err(error) => {
                    failures = self.record_failure(failures, error)?;
                    self.sleep(self.backoff(failures)).await?;
                }
            }
        }
    }

    /// Probe until the awaited condition holds.
    ///
    /// `Pending` waits one poll interval. A successful probe resets the
    /// consecutive failure count.
    pub async fn until<T, F, Fut>(&self, mut probe: F) -> Result<T, PollError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Probe<T>, ControlPlaneError>>,
    {
        let mut failures = 0;
        loop {
            self.check()?;
            match self.attempt(probe()).await? {
                Ok(Probe::Ready(value)) => return Ok(value),
                Ok(Probe::Pending) => {
                    failures = 0;
                    self.sleep(self.interval).await?;
                }
                Err(error) => {
                    failures = self.record_failure(failures, error)?;
                    self.sleep(self.backoff(failures)).await?;
                }
            }
        }
    }

    fn check(&self) -> Result<(), PollError> {
        if self.cancel.is_cancelled() {
            return Err(PollError::Cancelled);
        }
        if Instant::now() >= self.deadline {
            return Err(PollError::Elapsed);
        }
        Ok(())
    }

    async fn attempt<T, F>(&self, fut: F) -> Result<Result<T, ControlPlaneError>, PollError>
    where
        F: Future<Output = Result<T, ControlPlaneError>>,
    {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(PollError::Cancelled),
            result = self.call(fut) => Ok(result),
        }
    }

    fn record_failure(&self, failures: u32, error: ControlPlaneError) -> Result<u32, PollError> {
        if !error.is_transient() {
            tracing::warn!(error = %error, "control plane refused call");
            return Err(PollError::Rejected(error));
        }

        let attempts = failures + 1;
        if attempts >= self.max_consecutive_errors {
            tracing::warn!(attempts, error = %error, "giving up on control plane");
            return Err(PollError::Exhausted {
                attempts,
                source: error,
            });
        }

        tracing::debug!(attempts, error = %error, "transient control plane error, backing off");
        Ok(attempts)
    }

    fn backoff(&self, failures: u32) -> Duration {
        let shift = failures.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1 << shift)
            .min(self.max_backoff)
    }

    /// Sleep for `duration`, never past the deadline.
    async fn sleep(&self, duration: Duration) -> Result<(), PollError> {
        let wake = (Instant::now() + duration).min(self.deadline);
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(PollError::Cancelled),
            () = tokio::time::sleep_until(wake) => Ok(()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use super::*;

    fn timing() -> Timing {
        Timing {
            interval: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
            max_consecutive_errors: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(4),
            migration_max_wait: Duration::from_secs(60),
            rollout_max_wait: Duration::from_secs(60),
        }
    }

    fn poller(max_wait: Duration) -> Poller {
        Poller::new(&timing(), max_wait, CancellationToken::new())
    }

    #[test]
    fn backoff_doubles_up_to_cap() {
        let p = poller(Duration::from_secs(60));
        assert_eq!(p.backoff(1), Duration::from_millis(500));
        assert_eq!(p.backoff(2), Duration::from_secs(1));
        assert_eq!(p.backoff(3), Duration::from_secs(2));
        assert_eq!(p.backoff(4), Duration::from_secs(4));
        assert_eq!(p.backoff(10), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn until_returns_once_ready() {
        let p = poller(Duration::from_secs(60));
        let probes = AtomicU32::new(0);

        let value = p
            .until(|| {
                let n = probes.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 3 {
                        Ok(Probe::Pending)
                    } else {
                        Ok(Probe::Ready(n))
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 3);
        assert_eq!(p.elapsed(), Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn until_stops_at_deadline() {
        let p = poller(Duration::from_secs(12));

        let err = p
            .until(|| async { Ok::<Probe<()>, _>(Probe::Pending) })
            .await
            .unwrap_err();

        assert_eq!(err, PollError::Elapsed);
        assert_eq!(p.elapsed(), Duration::from_secs(12));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_exhaust_budget() {
        let p = poller(Duration::from_secs(600));
        let calls = AtomicU32::new(0);

        let err = p
            .until(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<Probe<()>, _>(ControlPlaneError::Throttled("slow down".into())) }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, PollError::Exhausted { attempts: 3, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn pending_resets_failure_count() {
        let p = poller(Duration::from_secs(600));
        let calls = AtomicU32::new(0);

        // Two failures, a pending, two more failures, then ready: never three
        // in a row.
        let value = p
            .until(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    match n {
                        0 | 1 | 3 | 4 => Err(ControlPlaneError::unavailable("connection reset")),
                        2 => Ok(Probe::Pending),
                        _ => Ok(Probe::Ready("done")),
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(value, "done");
        assert_eq!(calls.load(Ordering::SeqCst), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn non_transient_error_is_rejected_immediately() {
        let p = poller(Duration::from_secs(60));
        let calls = AtomicU32::new(0);

        let err = p
            .retry(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(ControlPlaneError::rejected("AccessDenied")) }
            })
            .await
            .unwrap_err();

        assert_eq!(
            err,
            PollError::Rejected(ControlPlaneError::rejected("AccessDenied"))
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_recovers_from_transient_failure() {
        let p = poller(Duration::from_secs(60));
        let calls = AtomicU32::new(0);

        let value = p
            .retry(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(ControlPlaneError::unavailable("503"))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 42);
        assert_eq!(p.elapsed(), Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn hung_call_times_out() {
        let p = poller(Duration::from_secs(60));

        let err = p
            .call(std::future::pending::<Result<(), ControlPlaneError>>())
            .await
            .unwrap_err();

        assert_eq!(err, ControlPlaneError::Timeout(Duration::from_secs(10)));
        assert!(err.is_transient());
    }

    #[tokio::test(start_paused = true)]
    async fn hung_call_near_deadline_is_cut_to_what_remains() {
        let p = poller(Duration::from_secs(12));
        let calls = AtomicU32::new(0);

        let err = p
            .until(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Ok(Probe::Pending)
                    } else {
                        std::future::pending::<Result<Probe<()>, ControlPlaneError>>().await
                    }
                }
            })
            .await
            .unwrap_err();

        assert_eq!(err, PollError::Elapsed);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(p.elapsed(), Duration::from_secs(12));
    }

    #[tokio::test(start_paused = true)]
    async fn call_timeout_never_exceeds_remaining_budget() {
        let p = poller(Duration::from_secs(3));

        let err = p
            .call(std::future::pending::<Result<(), ControlPlaneError>>())
            .await
            .unwrap_err();

        assert_eq!(err, ControlPlaneError::Timeout(Duration::from_secs(3)));
        assert_eq!(p.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_wait() {
        let cancel = CancellationToken::new();
        let p = Poller::new(&timing(), Duration::from_secs(600), cancel.clone());
        let trigger = Arc::new(AtomicU32::new(0));

        let probe_trigger = Arc::clone(&trigger);
        let err = p
            .until(move || {
                if probe_trigger.fetch_add(1, Ordering::SeqCst) == 1 {
                    cancel.cancel();
                }
                async { Ok::<Probe<()>, _>(Probe::Pending) }
            })
            .await
            .unwrap_err();

        assert_eq!(err, PollError::Cancelled);
        assert_eq!(trigger.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn poll_errors_become_timeout_causes() {
        assert_eq!(PollError::Elapsed.into_timeout_cause(), TimeoutCause::Elapsed);
        assert_eq!(
            PollError::Cancelled.into_timeout_cause(),
            TimeoutCause::Cancelled
        );
        assert_eq!(
            PollError::Exhausted {
                attempts: 5,
                source: ControlPlaneError::Throttled("rate".into()),
            }
            .into_timeout_cause(),
            TimeoutCause::ControlPlane {
                attempts: 5,
                error: "control plane throttled the request: rate".to_owned(),
            }
        );
    }
}
