//! Convergence polling for eventually-consistent remote objects.
//!
//! After a provider accepts a mutation, the remote object usually passes
//! through one or more transitional statuses before it settles. A
//! [`WaitSpec`] describes which status to wait for, which statuses are
//! acceptable on the way there, and how often and for how long to poll.

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{ConvergenceError, Result};

/// Default overall convergence timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Default minimum interval between refreshes.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Default upper bound for the backoff interval.
const DEFAULT_MAX_INTERVAL: Duration = Duration::from_secs(30);

/// Default number of consecutive not-found answers tolerated.
pub const DEFAULT_NOT_FOUND_CHECKS: u32 = 20;

/// Target status of a deletion wait.
pub const DELETED: &str = "deleted";

/// How the interval between refreshes evolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Always wait `poll_interval`.
    Fixed,
    /// Double the interval after every refresh, up to `max_interval`.
    Exponential,
}

/// Declarative description of a convergence wait.
#[derive(Debug, Clone)]
pub struct WaitSpec {
    target: String,
    pending: Vec<String>,
    timeout: Duration,
    initial_delay: Duration,
    poll_interval: Duration,
    max_interval: Duration,
    backoff: Backoff,
    deletion: bool,
    allow_any_terminal: bool,
    not_found_checks: u32,
    cancel: Option<CancellationToken>,
}

impl WaitSpec {
    /// Creates a wait for `target`, accepting `pending` statuses on the way.
    #[must_use]
    pub fn new<I, S>(target: impl Into<String>, pending: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            target: target.into(),
            pending: pending.into_iter().map(Into::into).collect(),
            timeout: DEFAULT_TIMEOUT,
            initial_delay: Duration::ZERO,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_interval: DEFAULT_MAX_INTERVAL,
            backoff: Backoff::Exponential,
            deletion: false,
            allow_any_terminal: false,
            not_found_checks: DEFAULT_NOT_FOUND_CHECKS,
            cancel: None,
        }
    }

    /// Sets the overall timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the delay before the first refresh.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the minimum interval between refreshes.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the upper bound for exponential backoff.
    #[must_use]
    pub const fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    /// Sets the backoff strategy.
    #[must_use]
    pub const fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Treats a not-found refresh as successful convergence.
    #[must_use]
    pub const fn for_deletion(mut self) -> Self {
        self.deletion = true;
        self
    }

    /// Accepts any non-pending status as a final status.
    #[must_use]
    pub const fn allow_any_terminal(mut self) -> Self {
        self.allow_any_terminal = true;
        self
    }

    /// Sets how many consecutive not-found answers are tolerated.
    #[must_use]
    pub const fn with_not_found_checks(mut self, checks: u32) -> Self {
        self.not_found_checks = checks;
        self
    }

    /// Attaches a cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Returns the awaited status.
    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Returns the acceptable transitional statuses.
    #[must_use]
    pub fn pending(&self) -> &[String] {
        &self.pending
    }

    /// Returns the overall timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Computes the interval that follows `current`.
    #[must_use]
    pub fn next_interval(&self, current: Duration) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.poll_interval,
            Backoff::Exponential => current
                .saturating_mul(2)
                .min(self.max_interval)
                .max(self.poll_interval),
        }
    }

    /// Polls `refresh` until the status converges.
    ///
    /// `refresh` returns the current status string of the remote object, or
    /// a not-found provider error if the object does not exist (yet or
    /// anymore).
    ///
    /// # Errors
    ///
    /// Returns a [`ConvergenceError`] on timeout, an unexpected status, too
    /// many consecutive not-found answers, a failing refresh, or
    /// cancellation.
    pub async fn wait<F, Fut>(
        &self,
        mut refresh: F,
    ) -> std::result::Result<String, ConvergenceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<String>>,
    {
        let cancel = self.cancel.clone().unwrap_or_default();
        let deadline = Instant::now() + self.timeout;
        let mut last_status: Option<String> = None;
        let mut not_found: u32 = 0;
        let mut interval = self.poll_interval;

        debug!(
            "Waiting for status '{}' (pending: {:?}, timeout: {:?})",
            self.target, self.pending, self.timeout
        );

        if !self.initial_delay.is_zero() {
            self.sleep_until(Instant::now() + self.initial_delay, deadline, &cancel, &last_status)
                .await?;
        }

        loop {
            if cancel.is_cancelled() {
                return Err(ConvergenceError::Canceled { last_status });
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(self.timed_out(last_status));
            }

            let attempt = tokio::select! {
                () = cancel.cancelled() => return Err(ConvergenceError::Canceled { last_status }),
                attempt = tokio::time::timeout(remaining, refresh()) => attempt,
            };

            match attempt {
                Err(_) => {
                    let target = &self.target;
                    warn!(
                        "Refresh did not return before the deadline while waiting for '{target}'"
                    );
                    return Err(self.timed_out(last_status));
                }
                Ok(Ok(status)) => {
                    not_found = 0;
                    debug!("Observed status '{status}' (target '{}')", self.target);

                    if status == self.target {
                        return Ok(status);
                    }
                    if !self.pending.contains(&status) {
                        if self.allow_any_terminal {
                            return Ok(status);
                        }
                        return Err(ConvergenceError::UnexpectedState {
                            status,
                            target: self.target.clone(),
                        });
                    }
                    last_status = Some(status);
                }
                Ok(Err(e)) if e.is_not_found() => {
                    if self.deletion {
                        debug!("Remote object is gone, deletion converged");
                        return Ok(self.target.clone());
                    }
                    not_found += 1;
                    debug!("Remote object not found ({not_found}/{})", self.not_found_checks);
                    if not_found >= self.not_found_checks {
                        return Err(ConvergenceError::NotFound {
                            target: self.target.clone(),
                            attempts: not_found,
                        });
                    }
                }
                Ok(Err(e)) => return Err(ConvergenceError::Refresh(Box::new(e))),
            }

            self.sleep_until(Instant::now() + interval, deadline, &cancel, &last_status)
                .await?;
            interval = self.next_interval(interval);
        }
    }

    /// Sleeps until `wake` or the deadline, whichever comes first.
    async fn sleep_until(
        &self,
        wake: Instant,
        deadline: Instant,
        cancel: &CancellationToken,
        last_status: &Option<String>,
    ) -> std::result::Result<(), ConvergenceError> {
        tokio::select! {
            () = cancel.cancelled() => Err(ConvergenceError::Canceled {
                last_status: last_status.clone(),
            }),
            () = tokio::time::sleep_until(wake.min(deadline)) => {
                if wake > deadline {
                    Err(self.timed_out(last_status.clone()))
                } else {
                    Ok(())
                }
            }
        }
    }

    fn timed_out(&self, last_status: Option<String>) -> ConvergenceError {
        ConvergenceError::Timeout {
            target: self.target.clone(),
            last_status,
            timeout: self.timeout,
        }
    }
}

/// Polls `refresh` until it reports `target`.
///
/// Shorthand for a [`WaitSpec`] with exponential backoff starting at
/// `poll_interval`. A target of [`DELETED`] or `""` waits for the object to
/// disappear: a not-found refresh is success and reports [`DELETED`].
///
/// # Errors
///
/// See [`WaitSpec::wait`].
pub async fn wait_for<F, Fut>(
    refresh: F,
    target: &str,
    pending: &[&str],
    timeout: Duration,
    initial_delay: Duration,
    poll_interval: Duration,
) -> std::result::Result<String, ConvergenceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<String>>,
{
    let spec = if target.is_empty() || target == DELETED {
        WaitSpec::new(DELETED, pending.iter().copied()).for_deletion()
    } else {
        WaitSpec::new(target, pending.iter().copied())
    };

    spec.with_timeout(timeout)
        .with_delay(initial_delay)
        .with_poll_interval(poll_interval)
        .with_max_interval(poll_interval.saturating_mul(8))
        .wait(refresh)
        .await
}
