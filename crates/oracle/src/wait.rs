//! Retry-until-true-or-timeout primitive every "wait for X" is built on.
//!
//! An attempt reports `Attempt::Ready` with a value or `Attempt::Pending`
//! with a description of what it saw. Retryable errors count as pending only
//! when the wait tolerates errors; every other error ends the wait at once.
//! When the deadline (or attempt bound) is hit the wait fails with a
//! `FatalTimeout` holding the last pending state and the last tolerated error.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::time::{Instant, sleep};
use tracing::{debug, warn};

use crate::error::{Error, ReplSetResult};

/// Outcome of one attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attempt<T> {
    /// The condition holds
    Ready(T),
    /// Not yet; carries the observed state
    Pending(String),
}

/// How long and how often to retry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitOptions {
    /// Deadline measured from the first attempt
    pub timeout: Duration,
    /// Pause between attempts
    pub interval: Duration,
    /// Treat retryable errors as "not yet"
    pub tolerate_errors: bool,
    /// Give up after this many attempts even before the deadline
    pub max_attempts: Option<u32>,
}

impl WaitOptions {
    /// Options that propagate every error
    #[must_use]
    pub const fn new(timeout: Duration, interval: Duration) -> Self {
        Self {
            timeout,
            interval,
            tolerate_errors: false,
            max_attempts: None,
        }
    }

    /// Treat retryable errors as "not yet"
    #[must_use]
    pub const fn tolerating_errors(mut self) -> Self {
        self.tolerate_errors = true;
        self
    }

    /// Bound the number of attempts
    #[must_use]
    pub const fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }
}

/// State captured when a wait gives up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FatalTimeout {
    /// What was being waited for
    pub description: String,
    /// Time spent waiting
    pub elapsed: Duration,
    /// Attempts made
    pub attempts: u32,
    /// Last state reported by a pending attempt
    pub last_state: Option<String>,
    /// Last tolerated error
    pub last_error: Option<String>,
}

impl fmt::Display for FatalTimeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} did not succeed after {} attempts in {:?}",
            self.description, self.attempts, self.elapsed
        )?;
        if let Some(state) = &self.last_state {
            write!(f, "; last state: {state}")?;
        }
        if let Some(error) = &self.last_error {
            write!(f, "; last error: {error}")?;
        }
        Ok(())
    }
}

/// Drives a retry loop whose attempts keep state of their own.
///
/// ```ignore
/// let mut waiter = Waiter::new("primary election", options);
/// let primary = loop {
///     if let Some(primary) = waiter.step(try_primary().await).await? {
///         break primary;
///     }
/// };
/// ```
#[derive(Debug)]
pub struct Waiter {
    description: String,
    options: WaitOptions,
    started: Instant,
    attempts: u32,
    last_state: Option<String>,
    last_error: Option<String>,
}

impl Waiter {
    /// Starts the clock
    pub fn new(description: impl Into<String>, options: WaitOptions) -> Self {
        Self {
            description: description.into(),
            options,
            started: Instant::now(),
            attempts: 0,
            last_state: None,
            last_error: None,
        }
    }

    /// Records one attempt.
    ///
    /// Returns the value once ready, `None` after sleeping when another
    /// attempt should be made.
    ///
    /// # Errors
    ///
    /// Returns the attempt's error when it is fatal (or errors are not
    /// tolerated), and a timeout error when the deadline or attempt bound is hit.
    pub async fn step<T>(&mut self, outcome: ReplSetResult<Attempt<T>>) -> ReplSetResult<Option<T>> {
        self.attempts += 1;
        match outcome {
            Ok(Attempt::Ready(value)) => return Ok(Some(value)),
            Ok(Attempt::Pending(state)) => {
                debug!("Waiting for {} (attempt {}): {}", self.description, self.attempts, state);
                self.last_state = Some(state);
            }
            Err(e) if self.options.tolerate_errors && e.is_retryable() => {
                warn!("Waiting for {} attempt {} failed: {}", self.description, self.attempts, e);
                self.last_error = Some(e.to_string());
            }
            Err(e) => return Err(e),
        }

        let out_of_attempts = self
            .options
            .max_attempts
            .is_some_and(|max| self.attempts >= max);
        if out_of_attempts || self.started.elapsed() >= self.options.timeout {
            return Err(Error::timed_out(self.timeout_state()));
        }

        sleep(self.options.interval).await;
        Ok(None)
    }

    /// Attempts made so far
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Time since the wait started
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    fn timeout_state(&self) -> FatalTimeout {
        FatalTimeout {
            description: self.description.clone(),
            elapsed: self.started.elapsed(),
            attempts: self.attempts,
            last_state: self.last_state.clone(),
            last_error: self.last_error.clone(),
        }
    }
}

/// Calls `attempt` until it is ready, it fails fatally, or the wait times out.
///
/// # Errors
///
/// Returns a fatal attempt error as is, or a timeout error carrying the last
/// observed state.
pub async fn await_condition<T, F, Fut>(
    description: &str,
    options: WaitOptions,
    mut attempt: F,
) -> ReplSetResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ReplSetResult<Attempt<T>>>,
{
    let mut waiter = Waiter::new(description, options);
    loop {
        if let Some(value) = waiter.step(attempt().await).await? {
            return Ok(value);
        }
    }
}

/// Calls `attempt` up to `attempts` times, `interval` apart, while it fails
/// with a retryable error.
///
/// # Errors
///
/// Returns the first fatal error, or the last retryable one once the
/// attempts are used up.
pub async fn retry<T, F, Fut>(
    description: &str,
    attempts: u32,
    interval: Duration,
    mut attempt: F,
) -> ReplSetResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ReplSetResult<T>>,
{
    let mut remaining = attempts.max(1);
    loop {
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(e) if remaining > 1 && e.is_retryable() => {
                remaining -= 1;
                warn!("{} failed, {} attempts left: {}", description, remaining, e);
                sleep(interval).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tracing_test::traced_test;

    fn options() -> WaitOptions {
        WaitOptions::new(Duration::from_secs(10), Duration::from_millis(100))
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_after_pending_attempts() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let value = await_condition("counter", options(), || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(if n == 3 {
                Attempt::Ready(n)
            } else {
                Attempt::Pending(format!("saw {n}"))
            })
        })
        .await
        .unwrap();

        assert_eq!(value, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_carries_last_state() {
        let err = await_condition::<(), _, _>("never", options(), || async {
            Ok(Attempt::Pending("still waiting".to_string()))
        })
        .await
        .unwrap_err();

        assert!(err.is_timeout());
        let state = err.timeout_state().unwrap();
        assert_eq!(state.description, "never");
        assert_eq!(state.last_state.as_deref(), Some("still waiting"));
        assert!(state.elapsed >= Duration::from_secs(10));
        assert!(state.attempts > 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_errors_tolerated_when_asked() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let value = await_condition("flaky", options().tolerating_errors(), || async move {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(Error::no_primary("election in progress"))
            } else {
                Ok(Attempt::Ready("done"))
            }
        })
        .await
        .unwrap();

        assert_eq!(value, "done");
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn test_tolerated_errors_are_logged() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        await_condition("logged", options().tolerating_errors(), || async move {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(Error::no_primary("stepping down"))
            } else {
                Ok(Attempt::Ready(()))
            }
        })
        .await
        .unwrap();

        assert!(logs_contain("Waiting for logged attempt 1 failed"));
        assert!(logs_contain("stepping down"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_errors_propagate_when_not_tolerated() {
        let err = await_condition::<(), _, _>("strict", options(), || async {
            Err(Error::no_primary("election in progress"))
        })
        .await
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::NoPrimary);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_errors_always_propagate() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let err = await_condition::<(), _, _>("fatal", options().tolerating_errors(), || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::structural("unelectable first member"))
        })
        .await
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Structural);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_bound() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let err = await_condition::<(), _, _>("bounded", options().with_max_attempts(3), || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(Attempt::Pending("no".to_string()))
        })
        .await
        .unwrap_err();

        assert!(err.is_timeout());
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert_eq!(err.timeout_state().unwrap().attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_returns_last_retryable_error() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let err = retry::<(), _, _>("initiate", 3, Duration::from_secs(5), || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::no_primary("not yet"))
        })
        .await
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::NoPrimary);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_stops_on_fatal_error() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let err = retry::<(), _, _>("initiate", 3, Duration::from_secs(5), || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::structural("bad config"))
        })
        .await
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Structural);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
