//! Poll/wait state machine
//!
//! [`StateChangeConf`] says which status values a resource can report mean
//! "keep waiting", "done" and "failed", and how often to look. Each probe
//! result moves the machine one step: done, failed, or sleep and probe
//! again. The same machine backs the async, cancellable and blocking drivers.
//!
//! Schedule, when no fixed `poll_interval` is set:
//! - first wait 200ms, then multiplied by `backoff_multiplier` each round
//! - capped at `max_wait` (10s by default), floored at `min_timeout`
//! - held constant while counting consecutive target observations
//! - optionally randomised by ±`jitter_factor`
//! - never longer than the time left before the deadline

use std::error::Error as StdError;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBackoff, ExponentialBuilder};
use rand::Rng;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::classify::{self, retry_marker};
use crate::config::PollConfig;
use crate::error::{
    BoxError, NotFoundError, Result, TimeoutError, UnexpectedStateError, WaitError,
};

/// Outcome of one probe.
///
/// `Ok(Some((value, status)))` is an observation, `Ok(None)` means the
/// resource was not found, and `Err` is a failed probe.
pub type RefreshResult<T> = std::result::Result<Option<(T, String)>, BoxError>;

/// Caller-supplied test for probe errors that should be retried.
pub type TransientPredicate = Arc<dyn Fn(&(dyn StdError + 'static)) -> bool + Send + Sync>;

const INITIAL_WAIT: Duration = Duration::from_millis(100);
const FIRST_BACKOFF: Duration = Duration::from_millis(200);

/// Upper bound on the exponential wait between probes.
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(10);

/// How long an in-flight probe may run past the deadline before it is
/// abandoned. A probe that finishes within it is still observed.
pub const REFRESH_GRACE_PERIOD: Duration = Duration::from_secs(30);

/// How to treat a probe that finds no resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NotFoundPolicy {
    /// Stop on the first miss with a [`NotFoundError`].
    #[default]
    Fail,
    /// Treat a miss as pending and keep polling until the deadline.
    Pending,
    /// Tolerate this many consecutive misses, fail on the next one.
    Checks(u32),
}

/// Description of a wait for a resource to reach a target status.
#[derive(Clone)]
pub struct StateChangeConf {
    pub pending: Vec<String>,
    /// Empty means waiting for the resource to be gone.
    pub target: Vec<String>,
    /// Statuses that end the wait immediately with [`WaitError::Failed`].
    pub failure: Vec<String>,
    pub timeout: Duration,
    /// Sleep before the first probe.
    pub delay: Duration,
    /// Lower bound on the exponential wait.
    pub min_timeout: Duration,
    /// Fixed wait between probes, replacing the exponential schedule.
    pub poll_interval: Option<Duration>,
    pub backoff_multiplier: f64,
    pub max_wait: Duration,
    pub jitter_factor: f64,
    pub not_found: NotFoundPolicy,
    /// Consecutive target observations required before success.
    pub continuous_target_occurence: u32,
    pub transient: Option<TransientPredicate>,
}

impl StateChangeConf {
    pub fn new<P, T>(pending: P, target: T, timeout: Duration) -> Self
    where
        P: IntoIterator,
        P::Item: Into<String>,
        T: IntoIterator,
        T::Item: Into<String>,
    {
        Self {
            pending: pending.into_iter().map(Into::into).collect(),
            target: target.into_iter().map(Into::into).collect(),
            failure: Vec::new(),
            timeout,
            delay: Duration::ZERO,
            min_timeout: Duration::ZERO,
            poll_interval: None,
            backoff_multiplier: 2.0,
            max_wait: DEFAULT_MAX_WAIT,
            jitter_factor: 0.0,
            not_found: NotFoundPolicy::Fail,
            continuous_target_occurence: 1,
            transient: None,
        }
    }

    pub fn with_failure<S: Into<String>>(mut self, failure: impl IntoIterator<Item = S>) -> Self {
        self.failure = failure.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_min_timeout(mut self, min_timeout: Duration) -> Self {
        self.min_timeout = min_timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Randomise each wait by ±`jitter_factor`, clamped to `[0, 1]`.
    pub fn with_jitter(mut self, jitter_factor: f64) -> Self {
        self.jitter_factor = clamp_jitter(jitter_factor);
        self
    }

    pub fn with_not_found(mut self, policy: NotFoundPolicy) -> Self {
        self.not_found = policy;
        self
    }

    pub fn with_continuous_target_occurence(mut self, occurences: u32) -> Self {
        self.continuous_target_occurence = occurences;
        self
    }

    /// Retry probe errors matching `predicate` instead of failing on them.
    pub fn with_transient<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&(dyn StdError + 'static)) -> bool + Send + Sync + 'static,
    {
        self.transient = Some(Arc::new(predicate));
        self
    }

    /// Apply configured poll defaults. Status sets and timeout are kept.
    pub fn with_settings(mut self, poll: &PollConfig) -> Self {
        self.delay = Duration::from_millis(poll.delay_ms);
        self.min_timeout = Duration::from_millis(poll.min_timeout_ms);
        self.poll_interval = poll.poll_interval_ms.map(Duration::from_millis);
        self.backoff_multiplier = poll.backoff_multiplier;
        self.max_wait = Duration::from_millis(poll.max_wait_ms);
        self.jitter_factor = poll.jitter_factor;
        self.not_found = poll.not_found_policy();
        self.continuous_target_occurence = poll.continuous_target_occurence;
        self
    }

    /// Poll `refresh` until a target status, a terminal error or the deadline.
    ///
    /// Returns the value of the final observation, or `None` when the target
    /// set is empty and the resource is gone.
    pub async fn wait_for_state<T, F, Fut>(&self, refresh: F) -> Result<Option<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = RefreshResult<T>>,
    {
        self.wait_for_state_with_cancel(refresh, &CancellationToken::new())
            .await
    }

    /// Like [`Self::wait_for_state`], also stopping when `cancel` fires.
    ///
    /// Cancellation ends the wait the same way the deadline does, with a
    /// [`WaitError::Timeout`].
    pub async fn wait_for_state_with_cancel<T, F, Fut>(
        &self,
        mut refresh: F,
        cancel: &CancellationToken,
    ) -> Result<Option<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = RefreshResult<T>>,
    {
        let start = Instant::now();
        let abandon_at = start
            .checked_add(self.timeout)
            .and_then(|deadline| deadline.checked_add(REFRESH_GRACE_PERIOD));
        let mut poller = Poller::new(self);

        if wait_with_cancel(cancel, self.delay).await.is_err() {
            return Err(poller.abandon("cancelled before first refresh"));
        }

        loop {
            if cancel.is_cancelled() {
                return Err(poller.abandon("cancelled"));
            }

            let result = tokio::select! {
                biased;
                result = refresh() => result,
                _ = cancel.cancelled() => return Err(poller.abandon("cancelled during refresh")),
                _ = sleep_until(abandon_at) => return Err(poller.abandon("refresh outlived the grace period")),
            };

            match poller.observe(result, start.elapsed()) {
                Step::Done(value) => return Ok(value),
                Step::Fail(err) => return Err(err),
                Step::Sleep(wait) => {
                    if wait_with_cancel(cancel, wait).await.is_err() {
                        return Err(poller.abandon("cancelled"));
                    }
                }
            }
        }
    }

    /// Like [`Self::wait_for_state`], blocking the calling thread between probes.
    pub fn wait_for_state_blocking<T, F>(&self, mut refresh: F) -> Result<Option<T>>
    where
        F: FnMut() -> RefreshResult<T>,
    {
        let start = std::time::Instant::now();
        let mut poller = Poller::new(self);

        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }

        loop {
            match poller.observe(refresh(), start.elapsed()) {
                Step::Done(value) => return Ok(value),
                Step::Fail(err) => return Err(err),
                Step::Sleep(wait) => std::thread::sleep(wait),
            }
        }
    }
}

impl fmt::Debug for StateChangeConf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateChangeConf")
            .field("pending", &self.pending)
            .field("target", &self.target)
            .field("failure", &self.failure)
            .field("timeout", &self.timeout)
            .field("delay", &self.delay)
            .field("min_timeout", &self.min_timeout)
            .field("poll_interval", &self.poll_interval)
            .field("backoff_multiplier", &self.backoff_multiplier)
            .field("max_wait", &self.max_wait)
            .field("jitter_factor", &self.jitter_factor)
            .field("not_found", &self.not_found)
            .field(
                "continuous_target_occurence",
                &self.continuous_target_occurence,
            )
            .field("transient", &self.transient.is_some())
            .finish()
    }
}

/// What the driver does next.
#[derive(Debug)]
enum Step<T> {
    Done(Option<T>),
    Fail(WaitError),
    Sleep(Duration),
}

/// Poll loop state, independent of any clock or runtime.
struct Poller<'a> {
    conf: &'a StateChangeConf,
    backoff: ExponentialBackoff,
    wait: Duration,
    attempts: u32,
    not_found_ticks: u32,
    target_occurence: u32,
    last_state: Option<String>,
    /// Error of the most recent probe, cleared by a successful probe.
    last_error: Option<BoxError>,
}

impl<'a> Poller<'a> {
    fn new(conf: &'a StateChangeConf) -> Self {
        let backoff = ExponentialBuilder::default()
            .with_min_delay(FIRST_BACKOFF)
            .with_max_delay(conf.max_wait)
            .with_factor(conf.backoff_multiplier as f32)
            .without_max_times()
            .build();
        Self {
            conf,
            backoff,
            wait: INITIAL_WAIT,
            attempts: 0,
            not_found_ticks: 0,
            target_occurence: 0,
            last_state: None,
            last_error: None,
        }
    }

    fn observe<T>(&mut self, result: RefreshResult<T>, elapsed: Duration) -> Step<T> {
        self.attempts = self.attempts.saturating_add(1);
        let step = match result {
            Ok(Some((value, state))) => {
                self.last_error = None;
                self.observe_state(value, state, elapsed)
            }
            Ok(None) => {
                self.last_error = None;
                self.observe_missing(None, elapsed)
            }
            Err(err) => self.observe_error(err, elapsed),
        };

        match &step {
            Step::Done(_) => tracing::info!(
                attempts = self.attempts,
                elapsed_ms = elapsed.as_millis() as u64,
                "wait reached target state"
            ),
            Step::Fail(err) => tracing::info!(
                attempts = self.attempts,
                elapsed_ms = elapsed.as_millis() as u64,
                error = %err,
                "wait ended without reaching target state"
            ),
            Step::Sleep(wait) => tracing::debug!(
                attempt = self.attempts,
                wait_ms = wait.as_millis() as u64,
                "still pending"
            ),
        }
        step
    }

    fn observe_state<T>(&mut self, value: T, state: String, elapsed: Duration) -> Step<T> {
        self.not_found_ticks = 0;
        tracing::debug!(
            attempt = self.attempts,
            state = %state,
            elapsed_ms = elapsed.as_millis() as u64,
            "refreshed resource state"
        );

        if self.conf.target.contains(&state) {
            self.last_state = Some(state);
            self.target_occurence += 1;
            if self.target_occurence >= self.conf.continuous_target_occurence {
                return Step::Done(Some(value));
            }
            return self.next(elapsed, true);
        }
        self.target_occurence = 0;

        if self.conf.failure.contains(&state) {
            return Step::Fail(WaitError::Failed(UnexpectedStateError::new(
                state,
                self.conf.target.clone(),
            )));
        }

        // No declared pending set: anything short of the target is pending.
        if !self.conf.pending.is_empty() && !self.conf.pending.contains(&state) {
            return Step::Fail(WaitError::UnexpectedState(UnexpectedStateError::new(
                state,
                self.conf.target.clone(),
            )));
        }

        self.last_state = Some(state);
        self.next(elapsed, false)
    }

    fn observe_missing<T>(&mut self, err: Option<BoxError>, elapsed: Duration) -> Step<T> {
        if self.conf.target.is_empty() {
            self.target_occurence += 1;
            if self.target_occurence >= self.conf.continuous_target_occurence {
                return Step::Done(None);
            }
            return self.next(elapsed, true);
        }
        self.target_occurence = 0;
        self.not_found_ticks = self.not_found_ticks.saturating_add(1);

        let exhausted = match self.conf.not_found {
            NotFoundPolicy::Fail => true,
            NotFoundPolicy::Pending => false,
            NotFoundPolicy::Checks(checks) => self.not_found_ticks > checks,
        };
        if exhausted {
            let mut not_found = NotFoundError::new();
            if let NotFoundPolicy::Checks(_) = self.conf.not_found {
                not_found = not_found.with_message(format!(
                    "couldn't find resource ({} retries)",
                    self.not_found_ticks
                ));
            }
            if let Some(err) = err {
                not_found = not_found.with_last_error(err);
            }
            return Step::Fail(WaitError::NotFound(not_found));
        }

        tracing::debug!(
            attempt = self.attempts,
            misses = self.not_found_ticks,
            "resource not found, still pending"
        );
        if err.is_some() {
            self.last_error = err;
        }
        self.next(elapsed, false)
    }

    fn observe_error<T>(&mut self, err: BoxError, elapsed: Duration) -> Step<T> {
        // An explicit retry marker wins over any other reading of the error.
        let transient = match retry_marker(&*err) {
            Some(retryable) => retryable,
            None if classify::not_found(&*err) => return self.observe_missing(Some(err), elapsed),
            None => self
                .conf
                .transient
                .as_ref()
                .is_some_and(|predicate| predicate(&*err)),
        };

        if !transient {
            return Step::Fail(WaitError::Refresh(err));
        }

        tracing::warn!(
            attempt = self.attempts,
            error = %err,
            "transient refresh error, retrying"
        );
        self.last_error = Some(err);
        self.next(elapsed, false)
    }

    fn next<T>(&mut self, elapsed: Duration, holding_target: bool) -> Step<T> {
        if elapsed >= self.conf.timeout {
            return Step::Fail(self.timeout_error());
        }
        let remaining = self.conf.timeout - elapsed;
        let wait = self.next_wait(holding_target).min(remaining);
        Step::Sleep(apply_jitter(wait, self.conf.jitter_factor).min(remaining))
    }

    fn next_wait(&mut self, holding_target: bool) -> Duration {
        match self.conf.poll_interval {
            Some(interval) if !interval.is_zero() => interval,
            _ => {
                if !holding_target {
                    self.wait = self.backoff.next().unwrap_or(self.conf.max_wait);
                }
                if self.wait < self.conf.min_timeout {
                    self.conf.min_timeout
                } else {
                    self.wait.min(self.conf.max_wait)
                }
            }
        }
    }

    fn timeout_error(&mut self) -> WaitError {
        let err = WaitError::Timeout(
            TimeoutError::new(self.conf.timeout).with_last_state(self.last_state.take()),
        );
        if let Some(last) = self.last_error.take() {
            classify::set_last_error(&err, last);
        }
        err
    }

    /// Stop early, reporting the state observed so far as a timeout.
    fn abandon(&mut self, reason: &str) -> WaitError {
        let err = self.timeout_error();
        tracing::info!(attempts = self.attempts, reason, error = %err, "wait abandoned");
        err
    }
}

/// Sleep with cancellation support
async fn wait_with_cancel(cancel: &CancellationToken, duration: Duration) -> std::result::Result<(), ()> {
    if duration.is_zero() {
        return Ok(());
    }

    tokio::select! {
        _ = tokio::time::sleep(duration) => Ok(()),
        _ = cancel.cancelled() => Err(()),
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Randomise `duration` by ±`jitter_factor`.
fn apply_jitter(duration: Duration, jitter_factor: f64) -> Duration {
    let jitter_factor = clamp_jitter(jitter_factor);
    if jitter_factor == 0.0 {
        return duration;
    }
    let jitter = rand::rng().random_range(-jitter_factor..=jitter_factor);
    Duration::try_from_secs_f64(duration.as_secs_f64() * (1.0 + jitter)).unwrap_or(duration)
}

/// NaN counts as no jitter.
fn clamp_jitter(jitter_factor: f64) -> f64 {
    if jitter_factor.is_nan() {
        0.0
    } else {
        jitter_factor.clamp(0.0, 1.0)
    }
}
