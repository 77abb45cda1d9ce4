//! Retry helpers for operations that fail transiently
//!
//! These wrap a fallible operation in the poll state machine: the operation
//! is the probe, and its errors decide whether another attempt is made.

use std::error::Error as StdError;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;

use crate::classify;
use crate::error::{BoxError, NotFoundError, Result, TimeoutError, WaitError};
use crate::sdk::{self, RetryError};
use crate::state::{NotFoundPolicy, StateChangeConf};

/// Pending status reported while an operation keeps failing retryably.
pub const RETRYABLE_STATE: &str = "retryableerror";
/// Target status reported once an operation succeeds.
pub const SUCCESS_STATE: &str = "success";
/// Lower bound on the wait between attempts.
pub const RETRY_MIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Returned by the operation of [`retry_until_not_found`] while the resource
/// still exists.
#[derive(Debug, Error)]
#[error("found resource")]
pub struct FoundResourceError;

/// Call `f` until it succeeds, fails non-retryably, or `timeout` elapses.
///
/// `f` marks each failure with [`sdk::retryable_error`] or
/// [`sdk::non_retryable_error`]. The marker is removed from the returned
/// error. When time runs out after at least one retryable failure, the most
/// recent failure is returned instead of the timeout.
pub async fn retry<T, F, Fut>(timeout: Duration, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, RetryError>>,
{
    let conf = StateChangeConf::new([RETRYABLE_STATE], [SUCCESS_STATE], timeout)
        .with_min_timeout(RETRY_MIN_TIMEOUT)
        .with_not_found(NotFoundPolicy::Pending);

    let result = conf
        .wait_for_state(|| {
            let attempt = f();
            async move {
                match attempt.await {
                    Ok(value) => Ok(Some((value, SUCCESS_STATE.to_string()))),
                    Err(err) => Err(Box::new(err) as BoxError),
                }
            }
        })
        .await;

    match result {
        Ok(Some(value)) => Ok(value),
        Ok(None) => Err(NotFoundError::new().into()),
        Err(WaitError::Refresh(err)) => Err(WaitError::Refresh(unmark(err))),
        Err(WaitError::Timeout(TimeoutError {
            last_error,
            last_state,
            timeout,
        })) => match last_error.into_inner() {
            Some(err) => Err(WaitError::Refresh(unmark(err))),
            None => Err(TimeoutError::new(timeout).with_last_state(last_state).into()),
        },
        Err(err) => Err(err),
    }
}

/// Call `f` until it succeeds or fails with an error `retryable` rejects.
///
/// After a bare timeout one final attempt is made, so an operation that
/// was merely slow still gets a chance to report its real outcome.
pub async fn retry_when<T, F, Fut, P>(timeout: Duration, mut f: F, retryable: P) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, BoxError>>,
    P: Fn(&(dyn StdError + 'static)) -> bool,
{
    let retryable = &retryable;
    let result = retry(timeout, || {
        let attempt = f();
        async move {
            match attempt.await {
                Ok(value) => Ok(value),
                Err(err) if retryable(&*err) => Err(sdk::retryable_error(err)),
                Err(err) => Err(sdk::non_retryable_error(err)),
            }
        }
    })
    .await;

    match result {
        Err(err) if classify::timed_out(&err) => {
            tracing::debug!(error = %err, "timed out, making one final attempt");
            f().await.map_err(WaitError::Refresh)
        }
        other => other,
    }
}

/// Retry while `f` reports the resource as not found.
pub async fn retry_when_not_found<T, F, Fut>(timeout: Duration, f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, BoxError>>,
{
    retry_when(timeout, f, classify::not_found).await
}

/// Retry on not-found only while the resource is new, to ride out
/// eventual consistency right after creation.
pub async fn retry_when_new_resource_not_found<T, F, Fut>(
    timeout: Duration,
    f: F,
    is_new_resource: bool,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, BoxError>>,
{
    retry_when(timeout, f, move |err| is_new_resource && classify::not_found(err)).await
}

/// Retry until `f` reports the resource as not found.
///
/// Success of `f` means the resource still exists and counts as a
/// retryable [`FoundResourceError`]. Any other error stops immediately.
pub async fn retry_until_not_found<T, F, Fut>(timeout: Duration, mut f: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, BoxError>>,
{
    retry_when(
        timeout,
        || {
            let attempt = f();
            async move {
                match attempt.await {
                    Ok(_) => Err(Box::new(FoundResourceError) as BoxError),
                    Err(err) if classify::not_found(&*err) => Ok(()),
                    Err(err) => Err(err),
                }
            }
        },
        |err| err.is::<FoundResourceError>(),
    )
    .await
}

fn unmark(err: BoxError) -> BoxError {
    match err.downcast::<RetryError>() {
        Ok(marked) => marked.into_inner(),
        Err(err) => err,
    }
}
