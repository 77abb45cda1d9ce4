//! Poll loop scenarios on a paused tokio clock.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use awsprovider_retry::error::NotFoundError;
use awsprovider_retry::state::REFRESH_GRACE_PERIOD;
use awsprovider_retry::{BoxError, NotFoundPolicy, RefreshResult, StateChangeConf, WaitError};
use pretty_assertions::assert_eq;
use tokio::time::Instant;
use tokio_test::{assert_err, assert_ok};
use tokio_util::sync::CancellationToken;

fn observed<T>(value: T, state: &str) -> RefreshResult<T> {
    Ok(Some((value, state.to_string())))
}

/// Report the scripted status for this attempt, repeating the last one.
fn scripted(counter: &AtomicUsize, states: &[&str]) -> RefreshResult<usize> {
    let attempt = counter.fetch_add(1, Ordering::SeqCst);
    observed(attempt + 1, states[attempt.min(states.len() - 1)])
}

fn every_second(timeout: Duration) -> StateChangeConf {
    StateChangeConf::new(["Pending"], ["Target"], timeout)
        .with_failure(["Failed"])
        .with_poll_interval(Duration::from_secs(1))
}

#[tokio::test(start_paused = true)]
async fn reaches_target_on_third_probe() {
    let counter = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();

    let value = assert_ok!(
        every_second(Duration::from_secs(10))
            .wait_for_state(|| {
                let result = scripted(&counter, &["Pending", "Pending", "Target"]);
                async move { result }
            })
            .await
    );

    assert_eq!(value, Some(3));
    assert_eq!(counter.load(Ordering::SeqCst), 3);
    assert_eq!(start.elapsed(), Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn times_out_with_last_state() {
    let counter = Arc::new(AtomicUsize::new(0));

    let err = assert_err!(
        every_second(Duration::from_secs(5))
            .wait_for_state(|| {
                let result = scripted(&counter, &["Pending"]);
                async move { result }
            })
            .await
    );

    assert!(err.is_timed_out());
    match &err {
        WaitError::Timeout(timeout) => {
            assert_eq!(timeout.last_state.as_deref(), Some("Pending"));
            assert_eq!(timeout.timeout, Duration::from_secs(5));
        }
        other => panic!("expected timeout, got {other:?}"),
    }
    // Probes at 0s..=5s; the deadline is checked after the probe at 5s.
    assert_eq!(counter.load(Ordering::SeqCst), 6);
    assert_eq!(
        err.to_string(),
        "timeout while waiting for state to change (last state: 'Pending', timeout: 5s)"
    );
}

#[tokio::test(start_paused = true)]
async fn failure_state_ends_unbounded_wait() {
    let counter = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();

    let err = assert_err!(
        every_second(Duration::MAX)
            .wait_for_state(|| {
                let result = scripted(&counter, &["Pending", "Failed"]);
                async move { result }
            })
            .await
    );

    assert!(matches!(err, WaitError::Failed(ref e) if e.state == "Failed"));
    assert_eq!(counter.load(Ordering::SeqCst), 2);
    assert_eq!(start.elapsed(), Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn not_found_as_pending_keeps_polling() {
    let counter = Arc::new(AtomicUsize::new(0));

    let value = assert_ok!(
        every_second(Duration::from_secs(10))
            .with_not_found(NotFoundPolicy::Pending)
            .wait_for_state(|| {
                let attempt = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    match attempt {
                        0 => Err(Box::new(NotFoundError::new().with_message("no Pipe")) as BoxError),
                        1 => observed(attempt, "Pending"),
                        _ => observed(attempt, "Target"),
                    }
                }
            })
            .await
    );

    assert_eq!(value, Some(2));
    assert_eq!(counter.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn not_found_fails_without_policy() {
    let counter = Arc::new(AtomicUsize::new(0));

    let err = assert_err!(
        every_second(Duration::from_secs(10))
            .wait_for_state(|| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok::<Option<((), String)>, BoxError>(None) }
            })
            .await
    );

    assert!(err.is_not_found());
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn empty_target_waits_until_gone() {
    let counter = Arc::new(AtomicUsize::new(0));

    let value = assert_ok!(
        StateChangeConf::new(["deleting"], Vec::<&str>::new(), Duration::from_secs(60))
            .wait_for_state(|| {
                let attempt = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 2 {
                        observed(attempt, "deleting")
                    } else {
                        Ok(None)
                    }
                }
            })
            .await
    );

    assert_eq!(value, None);
    assert_eq!(counter.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn delay_precedes_first_probe() {
    let start = Instant::now();
    let first_probe = Arc::new(std::sync::Mutex::new(None));

    let result = every_second(Duration::from_secs(60))
        .with_delay(Duration::from_secs(5))
        .wait_for_state(|| {
            first_probe.lock().unwrap().get_or_insert(start.elapsed());
            async { observed((), "Target") }
        })
        .await;

    assert_ok!(result);
    assert_eq!(*first_probe.lock().unwrap(), Some(Duration::from_secs(5)));
}

#[tokio::test(start_paused = true)]
async fn zero_timeout_observes_one_yielding_refresh() {
    let counter = Arc::new(AtomicUsize::new(0));

    let value = assert_ok!(
        StateChangeConf::new(["Pending"], ["Target"], Duration::ZERO)
            .wait_for_state(|| {
                let result = scripted(&counter, &["Target"]);
                async move {
                    tokio::task::yield_now().await;
                    result
                }
            })
            .await
    );
    assert_eq!(value, Some(1));

    let err = assert_err!(
        StateChangeConf::new(["Pending"], ["Target"], Duration::ZERO)
            .wait_for_state(|| {
                let result = scripted(&counter, &["Pending"]);
                async move {
                    tokio::task::yield_now().await;
                    result
                }
            })
            .await
    );
    assert!(matches!(err, WaitError::Timeout(ref t) if t.last_state.as_deref() == Some("Pending")));
    assert_eq!(counter.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn refresh_in_flight_at_deadline_reaches_target() {
    let counter = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();

    // Refreshes run 0-2s, 2.2-4.2s and 4.6-6.6s; the last straddles the deadline.
    let value = assert_ok!(
        StateChangeConf::new(["Pending"], ["Target"], Duration::from_secs(5))
            .wait_for_state(|| {
                let result = scripted(&counter, &["Pending", "Pending", "Target"]);
                async move {
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    result
                }
            })
            .await
    );

    assert_eq!(value, Some(3));
    assert_eq!(counter.load(Ordering::SeqCst), 3);
    assert_eq!(start.elapsed(), Duration::from_millis(6600));
}

#[tokio::test(start_paused = true)]
async fn hung_refresh_is_abandoned_after_grace_period() {
    let counter = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();

    let err = assert_err!(
        every_second(Duration::from_secs(10))
            .wait_for_state(|| {
                counter.fetch_add(1, Ordering::SeqCst);
                async {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    observed((), "Target")
                }
            })
            .await
    );

    assert!(err.is_timed_out());
    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert_eq!(start.elapsed(), Duration::from_secs(10) + REFRESH_GRACE_PERIOD);
}

#[tokio::test(start_paused = true)]
async fn transient_errors_explain_the_timeout() {
    let err = assert_err!(
        every_second(Duration::from_secs(5))
            .with_transient(|err| err.to_string().starts_with("ThrottlingException"))
            .wait_for_state(|| async {
                Err::<Option<((), String)>, BoxError>("ThrottlingException: Rate exceeded".into())
            })
            .await
    );

    assert!(!err.is_timed_out());
    assert!(matches!(err, WaitError::Timeout(_)));
    assert_eq!(
        err.to_string(),
        "timeout while waiting for state to change (timeout: 5s): ThrottlingException: Rate exceeded"
    );
}

#[tokio::test(start_paused = true)]
async fn cancellation_ends_wait_as_timeout() {
    let counter = Arc::new(AtomicUsize::new(0));
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(2500)).await;
        trigger.cancel();
    });

    let err = assert_err!(
        every_second(Duration::from_secs(60))
            .wait_for_state_with_cancel(
                || {
                    let result = scripted(&counter, &["Pending"]);
                    async move { result }
                },
                &cancel,
            )
            .await
    );

    assert!(err.is_timed_out());
    assert!(matches!(err, WaitError::Timeout(ref t) if t.last_state.as_deref() == Some("Pending")));
    assert_eq!(counter.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn cancelled_token_skips_probing() {
    let counter = Arc::new(AtomicUsize::new(0));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = every_second(Duration::from_secs(60))
        .wait_for_state_with_cancel(
            || {
                let result = scripted(&counter, &["Target"]);
                async move { result }
            },
            &cancel,
        )
        .await;

    let err = assert_err!(result);
    assert!(err.is_timed_out());
    assert_eq!(counter.load(Ordering::SeqCst), 0);
}
