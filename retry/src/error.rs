//! Error taxonomy for poll and retry operations
//!
//! The structs here are the current error hierarchy. The legacy SDK-shaped
//! hierarchy lives in [`crate::sdk`]; classification in [`crate::classify`]
//! treats both the same way.

use std::error::Error as StdError;
use std::fmt;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

/// Boxed error produced by probes and carried as `last_error`.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Result type for wait and retry operations
pub type Result<T> = std::result::Result<T, WaitError>;

/// The most recent concrete failure behind a terminal error.
///
/// Starts unset and accepts exactly one write. Later writes are ignored, so
/// the first recorded cause is never replaced by a less specific one. The
/// cell is written through a shared reference, which lets classification
/// backfill it on an error found deep inside a wrapping chain.
#[derive(Default)]
pub struct LastError(OnceLock<BoxError>);

impl LastError {
    pub fn new() -> Self {
        Self::default()
    }

    /// A cell that is already set.
    pub fn with(err: impl Into<BoxError>) -> Self {
        Self(OnceLock::from(err.into()))
    }

    pub fn get(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.0.get().map(Box::as_ref)
    }

    pub fn is_set(&self) -> bool {
        self.0.get().is_some()
    }

    /// Store `err` unless a value is already present. Returns whether the
    /// write happened.
    pub fn set(&self, err: BoxError) -> bool {
        self.0.set(err).is_ok()
    }

    pub fn into_inner(self) -> Option<BoxError> {
        self.0.into_inner()
    }

    pub(crate) fn as_source(&self) -> Option<&(dyn StdError + 'static)> {
        self.get().map(|err| err as &(dyn StdError + 'static))
    }
}

impl fmt::Debug for LastError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("LastError").field(&self.get()).finish()
    }
}

impl From<BoxError> for LastError {
    fn from(err: BoxError) -> Self {
        Self(OnceLock::from(err))
    }
}

/// The polled resource does not exist, either not yet or not anymore.
#[derive(Debug, Default)]
pub struct NotFoundError {
    pub last_error: LastError,
    /// Description of the request that came back empty, if the caller kept one.
    pub last_request: Option<String>,
    pub message: String,
}

impl NotFoundError {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn with_last_request(mut self, request: impl Into<String>) -> Self {
        self.last_request = Some(request.into());
        self
    }

    pub fn with_last_error(mut self, err: impl Into<BoxError>) -> Self {
        self.last_error = LastError::with(err);
        self
    }
}

impl fmt::Display for NotFoundError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            f.write_str("couldn't find resource")?;
        } else {
            f.write_str(&self.message)?;
        }
        write_cause(f, &self.last_error)
    }
}

impl StdError for NotFoundError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.last_error.as_source()
    }
}

/// The poll loop ran out of time before reaching a terminal state.
///
/// A timeout whose `last_error` is set is an *explained* timeout: the cause
/// is known, and [`crate::classify::timed_out`] reports `false` for it.
#[derive(Debug, Default)]
pub struct TimeoutError {
    pub last_error: LastError,
    /// Status observed on the final successful probe.
    pub last_state: Option<String>,
    pub timeout: Duration,
}

impl TimeoutError {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Self::default()
        }
    }

    pub fn with_last_state(mut self, state: Option<String>) -> Self {
        self.last_state = state;
        self
    }

    pub fn with_last_error(mut self, err: impl Into<BoxError>) -> Self {
        self.last_error = LastError::with(err);
        self
    }
}

impl fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("timeout while waiting for state to change")?;
        write_timeout_details(f, self.last_state.as_deref(), self.timeout)?;
        if let Some(err) = self.last_error.get() {
            write!(f, ": {err}")?;
        }
        Ok(())
    }
}

impl StdError for TimeoutError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.last_error.as_source()
    }
}

/// The polled resource reported a status outside the expected set.
#[derive(Debug, Default)]
pub struct UnexpectedStateError {
    pub last_error: LastError,
    pub state: String,
    pub expected_state: Vec<String>,
}

impl UnexpectedStateError {
    pub fn new(state: impl Into<String>, expected_state: Vec<String>) -> Self {
        Self {
            last_error: LastError::new(),
            state: state.into(),
            expected_state,
        }
    }

    pub fn with_last_error(mut self, err: impl Into<BoxError>) -> Self {
        self.last_error = LastError::with(err);
        self
    }
}

impl fmt::Display for UnexpectedStateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_unexpected_state(f, &self.state, &self.expected_state, &self.last_error)
    }
}

impl StdError for UnexpectedStateError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.last_error.as_source()
    }
}

/// Terminal outcome of a wait that did not reach its target.
///
/// Every variant is transparent: the rendered message and the source chain
/// are those of the wrapped error, and classification looks straight through
/// this enum.
#[derive(Debug, Error)]
pub enum WaitError {
    #[error(transparent)]
    NotFound(#[from] NotFoundError),

    #[error(transparent)]
    Timeout(#[from] TimeoutError),

    /// Status matched neither the pending nor the target set.
    #[error(transparent)]
    UnexpectedState(#[from] UnexpectedStateError),

    /// Status matched the caller's declared failure set.
    #[error(transparent)]
    Failed(UnexpectedStateError),

    /// A probe error that is neither transient nor not-found, unchanged.
    #[error(transparent)]
    Refresh(BoxError),
}

impl WaitError {
    /// The wrapped error, as the layer classification should inspect.
    pub fn inner(&self) -> &(dyn StdError + 'static) {
        match self {
            WaitError::NotFound(err) => err,
            WaitError::Timeout(err) => err,
            WaitError::UnexpectedState(err) | WaitError::Failed(err) => err,
            WaitError::Refresh(err) => &**err,
        }
    }

    pub fn is_not_found(&self) -> bool {
        crate::classify::not_found(self)
    }

    pub fn is_timed_out(&self) -> bool {
        crate::classify::timed_out(self)
    }
}

pub(crate) fn write_cause(f: &mut fmt::Formatter<'_>, last_error: &LastError) -> fmt::Result {
    match last_error.get() {
        Some(err) => write!(f, ": {err}"),
        None => Ok(()),
    }
}

pub(crate) fn write_timeout_details(
    f: &mut fmt::Formatter<'_>,
    last_state: Option<&str>,
    timeout: Duration,
) -> fmt::Result {
    let mut details = Vec::new();
    if let Some(state) = last_state.filter(|state| !state.is_empty()) {
        details.push(format!("last state: '{state}'"));
    }
    if !timeout.is_zero() {
        details.push(format!("timeout: {timeout:?}"));
    }
    if details.is_empty() {
        Ok(())
    } else {
        write!(f, " ({})", details.join(", "))
    }
}

pub(crate) fn write_unexpected_state(
    f: &mut fmt::Formatter<'_>,
    state: &str,
    expected_state: &[String],
    last_error: &LastError,
) -> fmt::Result {
    write!(
        f,
        "unexpected state '{state}', wanted target '{}'",
        expected_state.join(", ")
    )?;
    if let Some(err) = last_error.get() {
        write!(f, ". last error: {err}")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn last_error_is_first_write_wins() {
        let cell = LastError::new();
        assert!(!cell.is_set());

        assert!(cell.set("first".into()));
        assert!(!cell.set("second".into()));

        assert_eq!(cell.get().map(ToString::to_string), Some("first".to_string()));
    }

    #[test]
    fn not_found_message_prefers_explicit_message() {
        let err = NotFoundError::new();
        assert_eq!(err.to_string(), "couldn't find resource");

        let err = NotFoundError::new().with_message("ECS Cluster (arn) not found");
        assert_eq!(err.to_string(), "ECS Cluster (arn) not found");

        let err = NotFoundError::new().with_last_error("empty result");
        assert_eq!(err.to_string(), "couldn't find resource: empty result");
    }

    #[test]
    fn timeout_message_lists_present_details_only() {
        assert_eq!(
            TimeoutError::default().to_string(),
            "timeout while waiting for state to change"
        );

        let err = TimeoutError::new(Duration::from_secs(5))
            .with_last_state(Some("PROVISIONING".to_string()))
            .with_last_error("throttled");
        assert_eq!(
            err.to_string(),
            "timeout while waiting for state to change (last state: 'PROVISIONING', timeout: 5s): throttled"
        );
    }

    #[test]
    fn unexpected_state_message_includes_last_error() {
        let err = UnexpectedStateError::new(
            "FAILED",
            vec!["ACTIVE".to_string(), "AVAILABLE".to_string()],
        );
        assert_eq!(
            err.to_string(),
            "unexpected state 'FAILED', wanted target 'ACTIVE, AVAILABLE'"
        );

        err.last_error.set("capacity unavailable".into());
        assert_eq!(
            err.to_string(),
            "unexpected state 'FAILED', wanted target 'ACTIVE, AVAILABLE'. last error: capacity unavailable"
        );
    }

    #[test]
    fn source_is_last_error() {
        let err = TimeoutError::default();
        assert!(err.source().is_none());

        err.last_error.set("cause".into());
        assert_eq!(err.source().map(ToString::to_string), Some("cause".to_string()));
    }

    #[test]
    fn wait_error_is_transparent() {
        let err = WaitError::from(NotFoundError::new().with_message("gone"));
        assert_eq!(err.to_string(), "gone");
        assert!(err.inner().downcast_ref::<NotFoundError>().is_some());

        let err = WaitError::Refresh("access denied".into());
        assert_eq!(err.to_string(), "access denied");
    }
}
