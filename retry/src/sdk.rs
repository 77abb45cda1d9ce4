//! Legacy SDK error hierarchy
//!
//! Older resource code builds these shapes, which carry a few more fields
//! than the current hierarchy in [`crate::error`]. They are recognized by
//! every classification function exactly like their current counterparts.
//!
//! [`RetryError`] marks an operation failure as retryable or not for
//! [`crate::retry::retry`].

use std::error::Error as StdError;
use std::fmt;
use std::time::Duration;

use crate::error::{
    BoxError, LastError, write_cause, write_timeout_details, write_unexpected_state,
};

/// Resource not found, with the retry counter the SDK poller kept.
#[derive(Debug, Default)]
pub struct NotFoundError {
    pub last_error: LastError,
    pub last_request: Option<String>,
    pub last_response: Option<String>,
    pub message: String,
    pub retries: u32,
}

impl fmt::Display for NotFoundError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.message.is_empty() {
            f.write_str(&self.message)?;
        } else if self.retries > 0 {
            write!(f, "couldn't find resource ({} retries)", self.retries)?;
        } else {
            f.write_str("couldn't find resource")?;
        }
        write_cause(f, &self.last_error)
    }
}

impl StdError for NotFoundError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.last_error.as_source()
    }
}

/// Timeout that also records the states the poller was waiting for.
#[derive(Debug, Default)]
pub struct TimeoutError {
    pub last_error: LastError,
    /// Empty when nothing was observed.
    pub last_state: String,
    pub timeout: Duration,
    pub expected_state: Vec<String>,
}

impl fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.expected_state.is_empty() {
            f.write_str("timeout while waiting for resource to be gone")?;
        } else {
            write!(
                f,
                "timeout while waiting for state to become '{}'",
                self.expected_state.join(", ")
            )?;
        }
        write_timeout_details(f, Some(self.last_state.as_str()), self.timeout)?;
        write_cause(f, &self.last_error)
    }
}

impl StdError for TimeoutError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.last_error.as_source()
    }
}

#[derive(Debug, Default)]
pub struct UnexpectedStateError {
    pub last_error: LastError,
    pub state: String,
    pub expected_state: Vec<String>,
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

/// Operation failure tagged with whether another attempt may succeed.
#[derive(Debug)]
pub struct RetryError {
    pub err: BoxError,
    pub retryable: bool,
}

impl RetryError {
    pub fn into_inner(self) -> BoxError {
        self.err
    }
}

impl fmt::Display for RetryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.err, f)
    }
}

impl StdError for RetryError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(&*self.err)
    }
}

/// Wrap `err` so the retry helpers try again.
pub fn retryable_error(err: impl Into<BoxError>) -> RetryError {
    RetryError {
        err: err.into(),
        retryable: true,
    }
}

/// Wrap `err` so the retry helpers stop immediately and return it.
pub fn non_retryable_error(err: impl Into<BoxError>) -> RetryError {
    RetryError {
        err: err.into(),
        retryable: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn not_found_renders_retry_count() {
        let err = NotFoundError {
            retries: 21,
            ..Default::default()
        };
        assert_eq!(err.to_string(), "couldn't find resource (21 retries)");

        let err = NotFoundError {
            message: "no Location Tracker".to_string(),
            retries: 3,
            ..Default::default()
        };
        assert_eq!(err.to_string(), "no Location Tracker");
    }

    #[test]
    fn timeout_names_expected_state() {
        let err = TimeoutError {
            last_state: "CREATING".to_string(),
            timeout: Duration::from_secs(1200),
            expected_state: vec!["ACTIVE".to_string()],
            ..Default::default()
        };
        assert_eq!(
            err.to_string(),
            "timeout while waiting for state to become 'ACTIVE' (last state: 'CREATING', timeout: 1200s)"
        );
    }

    #[test]
    fn timeout_without_expected_state_waits_for_deletion() {
        let err = TimeoutError {
            last_error: LastError::with("DependencyViolation"),
            ..Default::default()
        };
        assert_eq!(
            err.to_string(),
            "timeout while waiting for resource to be gone: DependencyViolation"
        );
    }

    #[test]
    fn retry_error_displays_and_sources_inner() {
        let err = retryable_error("throttled");
        assert!(err.retryable);
        assert_eq!(err.to_string(), "throttled");
        assert_eq!(
            err.source().map(ToString::to_string),
            Some("throttled".to_string())
        );

        let err = non_retryable_error("validation");
        assert!(!err.retryable);
        assert_eq!(err.into_inner().to_string(), "validation");
    }
}
