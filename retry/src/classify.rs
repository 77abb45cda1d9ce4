//! Structural error classification
//!
//! Every question here is answered by walking the error chain and matching
//! layers by type against both error hierarchies. Message text is never
//! inspected.
//!
//! A [`WaitError`] layer is looked through: it stands for the error it wraps.

use std::error::Error as StdError;
use std::iter;

use crate::error::{self, BoxError, LastError, WaitError};
use crate::sdk;

/// Kind of a recognized poll error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Timeout,
    UnexpectedState,
}

/// A chain layer matched against one of the concrete shapes.
struct Recognized<'a> {
    kind: ErrorKind,
    last_error: &'a LastError,
}

fn recognize<'a>(err: &'a (dyn StdError + 'static)) -> Option<Recognized<'a>> {
    let (kind, last_error) = if let Some(e) = err.downcast_ref::<error::NotFoundError>() {
        (ErrorKind::NotFound, &e.last_error)
    } else if let Some(e) = err.downcast_ref::<sdk::NotFoundError>() {
        (ErrorKind::NotFound, &e.last_error)
    } else if let Some(e) = err.downcast_ref::<error::TimeoutError>() {
        (ErrorKind::Timeout, &e.last_error)
    } else if let Some(e) = err.downcast_ref::<sdk::TimeoutError>() {
        (ErrorKind::Timeout, &e.last_error)
    } else if let Some(e) = err.downcast_ref::<error::UnexpectedStateError>() {
        (ErrorKind::UnexpectedState, &e.last_error)
    } else if let Some(e) = err.downcast_ref::<sdk::UnexpectedStateError>() {
        (ErrorKind::UnexpectedState, &e.last_error)
    } else {
        return None;
    };
    Some(Recognized { kind, last_error })
}

fn look_through<'a>(mut err: &'a (dyn StdError + 'static)) -> &'a (dyn StdError + 'static) {
    while let Some(wait) = err.downcast_ref::<WaitError>() {
        err = wait.inner();
    }
    err
}

/// Every layer of the chain, outermost first.
fn layers<'a>(
    err: &'a (dyn StdError + 'static),
) -> impl Iterator<Item = &'a (dyn StdError + 'static)> {
    iter::successors(
        Some(look_through(err)),
        |&layer: &&'a (dyn StdError + 'static)| layer.source().map(look_through),
    )
}

fn first_of_kind<'a>(
    err: &'a (dyn StdError + 'static),
    kind: ErrorKind,
) -> Option<Recognized<'a>> {
    layers(err).find_map(|layer| recognize(layer).filter(|found| found.kind == kind))
}

/// Kind of the outermost recognized layer, if any.
pub fn classify(err: &(dyn StdError + 'static)) -> Option<ErrorKind> {
    layers(err).find_map(|layer| recognize(layer).map(|found| found.kind))
}

/// Whether any layer is a not-found error of either hierarchy.
pub fn not_found(err: &(dyn StdError + 'static)) -> bool {
    first_of_kind(err, ErrorKind::NotFound).is_some()
}

/// Whether the first timeout layer is a bare timeout.
///
/// A timeout that already carries a `last_error` has a known cause and is
/// reported as `false`; callers should act on that cause instead.
pub fn timed_out(err: &(dyn StdError + 'static)) -> bool {
    first_of_kind(err, ErrorKind::Timeout).is_some_and(|found| !found.last_error.is_set())
}

/// Attach `last` to the first timeout layer, or failing that the first
/// unexpected-state layer, whose `last_error` is still unset.
///
/// Returns whether a write happened. Not-found and unrecognized errors are
/// left alone, and an already-set `last_error` is never replaced.
pub fn set_last_error(err: &(dyn StdError + 'static), last: impl Into<BoxError>) -> bool {
    let last = last.into();
    let target = first_of_kind(err, ErrorKind::Timeout)
        .filter(|found| !found.last_error.is_set())
        .or_else(|| {
            first_of_kind(err, ErrorKind::UnexpectedState)
                .filter(|found| !found.last_error.is_set())
        });
    match target {
        Some(found) => found.last_error.set(last),
        None => false,
    }
}

/// Retry marker of the outermost [`sdk::RetryError`] layer, if there is one.
pub(crate) fn retry_marker(err: &(dyn StdError + 'static)) -> Option<bool> {
    layers(err).find_map(|layer| {
        layer
            .downcast_ref::<sdk::RetryError>()
            .map(|marked| marked.retryable)
    })
}

/// Whether the error was explicitly marked retryable.
pub fn is_retryable(err: &(dyn StdError + 'static)) -> bool {
    retry_marker(err) == Some(true)
}

/// Classification as methods, for error values of any shape.
///
/// The `Option` and `Result` impls cover the "no error" case: `None` and
/// `Ok` are never not-found or timed out, and cannot take a `last_error`.
pub trait RetryClassifiable {
    /// Root of the chain to classify, or `None` when there is no error.
    fn chain_root(&self) -> Option<&(dyn StdError + 'static)>;

    fn error_kind(&self) -> Option<ErrorKind> {
        self.chain_root().and_then(classify)
    }

    fn is_not_found(&self) -> bool {
        self.chain_root().is_some_and(not_found)
    }

    fn is_timed_out(&self) -> bool {
        self.chain_root().is_some_and(timed_out)
    }

    fn is_retryable(&self) -> bool {
        self.chain_root().is_some_and(is_retryable)
    }

    fn set_last_error(&self, last: BoxError) -> bool {
        self.chain_root()
            .is_some_and(|root| set_last_error(root, last))
    }
}

impl RetryClassifiable for dyn StdError + 'static {
    fn chain_root(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self)
    }
}

impl RetryClassifiable for dyn StdError + Send + Sync + 'static {
    fn chain_root(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self)
    }
}

impl RetryClassifiable for anyhow::Error {
    fn chain_root(&self) -> Option<&(dyn StdError + 'static)> {
        let root: &(dyn StdError + Send + Sync + 'static) = self.as_ref();
        Some(root)
    }
}

impl<T: RetryClassifiable + ?Sized> RetryClassifiable for Option<&T> {
    fn chain_root(&self) -> Option<&(dyn StdError + 'static)> {
        self.and_then(RetryClassifiable::chain_root)
    }
}

impl<T, E: RetryClassifiable> RetryClassifiable for std::result::Result<T, E> {
    fn chain_root(&self) -> Option<&(dyn StdError + 'static)> {
        self.as_ref().err().and_then(RetryClassifiable::chain_root)
    }
}

macro_rules! impl_classifiable {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl RetryClassifiable for $ty {
                fn chain_root(&self) -> Option<&(dyn StdError + 'static)> {
                    Some(self)
                }
            }
        )+
    };
}

impl_classifiable!(
    WaitError,
    error::NotFoundError,
    error::TimeoutError,
    error::UnexpectedStateError,
    sdk::NotFoundError,
    sdk::TimeoutError,
    sdk::UnexpectedStateError,
    sdk::RetryError,
);
