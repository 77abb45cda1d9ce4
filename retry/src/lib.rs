//! Retry and error-classification core for AWS resource bindings
//!
//! Resource code polls AWS until an asynchronous operation settles. This
//! crate provides the pieces that loop is built from:
//!
//! - **Error taxonomy**: not-found, timeout and unexpected-state errors, in
//!   the current ([`error`]) and legacy SDK ([`sdk`]) shapes
//! - **Classification**: [`classify`] answers "is this not found / timed
//!   out" through any wrapping, for both shapes alike
//! - **Poll state machine**: [`StateChangeConf`] waits for a target status
//! - **Retry helpers**: [`retry`] runs an operation until it stops failing
//! - **Configuration**: layered poll defaults and operation timeouts
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use awsprovider_retry::{StateChangeConf, WaitError};
//!
//! # async fn describe_cluster() -> Result<Option<String>, awsprovider_retry::BoxError> { Ok(None) }
//! # async fn example() -> Result<(), WaitError> {
//! let conf = StateChangeConf::new(["PROVISIONING"], ["ACTIVE"], Duration::from_secs(1200))
//!     .with_failure(["FAILED"]);
//!
//! let cluster = conf
//!     .wait_for_state(|| async {
//!         let status = describe_cluster().await;
//!         status.map(|status| status.map(|status| (status.clone(), status)))
//!     })
//!     .await?;
//! # let _ = cluster;
//! # Ok(())
//! # }
//! ```

#![deny(clippy::print_stdout, clippy::print_stderr)]

pub mod classify;
pub mod config;
pub mod error;
pub mod retry;
pub mod sdk;
pub mod state;

pub use classify::{ErrorKind, RetryClassifiable, not_found, set_last_error, timed_out};
pub use error::{
    BoxError, LastError, NotFoundError, Result, TimeoutError, UnexpectedStateError, WaitError,
};
pub use retry::{
    FoundResourceError, retry, retry_until_not_found, retry_when, retry_when_new_resource_not_found,
    retry_when_not_found,
};
pub use state::{NotFoundPolicy, RefreshResult, StateChangeConf};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
