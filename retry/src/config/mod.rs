//! Poll defaults and per-operation timeouts
//!
//! Layered the usual way:
//! 1. Defaults (from code)
//! 2. Config file (awsprovider.toml)
//! 3. Environment variables (AWSPROVIDER_* prefix)
//!
//! # Example
//!
//! ```no_run
//! use awsprovider_retry::config::{ConfigLoader, Operation};
//! use awsprovider_retry::StateChangeConf;
//!
//! let settings = ConfigLoader::load_default().expect("Failed to load config");
//!
//! let conf = StateChangeConf::new(["CREATING"], ["ACTIVE"], settings.timeouts.for_operation(Operation::Create))
//!     .with_settings(&settings.poll);
//! ```

pub mod error;
pub mod loader;

pub use error::{ConfigError, Result};
pub use loader::{ConfigLoader, Operation, PollConfig, RetrySettings, TimeoutsConfig};
