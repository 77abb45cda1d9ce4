use crate::config::error::{ConfigError, Result};
use crate::state::NotFoundPolicy;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root retry configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Poll schedule defaults
    #[serde(default)]
    pub poll: PollConfig,

    /// Resource operation timeouts
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
}

/// Poll schedule defaults applied by `StateChangeConf::with_settings`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollConfig {
    /// Lower bound on the exponential wait
    #[serde(default)]
    pub min_timeout_ms: u64,

    /// Fixed wait between probes (replaces the exponential schedule)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_interval_ms: Option<u64>,

    /// Sleep before the first probe
    #[serde(default)]
    pub delay_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Upper bound on the exponential wait
    #[serde(default = "default_max_wait_ms")]
    pub max_wait_ms: u64,

    /// Random spread of each wait (0.0-1.0)
    #[serde(default)]
    pub jitter_factor: f64,

    /// Consecutive misses tolerated before not-found is terminal (0 = none)
    #[serde(default)]
    pub not_found_checks: u32,

    /// Keep polling through misses until the deadline
    #[serde(default)]
    pub not_found_as_pending: bool,

    /// Consecutive target observations required
    #[serde(default = "default_continuous_target_occurence")]
    pub continuous_target_occurence: u32,
}

/// Resource operation timeouts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    #[serde(default = "default_create_secs")]
    pub create_secs: u64,

    #[serde(default = "default_read_secs")]
    pub read_secs: u64,

    #[serde(default = "default_update_secs")]
    pub update_secs: u64,

    #[serde(default = "default_delete_secs")]
    pub delete_secs: u64,
}

/// Resource operation a timeout applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Read,
    Update,
    Delete,
}

// Default value functions
fn default_backoff_multiplier() -> f64 {
    2.0
}
fn default_max_wait_ms() -> u64 {
    10_000
}
fn default_continuous_target_occurence() -> u32 {
    1
}
fn default_create_secs() -> u64 {
    30 * 60
}
fn default_read_secs() -> u64 {
    20 * 60
}
fn default_update_secs() -> u64 {
    30 * 60
}
fn default_delete_secs() -> u64 {
    20 * 60
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            min_timeout_ms: 0,
            poll_interval_ms: None,
            delay_ms: 0,
            backoff_multiplier: default_backoff_multiplier(),
            max_wait_ms: default_max_wait_ms(),
            jitter_factor: 0.0,
            not_found_checks: 0,
            not_found_as_pending: false,
            continuous_target_occurence: default_continuous_target_occurence(),
        }
    }
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            create_secs: default_create_secs(),
            read_secs: default_read_secs(),
            update_secs: default_update_secs(),
            delete_secs: default_delete_secs(),
        }
    }
}

impl PollConfig {
    pub fn not_found_policy(&self) -> NotFoundPolicy {
        if self.not_found_as_pending {
            NotFoundPolicy::Pending
        } else if self.not_found_checks > 0 {
            NotFoundPolicy::Checks(self.not_found_checks)
        } else {
            NotFoundPolicy::Fail
        }
    }
}

impl TimeoutsConfig {
    pub fn for_operation(&self, operation: Operation) -> Duration {
        let secs = match operation {
            Operation::Create => self.create_secs,
            Operation::Read => self.read_secs,
            Operation::Update => self.update_secs,
            Operation::Delete => self.delete_secs,
        };
        Duration::from_secs(secs)
    }
}

impl RetrySettings {
    /// Check value ranges, reporting every problem at once.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        if self.poll.backoff_multiplier.is_nan() || self.poll.backoff_multiplier < 1.0 {
            problems.push(format!(
                "poll.backoff_multiplier must be at least 1.0, got {}",
                self.poll.backoff_multiplier
            ));
        }
        if !(0.0..=1.0).contains(&self.poll.jitter_factor) {
            problems.push(format!(
                "poll.jitter_factor must be between 0.0 and 1.0, got {}",
                self.poll.jitter_factor
            ));
        }
        if self.poll.max_wait_ms == 0 {
            problems.push("poll.max_wait_ms must be positive".to_string());
        }
        if self.poll.continuous_target_occurence == 0 {
            problems.push("poll.continuous_target_occurence must be at least 1".to_string());
        }
        for (name, secs) in [
            ("create_secs", self.timeouts.create_secs),
            ("read_secs", self.timeouts.read_secs),
            ("update_secs", self.timeouts.update_secs),
            ("delete_secs", self.timeouts.delete_secs),
        ] {
            if secs == 0 {
                problems.push(format!("timeouts.{name} must be positive"));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid { problems })
        }
    }
}

/// Configuration loader with layered merging support
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Set the configuration file path
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Load configuration with layered merging:
    /// 1. Start with defaults (from Default implementations)
    /// 2. Merge config file if provided
    /// 3. Override with environment variables (AWSPROVIDER_ prefix)
    pub fn load(&self) -> Result<RetrySettings> {
        let mut builder = Config::builder();

        let defaults_json = serde_json::to_string(&RetrySettings::default())?;
        builder = builder.add_source(File::from_str(
            &defaults_json,
            config::FileFormat::Json,
        ));

        if let Some(ref path) = self.config_path {
            if path.exists() {
                builder = builder.add_source(File::from(path.as_ref()));
            } else {
                return Err(ConfigError::FileNotFound(path.clone()));
            }
        }

        // Example: AWSPROVIDER_POLL__MIN_TIMEOUT_MS=500
        builder = builder.add_source(
            Environment::with_prefix("AWSPROVIDER")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let settings: RetrySettings = builder.build()?.try_deserialize()?;
        settings.validate()?;

        tracing::debug!(
            file = ?self.config_path,
            min_timeout_ms = settings.poll.min_timeout_ms,
            poll_interval_ms = ?settings.poll.poll_interval_ms,
            "loaded retry settings"
        );
        Ok(settings)
    }

    /// Locate the default config file in standard locations:
    /// 1. Current directory: ./awsprovider.toml
    /// 2. XDG config: ~/.config/awsprovider/config.toml
    /// 3. Home directory: ~/.awsprovider.toml
    pub fn find_config_file() -> Option<PathBuf> {
        let cwd_config = PathBuf::from("./awsprovider.toml");
        if cwd_config.exists() {
            return Some(cwd_config);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let xdg_config = config_dir.join("awsprovider").join("config.toml");
            if xdg_config.exists() {
                return Some(xdg_config);
            }
        }

        dirs::home_dir()
            .map(|home| home.join(".awsprovider.toml"))
            .filter(|path| path.exists())
    }

    /// Load configuration from default locations
    pub fn load_default() -> Result<RetrySettings> {
        match Self::find_config_file() {
            Some(config_path) => ConfigLoader::new().with_file(config_path).load(),
            None => ConfigLoader::new().load(),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
