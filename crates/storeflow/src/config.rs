//! Suite configuration.
//!
//! Loaded from YAML, then optionally overridden by `STOREFLOW_*` environment
//! variables. Every field has a default so an empty document is valid.

use crate::download::DownloadSettings;
use crate::error::ConfigError;
use crate::logging::{self, LogFormat, Verbosity};
use crate::wait::WaitOptions;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Environment variable overriding [`SuiteConfig::base_url`]
pub const ENV_BASE_URL: &str = "STOREFLOW_BASE_URL";
/// Environment variable overriding [`SuiteConfig::browser`]
pub const ENV_BROWSER: &str = "STOREFLOW_BROWSER";
/// Environment variable overriding [`SuiteConfig::report_root`]
pub const ENV_REPORT_ROOT: &str = "STOREFLOW_REPORT_ROOT";

/// Configuration for a storefront regression suite
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SuiteConfig {
    /// Store under test
    pub base_url: String,
    /// Browser identity passed to the session provider
    pub browser: String,
    /// Default wait for targets and post-conditions
    pub wait: WaitOptions,
    /// Shorter wait for cart updates, in milliseconds
    pub short_wait_ms: u64,
    /// Download check settings
    pub download: DownloadSettings,
    /// Directory receiving one sub-directory per run
    pub report_root: PathBuf,
    /// Settle delay after animated actions, in milliseconds
    pub settle_ms: u64,
    /// Login user
    pub username: String,
    /// Login password
    pub password: String,
    /// Log verbosity
    pub verbosity: Verbosity,
    /// Log format
    pub log_format: LogFormat,
}

impl Default for SuiteConfig {
    fn default() -> Self {
        Self {
            base_url: "https://bstackdemo.com/".to_string(),
            browser: "chrome".to_string(),
            wait: WaitOptions::default(),
            short_wait_ms: 5_000,
            download: DownloadSettings::default(),
            report_root: PathBuf::from("target/reports"),
            settle_ms: 400,
            username: "demouser".to_string(),
            password: "testingisfun99".to_string(),
            verbosity: Verbosity::Normal,
            log_format: LogFormat::Pretty,
        }
    }
}

impl SuiteConfig {
    /// Create new default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the store URL
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set the browser identity
    #[must_use]
    pub fn with_browser(mut self, browser: impl Into<String>) -> Self {
        self.browser = browser.into();
        self
    }

    /// Set the default wait
    #[must_use]
    pub const fn with_wait(mut self, wait: WaitOptions) -> Self {
        self.wait = wait;
        self
    }

    /// Set the download settings
    #[must_use]
    pub fn with_download(mut self, download: DownloadSettings) -> Self {
        self.download = download;
        self
    }

    /// Set the report root
    #[must_use]
    pub fn with_report_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.report_root = root.into();
        self
    }

    /// Set login credentials
    #[must_use]
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    /// Set the settle delay
    #[must_use]
    pub const fn with_settle_ms(mut self, settle_ms: u64) -> Self {
        self.settle_ms = settle_ms;
        self
    }

    /// Wait options for cart updates
    #[must_use]
    pub const fn short_wait(&self) -> WaitOptions {
        WaitOptions {
            timeout_ms: self.short_wait_ms,
            poll_interval_ms: self.wait.poll_interval_ms,
        }
    }

    /// Settle delay as Duration
    #[must_use]
    pub const fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    /// `path` resolved against the base URL (`"/checkout"` -> `https://host/checkout`)
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Install the tracing subscriber with this config's verbosity and format
    pub fn init_logging(&self) -> bool {
        logging::init(self.verbosity, self.log_format)
    }

    /// Parse YAML and validate
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml_ng::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to YAML
    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml_ng::to_string(self)?)
    }

    /// Load from a YAML file and validate
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        debug!(path = %path.display(), "loading suite config");
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&yaml)
    }

    /// Apply `STOREFLOW_*` environment overrides
    #[must_use]
    pub fn apply_env(self) -> Self {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(url) = lookup(ENV_BASE_URL).filter(|v| !v.is_empty()) {
            self.base_url = url;
        }
        if let Some(browser) = lookup(ENV_BROWSER).filter(|v| !v.is_empty()) {
            self.browser = browser;
        }
        if let Some(root) = lookup(ENV_REPORT_ROOT).filter(|v| !v.is_empty()) {
            self.report_root = PathBuf::from(root);
        }
        self
    }

    /// Check invariants
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_url.trim().is_empty() {
            return Err(ConfigError::invalid("base_url must not be empty"));
        }
        if !self.wait.is_valid() {
            return Err(ConfigError::invalid(format!(
                "wait timeout ({}ms) must exceed poll interval ({}ms)",
                self.wait.timeout_ms, self.wait.poll_interval_ms
            )));
        }
        if !self.short_wait().is_valid() {
            return Err(ConfigError::invalid(format!(
                "short_wait_ms ({}ms) must exceed poll interval ({}ms)",
                self.short_wait_ms, self.wait.poll_interval_ms
            )));
        }
        if !self.download.wait_options().is_valid() {
            return Err(ConfigError::invalid(
                "download timeout must exceed its poll interval",
            ));
        }
        if self.download.suffix.is_empty() {
            return Err(ConfigError::invalid("download suffix must not be empty"));
        }
        Ok(())
    }
}
