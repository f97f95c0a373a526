// ABOUTME: Configuration module for the big-export pipeline
// ABOUTME: Provides retry, browser and service settings with environment variable overrides

use crate::errors::{ErrorType, ExportError};
use serde::Serialize;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Retry and backoff policy for export attempts
#[derive(Debug, Clone, Serialize)]
pub struct RetryConfig {
    /// Additional attempts after the first one
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    pub retryable_errors: Vec<ErrorType>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
            retryable_errors: vec![
                ErrorType::Timeout,
                ErrorType::Browser,
                ErrorType::Memory,
                ErrorType::Network,
            ],
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt` (1-based), capped at `max_delay`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = self.backoff_factor.max(1.0).powi(attempt as i32 - 1);
        let millis = self.initial_delay.as_millis() as f64 * factor;
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    /// Whether a classified error may be attempted again
    pub fn should_retry(&self, error: &ExportError) -> bool {
        error.retryable && self.retryable_errors.contains(&error.kind)
    }
}

/// Settings for driving the headless browser
#[derive(Debug, Clone)]
pub struct BrowserConfig {
    pub browser_path: Option<PathBuf>,
    pub temp_dir: PathBuf,
    pub timeout: Duration,
    /// How long to wait after an interrupt before killing
    pub kill_grace: Duration,
    /// Virtual time budget handed to the browser for page scripts
    pub virtual_time_budget_ms: u64,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            browser_path: None,
            temp_dir: env::temp_dir(),
            timeout: Duration::from_millis(30000), // 30 seconds
            kill_grace: Duration::from_millis(2000),
            virtual_time_budget_ms: 10000,
        }
    }
}

/// Global configuration for the export service
#[derive(Debug, Clone)]
pub struct Config {
    pub browser_path: Option<PathBuf>,
    pub temp_dir: PathBuf,
    pub default_timeout_ms: u64,
    pub kill_grace_ms: u64,
    pub font_path: Option<PathBuf>,
    pub retry: RetryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            browser_path: env::var("BROWSER_PATH").ok().map(PathBuf::from),
            temp_dir: env::temp_dir(),
            default_timeout_ms: 30000, // 30 seconds
            kill_grace_ms: 2000,
            font_path: None,
            retry: RetryConfig::default(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.trim().parse::<T>().ok())
}

impl Config {
    /// Create a new configuration instance
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = RetryConfig::default();
        let retry = RetryConfig {
            max_retries: env_parse("EXPORT_MAX_RETRIES").unwrap_or(defaults.max_retries),
            initial_delay: env_parse("EXPORT_INITIAL_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.initial_delay),
            max_delay: env_parse("EXPORT_MAX_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_delay),
            backoff_factor: env_parse("EXPORT_BACKOFF_FACTOR").unwrap_or(defaults.backoff_factor),
            retryable_errors: defaults.retryable_errors,
        };

        Self {
            browser_path: env::var("BROWSER_PATH")
                .ok()
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),
            temp_dir: env::var("EXPORT_TEMP_DIR")
                .ok()
                .filter(|s| !s.is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(env::temp_dir),
            default_timeout_ms: env_parse("DEFAULT_TIMEOUT_MS").unwrap_or(30000),
            kill_grace_ms: env_parse("EXPORT_KILL_GRACE_MS").unwrap_or(2000),
            font_path: env::var("EXPORT_FONT_PATH")
                .ok()
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),
            retry,
        }
    }

    /// Get a browser configuration with defaults from this config
    pub fn get_browser_config(&self) -> BrowserConfig {
        BrowserConfig {
            browser_path: self.browser_path.clone(),
            temp_dir: self.temp_dir.clone(),
            timeout: Duration::from_millis(self.default_timeout_ms),
            kill_grace: Duration::from_millis(self.kill_grace_ms),
            ..BrowserConfig::default()
        }
    }

    pub fn get_retry_config(&self) -> RetryConfig {
        self.retry.clone()
    }
}
