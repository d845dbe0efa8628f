use std::str::FromStr;
use std::time::Duration;

use crate::error::{BridgeError, Result};
use crate::poller::PollPolicy;

pub const PROXY_BASE_URL: &str = "https://localhost:3000";

/// Default spacing between status queries (milliseconds).
pub const POLL_INTERVAL_MS: u64 = 10_000;

/// Upper bound for the poll spacing once backoff is enabled (milliseconds).
pub const POLL_MAX_INTERVAL_MS: u64 = 60_000;

/// Per-request HTTP timeout (seconds).
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Channel capacity for status and poll events.
pub const CHANNEL_CAPACITY: usize = 64;

/// Base name probed when a run targets a fresh sheet.
pub const NEW_SHEET_BASE_NAME: &str = "New Sheet";

#[derive(Debug, Clone)]
pub struct Config {
    /// Job proxy origin, without trailing slash (PROXY_BASE_URL)
    pub proxy_base_url: String,
    pub request_timeout: Duration,
    /// Accept self-signed certificates from the local proxy (PROXY_ACCEPT_INVALID_CERTS)
    pub accept_invalid_certs: bool,
    pub poll_interval_ms: u64,
    /// 0 keeps polling until the job resolves or the run is cancelled (POLL_MAX_ATTEMPTS)
    pub poll_max_attempts: u32,
    /// 1.0 keeps a fixed interval (POLL_BACKOFF_FACTOR)
    pub poll_backoff_factor: f64,
    pub poll_max_interval_ms: u64,
    /// SQLite workbook file (WORKBOOK_PATH)
    pub workbook_path: String,
    pub log_level: String,
    /// Log destination for the interactive host (LOG_FILE)
    pub log_file: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let cfg = Self {
            proxy_base_url: std::env::var("PROXY_BASE_URL")
                .unwrap_or_else(|_| PROXY_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            request_timeout: Duration::from_secs(env_or("REQUEST_TIMEOUT_SECS", REQUEST_TIMEOUT_SECS)?),
            accept_invalid_certs: std::env::var("PROXY_ACCEPT_INVALID_CERTS")
                .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
            poll_interval_ms: env_or("POLL_INTERVAL_MS", POLL_INTERVAL_MS)?,
            poll_max_attempts: env_or("POLL_MAX_ATTEMPTS", 0u32)?,
            poll_backoff_factor: env_or("POLL_BACKOFF_FACTOR", 1.0f64)?,
            poll_max_interval_ms: env_or("POLL_MAX_INTERVAL_MS", POLL_MAX_INTERVAL_MS)?,
            workbook_path: std::env::var("WORKBOOK_PATH").unwrap_or_else(|_| "workbook.db".to_string()),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            log_file: std::env::var("LOG_FILE").unwrap_or_else(|_| "sheet-bridge.log".to_string()),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(BridgeError::Config("POLL_INTERVAL_MS must be greater than zero".to_string()));
        }
        if !self.poll_backoff_factor.is_finite() || self.poll_backoff_factor < 1.0 {
            return Err(BridgeError::Config(
                "POLL_BACKOFF_FACTOR must be a finite number of at least 1.0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(self.poll_interval_ms),
            max_attempts: (self.poll_max_attempts > 0).then_some(self.poll_max_attempts),
            backoff_factor: self.poll_backoff_factor,
            max_interval: Duration::from_millis(self.poll_max_interval_ms.max(self.poll_interval_ms)),
        }
    }

    /// Build the shared HTTP client used for submit and poll requests.
    pub fn http_client(&self) -> Result<reqwest::Client> {
        Ok(reqwest::Client::builder()
            .timeout(self.request_timeout)
            .danger_accept_invalid_certs(self.accept_invalid_certs)
            .build()?)
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> Result<T> {
    parse_or(key, std::env::var(key).ok(), default)
}

/// Unset keeps the default; a value that does not parse is an error.
fn parse_or<T: FromStr>(key: &str, raw: Option<String>, default: T) -> Result<T> {
    match raw {
        None => Ok(default),
        Some(v) => v
            .trim()
            .parse::<T>()
            .map_err(|_| BridgeError::Config(format!("{key} has an invalid value: {v:?}"))),
    }
}
