// src/config.rs
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use crate::utils::error::AppError;

pub const DEFAULT_MAPPING_FILE: &str = "stock_orgid_mapping.json";
pub const DEFAULT_SAVE_DIR: &str = "downloads";
pub const DEFAULT_CODES_FILE: &str = "a_stock_codes.csv";

/// Inclusive `[min, max]` window in milliseconds from which random delays are drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DelayWindow {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl DelayWindow {
    pub const fn new(min_ms: u64, max_ms: u64) -> Self {
        Self { min_ms, max_ms }
    }

    pub const ZERO: DelayWindow = DelayWindow::new(0, 0);

    pub fn sample<R: rand::Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        if self.max_ms <= self.min_ms {
            return Duration::from_millis(self.min_ms);
        }
        Duration::from_millis(rng.gen_range(self.min_ms..=self.max_ms))
    }

    fn validate(&self, name: &str) -> Result<(), AppError> {
        if self.min_ms > self.max_ms {
            return Err(AppError::Config(format!(
                "{}: min_ms ({}) must not exceed max_ms ({})",
                name, self.min_ms, self.max_ms
            )));
        }
        Ok(())
    }
}

/// Session lifetime and anti-detection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// Downloads after which the session is replaced.
    pub max_downloads_per_session: u32,
    /// Age after which the session is replaced.
    pub max_session_age_secs: u64,
    /// Pause between two network operations on the same session.
    pub pacing: DelayWindow,
    /// Pause before a replacement session is opened.
    pub restart_pause: DelayWindow,
    /// Scroll / pointer simulation between requests (never in headless mode).
    pub simulate_behavior: bool,
    pub headless: bool,
    /// Hard deadline for every transport operation.
    pub request_timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_downloads_per_session: 5,
            max_session_age_secs: 600,
            pacing: DelayWindow::new(2_000, 8_000),
            restart_pause: DelayWindow::new(5_000, 12_000),
            simulate_behavior: true,
            headless: false,
            request_timeout_secs: 30,
        }
    }
}

impl SessionConfig {
    pub fn max_session_age(&self) -> Duration {
        Duration::from_secs(self.max_session_age_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn behavior_enabled(&self) -> bool {
        self.simulate_behavior && !self.headless
    }
}

/// Bounded retry with a widening random backoff.
///
/// The delay before retry `n` (1-based) is drawn uniformly from
/// `[cap / 2, cap]` where `cap = min(base_delay_ms * 2^(n-1), max_delay_ms)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 5_000,
            max_delay_ms: 60_000,
        }
    }
}

impl RetryPolicy {
    /// Upper bound of the delay before retry number `retry` (1-based).
    pub fn delay_cap(&self, retry: u32) -> Duration {
        let factor = 1u64.checked_shl(retry.saturating_sub(1)).unwrap_or(u64::MAX);
        let cap = self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms);
        Duration::from_millis(cap)
    }

    pub fn delay_for<R: rand::Rng + ?Sized>(&self, retry: u32, rng: &mut R) -> Duration {
        let cap = self.delay_cap(retry).as_millis() as u64;
        DelayWindow::new(cap / 2, cap).sample(rng)
    }
}

/// Every tunable recognized by both executables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FetcherConfig {
    pub session: SessionConfig,
    pub retry: RetryPolicy,
}

impl FetcherConfig {
    /// Loads a JSON override file; fields not present keep their defaults,
    /// unknown fields are rejected.
    pub fn from_file(path: &Path) -> Result<Self, AppError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Cannot read config {}: {}", path.display(), e)))?;
        let config: FetcherConfig = serde_json::from_str(&text)
            .map_err(|e| AppError::Config(format!("Invalid config {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        let s = &self.session;
        if s.max_downloads_per_session == 0 {
            return Err(AppError::Config("session.max_downloads_per_session must be at least 1".into()));
        }
        if s.max_session_age_secs == 0 {
            return Err(AppError::Config("session.max_session_age_secs must be at least 1".into()));
        }
        if s.request_timeout_secs == 0 {
            return Err(AppError::Config("session.request_timeout_secs must be at least 1".into()));
        }
        s.pacing.validate("session.pacing")?;
        s.restart_pause.validate("session.restart_pause")?;

        let r = &self.retry;
        if r.max_attempts == 0 {
            return Err(AppError::Config("retry.max_attempts must be at least 1".into()));
        }
        if r.base_delay_ms > r.max_delay_ms {
            return Err(AppError::Config("retry.base_delay_ms must not exceed retry.max_delay_ms".into()));
        }
        Ok(())
    }
}
