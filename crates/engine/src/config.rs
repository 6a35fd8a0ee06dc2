//! Engine configuration, read from TOML.
//!
//! ```toml
//! [calendar]
//! business_start = "09:00"
//! business_end = "17:00"
//!
//! [scheduler]
//! poll_interval_secs = 60
//! max_concurrency = 8
//! action_timeout_ms = 30000
//!
//! [locking]
//! lock_timeout_ms = 2000
//! ```
//!
//! Every key is optional.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::calendar::BusinessCalendar;
use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub calendar: CalendarConfig,
    pub scheduler: SchedulerConfig,
    pub locking: LockingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CalendarConfig {
    /// Opening time of the business window, `HH:MM`.
    pub business_start: String,
    /// Closing time of the business window, `HH:MM`.
    pub business_end: String,
}

impl Default for CalendarConfig {
    fn default() -> Self {
        CalendarConfig {
            business_start: "09:00".to_string(),
            business_end: "17:00".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerConfig {
    pub poll_interval_secs: u64,
    /// Records processed in parallel by one sweep.
    pub max_concurrency: usize,
    /// Upper bound on one escalation dispatch, which runs under the record
    /// lock. An expired dispatch is logged as failed.
    pub action_timeout_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            poll_interval_secs: 60,
            max_concurrency: 8,
            action_timeout_ms: 30_000,
        }
    }
}

impl SchedulerConfig {
    pub fn action_timeout(&self) -> Duration {
        Duration::from_millis(self.action_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LockingConfig {
    pub lock_timeout_ms: u64,
}

impl Default for LockingConfig {
    fn default() -> Self {
        LockingConfig {
            lock_timeout_ms: 2000,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(src: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(src)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let src = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&src)
    }

    /// Reject malformed times, an empty business window and zero-valued
    /// scheduler or lock settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.calendar()?;
        if self.scheduler.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "scheduler.poll_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.scheduler.max_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "scheduler.max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.scheduler.action_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "scheduler.action_timeout_ms must be at least 1".to_string(),
            ));
        }
        if self.locking.lock_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "locking.lock_timeout_ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn calendar(&self) -> Result<BusinessCalendar, ConfigError> {
        let start = BusinessCalendar::parse_time_of_day(&self.calendar.business_start)?;
        let end = BusinessCalendar::parse_time_of_day(&self.calendar.business_end)?;
        Ok(BusinessCalendar::new(start, end)?)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.scheduler.poll_interval_secs)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.locking.lock_timeout_ms)
    }
}
