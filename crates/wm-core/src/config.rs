use std::env;
use std::time::Duration;

use crate::dispatcher::DispatchDelays;
use crate::retry::RetryLimits;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} must be a non-negative integer, got {value:?}")]
    InvalidNumber { name: &'static str, value: String },
}

const DEFAULT_MESSAGE_RETENTION: Duration = Duration::from_secs(3600);

/// Retry ceilings, queue delays and message retention, read from the
/// environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerConfig {
    pub retry_limits: RetryLimits,
    pub delays: DispatchDelays,
    /// How long handled messages are remembered before pruning.
    pub message_retention: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            retry_limits: RetryLimits::default(),
            delays: DispatchDelays::default(),
            message_retention: DEFAULT_MESSAGE_RETENTION,
        }
    }
}

impl WorkerConfig {
    /// Unset variables keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let limits = RetryLimits::default();
        let delays = DispatchDelays::default();

        let number = |name: &'static str, default: u64| -> Result<u64, ConfigError> {
            match lookup(name) {
                None => Ok(default),
                Some(value) => value
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidNumber { name, value }),
            }
        };
        let limit = |name: &'static str, default: u32| -> Result<u32, ConfigError> {
            let value = number(name, u64::from(default))?;
            u32::try_from(value).map_err(|_| ConfigError::InvalidNumber {
                name,
                value: value.to_string(),
            })
        };
        let millis = |name: &'static str, default: Duration| -> Result<Duration, ConfigError> {
            Ok(Duration::from_millis(number(name, default.as_millis() as u64)?))
        };

        Ok(Self {
            retry_limits: RetryLimits {
                create: limit("CREATE_RETRY_LIMIT", limits.create)?,
                get: limit("GET_RETRY_LIMIT", limits.get)?,
                find: limit("FIND_RETRY_LIMIT", limits.find)?,
                delete: limit("DELETE_RETRY_LIMIT", limits.delete)?,
            },
            delays: DispatchDelays {
                check_is_active: millis("CHECK_IS_ACTIVE_DELAY_MS", delays.check_is_active)?,
                get: millis("GET_DELAY_MS", delays.get)?,
                find: millis("FIND_DELAY_MS", delays.find)?,
                retry: millis("RETRY_DELAY_MS", delays.retry)?,
            },
            message_retention: millis("MESSAGE_RETENTION_MS", DEFAULT_MESSAGE_RETENTION)?,
        })
    }
}
