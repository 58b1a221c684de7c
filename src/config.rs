use crate::error::ConfigError;
use serde::{
    Deserialize,
    Serialize,
};
use std::time::Duration;

pub const DEFAULT_QUEUE_CAPACITY: usize = 50;
pub const DEFAULT_BATCH_WINDOW: Duration = Duration::from_millis(50);
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(10);

/// Tuning knobs for [`crate::InstanceDnsProvider`].
///
/// `queue_capacity` bounds both the number of queued ids and the size of a single batch, so it should not exceed the
/// per-call item limit of the lookup api.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub queue_capacity: usize,
    /// How long the batch processor keeps collecting ids after the first one arrived.
    #[serde(with = "duration_str")]
    pub batch_window: Duration,
    /// Upper bound for a single caller waiting on a resolution.
    #[serde(with = "duration_str")]
    pub wait_timeout: Duration,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            batch_window: DEFAULT_BATCH_WINDOW,
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
        }
    }
}

impl ProviderConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if self.wait_timeout.is_zero() {
            return Err(ConfigError::ZeroWaitTimeout);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, clap::Args)]
pub struct ProviderArgs {
    #[clap(
        long,
        env = "INSTANCE_DNS_QUEUE_CAPACITY",
        help = "Maximum number of queued instance ids, also the maximum batch size",
        default_value_t = DEFAULT_QUEUE_CAPACITY
    )]
    pub queue_capacity: usize,

    #[clap(
        long,
        env = "INSTANCE_DNS_BATCH_WINDOW",
        help = "How long to collect ids into a batch before calling the lookup api",
        default_value = "50ms",
        value_parser = humantime::parse_duration
    )]
    pub batch_window: Duration,

    #[clap(
        long,
        env = "INSTANCE_DNS_WAIT_TIMEOUT",
        help = "How long a single resolution may wait before giving up",
        default_value = "10s",
        value_parser = humantime::parse_duration
    )]
    pub wait_timeout: Duration,
}

impl TryFrom<ProviderArgs> for ProviderConfig {
    type Error = ConfigError;

    fn try_from(
        ProviderArgs {
            queue_capacity,
            batch_window,
            wait_timeout,
        }: ProviderArgs,
    ) -> Result<Self, Self::Error> {
        let config = ProviderConfig {
            queue_capacity,
            batch_window,
            wait_timeout,
        };
        config.validate()?;
        Ok(config)
    }
}

mod duration_str {
    use serde::{
        de::Error as _,
        Deserialize,
        Deserializer,
        Serializer,
    };
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&humantime::format_duration(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_durations_from_yaml() {
        let config: ProviderConfig = serde_yaml::from_str("queue_capacity: 10\nbatch_window: 20ms\n").unwrap();
        assert_eq!(config.queue_capacity, 10);
        assert_eq!(config.batch_window, Duration::from_millis(20));
        assert_eq!(config.wait_timeout, DEFAULT_WAIT_TIMEOUT);
    }

    #[test]
    fn rejects_zero_capacity() {
        let config = ProviderConfig {
            queue_capacity: 0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroCapacity));
    }
}
