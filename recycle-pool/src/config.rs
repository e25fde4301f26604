use std::time::Duration;

use serde_derive::Deserialize;

use crate::{error::ConfigError, policy::RecyclePolicy};

/// Pool settings, fixed once the pool is built.
///
/// Deserializes from any serde format; durations are integer milliseconds
/// and a `null` threshold disables it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
#[non_exhaustive]
pub struct PoolConfig {
    /// Maximum number of physical connections. `None` is unbounded.
    pub capacity: Option<u32>,
    #[serde(deserialize_with = "millis::optional")]
    pub max_age: Option<Duration>,
    #[serde(deserialize_with = "millis::optional")]
    pub max_idle: Option<Duration>,
    pub timeouts: Timeouts,
    /// Ping idle connections before handing them out.
    pub test_on_checkout: bool,
    /// Connections opened eagerly at build time and kept by the sweep.
    pub min_idle: u32,
    /// Period of the background stale-connection sweep. `None` disables it.
    #[serde(deserialize_with = "millis::optional")]
    pub maintenance_interval: Option<Duration>,
}

impl PoolConfig {
    pub fn new(capacity: u32) -> Self {
        Self {
            capacity: Some(capacity),
            ..Self::default()
        }
    }

    pub fn unbounded() -> Self {
        Self {
            capacity: None,
            ..Self::default()
        }
    }

    pub fn with_max_age(mut self, max_age: Option<Duration>) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn with_max_idle(mut self, max_idle: Option<Duration>) -> Self {
        self.max_idle = max_idle;
        self
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_acquire_timeout(mut self, acquire: Duration) -> Self {
        self.timeouts.acquire = acquire;
        self
    }

    pub fn with_test_on_checkout(mut self, test_on_checkout: bool) -> Self {
        self.test_on_checkout = test_on_checkout;
        self
    }

    pub fn with_min_idle(mut self, min_idle: u32) -> Self {
        self.min_idle = min_idle;
        self
    }

    pub fn with_maintenance_interval(mut self, maintenance_interval: Option<Duration>) -> Self {
        self.maintenance_interval = maintenance_interval;
        self
    }

    pub fn policy(&self) -> RecyclePolicy {
        RecyclePolicy::new(self.max_age, self.max_idle)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.capacity {
            Some(capacity) if self.min_idle > capacity => Err(ConfigError::MinIdleExceedsCapacity {
                min_idle: self.min_idle,
                capacity,
            }),
            _ => Ok(()),
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: Some(10),
            max_age: None,
            max_idle: None,
            timeouts: Timeouts::default(),
            test_on_checkout: false,
            min_idle: 0,
            maintenance_interval: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    /// How long `acquire` waits for a free slot. Zero fails immediately.
    #[serde(deserialize_with = "millis::required")]
    pub acquire: Duration,
    #[serde(deserialize_with = "millis::required")]
    pub connect: Duration,
    /// How long `shutdown` waits for checked-out connections to come back.
    #[serde(deserialize_with = "millis::required")]
    pub shutdown_grace: Duration,
}

impl Timeouts {
    pub fn with_acquire(mut self, acquire: Option<Duration>) -> Self {
        self.acquire = acquire.unwrap_or(Duration::from_secs(30));
        self
    }

    pub fn with_connect(mut self, connect: Option<Duration>) -> Self {
        self.connect = connect.unwrap_or(Duration::from_secs(10));
        self
    }

    pub fn with_shutdown_grace(mut self, shutdown_grace: Option<Duration>) -> Self {
        self.shutdown_grace = shutdown_grace.unwrap_or(Duration::from_secs(30));
        self
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            acquire: Duration::from_secs(30),
            connect: Duration::from_secs(10),
            shutdown_grace: Duration::from_secs(30),
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub(super) fn required<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }

    pub(super) fn optional<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}
