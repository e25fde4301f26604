//! Staleness rules applied to idle handles at checkout.

use std::{
    fmt,
    time::{Duration, Instant},
};

use crate::state::ConnectionState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecycleReason {
    AgeExpired,
    IdleExpired,
}

impl fmt::Display for RecycleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecycleReason::AgeExpired => f.write_str("age expired"),
            RecycleReason::IdleExpired => f.write_str("idle expired"),
        }
    }
}

/// Age and idle thresholds. `None` disables a threshold.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecyclePolicy {
    pub max_age: Option<Duration>,
    pub max_idle: Option<Duration>,
}

impl RecyclePolicy {
    pub fn new(max_age: Option<Duration>, max_idle: Option<Duration>) -> Self {
        Self { max_age, max_idle }
    }

    pub fn is_disabled(&self) -> bool {
        self.max_age.is_none() && self.max_idle.is_none()
    }

    /// Returns why `state` must be recycled at `now`, if it must.
    ///
    /// Age wins when both thresholds are crossed. A handle with no elapsed
    /// time on a clock is never stale, even against a zero threshold.
    pub fn check(&self, state: &ConnectionState, now: Instant) -> Option<RecycleReason> {
        if let Some(max_age) = self.max_age {
            if expired(state.age(now), max_age) {
                return Some(RecycleReason::AgeExpired);
            }
        }

        match (self.max_idle, state.idle_for(now)) {
            (Some(max_idle), Some(idle)) if expired(idle, max_idle) => {
                Some(RecycleReason::IdleExpired)
            }
            _ => None,
        }
    }

    pub fn should_recycle(&self, state: &ConnectionState, now: Instant) -> bool {
        self.check(state, now).is_some()
    }
}

fn expired(elapsed: Duration, limit: Duration) -> bool {
    !elapsed.is_zero() && elapsed >= limit
}
