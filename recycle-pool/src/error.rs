use std::time::Duration;

use thiserror::Error;

use crate::state::{HandleId, HandleState};

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type Result<T, E = PoolError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("failed to open a connection: {0}")]
    DriverOpenFailed(#[source] BoxError),

    #[error("no connection became available within {waited:?}")]
    PoolExhausted { waited: Duration },

    #[error("handle {id} is not checked out from this pool (found: {})", describe(.state))]
    InvalidHandleState {
        id: HandleId,
        state: Option<HandleState>,
    },

    #[error("pool is closed")]
    PoolClosed,

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl PoolError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, PoolError::PoolExhausted { .. })
    }
}

fn describe(state: &Option<HandleState>) -> String {
    match state {
        Some(state) => state.to_string(),
        None => String::from("unknown handle"),
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    #[error("min_idle ({min_idle}) exceeds capacity ({capacity})")]
    MinIdleExceedsCapacity { min_idle: u32, capacity: u32 },
}

/// Raised by the store when every capacity slot is taken. The pool turns it
/// into waiting or [`PoolError::PoolExhausted`]; callers never see it.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("pool capacity of {capacity} reached")]
pub(crate) struct CapacityExceeded {
    pub(crate) capacity: usize,
}

#[derive(Debug, Error)]
#[error("connect did not finish within {0:?}")]
pub(crate) struct ConnectTimeout(pub(crate) Duration);
