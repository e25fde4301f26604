use std::{
    fmt,
    time::{Duration, Instant},
};

use uuid::Uuid;

/// Opaque identifier assigned to a handle when its physical connection is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(Uuid);

impl HandleId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    Idle,
    CheckedOut,
    Closed,
}

impl fmt::Display for HandleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HandleState::Idle => "idle",
            HandleState::CheckedOut => "checked out",
            HandleState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Bookkeeping carried alongside a physical connection for its whole life.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct ConnectionState {
    pub id: HandleId,
    pub created_at: Instant,
    pub last_checkout_at: Option<Instant>,
    /// `Some` exactly while the handle sits in the idle set.
    pub idle_since: Option<Instant>,
    pub use_count: u64,
}

impl ConnectionState {
    pub(crate) fn new(created_at: Instant) -> Self {
        Self {
            id: HandleId::new(),
            created_at,
            last_checkout_at: None,
            idle_since: None,
            use_count: 0,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.idle_since.is_some()
    }

    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.created_at)
    }

    pub fn idle_for(&self, now: Instant) -> Option<Duration> {
        self.idle_since
            .map(|idle_since| now.saturating_duration_since(idle_since))
    }

    pub(crate) fn set_idle(&mut self, now: Instant) {
        self.idle_since = Some(now);
    }

    pub(crate) fn set_checked_out(&mut self, now: Instant) {
        self.idle_since = None;
        self.last_checkout_at = Some(now);
        self.use_count += 1;
    }
}
