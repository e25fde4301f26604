use std::sync::atomic::{AtomicU64, Ordering};

use serde_derive::Serialize;

use crate::event::CloseReason;

/// Point-in-time view of the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    /// Idle, checked-out and currently opening connections together.
    pub size: usize,
    pub idle: usize,
    pub in_use: usize,
    pub pending: usize,
    pub waiting: usize,
    pub capacity: Option<u32>,
    pub closed: bool,
}

/// Cumulative counters since the pool was built.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub opened: u64,
    pub closed: u64,
    pub recycled_age: u64,
    pub recycled_idle: u64,
    pub ping_failures: u64,
    pub broken_on_release: u64,
    pub checkouts: u64,
    pub exhausted: u64,
}

#[derive(Debug, Default)]
pub(crate) struct PoolMetrics {
    opened: AtomicU64,
    closed: AtomicU64,
    recycled_age: AtomicU64,
    recycled_idle: AtomicU64,
    ping_failures: AtomicU64,
    broken_on_release: AtomicU64,
    checkouts: AtomicU64,
    exhausted: AtomicU64,
}

impl PoolMetrics {
    pub(crate) fn record_opened(&self) {
        self.opened.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_closed(&self, reason: CloseReason) {
        self.closed.fetch_add(1, Ordering::Relaxed);
        let counter = match reason {
            CloseReason::AgeExpired => &self.recycled_age,
            CloseReason::IdleExpired => &self.recycled_idle,
            CloseReason::PingFailed => &self.ping_failures,
            CloseReason::Broken => &self.broken_on_release,
            CloseReason::Shutdown => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_checkout(&self) {
        self.checkouts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_exhausted(&self) {
        self.exhausted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            opened: self.opened.load(Ordering::Relaxed),
            closed: self.closed.load(Ordering::Relaxed),
            recycled_age: self.recycled_age.load(Ordering::Relaxed),
            recycled_idle: self.recycled_idle.load(Ordering::Relaxed),
            ping_failures: self.ping_failures.load(Ordering::Relaxed),
            broken_on_release: self.broken_on_release.load(Ordering::Relaxed),
            checkouts: self.checkouts.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
        }
    }
}
