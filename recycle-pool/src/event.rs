//! Lifecycle notifications for diagnostics.

use std::{
    fmt,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::Arc,
};

use tracing::{info, warn};

use crate::{policy::RecycleReason, state::HandleId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    AgeExpired,
    IdleExpired,
    PingFailed,
    /// Reported broken by the caller or the driver at checkin.
    Broken,
    Shutdown,
}

impl From<RecycleReason> for CloseReason {
    fn from(reason: RecycleReason) -> Self {
        match reason {
            RecycleReason::AgeExpired => CloseReason::AgeExpired,
            RecycleReason::IdleExpired => CloseReason::IdleExpired,
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            CloseReason::AgeExpired => "age expired",
            CloseReason::IdleExpired => "idle expired",
            CloseReason::PingFailed => "ping failed",
            CloseReason::Broken => "broken",
            CloseReason::Shutdown => "shutdown",
        };
        f.write_str(reason)
    }
}

/// Observer attached to a pool. Every method defaults to doing nothing.
///
/// Calls happen outside the pool's lock and must return quickly; a panic in
/// a sink is caught and logged.
pub trait EventSink: Send + Sync + 'static {
    fn on_connect(&self, _id: HandleId) {}

    fn on_close(&self, _id: HandleId, _reason: CloseReason) {}

    fn on_checkout(&self, _id: HandleId) {}

    fn on_checkin(&self, _id: HandleId) {}
}

impl<S: EventSink + ?Sized> EventSink for Arc<S> {
    fn on_connect(&self, id: HandleId) {
        (**self).on_connect(id)
    }

    fn on_close(&self, id: HandleId, reason: CloseReason) {
        (**self).on_close(id, reason)
    }

    fn on_checkout(&self, id: HandleId) {
        (**self).on_checkout(id)
    }

    fn on_checkin(&self, id: HandleId) {
        (**self).on_checkin(id)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {}

/// Logs connects and closes at `info`, checkouts and checkins at `trace`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn on_connect(&self, id: HandleId) {
        info!(handle = %id, "connect");
    }

    fn on_close(&self, id: HandleId, reason: CloseReason) {
        info!(handle = %id, %reason, "close");
    }

    fn on_checkout(&self, id: HandleId) {
        tracing::trace!(handle = %id, "checkout");
    }

    fn on_checkin(&self, id: HandleId) {
        tracing::trace!(handle = %id, "checkin");
    }
}

pub(crate) struct Events {
    sink: Arc<dyn EventSink>,
}

impl Events {
    pub(crate) fn new(sink: Arc<dyn EventSink>) -> Self {
        Self { sink }
    }

    pub(crate) fn connect(&self, id: HandleId) {
        self.dispatch("connect", || self.sink.on_connect(id));
    }

    pub(crate) fn close(&self, id: HandleId, reason: CloseReason) {
        self.dispatch("close", || self.sink.on_close(id, reason));
    }

    pub(crate) fn checkout(&self, id: HandleId) {
        self.dispatch("checkout", || self.sink.on_checkout(id));
    }

    pub(crate) fn checkin(&self, id: HandleId) {
        self.dispatch("checkin", || self.sink.on_checkin(id));
    }

    fn dispatch(&self, event: &'static str, notify: impl FnOnce()) {
        if catch_unwind(AssertUnwindSafe(notify)).is_err() {
            warn!(event, "event sink panicked");
        }
    }
}
