use std::{
    marker::PhantomData,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use futures::future::join_all;
use parking_lot::Mutex;
use tokio::{
    sync::{Notify, Semaphore, TryAcquireError},
    time::Instant,
};
use tracing::{debug, info, warn};

use crate::{
    clock::{Clock, SystemClock},
    config::PoolConfig,
    connection::PooledConnection,
    error::{ConnectTimeout, PoolError, Result},
    event::{CloseReason, EventSink, Events, NoopEventSink},
    guard::CheckoutGuard,
    manager::Manager,
    policy::RecyclePolicy,
    state::{ConnectionState, HandleId},
    stats::{MetricsSnapshot, PoolMetrics, PoolStatus},
    store::{Candidate, IdleConnection, PoolStore},
};

/// A pool of physical connections that recycles them by age and idle time.
///
/// Cloning is cheap; every clone drives the same pool.
pub struct Pool<M: Manager> {
    inner: Arc<PoolInner<M>>,
}

impl<M: Manager> Clone for Pool<M> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<M: Manager> Pool<M> {
    pub async fn new(manager: M, config: PoolConfig) -> Result<Self> {
        Self::builder().pool_config(config).build(manager).await
    }

    pub fn builder() -> PoolBuilder<M> {
        PoolBuilder::new()
    }

    /// Checks out a connection, waiting at most the configured acquire timeout.
    pub async fn acquire(&self) -> Result<PooledConnection<M>> {
        self.inner.acquire(self.inner.config.timeouts.acquire).await
    }

    pub async fn acquire_timeout(&self, timeout: Duration) -> Result<PooledConnection<M>> {
        self.inner.acquire(timeout).await
    }

    /// Checks a connection back in.
    ///
    /// A connection marked broken, or reported broken by the driver, is
    /// closed and its slot freed. A connection from another pool is refused
    /// with [`PoolError::InvalidHandleState`] and goes back to its own pool.
    pub async fn release(&self, conn: PooledConnection<M>) -> Result<()> {
        self.inner.release(conn).await
    }

    /// Closes every idle connection, refuses new work and waits up to the
    /// shutdown grace period for checked-out connections and in-flight opens.
    /// Calling it again is a no-op.
    pub async fn shutdown(&self) -> ShutdownReport {
        self.inner.shutdown().await
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    pub fn status(&self) -> PoolStatus {
        self.inner.status()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    pub fn manager(&self) -> &M {
        &self.inner.manager
    }
}

pub struct PoolBuilder<M: Manager> {
    pool_config: PoolConfig,
    clock: Arc<dyn Clock>,
    event_sink: Arc<dyn EventSink>,
    _manager: PhantomData<M>,
}

impl<M: Manager> PoolBuilder<M> {
    pub fn new() -> Self {
        Self {
            pool_config: PoolConfig::default(),
            clock: Arc::new(SystemClock),
            event_sink: Arc::new(NoopEventSink),
            _manager: PhantomData,
        }
    }

    pub fn pool_config(mut self, pool_config: PoolConfig) -> Self {
        self.pool_config = pool_config;
        self
    }

    pub fn clock(mut self, clock: impl Clock) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn event_sink(mut self, event_sink: impl EventSink) -> Self {
        self.event_sink = Arc::new(event_sink);
        self
    }

    /// Builds the pool and opens `min_idle` connections up front.
    pub async fn build(self, manager: M) -> Result<Pool<M>> {
        self.pool_config.validate()?;

        let inner = PoolInner::new_arc(manager, self.pool_config, self.clock, self.event_sink);
        inner.top_up().await?;
        spawn_maintenance_task(&inner);

        Ok(Pool { inner })
    }
}

impl<M: Manager> Default for PoolBuilder<M> {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub closed_idle: usize,
    /// Checked-out or still-opening connections that came back within the
    /// grace period.
    pub closed_returned: usize,
    /// Checked-out or still-opening connections that were still out when the
    /// grace period ended. They are closed whenever their holder lets go of
    /// them.
    pub abandoned: usize,
}

pub(crate) struct PoolInner<M: Manager> {
    manager: M,
    config: PoolConfig,
    policy: RecyclePolicy,
    clock: Arc<dyn Clock>,
    events: Events,
    pub(crate) store: Mutex<PoolStore<M::Connection>>,
    pub(crate) semaphore: Semaphore,
    metrics: PoolMetrics,
    waiting: AtomicUsize,
    pub(crate) checked_in: Notify,
}

type Retired<C> = Option<(C, CloseReason)>;

impl<M: Manager> PoolInner<M> {
    fn new_arc(
        manager: M,
        config: PoolConfig,
        clock: Arc<dyn Clock>,
        event_sink: Arc<dyn EventSink>,
    ) -> Arc<Self> {
        let capacity = config.capacity.map(|capacity| capacity as usize);
        let permits = capacity.unwrap_or(Semaphore::MAX_PERMITS);

        Arc::new(Self {
            manager,
            policy: config.policy(),
            config,
            clock,
            events: Events::new(event_sink),
            store: Mutex::new(PoolStore::new(capacity)),
            semaphore: Semaphore::new(permits),
            metrics: PoolMetrics::default(),
            waiting: AtomicUsize::new(0),
            checked_in: Notify::new(),
        })
    }

    async fn acquire(self: &Arc<Self>, timeout: Duration) -> Result<PooledConnection<M>> {
        let deadline = deadline_after(timeout);

        loop {
            let mut guard = self.wait_for_permit(deadline, timeout).await?;

            let candidate = {
                let mut store = self.store.lock();
                if store.is_closed() {
                    None
                } else {
                    Some(store.take_idle_or_admit())
                }
            };

            let entry = match candidate {
                None => return Err(PoolError::PoolClosed),
                Some(Ok(Candidate::Idle(entry, slot))) => {
                    guard.hold_idle(slot, entry);
                    match self.vet(&mut guard).await {
                        Some(entry) => entry,
                        // the stale handle's slot carries over to its replacement
                        None => self.open().await?,
                    }
                }
                Some(Ok(Candidate::Fresh(slot))) => {
                    guard.hold(slot);
                    self.open().await?
                }
                Some(Err(full)) => {
                    // a warm-up or sweep holds the last slot; it is short-lived
                    drop(guard);
                    if timeout.is_zero() || Instant::now() >= deadline {
                        debug!(%full, "no slot became free before the deadline");
                        self.metrics.record_exhausted();
                        return Err(PoolError::PoolExhausted { waited: timeout });
                    }
                    tokio::task::yield_now().await;
                    continue;
                }
            };

            return self.check_out(entry, guard).await;
        }
    }

    async fn wait_for_permit(
        self: &Arc<Self>,
        deadline: Instant,
        timeout: Duration,
    ) -> Result<CheckoutGuard<M>> {
        match self.semaphore.try_acquire() {
            Ok(permit) => return Ok(CheckoutGuard::from_permit(self.clone(), permit)),
            Err(TryAcquireError::Closed) => return Err(PoolError::PoolClosed),
            Err(TryAcquireError::NoPermits) if timeout.is_zero() => {
                self.metrics.record_exhausted();
                return Err(PoolError::PoolExhausted { waited: timeout });
            }
            Err(TryAcquireError::NoPermits) => {}
        }

        let _waiting = Waiting::enter(&self.waiting);
        match tokio::time::timeout_at(deadline, self.semaphore.acquire()).await {
            Ok(Ok(permit)) => Ok(CheckoutGuard::from_permit(self.clone(), permit)),
            Ok(Err(_closed)) => Err(PoolError::PoolClosed),
            Err(_elapsed) => {
                self.metrics.record_exhausted();
                Err(PoolError::PoolExhausted { waited: timeout })
            }
        }
    }

    /// Recycling policy first, then the optional ping, on the candidate the
    /// guard holds. `None` means the handle was closed and the guard's slot is
    /// free for a replacement.
    ///
    /// The candidate stays in the guard until vetting settles, so dropping
    /// this future mid-ping puts the handle back in the idle queue.
    async fn vet(
        self: &Arc<Self>,
        guard: &mut CheckoutGuard<M>,
    ) -> Option<IdleConnection<M::Connection>> {
        let stale = self
            .policy
            .check(&guard.candidate()?.state, self.clock.now());

        let verdict = match stale {
            Some(reason) => Some(CloseReason::from(reason)),
            None if self.config.test_on_checkout => {
                let entry = guard.candidate_mut()?;
                let alive = self.manager.ping(&mut entry.connection).await;
                (!alive).then_some(CloseReason::PingFailed)
            }
            None => None,
        };

        let entry = guard.take_candidate()?;
        match verdict {
            Some(reason) => {
                self.retire(entry.connection, entry.state.id, reason).await;
                None
            }
            None => Some(entry),
        }
    }

    async fn open(&self) -> Result<IdleConnection<M::Connection>> {
        let connect_timeout = self.config.timeouts.connect;
        let connection = match tokio::time::timeout(connect_timeout, self.manager.connect()).await
        {
            Ok(Ok(connection)) => connection,
            Ok(Err(error)) => {
                warn!(%error, "failed to open connection");
                return Err(PoolError::DriverOpenFailed(Box::new(error)));
            }
            Err(_elapsed) => {
                warn!(timeout = ?connect_timeout, "timed out opening connection");
                return Err(PoolError::DriverOpenFailed(Box::new(ConnectTimeout(
                    connect_timeout,
                ))));
            }
        };

        let state = ConnectionState::new(self.clock.now());
        self.metrics.record_opened();
        debug!(handle = %state.id, "opened connection");
        self.events.connect(state.id);

        Ok(IdleConnection { connection, state })
    }

    async fn close(&self, connection: M::Connection, id: HandleId, reason: CloseReason) {
        if let Err(error) = self.manager.close(connection).await {
            warn!(handle = %id, %error, "failed to close connection");
        }
        self.metrics.record_closed(reason);
        debug!(handle = %id, %reason, "closed connection");
        self.events.close(id, reason);
    }

    /// Closes a connection the caller already owns on its own task and waits
    /// for it. If the caller is cancelled the close still runs to the end.
    async fn retire(
        self: &Arc<Self>,
        connection: M::Connection,
        id: HandleId,
        reason: CloseReason,
    ) {
        let pool = self.clone();
        let closing = tokio::spawn(async move {
            pool.close(connection, id, reason).await;
        });
        if let Err(error) = closing.await {
            warn!(handle = %id, %error, "close task did not finish");
        }
    }

    async fn check_out(
        self: &Arc<Self>,
        mut entry: IdleConnection<M::Connection>,
        mut guard: CheckoutGuard<M>,
    ) -> Result<PooledConnection<M>> {
        entry.state.set_checked_out(self.clock.now());

        let admitted = {
            let mut store = self.store.lock();
            if store.is_closed() {
                false
            } else {
                if let Some(slot) = guard.take_slot() {
                    store.mark_in_use(slot, entry.state.clone());
                }
                true
            }
        };

        if !admitted {
            drop(guard);
            self.retire(entry.connection, entry.state.id, CloseReason::Shutdown)
                .await;
            return Err(PoolError::PoolClosed);
        }

        self.metrics.record_checkout();
        debug!(handle = %entry.state.id, uses = entry.state.use_count, "checked out connection");
        self.events.checkout(entry.state.id);

        Ok(PooledConnection::new(entry, guard))
    }

    async fn release(self: &Arc<Self>, conn: PooledConnection<M>) -> Result<()> {
        if !conn.belongs_to(self) {
            return Err(PoolError::InvalidHandleState {
                id: conn.id(),
                state: None,
            });
        }

        let Some((connection, state, broken, guard)) = conn.into_parts() else {
            return Ok(());
        };
        let id = state.id;
        let retired = self.check_in(connection, state, broken);
        drop(guard);

        if let Some((connection, reason)) = retired? {
            self.retire(connection, id, reason).await;
        }
        Ok(())
    }

    /// Store side of a checkin. Hands back the connection when it has to be
    /// closed instead of kept.
    fn check_in(
        &self,
        connection: M::Connection,
        mut state: ConnectionState,
        broken: bool,
    ) -> Result<Retired<M::Connection>> {
        let id = state.id;
        let broken = broken || self.manager.is_broken(&connection);
        let now = self.clock.now();

        let mut store = self.store.lock();
        let closed = store.is_closed();

        if broken || closed {
            // after shutdown the handle may already have been forgotten
            if !store.remove(id) && !closed {
                return Err(PoolError::InvalidHandleState { id, state: None });
            }
            drop(store);
            if closed {
                self.checked_in.notify_waiters();
            }
            if broken {
                debug!(handle = %id, "discarding broken connection");
                return Ok(Some((connection, CloseReason::Broken)));
            }
            return Ok(Some((connection, CloseReason::Shutdown)));
        }

        state.set_idle(now);
        if let Err(misplaced) = store.mark_idle(IdleConnection { connection, state }) {
            drop(store);
            drop(misplaced.entry);
            return Err(PoolError::InvalidHandleState {
                id,
                state: misplaced.found,
            });
        }
        drop(store);

        debug!(handle = %id, "checked in connection");
        self.events.checkin(id);
        Ok(None)
    }

    /// Checkin for a connection dropped without `release`.
    pub(crate) fn check_in_detached(
        self: &Arc<Self>,
        connection: M::Connection,
        state: ConnectionState,
        broken: bool,
    ) {
        let id = state.id;
        match self.check_in(connection, state, broken) {
            Ok(None) => {}
            Ok(Some((connection, reason))) => self.retire_detached(connection, id, reason),
            Err(error) => warn!(handle = %id, %error, "dropped connection could not be checked in"),
        }
    }

    pub(crate) fn retire_detached(self: &Arc<Self>, connection: M::Connection, id: HandleId, reason: CloseReason) {
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let pool = self.clone();
                runtime.spawn(async move {
                    pool.close(connection, id, reason).await;
                });
            }
            Err(_) => {
                // no runtime to run the driver's close on; dropping is the best we can do
                drop(connection);
                self.metrics.record_closed(reason);
                self.events.close(id, reason);
            }
        }
    }

    async fn shutdown(self: &Arc<Self>) -> ShutdownReport {
        let (idle, in_use, pending) = {
            let mut store = self.store.lock();
            if !store.close() {
                return ShutdownReport::default();
            }
            (store.drain_idle(), store.in_use_len(), store.pending())
        };
        self.semaphore.close();
        info!(idle = idle.len(), in_use, pending, "shutting down pool");

        let closed_idle = idle.len();
        join_all(idle.into_iter().map(|entry| {
            self.retire(entry.connection, entry.state.id, CloseReason::Shutdown)
        }))
        .await;

        let abandoned = self.await_outstanding().await;

        ShutdownReport {
            closed_idle,
            closed_returned: (in_use + pending).saturating_sub(abandoned),
            abandoned,
        }
    }

    /// Waits for checked-out connections and in-flight opens until the grace
    /// period runs out, then forgets the checked-out rest. Returns how many
    /// were still outstanding.
    async fn await_outstanding(&self) -> usize {
        let deadline = deadline_after(self.config.timeouts.shutdown_grace);

        loop {
            let notified = self.checked_in.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let remaining = {
                let store = self.store.lock();
                store.in_use_len() + store.pending()
            };
            if remaining == 0 {
                return 0;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                break;
            }
        }

        let abandoned = {
            let mut store = self.store.lock();
            // pending slots settle on their own once their open finishes
            store.forget_in_use() + store.pending()
        };
        if abandoned > 0 {
            warn!(
                abandoned,
                "connections still outstanding after the shutdown grace period"
            );
        }
        abandoned
    }

    /// Opens connections until `min_idle` are idle or no slot is free.
    async fn top_up(self: &Arc<Self>) -> Result<()> {
        let wanted = self.config.min_idle as usize;

        for _ in 0..wanted {
            let Ok(permit) = self.semaphore.try_acquire() else {
                break;
            };
            let mut guard = CheckoutGuard::from_permit(self.clone(), permit);

            let slot = {
                let mut store = self.store.lock();
                if store.is_closed() || store.idle_len() >= wanted {
                    None
                } else {
                    store.admit_new().ok()
                }
            };
            let Some(slot) = slot else {
                break;
            };
            guard.hold(slot);

            let mut entry = self.open().await?;
            entry.state.set_idle(self.clock.now());

            let rejected = {
                let mut store = self.store.lock();
                match guard.take_slot() {
                    Some(slot) if !store.is_closed() => {
                        store.admit_idle(slot, entry);
                        None
                    }
                    Some(slot) => {
                        store.release_slot(slot);
                        Some(entry)
                    }
                    None => Some(entry),
                }
            };
            drop(guard);

            if let Some(entry) = rejected {
                self.checked_in.notify_waiters();
                self.retire(entry.connection, entry.state.id, CloseReason::Shutdown)
                    .await;
                break;
            }
        }
        Ok(())
    }

    /// Evicts stale idle connections, then refills to `min_idle`.
    async fn sweep(self: &Arc<Self>) {
        let stale = {
            let now = self.clock.now();
            self.store.lock().take_stale(&self.policy, now)
        };
        if !stale.is_empty() {
            debug!(count = stale.len(), "evicting stale idle connections");
        }
        for (entry, reason) in stale {
            self.retire(entry.connection, entry.state.id, reason.into())
                .await;
        }

        if let Err(error) = self.top_up().await {
            warn!(%error, "failed to replenish idle connections");
        }
    }

    fn status(&self) -> PoolStatus {
        let store = self.store.lock();
        PoolStatus {
            size: store.total(),
            idle: store.idle_len(),
            in_use: store.in_use_len(),
            pending: store.pending(),
            waiting: self.waiting.load(Ordering::Acquire),
            capacity: self.config.capacity,
            closed: store.is_closed(),
        }
    }

    fn is_closed(&self) -> bool {
        self.store.lock().is_closed()
    }
}

fn deadline_after(timeout: Duration) -> Instant {
    const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);
    Instant::now() + timeout.min(FAR_FUTURE)
}

struct Waiting<'a>(&'a AtomicUsize);

impl<'a> Waiting<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for Waiting<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

fn spawn_maintenance_task<M: Manager>(pool: &Arc<PoolInner<M>>) {
    let Some(period) = pool.config.maintenance_interval else {
        return;
    };
    let pool_weak = Arc::downgrade(pool);

    tokio::task::spawn(async move {
        loop {
            tokio::time::sleep(period).await;

            let Some(pool) = pool_weak.upgrade() else {
                break;
            };
            if pool.is_closed() {
                break;
            }
            pool.sweep().await;
        }
    });
}
