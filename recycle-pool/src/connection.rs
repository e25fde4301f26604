use std::{
    fmt,
    ops::{Deref, DerefMut},
    sync::Arc,
    time::Instant,
};

use crate::{
    guard::CheckoutGuard,
    manager::Manager,
    pool::PoolInner,
    state::{ConnectionState, HandleId},
    store::IdleConnection,
};

/// A checked-out connection, exclusively owned by the caller.
///
/// Give it back with [`Pool::release`](crate::Pool::release). Dropping it
/// checks it in as well; a broken one is then closed on a spawned task.
pub struct PooledConnection<M: Manager> {
    connection: Option<M::Connection>,
    state: ConnectionState,
    broken: bool,
    guard: Option<CheckoutGuard<M>>,
}

impl<M: Manager> PooledConnection<M> {
    pub(crate) fn new(entry: IdleConnection<M::Connection>, guard: CheckoutGuard<M>) -> Self {
        Self {
            connection: Some(entry.connection),
            state: entry.state,
            broken: false,
            guard: Some(guard),
        }
    }

    pub fn id(&self) -> HandleId {
        self.state.id
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn created_at(&self) -> Instant {
        self.state.created_at
    }

    pub fn last_checkout_at(&self) -> Option<Instant> {
        self.state.last_checkout_at
    }

    pub fn use_count(&self) -> u64 {
        self.state.use_count
    }

    /// Reports the connection as unusable; it is closed instead of reused.
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }

    pub fn is_broken(&self) -> bool {
        self.broken
    }

    pub(crate) fn belongs_to(&self, pool: &Arc<PoolInner<M>>) -> bool {
        self.guard
            .as_ref()
            .map_or(false, |guard| Arc::ptr_eq(guard.pool(), pool))
    }

    pub(crate) fn into_parts(
        mut self,
    ) -> Option<(M::Connection, ConnectionState, bool, CheckoutGuard<M>)> {
        let connection = self.connection.take()?;
        let guard = self.guard.take()?;
        Some((connection, self.state.clone(), self.broken, guard))
    }
}

impl<M: Manager> Deref for PooledConnection<M> {
    type Target = M::Connection;

    fn deref(&self) -> &Self::Target {
        self.connection
            .as_ref()
            .expect("connection already returned")
    }
}

impl<M: Manager> DerefMut for PooledConnection<M> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.connection
            .as_mut()
            .expect("connection already returned")
    }
}

impl<M: Manager> fmt::Debug for PooledConnection<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.state.id)
            .field("use_count", &self.state.use_count)
            .field("broken", &self.broken)
            .finish()
    }
}

impl<M: Manager> Drop for PooledConnection<M> {
    fn drop(&mut self) {
        if let (Some(connection), Some(guard)) = (self.connection.take(), self.guard.take()) {
            let pool = guard.pool().clone();
            pool.check_in_detached(connection, self.state.clone(), self.broken);
            drop(guard);
        }
    }
}
