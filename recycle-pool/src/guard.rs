use std::sync::Arc;

use tokio::sync::SemaphorePermit;

use crate::{
    event::CloseReason,
    manager::Manager,
    pool::PoolInner,
    store::{IdleConnection, Slot},
};

/// Owns one forgotten semaphore permit and, while a connection is being
/// vetted or opened, its store slot. Dropping it gives both back, which is
/// what makes a cancelled `acquire` leave no trace.
///
/// An idle connection taken for vetting rides along in `candidate`; if the
/// guard is dropped before the vetting settles, the connection goes back to
/// the idle queue untouched.
pub(crate) struct CheckoutGuard<M: Manager> {
    pool: Arc<PoolInner<M>>,
    slot: Option<Slot>,
    candidate: Option<IdleConnection<M::Connection>>,
}

impl<M: Manager> CheckoutGuard<M> {
    pub(crate) fn from_permit(pool: Arc<PoolInner<M>>, permit: SemaphorePermit<'_>) -> Self {
        permit.forget();
        Self {
            pool,
            slot: None,
            candidate: None,
        }
    }

    pub(crate) fn hold(&mut self, slot: Slot) {
        debug_assert!(self.slot.is_none(), "guard already holds a slot");
        self.slot = Some(slot);
    }

    pub(crate) fn hold_idle(&mut self, slot: Slot, entry: IdleConnection<M::Connection>) {
        self.hold(slot);
        self.candidate = Some(entry);
    }

    pub(crate) fn candidate(&self) -> Option<&IdleConnection<M::Connection>> {
        self.candidate.as_ref()
    }

    pub(crate) fn candidate_mut(&mut self) -> Option<&mut IdleConnection<M::Connection>> {
        self.candidate.as_mut()
    }

    /// Takes the candidate out, leaving the slot behind for a replacement.
    pub(crate) fn take_candidate(&mut self) -> Option<IdleConnection<M::Connection>> {
        self.candidate.take()
    }

    pub(crate) fn take_slot(&mut self) -> Option<Slot> {
        self.slot.take()
    }

    pub(crate) fn pool(&self) -> &Arc<PoolInner<M>> {
        &self.pool
    }
}

impl<M: Manager> Drop for CheckoutGuard<M> {
    fn drop(&mut self) {
        let candidate = self.candidate.take();

        if let Some(slot) = self.slot.take() {
            let (orphan, closed) = {
                let mut store = self.pool.store.lock();
                let closed = store.is_closed();
                match candidate {
                    Some(entry) if !closed => {
                        store.admit_idle(slot, entry);
                        (None, closed)
                    }
                    other => {
                        store.release_slot(slot);
                        (other, closed)
                    }
                }
            };

            if let Some(entry) = orphan {
                self.pool
                    .retire_detached(entry.connection, entry.state.id, CloseReason::Shutdown);
            }
            if closed {
                // shutdown counts pending slots as outstanding
                self.pool.checked_in.notify_waiters();
            }
        } else if let Some(entry) = candidate {
            self.pool
                .retire_detached(entry.connection, entry.state.id, CloseReason::Shutdown);
        }

        self.pool.semaphore.add_permits(1);
    }
}
