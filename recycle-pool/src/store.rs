//! Bookkeeping of idle and checked-out handles.
//!
//! The store never opens or closes anything. A handle that is being opened,
//! or was just taken from the idle set and is still being vetted, occupies a
//! pending slot so that capacity cannot be overrun while I/O runs outside
//! the lock.

use std::{
    collections::{HashMap, VecDeque},
    time::Instant,
};

use crate::{
    error::CapacityExceeded,
    policy::{RecyclePolicy, RecycleReason},
    state::{ConnectionState, HandleId, HandleState},
};

pub(crate) struct IdleConnection<C> {
    pub(crate) connection: C,
    pub(crate) state: ConnectionState,
}

/// A reserved capacity slot. Must be handed back through `mark_in_use`,
/// `admit_idle` or `release_slot`.
#[must_use]
#[derive(Debug)]
pub(crate) struct Slot(());

/// Returned by `mark_idle` when the handle was not checked out here.
pub(crate) struct Misplaced<C> {
    pub(crate) entry: IdleConnection<C>,
    pub(crate) found: Option<HandleState>,
}

pub(crate) enum Candidate<C> {
    Idle(IdleConnection<C>, Slot),
    Fresh(Slot),
}

pub(crate) struct PoolStore<C> {
    /// Most recently idled at the back; `try_take_idle` pops from the back.
    idle: VecDeque<IdleConnection<C>>,
    in_use: HashMap<HandleId, ConnectionState>,
    pending: usize,
    capacity: Option<usize>,
    closed: bool,
}

impl<C> PoolStore<C> {
    pub(crate) fn new(capacity: Option<usize>) -> Self {
        Self {
            idle: VecDeque::new(),
            in_use: HashMap::new(),
            pending: 0,
            capacity,
            closed: false,
        }
    }

    /// Takes the most recently idled handle. LIFO keeps the hottest
    /// connections in use and lets the rest age out.
    pub(crate) fn try_take_idle(&mut self) -> Option<(IdleConnection<C>, Slot)> {
        let entry = self.idle.pop_back()?;
        self.pending += 1;
        Some((entry, Slot(())))
    }

    pub(crate) fn admit_new(&mut self) -> Result<Slot, CapacityExceeded> {
        match self.capacity {
            Some(capacity) if self.total() >= capacity => Err(CapacityExceeded { capacity }),
            _ => {
                self.pending += 1;
                Ok(Slot(()))
            }
        }
    }

    /// An idle handle if there is one, otherwise a slot for a new connection.
    pub(crate) fn take_idle_or_admit(&mut self) -> Result<Candidate<C>, CapacityExceeded> {
        if let Some((entry, slot)) = self.try_take_idle() {
            return Ok(Candidate::Idle(entry, slot));
        }
        self.admit_new().map(Candidate::Fresh)
    }

    pub(crate) fn mark_in_use(&mut self, slot: Slot, state: ConnectionState) {
        self.consume(slot);
        self.in_use.insert(state.id, state);
    }

    pub(crate) fn admit_idle(&mut self, slot: Slot, entry: IdleConnection<C>) {
        self.consume(slot);
        self.idle.push_back(entry);
    }

    pub(crate) fn mark_idle(&mut self, entry: IdleConnection<C>) -> Result<(), Misplaced<C>> {
        if self.in_use.remove(&entry.state.id).is_none() {
            let found = self.state_of(entry.state.id);
            return Err(Misplaced { entry, found });
        }
        self.idle.push_back(entry);
        Ok(())
    }

    /// Forgets a handle wherever it is. Returns whether it was known.
    pub(crate) fn remove(&mut self, id: HandleId) -> bool {
        if self.in_use.remove(&id).is_some() {
            return true;
        }
        match self.idle.iter().position(|entry| entry.state.id == id) {
            Some(index) => {
                self.idle.remove(index);
                true
            }
            None => false,
        }
    }

    pub(crate) fn release_slot(&mut self, slot: Slot) {
        self.consume(slot);
    }

    /// Pulls every idle handle the policy considers stale at `now`.
    pub(crate) fn take_stale(
        &mut self,
        policy: &RecyclePolicy,
        now: Instant,
    ) -> Vec<(IdleConnection<C>, RecycleReason)> {
        let mut stale = Vec::new();
        let mut fresh = VecDeque::with_capacity(self.idle.len());
        for entry in self.idle.drain(..) {
            match policy.check(&entry.state, now) {
                Some(reason) => stale.push((entry, reason)),
                None => fresh.push_back(entry),
            }
        }
        self.idle = fresh;
        stale
    }

    pub(crate) fn drain_idle(&mut self) -> Vec<IdleConnection<C>> {
        self.idle.drain(..).collect()
    }

    /// Drops bookkeeping for every checked-out handle and returns how many
    /// there were.
    pub(crate) fn forget_in_use(&mut self) -> usize {
        let count = self.in_use.len();
        self.in_use.clear();
        count
    }

    /// Marks the store closed. Returns `false` if it already was.
    pub(crate) fn close(&mut self) -> bool {
        !std::mem::replace(&mut self.closed, true)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn state_of(&self, id: HandleId) -> Option<HandleState> {
        if self.in_use.contains_key(&id) {
            Some(HandleState::CheckedOut)
        } else if self.idle.iter().any(|entry| entry.state.id == id) {
            Some(HandleState::Idle)
        } else {
            None
        }
    }

    pub(crate) fn idle_len(&self) -> usize {
        self.idle.len()
    }

    pub(crate) fn in_use_len(&self) -> usize {
        self.in_use.len()
    }

    pub(crate) fn pending(&self) -> usize {
        self.pending
    }

    pub(crate) fn total(&self) -> usize {
        self.idle.len() + self.in_use.len() + self.pending
    }

    fn consume(&mut self, slot: Slot) {
        let Slot(()) = slot;
        debug_assert!(self.pending > 0, "slot returned to a store with none pending");
        self.pending = self.pending.saturating_sub(1);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn entry(name: &'static str, now: Instant) -> IdleConnection<&'static str> {
        let mut state = ConnectionState::new(now);
        state.set_idle(now);
        IdleConnection {
            connection: name,
            state,
        }
    }

    fn check_out(store: &mut PoolStore<&'static str>) -> IdleConnection<&'static str> {
        let (entry, slot) = store.try_take_idle().unwrap();
        store.mark_in_use(slot, entry.state.clone());
        entry
    }

    #[test]
    fn admit_respects_capacity() {
        let now = Instant::now();
        let mut store = PoolStore::new(Some(2));

        let a = store.admit_new().unwrap();
        store.admit_idle(a, entry("a", now));
        let _b = store.admit_new().unwrap();

        assert_eq!(store.admit_new().unwrap_err(), CapacityExceeded { capacity: 2 });
        assert_eq!(store.total(), 2);
    }

    #[test]
    fn unbounded_store_always_admits() {
        let mut store = PoolStore::<()>::new(None);
        let slots: Vec<_> = (0..1000).map(|_| store.admit_new().unwrap()).collect();
        assert_eq!(store.pending(), 1000);
        for slot in slots {
            store.release_slot(slot);
        }
        assert_eq!(store.total(), 0);
    }

    #[test]
    fn idle_handles_come_back_most_recent_first() {
        let now = Instant::now();
        let mut store = PoolStore::new(Some(3));
        for name in ["first", "second", "third"] {
            let slot = store.admit_new().unwrap();
            store.admit_idle(slot, entry(name, now));
        }

        let (taken, slot) = store.try_take_idle().unwrap();
        assert_eq!(taken.connection, "third");
        // a taken handle still holds its capacity slot
        assert_eq!(store.total(), 3);
        store.release_slot(slot);
        assert_eq!(store.total(), 2);
    }

    #[test]
    fn second_mark_idle_is_rejected_without_side_effects() {
        let now = Instant::now();
        let mut store = PoolStore::new(Some(1));
        let slot = store.admit_new().unwrap();
        store.admit_idle(slot, entry("a", now));

        let out = check_out(&mut store);
        let id = out.state.id;
        let again = IdleConnection {
            connection: out.connection,
            state: out.state.clone(),
        };
        assert!(store.mark_idle(out).is_ok());
        assert_eq!(store.state_of(id), Some(HandleState::Idle));

        let misplaced = store.mark_idle(again).err().unwrap();
        assert_eq!(misplaced.found, Some(HandleState::Idle));
        assert_eq!(store.idle_len(), 1);
        assert_eq!(store.in_use_len(), 0);
    }

    #[test]
    fn remove_frees_capacity_from_either_set() {
        let now = Instant::now();
        let mut store = PoolStore::new(Some(2));
        for name in ["a", "b"] {
            let slot = store.admit_new().unwrap();
            store.admit_idle(slot, entry(name, now));
        }
        let out = check_out(&mut store);
        let idle_id = store.idle.front().unwrap().state.id;

        assert!(store.remove(out.state.id));
        assert!(store.remove(idle_id));
        assert!(!store.remove(idle_id));
        assert_eq!(store.total(), 0);
    }

    #[test]
    fn take_stale_keeps_fresh_handles_in_order() {
        let t0 = Instant::now();
        let mut store = PoolStore::new(None);
        let old = entry("old", t0);
        let slot = store.admit_new().unwrap();
        store.admit_idle(slot, old);
        for name in ["x", "y"] {
            let slot = store.admit_new().unwrap();
            store.admit_idle(slot, entry(name, t0 + Duration::from_secs(5)));
        }

        let policy = RecyclePolicy::new(None, Some(Duration::from_secs(3)));
        let stale = store.take_stale(&policy, t0 + Duration::from_secs(6));

        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].0.connection, "old");
        assert_eq!(stale[0].1, RecycleReason::IdleExpired);
        let remaining: Vec<_> = store.idle.iter().map(|e| e.connection).collect();
        assert_eq!(remaining, vec!["x", "y"]);
    }

    #[test]
    fn close_is_reported_once() {
        let mut store = PoolStore::<()>::new(Some(1));
        assert!(store.close());
        assert!(!store.close());
        assert!(store.is_closed());
    }
}
