//! A bounded producer/consumer queue with two-phase reservation.
//!
//! Unlike a plain bounded channel, a slot stays occupied from the moment a
//! producer reserves it until the consumer explicitly dereserves it after
//! finishing work on the popped item — the consumer "holds" capacity while
//! processing, not just while the item sits in the queue. This is what lets
//! the hybrid merge strategy apply external back-pressure on in-flight leaf
//! priority queues: a worker that popped an LPQ to merge it keeps that
//! capacity slot occupied for the whole merge, not just the handoff.
//!
//! The reserve/push and pop/dereserve pairs are split into two calls each,
//! with the intermediate state (`Reservation`, `Lease`) represented as a
//! value the caller must hand back — so the two-phase protocol can't be
//! accidentally skipped.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

/// Proof that a slot has been claimed. Dropping one without calling
/// `push_reserved` leaks its occupied capacity for the life of the queue;
/// callers that reserve are expected to always follow through.
pub struct Reservation(());
pub struct Lease(());

struct State<T> {
    queued: VecDeque<T>,
    reserved: usize,
    leased: usize,
}

impl<T> State<T> {
    fn occupied(&self) -> usize {
        self.reserved + self.queued.len() + self.leased
    }
}

pub struct ReservationQueue<T> {
    capacity: usize,
    state: Mutex<State<T>>,
    space_available: Condvar,
    item_available: Condvar,
}

impl<T> ReservationQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(State {
                queued: VecDeque::new(),
                reserved: 0,
                leased: 0,
            }),
            space_available: Condvar::new(),
            item_available: Condvar::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().queued.len()
    }

    /// Block until a slot is free, then claim it. The caller must follow up
    /// with `push_reserved` to actually deposit an item (or simply drop the
    /// `Reservation` to give the slot back without publishing anything).
    pub fn wait_and_reserve(&self) -> Reservation {
        let mut state = self.state.lock().unwrap();
        while state.occupied() >= self.capacity {
            tracing::trace!(capacity = self.capacity, "parking on reservation queue awaiting a free slot");
            state = self.space_available.wait(state).unwrap();
            tracing::trace!("woke from reservation queue space_available condvar");
        }
        state.reserved += 1;
        Reservation(())
    }

    pub fn push_reserved(&self, _reservation: Reservation, item: T) {
        let mut state = self.state.lock().unwrap();
        state.reserved -= 1;
        state.queued.push_back(item);
        self.item_available.notify_one();
    }

    /// Block until an item is available and take it, without freeing its
    /// capacity slot. The caller must follow up with `dereserve` once
    /// finished processing the item.
    pub fn wait_and_pop_without_dereserve(&self) -> (T, Lease) {
        let mut state = self.state.lock().unwrap();
        while state.queued.is_empty() {
            tracing::trace!("parking on reservation queue awaiting an item");
            state = self.item_available.wait(state).unwrap();
            tracing::trace!("woke from reservation queue item_available condvar");
        }
        let item = state.queued.pop_front().unwrap();
        state.leased += 1;
        (item, Lease(()))
    }

    pub fn dereserve(&self, _lease: Lease) {
        let mut state = self.state.lock().unwrap();
        state.leased -= 1;
        self.space_available.notify_one();
    }
}
