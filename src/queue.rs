//! Generic bounded, pre-allocated producer/consumer ring (spec §4.1).
//!
//! Slot payloads live outside the bookkeeping lock so a producer or
//! consumer can do expensive work (decoding into a slot, scaling pixels)
//! without holding it — only the free/used index lists are guarded.
//! Exclusive access to a given slot's payload is guaranteed by
//! construction: a slot index only ever appears in one of `free`/`used` at
//! a time, and only the thread holding the matching guard touches its cell.
//!
//! The free/used lists themselves are guarded by the *engine's* shared
//! state mutex, not a mutex private to this queue. parking_lot's `Condvar`
//! panics if it is ever waited on with more than one distinct mutex, and
//! the engine shares a single condvar across every queue plus
//! `SharedState` (spec §3 "a separate queue mutex plus one condition
//! variable guards all engine state"; spec §9). So every `BoundedQueue`
//! defers to the same `Arc<Mutex<SharedState>>` the engine already holds,
//! rather than owning its own ring lock — that is the one mutex the shared
//! condvar is ever paired with.
//!
//! Guards own a cloned `Arc<BoundedQueue<T>>` rather than borrowing the
//! queue, so a slot can be handed across an API boundary (the renderer's
//! `render_frame` → host → `release_frame` round trip) without a
//! self-referential lifetime.

use std::cell::UnsafeCell;
use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::engine::SharedState;
use crate::error::{EngineError, Result};

/// Outcome of a caller-supplied predicate evaluated while holding the
/// shared state lock (spec §4.1 "Predicate semantics").
pub enum Predicate<Tag> {
    /// Proceed now if a slot is available.
    Test,
    /// A slot may be available but the caller should keep waiting anyway
    /// (used to suspend decode while paused).
    Wait,
    /// Abort the operation, handing `tag` back to the caller.
    Skip(Tag),
}

struct Slot<T> {
    cell: UnsafeCell<T>,
}

// SAFETY: a slot index is never present in both `free` and `used` at once,
// and only the thread holding the corresponding guard dereferences its cell.
unsafe impl<T: Send> Send for Slot<T> {}
unsafe impl<T: Send> Sync for Slot<T> {}

struct Ring {
    free: VecDeque<usize>,
    used: VecDeque<usize>,
}

/// A fixed-capacity ring of pre-allocated elements with interruptible,
/// predicate-gated push/pop (spec §4.1).
///
/// `ring`'s bookkeeping is guarded by `shared`, not by a lock of its own —
/// see the module doc comment for why.
pub struct BoundedQueue<T> {
    slots: Vec<Slot<T>>,
    ring: UnsafeCell<Ring>,
    shared: Arc<Mutex<SharedState>>,
    cv: Arc<Condvar>,
    capacity: usize,
}

// SAFETY: `ring` is only ever accessed while holding `shared`'s lock (see
// every method below), so `BoundedQueue<T>` is as thread-safe as a type
// wrapping its payload in a `Mutex` would be, for `T: Send`.
unsafe impl<T: Send> Send for BoundedQueue<T> {}
unsafe impl<T: Send> Sync for BoundedQueue<T> {}

/// A writable handle on a freshly claimed slot. Dropping it without calling
/// [`push_finish`] leaks the slot out of circulation — callers must always
/// pair `push_start` with `push_finish`.
pub struct WriteGuard<T> {
    queue: Arc<BoundedQueue<T>>,
    slot: usize,
}

/// A readable (and, for in-place reuse, writable) handle on a popped slot.
/// Must be paired with [`pop_finish`].
pub struct ReadGuard<T> {
    queue: Arc<BoundedQueue<T>>,
    slot: usize,
}

impl<T> Deref for WriteGuard<T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.queue.slots[self.slot].cell.get() }
    }
}

impl<T> DerefMut for WriteGuard<T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.queue.slots[self.slot].cell.get() }
    }
}

impl<T> Deref for ReadGuard<T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.queue.slots[self.slot].cell.get() }
    }
}

impl<T> DerefMut for ReadGuard<T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.queue.slots[self.slot].cell.get() }
    }
}

impl<T> BoundedQueue<T> {
    /// Allocates `capacity` slots by calling `allocate(index)` for each,
    /// sharing `shared` and `cv` with every other queue and the engine
    /// itself (spec §4.1 "shared mutex + condition-variable handles"; spec
    /// §9 "shared condition variable across queues").
    pub fn new<F>(
        capacity: usize,
        shared: Arc<Mutex<SharedState>>,
        cv: Arc<Condvar>,
        mut allocate: F,
    ) -> Result<Arc<Self>>
    where
        F: FnMut(usize) -> Result<T>,
    {
        let mut slots = Vec::with_capacity(capacity);
        for i in 0..capacity {
            let payload = allocate(i).map_err(|e| {
                EngineError::AllocFailed(format!("slot {i}: {e}"))
            })?;
            slots.push(Slot {
                cell: UnsafeCell::new(payload),
            });
        }
        Ok(Arc::new(Self {
            slots,
            ring: UnsafeCell::new(Ring {
                free: (0..capacity).collect(),
                used: VecDeque::new(),
            }),
            shared,
            cv,
            capacity,
        }))
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of slots currently free, under the shared lock. Exposed for
    /// the `free + used == capacity` invariant tests (spec §8).
    pub fn counts(&self) -> (usize, usize) {
        let _g = self.shared.lock();
        // SAFETY: `_g` holds the one lock `ring` is ever accessed under.
        let ring = unsafe { &*self.ring.get() };
        (ring.free.len(), ring.used.len())
    }

    /// Blocks until a free slot exists and `check` returns `Test`, or until
    /// `check` returns `Skip`/keeps returning `Wait`. `check` receives the
    /// already-locked `SharedState` rather than re-locking it, since the
    /// shared condvar may only ever be paired with the one mutex this
    /// method is already holding.
    pub fn push_start<Tag>(
        queue: &Arc<Self>,
        mut check: impl FnMut(&SharedState) -> Predicate<Tag>,
    ) -> std::result::Result<WriteGuard<T>, Tag> {
        let mut guard = queue.shared.lock();
        loop {
            match check(&guard) {
                Predicate::Skip(tag) => return Err(tag),
                Predicate::Wait => queue.cv.wait(&mut guard),
                Predicate::Test => {
                    // SAFETY: `guard` holds the one lock `ring` is ever
                    // accessed under.
                    let ring = unsafe { &mut *queue.ring.get() };
                    if let Some(slot) = ring.free.pop_front() {
                        return Ok(WriteGuard {
                            queue: queue.clone(),
                            slot,
                        });
                    }
                    queue.cv.wait(&mut guard);
                }
            }
        }
    }

    /// Publishes a slot claimed by `push_start`, waking every waiter.
    pub fn push_finish(guard: WriteGuard<T>) {
        let mut g = guard.queue.shared.lock();
        // SAFETY: `g` holds the one lock `ring` is ever accessed under.
        let ring = unsafe { &mut *guard.queue.ring.get() };
        ring.used.push_back(guard.slot);
        let cv = guard.queue.cv.clone();
        drop(g);
        std::mem::forget(guard);
        cv.notify_all();
    }

    /// Symmetric to [`Self::push_start`] over the non-empty condition.
    pub fn pop_start<Tag>(
        queue: &Arc<Self>,
        mut check: impl FnMut(&SharedState) -> Predicate<Tag>,
    ) -> std::result::Result<ReadGuard<T>, Tag> {
        let mut guard = queue.shared.lock();
        loop {
            match check(&guard) {
                Predicate::Skip(tag) => return Err(tag),
                Predicate::Wait => queue.cv.wait(&mut guard),
                Predicate::Test => {
                    // SAFETY: `guard` holds the one lock `ring` is ever
                    // accessed under.
                    let ring = unsafe { &mut *queue.ring.get() };
                    if let Some(slot) = ring.used.pop_front() {
                        return Ok(ReadGuard {
                            queue: queue.clone(),
                            slot,
                        });
                    }
                    queue.cv.wait(&mut guard);
                }
            }
        }
    }

    /// Releases a slot claimed by `pop_start` back into the free ring.
    pub fn pop_finish(guard: ReadGuard<T>) {
        let mut g = guard.queue.shared.lock();
        // SAFETY: `g` holds the one lock `ring` is ever accessed under.
        let ring = unsafe { &mut *guard.queue.ring.get() };
        ring.free.push_back(guard.slot);
        let cv = guard.queue.cv.clone();
        drop(g);
        std::mem::forget(guard);
        cv.notify_all();
    }

    /// Non-blocking drain primitive used by FLUSH/STOP: pops one used slot
    /// without waiting or evaluating a predicate.
    pub fn pop_start_nonblocking(queue: &Arc<Self>) -> Option<ReadGuard<T>> {
        let _g = queue.shared.lock();
        // SAFETY: `_g` holds the one lock `ring` is ever accessed under.
        let ring = unsafe { &mut *queue.ring.get() };
        ring.used.pop_front().map(|slot| ReadGuard {
            queue: queue.clone(),
            slot,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    fn shared_state() -> (Arc<Mutex<SharedState>>, Arc<Condvar>) {
        (
            Arc::new(Mutex::new(SharedState::new(Instant::now()))),
            Arc::new(Condvar::new()),
        )
    }

    #[test]
    fn free_plus_used_equals_capacity() {
        let (shared, cv) = shared_state();
        let q = BoundedQueue::<i32>::new(4, shared, cv, |i| Ok(i as i32)).unwrap();
        let (free, used) = q.counts();
        assert_eq!(free + used, 4);
        assert_eq!(free, 4);

        let g = BoundedQueue::push_start::<()>(&q, |_| Predicate::Test).unwrap();
        BoundedQueue::push_finish(g);
        let (free, used) = q.counts();
        assert_eq!(free + used, 4);
        assert_eq!(used, 1);
    }

    #[test]
    fn push_then_pop_round_trips_payload() {
        let (shared, cv) = shared_state();
        let q = BoundedQueue::<i32>::new(2, shared, cv, |_| Ok(0)).unwrap();

        let mut w = BoundedQueue::push_start::<()>(&q, |_| Predicate::Test).unwrap();
        *w = 42;
        BoundedQueue::push_finish(w);

        let r = BoundedQueue::pop_start::<()>(&q, |_| Predicate::Test).unwrap();
        assert_eq!(*r, 42);
        BoundedQueue::pop_finish(r);

        let (free, used) = q.counts();
        assert_eq!((free, used), (2, 0));
    }

    #[test]
    fn skip_predicate_propagates_tag() {
        let (shared, cv) = shared_state();
        let q = BoundedQueue::<i32>::new(1, shared, cv, |_| Ok(0)).unwrap();
        let result = BoundedQueue::push_start(&q, |_| Predicate::Skip("stop"));
        assert_eq!(result.err(), Some("stop"));
    }

    #[test]
    fn nonblocking_pop_drains_without_waiting() {
        let (shared, cv) = shared_state();
        let q = BoundedQueue::<i32>::new(2, shared, cv, |i| Ok(i as i32)).unwrap();
        assert!(BoundedQueue::pop_start_nonblocking(&q).is_none());

        let w = BoundedQueue::push_start::<()>(&q, |_| Predicate::Test).unwrap();
        BoundedQueue::push_finish(w);

        let r = BoundedQueue::pop_start_nonblocking(&q).unwrap();
        BoundedQueue::pop_finish(r);
        assert!(BoundedQueue::pop_start_nonblocking(&q).is_none());
    }
}
