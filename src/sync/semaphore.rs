//! # Semaphores
//!
//! Counting semaphores with priority-ordered wakeup. `down` may block and is
//! therefore forbidden in interrupt context; `up` and `try_down` are safe
//! from the timer interrupt.

use alloc::vec::Vec;
use core::fmt;

use crate::arch::Port;
use crate::kernel::Kernel;
use crate::scheduler::Scheduler;
use crate::thread::{Queue, ThreadId, ThreadStatus};

/// Identifier of a semaphore in the scheduler's table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SemaphoreId(pub(crate) u32);

/// Scheduler-side semaphore state.
#[derive(Debug, Default)]
pub struct SemaphoreState {
    pub(crate) value: u32,
    /// Blocked `down` callers, highest priority first at enqueue time.
    pub(crate) waiters: Vec<ThreadId>,
}

// ---------------------------------------------------------------------------
// State operations
// ---------------------------------------------------------------------------

impl Scheduler {
    pub(crate) fn sema_create(&mut self, value: u32) -> SemaphoreId {
        let id = SemaphoreId(self.next_object_id());
        self.semaphores.insert(
            id,
            SemaphoreState {
                value,
                waiters: Vec::new(),
            },
        );
        id
    }

    pub(crate) fn sema_destroy(&mut self, id: SemaphoreId) {
        self.semaphores.remove(&id);
    }

    fn sema(&mut self, id: SemaphoreId) -> &mut SemaphoreState {
        self.semaphores
            .get_mut(&id)
            .unwrap_or_else(|| panic!("{:?} does not exist", id))
    }

    pub(crate) fn sema_value(&self, id: SemaphoreId) -> u32 {
        self.semaphores.get(&id).map_or(0, |s| s.value)
    }

    pub(crate) fn sema_waiters(&self, id: SemaphoreId) -> &[ThreadId] {
        self.semaphores.get(&id).map_or(&[], |s| &s.waiters[..])
    }

    /// Decrement if positive, without blocking.
    pub(crate) fn sema_try_down(&mut self, id: SemaphoreId) -> bool {
        let state = self.sema(id);
        if state.value > 0 {
            state.value -= 1;
            true
        } else {
            false
        }
    }

    /// Queue the running thread on `id` behind every waiter of equal or
    /// higher priority. The caller blocks it afterwards.
    pub(crate) fn sema_enqueue(&mut self, id: SemaphoreId) {
        let cur = self.current();
        self.thread_mut(cur).enter_queue(Queue::Semaphore(id));
        let priority = self.thread(cur).priority;

        let pos = {
            let waiters = &self.semaphores[&id].waiters;
            waiters
                .iter()
                .position(|&t| self.thread(t).priority < priority)
                .unwrap_or(waiters.len())
        };
        self.sema(id).waiters.insert(pos, cur);
    }

    /// Increment and wake the highest-priority waiter, if any.
    ///
    /// Waiter priorities may have changed through donation since they
    /// queued, so the list is re-sorted (stably) first.
    pub(crate) fn sema_up(&mut self, id: SemaphoreId) -> Option<ThreadId> {
        let mut waiters = core::mem::take(&mut self.sema(id).waiters);
        waiters.sort_by(|&a, &b| self.thread(b).priority.cmp(&self.thread(a).priority));

        let woken = if waiters.is_empty() {
            None
        } else {
            Some(waiters.remove(0))
        };

        let state = self.sema(id);
        state.waiters = waiters;
        state.value += 1;

        if let Some(tid) = woken {
            self.thread_mut(tid).leave_queue(Queue::Semaphore(id));
            self.unblock(tid);
        }
        woken
    }
}

// ---------------------------------------------------------------------------
// Kernel operations
// ---------------------------------------------------------------------------

impl<P: Port> Kernel<P> {
    /// Wait for the semaphore to become positive, then decrement it.
    pub(crate) fn sema_down(&self, id: SemaphoreId) {
        assert!(!self.in_interrupt(), "semaphore down in interrupt context");

        // A woken waiter competes again; someone may have taken the unit
        // between the up and our dispatch.
        while self.reschedule(ThreadStatus::Blocked, |s| {
            if s.sema_try_down(id) {
                false
            } else {
                s.sema_enqueue(id);
                true
            }
        }) {}
    }

    pub(crate) fn sema_try_down(&self, id: SemaphoreId) -> bool {
        self.with_state(|s| s.sema_try_down(id))
    }

    /// Increment, wake one waiter, and yield if it outranks the caller.
    pub(crate) fn sema_up(&self, id: SemaphoreId) {
        self.with_state(|s| s.sema_up(id));
        self.check_preemption();
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// A counting semaphore: a nonnegative integer with atomic `down` and `up`.
pub struct Semaphore<P: Port> {
    kernel: Kernel<P>,
    id: SemaphoreId,
}

impl<P: Port> Semaphore<P> {
    pub(crate) fn new(kernel: Kernel<P>, value: u32) -> Self {
        let id = kernel.with_state(|s| s.sema_create(value));
        Self { kernel, id }
    }

    pub fn id(&self) -> SemaphoreId {
        self.id
    }

    /// "P": wait for the value to become positive, then decrement it.
    ///
    /// # Panics
    /// In interrupt context.
    pub fn down(&self) {
        self.kernel.sema_down(self.id);
    }

    /// Decrement only if the value is positive. Returns whether it was.
    pub fn try_down(&self) -> bool {
        self.kernel.sema_try_down(self.id)
    }

    /// "V": increment the value and wake the highest-priority waiter.
    pub fn up(&self) {
        self.kernel.sema_up(self.id);
    }

    /// Current value, for diagnostics.
    pub fn value(&self) -> u32 {
        self.kernel.with_state(|s| s.sema_value(self.id))
    }

    /// Threads currently blocked in `down`.
    pub fn waiters(&self) -> Vec<ThreadId> {
        self.kernel.with_state(|s| s.sema_waiters(self.id).to_vec())
    }
}

impl<P: Port> Drop for Semaphore<P> {
    fn drop(&mut self) {
        self.kernel.with_state(|s| s.sema_destroy(self.id));
    }
}

impl<P: Port> fmt::Debug for Semaphore<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Semaphore")
            .field("id", &self.id)
            .field("value", &self.value())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
