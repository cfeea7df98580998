//! # Condition Variables
//!
//! Mesa-style condition variables bound to a [`Lock`]. A signal only makes
//! a waiter runnable; the waiter re-acquires the lock and must re-check its
//! condition. Each waiter blocks on a private zero-valued semaphore, and
//! `signal` picks the waiter whose thread has the highest priority at the
//! moment of the signal.

use alloc::vec::Vec;
use core::fmt;

use crate::arch::Port;
use crate::kernel::Kernel;
use crate::scheduler::Scheduler;
use crate::sync::lock::Lock;
use crate::sync::semaphore::SemaphoreId;
use crate::thread::ThreadId;

/// Identifier of a condition variable in the scheduler's table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CondvarId(pub(crate) u32);

#[derive(Debug, Clone, Copy)]
pub(crate) struct CondWaiter {
    pub(crate) thread: ThreadId,
    pub(crate) sema: SemaphoreId,
}

#[derive(Debug, Default)]
pub struct CondvarState {
    pub(crate) waiters: Vec<CondWaiter>,
}

impl Scheduler {
    pub(crate) fn cond_create(&mut self) -> CondvarId {
        let id = CondvarId(self.next_object_id());
        self.condvars.insert(id, CondvarState::default());
        id
    }

    pub(crate) fn cond_destroy(&mut self, id: CondvarId) {
        self.condvars.remove(&id);
    }

    /// Register the running thread as a waiter on `id`, with a fresh
    /// private semaphore. Returns that semaphore.
    pub(crate) fn cond_enqueue(&mut self, id: CondvarId) -> SemaphoreId {
        let cur = self.current();
        let sema = self.sema_create(0);
        let priority = self.thread(cur).priority;

        let waiters = &self.condvars[&id].waiters;
        let pos = waiters
            .iter()
            .position(|w| self.thread(w.thread).priority < priority)
            .unwrap_or(waiters.len());

        if let Some(state) = self.condvars.get_mut(&id) {
            state.waiters.insert(pos, CondWaiter { thread: cur, sema });
        }
        sema
    }

    /// Remove the highest-priority waiter and return its semaphore.
    pub(crate) fn cond_signal(&mut self, id: CondvarId) -> Option<SemaphoreId> {
        let mut waiters = match self.condvars.get_mut(&id) {
            Some(state) => core::mem::take(&mut state.waiters),
            None => return None,
        };
        waiters.sort_by(|a, b| {
            self.thread(b.thread)
                .priority
                .cmp(&self.thread(a.thread).priority)
        });

        let signalled = if waiters.is_empty() {
            None
        } else {
            Some(waiters.remove(0).sema)
        };

        if let Some(state) = self.condvars.get_mut(&id) {
            state.waiters = waiters;
        }
        signalled
    }

    pub(crate) fn cond_waiters(&self, id: CondvarId) -> Vec<ThreadId> {
        self.condvars
            .get(&id)
            .map(|s| s.waiters.iter().map(|w| w.thread).collect())
            .unwrap_or_default()
    }
}

/// A condition variable. Every operation requires the associated lock to be
/// held by the caller.
pub struct Condvar<P: Port> {
    kernel: Kernel<P>,
    id: CondvarId,
}

impl<P: Port> Condvar<P> {
    pub(crate) fn new(kernel: Kernel<P>) -> Self {
        let id = kernel.with_state(|s| s.cond_create());
        Self { kernel, id }
    }

    pub fn id(&self) -> CondvarId {
        self.id
    }

    /// Atomically release `lock` and wait for a signal, then re-acquire
    /// `lock` before returning.
    ///
    /// # Panics
    /// In interrupt context, or when `lock` is not held by the caller.
    pub fn wait(&self, lock: &Lock<P>) {
        assert!(!self.kernel.in_interrupt(), "condition wait in interrupt context");
        assert!(lock.held_by_current_thread(), "condition wait without holding {:?}", lock.id());

        let sema = self.kernel.with_state(|s| s.cond_enqueue(self.id));
        lock.release();
        self.kernel.sema_down(sema);
        self.kernel.with_state(|s| s.sema_destroy(sema));
        lock.acquire();
    }

    /// Wake the highest-priority waiter, if any. Returns whether a waiter
    /// was woken.
    pub fn signal(&self, lock: &Lock<P>) -> bool {
        assert!(!self.kernel.in_interrupt(), "condition signal in interrupt context");
        assert!(lock.held_by_current_thread(), "condition signal without holding {:?}", lock.id());

        match self.kernel.with_state(|s| s.cond_signal(self.id)) {
            Some(sema) => {
                self.kernel.sema_up(sema);
                true
            }
            None => false,
        }
    }

    /// Wake every waiter.
    pub fn broadcast(&self, lock: &Lock<P>) {
        while self.signal(lock) {}
    }

    /// Threads currently waiting, in wake order at enqueue time.
    pub fn waiters(&self) -> Vec<ThreadId> {
        self.kernel.with_state(|s| s.cond_waiters(self.id))
    }
}

impl<P: Port> Drop for Condvar<P> {
    fn drop(&mut self) {
        self.kernel.with_state(|s| s.cond_destroy(self.id));
    }
}

impl<P: Port> fmt::Debug for Condvar<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Condvar")
            .field("id", &self.id)
            .field("waiters", &self.waiters())
            .finish()
    }
}
