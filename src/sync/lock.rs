//! # Locks
//!
//! A lock is a binary semaphore with an owner. Only the holder may release
//! it, and a thread may not acquire a lock it already holds. Under the
//! priority scheduler a thread that blocks on a held lock donates its
//! priority to the holder (see [`crate::donation`]).

use core::fmt;

use crate::arch::Port;
use crate::kernel::Kernel;
use crate::scheduler::Scheduler;
use crate::sync::semaphore::SemaphoreId;
use crate::thread::{ThreadId, ThreadStatus};

/// Identifier of a lock in the scheduler's table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LockId(pub(crate) u32);

/// Scheduler-side lock state.
#[derive(Debug)]
pub struct LockState {
    /// Binary semaphore guarding the lock, 1 when free.
    pub(crate) sema: SemaphoreId,
    pub(crate) holder: Option<ThreadId>,
}

// ---------------------------------------------------------------------------
// State operations
// ---------------------------------------------------------------------------

impl Scheduler {
    pub(crate) fn lock_create(&mut self) -> LockId {
        let sema = self.sema_create(1);
        let id = LockId(self.next_object_id());
        self.locks.insert(id, LockState { sema, holder: None });
        id
    }

    pub(crate) fn lock_destroy(&mut self, id: LockId) {
        if let Some(state) = self.locks.remove(&id) {
            self.sema_destroy(state.sema);
        }
    }

    pub(crate) fn lock_state(&self, id: LockId) -> &LockState {
        self.locks
            .get(&id)
            .unwrap_or_else(|| panic!("{:?} does not exist", id))
    }

    pub fn lock_holder(&self, id: LockId) -> Option<ThreadId> {
        self.locks.get(&id).and_then(|l| l.holder)
    }

    /// Make the running thread the holder of `id`, whose semaphore it has
    /// just decremented.
    ///
    /// Threads still queued on the lock now wait on the new holder, so they
    /// become its donors.
    pub(crate) fn lock_grant(&mut self, id: LockId) {
        let cur = self.current();
        let sema = self.lock_state(id).sema;
        if let Some(l) = self.locks.get_mut(&id) {
            l.holder = Some(cur);
        }
        self.thread_mut(cur).wait_on_lock = None;

        if !self.config.mlfqs {
            let waiters = self.sema_waiters(sema).to_vec();
            for w in waiters {
                self.add_donor(cur, w);
            }
            self.refresh_priority(cur);
        }
    }

    /// Give up `id`. Returns the semaphore to raise.
    pub(crate) fn lock_release(&mut self, id: LockId) -> SemaphoreId {
        let cur = self.current();
        if let Some(l) = self.locks.get_mut(&id) {
            l.holder = None;
        }
        if !self.config.mlfqs {
            self.remove_donors_for(cur, id);
            self.refresh_priority(cur);
        }
        self.lock_state(id).sema
    }
}

// ---------------------------------------------------------------------------
// Kernel operations
// ---------------------------------------------------------------------------

impl<P: Port> Kernel<P> {
    pub(crate) fn lock_acquire(&self, id: LockId) {
        assert!(!self.in_interrupt(), "lock acquire in interrupt context");
        let (cur, holder, sema) =
            self.with_state(|s| (s.current(), s.lock_holder(id), s.lock_state(id).sema));
        assert!(holder != Some(cur), "{} acquiring {:?} it already holds", cur, id);

        while self.reschedule(ThreadStatus::Blocked, |s| {
            if s.sema_try_down(sema) {
                s.lock_grant(id);
                false
            } else {
                s.donate(id);
                s.sema_enqueue(sema);
                true
            }
        }) {}
    }

    pub(crate) fn lock_try_acquire(&self, id: LockId) -> bool {
        let (cur, holder) = self.with_state(|s| (s.current(), s.lock_holder(id)));
        assert!(holder != Some(cur), "{} acquiring {:?} it already holds", cur, id);

        self.with_state(|s| {
            let sema = s.lock_state(id).sema;
            if s.sema_try_down(sema) {
                s.lock_grant(id);
                true
            } else {
                false
            }
        })
    }

    pub(crate) fn lock_release(&self, id: LockId) {
        let (cur, holder) = self.with_state(|s| (s.current(), s.lock_holder(id)));
        assert!(
            holder == Some(cur),
            "{} releasing {:?} held by {:?}",
            cur,
            id,
            holder
        );

        self.with_state(|s| {
            let sema = s.lock_release(id);
            s.sema_up(sema);
        });
        // Losing donated priority may leave a ready thread above us.
        self.check_preemption();
    }

    pub(crate) fn lock_held_by_current(&self, id: LockId) -> bool {
        self.with_state(|s| s.lock_holder(id) == Some(s.current()))
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// A non-recursive mutual-exclusion lock.
pub struct Lock<P: Port> {
    kernel: Kernel<P>,
    id: LockId,
}

impl<P: Port> Lock<P> {
    pub(crate) fn new(kernel: Kernel<P>) -> Self {
        let id = kernel.with_state(|s| s.lock_create());
        Self { kernel, id }
    }

    pub fn id(&self) -> LockId {
        self.id
    }

    /// Block until the lock is free, then take it.
    ///
    /// # Panics
    /// In interrupt context, or when the caller already holds the lock.
    pub fn acquire(&self) {
        self.kernel.lock_acquire(self.id);
    }

    /// Take the lock only if it is free. Never blocks.
    pub fn try_acquire(&self) -> bool {
        self.kernel.lock_try_acquire(self.id)
    }

    /// # Panics
    /// When the caller is not the holder.
    pub fn release(&self) {
        self.kernel.lock_release(self.id);
    }

    pub fn held_by_current_thread(&self) -> bool {
        self.kernel.lock_held_by_current(self.id)
    }

    pub fn holder(&self) -> Option<ThreadId> {
        self.kernel.with_state(|s| s.lock_holder(self.id))
    }
}

impl<P: Port> Drop for Lock<P> {
    fn drop(&mut self) {
        self.kernel.with_state(|s| s.lock_destroy(self.id));
    }
}

impl<P: Port> fmt::Debug for Lock<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lock")
            .field("id", &self.id)
            .field("holder", &self.holder())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
