//! # Alarm
//!
//! Tick-driven sleeping. A sleeping thread is blocked on the sleep list
//! with its wake tick recorded; the timer interrupt scans the list on every
//! tick and unblocks each thread whose tick has come, in the order the
//! threads went to sleep.

use alloc::vec::Vec;

use crate::arch::Port;
use crate::kernel::Kernel;
use crate::scheduler::Scheduler;
use crate::thread::{Queue, ThreadId, ThreadStatus};

impl Scheduler {
    /// Put the running thread on the sleep list until tick `wake`. The
    /// caller blocks it afterwards.
    pub(crate) fn sleep_enqueue(&mut self, wake: u64) {
        let cur = self.current();
        assert!(!self.is_idle(cur), "idle thread cannot sleep");

        let t = self.thread_mut(cur);
        t.enter_queue(Queue::Sleep);
        t.wakeup_tick = wake;
        self.sleepers.push(cur);
    }

    /// Unblock every sleeper whose wake tick is at or before the current
    /// tick. Returns `true` when one of them outranks the running thread.
    pub(crate) fn wake_sleepers(&mut self) -> bool {
        let now = self.ticks;
        let (due, still): (Vec<ThreadId>, Vec<ThreadId>) = self
            .sleepers
            .iter()
            .copied()
            .partition(|&t| self.thread(t).wakeup_tick <= now);
        self.sleepers = still;

        for tid in due {
            self.thread_mut(tid).leave_queue(Queue::Sleep);
            self.unblock(tid);
        }
        self.should_preempt()
    }
}

impl<P: Port> Kernel<P> {
    /// Block the running thread until the tick counter reaches `wake`.
    /// Returns at once if that tick has already passed.
    ///
    /// # Panics
    /// In interrupt context, or when called by the idle thread.
    pub fn sleep_until(&self, wake: u64) {
        assert!(!self.in_interrupt(), "sleep in interrupt context");

        self.reschedule(ThreadStatus::Blocked, |s| {
            if wake <= s.ticks {
                false
            } else {
                s.sleep_enqueue(wake);
                true
            }
        });
    }
}
