//! # Thread Control Block
//!
//! Defines the per-thread record kept by the scheduler. Threads are stored
//! in the scheduler's thread table and referred to by [`ThreadId`]; the
//! execution context lives beside the table, owned by the dispatcher.
//!
//! A thread is a member of at most one wait structure at a time. That
//! membership is recorded explicitly in [`Thread::queue`] so that every
//! insertion can assert the thread is not already queued elsewhere.

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

use crate::config::{NICE_DEFAULT, PRI_MAX, PRI_MIN, THREAD_NAME_MAX};
use crate::fixed_point::Fixed;
use crate::sync::{LockId, SemaphoreId};

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Thread identifier. Allocated monotonically and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(pub u32);

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tid {}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Thread state machine
// ---------------------------------------------------------------------------

/// Execution state of a thread.
///
/// ```text
///          create / unblock           dispatch
///   ┌─────────┐ ─────────────► ┌───────┐ ─────────► ┌─────────┐
///   │ Blocked │                │ Ready │            │ Running │
///   └─────────┘ ◄───────┐      └───────┘ ◄───────── └─────────┘
///                       │                yield        │    │
///                       └──────────── block ──────────┘    │ exit
///                                                          ▼
///                                                     ┌───────┐
///                                                     │ Dying │
///                                                     └───────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadStatus {
    /// The one thread executing on the CPU.
    Running,
    /// Runnable and waiting in the ready list.
    Ready,
    /// Waiting for an event: a semaphore, a wake tick, or an explicit
    /// unblock.
    Blocked,
    /// Exited; reclaimed once the dispatcher has switched away from it.
    Dying,
}

/// The wait structure a thread is linked into, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Queue {
    Ready,
    Sleep,
    Semaphore(SemaphoreId),
}

// ---------------------------------------------------------------------------
// Thread Control Block
// ---------------------------------------------------------------------------

/// Thread Control Block (TCB).
#[derive(Debug, Clone)]
pub struct Thread {
    pub id: ThreadId,

    /// Debugging name, at most [`THREAD_NAME_MAX`] bytes.
    pub name: String,

    pub status: ThreadStatus,

    /// Priority assigned by the thread itself (or derived by MLFQS).
    pub base_priority: u8,

    /// Base priority as raised by donation. Scheduling order uses this.
    pub priority: u8,

    /// MLFQS niceness in `NICE_MIN..=NICE_MAX`.
    pub nice: i32,

    /// MLFQS estimate of recently consumed CPU time.
    pub recent_cpu: Fixed,

    /// Tick at which a sleeping thread becomes runnable again.
    pub wakeup_tick: u64,

    /// Wait structure this thread is currently linked into.
    pub queue: Option<Queue>,

    /// Lock this thread is blocked acquiring.
    pub wait_on_lock: Option<LockId>,

    /// Threads currently donating their priority to this one.
    pub donors: Vec<ThreadId>,
}

impl Thread {
    /// Create a thread record in the `Blocked` state.
    ///
    /// # Panics
    /// If `priority` lies outside `PRI_MIN..=PRI_MAX`.
    pub fn new(id: ThreadId, name: &str, priority: u8) -> Self {
        assert!(
            (PRI_MIN..=PRI_MAX).contains(&priority),
            "priority {} outside {}..={}",
            priority,
            PRI_MIN,
            PRI_MAX
        );

        Self {
            id,
            name: truncate_name(name),
            status: ThreadStatus::Blocked,
            base_priority: priority,
            priority,
            nice: NICE_DEFAULT,
            recent_cpu: Fixed::ZERO,
            wakeup_tick: 0,
            queue: None,
            wait_on_lock: None,
            donors: Vec::new(),
        }
    }

    /// Whether the thread may be dispatched.
    #[inline]
    pub fn is_ready(&self) -> bool {
        self.status == ThreadStatus::Ready
    }

    /// Link the thread into `queue`, asserting it was not linked anywhere.
    pub(crate) fn enter_queue(&mut self, queue: Queue) {
        assert!(
            self.queue.is_none(),
            "{} already queued on {:?}",
            self.id,
            self.queue
        );
        self.queue = Some(queue);
    }

    pub(crate) fn leave_queue(&mut self, queue: Queue) {
        debug_assert_eq!(self.queue, Some(queue));
        self.queue = None;
    }
}

fn truncate_name(name: &str) -> String {
    let mut end = name.len().min(THREAD_NAME_MAX);
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    String::from(&name[..end])
}

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

/// Read-only view of a thread, for diagnostics and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadInfo {
    pub id: ThreadId,
    pub name: String,
    pub status: ThreadStatus,
    pub base_priority: u8,
    pub priority: u8,
    pub nice: i32,
    /// Recent CPU ×100, rounded.
    pub recent_cpu: i32,
}

impl From<&Thread> for ThreadInfo {
    fn from(t: &Thread) -> Self {
        Self {
            id: t.id,
            name: t.name.clone(),
            status: t.status,
            base_priority: t.base_priority,
            priority: t.priority,
            nice: t.nice,
            recent_cpu: t.recent_cpu.scaled_round(100),
        }
    }
}

/// Tick accounting, split by what the CPU was doing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ThreadStats {
    pub idle_ticks: u64,
    pub kernel_ticks: u64,
    pub user_ticks: u64,
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PRI_DEFAULT;

    #[test]
    fn test_thread_initialization() {
        let t = Thread::new(ThreadId(7), "worker", PRI_DEFAULT);
        assert_eq!(t.status, ThreadStatus::Blocked);
        assert!(!t.is_ready());
        assert_eq!(t.priority, PRI_DEFAULT);
        assert_eq!(t.base_priority, PRI_DEFAULT);
        assert_eq!(t.nice, 0);
        assert_eq!(t.recent_cpu, Fixed::ZERO);
        assert!(t.queue.is_none());
        assert!(t.donors.is_empty());
    }

    #[test]
    fn test_long_names_truncated() {
        let t = Thread::new(ThreadId(1), "a-rather-long-thread-name", PRI_MIN);
        assert_eq!(t.name, "a-rather-long-th");

        // Never split a UTF-8 sequence.
        let t = Thread::new(ThreadId(2), "ééééééééé", PRI_MIN);
        assert_eq!(t.name.len(), 16);
    }

    #[test]
    #[should_panic(expected = "priority 64 outside")]
    fn test_priority_out_of_range() {
        Thread::new(ThreadId(3), "bad", PRI_MAX + 1);
    }

    #[test]
    #[should_panic(expected = "already queued")]
    fn test_single_queue_membership() {
        let mut t = Thread::new(ThreadId(4), "q", PRI_DEFAULT);
        t.enter_queue(Queue::Ready);
        t.enter_queue(Queue::Sleep);
    }

    #[test]
    fn test_info_reports_scaled_recent_cpu() {
        let mut t = Thread::new(ThreadId(5), "cpu", PRI_DEFAULT);
        t.recent_cpu = Fixed::from_int(3) / 2;
        assert_eq!(ThreadInfo::from(&t).recent_cpu, 150);
    }
}
