//! # Scheduler
//!
//! Core scheduling state and the dispatch decision. The scheduler owns the
//! thread table, the ready and sleep lists, the tables of synchronization
//! objects, and the MLFQS globals. It never switches contexts itself: the
//! [`Kernel`](crate::kernel::Kernel) asks it for a [`Dispatch`] decision and
//! then swaps execution contexts through the platform port.
//!
//! ## Scheduling Algorithm
//!
//! - The ready list is kept sorted by effective priority, highest first.
//!   Insertion places a thread after every thread of equal priority, so
//!   equal priorities run round-robin in FIFO order.
//! - Dispatch pops the head of the ready list, or falls back to the idle
//!   thread when the list is empty.
//! - The running thread is preempted as soon as the ready head outranks
//!   it, and after `time_slice` ticks when a peer of equal priority waits.
//!
//! ## Reclamation
//!
//! A thread that exits is marked `Dying` and queued for destruction. Its
//! record (and the execution context the kernel keeps beside it) is only
//! reclaimed by a later dispatch, after execution has moved off its stack.
//!
//! All methods run with interrupts disabled; see [`crate::sync`].

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use crate::config::{KernelConfig, PRI_DEFAULT, PRI_MAX, PRI_MIN};
use crate::error::KernelError;
use crate::fixed_point::Fixed;
use crate::sync::condvar::{CondvarId, CondvarState};
use crate::sync::lock::{LockId, LockState};
use crate::sync::semaphore::{SemaphoreId, SemaphoreState};
use crate::thread::{Queue, Thread, ThreadId, ThreadInfo, ThreadStats, ThreadStatus};

/// Outcome of a dispatch: the thread giving up the CPU and the thread
/// receiving it. Equal when the running thread was picked again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dispatch {
    pub prev: ThreadId,
    pub next: ThreadId,
}

// ---------------------------------------------------------------------------
// Scheduler struct
// ---------------------------------------------------------------------------

/// The central scheduler state of one kernel instance.
pub struct Scheduler {
    pub(crate) config: KernelConfig,

    /// Every live thread, including `Dying` ones awaiting reclamation.
    /// Doubles as the all-threads registry walked by MLFQS.
    threads: BTreeMap<ThreadId, Thread>,

    /// Ready threads, highest effective priority first.
    ready: Vec<ThreadId>,

    /// Sleeping threads in the order they went to sleep.
    pub(crate) sleepers: Vec<ThreadId>,

    /// Exited threads whose records await reclamation.
    destruction: Vec<ThreadId>,

    current: ThreadId,
    initial: ThreadId,
    idle: Option<ThreadId>,
    next_tid: u32,

    /// Timer ticks since boot.
    pub(crate) ticks: u64,

    /// Ticks since the running thread was dispatched.
    slice_ticks: u32,

    pub(crate) stats: ThreadStats,

    /// MLFQS system load average.
    pub(crate) load_avg: Fixed,

    pub(crate) semaphores: BTreeMap<SemaphoreId, SemaphoreState>,
    pub(crate) locks: BTreeMap<LockId, LockState>,
    pub(crate) condvars: BTreeMap<CondvarId, CondvarState>,
    next_object: u32,
}

impl Scheduler {
    /// Create the scheduler, turning the caller into the initial thread
    /// `"main"`, which is running from the start.
    pub fn new(config: KernelConfig) -> Self {
        let mut sched = Self {
            config,
            threads: BTreeMap::new(),
            ready: Vec::new(),
            sleepers: Vec::new(),
            destruction: Vec::new(),
            current: ThreadId(0),
            initial: ThreadId(0),
            idle: None,
            next_tid: 1,
            ticks: 0,
            slice_ticks: 0,
            stats: ThreadStats::default(),
            load_avg: Fixed::ZERO,
            semaphores: BTreeMap::new(),
            locks: BTreeMap::new(),
            condvars: BTreeMap::new(),
            next_object: 1,
        };

        let mut main = sched.make_thread("main", PRI_DEFAULT);
        main.status = ThreadStatus::Running;
        sched.current = main.id;
        sched.initial = main.id;
        sched.threads.insert(main.id, main);
        sched
    }

    fn make_thread(&mut self, name: &str, priority: u8) -> Thread {
        let id = ThreadId(self.next_tid);
        self.next_tid += 1;

        let mut thread = Thread::new(id, name, priority);
        if self.config.mlfqs {
            thread.base_priority = self.mlfqs_priority(&thread);
            thread.priority = thread.base_priority;
        }
        thread
    }

    // -----------------------------------------------------------------------
    // Thread table
    // -----------------------------------------------------------------------

    /// Allocate a thread record in the `Blocked` state.
    ///
    /// # Returns
    /// - `Ok(tid)`: the new thread's identifier
    /// - `Err(KernelError::AllocationFailure)`: the thread table is full
    pub fn allocate_thread(&mut self, name: &str, priority: u8) -> Result<ThreadId, KernelError> {
        if self.thread_count() >= self.config.max_threads {
            return Err(KernelError::AllocationFailure);
        }

        let thread = self.make_thread(name, priority);
        let id = thread.id;
        self.threads.insert(id, thread);
        Ok(id)
    }

    /// Forget a thread that never ran (context allocation failed).
    pub(crate) fn discard_thread(&mut self, tid: ThreadId) {
        let thread = self.threads.remove(&tid);
        debug_assert!(matches!(thread, Some(t) if t.status == ThreadStatus::Blocked && t.queue.is_none()));
    }

    /// Designate `tid` as the idle thread. It never enters the ready list.
    pub(crate) fn register_idle(&mut self, tid: ThreadId) {
        assert!(self.idle.is_none(), "idle thread registered twice");
        let idle = self.thread_mut(tid);
        idle.base_priority = PRI_MIN;
        idle.priority = PRI_MIN;
        self.idle = Some(tid);
    }

    #[inline]
    pub fn current(&self) -> ThreadId {
        self.current
    }

    #[inline]
    pub fn idle(&self) -> Option<ThreadId> {
        self.idle
    }

    #[inline]
    pub fn is_idle(&self, tid: ThreadId) -> bool {
        self.idle == Some(tid)
    }

    #[inline]
    pub fn initial(&self) -> ThreadId {
        self.initial
    }

    pub fn get(&self, tid: ThreadId) -> Option<&Thread> {
        self.threads.get(&tid)
    }

    /// # Panics
    /// If `tid` names no live thread.
    pub fn thread(&self, tid: ThreadId) -> &Thread {
        self.threads
            .get(&tid)
            .unwrap_or_else(|| panic!("{} is not a live thread", tid))
    }

    pub(crate) fn thread_mut(&mut self, tid: ThreadId) -> &mut Thread {
        self.threads
            .get_mut(&tid)
            .unwrap_or_else(|| panic!("{} is not a live thread", tid))
    }

    pub(crate) fn threads(&self) -> impl Iterator<Item = &Thread> {
        self.threads.values()
    }

    pub(crate) fn threads_mut(&mut self) -> impl Iterator<Item = &mut Thread> {
        self.threads.values_mut()
    }

    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }

    pub fn info(&self, tid: ThreadId) -> Option<ThreadInfo> {
        self.threads.get(&tid).map(ThreadInfo::from)
    }

    pub(crate) fn next_object_id(&mut self) -> u32 {
        let id = self.next_object;
        self.next_object += 1;
        id
    }

    // -----------------------------------------------------------------------
    // Ready list
    // -----------------------------------------------------------------------

    /// Ready threads in dispatch order.
    pub fn ready_list(&self) -> &[ThreadId] {
        &self.ready
    }

    /// Transition a blocked thread to `Ready`.
    ///
    /// # Panics
    /// If `tid` is not `Blocked`.
    pub fn unblock(&mut self, tid: ThreadId) {
        let status = self.thread(tid).status;
        assert!(
            status == ThreadStatus::Blocked,
            "unblock of {} which is {:?}, not Blocked",
            tid,
            status
        );
        self.push_ready(tid);
        self.thread_mut(tid).status = ThreadStatus::Ready;
    }

    /// Insert into the ready list after every thread of equal or higher
    /// priority.
    pub(crate) fn push_ready(&mut self, tid: ThreadId) {
        self.thread_mut(tid).enter_queue(Queue::Ready);
        let priority = self.thread(tid).priority;
        let pos = self
            .ready
            .iter()
            .position(|&t| self.thread(t).priority < priority)
            .unwrap_or(self.ready.len());
        self.ready.insert(pos, tid);
    }

    fn remove_ready(&mut self, tid: ThreadId) {
        if let Some(pos) = self.ready.iter().position(|&t| t == tid) {
            self.ready.remove(pos);
            self.thread_mut(tid).leave_queue(Queue::Ready);
        }
    }

    /// Move a ready thread whose priority changed to its new place.
    pub(crate) fn reposition(&mut self, tid: ThreadId) {
        if self.thread(tid).queue == Some(Queue::Ready) {
            self.remove_ready(tid);
            self.push_ready(tid);
        }
    }

    /// Re-sort the whole ready list after a bulk priority update. The sort
    /// is stable, so FIFO order among equals survives.
    pub(crate) fn sort_ready(&mut self) {
        let threads = &self.threads;
        self.ready
            .sort_by(|a, b| threads[b].priority.cmp(&threads[a].priority));
    }

    /// Whether the running thread should give way to the ready head.
    pub fn should_preempt(&self) -> bool {
        match self.ready.first() {
            None => false,
            Some(&head) => {
                self.is_idle(self.current)
                    || self.thread(head).priority > self.thread(self.current).priority
            }
        }
    }

    // -----------------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------------

    /// Choose the next thread: the ready head, or idle.
    fn next_to_run(&mut self) -> ThreadId {
        if self.ready.is_empty() {
            self.idle
                .unwrap_or_else(|| panic!("no runnable thread and no idle thread"))
        } else {
            let next = self.ready.remove(0);
            self.thread_mut(next).leave_queue(Queue::Ready);
            next
        }
    }

    /// Move the running thread to `status` and pick its successor.
    ///
    /// The caller has already placed the running thread wherever `status`
    /// requires (ready list, sleep list, waiter list).
    pub fn schedule(&mut self, status: ThreadStatus) -> Dispatch {
        let prev = self.current;
        assert_eq!(
            self.thread(prev).status,
            ThreadStatus::Running,
            "{} dispatched while not running",
            prev
        );
        debug_assert!(status != ThreadStatus::Running);

        self.thread_mut(prev).status = status;
        let next = self.next_to_run();
        self.thread_mut(next).status = ThreadStatus::Running;
        self.slice_ticks = 0;
        self.current = next;

        // The initial thread's stack belongs to the boot flow; never reclaim it.
        if status == ThreadStatus::Dying && prev != next && prev != self.initial() {
            self.destruction.push(prev);
        }

        log::trace!("dispatch {} -> {}", prev, next);
        Dispatch { prev, next }
    }

    /// Remove the records of exited threads that execution has left.
    pub(crate) fn reap(&mut self) -> Vec<ThreadId> {
        let victims: Vec<ThreadId> = self.destruction.drain(..).collect();
        for tid in &victims {
            debug_assert_ne!(*tid, self.current);
            self.threads.remove(tid);
        }
        victims
    }

    // -----------------------------------------------------------------------
    // Tick accounting
    // -----------------------------------------------------------------------

    /// Per-tick statistics and time-slice bookkeeping. Returns `true` when
    /// the running thread has used up its slice.
    pub fn thread_tick(&mut self, user: bool) -> bool {
        if self.is_idle(self.current) {
            self.stats.idle_ticks += 1;
        } else if user {
            self.stats.user_ticks += 1;
        } else {
            self.stats.kernel_ticks += 1;
        }

        self.slice_ticks += 1;
        self.slice_ticks >= self.config.time_slice
    }

    // -----------------------------------------------------------------------
    // Priorities
    // -----------------------------------------------------------------------

    /// Set the running thread's base priority. Returns `false` when the
    /// request was ignored because MLFQS derives priorities.
    ///
    /// # Panics
    /// If `priority` lies outside `PRI_MIN..=PRI_MAX`.
    pub fn set_priority(&mut self, priority: u8) -> bool {
        assert!(
            (PRI_MIN..=PRI_MAX).contains(&priority),
            "priority {} outside {}..={}",
            priority,
            PRI_MIN,
            PRI_MAX
        );
        if self.config.mlfqs {
            return false;
        }

        let cur = self.current;
        self.thread_mut(cur).base_priority = priority;
        self.refresh_priority(cur);
        true
    }

    /// Check the structural invariants. Intended for tests and debugging.
    pub fn assert_invariants(&self) {
        let running = self
            .threads
            .values()
            .filter(|t| t.status == ThreadStatus::Running)
            .count();
        assert_eq!(running, 1, "exactly one thread must be running");
        assert_eq!(self.thread(self.current).status, ThreadStatus::Running);

        for pair in self.ready.windows(2) {
            assert!(
                self.thread(pair[0]).priority >= self.thread(pair[1]).priority,
                "ready list out of order: {:?}",
                self.ready
            );
        }

        for t in self.threads.values() {
            assert!(t.priority >= t.base_priority, "{} below its base priority", t.id);
            let listed = self.ready.contains(&t.id);
            assert_eq!(listed, t.queue == Some(Queue::Ready));
            if !self.is_idle(t.id) {
                assert_eq!(listed, t.is_ready(), "{} ready-list mismatch", t.id);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
