//! # Kernel
//!
//! Top-level kernel handle: boot, thread lifecycle, the dispatcher, the
//! timer interrupt entry point, and the public thread API.
//!
//! ## Startup Sequence
//!
//! ```text
//! reset / test harness
//!   └─► Kernel::boot(port, config)
//!         ├─► config.validate()
//!         ├─► port.bootstrap()          ← calling flow becomes "main"
//!         ├─► create idle thread        ← PRI_MIN, never on the ready list
//!         └─► intr_enable()
//!   └─► Kernel::create_thread() (×N)    ← preempts main when it outranks it
//!   └─► timer source → Kernel::timer_interrupt()
//! ```
//!
//! ## Dispatch
//!
//! Every switch goes through [`Kernel::reschedule`]: with interrupts
//! disabled and the state lock held, it places the running thread, asks
//! the [`Scheduler`] for a [`Dispatch`], and pins both contexts. The lock
//! is dropped before the port swaps contexts, so it is never held across a
//! switch; disabled interrupts alone keep the handoff atomic.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::arch::{Entry, IntrLevel, Port};
use crate::config::{KernelConfig, PRI_MIN};
use crate::error::KernelError;
use crate::scheduler::{Dispatch, Scheduler};
use crate::sync::{self, Condvar, Lock, Semaphore};
use crate::thread::{ThreadId, ThreadInfo, ThreadStats, ThreadStatus};

// ---------------------------------------------------------------------------
// Process hooks
// ---------------------------------------------------------------------------

/// Callbacks into a process layer (user programs, address spaces).
///
/// Hooks run with interrupts disabled and must not call back into the
/// kernel.
pub trait ProcessHooks: Send + Sync {
    /// `tid` is about to run; activate its address space.
    fn activate(&self, _tid: ThreadId) {}

    /// `tid` is exiting; release its process resources.
    fn exit(&self, _tid: ThreadId) {}

    /// Whether `tid` is running user code, for tick statistics.
    fn is_user(&self, _tid: ThreadId) -> bool {
        false
    }
}

// ---------------------------------------------------------------------------
// Kernel instance
// ---------------------------------------------------------------------------

struct KernelState<C> {
    sched: Scheduler,
    /// Execution context of every thread that has one. Boxed so that a
    /// context stays put while the map changes.
    contexts: BTreeMap<ThreadId, Box<C>>,
}

struct Inner<P: Port> {
    port: P,
    config: KernelConfig,
    state: spin::Mutex<KernelState<P::Context>>,
    in_interrupt: AtomicBool,
    yield_on_return: AtomicBool,
    hooks: Option<Box<dyn ProcessHooks>>,
}

/// Handle to a running kernel. Cheap to clone; every clone refers to the
/// same kernel.
pub struct Kernel<P: Port> {
    inner: Arc<Inner<P>>,
}

impl<P: Port> Clone for Kernel<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

fn context_ptr<C>(contexts: &BTreeMap<ThreadId, Box<C>>, tid: ThreadId) -> *const C {
    match contexts.get(&tid) {
        Some(context) => &**context,
        None => panic!("{} has no execution context", tid),
    }
}

impl<P: Port> Kernel<P> {
    // -----------------------------------------------------------------------
    // Boot and shutdown
    // -----------------------------------------------------------------------

    /// Boot a kernel on `port`.
    ///
    /// The calling flow becomes the initial thread `"main"` at
    /// `PRI_DEFAULT`, the idle thread is created, and interrupts are
    /// enabled on return.
    pub fn boot(port: P, config: KernelConfig) -> Result<Self, KernelError> {
        Self::boot_inner(port, config, None)
    }

    /// Boot with a process layer attached.
    pub fn boot_with_hooks(
        port: P,
        config: KernelConfig,
        hooks: Box<dyn ProcessHooks>,
    ) -> Result<Self, KernelError> {
        Self::boot_inner(port, config, Some(hooks))
    }

    fn boot_inner(
        port: P,
        config: KernelConfig,
        hooks: Option<Box<dyn ProcessHooks>>,
    ) -> Result<Self, KernelError> {
        config.validate()?;

        port.intr_disable();
        let boot_context = port.bootstrap();
        let sched = Scheduler::new(config);
        let mut contexts = BTreeMap::new();
        contexts.insert(sched.current(), Box::new(boot_context));

        let kernel = Self {
            inner: Arc::new(Inner {
                port,
                config,
                state: spin::Mutex::new(KernelState { sched, contexts }),
                in_interrupt: AtomicBool::new(false),
                yield_on_return: AtomicBool::new(false),
                hooks,
            }),
        };
        kernel.start_idle()?;

        log::info!(
            "kernel booted: {} scheduler, {} Hz timer, time slice {} ticks",
            if config.mlfqs { "mlfqs" } else { "priority" },
            config.timer_freq,
            config.time_slice
        );
        kernel.inner.port.intr_enable();
        Ok(kernel)
    }

    fn start_idle(&self) -> Result<(), KernelError> {
        let tid = self.with_state(|s| s.allocate_thread("idle", PRI_MIN))?;
        let kernel = self.clone();
        let entry: Entry = Box::new(move || {
            kernel.intr_enable();
            kernel.idle_loop()
        });
        let context = self.spawn_context(tid, entry)?;
        self.locked(|st| {
            st.contexts.insert(tid, Box::new(context));
            st.sched.register_idle(tid);
        });
        Ok(())
    }

    /// Body of the idle thread. It runs only when nothing else is ready,
    /// blocks immediately, and halts the CPU until the next interrupt once
    /// it is scheduled again.
    fn idle_loop(&self) -> ! {
        loop {
            self.intr_disable();
            self.block();
            self.intr_enable();
            if self.inner.port.halt() {
                self.timer_interrupt();
            }
        }
    }

    /// Tear the kernel down: reclaim the context of every thread except the
    /// caller. The kernel must not schedule again afterwards.
    pub fn shutdown(&self) {
        let doomed = self.locked(|st| {
            let cur = st.sched.current();
            let keep = st.contexts.remove(&cur);
            let doomed = core::mem::take(&mut st.contexts);
            if let Some(context) = keep {
                st.contexts.insert(cur, context);
            }
            doomed
        });
        log::info!("kernel shutdown: reclaiming {} threads", doomed.len());
        self.print_stats();
        drop(doomed);
    }

    // -----------------------------------------------------------------------
    // State access
    // -----------------------------------------------------------------------

    fn locked<R>(&self, f: impl FnOnce(&mut KernelState<P::Context>) -> R) -> R {
        sync::critical_section(&self.inner.port, || f(&mut self.inner.state.lock()))
    }

    /// Run `f` on the scheduler inside a critical section.
    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&mut Scheduler) -> R) -> R {
        self.locked(|st| f(&mut st.sched))
    }

    pub fn port(&self) -> &P {
        &self.inner.port
    }

    pub fn config(&self) -> &KernelConfig {
        &self.inner.config
    }

    // -----------------------------------------------------------------------
    // Dispatcher
    // -----------------------------------------------------------------------

    /// Switch away from the running thread, leaving it in `status`.
    ///
    /// `prepare` runs first, under the state lock; it places the running
    /// thread on whatever list `status` needs and returns `false` to cancel
    /// the switch. Returns whether a dispatch happened. When it did, this
    /// returns once the thread is scheduled again.
    pub(crate) fn reschedule<F>(&self, status: ThreadStatus, prepare: F) -> bool
    where
        F: FnOnce(&mut Scheduler) -> bool,
    {
        let port = &self.inner.port;
        let old = port.intr_disable();

        let mut state = self.inner.state.lock();
        if !prepare(&mut state.sched) {
            drop(state);
            port.intr_set_level(old);
            return false;
        }

        // Exited threads queued by earlier dispatches are off-CPU by now.
        let reaped: Vec<Box<P::Context>> = state
            .sched
            .reap()
            .into_iter()
            .filter_map(|tid| state.contexts.remove(&tid))
            .collect();

        let Dispatch { prev, next } = state.sched.schedule(status);
        let switch = (prev != next).then(|| {
            (
                context_ptr(&state.contexts, prev),
                context_ptr(&state.contexts, next),
            )
        });
        drop(state);
        drop(reaped);

        if let Some(hooks) = &self.inner.hooks {
            hooks.activate(next);
        }
        if let Some((from, to)) = switch {
            // Safety: both contexts are boxed in the state table. `prev` is
            // running and `next` is not Dying, so neither is reaped before
            // the switch completes.
            unsafe { port.switch(from, to) };
        }

        port.intr_set_level(old);
        true
    }

    /// Yield if the ready head outranks the running thread. In interrupt
    /// context the yield happens on interrupt return.
    pub(crate) fn check_preemption(&self) {
        if !self.with_state(|s| s.should_preempt()) {
            return;
        }
        if self.in_interrupt() {
            self.inner.yield_on_return.store(true, Ordering::SeqCst);
        } else {
            self.yield_now();
        }
    }

    // -----------------------------------------------------------------------
    // Thread lifecycle
    // -----------------------------------------------------------------------

    /// Create a thread running `f` at `priority` and make it ready. If it
    /// outranks the caller it runs before this returns.
    ///
    /// # Returns
    /// - `Ok(tid)`: the new thread's identifier
    /// - `Err(KernelError::AllocationFailure)`: the thread table is full
    ///   or the port could not allocate a context
    ///
    /// # Panics
    /// If `priority` lies outside `PRI_MIN..=PRI_MAX`.
    pub fn create_thread<F>(&self, name: &str, priority: u8, f: F) -> Result<ThreadId, KernelError>
    where
        F: FnOnce() + Send + 'static,
    {
        let tid = self.with_state(|s| s.allocate_thread(name, priority))?;

        let kernel = self.clone();
        let entry: Entry = Box::new(move || {
            kernel.intr_enable();
            f();
            kernel.exit();
        });
        let context = self.spawn_context(tid, entry)?;

        self.locked(|st| {
            st.contexts.insert(tid, Box::new(context));
            st.sched.unblock(tid);
        });
        log::debug!("created {} \"{}\" at priority {}", tid, name, priority);

        self.check_preemption();
        Ok(tid)
    }

    fn spawn_context(&self, tid: ThreadId, entry: Entry) -> Result<P::Context, KernelError> {
        self.inner
            .port
            .create(self.inner.config.stack_size, entry)
            .map_err(|err| {
                self.with_state(|s| s.discard_thread(tid));
                err
            })
    }

    /// Put the running thread to sleep until [`Kernel::unblock`].
    ///
    /// # Panics
    /// In interrupt context, or with interrupts enabled.
    pub fn block(&self) {
        assert!(!self.in_interrupt(), "block in interrupt context");
        assert_eq!(
            self.intr_get_level(),
            IntrLevel::Off,
            "block with interrupts enabled"
        );
        self.reschedule(ThreadStatus::Blocked, |_| true);
    }

    /// Make a blocked thread ready. Never preempts the caller, so it is
    /// usable with interrupts disabled to update other state atomically.
    ///
    /// # Panics
    /// If `tid` is not blocked.
    pub fn unblock(&self, tid: ThreadId) {
        self.with_state(|s| s.unblock(tid));
    }

    /// Give up the CPU. The caller stays ready and may be picked again
    /// immediately.
    pub fn yield_now(&self) {
        assert!(!self.in_interrupt(), "yield in interrupt context");
        self.reschedule(ThreadStatus::Ready, |s| {
            let cur = s.current();
            if !s.is_idle(cur) {
                s.push_ready(cur);
            }
            true
        });
    }

    /// Terminate the running thread. Its context is reclaimed by a later
    /// dispatch.
    pub fn exit(&self) -> ! {
        assert!(!self.in_interrupt(), "exit in interrupt context");
        let tid = self.current();
        if let Some(hooks) = &self.inner.hooks {
            hooks.exit(tid);
        }
        log::debug!("{} exiting", tid);

        self.reschedule(ThreadStatus::Dying, |_| true);
        unreachable!("{} scheduled after exit", tid);
    }

    // -----------------------------------------------------------------------
    // Timer interrupt
    // -----------------------------------------------------------------------

    /// Timer tick entry point, called by the timer interrupt handler (or,
    /// on the hosted port, by code modelling a tick of CPU work).
    ///
    /// ## Sequence
    /// 1. Advance the tick counter
    /// 2. Charge the tick to idle, kernel, or user time
    /// 3. Request a yield when the time slice is used up
    /// 4. MLFQS bookkeeping, if enabled
    /// 5. Wake due sleepers; request a yield if one outranks the running
    ///    thread
    /// 6. Perform any requested yield on the way out
    pub fn timer_interrupt(&self) {
        let old = self.inner.port.intr_disable();
        self.inner.in_interrupt.store(true, Ordering::SeqCst);

        let cur = self.current();
        let user = self.inner.hooks.as_ref().is_some_and(|h| h.is_user(cur));
        let resched = self.with_state(|s| {
            s.ticks += 1;
            let mut resched = s.thread_tick(user);
            if s.config.mlfqs {
                resched |= s.mlfqs_tick();
            }
            resched | s.wake_sleepers()
        });
        if resched {
            self.inner.yield_on_return.store(true, Ordering::SeqCst);
        }

        self.inner.in_interrupt.store(false, Ordering::SeqCst);
        if self.inner.yield_on_return.swap(false, Ordering::SeqCst) {
            self.yield_now();
        }
        self.inner.port.intr_set_level(old);
    }

    // -----------------------------------------------------------------------
    // Priorities and MLFQS
    // -----------------------------------------------------------------------

    /// Effective priority of the running thread.
    pub fn priority(&self) -> u8 {
        self.with_state(|s| s.thread(s.current()).priority)
    }

    /// Set the running thread's base priority, yielding if it no longer
    /// has the highest priority. Ignored under MLFQS.
    ///
    /// # Panics
    /// If `priority` lies outside `PRI_MIN..=PRI_MAX`.
    pub fn set_priority(&self, priority: u8) {
        if self.with_state(|s| s.set_priority(priority)) {
            self.check_preemption();
        }
    }

    pub fn nice(&self) -> i32 {
        self.with_state(|s| s.thread(s.current()).nice)
    }

    /// Set the running thread's nice value, recomputing its priority under
    /// MLFQS.
    ///
    /// # Panics
    /// If `nice` lies outside `NICE_MIN..=NICE_MAX`.
    pub fn set_nice(&self, nice: i32) {
        self.with_state(|s| s.set_nice(nice));
        self.check_preemption();
    }

    /// System load average ×100, rounded.
    pub fn load_avg(&self) -> i32 {
        self.with_state(|s| s.load_avg().scaled_round(100))
    }

    /// Running thread's recent CPU ×100, rounded.
    pub fn recent_cpu(&self) -> i32 {
        self.with_state(|s| s.thread(s.current()).recent_cpu.scaled_round(100))
    }

    // -----------------------------------------------------------------------
    // Diagnostics
    // -----------------------------------------------------------------------

    pub fn current(&self) -> ThreadId {
        self.with_state(|s| s.current())
    }

    pub fn thread_name(&self) -> String {
        self.with_state(|s| s.thread(s.current()).name.clone())
    }

    pub fn thread_info(&self, tid: ThreadId) -> Option<ThreadInfo> {
        self.with_state(|s| s.info(tid))
    }

    /// Snapshot of every live thread, in creation order.
    pub fn threads(&self) -> Vec<ThreadInfo> {
        self.with_state(|s| s.threads().map(ThreadInfo::from).collect())
    }

    /// Ready threads in dispatch order.
    pub fn ready_threads(&self) -> Vec<ThreadId> {
        self.with_state(|s| s.ready_list().to_vec())
    }

    pub fn stats(&self) -> ThreadStats {
        self.with_state(|s| s.stats)
    }

    pub fn print_stats(&self) {
        let stats = self.stats();
        log::info!(
            "Thread: {} idle ticks, {} kernel ticks, {} user ticks",
            stats.idle_ticks,
            stats.kernel_ticks,
            stats.user_ticks
        );
    }

    // -----------------------------------------------------------------------
    // Interrupts
    // -----------------------------------------------------------------------

    pub fn intr_get_level(&self) -> IntrLevel {
        self.inner.port.intr_get_level()
    }

    pub fn intr_disable(&self) -> IntrLevel {
        self.inner.port.intr_disable()
    }

    pub fn intr_enable(&self) -> IntrLevel {
        self.inner.port.intr_enable()
    }

    pub fn intr_set_level(&self, level: IntrLevel) -> IntrLevel {
        self.inner.port.intr_set_level(level)
    }

    /// Whether the caller runs inside the timer interrupt.
    pub fn in_interrupt(&self) -> bool {
        self.inner.in_interrupt.load(Ordering::SeqCst)
    }

    // -----------------------------------------------------------------------
    // Synchronization primitives
    // -----------------------------------------------------------------------

    pub fn semaphore(&self, value: u32) -> Semaphore<P> {
        Semaphore::new(self.clone(), value)
    }

    pub fn lock(&self) -> Lock<P> {
        Lock::new(self.clone())
    }

    pub fn condvar(&self) -> Condvar<P> {
        Condvar::new(self.clone())
    }
}

// ---------------------------------------------------------------------------
// Scenario tests (hosted port)
// ---------------------------------------------------------------------------

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;
    use crate::arch::hosted::HostedPort;
    use crate::config::{PRI_DEFAULT, PRI_MAX, TIMER_FREQ};
    use alloc::format;
    use alloc::string::ToString;
    use std::sync::Mutex;

    type Log = Arc<Mutex<Vec<String>>>;

    fn boot() -> Kernel<HostedPort> {
        boot_with(KernelConfig::default())
    }

    fn boot_with(config: KernelConfig) -> Kernel<HostedPort> {
        Kernel::boot(HostedPort::new(), config).unwrap()
    }

    fn new_log() -> Log {
        Arc::new(Mutex::new(Vec::new()))
    }

    fn record(log: &Log, entry: impl Into<String>) {
        log.lock().unwrap().push(entry.into());
    }

    fn entries(log: &Log) -> Vec<String> {
        log.lock().unwrap().clone()
    }

    #[test]
    fn test_boot_state() {
        let k = boot();
        assert_eq!(k.thread_name(), "main");
        assert_eq!(k.priority(), PRI_DEFAULT);
        assert_eq!(k.intr_get_level(), IntrLevel::On);
        assert!(!k.in_interrupt());
        assert!(k.ready_threads().is_empty());

        let names: Vec<String> = k.threads().into_iter().map(|t| t.name).collect();
        assert_eq!(names, ["main", "idle"]);
        k.shutdown();
    }

    #[test]
    fn test_boot_rejects_bad_config() {
        let config = KernelConfig {
            timer_freq: 5,
            ..KernelConfig::default()
        };
        assert_eq!(
            Kernel::boot(HostedPort::new(), config).err(),
            Some(KernelError::Config(crate::error::ConfigError::TimerFrequency(5)))
        );
    }

    #[test]
    fn test_interrupt_levels() {
        let k = boot();
        assert_eq!(k.intr_disable(), IntrLevel::On);
        assert_eq!(k.intr_get_level(), IntrLevel::Off);
        assert_eq!(k.intr_set_level(IntrLevel::On), IntrLevel::Off);
        k.timer_interrupt();
        assert_eq!(k.intr_get_level(), IntrLevel::On);
        k.shutdown();
    }

    #[test]
    fn test_higher_priority_runs_first() {
        let k = boot();
        let log = new_log();

        for (name, priority) in [("a", 10), ("b", 5)] {
            let log = log.clone();
            k.create_thread(name, priority, move || record(&log, name))
                .unwrap();
        }
        // Both are below main and have not run.
        assert!(entries(&log).is_empty());
        assert_eq!(k.ready_threads().len(), 2);

        k.set_priority(1);
        assert_eq!(entries(&log), ["a", "b"]);
        k.shutdown();
    }

    #[test]
    fn test_new_thread_preempts_creator() {
        let k = boot();
        let log = new_log();
        let inner = log.clone();
        k.create_thread("high", PRI_DEFAULT + 1, move || record(&inner, "high"))
            .unwrap();
        record(&log, "main");
        assert_eq!(entries(&log), ["high", "main"]);
        k.shutdown();
    }

    #[test]
    fn test_priority_donation_one() {
        let k = boot();
        let log = new_log();
        let lock = Arc::new(k.lock());
        lock.acquire();

        for (name, priority) in [("acquire1", PRI_DEFAULT + 1), ("acquire2", PRI_DEFAULT + 2)] {
            let (kernel, lock, log) = (k.clone(), lock.clone(), log.clone());
            k.create_thread(name, priority, move || {
                lock.acquire();
                record(&log, format!("{} got the lock", name));
                assert_eq!(kernel.priority(), priority);
                lock.release();
                record(&log, format!("{} done", name));
            })
            .unwrap();
            assert_eq!(k.priority(), priority);
        }

        lock.release();
        assert_eq!(
            entries(&log),
            [
                "acquire2 got the lock",
                "acquire2 done",
                "acquire1 got the lock",
                "acquire1 done",
            ]
        );
        assert_eq!(k.priority(), PRI_DEFAULT);
        k.shutdown();
    }

    #[test]
    fn test_donation_reverts_to_base() {
        let k = boot();
        k.set_priority(1);
        let lock = Arc::new(k.lock());
        lock.acquire();

        let inner = lock.clone();
        let mid = k
            .create_thread("mid", 5, move || {
                inner.acquire();
                inner.release();
            })
            .unwrap();
        assert_eq!(k.priority(), 5);
        assert_eq!(k.thread_info(mid).unwrap().status, ThreadStatus::Blocked);

        lock.release();
        assert_eq!(k.priority(), 1);
        assert_eq!(k.thread_info(mid).map(|t| t.status), Some(ThreadStatus::Dying));
        k.shutdown();
    }

    #[test]
    fn test_nested_donation() {
        let k = boot();
        let a = Arc::new(k.lock());
        let b = Arc::new(k.lock());
        a.acquire();

        let (ka, kb) = (a.clone(), b.clone());
        let medium = k
            .create_thread("medium", PRI_DEFAULT + 1, move || {
                kb.acquire();
                ka.acquire();
                ka.release();
                kb.release();
            })
            .unwrap();
        assert_eq!(k.priority(), PRI_DEFAULT + 1);

        let kb = b.clone();
        k.create_thread("high", PRI_DEFAULT + 2, move || {
            kb.acquire();
            kb.release();
        })
        .unwrap();
        assert_eq!(k.priority(), PRI_DEFAULT + 2);
        assert_eq!(k.thread_info(medium).unwrap().priority, PRI_DEFAULT + 2);

        a.release();
        assert_eq!(k.priority(), PRI_DEFAULT);
        k.shutdown();
    }

    #[test]
    fn test_alarm_wakes_in_tick_order() {
        let k = boot();
        let log = new_log();

        let mut sleepers = Vec::new();
        for wake in [110u64, 100, 105] {
            let (kernel, log) = (k.clone(), log.clone());
            let tid = k
                .create_thread("sleeper", 40, move || {
                    kernel.sleep_until(wake);
                    record(&log, format!("{}@{}", wake, kernel.ticks()));
                })
                .unwrap();
            sleepers.push(tid);
        }

        while k.ticks() < 105 {
            k.timer_interrupt();
        }
        assert_eq!(entries(&log), ["100@100", "105@105"]);
        assert_eq!(
            k.thread_info(sleepers[0]).map(|t| t.status),
            Some(ThreadStatus::Blocked)
        );

        while k.ticks() < 110 {
            k.timer_interrupt();
        }
        assert_eq!(entries(&log).len(), 3);
        k.shutdown();
    }

    #[test]
    fn test_sleep_fast_forwards_through_idle() {
        let k = boot();
        k.sleep(10);
        assert_eq!(k.ticks(), 10);
        assert!(k.stats().idle_ticks >= 9);

        k.sleep(0);
        assert_eq!(k.ticks(), 10);

        k.msleep(30);
        assert_eq!(k.elapsed(10), 3);

        // Below one tick: busy-waits, the clock does not move.
        k.usleep(10);
        assert_eq!(k.ticks(), 13);
        k.shutdown();
    }

    #[test]
    fn test_semaphore_fifo_among_equals() {
        let k = boot();
        let log = new_log();
        let sema = Arc::new(k.semaphore(0));

        for name in ["t1", "t2", "t3"] {
            let (sema, log) = (sema.clone(), log.clone());
            k.create_thread(name, 40, move || {
                sema.down();
                record(&log, name);
            })
            .unwrap();
        }
        assert_eq!(sema.waiters().len(), 3);

        for _ in 0..3 {
            sema.up();
        }
        assert_eq!(entries(&log), ["t1", "t2", "t3"]);
        assert_eq!(sema.value(), 0);
        k.shutdown();
    }

    #[test]
    fn test_semaphore_try_down_and_counting() {
        let k = boot();
        let sema = k.semaphore(2);
        assert!(sema.try_down());
        sema.down();
        assert!(!sema.try_down());
        sema.up();
        assert_eq!(sema.value(), 1);
        k.shutdown();
    }

    #[test]
    fn test_condvar_wakes_by_priority() {
        let k = boot();
        k.set_priority(PRI_MIN);
        let log = new_log();
        let lock = Arc::new(k.lock());
        let cond = Arc::new(k.condvar());

        for i in 0..10u8 {
            let priority = PRI_DEFAULT - (i + 7) % 10 - 1;
            let (lock, cond, log) = (lock.clone(), cond.clone(), log.clone());
            k.create_thread("waiter", priority, move || {
                lock.acquire();
                cond.wait(&lock);
                record(&log, priority.to_string());
                lock.release();
            })
            .unwrap();
        }

        for _ in 0..10 {
            lock.acquire();
            assert!(cond.signal(&lock));
            lock.release();
        }
        lock.acquire();
        assert!(!cond.signal(&lock));
        lock.release();

        let expected: Vec<String> = (21..=30).rev().map(|p: u8| p.to_string()).collect();
        assert_eq!(entries(&log), expected);
        k.shutdown();
    }

    #[test]
    fn test_condvar_broadcast() {
        let k = boot();
        k.set_priority(PRI_MIN);
        let woken = Arc::new(Mutex::new(0));
        let lock = Arc::new(k.lock());
        let cond = Arc::new(k.condvar());

        for _ in 0..4 {
            let (lock, cond, woken) = (lock.clone(), cond.clone(), woken.clone());
            k.create_thread("waiter", 20, move || {
                lock.acquire();
                cond.wait(&lock);
                *woken.lock().unwrap() += 1;
                lock.release();
            })
            .unwrap();
        }
        assert_eq!(cond.waiters().len(), 4);

        lock.acquire();
        cond.broadcast(&lock);
        lock.release();
        assert_eq!(*woken.lock().unwrap(), 4);
        k.shutdown();
    }

    #[test]
    fn test_time_slice_round_robin() {
        let k = boot();
        k.set_priority(50);
        let log = new_log();

        for name in ["A", "B"] {
            let (kernel, log) = (k.clone(), log.clone());
            k.create_thread(name, 40, move || {
                for _ in 0..8 {
                    record(&log, name);
                    kernel.timer_interrupt();
                }
            })
            .unwrap();
        }

        k.set_priority(10);
        let runs: Vec<String> = entries(&log)
            .chunks(4)
            .map(|chunk| chunk.concat())
            .collect();
        assert_eq!(runs, ["AAAA", "BBBB", "AAAA", "BBBB"]);
        k.shutdown();
    }

    #[test]
    fn test_exit_hooks_and_reclamation() {
        #[derive(Default)]
        struct Recorder {
            exits: Mutex<Vec<ThreadId>>,
            activations: Mutex<usize>,
        }
        impl ProcessHooks for Recorder {
            fn activate(&self, _tid: ThreadId) {
                *self.activations.lock().unwrap() += 1;
            }
            fn exit(&self, tid: ThreadId) {
                self.exits.lock().unwrap().push(tid);
            }
        }

        let hooks = Arc::new(Recorder::default());
        struct Shared(Arc<Recorder>);
        impl ProcessHooks for Shared {
            fn activate(&self, tid: ThreadId) {
                self.0.activate(tid)
            }
            fn exit(&self, tid: ThreadId) {
                self.0.exit(tid)
            }
        }

        let k = Kernel::boot_with_hooks(
            HostedPort::new(),
            KernelConfig::default(),
            Box::new(Shared(hooks.clone())),
        )
        .unwrap();
        let tid = k.create_thread("short", 40, || {}).unwrap();

        assert_eq!(*hooks.exits.lock().unwrap(), [tid]);
        assert!(*hooks.activations.lock().unwrap() >= 2);
        // Dying until a later dispatch reclaims it.
        assert_eq!(k.thread_info(tid).map(|t| t.status), Some(ThreadStatus::Dying));
        k.yield_now();
        assert_eq!(k.thread_info(tid), None);
        k.shutdown();
    }

    #[test]
    fn test_thread_table_exhaustion() {
        let config = KernelConfig {
            max_threads: 3,
            ..KernelConfig::default()
        };
        let k = boot_with(config);
        assert!(k.create_thread("one", 10, || {}).is_ok());
        assert_eq!(
            k.create_thread("two", 10, || {}),
            Err(KernelError::AllocationFailure)
        );
        k.shutdown();
    }

    #[test]
    fn test_mlfqs_priority_is_derived() {
        let k = boot_with(KernelConfig::mlfqs());
        assert_eq!(k.priority(), PRI_MAX);
        k.set_priority(10);
        assert_eq!(k.priority(), PRI_MAX);

        k.set_nice(5);
        assert_eq!(k.nice(), 5);
        assert_eq!(k.priority(), PRI_MAX - 10);
        k.shutdown();
    }

    #[test]
    fn test_mlfqs_load_average() {
        let k = boot_with(KernelConfig::mlfqs());

        // One CPU-bound thread: load_avg never drops and crosses 0.5 after
        // about 42 seconds.
        let mut busy = Vec::new();
        for _ in 0..60 {
            for _ in 0..TIMER_FREQ {
                k.timer_interrupt();
            }
            busy.push(k.load_avg());
        }
        assert!(
            busy.windows(2).all(|w| w[0] <= w[1]),
            "load average fell while busy: {:?}",
            busy
        );
        let crossed = busy.iter().position(|&load| load > 50).map(|i| i + 1);
        assert!(
            matches!(crossed, Some(38..=45)),
            "load average crossed 0.5 at {:?}s",
            crossed
        );
        assert!(k.recent_cpu() > 0);

        // Ten idle seconds: it only decays, ending below 0.5.
        let mut idle = alloc::vec![k.load_avg()];
        for _ in 0..10 {
            k.sleep(TIMER_FREQ as u64);
            idle.push(k.load_avg());
        }
        assert!(
            idle.windows(2).all(|w| w[0] >= w[1]),
            "load average rose while idle: {:?}",
            idle
        );
        assert!(idle[0] > idle[10]);
        assert!(idle[10] < 50, "load average {} after sleeping", idle[10]);
        k.shutdown();
    }

    #[test]
    fn test_mlfqs_recent_cpu_over_minutes() {
        let config = KernelConfig {
            timer_freq: 1000,
            ..KernelConfig::mlfqs()
        };
        let k = boot_with(config);
        let main = k.current();

        // Three minutes of one busy thread at 1000 Hz. recent_cpu settles
        // near 3000 (reported ×100), well past what fits a narrow product.
        let mut samples = Vec::new();
        for _ in 0..180 {
            for _ in 0..1000 {
                k.timer_interrupt();
            }
            let reported = k.recent_cpu();
            assert_eq!(k.thread_info(main).map(|t| t.recent_cpu), Some(reported));
            samples.push(reported);
        }

        assert!(samples[0] > 0);
        assert!(samples[20] > 40_000, "recent_cpu only {} after 21s", samples[20]);
        for &cpu in &samples[120..] {
            assert!(
                (150_000..=320_000).contains(&cpu),
                "recent_cpu {} outside its steady state",
                cpu
            );
        }
        assert!(k.threads().iter().all(|t| t.recent_cpu >= 0));
        assert!(k.load_avg() > 90);
        k.shutdown();
    }

    #[test]
    #[should_panic(expected = "it already holds")]
    fn test_recursive_acquire_is_fatal() {
        let k = boot();
        let lock = k.lock();
        lock.acquire();
        lock.acquire();
    }

    #[test]
    #[should_panic(expected = "not Blocked")]
    fn test_unblock_running_thread_is_fatal() {
        let k = boot();
        k.unblock(k.current());
    }

    #[test]
    #[should_panic(expected = "priority 64 outside")]
    fn test_priority_out_of_range_is_fatal() {
        let k = boot();
        k.set_priority(PRI_MAX + 1);
    }

    #[test]
    #[should_panic(expected = "kernel halted")]
    fn test_panicking_thread_halts_kernel() {
        let k = boot();
        k.create_thread("doomed", 40, || panic!("boom")).unwrap();
    }
}
