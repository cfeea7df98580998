//! # Hosted Port
//!
//! Runs the kernel inside an ordinary process. Every kernel thread is a
//! host thread parked on its own [`Gate`]; a context switch opens the
//! target's gate and parks the caller on its own, so exactly one kernel
//! thread executes at any time (baton passing).
//!
//! ## Virtual Time
//!
//! There is no timer interrupt. Code that wants to model one tick of CPU
//! work calls [`Kernel::timer_interrupt`](crate::kernel::Kernel::timer_interrupt)
//! itself, and [`Port::halt`] reports a tick to the idle thread so that time
//! fast-forwards whenever every thread is blocked.
//!
//! ## Failure
//!
//! A panic in a kernel thread halts the kernel: every gate is poisoned and
//! each parked thread panics with `"kernel halted"` when it wakes, so a
//! failing test reports instead of hanging.

use alloc::boxed::Box;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::{Entry, IntrLevel, Port};
use crate::error::KernelError;

/// Host stack given to each kernel thread, whatever the kernel asks for.
/// Host frames are much larger than a kernel's.
const MIN_HOST_STACK: usize = 256 * 1024;

// ---------------------------------------------------------------------------
// Gate
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GateState {
    /// Waiting to be switched to.
    Parked,
    /// Holding the CPU.
    Running,
    /// Reclaimed by the kernel; the host thread must unwind and finish.
    Reaped,
    /// The kernel halted after a panic.
    Halted,
}

/// Unwind payload used to retire the host thread of a reclaimed context.
struct Reaped;

struct Gate {
    state: Mutex<GateState>,
    cond: Condvar,
}

impl Gate {
    fn new(state: GateState) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(state),
            cond: Condvar::new(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set(&self, state: GateState) {
        *self.lock() = state;
        self.cond.notify_all();
    }

    /// Hand the CPU to this gate's thread.
    fn open(&self) {
        let mut state = self.lock();
        if *state == GateState::Parked {
            *state = GateState::Running;
            self.cond.notify_all();
        }
    }

    fn close(&self) {
        let mut state = self.lock();
        if *state == GateState::Running {
            *state = GateState::Parked;
        }
    }

    /// Block until the gate leaves `Parked`. Returns the state that ended
    /// the wait.
    fn wait(&self) -> GateState {
        let mut state = self.lock();
        while *state == GateState::Parked {
            state = self
                .cond
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *state
    }
}

// ---------------------------------------------------------------------------
// Port
// ---------------------------------------------------------------------------

struct Shared {
    /// The interrupt enable flag of the one virtual CPU.
    intr_on: AtomicBool,
    halted: AtomicBool,
    gates: Mutex<Vec<Weak<Gate>>>,
}

impl Shared {
    fn register(&self, gate: &Arc<Gate>) {
        let mut gates = self.gates.lock().unwrap_or_else(PoisonError::into_inner);
        gates.retain(|g| g.strong_count() > 0);
        gates.push(Arc::downgrade(gate));
    }

    /// Poison every gate so that no parked thread waits forever.
    fn halt(&self) {
        self.halted.store(true, Ordering::SeqCst);
        let gates = self.gates.lock().unwrap_or_else(PoisonError::into_inner);
        for gate in gates.iter().filter_map(Weak::upgrade) {
            gate.set(GateState::Halted);
        }
    }
}

/// Kernel port backed by host threads. Cheap to create; each kernel
/// instance needs its own.
pub struct HostedPort {
    shared: Arc<Shared>,
}

impl HostedPort {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                intr_on: AtomicBool::new(false),
                halted: AtomicBool::new(false),
                gates: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Whether a kernel thread has panicked.
    pub fn is_halted(&self) -> bool {
        self.shared.halted.load(Ordering::SeqCst)
    }
}

impl Default for HostedPort {
    fn default() -> Self {
        Self::new()
    }
}

/// A kernel thread's gate and, unless it is the boot flow, its host thread.
pub struct HostedContext {
    gate: Arc<Gate>,
    thread: Option<JoinHandle<()>>,
}

impl Drop for HostedContext {
    fn drop(&mut self) {
        // The boot flow belongs to the caller of `Kernel::boot`.
        if let Some(handle) = self.thread.take() {
            self.gate.set(GateState::Reaped);
            let _ = handle.join();
        }
    }
}

fn describe(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        *s
    } else if let Some(s) = payload.downcast_ref::<alloc::string::String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

impl Port for HostedPort {
    type Context = HostedContext;

    fn intr_get_level(&self) -> IntrLevel {
        if self.shared.intr_on.load(Ordering::SeqCst) {
            IntrLevel::On
        } else {
            IntrLevel::Off
        }
    }

    fn intr_disable(&self) -> IntrLevel {
        if self.shared.intr_on.swap(false, Ordering::SeqCst) {
            IntrLevel::On
        } else {
            IntrLevel::Off
        }
    }

    fn intr_enable(&self) -> IntrLevel {
        if self.shared.intr_on.swap(true, Ordering::SeqCst) {
            IntrLevel::On
        } else {
            IntrLevel::Off
        }
    }

    fn bootstrap(&self) -> HostedContext {
        let gate = Gate::new(GateState::Running);
        self.shared.register(&gate);
        HostedContext { gate, thread: None }
    }

    fn create(&self, stack_size: usize, entry: Entry) -> Result<HostedContext, KernelError> {
        let gate = Gate::new(GateState::Parked);
        self.shared.register(&gate);

        let start = Arc::clone(&gate);
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("kthread".into())
            .stack_size(stack_size.max(MIN_HOST_STACK))
            .spawn(move || {
                if start.wait() != GateState::Running {
                    return;
                }
                drop(start);

                match panic::catch_unwind(AssertUnwindSafe(entry)) {
                    Ok(()) => {
                        log::error!("kernel thread entry returned");
                        shared.halt();
                    }
                    Err(payload) if payload.is::<Reaped>() => {}
                    Err(payload) => {
                        log::error!("kernel thread panicked: {}", describe(payload.as_ref()));
                        shared.halt();
                    }
                }
            })
            .map_err(|_| KernelError::AllocationFailure)?;

        Ok(HostedContext {
            gate,
            thread: Some(handle),
        })
    }

    unsafe fn switch(&self, from: *const HostedContext, to: *const HostedContext) {
        // Neither context may be touched once `to` runs: it may reclaim `from`.
        let (mine, next) = unsafe { (Arc::clone(&(*from).gate), Arc::clone(&(*to).gate)) };
        log::trace!("gate handoff");

        mine.close();
        next.open();
        match mine.wait() {
            GateState::Running => {}
            GateState::Reaped => panic::resume_unwind(Box::new(Reaped)),
            GateState::Halted | GateState::Parked => panic!("kernel halted"),
        }
    }

    fn halt(&self) -> bool {
        true
    }

    fn busy_wait(&self, num: u64, denom: u64) {
        let nanos = (num as u128 * 1_000_000_000 / denom.max(1) as u128) as u64;
        thread::sleep(Duration::from_nanos(nanos));
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
