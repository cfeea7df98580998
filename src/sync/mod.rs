//! # Synchronization Primitives
//!
//! Counting semaphores, non-recursive locks with priority donation, and
//! Mesa-style condition variables.
//!
//! ## Layout
//!
//! Each primitive has two halves:
//!
//! - **State** (`SemaphoreState`, `LockState`, `CondvarState`) stored in the
//!   scheduler's tables and mutated only inside a critical section.
//! - **Handle** ([`Semaphore`], [`Lock`], [`Condvar`]) owned by kernel code.
//!   A handle carries its kernel and the identifier of its state; dropping
//!   the handle frees the state.
//!
//! Waiting threads are referred to by [`ThreadId`](crate::thread::ThreadId),
//! never by pointer, so a thread that blocks on a primitive stays owned by
//! the scheduler's thread table.

pub mod condvar;
pub mod lock;
pub mod semaphore;

pub use condvar::{Condvar, CondvarId};
pub use lock::{Lock, LockId};
pub use semaphore::{Semaphore, SemaphoreId};

use crate::arch::{IntrLevel, Port};

/// Execute a closure with interrupts disabled on `port`.
///
/// The previous interrupt level is restored on exit, including exit by
/// panic, so critical sections nest. Every access to scheduler state
/// happens inside one.
///
/// # Usage
/// ```ignore
/// sync::critical_section(&port, || {
///     // Touch state shared with the timer interrupt
/// });
/// ```
#[inline]
pub fn critical_section<P, F, R>(port: &P, f: F) -> R
where
    P: Port,
    F: FnOnce() -> R,
{
    let _guard = IntrGuard {
        port,
        old: port.intr_disable(),
    };
    f()
}

struct IntrGuard<'a, P: Port> {
    port: &'a P,
    old: IntrLevel,
}

impl<P: Port> Drop for IntrGuard<'_, P> {
    fn drop(&mut self) {
        self.port.intr_set_level(self.old);
    }
}
