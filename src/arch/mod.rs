//! # Architecture Abstraction Layer
//!
//! Provides a hardware abstraction boundary for the scheduler. Everything
//! the kernel needs from the machine goes through the [`Port`] trait:
//! the interrupt enable flag, execution contexts and the switch between
//! them, halting until the next interrupt, and calibrated busy-waiting.
//!
//! Two ports exist:
//! - [`hosted`] (feature `std`): kernel threads on host threads, with a
//!   virtual timer. Used by the test suite.
//! - [`cortex_m4`] (feature `cortex-m4`): PSP stack frames swapped by
//!   PendSV, ticks from SysTick.

#[cfg(feature = "cortex-m4")]
pub mod cortex_m4;
#[cfg(feature = "std")]
pub mod hosted;

use alloc::boxed::Box;

use crate::error::KernelError;

/// State of the interrupt enable flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntrLevel {
    On,
    Off,
}

/// Entry point of a new execution context. Runs once, on the new context's
/// own stack.
pub type Entry = Box<dyn FnOnce() + Send + 'static>;

/// Machine services consumed by the kernel.
///
/// A single logical CPU is assumed: at most one context executes at a
/// time, and disabling interrupts excludes everything else.
pub trait Port: Send + Sync + 'static {
    /// A saved register state plus the stack it runs on. Dropping a context
    /// that is not running frees its stack.
    type Context: Send + 'static;

    fn intr_get_level(&self) -> IntrLevel;

    /// Disable interrupts, returning the previous level.
    fn intr_disable(&self) -> IntrLevel;

    /// Enable interrupts, returning the previous level.
    fn intr_enable(&self) -> IntrLevel;

    /// Restore a level returned by `intr_disable` or `intr_enable`.
    fn intr_set_level(&self, level: IntrLevel) -> IntrLevel {
        match level {
            IntrLevel::On => self.intr_enable(),
            IntrLevel::Off => self.intr_disable(),
        }
    }

    /// Adopt the calling flow of execution as a context. Called once, at
    /// boot.
    fn bootstrap(&self) -> Self::Context;

    /// Create a context with a stack of `stack_size` bytes that runs
    /// `entry` when first switched to.
    fn create(&self, stack_size: usize, entry: Entry) -> Result<Self::Context, KernelError>;

    /// Save the running state into `from` and resume `to`. Returns when
    /// some later switch resumes `from`. Called with interrupts disabled.
    ///
    /// # Safety
    /// Both pointers must refer to live contexts that stay put until the
    /// switch returns; `from` must be the running context.
    unsafe fn switch(&self, from: *const Self::Context, to: *const Self::Context);

    /// Wait for the next interrupt. Returns `true` if a timer tick elapsed
    /// that the kernel must deliver itself (ports without a real timer
    /// interrupt), `false` if the tick handler already ran.
    fn halt(&self) -> bool;

    /// Spin for approximately `num / denom` seconds.
    fn busy_wait(&self, num: u64, denom: u64);
}
