//! # kthreads: Kernel Threads and Synchronization
//!
//! A preemptive, priority-driven thread scheduler with the synchronization
//! core of a small teaching kernel.
//!
//! ## Overview
//!
//! The kernel multiplexes one CPU among kernel threads:
//!
//! - **Priority scheduling**: the highest-priority ready thread always runs;
//!   equal priorities share the CPU round-robin in fixed time slices
//! - **Priority donation**: a thread blocked on a lock lends its priority to
//!   the holder, transitively, up to a bounded depth
//! - **MLFQS** (optional, chosen at boot): priorities derived from recent
//!   CPU usage and niceness instead of being set by threads
//! - **Alarm**: threads sleep on the timer without busy-waiting
//! - **Sync primitives**: semaphores, locks and condition variables, all
//!   waking the highest-priority waiter first
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                    Kernel Threads                       │
//! ├────────────────────────────────────────────────────────┤
//! │                 Kernel API (kernel.rs)                  │
//! │   boot() · create_thread() · block() · yield_now()     │
//! │   exit() · timer_interrupt() · set_priority()          │
//! ├──────────────┬────────────────────┬───────────────────┤
//! │  Scheduler   │  Policies          │  Sync Primitives  │
//! │  scheduler.rs│  donation.rs       │  sync/            │
//! │  ─ unblock() │  mlfqs.rs          │  ─ Semaphore      │
//! │  ─ schedule()│  alarm.rs          │  ─ Lock           │
//! │  ─ tick()    │  timer.rs          │  ─ Condvar        │
//! ├──────────────┴────────────────────┴───────────────────┤
//! │      Thread Model (thread.rs) · Fixed Point             │
//! │    TCB · ThreadStatus · ThreadInfo · Fixed              │
//! ├────────────────────────────────────────────────────────┤
//! │                  Port (arch/mod.rs)                     │
//! │  hosted.rs: host threads     cortex_m4.rs: PendSV      │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Memory Model
//!
//! - **`alloc` required**: thread records, wait lists and contexts live on
//!   the heap
//! - **Threads by identifier**: every list holds [`ThreadId`]s; the thread
//!   table owns the records
//! - **Critical sections**: all scheduler state sits behind one lock taken
//!   with interrupts disabled
//!
//! ## Example
//!
//! ```no_run
//! use kthreads::{HostedPort, Kernel, KernelConfig};
//!
//! let kernel = Kernel::boot(HostedPort::new(), KernelConfig::default()).unwrap();
//! let k = kernel.clone();
//! kernel
//!     .create_thread("worker", 40, move || {
//!         k.sleep(10);
//!     })
//!     .unwrap();
//! ```

#![no_std]

extern crate alloc;
#[cfg(feature = "std")]
extern crate std;

pub mod alarm;
pub mod arch;
pub mod config;
pub mod donation;
pub mod error;
pub mod fixed_point;
pub mod kernel;
pub mod mlfqs;
pub mod scheduler;
pub mod sync;
pub mod thread;
pub mod timer;

#[cfg(feature = "std")]
pub use arch::hosted::HostedPort;
pub use arch::{IntrLevel, Port};
pub use config::KernelConfig;
pub use error::{ConfigError, KernelError};
pub use fixed_point::Fixed;
pub use kernel::{Kernel, ProcessHooks};
pub use sync::{Condvar, Lock, Semaphore};
pub use thread::{ThreadId, ThreadInfo, ThreadStats, ThreadStatus};
