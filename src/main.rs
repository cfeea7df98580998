//! # kthreads Demo Firmware
//!
//! Boots the kernel on a Cortex-M4 and runs a few threads that exercise the
//! scheduler:
//!
//! | Thread | Priority | Behavior |
//! |--------|----------|----------|
//! | `main` | 31 | Holds the shared lock, then reports statistics every second |
//! | `producer` | 20 | Raises a semaphore every 10 ms |
//! | `consumer` | 25 | Waits on the semaphore, then takes the shared lock |
//! | `urgent` | 50 | Sleeps, then contends for the shared lock |
//! | `spinner` | 10 | Never blocks; preempted at time-slice expiry |
//!
//! ## Expected Dynamics
//!
//! 1. `main` takes the shared lock before creating anything, so `urgent`
//!    blocks on it and donates priority 50 to `main`.
//! 2. `main` releases the lock after a short delay; donation is revoked and
//!    `urgent` runs at once.
//! 3. `producer` and `consumer` then alternate through the semaphore, while
//!    `spinner` soaks up whatever CPU time is left.

#![no_std]
#![no_main]

extern crate alloc;

use alloc::sync::Arc;
use core::ptr::addr_of_mut;

use cortex_m_rt::{entry, exception};
use linked_list_allocator::LockedHeap;
use panic_halt as _;

use kthreads::arch::cortex_m4::{self, CortexM4};
use kthreads::{Kernel, KernelConfig};

#[global_allocator]
static ALLOCATOR: LockedHeap = LockedHeap::empty();

const HEAP_SIZE: usize = 32 * 1024;
static mut HEAP_MEM: [u8; HEAP_SIZE] = [0; HEAP_SIZE];

static KERNEL: spin::Once<Kernel<CortexM4>> = spin::Once::new();

// ---------------------------------------------------------------------------
// Interrupt handlers
// ---------------------------------------------------------------------------

#[exception]
fn SysTick() {
    if let Some(kernel) = KERNEL.get() {
        kernel.timer_interrupt();
    }
}

// ---------------------------------------------------------------------------
// Main entry point
// ---------------------------------------------------------------------------

/// Firmware entry point. Boots the kernel, creates the demo threads and
/// becomes the `main` kernel thread. Does not return.
#[entry]
fn main() -> ! {
    unsafe {
        ALLOCATOR
            .lock()
            .init(addr_of_mut!(HEAP_MEM) as *mut u8, HEAP_SIZE);
    }

    let Some(mut cp) = cortex_m::Peripherals::take() else {
        panic!("core peripherals already taken");
    };
    cortex_m4::set_interrupt_priorities(&mut cp.SCB);

    let config = KernelConfig::default();
    let port = unsafe { CortexM4::new() };
    let kernel = match Kernel::boot(port, config) {
        Ok(kernel) => KERNEL.call_once(|| kernel),
        Err(err) => panic!("boot failed: {}", err),
    };
    cortex_m4::configure_systick(&mut cp.SYST, config.timer_freq);

    let shared = Arc::new(kernel.lock());
    let items = Arc::new(kernel.semaphore(0));
    shared.acquire();

    spawn(kernel, "producer", 20, {
        let items = items.clone();
        move || loop {
            kernel.msleep(10);
            items.up();
        }
    });

    spawn(kernel, "consumer", 25, {
        let (items, shared) = (items.clone(), shared.clone());
        move || loop {
            items.down();
            shared.acquire();
            shared.release();
        }
    });

    spawn(kernel, "urgent", 50, {
        let shared = shared.clone();
        move || loop {
            shared.acquire();
            kernel.mdelay(1);
            shared.release();
            kernel.msleep(100);
        }
    });

    spawn(kernel, "spinner", 10, || {
        let mut _counter: u32 = 0;
        loop {
            _counter = _counter.wrapping_add(1);
        }
    });

    // `urgent` is blocked on the lock; we run at its priority until release.
    kernel.mdelay(5);
    shared.release();

    loop {
        kernel.msleep(1_000);
        kernel.print_stats();
    }
}

fn spawn<F>(kernel: &'static Kernel<CortexM4>, name: &str, priority: u8, f: F)
where
    F: FnOnce() + Send + 'static,
{
    if let Err(err) = kernel.create_thread(name, priority, f) {
        panic!("failed to create {}: {}", name, err);
    }
}
