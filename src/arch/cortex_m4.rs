//! # Cortex-M4 Port Layer
//!
//! Hardware-specific code for the ARM Cortex-M4 (Thumb-2) processor.
//! Implements context switching via PendSV, SysTick timer configuration,
//! and interrupt management through PRIMASK.
//!
//! ## Context Switch Mechanism
//!
//! The Cortex-M4 uses a split-stack model:
//! - **MSP** (Main Stack Pointer): Used by interrupt handlers
//! - **PSP** (Process Stack Pointer): Used by kernel threads in Thread mode
//!
//! On exception entry, the hardware automatically stacks R0–R3, R12, LR, PC,
//! and xPSR onto the process stack. The PendSV handler saves and restores
//! R4–R11, which completes the full context save/restore.
//!
//! [`Port::switch`] records which contexts to swap, pends PendSV, and
//! briefly unmasks interrupts so the exception is taken. When called from
//! the SysTick handler the PendSV tail-chains instead, after the handler
//! returns, which is exactly a yield on interrupt return.
//!
//! ## Interrupt Priorities
//!
//! - SysTick: Priority 0xFF (lowest)
//! - PendSV: Priority 0xFF (lowest): runs only when no other ISR is active

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::arch::{asm, global_asm};
use core::cell::UnsafeCell;
use core::ptr::{addr_of_mut, null_mut};

use cortex_m::peripheral::scb::SystemHandler;
use cortex_m::peripheral::syst::SystClkSource;
use cortex_m::peripheral::{SCB, SYST};
use cortex_m::register::primask;

use super::{Entry, IntrLevel, Port};
use crate::config::SYSTEM_CLOCK_HZ;
use crate::error::KernelError;

/// Words of the initial frame: R4–R11 saved by software, then the
/// hardware frame R0–R3, R12, LR, PC, xPSR.
const FRAME_WORDS: usize = 16;

/// Thumb state bit; the only xPSR bit a fresh thread needs.
const XPSR_THUMB: u32 = 0x0100_0000;

/// Handler-mode stack once thread mode has moved to PSP.
const HANDLER_STACK_WORDS: usize = 512;

static mut HANDLER_STACK: [u64; HANDLER_STACK_WORDS] = [0; HANDLER_STACK_WORDS];

/// Where PendSV stores the outgoing PSP.
static mut SWITCH_SAVE: *mut *mut u32 = null_mut();

/// Where PendSV reads the incoming PSP.
static mut SWITCH_LOAD: *mut *mut u32 = null_mut();

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Saved PSP of a thread plus the stack it points into.
pub struct Context {
    sp: UnsafeCell<*mut u32>,
    /// `None` for the boot flow, which keeps the reset stack.
    stack: Option<Box<[u64]>>,
}

// Safety: `sp` always points into `stack` (or the boot stack) and is only
// touched by PendSV and by `switch` with interrupts masked.
unsafe impl Send for Context {}

impl Context {
    /// Lay out a fresh stack whose first PendSV return enters `trampoline`
    /// with the boxed entry in R0.
    fn new(stack_size: usize, entry: Entry) -> Result<Self, KernelError> {
        let words = (stack_size / 8).max(FRAME_WORDS);
        let mut stack = Vec::new();
        stack
            .try_reserve_exact(words)
            .map_err(|_| KernelError::AllocationFailure)?;
        stack.resize(words, 0u64);
        let mut stack = stack.into_boxed_slice();

        let arg = Box::into_raw(Box::new(entry));
        let frame = unsafe {
            // Top of stack, 8-byte aligned by construction.
            let top = stack.as_mut_ptr().add(words) as *mut u32;
            let frame = top.sub(FRAME_WORDS);
            for i in 0..8 {
                frame.add(i).write(0); // R4–R11
            }
            frame.add(8).write(arg as u32); // R0
            frame.add(9).write(0); // R1
            frame.add(10).write(0); // R2
            frame.add(11).write(0); // R3
            frame.add(12).write(0); // R12
            frame.add(13).write(thread_return as usize as u32); // LR
            frame.add(14).write(trampoline as usize as u32 & !1); // PC
            frame.add(15).write(XPSR_THUMB); // xPSR
            frame
        };

        Ok(Self {
            sp: UnsafeCell::new(frame),
            stack: Some(stack),
        })
    }
}

/// First code run by every new thread.
extern "C" fn trampoline(arg: *mut Entry) -> ! {
    let entry = unsafe { Box::from_raw(arg) };
    (*entry)();
    thread_return()
}

/// Entry closures end in `Kernel::exit`; reaching here is a kernel bug.
extern "C" fn thread_return() -> ! {
    panic!("kernel thread returned from its entry");
}

// ---------------------------------------------------------------------------
// PendSV handler (context switch)
// ---------------------------------------------------------------------------

// 1. Save R4–R11 onto the outgoing thread's stack (PSP)
// 2. Store the updated PSP through SWITCH_SAVE
// 3. Load the incoming PSP through SWITCH_LOAD
// 4. Restore R4–R11 from the incoming stack
// 5. Return to Thread mode on PSP (EXC_RETURN = 0xFFFFFFFD); the hardware
//    restores R0–R3, R12, LR, PC, xPSR
global_asm!(
    ".section .text.PendSV,\"ax\",%progbits",
    ".global PendSV",
    ".type PendSV,%function",
    ".thumb_func",
    "PendSV:",
    "    mrs r0, psp",
    "    stmdb r0!, {{r4-r11}}",
    "    ldr r1, ={save}",
    "    ldr r1, [r1]",
    "    str r0, [r1]",
    "    ldr r1, ={load}",
    "    ldr r1, [r1]",
    "    ldr r0, [r1]",
    "    ldmia r0!, {{r4-r11}}",
    "    msr psp, r0",
    "    ldr r0, =0xFFFFFFFD",
    "    bx r0",
    save = sym SWITCH_SAVE,
    load = sym SWITCH_LOAD,
);

// ---------------------------------------------------------------------------
// SysTick and priorities
// ---------------------------------------------------------------------------

/// Configure SysTick to fire `timer_freq` times per second from the
/// processor clock. The firmware's SysTick handler delivers each tick to
/// `Kernel::timer_interrupt`.
pub fn configure_systick(syst: &mut SYST, timer_freq: u32) {
    let reload = SYSTEM_CLOCK_HZ / timer_freq - 1;
    syst.set_reload(reload);
    syst.clear_current();
    syst.set_clock_source(SystClkSource::Core);
    syst.enable_counter();
    syst.enable_interrupt();
}

/// Set PendSV and SysTick to the lowest interrupt priority, so a context
/// switch never preempts another handler.
pub fn set_interrupt_priorities(scb: &mut SCB) {
    unsafe {
        scb.set_priority(SystemHandler::PendSV, 0xFF);
        scb.set_priority(SystemHandler::SysTick, 0xFF);
    }
}

// ---------------------------------------------------------------------------
// Port
// ---------------------------------------------------------------------------

/// The Cortex-M4 port. Only one may exist.
pub struct CortexM4 {
    _private: (),
}

impl CortexM4 {
    /// # Safety
    /// Must be called once, before any kernel runs, from privileged Thread
    /// mode on the main stack.
    pub unsafe fn new() -> Self {
        Self { _private: () }
    }
}

impl Port for CortexM4 {
    type Context = Context;

    fn intr_get_level(&self) -> IntrLevel {
        if primask::read().is_active() {
            IntrLevel::On
        } else {
            IntrLevel::Off
        }
    }

    fn intr_disable(&self) -> IntrLevel {
        let old = self.intr_get_level();
        cortex_m::interrupt::disable();
        old
    }

    fn intr_enable(&self) -> IntrLevel {
        let old = self.intr_get_level();
        unsafe { cortex_m::interrupt::enable() };
        old
    }

    /// Move Thread mode onto PSP, keeping the current stack, and give
    /// handlers their own stack on MSP.
    fn bootstrap(&self) -> Context {
        unsafe {
            let handler_top = addr_of_mut!(HANDLER_STACK) as *mut u64 as usize
                + HANDLER_STACK_WORDS * 8;
            asm!(
                "mrs {tmp}, msp",
                "msr psp, {tmp}",
                "mrs {tmp}, control",
                "orr {tmp}, {tmp}, #2",
                "msr control, {tmp}",
                "isb",
                "msr msp, {top}",
                tmp = out(reg) _,
                top = in(reg) handler_top,
            );
        }
        Context {
            sp: UnsafeCell::new(null_mut()),
            stack: None,
        }
    }

    fn create(&self, stack_size: usize, entry: Entry) -> Result<Context, KernelError> {
        Context::new(stack_size, entry)
    }

    unsafe fn switch(&self, from: *const Context, to: *const Context) {
        SWITCH_SAVE = (*from).sp.get();
        SWITCH_LOAD = (*to).sp.get();
        SCB::set_pendsv();
        // Window for the pended switch; execution resumes here when `from`
        // is next switched to.
        asm!("cpsie i", "isb", "cpsid i");
    }

    fn halt(&self) -> bool {
        cortex_m::asm::wfi();
        false
    }

    fn busy_wait(&self, num: u64, denom: u64) {
        let cycles = SYSTEM_CLOCK_HZ as u64 * num / denom.max(1);
        cortex_m::asm::delay(cycles.min(u32::MAX as u64) as u32);
    }
}
