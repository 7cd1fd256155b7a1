//! # Cortex-M4 Port Layer
//!
//! Hardware-specific code for the ARM Cortex-M4 (Thumb-2) processor.
//! Implements context switching via PendSV, SysTick timer configuration,
//! and the interrupt controls behind critical sections.
//!
//! ## Context Switch Mechanism
//!
//! The Cortex-M4 uses a split-stack model:
//! - **MSP** (Main Stack Pointer): Used by the kernel and interrupt handlers
//! - **PSP** (Process Stack Pointer): Used by processes in Thread mode
//!
//! On exception entry, the hardware automatically stacks R0–R3, R12, LR, PC,
//! and xPSR onto the process stack. The PendSV handler manually saves and
//! restores R4–R11, which completes the full context save/restore. The
//! scheduler itself (and the task manager it may open) runs on the MSP.
//!
//! ## Interrupt Priorities
//!
//! - SysTick: Priority 0xFF (lowest), only pends PendSV
//! - PendSV: Priority 0xFF (lowest), runs only when no other ISR is active
//!
//! A critical section clears SysTick's TICKINT bit and drops a tick that was
//! already pending, so no tick (and thus no switch) is serviced until the
//! outermost section is left.

use core::arch::{asm, global_asm};
use core::ptr;

use cortex_m::peripheral::syst::SystClkSource;
use cortex_m::register::primask;

use super::Port;
use crate::config::{SYSTEM_CLOCK_HZ, TICK_HZ};

/// SysTick Control and Status Register.
const SYST_CSR: *mut u32 = 0xE000_E010 as *mut u32;
const SYST_CSR_TICKINT: u32 = 1 << 1;

/// Interrupt Control and State Register; bit 28 pends PendSV, bit 25 drops a
/// pending SysTick.
const ICSR: *mut u32 = 0xE000_ED04 as *mut u32;
const ICSR_PENDSVSET: u32 = 1 << 28;
const ICSR_PENDSTCLR: u32 = 1 << 25;

/// System Handler Priority Register 3 (PendSV in [23:16], SysTick in [31:24]).
const SHPR3: *mut u32 = 0xE000_ED20 as *mut u32;

// ---------------------------------------------------------------------------
// Interrupt controls
// ---------------------------------------------------------------------------

/// PRIMASK for the global enable bit, TICKINT for the tick gate.
#[derive(Debug, Default)]
pub struct CortexM4;

impl CortexM4 {
    pub const fn new() -> Self {
        CortexM4
    }
}

impl Port for CortexM4 {
    fn mask_interrupts(&mut self) -> bool {
        let was_enabled = primask::read().is_active();
        cortex_m::interrupt::disable();
        was_enabled
    }

    fn restore_interrupts(&mut self, was_enabled: bool) {
        if was_enabled {
            unsafe { cortex_m::interrupt::enable() };
        }
    }

    fn set_tick_enabled(&mut self, enabled: bool) {
        unsafe {
            let csr = ptr::read_volatile(SYST_CSR);
            if enabled {
                ptr::write_volatile(SYST_CSR, csr | SYST_CSR_TICKINT);
            } else {
                ptr::write_volatile(SYST_CSR, csr & !SYST_CSR_TICKINT);
                // The counter may have wrapped before TICKINT was cleared.
                ptr::write_volatile(ICSR, ICSR_PENDSTCLR);
            }
        }
    }

    fn tick_enabled(&self) -> bool {
        unsafe { ptr::read_volatile(SYST_CSR) & SYST_CSR_TICKINT != 0 }
    }
}

// ---------------------------------------------------------------------------
// SysTick configuration
// ---------------------------------------------------------------------------

/// Configure the SysTick timer for the scheduling quantum.
///
/// Sets up SysTick to fire at `TICK_HZ` frequency using the processor
/// clock. Each tick pends PendSV, which performs the switch.
pub fn configure_systick(syst: &mut cortex_m::peripheral::SYST) {
    let reload = SYSTEM_CLOCK_HZ / TICK_HZ - 1;
    syst.set_reload(reload);
    syst.clear_current();
    syst.set_clock_source(SystClkSource::Core);
    syst.enable_counter();
    syst.enable_interrupt();
}

/// Set PendSV and SysTick to the lowest interrupt priority.
///
/// This ensures context switches never preempt application-level ISRs.
pub fn set_interrupt_priorities() {
    unsafe {
        let val = ptr::read_volatile(SHPR3);
        ptr::write_volatile(SHPR3, val | (0xFF << 16) | (0xFF << 24));
    }
}

// ---------------------------------------------------------------------------
// PendSV trigger
// ---------------------------------------------------------------------------

/// Pend a PendSV exception to perform a context switch.
#[inline]
pub fn request_switch() {
    unsafe {
        ptr::write_volatile(ICSR, ICSR_PENDSVSET);
    }
}

#[inline]
pub fn wait_for_interrupt() {
    cortex_m::asm::wfi();
}

// ---------------------------------------------------------------------------
// First process launch
// ---------------------------------------------------------------------------

/// Start the first process by switching to PSP and branching to Thread mode.
///
/// `psp` points at a full context frame as written by `init_stack_frame`.
/// The software-saved registers are skipped and the hardware frame is
/// unstacked by hand, since there is no exception to return from yet.
///
/// # Safety
/// Must only be called once, with interrupts masked and `psp` pointing at a
/// valid initial frame.
pub unsafe fn start_first_task(psp: *const u32) -> ! {
    asm!(
        // Skip the 8 software-saved registers (R4–R11)
        "adds r0, #32",
        "msr psp, r0",

        // Thread mode uses PSP from now on (CONTROL.SPSEL = 1)
        "movs r0, #2",
        "msr control, r0",
        "isb",

        // Unstack the hardware frame
        "pop {{r0-r3, r12}}",
        "pop {{r4}}",          // LR (process_exit)
        "pop {{r5}}",          // PC (program entry)
        "pop {{r6}}",          // xPSR (discarded)
        "mov lr, r4",

        "cpsie i",
        "bx r5",

        in("r0") psp,
        options(noreturn)
    );
}

// ---------------------------------------------------------------------------
// PendSV handler (context switch)
// ---------------------------------------------------------------------------

// PendSV exception handler: performs the actual context switch.
//
// 1. Save R4–R11 onto the running process's stack (PSP)
// 2. Hand the resulting stack top to the scheduler
// 3. Restore R4–R11 from the stack top it returns
// 4. Return from exception to Thread mode on PSP; the hardware restores the
//    rest of the frame
global_asm!(
    ".section .text.PendSV,\"ax\",%progbits",
    ".global PendSV",
    ".type PendSV,%function",
    ".thumb_func",
    "PendSV:",
    "    cpsid i",
    "    mrs r0, psp",
    "    stmdb r0!, {{r4-r11}}",
    "    bl {switch}",
    "    ldmia r0!, {{r4-r11}}",
    "    msr psp, r0",
    "    cpsie i",
    "    ldr r0, =0xFFFFFFFD",
    "    bx r0",
    "    .ltorg",
    ".size PendSV, . - PendSV",
    switch = sym switch_context,
);

/// Called from PendSV with the saved stack top; returns the one to restore.
unsafe extern "C" fn switch_context(psp: *mut u32) -> *mut u32 {
    crate::kernel::switch_from_isr(psp as usize) as *mut u32
}

// ---------------------------------------------------------------------------
// SysTick handler
// ---------------------------------------------------------------------------

/// SysTick exception handler: one scheduling quantum has elapsed.
#[no_mangle]
pub unsafe extern "C" fn SysTick() {
    request_switch();
}
