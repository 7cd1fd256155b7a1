//! # Architecture Abstraction Layer
//!
//! Provides a hardware abstraction boundary for the scheduler. The portable
//! core only sees the [`Port`] trait, the context frame layout and the idle
//! and exit programs; register save/restore lives entirely in the port.
//!
//! - `cortex_m4`: the real port (PRIMASK, SysTick, PendSV).
//! - `hosted`: a software model of the same interrupt controls, used when
//!   the crate is built for anything other than ARM (host unit tests).

#[cfg(target_arch = "arm")]
pub mod cortex_m4;
#[cfg(not(target_arch = "arm"))]
pub mod hosted;

#[cfg(target_arch = "arm")]
pub use cortex_m4::{request_switch, wait_for_interrupt, CortexM4 as Platform};
#[cfg(not(target_arch = "arm"))]
pub use hosted::{request_switch, wait_for_interrupt, Hosted as Platform};

use crate::config::STACK_SIZE;
use crate::stack::{Stack, StackPointer};

/// Interrupt controls the critical-section guard relies on.
pub trait Port {
    /// Mask all interrupts, returning whether they were enabled before.
    fn mask_interrupts(&mut self) -> bool;

    /// Re-enable interrupts if `was_enabled`; otherwise leave them masked.
    fn restore_interrupts(&mut self, was_enabled: bool);

    /// Gate the scheduling tick source.
    fn set_tick_enabled(&mut self, enabled: bool);

    fn tick_enabled(&self) -> bool;
}

// ---------------------------------------------------------------------------
// Context frame
// ---------------------------------------------------------------------------

/// Registers R4–R11, saved by software on every switch.
pub const SOFTWARE_FRAME_WORDS: usize = 8;

/// R0–R3, R12, LR, PC and xPSR, stacked by the exception entry.
pub const HARDWARE_FRAME_WORDS: usize = 8;

/// Bytes one saved context occupies on a process stack.
pub const CONTEXT_FRAME_SIZE: usize = (SOFTWARE_FRAME_WORDS + HARDWARE_FRAME_WORDS) * 4;

/// xPSR with only the Thumb bit set.
const INITIAL_XPSR: u32 = 0x0100_0000;

const _: () = assert!(STACK_SIZE >= CONTEXT_FRAME_SIZE && STACK_SIZE % 8 == 0);

/// Write the context frame a fresh process is first restored from.
///
/// ## Stack Layout (top = high address, growing down)
///
/// ```text
/// [Hardware stacked frame]
///   xPSR  (Thumb bit set)
///   PC    (program entry)
///   LR    (process_exit)
///   R12, R3, R2, R1, R0   (0)
/// [Software saved context]
///   R11 .. R4             (0)   <- returned stack pointer
/// ```
pub fn init_stack_frame(stack: &mut Stack, entry: usize) -> StackPointer {
    let mut frame = [0u32; SOFTWARE_FRAME_WORDS + HARDWARE_FRAME_WORDS];
    frame[SOFTWARE_FRAME_WORDS + 5] = process_exit as usize as u32;
    frame[SOFTWARE_FRAME_WORDS + 6] = entry as u32;
    frame[SOFTWARE_FRAME_WORDS + 7] = INITIAL_XPSR;

    // Cannot fail: the frame always fits an empty stack (asserted above).
    stack
        .push_words(StackPointer::EMPTY, &frame)
        .unwrap_or(StackPointer::EMPTY)
}

// ---------------------------------------------------------------------------
// Built-in programs
// ---------------------------------------------------------------------------

/// The idle program. It owns all processor time no other process wants.
pub extern "C" fn idle() -> ! {
    loop {
        wait_for_interrupt();
    }
}

/// Return address planted in every initial frame. Programs never return, but
/// if one does its process is ended instead of running off into garbage.
extern "C" fn process_exit() -> ! {
    crate::kernel::exit()
}
