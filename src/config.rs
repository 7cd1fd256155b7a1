//! # SPOS Configuration
//!
//! Compile-time constants governing the scheduler and system behavior.
//! All limits are fixed at compile time; no dynamic allocation.

use crate::strategy::SchedulingStrategy;

/// Number of slots in the process table, idle process included.
/// Each slot owns `STACK_SIZE` bytes of RAM for its private stack.
pub const MAX_PROCESSES: usize = 8;

/// Per-process stack size in bytes. Must hold the deepest call chain plus
/// the full saved context (hardware frame and R4–R11, 64 bytes).
pub const STACK_SIZE: usize = 1024;

/// SysTick frequency in Hz. One tick is one scheduling quantum.
pub const TICK_HZ: u32 = 100;

/// System clock frequency in Hz (default for STM32F4 at 16 MHz HSI).
pub const SYSTEM_CLOCK_HZ: u32 = 16_000_000;

/// Priority given to the idle process and to every autostart program.
pub const DEFAULT_PRIORITY: u8 = 17;

/// Most favourable priority a process (or an aged process) can reach.
pub const MAX_PRIORITY: u8 = u8::MAX;

/// Strategy active after `Scheduler::init`.
pub const DEFAULT_STRATEGY: SchedulingStrategy = SchedulingStrategy::Even;
