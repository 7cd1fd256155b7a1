//! # SPOS — Simple Preemptive Operating System
//!
//! A preemptive multitasking kernel for single-core ARM Cortex-M4
//! microcontrollers, written to teach operating-system fundamentals.
//!
//! ## Overview
//!
//! A fixed number of programs share one processor. A periodic timer tick
//! suspends the running process, asks a pluggable scheduling strategy which
//! process runs next and resumes it, while a checksum over every suspended
//! stack catches processes that overflow into each other.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                   Application Programs                  │
//! ├────────────────────────────────────────────────────────┤
//! │                 Kernel API (kernel.rs)                  │
//! │      init() · exec() · kill() · start() · yield_now()   │
//! ├──────────────┬────────────────────┬───────────────────┤
//! │  Scheduler   │   Strategies       │  Sync Primitives  │
//! │  scheduler.rs│   strategy.rs      │  sync.rs          │
//! │  ─ switch()  │   ─ Even/RoundRobin│  ─ CriticalSection│
//! │  ─ exec()    │   ─ Random/RunToC. │                   │
//! │  ─ verify()  │   ─ InactiveAging  │                   │
//! ├──────────────┴────────────────────┴───────────────────┤
//! │     Process Table (process.rs) · Stacks (stack.rs)      │
//! │   Process · ProcessState · StackPointer · checksum      │
//! ├────────────────────────────────────────────────────────┤
//! │   Arch Port (arch/cortex_m4.rs) · Board (board.rs)      │
//! │   PendSV · SysTick · Context Frame · Buttons · Fatal    │
//! ├────────────────────────────────────────────────────────┤
//! │         ARM Cortex-M4 Hardware (Thumb-2)                │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Memory Model
//!
//! - **No heap**: All state is statically allocated
//! - **No `alloc`**: Pure `core` only
//! - **Fixed-size process table**: `[Process; MAX_PROCESSES]`
//! - **Per-process stack**: `[u8; STACK_SIZE]`, stack tops kept as offsets
//! - **Critical sections**: gate the SysTick interrupt, nesting counted
//!
//! On targets other than ARM the `arch::hosted` port replaces the hardware
//! so the whole scheduler can be unit-tested on the host.

#![no_std]

pub mod arch;
pub mod board;
pub mod config;
pub mod error;
pub mod kernel;
pub mod process;
pub mod scheduler;
pub mod stack;
pub mod strategy;
pub mod sync;
