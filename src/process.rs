//! # Process Table
//!
//! Defines the process model for SPOS: one descriptor per table slot, each
//! paired with a private stack region. The table is a fixed-capacity arena
//! indexed by [`ProcessId`]; nothing is allocated at runtime.
//!
//! Slot 0 always holds the idle process. It is installed by
//! `Scheduler::init` and is never freed.

use core::fmt;

use crate::arch;
use crate::config::MAX_PROCESSES;
use crate::error::KernelError;
use crate::stack::{Stack, StackChecksum, StackPointer};

/// Scheduling priority: 0 is least favourable, 255 most favourable.
/// Strategies may ignore it.
pub type Priority = u8;

/// Entry point of a program. Programs never return; a process ends by
/// calling `kernel::exit` or by being killed.
pub type Program = extern "C" fn() -> !;

// ---------------------------------------------------------------------------
// Process identifiers
// ---------------------------------------------------------------------------

/// Index of a slot in the process table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(u8);

impl ProcessId {
    /// The idle process, always at slot 0.
    pub const IDLE: ProcessId = ProcessId(0);

    /// Sentinel for callers that want a plain id instead of a `Result`.
    pub const INVALID: ProcessId = ProcessId(u8::MAX);

    pub const fn new(index: u8) -> Self {
        ProcessId(index)
    }

    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    #[inline]
    pub const fn is_idle(self) -> bool {
        self.0 == 0
    }

    /// True for ids that name a slot of the table.
    #[inline]
    pub const fn is_valid(self) -> bool {
        (self.0 as usize) < MAX_PROCESSES
    }

    /// Iterate over every slot id in ascending order.
    pub fn all() -> impl Iterator<Item = ProcessId> {
        (0..MAX_PROCESSES as u8).map(ProcessId)
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Process state machine
// ---------------------------------------------------------------------------

/// Scheduling state of a slot.
///
/// ```text
///              exec()                 tick: selected
///   ┌────────┐ ──────► ┌─────────┐ ──────────────────► ┌─────────┐
///   │ Unused │         │  Ready  │                     │ Running │
///   └────────┘ ◄────── └─────────┘ ◄────────────────── └─────────┘
///        ▲      kill()      ▲        tick: suspended        │
///        │                  │                               │
///        │             ┌─────────┐                          │
///        └──────────── │ Blocked │          kill() / exit() │
///             kill()   └─────────┘ ◄────────────────────────┘
/// ```
///
/// At most one slot is `Running` at any instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Free slot.
    Unused,
    /// Waiting to be selected.
    Ready,
    /// Currently executing on the CPU.
    Running,
    /// Present but not schedulable.
    Blocked,
}

// ---------------------------------------------------------------------------
// Process descriptor
// ---------------------------------------------------------------------------

/// Per-slot kernel record of a program's scheduling state.
#[derive(Debug, Clone, Copy)]
pub struct Process {
    /// Entry point; `None` only for a free slot.
    pub program: Option<Program>,
    pub priority: Priority,
    pub state: ProcessState,
    /// Current stack top within the slot's own stack region.
    pub stack_pointer: StackPointer,
    /// Fold of the stack recorded when the process was last suspended.
    pub checksum: StackChecksum,
}

impl Process {
    pub const EMPTY: Process = Process {
        program: None,
        priority: 0,
        state: ProcessState::Unused,
        stack_pointer: StackPointer::EMPTY,
        checksum: 0,
    };

    #[inline]
    pub fn is_used(&self) -> bool {
        self.state != ProcessState::Unused
    }

    #[inline]
    pub fn is_ready(&self) -> bool {
        self.state == ProcessState::Ready
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.state == ProcessState::Running
    }
}

// ---------------------------------------------------------------------------
// Process table
// ---------------------------------------------------------------------------

/// Fixed-capacity process table with one private stack per slot.
///
/// The table itself performs no locking; mutating calls are made either from
/// the tick handler or inside a critical section by the `Scheduler`.
pub struct ProcessTable {
    slots: [Process; MAX_PROCESSES],
    stacks: [Stack; MAX_PROCESSES],
}

impl ProcessTable {
    pub const fn new() -> Self {
        const STACK: Stack = Stack::new();
        Self {
            slots: [Process::EMPTY; MAX_PROCESSES],
            stacks: [STACK; MAX_PROCESSES],
        }
    }

    /// Allocate the first free slot for `program`.
    ///
    /// The new process is `Ready`, its stack holds an initial context frame
    /// that resumes execution at the program entry, and its checksum matches
    /// that fresh frame.
    pub fn allocate(
        &mut self,
        program: Option<Program>,
        priority: Priority,
    ) -> Result<ProcessId, KernelError> {
        self.allocate_except(program, priority, None)
    }

    /// Like [`allocate`](Self::allocate), but never hands out `reserved`,
    /// even when it is free. A slot whose process was freed while it was
    /// still executing stays reserved until the next switch leaves its stack.
    pub fn allocate_except(
        &mut self,
        program: Option<Program>,
        priority: Priority,
        reserved: Option<ProcessId>,
    ) -> Result<ProcessId, KernelError> {
        let program = program.ok_or(KernelError::NoProgram)?;
        let pid = ProcessId::all()
            .filter(|&pid| Some(pid) != reserved)
            .find(|pid| !self.slots[pid.index()].is_used())
            .ok_or(KernelError::TableFull)?;

        let stack = &mut self.stacks[pid.index()];
        let stack_pointer = arch::init_stack_frame(stack, program as usize);
        let checksum = stack.checksum(stack_pointer);

        self.slots[pid.index()] = Process {
            program: Some(program),
            priority,
            state: ProcessState::Ready,
            stack_pointer,
            checksum,
        };
        Ok(pid)
    }

    /// Mark a slot free. Its stack contents are left as they are.
    pub fn release(&mut self, pid: ProcessId) -> Result<(), KernelError> {
        let slot = self.get_mut(pid)?;
        *slot = Process::EMPTY;
        Ok(())
    }

    /// Descriptor of `pid`, including free slots.
    ///
    /// # Panics
    /// If `pid` is not a valid slot index.
    #[inline]
    pub fn slot(&self, pid: ProcessId) -> &Process {
        &self.slots[pid.index()]
    }

    #[inline]
    pub fn slot_mut(&mut self, pid: ProcessId) -> &mut Process {
        &mut self.slots[pid.index()]
    }

    /// Descriptor of an occupied slot.
    pub fn get(&self, pid: ProcessId) -> Result<&Process, KernelError> {
        self.slots
            .get(pid.index())
            .filter(|p| p.is_used())
            .ok_or(KernelError::InvalidProcess(pid))
    }

    pub fn get_mut(&mut self, pid: ProcessId) -> Result<&mut Process, KernelError> {
        self.slots
            .get_mut(pid.index())
            .filter(|p| p.is_used())
            .ok_or(KernelError::InvalidProcess(pid))
    }

    #[inline]
    pub fn stack(&self, pid: ProcessId) -> &Stack {
        &self.stacks[pid.index()]
    }

    #[inline]
    pub fn stack_mut(&mut self, pid: ProcessId) -> &mut Stack {
        &mut self.stacks[pid.index()]
    }

    /// Recompute the fold of `pid`'s stack at its recorded stack top.
    pub fn checksum(&self, pid: ProcessId) -> StackChecksum {
        self.stacks[pid.index()].checksum(self.slots[pid.index()].stack_pointer)
    }

    /// Number of occupied slots.
    pub fn count(&self) -> usize {
        self.slots.iter().filter(|p| p.is_used()).count()
    }

    /// Number of `Ready` slots.
    pub fn ready_count(&self) -> usize {
        self.slots.iter().filter(|p| p.is_ready()).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ProcessId, &Process)> {
        ProcessId::all().zip(self.slots.iter())
    }
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
