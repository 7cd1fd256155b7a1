//! # Kernel Errors
//!
//! Two classes of failure exist. Registration and process-control errors are
//! returned to the caller, which decides what to do. A stack checksum mismatch,
//! or a stack top that escaped its region, is fatal: the scheduler refuses to
//! resume the process and the kernel glue hands the error to
//! [`Board::fatal`](crate::board::Board::fatal).

use core::fmt;

use crate::process::ProcessId;
use crate::stack::StackChecksum;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// Every slot of the process table is in use.
    TableFull,
    /// Registration was attempted without a program.
    NoProgram,
    /// The id is out of range or names a free slot.
    InvalidProcess(ProcessId),
    /// The idle process cannot be killed.
    IdleProtected,
    /// The kernel API was used before `kernel::init`.
    Uninitialised,
    /// A saved stack top lies outside the process's own stack region.
    StackOutOfBounds(ProcessId),
    /// The stack of `pid` changed while the process was suspended.
    StackCorrupted {
        pid: ProcessId,
        expected: StackChecksum,
        found: StackChecksum,
    },
}

impl KernelError {
    /// Short human-readable reason, suitable for a two-line display.
    pub const fn reason(&self) -> &'static str {
        match self {
            KernelError::TableFull => "process table full",
            KernelError::NoProgram => "no program given",
            KernelError::InvalidProcess(_) => "invalid process id",
            KernelError::IdleProtected => "idle cannot be killed",
            KernelError::Uninitialised => "kernel not initialised",
            KernelError::StackOutOfBounds(_) => "stack overflow",
            KernelError::StackCorrupted { .. } => "stack inconsistency",
        }
    }

    /// Fatal errors stop the scheduler for good.
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            KernelError::StackCorrupted { .. } | KernelError::StackOutOfBounds(_)
        )
    }
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelError::InvalidProcess(pid) | KernelError::StackOutOfBounds(pid) => {
                write!(f, "{} ({})", self.reason(), pid)
            }
            KernelError::StackCorrupted { pid, expected, found } => write!(
                f,
                "{} in process {}: expected {:#04x}, found {:#04x}",
                self.reason(),
                pid,
                expected,
                found
            ),
            _ => f.write_str(self.reason()),
        }
    }
}
