//! # Synchronization Primitives
//!
//! The only shared mutable state is the process table, and the only thing
//! that can preempt a process is the scheduling tick. A critical section
//! therefore gates that one interrupt source instead of taking a lock.
//!
//! Sections nest: the tick is gated when the depth leaves 0 and ungated when
//! it returns to 0. Every depth update is itself done with all interrupts
//! masked, and the previous global enable bit is restored afterwards, so a
//! caller that had interrupts off for its own reasons keeps them off.

use crate::arch::Port;

/// Nesting counter for critical sections.
///
/// Depth is bounded by the counter width (255 levels). Going deeper is a
/// design limit; it overflows (and panics in debug builds).
#[derive(Debug, Default)]
pub struct CriticalSection {
    depth: u8,
}

impl CriticalSection {
    pub const fn new() -> Self {
        Self { depth: 0 }
    }

    #[inline]
    pub fn depth(&self) -> u8 {
        self.depth
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.depth > 0
    }

    /// Enter a (possibly nested) critical section.
    pub fn enter<P: Port>(&mut self, port: &mut P) {
        let was_enabled = port.mask_interrupts();
        if self.depth == 0 {
            port.set_tick_enabled(false);
        }
        self.depth += 1;
        port.restore_interrupts(was_enabled);
    }

    /// Leave a critical section. Unbalanced calls are clamped at depth 0.
    pub fn leave<P: Port>(&mut self, port: &mut P) {
        if self.depth == 0 {
            return;
        }
        let was_enabled = port.mask_interrupts();
        self.depth -= 1;
        if self.depth == 0 {
            port.set_tick_enabled(true);
        }
        port.restore_interrupts(was_enabled);
    }

    /// Drop every open section at once and ungate the tick. Used when the
    /// process that opened them ends without leaving them.
    pub fn release_all<P: Port>(&mut self, port: &mut P) {
        if self.depth == 0 {
            return;
        }
        let was_enabled = port.mask_interrupts();
        self.depth = 0;
        port.set_tick_enabled(true);
        port.restore_interrupts(was_enabled);
    }

    /// Run `f` inside a critical section; the section is left on every path
    /// out of `f`.
    pub fn with<P: Port, R>(&mut self, port: &mut P, f: impl FnOnce() -> R) -> R {
        self.enter(port);
        let result = f();
        self.leave(port);
        result
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
