//! # Scheduling Strategies
//!
//! A strategy answers one question per tick: given the process table and the
//! process that was just suspended, which process runs next?
//!
//! Strategies form a closed set dispatched by an exhaustive `match`; the only
//! state they keep (aging counters and the random generator) lives in
//! [`StrategyState`], which is reset whenever the active strategy changes.
//!
//! ## Idle Process
//!
//! The idle process (slot 0) is the fallback when nothing else is `Ready`.
//! `RoundRobin` is the one strategy that also hands it a regular turn: its
//! scan covers every slot, idle included.
//!
//! ## Policies
//!
//! | Strategy | Selection |
//! |----------|-----------|
//! | `Even` | next `Ready` process after the current one, idle skipped |
//! | `Random` | uniformly random `Ready` process |
//! | `RunToCompletion` | the current process for as long as it stays `Ready` |
//! | `RoundRobin` | first `Ready` slot after the current one, wrapping to slot 0 |
//! | `InactiveAging` | highest effective priority; waiting raises it |

use num_enum::{IntoPrimitive, TryFromPrimitive};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::config::MAX_PROCESSES;
use crate::process::{Priority, ProcessId, ProcessTable};

// ---------------------------------------------------------------------------
// Strategy selector
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum SchedulingStrategy {
    Even = 0,
    Random = 1,
    RunToCompletion = 2,
    RoundRobin = 3,
    InactiveAging = 4,
}

impl SchedulingStrategy {
    pub const ALL: [SchedulingStrategy; 5] = [
        SchedulingStrategy::Even,
        SchedulingStrategy::Random,
        SchedulingStrategy::RunToCompletion,
        SchedulingStrategy::RoundRobin,
        SchedulingStrategy::InactiveAging,
    ];

    /// The following strategy in menu order, wrapping around.
    pub fn next(self) -> Self {
        let index = (u8::from(self) as usize + 1) % Self::ALL.len();
        Self::ALL[index]
    }

    pub const fn name(self) -> &'static str {
        match self {
            SchedulingStrategy::Even => "Even",
            SchedulingStrategy::Random => "Random",
            SchedulingStrategy::RunToCompletion => "Run to completion",
            SchedulingStrategy::RoundRobin => "Round robin",
            SchedulingStrategy::InactiveAging => "Inactive aging",
        }
    }
}

// ---------------------------------------------------------------------------
// Strategy-local bookkeeping
// ---------------------------------------------------------------------------

/// Bookkeeping shared by all strategies.
pub struct StrategyState {
    /// Priority gained by each process while waiting (`InactiveAging`).
    age: [Priority; MAX_PROCESSES],
    rng: SmallRng,
}

impl StrategyState {
    pub fn new(seed: u64) -> Self {
        Self {
            age: [0; MAX_PROCESSES],
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    /// Forget everything a previous strategy accumulated.
    pub fn reset(&mut self) {
        self.age = [0; MAX_PROCESSES];
    }

    /// Forget what one slot accumulated, e.g. when it is freed.
    pub fn forget(&mut self, pid: ProcessId) {
        self.age[pid.index()] = 0;
    }

    #[inline]
    pub fn age(&self, pid: ProcessId) -> Priority {
        self.age[pid.index()]
    }

    /// Copy of every aging counter, to roll back a selection later.
    pub fn ages(&self) -> [Priority; MAX_PROCESSES] {
        self.age
    }

    /// Roll the counters back to `ages`. Slots freed since then start over.
    pub fn restore_ages(&mut self, ages: [Priority; MAX_PROCESSES], table: &ProcessTable) {
        self.age = ages;
        for (pid, process) in table.iter() {
            if !process.is_used() {
                self.age[pid.index()] = 0;
            }
        }
    }

    /// Base priority plus the aging bonus, saturating at the maximum priority.
    pub fn effective_priority(&self, table: &ProcessTable, pid: ProcessId) -> Priority {
        table.slot(pid).priority.saturating_add(self.age(pid))
    }

    /// Pick the next process under `strategy`.
    pub fn select(
        &mut self,
        strategy: SchedulingStrategy,
        table: &ProcessTable,
        current: ProcessId,
    ) -> ProcessId {
        match strategy {
            SchedulingStrategy::Even => even(table, current),
            SchedulingStrategy::RoundRobin => round_robin(table, current),
            SchedulingStrategy::Random => self.random(table),
            SchedulingStrategy::RunToCompletion => run_to_completion(table, current),
            SchedulingStrategy::InactiveAging => self.inactive_aging(table),
        }
    }

    fn random(&mut self, table: &ProcessTable) -> ProcessId {
        let mut ready = [ProcessId::IDLE; MAX_PROCESSES];
        let mut count = 0;
        for pid in candidates(table) {
            ready[count] = pid;
            count += 1;
        }
        if count == 0 {
            return ProcessId::IDLE;
        }
        ready[self.rng.gen_range(0..count)]
    }

    fn inactive_aging(&mut self, table: &ProcessTable) -> ProcessId {
        let mut best: Option<(ProcessId, Priority)> = None;
        for pid in candidates(table) {
            let priority = self.effective_priority(table, pid);
            // Strictly greater: ties stay with the lowest index.
            if best.map_or(true, |(_, p)| priority > p) {
                best = Some((pid, priority));
            }
        }
        let Some((chosen, _)) = best else {
            return ProcessId::IDLE;
        };

        for pid in candidates(table) {
            if pid == chosen {
                self.age[pid.index()] = 0;
            } else {
                self.age[pid.index()] = self.age[pid.index()].saturating_add(1);
            }
        }
        chosen
    }
}

// ---------------------------------------------------------------------------
// Stateless policies
// ---------------------------------------------------------------------------

/// Every `Ready` process except idle, in ascending slot order.
fn candidates(table: &ProcessTable) -> impl Iterator<Item = ProcessId> + '_ {
    table
        .iter()
        .filter(|(pid, p)| !pid.is_idle() && p.is_ready())
        .map(|(pid, _)| pid)
}

/// First `Ready` slot accepted by `eligible`, scanning cyclically from
/// `current + 1`. The scan ends on `current` itself, so it is only chosen
/// when nothing else is ready.
fn next_ready_after(
    table: &ProcessTable,
    current: ProcessId,
    eligible: impl Fn(ProcessId) -> bool,
) -> Option<ProcessId> {
    (1..=MAX_PROCESSES)
        .map(|step| ProcessId::new(((current.index() + step) % MAX_PROCESSES) as u8))
        .find(|&pid| eligible(pid) && table.slot(pid).is_ready())
}

fn even(table: &ProcessTable, current: ProcessId) -> ProcessId {
    next_ready_after(table, current, |pid| !pid.is_idle()).unwrap_or(ProcessId::IDLE)
}

fn round_robin(table: &ProcessTable, current: ProcessId) -> ProcessId {
    next_ready_after(table, current, |_| true).unwrap_or(ProcessId::IDLE)
}

fn run_to_completion(table: &ProcessTable, current: ProcessId) -> ProcessId {
    if !current.is_idle() && table.slot(current).is_ready() {
        return current;
    }
    even(table, current)
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
