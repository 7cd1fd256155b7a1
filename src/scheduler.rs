//! # Scheduler
//!
//! Core scheduling logic for SPOS: the process table lifecycle, the tick
//! driven context switch, strategy control and the critical-section guard.
//!
//! ## Context Switch
//!
//! At each tick the port saves the running process's registers onto its own
//! stack and calls [`Scheduler::switch`] with the resulting stack top:
//! 1. **Suspend**: store the stack top, mark the process `Ready`, record the
//!    checksum of its suspended stack
//! 2. **Select**: ask the active strategy for the next process
//! 3. **Resume**: mark it `Running`
//! 4. **Operator override**: if the task-manager chord is held, wait for its
//!    release and run the task manager
//! 5. **Integrity check**: the resumed stack must fold to the recorded
//!    checksum, otherwise the switch fails with `StackCorrupted`
//!
//! The port then restores the registers from the returned stack top. The
//! whole switch runs inside the tick handler, so it cannot be re-entered.

use log::{debug, error, info, trace, warn};

use crate::arch::{self, Platform};
use crate::board::{Board, Buttons};
use crate::config::{DEFAULT_PRIORITY, DEFAULT_STRATEGY};
use crate::error::KernelError;
use crate::process::{Priority, Process, ProcessId, ProcessState, ProcessTable, Program};
use crate::stack::{StackChecksum, StackPointer};
use crate::strategy::{SchedulingStrategy, StrategyState};
use crate::sync::CriticalSection;

/// The central scheduler state. Stored as a global in `kernel.rs`.
///
/// ## Design Notes
///
/// - All processes live in a fixed-size table (no heap)
/// - `current` is the process the port will resume after a switch
/// - The idle process (slot 0) is always present as a fallback
pub struct Scheduler {
    table: ProcessTable,

    /// Process currently running (or about to be resumed).
    current: ProcessId,

    strategy: SchedulingStrategy,
    strategy_state: StrategyState,

    critical: CriticalSection,
    port: Platform,

    /// Slot of a process that freed itself and is still executing on its
    /// stack until the next switch. Not handed out by `exec` meanwhile.
    retired: Option<ProcessId>,

    /// Number of switches performed since start.
    tick_count: u64,
}

impl Scheduler {
    /// Create an empty scheduler. `seed` feeds the `Random` strategy.
    pub fn new(seed: u64) -> Self {
        Self {
            table: ProcessTable::new(),
            current: ProcessId::IDLE,
            strategy: DEFAULT_STRATEGY,
            strategy_state: StrategyState::new(seed),
            critical: CriticalSection::new(),
            port: Platform::new(),
            retired: None,
            tick_count: 0,
        }
    }

    /// Install the idle process at slot 0, then register every autostart
    /// program at the default priority.
    ///
    /// Must be called once, on a fresh scheduler. Autostart programs that do
    /// not fit are skipped with a warning.
    pub fn init(&mut self, autostart: &[Program]) -> Result<(), KernelError> {
        let idle = self.exec(Some(arch::idle), DEFAULT_PRIORITY)?;
        if idle != ProcessId::IDLE {
            return Err(KernelError::InvalidProcess(idle));
        }

        for &program in autostart {
            if let Err(e) = self.exec(Some(program), DEFAULT_PRIORITY) {
                warn!("autostart program skipped: {}", e);
            }
        }
        info!("scheduler initialised with {} processes", self.table.count());
        Ok(())
    }

    /// Register `program` in the first free slot.
    ///
    /// # Returns
    /// - `Ok(pid)`: the new process, `Ready` to be selected
    /// - `Err(NoProgram)`: `program` is `None`
    /// - `Err(TableFull)`: no slot is free
    pub fn exec(
        &mut self,
        program: Option<Program>,
        priority: Priority,
    ) -> Result<ProcessId, KernelError> {
        let table = &mut self.table;
        let reserved = self.retired;
        let result = self.critical.with(&mut self.port, || {
            table.allocate_except(program, priority, reserved)
        });

        match result {
            Ok(pid) => info!("exec: process {} with priority {}", pid, priority),
            Err(e) => warn!("exec failed: {}", e),
        }
        result
    }

    /// Free the slot of `pid`.
    ///
    /// Killing the running process takes effect at the next tick: it is not
    /// suspended into `Ready` again and another process is selected. Until
    /// then its slot is not reused, and any critical sections it left open
    /// are dropped so the tick can reach the scheduler.
    pub fn kill(&mut self, pid: ProcessId) -> Result<(), KernelError> {
        if pid.is_idle() {
            return Err(KernelError::IdleProtected);
        }
        let table = &mut self.table;
        self.critical.with(&mut self.port, || table.release(pid))?;
        self.strategy_state.forget(pid);
        if pid == self.current {
            self.retired = Some(pid);
            if self.critical.is_active() {
                warn!("process {} ended inside a critical section", pid);
                self.critical.release_all(&mut self.port);
            }
        }
        info!("kill: process {}", pid);
        Ok(())
    }

    /// Make the idle process the running one and return the stack top the
    /// port restores first.
    pub fn start(&mut self) -> StackPointer {
        self.current = ProcessId::IDLE;
        let idle = self.table.slot_mut(ProcessId::IDLE);
        idle.state = ProcessState::Running;
        info!("scheduler started ({})", self.strategy.name());
        idle.stack_pointer
    }

    /// Perform one context switch.
    ///
    /// `saved` is the stack top of the running process after the port pushed
    /// its registers. Returns the stack top to restore registers from.
    ///
    /// # Errors
    /// `StackCorrupted` if the selected process's stack no longer matches the
    /// checksum recorded when it was suspended. This is fatal; the process
    /// must not be resumed.
    pub fn switch<B: Board + ?Sized>(
        &mut self,
        saved: StackPointer,
        board: &mut B,
    ) -> Result<StackPointer, KernelError> {
        self.tick_count += 1;
        self.suspend(saved);

        let previous = self.current;
        let strategy = self.strategy;
        let ages = self.strategy_state.ages();
        let next = self.select();
        self.resume(next);
        trace!("tick {}: {} -> {}", self.tick_count, previous, next);

        if board.buttons() == Buttons::TASK_MANAGER {
            debug!("task manager requested");
            board.wait_for_no_input();
            board.open_task_manager(self);

            // The operator may have killed the process we were about to resume.
            // Select again as if the first choice had never been made.
            if !self.table.slot(self.current).is_running() {
                if self.strategy == strategy {
                    self.strategy_state.restore_ages(ages, &self.table);
                }
                let next = self.select();
                self.resume(next);
            }
        }

        self.verify(self.current)?;
        Ok(self.table.slot(self.current).stack_pointer)
    }

    fn suspend(&mut self, saved: StackPointer) {
        let pid = self.current;
        let slot = self.table.slot_mut(pid);
        if !slot.is_used() {
            // Killed while running; nothing to preserve.
            return;
        }
        slot.stack_pointer = saved;
        if slot.is_running() {
            slot.state = ProcessState::Ready;
        }
        let checksum = self.table.checksum(pid);
        self.table.slot_mut(pid).checksum = checksum;
    }

    fn select(&mut self) -> ProcessId {
        self.strategy_state
            .select(self.strategy, &self.table, self.current)
    }

    fn resume(&mut self, next: ProcessId) {
        self.table.slot_mut(next).state = ProcessState::Running;
        self.current = next;
        // Nothing executes on a freed stack any more.
        self.retired = None;
    }

    /// Compare `pid`'s stack against the checksum recorded at its suspension.
    pub fn verify(&self, pid: ProcessId) -> Result<(), KernelError> {
        let expected = self.table.get(pid)?.checksum;
        let found = self.table.checksum(pid);
        if found != expected {
            error!("stack of process {} corrupted", pid);
            return Err(KernelError::StackCorrupted {
                pid,
                expected,
                found,
            });
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Strategy control
    // -----------------------------------------------------------------------

    /// Switch strategies. Bookkeeping of the previous strategy is discarded.
    pub fn set_strategy(&mut self, strategy: SchedulingStrategy) {
        self.strategy = strategy;
        self.strategy_state.reset();
        info!("strategy: {}", strategy.name());
    }

    #[inline]
    pub fn strategy(&self) -> SchedulingStrategy {
        self.strategy
    }

    /// Effective priority of `pid` as seen by `InactiveAging`.
    pub fn effective_priority(&self, pid: ProcessId) -> Priority {
        self.strategy_state.effective_priority(&self.table, pid)
    }

    // -----------------------------------------------------------------------
    // Critical sections
    // -----------------------------------------------------------------------

    pub fn enter_critical_section(&mut self) {
        self.critical.enter(&mut self.port);
    }

    pub fn leave_critical_section(&mut self) {
        self.critical.leave(&mut self.port);
    }

    #[inline]
    pub fn critical_depth(&self) -> u8 {
        self.critical.depth()
    }

    #[inline]
    pub fn port(&self) -> &Platform {
        &self.port
    }

    #[inline]
    pub fn port_mut(&mut self) -> &mut Platform {
        &mut self.port
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    /// Descriptor of `pid`.
    ///
    /// # Panics
    /// If `pid` is not a valid slot index.
    #[inline]
    pub fn slot(&self, pid: ProcessId) -> &Process {
        self.table.slot(pid)
    }

    #[inline]
    pub fn current(&self) -> ProcessId {
        self.current
    }

    #[inline]
    pub fn table(&self) -> &ProcessTable {
        &self.table
    }

    /// Fold of `pid`'s stack at its recorded stack top, computed now.
    pub fn checksum(&self, pid: ProcessId) -> StackChecksum {
        self.table.checksum(pid)
    }

    #[inline]
    pub fn ticks(&self) -> u64 {
        self.tick_count
    }

    pub fn process_count(&self) -> usize {
        self.table.count()
    }

    pub fn ready_count(&self) -> usize {
        self.table.ready_count()
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::Port;
    use crate::board::tests::ScriptedBoard;
    use crate::config::{MAX_PROCESSES, STACK_SIZE};
    use crate::process::tests::{dummy_program, other_program};

    fn pid(index: u8) -> ProcessId {
        ProcessId::new(index)
    }

    /// Scheduler with idle plus `n` autostart processes, started.
    fn started(n: usize) -> Scheduler {
        let mut sched = Scheduler::new(42);
        let programs = [dummy_program as Program; MAX_PROCESSES];
        sched.init(&programs[..n]).unwrap();
        sched.start();
        sched
    }

    /// Simulate the current process running: it pushes `bytes` onto its
    /// stack. Returns the stack top the port would hand to `switch`.
    fn run_current(sched: &mut Scheduler, bytes: &[u8]) -> StackPointer {
        let pid = sched.current;
        let top = sched.table.slot(pid).stack_pointer.offset() - bytes.len();
        sched.table.stack_mut(pid).bytes_mut()[top..top + bytes.len()].copy_from_slice(bytes);
        StackPointer::new(top).unwrap()
    }

    fn tick(sched: &mut Scheduler, bytes: &[u8]) -> Result<StackPointer, KernelError> {
        let saved = run_current(sched, bytes);
        sched.switch(saved, &mut ScriptedBoard::default())
    }

    fn running(sched: &Scheduler) -> usize {
        sched.table.iter().filter(|(_, p)| p.is_running()).count()
    }

    #[test]
    fn test_init_installs_idle_and_autostart() {
        let mut sched = Scheduler::new(0);
        sched.init(&[dummy_program, other_program]).unwrap();

        assert_eq!(sched.process_count(), 3);
        assert!(sched.slot(ProcessId::IDLE).program.is_some());
        for index in 0..3 {
            assert_eq!(sched.slot(pid(index)).state, ProcessState::Ready);
            assert_eq!(sched.slot(pid(index)).priority, DEFAULT_PRIORITY);
        }
        assert_eq!(sched.slot(pid(3)).state, ProcessState::Unused);
    }

    #[test]
    fn test_init_skips_autostart_overflow() {
        let mut sched = Scheduler::new(0);
        let programs = [dummy_program as Program; MAX_PROCESSES + 2];
        sched.init(&programs).unwrap();
        assert_eq!(sched.process_count(), MAX_PROCESSES);
    }

    #[test]
    fn test_start_runs_idle() {
        let mut sched = Scheduler::new(0);
        sched.init(&[dummy_program]).unwrap();
        let sp = sched.start();

        assert_eq!(sched.current(), ProcessId::IDLE);
        assert_eq!(sched.slot(ProcessId::IDLE).state, ProcessState::Running);
        assert_eq!(sp, sched.slot(ProcessId::IDLE).stack_pointer);
        assert_eq!(running(&sched), 1);
    }

    #[test]
    fn test_exec_on_full_table() {
        let mut sched = started(MAX_PROCESSES - 1);
        assert_eq!(sched.exec(Some(dummy_program), 1), Err(KernelError::TableFull));

        sched.kill(pid(3)).unwrap();
        let new = sched.exec(Some(other_program), 200).unwrap();
        assert_eq!(new, pid(3));
        assert_eq!(sched.slot(new).state, ProcessState::Ready);
        assert_eq!(sched.slot(new).priority, 200);
        assert_eq!(sched.slot(new).checksum, sched.checksum(new));
    }

    #[test]
    fn test_exec_without_program() {
        let mut sched = started(1);
        assert_eq!(sched.exec(None, 1), Err(KernelError::NoProgram));
        assert_eq!(sched.process_count(), 2);
    }

    #[test]
    fn test_exec_releases_critical_section() {
        let mut sched = started(0);
        sched.exec(Some(dummy_program), 1).unwrap();
        sched.exec(None, 1).unwrap_err();
        assert_eq!(sched.critical_depth(), 0);
        assert!(sched.port().tick_enabled());

        // Nested inside a caller's own section the tick stays gated.
        sched.enter_critical_section();
        sched.exec(Some(dummy_program), 1).unwrap();
        assert_eq!(sched.critical_depth(), 1);
        assert!(!sched.port().tick_enabled());
        sched.leave_critical_section();
        assert!(sched.port().tick_enabled());
    }

    #[test]
    fn test_switch_cycles_with_one_running() {
        let mut sched = started(3);
        sched.set_strategy(SchedulingStrategy::RoundRobin);

        // Idle is Ready while suspended, so it gets its turn after slot 3.
        for expected in [1, 2, 3, 0, 1] {
            let sp = tick(&mut sched, &[0xAB; 12]).unwrap();
            assert_eq!(sched.current(), pid(expected));
            assert_eq!(sp, sched.slot(pid(expected)).stack_pointer);
            assert_eq!(running(&sched), 1);
        }
        assert_eq!(sched.slot(ProcessId::IDLE).state, ProcessState::Ready);
        assert_eq!(sched.ticks(), 5);
    }

    #[test]
    fn test_suspend_records_stack_top_and_checksum() {
        let mut sched = started(2);
        tick(&mut sched, &[]).unwrap();
        assert_eq!(sched.current(), pid(1));

        let saved = run_current(&mut sched, &[1, 2, 3, 4, 5, 6, 7, 8]);
        sched.switch(saved, &mut ScriptedBoard::default()).unwrap();

        let p1 = sched.slot(pid(1));
        assert_eq!(p1.state, ProcessState::Ready);
        assert_eq!(p1.stack_pointer, saved);
        assert_eq!(p1.checksum, sched.checksum(pid(1)));
        // Every process that is not running holds a valid checksum.
        for (id, p) in sched.table().iter().filter(|(_, p)| p.is_ready()) {
            assert_eq!(p.checksum, sched.checksum(id), "process {id}");
        }
    }

    #[test]
    fn test_corrupted_stack_is_fatal_on_resume() {
        let mut sched = started(2);
        tick(&mut sched, &[]).unwrap(); // idle -> 1
        tick(&mut sched, &[0x11; 16]).unwrap(); // 1 -> 2
        assert_eq!(sched.current(), pid(2));

        // Process 2 overflows into process 1's suspended stack.
        let victim = sched.slot(pid(1)).stack_pointer.offset() + 3;
        sched.table.stack_mut(pid(1)).bytes_mut()[victim] ^= 0x40;

        let err = tick(&mut sched, &[0x22; 4]).unwrap_err();
        assert!(err.is_fatal());
        match err {
            KernelError::StackCorrupted { pid: victim_pid, expected, found } => {
                assert_eq!(victim_pid, pid(1));
                assert_eq!(expected ^ found, 0x40);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_writes_above_stack_top_are_ignored() {
        let mut sched = started(2);
        tick(&mut sched, &[]).unwrap();
        tick(&mut sched, &[0x11; 16]).unwrap();

        // Free space of a suspended process is not part of its checksum.
        let free = sched.slot(pid(1)).stack_pointer.offset() - 1;
        sched.table.stack_mut(pid(1)).bytes_mut()[free] = 0xFF;
        assert!(tick(&mut sched, &[]).is_ok());
        assert_eq!(sched.current(), pid(1));
    }

    #[test]
    fn test_task_manager_chord_opens_after_release() {
        let mut sched = started(2);
        let mut board = ScriptedBoard::pressing(&[
            Buttons::TASK_MANAGER,
            Buttons::TASK_MANAGER,
            Buttons::ENTER,
            Buttons::empty(),
        ]);
        let saved = run_current(&mut sched, &[]);
        sched.switch(saved, &mut board).unwrap();

        assert_eq!(board.task_manager_opened, 1);
        assert_eq!(board.reads, 4);
        assert_eq!(sched.current(), pid(1));
    }

    #[test]
    fn test_other_input_does_not_open_task_manager() {
        let mut sched = started(1);
        for buttons in [Buttons::ENTER, Buttons::ESC, Buttons::all()] {
            let mut board = ScriptedBoard::pressing(&[buttons]);
            let saved = run_current(&mut sched, &[]);
            sched.switch(saved, &mut board).unwrap();
            assert_eq!(board.task_manager_opened, 0);
        }
    }

    #[test]
    fn test_task_manager_killing_selected_process_reselects() {
        let mut sched = started(3);
        let mut board = ScriptedBoard::pressing(&[Buttons::TASK_MANAGER]);
        board.kill_on_open.push(pid(1));

        let saved = run_current(&mut sched, &[]);
        let sp = sched.switch(saved, &mut board).unwrap();

        assert_eq!(sched.current(), pid(2));
        assert_eq!(sp, sched.slot(pid(2)).stack_pointer);
        assert_eq!(sched.slot(pid(1)).state, ProcessState::Unused);
        assert_eq!(running(&sched), 1);
    }

    #[test]
    fn test_killed_running_process_is_not_resumed() {
        let mut sched = started(2);
        sched.set_strategy(SchedulingStrategy::RunToCompletion);
        tick(&mut sched, &[]).unwrap();
        assert_eq!(sched.current(), pid(1));
        for _ in 0..3 {
            tick(&mut sched, &[0x5A; 4]).unwrap();
            assert_eq!(sched.current(), pid(1));
        }

        sched.kill(pid(1)).unwrap();
        tick(&mut sched, &[]).unwrap();
        assert_eq!(sched.current(), pid(2));
        assert_eq!(sched.slot(pid(1)).state, ProcessState::Unused);
    }

    #[test]
    fn test_exec_after_self_kill_keeps_fresh_frame() {
        let mut sched = started(2);
        tick(&mut sched, &[]).unwrap();
        assert_eq!(sched.current(), pid(1));

        // Process 1 ends itself and starts a replacement in the same quantum.
        let saved = run_current(&mut sched, &[0x33; 40]);
        sched.kill(pid(1)).unwrap();
        let new = sched.exec(Some(other_program), 5).unwrap();
        assert_eq!(new, pid(3));
        let fresh = sched.slot(new).stack_pointer;

        sched.switch(saved, &mut ScriptedBoard::default()).unwrap();
        assert_eq!(sched.current(), pid(2));
        assert_eq!(sched.slot(new).stack_pointer, fresh);
        assert_eq!(sched.slot(new).state, ProcessState::Ready);
        assert_eq!(sched.slot(pid(1)).state, ProcessState::Unused);

        // Once the switch has left its stack, the slot is free for reuse.
        assert_eq!(sched.exec(Some(dummy_program), 5), Ok(pid(1)));
    }

    #[test]
    fn test_self_kill_drops_open_critical_sections() {
        let mut sched = started(3);
        tick(&mut sched, &[]).unwrap();
        assert_eq!(sched.current(), pid(1));

        sched.enter_critical_section();
        sched.enter_critical_section();
        // Killing another process leaves the caller's sections alone.
        sched.kill(pid(3)).unwrap();
        assert_eq!(sched.critical_depth(), 2);
        assert!(!sched.port().tick_enabled());

        sched.kill(pid(1)).unwrap();
        assert_eq!(sched.critical_depth(), 0);
        assert!(sched.port().tick_enabled());
        assert!(sched.port().interrupts_enabled());

        tick(&mut sched, &[]).unwrap();
        assert_eq!(sched.current(), pid(2));
    }

    #[test]
    fn test_task_manager_reselection_ages_once() {
        let mut sched = started(3);
        sched.set_strategy(SchedulingStrategy::InactiveAging);
        let mut board = ScriptedBoard::pressing(&[Buttons::TASK_MANAGER]);
        board.kill_on_open.push(pid(1));

        let saved = run_current(&mut sched, &[]);
        sched.switch(saved, &mut board).unwrap();

        assert_eq!(sched.current(), pid(2));
        assert_eq!(sched.strategy_state.age(pid(3)), 1);
        assert_eq!(sched.effective_priority(pid(3)), DEFAULT_PRIORITY + 1);
        assert_eq!(sched.strategy_state.age(pid(1)), 0);
    }

    #[test]
    fn test_blocked_process_stays_blocked_across_switch() {
        let mut sched = started(2);
        tick(&mut sched, &[]).unwrap();
        sched.table.slot_mut(pid(1)).state = ProcessState::Blocked;

        tick(&mut sched, &[]).unwrap();
        assert_eq!(sched.slot(pid(1)).state, ProcessState::Blocked);
        assert_eq!(sched.current(), pid(2));
    }

    #[test]
    fn test_idle_runs_when_nothing_else_is_ready() {
        let mut sched = started(1);
        tick(&mut sched, &[]).unwrap();
        sched.kill(pid(1)).unwrap();
        tick(&mut sched, &[]).unwrap();
        assert_eq!(sched.current(), ProcessId::IDLE);
        tick(&mut sched, &[0; 8]).unwrap();
        assert_eq!(sched.current(), ProcessId::IDLE);
    }

    #[test]
    fn test_kill_rejects_idle_and_free_slots() {
        let mut sched = started(1);
        assert_eq!(sched.kill(ProcessId::IDLE), Err(KernelError::IdleProtected));
        assert_eq!(sched.kill(pid(4)), Err(KernelError::InvalidProcess(pid(4))));
        assert_eq!(sched.critical_depth(), 0);
    }

    #[test]
    fn test_set_strategy_resets_aging() {
        let mut sched = started(2);
        sched.exec(Some(dummy_program), 200).unwrap();
        sched.set_strategy(SchedulingStrategy::InactiveAging);
        for _ in 0..5 {
            tick(&mut sched, &[]).unwrap();
            assert_eq!(sched.current(), pid(3));
        }
        assert_eq!(sched.effective_priority(pid(1)), DEFAULT_PRIORITY + 5);

        sched.set_strategy(SchedulingStrategy::Even);
        assert_eq!(sched.strategy(), SchedulingStrategy::Even);
        assert_eq!(sched.effective_priority(pid(1)), DEFAULT_PRIORITY);
    }

    #[test]
    fn test_stack_pointers_stay_in_region() {
        let mut sched = started(4);
        sched.set_strategy(SchedulingStrategy::Random);
        for _ in 0..50 {
            tick(&mut sched, &[7; 8]).unwrap();
        }
        for (_, p) in sched.table().iter().filter(|(_, p)| p.is_used()) {
            assert!(p.stack_pointer.offset() <= STACK_SIZE);
        }
    }
}
