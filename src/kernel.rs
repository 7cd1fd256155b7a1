//! # Kernel
//!
//! Top-level kernel initialization and public API for SPOS.
//!
//! The kernel owns the global scheduler and the board it talks to. Every
//! call that mutates the process table runs inside a critical section taken
//! by the scheduler itself.
//!
//! ## Startup Sequence
//!
//! ```text
//! reset_handler (cortex-m-rt)
//!   └─► main()
//!         ├─► kernel::init()        ← idle + autostart programs
//!         └─► kernel::start()       ← Launch scheduler (no return)
//!               ├─► Configure SysTick
//!               ├─► Set interrupt priorities
//!               └─► Restore the idle process via arch::start_first_task()
//! ```

use core::ptr::addr_of_mut;

use log::error;

use crate::arch;
use crate::board::Board;
use crate::error::KernelError;
use crate::process::{Priority, Process, ProcessId, Program};
use crate::scheduler::Scheduler;
use crate::strategy::SchedulingStrategy;

// ---------------------------------------------------------------------------
// Global kernel instance
// ---------------------------------------------------------------------------

struct Kernel {
    scheduler: Scheduler,
    board: &'static mut dyn Board,
}

/// Global kernel instance.
///
/// # Safety
/// Written once by `init()` before the tick is running. Afterwards it is
/// touched by processes (through the API below) and by the PendSV handler;
/// table mutations from processes run inside a critical section, and the
/// handler cannot be preempted by anything that uses the kernel.
static mut KERNEL: Option<Kernel> = None;

fn kernel() -> Result<&'static mut Kernel, KernelError> {
    unsafe {
        (*addr_of_mut!(KERNEL))
            .as_mut()
            .ok_or(KernelError::Uninitialised)
    }
}

// ---------------------------------------------------------------------------
// Kernel API
// ---------------------------------------------------------------------------

/// Initialize the kernel: install the idle process and every program of the
/// `autostart` list at the default priority.
///
/// Must be called exactly once, before `start()`.
pub fn init(board: &'static mut dyn Board, autostart: &[Program]) -> Result<(), KernelError> {
    let mut scheduler = Scheduler::new(board.entropy());
    scheduler.init(autostart)?;
    unsafe {
        *addr_of_mut!(KERNEL) = Some(Kernel { scheduler, board });
    }
    Ok(())
}

/// Start the scheduler. **Does not return.**
///
/// Configures the SysTick timer, sets interrupt priorities and restores the
/// idle process. From then on every tick performs a context switch.
#[cfg(target_arch = "arm")]
pub fn start(mut core_peripherals: cortex_m::Peripherals) -> ! {
    use crate::arch::cortex_m4;

    // Nothing may tick before the first process is restored.
    cortex_m::interrupt::disable();
    cortex_m4::configure_systick(&mut core_peripherals.SYST);
    cortex_m4::set_interrupt_priorities();

    let first = match kernel() {
        Ok(kernel) => {
            let sp = kernel.scheduler.start();
            kernel.scheduler.table().stack(ProcessId::IDLE).address_of(sp)
        }
        Err(e) => {
            error!("start: {}", e);
            loop {
                arch::wait_for_interrupt();
            }
        }
    };

    unsafe { cortex_m4::start_first_task(first as *const u32) }
}

/// Register `program` for execution with the given priority.
///
/// Safe to call from any process; the table is only touched inside a
/// critical section.
pub fn exec(program: Option<Program>, priority: Priority) -> Result<ProcessId, KernelError> {
    kernel()?.scheduler.exec(program, priority)
}

/// Like [`exec`], but reports failure as [`ProcessId::INVALID`].
pub fn exec_or_invalid(program: Option<Program>, priority: Priority) -> ProcessId {
    exec(program, priority).unwrap_or(ProcessId::INVALID)
}

/// Free the slot of `pid`. The idle process cannot be killed.
pub fn kill(pid: ProcessId) -> Result<(), KernelError> {
    kernel()?.scheduler.kill(pid)
}

/// End the calling process. **Does not return.**
///
/// The slot is freed immediately and the CPU handed on; the remaining
/// instructions of this process never run again.
pub fn exit() -> ! {
    if let Ok(kernel) = kernel() {
        let current = kernel.scheduler.current();
        if let Err(e) = kernel.scheduler.kill(current) {
            error!("exit: {}", e);
        }
    }
    loop {
        arch::request_switch();
        arch::wait_for_interrupt();
    }
}

/// Hand the rest of the current quantum to the next process.
///
/// Ignored inside a critical section, where no switch may happen.
pub fn yield_now() {
    if let Ok(kernel) = kernel() {
        if kernel.scheduler.critical_depth() == 0 {
            arch::request_switch();
        }
    }
}

pub fn set_strategy(strategy: SchedulingStrategy) -> Result<(), KernelError> {
    let scheduler = &mut kernel()?.scheduler;
    scheduler.enter_critical_section();
    scheduler.set_strategy(strategy);
    scheduler.leave_critical_section();
    Ok(())
}

pub fn strategy() -> Result<SchedulingStrategy, KernelError> {
    Ok(kernel()?.scheduler.strategy())
}

/// Id of the running process.
pub fn current() -> Result<ProcessId, KernelError> {
    Ok(kernel()?.scheduler.current())
}

/// Snapshot of the descriptor of `pid`.
pub fn slot(pid: ProcessId) -> Result<Process, KernelError> {
    let scheduler = &kernel()?.scheduler;
    if !pid.is_valid() {
        return Err(KernelError::InvalidProcess(pid));
    }
    Ok(*scheduler.slot(pid))
}

/// Enter a (nested) critical section: the tick is not serviced until the
/// matching [`leave_critical_section`].
pub fn enter_critical_section() {
    if let Ok(kernel) = kernel() {
        kernel.scheduler.enter_critical_section();
    }
}

pub fn leave_critical_section() {
    if let Ok(kernel) = kernel() {
        kernel.scheduler.leave_critical_section();
    }
}

/// Execute a closure within a critical section. The section is left on
/// every path out of `f`, so calls always pair.
///
/// # Usage
/// ```ignore
/// kernel::critical_section(|| {
///     // Read-modify-write shared state safely
/// });
/// ```
pub fn critical_section<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    enter_critical_section();
    let result = f();
    leave_critical_section();
    result
}

// ---------------------------------------------------------------------------
// Port entry
// ---------------------------------------------------------------------------

/// Context switch requested by the port with the running process's stack
/// top already holding its saved registers. Returns the stack top to restore.
///
/// Fatal errors never return: they go to the board's fatal handler.
#[cfg(target_arch = "arm")]
pub(crate) fn switch_from_isr(saved_address: usize) -> usize {
    let kernel = match kernel() {
        Ok(kernel) => kernel,
        Err(_) => return saved_address,
    };
    match switch_at(&mut kernel.scheduler, &mut *kernel.board, saved_address) {
        Ok(address) => address,
        Err(e) => {
            error!("fatal: {}", e);
            kernel.board.fatal(e)
        }
    }
}

/// Translate the port's raw addresses to and from stack offsets around
/// [`Scheduler::switch`].
///
/// A switch requested while a critical section is open resumes the same
/// process unchanged.
#[cfg_attr(not(target_arch = "arm"), allow(dead_code))]
fn switch_at(
    scheduler: &mut Scheduler,
    board: &mut dyn Board,
    saved_address: usize,
) -> Result<usize, KernelError> {
    if scheduler.critical_depth() > 0 {
        return Ok(saved_address);
    }

    let current = scheduler.current();
    let saved = scheduler
        .table()
        .stack(current)
        .pointer_at(saved_address)
        .ok_or(KernelError::StackOutOfBounds(current))?;

    let sp = scheduler.switch(saved, board)?;
    Ok(scheduler.table().stack(scheduler.current()).address_of(sp))
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
