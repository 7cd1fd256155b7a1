//! # SPOS Example Firmware
//!
//! Runs the kernel on an STM32F4 board with four push buttons on GPIOC
//! (PC0, PC1, PC6, PC7, active low) and log output over semihosting.
//!
//! | Program | Behavior |
//! |---------|----------|
//! | `counter_a` | Counts forever, reports every 100 000 iterations |
//! | `counter_b` | Same, but yields its quantum after each report |
//! | `spawner` | Periodically starts a short-lived `worker` |
//! | `worker` | Does a bounded amount of work, then exits |
//!
//! Holding ENTER + ESC opens the task manager, which prints the process
//! table and switches to the next scheduling strategy.
//!
//! On a non-ARM host this binary is an empty stub; only the library is
//! built and tested there.

#![cfg_attr(target_arch = "arm", no_std)]
#![cfg_attr(target_arch = "arm", no_main)]

#[cfg(target_arch = "arm")]
mod firmware {
    use core::ptr;

    use cortex_m_rt::entry;
    use cortex_m_semihosting::hprintln;
    use log::{error, info, LevelFilter, Log, Metadata, Record};
    use panic_halt as _;

    use spos::board::{Board, Buttons};
    use spos::error::KernelError;
    use spos::kernel;
    use spos::process::{ProcessId, Program};
    use spos::scheduler::Scheduler;

    // -----------------------------------------------------------------------
    // Logging
    // -----------------------------------------------------------------------

    struct SemihostingLogger;

    impl Log for SemihostingLogger {
        fn enabled(&self, _metadata: &Metadata) -> bool {
            true
        }

        fn log(&self, record: &Record) {
            hprintln!("[{:<5}] {}", record.level(), record.args());
        }

        fn flush(&self) {}
    }

    static LOGGER: SemihostingLogger = SemihostingLogger;

    // -----------------------------------------------------------------------
    // Board
    // -----------------------------------------------------------------------

    const RCC_AHB1ENR: *mut u32 = 0x4002_3830 as *mut u32;
    const RCC_AHB1ENR_GPIOCEN: u32 = 1 << 2;

    const GPIOC_MODER: *mut u32 = 0x4002_0800 as *mut u32;
    const GPIOC_PUPDR: *mut u32 = 0x4002_080C as *mut u32;
    const GPIOC_IDR: *const u32 = 0x4002_0810 as *const u32;

    /// Button pins, in `Buttons` bit order.
    const BUTTON_PINS: [u32; 4] = [0, 1, 6, 7];

    struct DiscoveryBoard;

    impl DiscoveryBoard {
        /// Buttons as inputs with pull-ups; a pressed button reads low.
        fn init_input(&mut self) {
            unsafe {
                let enr = ptr::read_volatile(RCC_AHB1ENR);
                ptr::write_volatile(RCC_AHB1ENR, enr | RCC_AHB1ENR_GPIOCEN);

                let mut moder = ptr::read_volatile(GPIOC_MODER);
                let mut pupdr = ptr::read_volatile(GPIOC_PUPDR);
                for pin in BUTTON_PINS {
                    moder &= !(0b11 << (pin * 2));
                    pupdr = (pupdr & !(0b11 << (pin * 2))) | (0b01 << (pin * 2));
                }
                ptr::write_volatile(GPIOC_MODER, moder);
                ptr::write_volatile(GPIOC_PUPDR, pupdr);
            }
        }
    }

    impl Board for DiscoveryBoard {
        fn buttons(&mut self) -> Buttons {
            let idr = unsafe { ptr::read_volatile(GPIOC_IDR) };
            let pressed = BUTTON_PINS
                .iter()
                .enumerate()
                .filter(|(_, pin)| idr & (1 << **pin) == 0)
                .fold(0u8, |bits, (bit, _)| bits | (1 << bit));
            Buttons::from_bits_truncate(pressed)
        }

        fn open_task_manager(&mut self, scheduler: &mut Scheduler) {
            info!("--- task manager ({} ticks) ---", scheduler.ticks());
            for (pid, process) in scheduler.table().iter().filter(|(_, p)| p.is_used()) {
                info!(
                    "{} {:?} prio {} stack {} bytes",
                    pid,
                    process.state,
                    process.priority,
                    process.stack_pointer.depth()
                );
            }
            let next = scheduler.strategy().next();
            scheduler.set_strategy(next);
        }

        fn entropy(&mut self) -> u64 {
            // Whatever the counter and the button lines read at boot.
            let current = cortex_m::peripheral::SYST::get_current() as u64;
            let idr = unsafe { ptr::read_volatile(GPIOC_IDR) } as u64;
            (current << 32) ^ idr ^ 0x5350_4F53
        }

        fn fatal(&mut self, error: KernelError) -> ! {
            error!("FATAL: {}", error);
            cortex_m::interrupt::disable();
            loop {
                cortex_m::asm::wfi();
            }
        }
    }

    // -----------------------------------------------------------------------
    // Programs
    // -----------------------------------------------------------------------

    fn report(name: &str, rounds: u32) {
        kernel::critical_section(|| {
            let pid = kernel::current().unwrap_or(ProcessId::INVALID);
            info!("{} (process {}): round {}", name, pid, rounds);
        });
    }

    extern "C" fn counter_a() -> ! {
        let mut rounds = 0u32;
        loop {
            for _ in 0..100_000 {
                cortex_m::asm::nop();
            }
            rounds = rounds.wrapping_add(1);
            report("counter_a", rounds);
        }
    }

    extern "C" fn counter_b() -> ! {
        let mut rounds = 0u32;
        loop {
            for _ in 0..100_000 {
                cortex_m::asm::nop();
            }
            rounds = rounds.wrapping_add(1);
            report("counter_b", rounds);
            kernel::yield_now();
        }
    }

    extern "C" fn worker() -> ! {
        for _ in 0..200_000 {
            cortex_m::asm::nop();
        }
        report("worker", 1);
        kernel::exit()
    }

    extern "C" fn spawner() -> ! {
        let mut rounds = 0u32;
        loop {
            for _ in 0..400_000 {
                cortex_m::asm::nop();
            }
            rounds = rounds.wrapping_add(1);
            let pid = kernel::exec_or_invalid(Some(worker as Program), 50);
            if pid == ProcessId::INVALID {
                report("spawner: table full", rounds);
            }
        }
    }

    static AUTOSTART: [Program; 3] = [counter_a, counter_b, spawner];

    // -----------------------------------------------------------------------
    // Main entry point
    // -----------------------------------------------------------------------

    /// Firmware entry point. Initializes the kernel, registers the autostart
    /// programs and starts the scheduler. Does not return.
    #[entry]
    fn main() -> ! {
        log::set_logger(&LOGGER).expect("logger already installed");
        log::set_max_level(LevelFilter::Info);

        let cp = cortex_m::Peripherals::take().unwrap();

        let board = cortex_m::singleton!(: DiscoveryBoard = DiscoveryBoard).unwrap();
        board.init_input();

        kernel::init(board, &AUTOSTART).expect("kernel initialisation failed");
        kernel::start(cp)
    }
}

#[cfg(not(target_arch = "arm"))]
fn main() {}
