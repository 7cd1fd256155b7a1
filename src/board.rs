//! # Board Collaborators
//!
//! Everything the scheduler needs from the world outside the CPU core: the
//! button state, the operator task manager, a seed for the `Random`
//! strategy and somewhere to report a fatal error.

use bitflags::bitflags;

use crate::error::KernelError;
use crate::scheduler::Scheduler;

bitflags! {
    /// Pressed buttons, one bit per button.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Buttons: u8 {
        const ENTER = 0b0000_0001;
        const DOWN  = 0b0000_0010;
        const UP    = 0b0000_0100;
        const ESC   = 0b0000_1000;
    }
}

impl Buttons {
    /// Chord that opens the task manager from any process.
    pub const TASK_MANAGER: Buttons = Buttons::ENTER.union(Buttons::ESC);
}

pub trait Board {
    /// Buttons pressed right now.
    fn buttons(&mut self) -> Buttons;

    /// Busy-wait until every button is released.
    fn wait_for_no_input(&mut self) {
        while !self.buttons().is_empty() {
            core::hint::spin_loop();
        }
    }

    /// Run the operator task manager. Called from the tick handler with the
    /// next process already selected; it may change the strategy or kill
    /// processes before that process resumes.
    fn open_task_manager(&mut self, scheduler: &mut Scheduler);

    /// Seed for the `Random` strategy.
    fn entropy(&mut self) -> u64;

    /// Report an unrecoverable error and halt.
    fn fatal(&mut self, error: KernelError) -> !;
}

#[cfg(test)]
pub(crate) mod tests {
    extern crate std;

    use super::*;
    use std::collections::VecDeque;
    use std::vec::Vec;

    /// Board double that replays scripted button readings.
    #[derive(Default)]
    pub(crate) struct ScriptedBoard {
        /// Readings returned in order; `empty()` once exhausted.
        pub readings: VecDeque<Buttons>,
        pub reads: usize,
        pub task_manager_opened: usize,
        /// Processes the task manager kills when opened.
        pub kill_on_open: Vec<crate::process::ProcessId>,
    }

    impl ScriptedBoard {
        pub(crate) fn pressing(readings: &[Buttons]) -> Self {
            Self {
                readings: readings.iter().copied().collect(),
                ..Self::default()
            }
        }
    }

    impl Board for ScriptedBoard {
        fn buttons(&mut self) -> Buttons {
            self.reads += 1;
            self.readings.pop_front().unwrap_or(Buttons::empty())
        }

        fn open_task_manager(&mut self, scheduler: &mut Scheduler) {
            self.task_manager_opened += 1;
            for &pid in &self.kill_on_open {
                scheduler.kill(pid).unwrap();
            }
        }

        fn entropy(&mut self) -> u64 {
            0x1234_5678
        }

        fn fatal(&mut self, error: KernelError) -> ! {
            panic!("fatal: {error}");
        }
    }

    #[test]
    fn test_task_manager_chord() {
        assert_eq!(Buttons::TASK_MANAGER.bits(), 0b1001);
        assert_ne!(Buttons::ENTER, Buttons::TASK_MANAGER);
        assert!(Buttons::TASK_MANAGER.contains(Buttons::ESC));
    }

    #[test]
    fn test_wait_for_no_input_drains_presses() {
        let mut board = ScriptedBoard::pressing(&[
            Buttons::TASK_MANAGER,
            Buttons::ENTER,
            Buttons::empty(),
            Buttons::UP,
        ]);
        board.wait_for_no_input();
        assert_eq!(board.reads, 3);
        assert_eq!(board.readings.len(), 1);
    }
}
