//! # Hosted Port
//!
//! Software model of the interrupt controls for builds that do not target a
//! Cortex-M part. It keeps the global enable bit and the tick gate as plain
//! flags so tests can observe exactly what the critical-section guard did.

use super::Port;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hosted {
    interrupts_enabled: bool,
    tick_enabled: bool,
}

impl Hosted {
    /// Interrupts enabled and the tick running, as after `kernel::start`.
    pub const fn new() -> Self {
        Self {
            interrupts_enabled: true,
            tick_enabled: true,
        }
    }

    pub fn interrupts_enabled(&self) -> bool {
        self.interrupts_enabled
    }
}

impl Default for Hosted {
    fn default() -> Self {
        Self::new()
    }
}

impl Port for Hosted {
    fn mask_interrupts(&mut self) -> bool {
        core::mem::replace(&mut self.interrupts_enabled, false)
    }

    fn restore_interrupts(&mut self, was_enabled: bool) {
        if was_enabled {
            self.interrupts_enabled = true;
        }
    }

    fn set_tick_enabled(&mut self, enabled: bool) {
        self.tick_enabled = enabled;
    }

    fn tick_enabled(&self) -> bool {
        self.tick_enabled
    }
}

/// No switch can be pended without a tick handler.
#[inline]
pub fn request_switch() {}

/// Nothing to sleep on without hardware.
#[inline]
pub fn wait_for_interrupt() {
    core::hint::spin_loop();
}
