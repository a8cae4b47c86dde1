//! HAL Capability Surface.
//!
//! The core calls every hardware effect through this trait only. Hosts
//! install a concrete implementation at [`crate::init`]; test builds use
//! [`RecordingHal`] or a `mockall` mock of [`Hal`] itself.

use crate::context::CpState;

/// Callbacks the host installs so the engine never touches hardware
/// directly. All methods default to no-ops so a host can implement only
/// the capabilities it actually wires up.
#[cfg_attr(test, mockall::automock)]
pub trait Hal {
    /// Write PWM duty, where 0..=1024 means 0..=100%.
    fn set_cp_duty(&mut self, duty_1024: u32) {
        let _ = duty_1024;
    }
    fn contactor1(&mut self, on: bool) {
        let _ = on;
    }
    fn contactor2(&mut self, on: bool) {
        let _ = on;
    }
    /// Open/close the CP disconnect relay.
    fn set_pilot(&mut self, connected: bool) {
        let _ = connected;
    }
    fn actuator_lock(&mut self) {}
    fn actuator_unlock(&mut self) {}
    fn actuator_off(&mut self) {}
    /// Fired from inside `set_state` after the `Context` is updated but
    /// before returning.
    fn on_state_change(&mut self, old: CpState, new: CpState) {
        let _ = (old, new);
    }
}

/// A no-op HAL, used when a host genuinely has nothing to wire up (e.g. a
/// pure logic test that only inspects `Context` fields).
#[derive(Default)]
pub struct NullHal;

impl Hal for NullHal {}

/// A HAL that records every effect for test assertions; test builds install
/// it instead of wiring up real hardware.
#[derive(Default)]
pub struct RecordingHal {
    pub last_pwm_duty: u32,
    pub contactor1_state: bool,
    pub contactor2_state: bool,
    pub pilot_connected: bool,
    pub transition_log: Vec<CpState>,
}

impl Hal for RecordingHal {
    fn set_cp_duty(&mut self, duty_1024: u32) {
        self.last_pwm_duty = duty_1024;
    }

    fn contactor1(&mut self, on: bool) {
        self.contactor1_state = on;
    }

    fn contactor2(&mut self, on: bool) {
        self.contactor2_state = on;
    }

    fn set_pilot(&mut self, connected: bool) {
        self.pilot_connected = connected;
    }

    fn on_state_change(&mut self, old: CpState, new: CpState) {
        if old != new {
            self.transition_log.push(new);
        }
    }
}
