//! Safety Supervisor: the 1 s tick that ages every timer,
//! recovers transient errors, and enforces meter/temperature watchdogs.

use crate::availability::is_current_available;
use crate::context::{AccessStatus, Context, CpState, CHARGE_DELAY, COMM_EV_TIMEOUT, COMM_TIMEOUT};
use crate::errors::ErrorFlags;
use crate::hal::Hal;
use crate::priority::schedule_tick_1s;
use crate::state_machine::{set_access, set_power_unavailable, set_state};

/// The 1 s housekeeping tick. Ages every countdown timer,
/// drives modem-stage transitions, and folds in the priority scheduler's
/// own 1 s tick at the end.
pub fn tick_1s(ctx: &mut Context, hal: &mut impl Hal) {
    if ctx.activation_mode != 0 && ctx.activation_mode != 255 {
        ctx.activation_mode -= 1;
    }
    if ctx.activation_timer > 0 {
        ctx.activation_timer -= 1;
    }

    if ctx.modem_enabled {
        if ctx.state == CpState::ModemRequest {
            if ctx.to_modem_wait_state_timer > 0 {
                ctx.to_modem_wait_state_timer -= 1;
            } else {
                set_state(ctx, hal, CpState::ModemWait);
            }
        }
        if ctx.state == CpState::ModemWait {
            if ctx.to_modem_done_state_timer > 0 {
                ctx.to_modem_done_state_timer -= 1;
            } else {
                set_state(ctx, hal, CpState::ModemDone);
            }
        }
        if ctx.state == CpState::ModemDone {
            if ctx.leave_modem_done_state_timer > 0 {
                ctx.leave_modem_done_state_timer -= 1;
            } else {
                hal.set_cp_duty(1024);
                hal.set_pilot(false);
                if ctx.required_evccid.is_empty() || ctx.required_evccid == ctx.evccid {
                    ctx.modem_stage = 1;
                    set_state(ctx, hal, CpState::B);
                } else {
                    ctx.modem_stage = 0;
                    ctx.leave_modem_denied_state_timer = 60;
                    set_state(ctx, hal, CpState::ModemDenied);
                }
            }
        }
        if ctx.state == CpState::ModemDenied {
            if ctx.leave_modem_denied_state_timer > 0 {
                ctx.leave_modem_denied_state_timer -= 1;
            } else {
                set_state(ctx, hal, CpState::A);
                hal.set_pilot(true);
            }
        }
        // disconnect_time_counter itself is managed by the host wrapper; it
        // needs a live pilot reading this tick does not have.
    }

    if ctx.state == CpState::C1 {
        if ctx.c1_timer > 0 {
            ctx.c1_timer -= 1;
        } else {
            set_state(ctx, hal, CpState::B1);
        }
    }

    if ctx.solar_stop_timer > 0 {
        ctx.solar_stop_timer -= 1;
        if ctx.solar_stop_timer == 0 {
            if ctx.state == CpState::C {
                set_state(ctx, hal, CpState::C1);
            }
            ctx.error_flags.insert(ErrorFlags::LESS_6A);
        }
    }

    if ctx.pilot_disconnect_time > 0 {
        ctx.pilot_disconnect_time -= 1;
    }

    for x in 0..crate::context::NR_EVSES {
        if ctx.balanced_state[x] == CpState::C {
            ctx.nodes[x].int_timer += 1;
            ctx.nodes[x].timer += 1;
        } else {
            ctx.nodes[x].int_timer = 0;
        }
    }

    if ctx.max_sum_mains_timer > 0 {
        ctx.max_sum_mains_timer -= 1;
        if ctx.max_sum_mains_timer == 0 {
            if ctx.state == CpState::C {
                set_state(ctx, hal, CpState::C1);
            }
            ctx.error_flags.insert(ErrorFlags::LESS_6A);
        }
    }

    if ctx.charge_delay > 0 {
        ctx.charge_delay -= 1;
    }

    if ctx.access_timer > 0 && ctx.state == CpState::A {
        ctx.access_timer -= 1;
        if ctx.access_timer == 0 {
            set_access(ctx, hal, AccessStatus::Off);
        }
    } else if ctx.state != CpState::A {
        ctx.access_timer = 0;
    }

    if ctx.temp_evse < ctx.max_temp - 10 && ctx.error_flags.contains(ErrorFlags::TEMP_HIGH) {
        ctx.error_flags.remove(ErrorFlags::TEMP_HIGH);
    }

    if ctx.error_flags.contains(ErrorFlags::LESS_6A) && ctx.load_bl < 2 && is_current_available(ctx) {
        ctx.error_flags.remove(ErrorFlags::LESS_6A);
    }

    if ctx.mains_meter_type && ctx.load_bl < 2 {
        if ctx.mains_meter_timeout == 0 && !ctx.error_flags.contains(ErrorFlags::CT_NO_COMM) && ctx.mode != crate::context::Mode::Normal
        {
            ctx.error_flags.insert(ErrorFlags::CT_NO_COMM);
            set_power_unavailable(ctx, hal);
        } else if ctx.mains_meter_timeout > 0 {
            ctx.mains_meter_timeout -= 1;
        }
    } else if ctx.load_bl > 1 {
        if ctx.mains_meter_timeout == 0 && !ctx.error_flags.contains(ErrorFlags::CT_NO_COMM) {
            ctx.error_flags.insert(ErrorFlags::CT_NO_COMM);
            set_power_unavailable(ctx, hal);
        } else if ctx.mains_meter_timeout > 0 {
            ctx.mains_meter_timeout -= 1;
        }
    } else {
        ctx.mains_meter_timeout = COMM_TIMEOUT;
    }

    if ctx.ev_meter_type {
        if ctx.ev_meter_timeout == 0 && !ctx.error_flags.contains(ErrorFlags::EV_NO_COMM) && ctx.mode != crate::context::Mode::Normal
        {
            ctx.error_flags.insert(ErrorFlags::EV_NO_COMM);
            set_power_unavailable(ctx, hal);
        } else if ctx.ev_meter_timeout > 0 {
            ctx.ev_meter_timeout -= 1;
        }
    } else {
        ctx.ev_meter_timeout = COMM_EV_TIMEOUT;
    }

    if ctx.error_flags.contains(ErrorFlags::CT_NO_COMM) && ctx.mains_meter_timeout > 0 {
        ctx.error_flags.remove(ErrorFlags::CT_NO_COMM);
    }
    if ctx.error_flags.contains(ErrorFlags::EV_NO_COMM) && ctx.ev_meter_timeout > 0 {
        ctx.error_flags.remove(ErrorFlags::EV_NO_COMM);
    }

    if ctx.temp_evse > ctx.max_temp && !ctx.error_flags.contains(ErrorFlags::TEMP_HIGH) {
        ctx.error_flags.insert(ErrorFlags::TEMP_HIGH);
        set_power_unavailable(ctx, hal);
    }

    if ctx.error_flags.contains(ErrorFlags::LESS_6A) {
        set_power_unavailable(ctx, hal);
        ctx.charge_delay = CHARGE_DELAY;
    }

    schedule_tick_1s(ctx);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::hal::RecordingHal;

    #[test]
    fn modem_denied_timer_reads_59_not_60_on_the_tick_it_starts() {
        // The ModemDone->ModemDenied transition and the ModemDenied block
        // both run within the same tick_1s call (flat fall-through, as in
        // tick_10ms): the timer is set to 60 by set_state, then immediately
        // decremented once more in the very same call.
        let mut ctx = Context::default();
        ctx.modem_enabled = true;
        ctx.state = CpState::ModemDone;
        ctx.required_evccid = "AA".into();
        ctx.evccid = "BB".into();
        let mut hal = RecordingHal::default();
        tick_1s(&mut ctx, &mut hal);
        assert_eq!(ctx.state, CpState::ModemDenied);
        assert_eq!(ctx.leave_modem_denied_state_timer, 59);
    }

    #[test]
    fn temperature_over_limit_sets_error_and_retreats() {
        let mut ctx = Context::default();
        ctx.state = CpState::C;
        ctx.temp_evse = ctx.max_temp + 1;
        let mut hal = RecordingHal::default();
        tick_1s(&mut ctx, &mut hal);
        assert!(ctx.error_flags.contains(ErrorFlags::TEMP_HIGH));
        assert_eq!(ctx.state, CpState::C1);
    }

    #[test]
    fn less_6a_recovers_once_current_is_available_again() {
        let mut ctx = Context::default();
        ctx.error_flags.insert(ErrorFlags::LESS_6A);
        let mut hal = RecordingHal::default();
        tick_1s(&mut ctx, &mut hal);
        assert!(!ctx.error_flags.contains(ErrorFlags::LESS_6A));
    }

    #[test]
    fn access_timer_expiry_drops_access_to_off() {
        let mut ctx = Context::default();
        ctx.state = CpState::A;
        ctx.access_timer = 1;
        ctx.access_status = AccessStatus::On;
        let mut hal = RecordingHal::default();
        tick_1s(&mut ctx, &mut hal);
        assert_eq!(ctx.access_status, AccessStatus::Off);
    }
}
