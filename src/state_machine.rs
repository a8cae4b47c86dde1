//! Control Pilot State Machine: `set_state` transition effects,
//! the 10 ms pilot-driven tick, and the Contact-2 phase-switching policy.

use crate::availability::is_current_available;
use crate::context::{AccessStatus, CpState, EnableC2, Mode, Pilot, RfidReader, SwitchingPhases};
use crate::context::Context;
use crate::errors::ErrorFlags;
use crate::hal::Hal;

/// Whether the present configuration demands single-phase charging right
/// now.
pub fn force_single_phase(ctx: &Context) -> bool {
    match ctx.enable_c2 {
        EnableC2::NotPresent => false,
        EnableC2::AlwaysOff => true,
        EnableC2::SolarOff => ctx.mode == Mode::Solar,
        EnableC2::Auto => ctx.nr_of_phases_charging == 1,
        EnableC2::AlwaysOn => false,
    }
}

/// Decide whether a 1P<->3P switch is needed and arm `switching_phases_c2`
/// accordingly. Only takes effect immediately while parked in STATE_A;
/// otherwise it's deferred until the next STATE_C entry.
pub fn check_switching_phases(ctx: &mut Context) {
    if ctx.enable_c2 != EnableC2::Auto || ctx.mode == Mode::Solar {
        if force_single_phase(ctx) {
            if ctx.nr_of_phases_charging != 1 {
                if ctx.state != CpState::A {
                    ctx.switching_phases_c2 = SwitchingPhases::GoingTo1P;
                } else {
                    ctx.nr_of_phases_charging = 1;
                }
            } else {
                ctx.switching_phases_c2 = SwitchingPhases::NoSwitch;
            }
        } else if ctx.nr_of_phases_charging != 3 {
            if ctx.state != CpState::A {
                ctx.switching_phases_c2 = SwitchingPhases::GoingTo3P;
            } else {
                ctx.nr_of_phases_charging = 3;
            }
        } else {
            ctx.switching_phases_c2 = SwitchingPhases::NoSwitch;
        }
    } else if ctx.mode == Mode::Smart {
        if ctx.nr_of_phases_charging != 3 {
            ctx.switching_phases_c2 = SwitchingPhases::GoingTo3P;
        } else {
            ctx.switching_phases_c2 = SwitchingPhases::NoSwitch;
        }
    }

    if ctx.switching_phases_c2 != SwitchingPhases::NoSwitch {
        log::debug!("phase switch armed: {:?}", ctx.switching_phases_c2);
    }
}

/// Transition to `new_state`, firing every hardware effect that state's
/// entry requires, then calling `hal.on_state_change`.
pub fn set_state(ctx: &mut Context, hal: &mut impl Hal, new_state: CpState) {
    let old_state = ctx.state;

    match new_state {
        CpState::B1 => {
            if ctx.charge_delay == 0 {
                ctx.charge_delay = 3;
            }
            if ctx.state != CpState::B1 && !ctx.pilot_disconnected && ctx.access_status == AccessStatus::On {
                hal.set_pilot(false);
                ctx.pilot_disconnected = true;
                ctx.pilot_disconnect_time = 5;
            }
            contactors_and_pwm_off(ctx, hal, new_state);
        }
        CpState::A => {
            contactors_and_pwm_off(ctx, hal, new_state);
        }
        CpState::ModemRequest => {
            ctx.to_modem_wait_state_timer = 0;
            ctx.disconnect_time_counter = -1;
            hal.set_pilot(false);
            hal.set_cp_duty(1024);
            hal.contactor1(false);
            hal.contactor2(false);
        }
        CpState::ModemWait => {
            hal.set_pilot(true);
            hal.set_cp_duty(51);
            ctx.to_modem_done_state_timer = 60;
        }
        CpState::ModemDone => {
            ctx.disconnect_time_counter = -1;
            hal.set_pilot(false);
            ctx.leave_modem_done_state_timer = 5;
        }
        CpState::B => {
            check_switching_phases(ctx);
            if ctx.modem_enabled {
                hal.set_pilot(true);
                ctx.disconnect_time_counter = -1;
            }
            hal.contactor1(false);
            hal.contactor2(false);
        }
        CpState::C => {
            ctx.activation_mode = 255;

            match ctx.switching_phases_c2 {
                SwitchingPhases::GoingTo1P => ctx.nr_of_phases_charging = 1,
                SwitchingPhases::GoingTo3P => ctx.nr_of_phases_charging = 3,
                SwitchingPhases::NoSwitch => {}
            }

            hal.contactor1(true);
            if !force_single_phase(ctx) {
                hal.contactor2(true);
                ctx.nr_of_phases_charging = 3;
            } else {
                hal.contactor2(false);
                ctx.nr_of_phases_charging = 1;
            }

            ctx.solar_stop_timer = 0;
            ctx.max_sum_mains_timer = 0;
            ctx.switching_phases_c2 = SwitchingPhases::NoSwitch;
        }
        CpState::C1 => {
            hal.set_cp_duty(1024);
            ctx.c1_timer = 6;
            ctx.charge_delay = 15;
        }
        _ => {}
    }

    ctx.balanced_state[0] = new_state;
    ctx.state = new_state;

    if old_state != new_state {
        log::info!("state transition {:?} -> {:?}", old_state, new_state);
    }

    hal.on_state_change(old_state, new_state);
}

fn contactors_and_pwm_off(ctx: &mut Context, hal: &mut impl Hal, new_state: CpState) {
    hal.contactor1(false);
    hal.contactor2(false);
    hal.set_cp_duty(1024);

    if new_state == CpState::A {
        ctx.modem_stage = 0;
        if ctx.modem_enabled && ctx.disconnect_time_counter == -1 {
            ctx.disconnect_time_counter = 0;
        }
        ctx.error_flags.remove(ErrorFlags::LESS_6A);
        ctx.charge_delay = 0;
        ctx.nodes[0].timer = 0;
        ctx.nodes[0].int_timer = 0;
        ctx.nodes[0].phases = 0;
        ctx.nodes[0].min_current = 0;
    }
}

/// Authorization transitions: dropping access
/// while mid-session forces a graceful retreat to `C1`/`B1`.
pub fn set_access(ctx: &mut Context, hal: &mut impl Hal, access: AccessStatus) {
    ctx.access_status = access;
    if access == AccessStatus::Off || access == AccessStatus::Pause {
        if ctx.state == CpState::C {
            set_state(ctx, hal, CpState::C1);
        } else if ctx.state != CpState::C1
            && matches!(
                ctx.state,
                CpState::B | CpState::ModemRequest | CpState::ModemWait | CpState::ModemDone | CpState::ModemDenied
            )
        {
            set_state(ctx, hal, CpState::B1);
        }
    }
}

/// Graceful shutdown on a resource becoming unavailable (power, meter
/// comms, over-temperature): retreat to `C1` from `C`, or `B1` from
/// anywhere else mid-session.
pub fn set_power_unavailable(ctx: &mut Context, hal: &mut impl Hal) {
    if ctx.state == CpState::A {
        return;
    }
    if ctx.state == CpState::C {
        set_state(ctx, hal, CpState::C1);
    } else if ctx.state != CpState::C1 && ctx.state != CpState::B1 {
        set_state(ctx, hal, CpState::B1);
    }
}

/// The 10 ms pilot-sampling tick. Each state's handler is a
/// guarded block, not an early return: a transition made in one block can
/// be observed by the very next guarded block within the same call.
pub fn tick_10ms(ctx: &mut Context, hal: &mut impl Hal, pilot: Pilot) {
    if ctx.state == CpState::A || ctx.state == CpState::CommB || ctx.state == CpState::B1 {
        if ctx.pilot_disconnected {
            if ctx.pilot_disconnect_time == 0 {
                hal.set_pilot(true);
                ctx.pilot_disconnected = false;
            }
        } else if pilot == Pilot::P12V {
            if matches!(ctx.rfid_reader, RfidReader::EnableAll | RfidReader::EnableOne)
                && ctx.access_timer == 0
                && ctx.access_status == AccessStatus::On
            {
                ctx.access_timer = crate::context::RFID_LOCK_TIME;
            }
            if ctx.state != CpState::A {
                set_state(ctx, hal, CpState::A);
            }
            ctx.charge_delay = 0;
        } else if pilot == Pilot::P9V
            && ctx.error_flags.is_empty()
            && ctx.charge_delay == 0
            && ctx.access_status == AccessStatus::On
            && ctx.state != CpState::CommB
        {
            ctx.diode_check = 0;

            ctx.charge_current = if ctx.max_current > ctx.max_capacity && ctx.max_capacity > 0 {
                ctx.max_capacity * 10
            } else {
                ctx.min_current * 10
            };

            if ctx.load_bl > 1 {
                set_state(ctx, hal, CpState::CommB);
            } else if is_current_available(ctx) {
                ctx.balanced_max[0] = ctx.max_capacity * 10;
                ctx.balanced[0] = ctx.charge_current;

                if ctx.modem_enabled && ctx.modem_stage == 0 {
                    set_state(ctx, hal, CpState::ModemRequest);
                } else {
                    set_state(ctx, hal, CpState::B);
                }

                ctx.activation_mode = 30;
                ctx.access_timer = 0;
            } else {
                ctx.error_flags.insert(ErrorFlags::LESS_6A);
            }
        } else if pilot == Pilot::P9V
            && ctx.state != CpState::B1
            && ctx.state != CpState::CommB
            && ctx.access_status == AccessStatus::On
        {
            set_state(ctx, hal, CpState::B1);
        }
    }

    if ctx.state == CpState::CommBOk {
        set_state(ctx, hal, CpState::B);
        ctx.activation_mode = 30;
        ctx.access_timer = 0;
    }

    if ctx.state == CpState::B || ctx.state == CpState::CommC {
        if pilot == Pilot::P12V {
            set_state(ctx, hal, CpState::A);
        } else if pilot == Pilot::P6V {
            ctx.state_timer += 1;
            if ctx.state_timer > 50
                && ctx.diode_check == 1
                && ctx.error_flags.is_empty()
                && ctx.charge_delay == 0
                && ctx.access_status == AccessStatus::On
            {
                if ctx.load_bl > 1 {
                    if ctx.state != CpState::CommC {
                        set_state(ctx, hal, CpState::CommC);
                    }
                } else {
                    ctx.balanced_max[0] = ctx.charge_current;
                    if is_current_available(ctx) {
                        ctx.balanced[0] = ctx.min_current * 10;
                        crate::balance::calc_balanced_current(ctx, hal, true);
                        ctx.diode_check = 0;
                        set_state(ctx, hal, CpState::C);
                    } else {
                        ctx.error_flags.insert(ErrorFlags::LESS_6A);
                    }
                }
            }
        } else if pilot == Pilot::P9V {
            ctx.state_timer = 0;
            if ctx.activation_mode == 0 {
                set_state(ctx, hal, CpState::ActStart);
                ctx.activation_timer = 3;
            }
        }

        if pilot == Pilot::PDiode {
            ctx.diode_check = 1;
        }
    }

    if ctx.state == CpState::C1 {
        if pilot == Pilot::P12V {
            set_state(ctx, hal, CpState::A);
        } else if pilot == Pilot::P9V {
            set_state(ctx, hal, CpState::B1);
        }
    }

    if ctx.state == CpState::ActStart && ctx.activation_timer == 0 {
        set_state(ctx, hal, CpState::B);
        ctx.activation_mode = 255;
    }

    if ctx.state == CpState::CommCOk {
        ctx.diode_check = 0;
        set_state(ctx, hal, CpState::C);
    }

    if ctx.state == CpState::C {
        if pilot == Pilot::P12V {
            set_state(ctx, hal, CpState::A);
        } else if pilot == Pilot::P9V {
            set_state(ctx, hal, CpState::B);
            ctx.diode_check = 0;
        } else if pilot == Pilot::PShort {
            ctx.state_timer += 1;
            if ctx.state_timer > 50 {
                ctx.state_timer = 0;
                set_state(ctx, hal, CpState::B);
                ctx.diode_check = 0;
            }
        } else {
            ctx.state_timer = 0;
        }
    }
}
