//! Balanced-Current Allocator: given the active EVSEs, compute
//! `iset_balanced` and per-EVSE `balanced[]` under Normal/Smart/Solar
//! regulation, including 3P<->1P phase-switching triggers and priority
//! scheduling under shortage.

use crate::context::{Context, CpState, Mode, ScheduleState, SwitchingPhases, NR_EVSES, SOLAR_START_TIME};
use crate::errors::ErrorFlags;
use crate::hal::Hal;
use crate::priority::{handout_surplus, schedule_priority, sort_priority};
use crate::state_machine::{force_single_phase, set_state};

/// `is_new_joiner` is true when a new EVSE is joining the group this call.
pub fn calc_balanced_current(ctx: &mut Context, hal: &mut impl Hal, is_new_joiner: bool) {
    // ---- Phase 1: ChargeCurrent baseline ----
    ctx.charge_current =
        if ctx.balanced_state[0] == CpState::C && ctx.max_current > ctx.max_capacity && ctx.config == crate::context::Config::Socket {
            ctx.max_capacity * 10
        } else {
            ctx.max_current * 10
        };

    if ctx.ocpp_mode && ctx.load_bl == 0 && ctx.ocpp_current_limit >= 0.0 {
        if ctx.ocpp_current_limit < ctx.min_current as f32 {
            ctx.charge_current = 0;
        } else {
            let ocpp_limit = (10.0 * ctx.ocpp_current_limit) as u16;
            if ocpp_limit < ctx.charge_current {
                ctx.charge_current = ocpp_limit;
            }
        }
    }

    if ctx.override_current > 0 {
        ctx.charge_current = ctx.override_current;
    }

    ctx.balanced_max[0] = ctx.charge_current;

    // ---- Phase 2: Tallies ----
    let mut active: i32 = 0;
    let mut active_max: i32 = 0;
    let mut total_current: i32 = 0;
    for n in 0..NR_EVSES {
        if ctx.balanced_state[n] == CpState::C {
            active += 1;
            active_max += ctx.balanced_max[n] as i32;
            total_current += ctx.balanced[n] as i32;
        }
    }

    let mut baseload_ev = ctx.ev_meter_imeasured - total_current;
    if baseload_ev < 0 {
        baseload_ev = 0;
    }
    let baseload = ctx.mains_meter_imeasured - total_current;

    let save_active = active;

    // ---- Phase 3: IsetBalanced regulation ----
    ctx.limited_by_max_sum_mains = false;
    let mut isum_import: i32 = 0;

    if ctx.mode == Mode::Normal {
        ctx.iset_balanced = if ctx.load_bl == 1 {
            (ctx.max_circuit as i32) * 10 - baseload_ev
        } else {
            ctx.charge_current as i32
        };

        if ctx.nr_of_phases_charging != 3 {
            ctx.switching_phases_c2 = SwitchingPhases::GoingTo3P;
        }
    } else {
        if ctx.mode == Mode::Solar && ctx.state == CpState::B && ctx.enable_c2 == crate::context::EnableC2::Auto {
            if -ctx.isum >= 30 * (ctx.min_current as i32) + 30 {
                if ctx.nr_of_phases_charging != 3 {
                    ctx.switching_phases_c2 = SwitchingPhases::GoingTo3P;
                }
            } else if ctx.nr_of_phases_charging != 1 {
                ctx.switching_phases_c2 = SwitchingPhases::GoingTo1P;
            }
        }

        let mut idifference = if ctx.load_bl == 0 && ctx.ev_meter_type || ctx.load_bl == 1 && ctx.ev_meter_type
        {
            ((ctx.max_mains as i32) * 10 - ctx.mains_meter_imeasured)
                .min((ctx.max_circuit as i32) * 10 - ctx.ev_meter_imeasured)
        } else {
            (ctx.max_mains as i32) * 10 - ctx.mains_meter_imeasured
        };

        if ctx.max_sum_mains > 0 {
            let excess_max_sum_mains = (ctx.max_sum_mains as i32) * 10 - ctx.isum;
            idifference = excess_max_sum_mains;
            if excess_max_sum_mains < 0 {
                ctx.limited_by_max_sum_mains = true;
            } else {
                ctx.limited_by_max_sum_mains = false;
                ctx.max_sum_mains_timer = 0;
            }
        }

        if !is_new_joiner {
            if ctx.phases_last_update_flag {
                if idifference > 0 {
                    if ctx.mode == Mode::Smart {
                        ctx.iset_balanced += idifference / 4;
                    }
                } else {
                    ctx.iset_balanced += idifference;
                }
            }
            ctx.iset_balanced = ctx.iset_balanced.clamp(0, 800);
        }

        if ctx.mode == Mode::Solar {
            isum_import = ctx.isum - 10 * (ctx.import_current as i32);
            if active > 0 && idifference > 0 && ctx.phases_last_update_flag {
                if isum_import < 0 {
                    if isum_import < -10 && idifference > 10 {
                        ctx.iset_balanced += 5;
                    } else {
                        ctx.iset_balanced += 1;
                    }
                } else if isum_import > 0 {
                    if isum_import > 20 {
                        ctx.iset_balanced -= isum_import / 2;
                    } else if isum_import > 10 {
                        ctx.iset_balanced -= 5;
                    } else if isum_import > 3 {
                        ctx.iset_balanced -= 1;
                    }
                }
            }
        } else if is_new_joiner && active > 0 {
            ctx.iset_balanced = ((ctx.max_mains as i32) * 10 - baseload).min((ctx.max_circuit as i32) * 10 - baseload_ev);
            if ctx.max_sum_mains > 0 {
                ctx.iset_balanced = ctx
                    .iset_balanced
                    .min(((ctx.max_sum_mains as i32) * 10 - ctx.isum) / 3);
            }
        }
    }

    // ---- Phase 4: Guard rails ----
    if ctx.mains_meter_type && ctx.mode != Mode::Normal {
        ctx.iset_balanced = ctx.iset_balanced.min((ctx.max_mains as i32) * 10 - baseload);
    }
    let standalone_ev_non_normal = ctx.load_bl == 0 && ctx.ev_meter_type && ctx.mode != Mode::Normal;
    if standalone_ev_non_normal || ctx.load_bl == 1 {
        ctx.iset_balanced = ctx
            .iset_balanced
            .min((ctx.max_circuit as i32) * 10 - baseload_ev);
    }
    if ctx.grid_relay_open {
        let phases: i32 = if force_single_phase(ctx) { 1 } else { 3 };
        ctx.iset_balanced = ctx
            .iset_balanced
            .min((ctx.grid_relay_max_sum_mains as i32) * 10 / phases);
    }

    // ---- Phase 5: Shortage or distribution ----
    if active > 0 && (ctx.phases_last_update_flag || ctx.mode == Mode::Normal) {
        if ctx.iset_balanced < active * (ctx.min_current as i32) * 10 {
            shortage(ctx, hal, active, isum_import);
        } else {
            no_shortage(ctx, hal, active);
        }

        if !ctx.priority_scheduled_this_call {
            distribute(ctx, active, active_max);
        }
        ctx.priority_scheduled_this_call = false;
    }

    if save_active == 0 {
        ctx.solar_stop_timer = 0;
        ctx.max_sum_mains_timer = 0;
        ctx.no_current = 0;
    }

    ctx.phases_last_update_flag = false;
}

fn shortage(ctx: &mut Context, hal: &mut impl Hal, active: i32, isum_import: i32) {
    let mut actual_available = ctx.iset_balanced;
    if actual_available < 0 {
        actual_available = 0;
    }

    ctx.iset_balanced = active * (ctx.min_current as i32) * 10;

    if ctx.mode == Mode::Solar {
        let shortage_export_condition = ctx.isum
            > (active * (ctx.min_current as i32) * (ctx.nr_of_phases_charging as i32)
                - (ctx.start_current as i32))
                * 10
            || (ctx.nr_of_phases_charging > 1 && ctx.enable_c2 == crate::context::EnableC2::Auto);

        if active > 0 && isum_import > 0 && shortage_export_condition {
            if ctx.nr_of_phases_charging > 1
                && ctx.enable_c2 == crate::context::EnableC2::Auto
                && ctx.state == CpState::C
            {
                if ctx.solar_stop_timer == 0 {
                    if isum_import < 10 * (ctx.min_current as i32) {
                        ctx.solar_stop_timer = ctx.stop_time * 60;
                    }
                    if ctx.solar_stop_timer == 0 {
                        ctx.solar_stop_timer = 30;
                    }
                }
                if ctx.solar_stop_timer <= 2 {
                    ctx.switching_phases_c2 = SwitchingPhases::GoingTo1P;
                    set_state(ctx, hal, CpState::C1);
                    ctx.solar_stop_timer = 0;
                }
            } else if ctx.solar_stop_timer == 0 {
                ctx.solar_stop_timer = ctx.stop_time * 60;
            }
        } else {
            ctx.solar_stop_timer = 0;
        }
    }

    let mut hard_shortage = false;
    if ctx.mains_meter_type && ctx.mode != Mode::Normal && ctx.iset_balanced > (ctx.max_mains as i32) * 10 - (ctx.mains_meter_imeasured - total_balanced(ctx)) {
        hard_shortage = true;
    }
    let baseload_ev = (ctx.ev_meter_imeasured - total_balanced(ctx)).max(0);
    let standalone_ev_non_normal = ctx.load_bl == 0 && ctx.ev_meter_type && ctx.mode != Mode::Normal;
    if (standalone_ev_non_normal || ctx.load_bl == 1)
        && ctx.iset_balanced > (ctx.max_circuit as i32) * 10 - baseload_ev
    {
        hard_shortage = true;
    }
    if ctx.max_sum_mains_time == 0 && ctx.limited_by_max_sum_mains {
        hard_shortage = true;
    }

    if ctx.load_bl == 1 && active > 1 {
        ctx.priority_scheduled_this_call = true;
        sort_priority(ctx);
        let surplus = schedule_priority(ctx, actual_available);
        handout_surplus(ctx, surplus);

        let any_active = (0..NR_EVSES).any(|i| ctx.schedule_state[i] == ScheduleState::Active);
        if !any_active {
            ctx.no_current += 1;
        }
    } else if hard_shortage && ctx.switching_phases_c2 != SwitchingPhases::GoingTo1P {
        ctx.no_current += 1;
    } else if ctx.limited_by_max_sum_mains && ctx.max_sum_mains_time > 0 && ctx.max_sum_mains_timer == 0 {
        ctx.max_sum_mains_timer = ctx.max_sum_mains_time as u16 * 60;
    }
}

fn no_shortage(ctx: &mut Context, hal: &mut impl Hal, active: i32) {
    if ctx.load_bl == 1 {
        for n in 0..NR_EVSES {
            if ctx.balanced_state[n] == CpState::C {
                ctx.schedule_state[n] = ScheduleState::Active;
                ctx.balanced_error[n].remove(ErrorFlags::LESS_6A | ErrorFlags::NO_SUN);
                ctx.idle_timer[n] = 0;
            }
        }
    }

    if ctx.mode == Mode::Solar
        && ctx.nr_of_phases_charging == 1
        && ctx.enable_c2 == crate::context::EnableC2::Auto
        && ctx.iset_balanced + 8 >= (ctx.max_current as i32) * 10
        && ctx.state == CpState::C
    {
        let mut spare_current = 3 * (ctx.min_current as i32 + 1) - ctx.max_current as i32;
        if spare_current < 0 {
            spare_current = 3;
        }
        if -ctx.isum > 10 * spare_current {
            if ctx.solar_stop_timer == 0 {
                ctx.solar_stop_timer = 63;
            }
            if ctx.solar_stop_timer <= 3 {
                ctx.switching_phases_c2 = SwitchingPhases::GoingTo3P;
                set_state(ctx, hal, CpState::C1);
                ctx.solar_stop_timer = 0;
            }
        } else {
            ctx.solar_stop_timer = 0;
        }
    } else {
        ctx.solar_stop_timer = 0;
        ctx.max_sum_mains_timer = 0;
        ctx.no_current = 0;
    }

    let _ = active;
}

fn total_balanced(ctx: &Context) -> i32 {
    (0..NR_EVSES)
        .filter(|&n| ctx.balanced_state[n] == CpState::C)
        .map(|n| ctx.balanced[n] as i32)
        .sum()
}

fn distribute(ctx: &mut Context, mut active: i32, active_max: i32) {
    if ctx.iset_balanced > active_max {
        ctx.iset_balanced = active_max;
    }
    let mut max_balanced = ctx.iset_balanced;
    let total_current = total_balanced(ctx);

    let mut current_set = [false; NR_EVSES];

    // First pass: cap EVSEs at their max, or at MinCurrent during solar startup.
    let mut n = 0;
    while n < NR_EVSES && active > 0 {
        let average = if active > 0 { max_balanced / active } else { 0 };
        if ctx.balanced_state[n] == CpState::C && !current_set[n] {
            if ctx.mode == Mode::Solar && (ctx.nodes[n].int_timer as u32) < SOLAR_START_TIME {
                ctx.balanced[n] = ctx.min_current * 10;
                current_set[n] = true;
                active -= 1;
                max_balanced -= ctx.balanced[n] as i32;
                ctx.iset_balanced = total_current;
                n = 0;
                continue;
            } else if average >= ctx.balanced_max[n] as i32 {
                ctx.balanced[n] = ctx.balanced_max[n];
                current_set[n] = true;
                active -= 1;
                max_balanced -= ctx.balanced[n] as i32;
                n = 0;
                continue;
            }
        }
        n += 1;
    }

    // Second pass: spread the remainder equally across still-uncapped EVSEs.
    let mut n = 0;
    while n < NR_EVSES && active > 0 {
        if ctx.balanced_state[n] == CpState::C && !current_set[n] {
            ctx.balanced[n] = (max_balanced / active) as u16;
            current_set[n] = true;
            active -= 1;
            max_balanced -= ctx.balanced[n] as i32;
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::hal::NullHal;

    #[test]
    fn u2_u3_balanced_bounds_hold() {
        let mut ctx = Context::default();
        ctx.load_bl = 1;
        for i in 0..3 {
            ctx.balanced_state[i] = CpState::C;
            ctx.balanced_max[i] = 320;
        }
        ctx.min_current = 6;
        ctx.max_current = 32;
        ctx.max_circuit = 12;
        let mut hal = NullHal;
        calc_balanced_current(&mut ctx, &mut hal, false);
        for i in 0..NR_EVSES {
            assert!(ctx.balanced[i] <= ctx.balanced_max[i]);
        }
        assert!(ctx.iset_balanced <= 800);
    }

    #[test]
    fn s4_priority_shortage_pauses_lowest_priority() {
        let mut ctx = Context::default();
        ctx.load_bl = 1;
        ctx.mode = Mode::Normal;
        for i in 0..3 {
            ctx.balanced_state[i] = CpState::C;
            ctx.balanced_max[i] = 320;
        }
        ctx.min_current = 6;
        ctx.max_current = 32;
        ctx.max_circuit = 12;
        ctx.ev_meter_imeasured = 0;

        let mut hal = NullHal;
        calc_balanced_current(&mut ctx, &mut hal, false);

        assert!(ctx.balanced[0] >= 60);
        assert!(ctx.balanced[1] >= 60);
        assert_eq!(ctx.balanced[2], 0);
        assert_eq!(ctx.schedule_state[0], ScheduleState::Active);
        assert_eq!(ctx.schedule_state[1], ScheduleState::Active);
        assert_eq!(ctx.schedule_state[2], ScheduleState::Paused);
        assert_eq!(ctx.no_current, 0);
    }
}
