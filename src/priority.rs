//! Priority Scheduler: sort order, idle-detection, rotation,
//! and surplus redistribution across up to [`NR_EVSES`] EVSEs sharing one
//! circuit.

use crate::context::{Context, CpState, PrioStrategy, ScheduleState, IDLE_CURRENT_THRESHOLD, NR_EVSES};

/// Recompute `ctx.priority` as a permutation of EVSE indices: active
/// (`STATE_C`) EVSEs precede inactive ones; within each group, ties are
/// broken by `prio_strategy`.
pub fn sort_priority(ctx: &mut Context) {
    for (i, p) in ctx.priority.iter_mut().enumerate() {
        *p = i as u8;
    }

    // Stable in-place insertion sort; ties keep their prior relative order.
    for i in 1..NR_EVSES {
        let key = ctx.priority[i];
        let mut j = i as isize - 1;
        while j >= 0 {
            let pj = ctx.priority[j as usize];
            let key_active = ctx.balanced_state[key as usize] == CpState::C;
            let pj_active = ctx.balanced_state[pj as usize] == CpState::C;

            let swap = if key_active && !pj_active {
                true
            } else if key_active == pj_active {
                match ctx.prio_strategy {
                    PrioStrategy::FirstConnected => {
                        let key_t = ctx.connected_time[key as usize];
                        let pj_t = ctx.connected_time[pj as usize];
                        (key_t != 0 && pj_t == 0) || (key_t != 0 && pj_t != 0 && key_t < pj_t)
                    }
                    PrioStrategy::LastConnected => {
                        ctx.connected_time[key as usize] > ctx.connected_time[pj as usize]
                    }
                    PrioStrategy::ModbusAddr => key < pj,
                }
            } else {
                false
            };

            if swap {
                ctx.priority[(j + 1) as usize] = ctx.priority[j as usize];
                j -= 1;
            } else {
                break;
            }
        }
        ctx.priority[(j + 1) as usize] = key;
    }
}

/// Allocate `min_current` to EVSEs in priority order until `available`
/// runs out. Returns the surplus above all `MinCurrent` allocations (or 0).
pub(crate) fn schedule_priority(ctx: &mut Context, mut available: i32) -> i32 {
    let min_each = ctx.min_current as i32 * 10;

    for i in 0..NR_EVSES {
        let idx = ctx.priority[i] as usize;
        if ctx.balanced_state[idx] != CpState::C {
            continue;
        }

        if available >= min_each {
            ctx.balanced[idx] = min_each as u16;
            ctx.schedule_state[idx] = ScheduleState::Active;
            ctx.balanced_error[idx]
                .remove(crate::errors::ErrorFlags::LESS_6A | crate::errors::ErrorFlags::NO_SUN);
            available -= min_each;
        } else {
            ctx.balanced[idx] = 0;
            ctx.schedule_state[idx] = ScheduleState::Paused;
            if ctx.mode == crate::context::Mode::Solar {
                ctx.balanced_error[idx].insert(crate::errors::ErrorFlags::NO_SUN);
            } else {
                ctx.balanced_error[idx].insert(crate::errors::ErrorFlags::LESS_6A);
            }
        }
    }

    available
}

/// Distribute surplus above `MinCurrent` fairly among active EVSEs,
/// respecting each one's `balanced_max`.
pub(crate) fn handout_surplus(ctx: &mut Context, mut surplus: i32) {
    if surplus <= 0 {
        return;
    }

    let mut capped = [false; NR_EVSES];
    let mut progress = true;

    while surplus > 0 && progress {
        progress = false;
        let uncapped = (0..NR_EVSES)
            .filter(|&i| ctx.schedule_state[i] == ScheduleState::Active && !capped[i])
            .count();
        if uncapped == 0 {
            break;
        }

        let mut share = surplus / uncapped as i32;
        if share == 0 {
            share = 1;
        }
        let mut distributed = 0;

        for i in 0..NR_EVSES {
            if ctx.schedule_state[i] != ScheduleState::Active || capped[i] {
                continue;
            }

            let can_add = ctx.balanced_max[i] as i32 - ctx.balanced[i] as i32;
            if can_add <= 0 {
                capped[i] = true;
                progress = true;
                continue;
            }

            let mut add = share.min(can_add);
            if add > surplus - distributed {
                add = surplus - distributed;
            }
            if add <= 0 {
                continue;
            }

            ctx.balanced[i] += add as u16;
            distributed += add;
            progress = true;

            if ctx.balanced[i] >= ctx.balanced_max[i] {
                capped[i] = true;
            }
        }
        surplus -= distributed;
    }
}

/// 1 s housekeeping for the master. No-op unless `load_bl == 1`.
pub fn schedule_tick_1s(ctx: &mut Context) {
    if ctx.load_bl != 1 {
        return;
    }

    ctx.uptime += 1;

    for i in 0..NR_EVSES {
        if ctx.balanced_state[i] == CpState::C && ctx.connected_time[i] == 0 {
            ctx.connected_time[i] = ctx.uptime;
        } else if ctx.balanced_state[i] != CpState::C {
            ctx.connected_time[i] = 0;
            if ctx.schedule_state[i] != ScheduleState::Inactive {
                ctx.schedule_state[i] = ScheduleState::Inactive;
            }
        }
    }

    let mut active_idx: Option<usize> = None;
    let mut paused_count = 0;
    for i in 0..NR_EVSES {
        if ctx.schedule_state[i] == ScheduleState::Active {
            active_idx = Some(i);
        }
        if ctx.schedule_state[i] == ScheduleState::Paused {
            paused_count += 1;
        }
    }

    let Some(_) = active_idx else {
        return;
    };
    if paused_count == 0 {
        return;
    }

    for i in 0..NR_EVSES {
        if ctx.schedule_state[i] == ScheduleState::Active {
            ctx.idle_timer[i] += 1;
        }
    }

    let mut rotated = false;
    'idle_scan: for i in 0..NR_EVSES {
        if ctx.schedule_state[i] != ScheduleState::Active {
            continue;
        }
        if (ctx.idle_timer[i] as u32) < ctx.idle_timeout as u32 {
            continue;
        }

        if ctx.balanced[i] > 0 && ctx.ev_meter_imeasured >= IDLE_CURRENT_THRESHOLD {
            if ctx.rotation_interval > 0 && ctx.rotation_timer == 0 {
                ctx.rotation_timer = ctx.rotation_interval * 60;
            }
        } else {
            ctx.schedule_state[i] = ScheduleState::Paused;
            ctx.balanced[i] = 0;

            sort_priority(ctx);
            for p in 0..NR_EVSES {
                let next = ctx.priority[p] as usize;
                if next == i {
                    continue;
                }
                if ctx.balanced_state[next] != CpState::C {
                    continue;
                }
                if ctx.schedule_state[next] == ScheduleState::Paused {
                    ctx.schedule_state[next] = ScheduleState::Active;
                    ctx.idle_timer[next] = 0;
                    ctx.rotation_timer = if ctx.rotation_interval > 0 {
                        ctx.rotation_interval * 60
                    } else {
                        0
                    };
                    rotated = true;
                    break;
                }
            }
            if !rotated {
                for p in 0..NR_EVSES {
                    let next = ctx.priority[p] as usize;
                    if ctx.balanced_state[next] == CpState::C
                        && ctx.schedule_state[next] == ScheduleState::Paused
                    {
                        ctx.schedule_state[next] = ScheduleState::Active;
                        ctx.idle_timer[next] = 0;
                        ctx.rotation_timer = if ctx.rotation_interval > 0 {
                            ctx.rotation_interval * 60
                        } else {
                            0
                        };
                        rotated = true;
                        break;
                    }
                }
            }
            break 'idle_scan;
        }
    }

    if !rotated && ctx.rotation_interval > 0 && ctx.rotation_timer > 0 {
        ctx.rotation_timer -= 1;
        if ctx.rotation_timer == 0 {
            sort_priority(ctx);
            for i in 0..NR_EVSES {
                if ctx.schedule_state[i] != ScheduleState::Active {
                    continue;
                }

                ctx.schedule_state[i] = ScheduleState::Paused;
                ctx.balanced[i] = 0;

                let mut found = false;
                let mut past_current = false;
                for p in 0..NR_EVSES {
                    let next = ctx.priority[p] as usize;
                    if next == i {
                        past_current = true;
                        continue;
                    }
                    if !past_current {
                        continue;
                    }
                    if ctx.balanced_state[next] == CpState::C
                        && ctx.schedule_state[next] == ScheduleState::Paused
                    {
                        ctx.schedule_state[next] = ScheduleState::Active;
                        ctx.idle_timer[next] = 0;
                        ctx.rotation_timer = ctx.rotation_interval * 60;
                        found = true;
                        break;
                    }
                }
                if !found {
                    for p in 0..NR_EVSES {
                        let next = ctx.priority[p] as usize;
                        if ctx.balanced_state[next] == CpState::C
                            && ctx.schedule_state[next] == ScheduleState::Paused
                        {
                            ctx.schedule_state[next] = ScheduleState::Active;
                            ctx.idle_timer[next] = 0;
                            ctx.rotation_timer = ctx.rotation_interval * 60;
                            break;
                        }
                    }
                }
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;

    #[test]
    fn round_trip_r3_identity_sort_is_noop() {
        let mut ctx = Context::default();
        sort_priority(&mut ctx);
        let expected: Vec<u8> = (0..NR_EVSES as u8).collect();
        assert_eq!(ctx.priority.to_vec(), expected);
    }

    #[test]
    fn active_evses_sort_before_inactive() {
        let mut ctx = Context::default();
        ctx.balanced_state[3] = CpState::C;
        sort_priority(&mut ctx);
        assert_eq!(ctx.priority[0], 3);
    }

    #[test]
    fn standalone_schedule_tick_is_noop_u9() {
        let mut ctx = Context::default();
        ctx.load_bl = 0;
        ctx.balanced_state[0] = CpState::C;
        ctx.connected_time[0] = 42;
        schedule_tick_1s(&mut ctx);
        assert_eq!(ctx.connected_time[0], 42);
        assert_eq!(ctx.uptime, 0);
    }

    #[test]
    fn master_records_connected_time_on_entering_c() {
        let mut ctx = Context::default();
        ctx.load_bl = 1;
        ctx.balanced_state[0] = CpState::C;
        schedule_tick_1s(&mut ctx);
        assert_eq!(ctx.connected_time[0], 1);
    }

    #[test]
    fn u8_disconnected_evses_have_zero_connected_time() {
        let mut ctx = Context::default();
        ctx.load_bl = 1;
        for s in ctx.balanced_state.iter_mut() {
            *s = CpState::A;
        }
        schedule_tick_1s(&mut ctx);
        assert!(ctx.connected_time.iter().all(|&t| t == 0));
    }
}
