//! Current Availability Gate: can one more EVSE start at
//! `MinCurrent` right now?

use crate::context::{Context, CpState, Mode, NR_EVSES};

/// Returns true iff one additional EVSE could start charging at
/// `min_current` given the present moment. Consults mode, mains/circuit
/// limits, `max_sum_mains`, solar surplus and the OCPP cap, in the order
/// spelled out below.
pub fn is_current_available(ctx: &Context) -> bool {
    let mut active: u32 = 0;
    let mut total_current: i32 = 0;
    for n in 0..NR_EVSES {
        if ctx.balanced_state[n] == CpState::C {
            active += 1;
            total_current += ctx.balanced[n] as i32;
        }
    }

    if ctx.mode == Mode::Solar {
        if active == 0 && ctx.isum >= -(ctx.start_current as i32) * 10 {
            return false;
        }
        if (active as i32) * (ctx.min_current as i32) * 10 > total_current {
            return false;
        }
        if active > 0
            && ctx.isum
                > (ctx.import_current as i32) * 10 + total_current
                    - (active as i32) * (ctx.min_current as i32) * 10
        {
            return false;
        }
    }

    let active = (active + 1).min(NR_EVSES as u32) as i32;

    let baseload = ctx.mains_meter_imeasured - total_current;
    let baseload_ev = (ctx.ev_meter_imeasured - total_current).max(0);

    if ctx.mode != Mode::Normal
        && active * (ctx.min_current as i32) * 10 + baseload > (ctx.max_mains as i32) * 10
    {
        return false;
    }

    let standalone_with_ev_meter = ctx.load_bl == 0 && ctx.ev_meter_type && ctx.mode != Mode::Normal;
    if (standalone_with_ev_meter || ctx.load_bl == 1)
        && active * (ctx.min_current as i32) * 10 + baseload_ev > (ctx.max_circuit as i32) * 10
    {
        return false;
    }

    let phases: i32 = if ctx.load_bl == 0 {
        if crate::state_machine::force_single_phase(ctx) {
            1
        } else {
            3
        }
    } else {
        1
    };
    if ctx.mode != Mode::Normal
        && ctx.max_sum_mains > 0
        && phases * active * (ctx.min_current as i32) * 10 + ctx.isum
            > (ctx.max_sum_mains as i32) * 10
    {
        return false;
    }

    if ctx.ocpp_mode
        && ctx.load_bl == 0
        && ctx.ocpp_current_limit >= 0.0
        && ctx.ocpp_current_limit < ctx.min_current as f32
    {
        return false;
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;

    #[test]
    fn fresh_context_has_current_available() {
        let ctx = Context::default();
        assert!(is_current_available(&ctx));
    }

    #[test]
    fn max_mains_too_low_blocks_availability() {
        let mut ctx = Context::default();
        ctx.mode = Mode::Smart;
        ctx.max_mains = 5;
        ctx.mains_meter_imeasured = 200;
        assert!(!is_current_available(&ctx));
    }

    #[test]
    fn solar_no_active_and_no_export_blocks() {
        let mut ctx = Context::default();
        ctx.mode = Mode::Solar;
        ctx.start_current = 4;
        ctx.isum = 0; // not exporting
        assert!(!is_current_available(&ctx));
    }

    #[test]
    fn solar_sufficient_export_allows() {
        let mut ctx = Context::default();
        ctx.mode = Mode::Solar;
        ctx.start_current = 4;
        ctx.isum = -100; // exporting 10A
        assert!(is_current_available(&ctx));
    }

    #[test]
    fn ocpp_limit_below_min_current_blocks() {
        let mut ctx = Context::default();
        ctx.ocpp_mode = true;
        ctx.ocpp_current_limit = 4.0;
        ctx.min_current = 6;
        assert!(!is_current_available(&ctx));
    }
}
