//! End-to-end scenarios: each drives the public entry points the
//! way a host integration would, asserting on externally observable state
//! (`Context` fields and `RecordingHal` effects) rather than internals.

use evse_core::{
    init, set_access, set_state, tick_10ms, tick_1s, AccessStatus, Context, CpState, EnableC2,
    ErrorFlags, Mode, Pilot, RecordingHal, RfidReader,
};

fn booted() -> (Context, RecordingHal) {
    let mut ctx = Context::default();
    let mut hal = RecordingHal::default();
    init(&mut ctx, &mut hal);
    (ctx, hal)
}

#[test]
fn s1_full_normal_charge_cycle_standalone() {
    let (mut ctx, mut hal) = booted();
    ctx.mode = Mode::Normal;
    ctx.load_bl = 0;
    ctx.access_status = AccessStatus::On;
    ctx.modem_stage = 1;
    ctx.max_current = 13;
    ctx.max_capacity = 13;
    ctx.min_current = 6;
    ctx.max_circuit = 32;
    ctx.max_mains = 25;

    tick_10ms(&mut ctx, &mut hal, Pilot::P9V);
    assert_eq!(ctx.state, CpState::B);
    assert!(!hal.contactor1_state);

    ctx.diode_check = 1;
    ctx.charge_current = 130;
    for _ in 0..55 {
        tick_10ms(&mut ctx, &mut hal, Pilot::P6V);
    }
    assert_eq!(ctx.state, CpState::C);
    assert!(hal.contactor1_state);
    assert!(hal.contactor2_state);

    tick_10ms(&mut ctx, &mut hal, Pilot::P9V);
    assert_eq!(ctx.state, CpState::B);
    assert_eq!(ctx.diode_check, 0);

    tick_10ms(&mut ctx, &mut hal, Pilot::P12V);
    assert_eq!(ctx.state, CpState::A);
    assert!(!hal.contactor1_state);
}

#[test]
fn s2_less_6a_gates_a_to_b_into_b1() {
    let (mut ctx, mut hal) = booted();
    ctx.mode = Mode::Smart;
    ctx.load_bl = 0;
    ctx.access_status = AccessStatus::On;
    ctx.modem_stage = 1;
    ctx.max_current = 13;
    ctx.max_capacity = 13;
    ctx.min_current = 6;
    ctx.max_circuit = 32;
    ctx.max_mains = 5;
    ctx.mains_meter_imeasured = 200;
    // Pre-existing LESS_6A (raised by an earlier unavailable-current tick)
    // routes this tick straight into the B1 fallback branch instead of
    // attempting the A->B transition.
    ctx.error_flags.insert(ErrorFlags::LESS_6A);

    tick_10ms(&mut ctx, &mut hal, Pilot::P9V);
    assert_eq!(ctx.state, CpState::B1);
    assert_eq!(hal.last_pwm_duty, 1024);
}

#[test]
fn s3_modem_success_then_denied() {
    let (mut ctx, mut hal) = booted();
    ctx.access_status = AccessStatus::On;
    ctx.modem_enabled = true;
    ctx.modem_stage = 0;
    ctx.required_evccid = "EVCC-ALLOW".into();
    ctx.evccid = "EVCC-ALLOW".into();

    tick_10ms(&mut ctx, &mut hal, Pilot::P9V);
    assert_eq!(ctx.state, CpState::ModemRequest);
    assert_eq!(hal.last_pwm_duty, 1024);
    assert!(!hal.pilot_connected);

    tick_1s(&mut ctx, &mut hal);
    assert_eq!(ctx.state, CpState::ModemWait);
    assert_eq!(hal.last_pwm_duty, 51);
    assert!(hal.pilot_connected);

    for _ in 0..61 {
        tick_1s(&mut ctx, &mut hal);
    }
    assert_eq!(ctx.state, CpState::ModemDone);

    for _ in 0..6 {
        tick_1s(&mut ctx, &mut hal);
    }
    assert_eq!(ctx.state, CpState::B);
    assert_eq!(ctx.modem_stage, 1);

    ctx.evccid = "EVCC-OTHER".into();
    set_state(&mut ctx, &mut hal, CpState::ModemDone);
    ctx.leave_modem_done_state_timer = 0;
    tick_1s(&mut ctx, &mut hal);
    assert_eq!(ctx.state, CpState::ModemDenied);
    assert_eq!(ctx.leave_modem_denied_state_timer, 59);

    for _ in 0..60 {
        tick_1s(&mut ctx, &mut hal);
    }
    assert_eq!(ctx.state, CpState::A);
}

#[test]
fn s4_priority_shortage_with_three_evses() {
    let (mut ctx, mut hal) = booted();
    ctx.load_bl = 1;
    for i in 0..3 {
        ctx.balanced_state[i] = CpState::C;
        ctx.balanced_max[i] = 320;
    }
    ctx.min_current = 6;
    ctx.max_current = 32;
    ctx.max_circuit = 12;
    ctx.ev_meter_imeasured = 0;

    evse_core::calc_balanced_current(&mut ctx, &mut hal, false);

    assert!(ctx.balanced[0] >= 60);
    assert!(ctx.balanced[1] >= 60);
    assert_eq!(ctx.balanced[2], 0);
    assert_eq!(ctx.schedule_state[0], evse_core::ScheduleState::Active);
    assert_eq!(ctx.schedule_state[1], evse_core::ScheduleState::Active);
    assert_eq!(ctx.schedule_state[2], evse_core::ScheduleState::Paused);
    assert_eq!(ctx.no_current, 0);
}

#[test]
fn s5_solar_3p_to_1p_then_1p_to_3p() {
    let (mut ctx, mut hal) = booted();
    ctx.load_bl = 1;
    ctx.mode = Mode::Solar;
    ctx.enable_c2 = EnableC2::Auto;
    ctx.balanced_state[0] = CpState::C;
    ctx.state = CpState::C;
    ctx.nr_of_phases_charging = 3;
    ctx.start_current = 4;
    ctx.stop_time = 10;
    ctx.max_current = 16;
    ctx.nodes[0].int_timer = 41;

    ctx.mains_meter_imeasured = 300;
    ctx.isum = 200;
    ctx.solar_stop_timer = 2;
    ctx.iset_balanced = 60;
    // Every real call is preceded by a fresh Irms sample; the host sets
    // this ahead of each call, never the allocator itself.
    ctx.phases_last_update_flag = true;
    evse_core::calc_balanced_current(&mut ctx, &mut hal, false);
    assert_eq!(ctx.switching_phases_c2, evse_core::SwitchingPhases::GoingTo1P);

    set_state(&mut ctx, &mut hal, CpState::C);
    assert_eq!(ctx.nr_of_phases_charging, 1);
    assert_eq!(ctx.switching_phases_c2, evse_core::SwitchingPhases::NoSwitch);

    ctx.mains_meter_imeasured = -100;
    ctx.isum = -200;
    ctx.iset_balanced = 155;
    ctx.solar_stop_timer = 3;
    ctx.phases_last_update_flag = true;
    evse_core::calc_balanced_current(&mut ctx, &mut hal, false);
    assert_eq!(ctx.switching_phases_c2, evse_core::SwitchingPhases::GoingTo3P);

    set_state(&mut ctx, &mut hal, CpState::C);
    assert_eq!(ctx.nr_of_phases_charging, 3);
    assert_eq!(ctx.switching_phases_c2, evse_core::SwitchingPhases::NoSwitch);
}

#[test]
fn s6_rfid_access_timer() {
    let (mut ctx, mut hal) = booted();
    ctx.access_status = AccessStatus::On;
    ctx.rfid_reader = RfidReader::EnableOne;
    ctx.access_timer = 0;

    tick_10ms(&mut ctx, &mut hal, Pilot::P12V);
    assert_eq!(ctx.access_timer, 60);

    for _ in 0..60 {
        ctx.state = CpState::A;
        tick_1s(&mut ctx, &mut hal);
    }
    assert_eq!(ctx.access_timer, 0);
    assert_eq!(ctx.access_status, AccessStatus::Off);
}

#[test]
fn r1_repeated_set_state_same_is_idempotent_besides_callback_log() {
    let (mut ctx, mut hal) = booted();
    set_state(&mut ctx, &mut hal, CpState::B);
    let snapshot_state = ctx.state;
    let snapshot_phases = ctx.nr_of_phases_charging;
    set_state(&mut ctx, &mut hal, CpState::B);
    assert_eq!(ctx.state, snapshot_state);
    assert_eq!(ctx.nr_of_phases_charging, snapshot_phases);
    assert_eq!(hal.transition_log, vec![CpState::B]);
}

#[test]
fn r2_entering_then_leaving_b_restores_charge_delay() {
    let (mut ctx, mut hal) = booted();
    ctx.charge_delay = 5;
    ctx.error_flags.insert(evse_core::ErrorFlags::LESS_6A);
    set_state(&mut ctx, &mut hal, CpState::B);
    set_state(&mut ctx, &mut hal, CpState::A);
    assert_eq!(ctx.charge_delay, 0);
    assert!(!ctx.error_flags.contains(evse_core::ErrorFlags::LESS_6A));
}

#[test]
fn u6_dropping_access_while_charging_forces_c1_not_c() {
    let (mut ctx, mut hal) = booted();
    ctx.balanced_state[0] = CpState::C;
    ctx.state = CpState::C;
    ctx.access_status = AccessStatus::On;
    set_access(&mut ctx, &mut hal, AccessStatus::Off);
    assert_eq!(ctx.state, CpState::C1);
}
