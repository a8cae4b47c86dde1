//! The Data Model: a single aggregate, `Context`, holding every
//! value the engine reads or writes for one EVSE unit.

use crate::errors::ErrorFlags;

/// Number of EVSEs a single load-balancing group can address.
pub const NR_EVSES: usize = 8;

/// Mains meter communication timeout, in seconds.
pub const COMM_TIMEOUT: u8 = 11;
/// EV meter communication timeout, in seconds.
pub const COMM_EV_TIMEOUT: u8 = 64;
/// Charge-delay re-arm duration while `LESS_6A` is set, in seconds.
pub const CHARGE_DELAY: u8 = 60;
/// RFID access-timer duration, in seconds.
pub const RFID_LOCK_TIME: u8 = 60;
/// Solar-startup pin duration after entering STATE_C, in seconds.
pub const SOLAR_START_TIME: u32 = 40;
/// Default grid-relay cap, in amps.
pub const GRID_RELAY_MAX_SUM_MAINS_DEFAULT: u16 = 18;
/// Default enclosure over-temperature trip point, in °C.
pub const MAX_TEMPERATURE_DEFAULT: i16 = 65;
/// Idle-current threshold used by the priority scheduler, 0.1 A units (= 1.0 A).
pub const IDLE_CURRENT_THRESHOLD: i32 = 10;

/// IEC 61851-1 Control Pilot states, plus the engine's internal refinements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CpState {
    #[default]
    A,
    B,
    C,
    D,
    CommB,
    CommBOk,
    CommC,
    CommCOk,
    ActStart,
    B1,
    C1,
    ModemRequest,
    ModemWait,
    ModemDone,
    ModemDenied,
}

/// Pilot voltage classes sampled by the host and fed to `tick_10ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pilot {
    P12V,
    P9V,
    P6V,
    P3V,
    PDiode,
    PShort,
    PNotOk,
}

/// Regulation strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Normal,
    Smart,
    Solar,
}

/// Cable/socket configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Config {
    #[default]
    Socket,
    FixedCable,
}

/// Authorization status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessStatus {
    #[default]
    Off,
    On,
    Pause,
}

/// RFID reader mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RfidReader {
    #[default]
    Disabled,
    EnableAll,
    EnableOne,
    Learn,
    Delete,
    DeleteAll,
    Remote,
}

/// Priority-sort strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrioStrategy {
    #[default]
    ModbusAddr,
    FirstConnected,
    LastConnected,
}

/// Per-EVSE scheduling state under priority rationing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScheduleState {
    #[default]
    Inactive,
    Active,
    Paused,
}

/// Policy governing whether contactor 2 (phase 2/3) may be engaged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnableC2 {
    #[default]
    NotPresent,
    AlwaysOff,
    SolarOff,
    AlwaysOn,
    Auto,
}

/// Deferred phase-switch decision, consumed only on STATE_C entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SwitchingPhases {
    #[default]
    NoSwitch,
    GoingTo1P,
    GoingTo3P,
}

/// Per-EVSE bookkeeping the master keeps about every node.
#[derive(Debug, Clone, Copy, Default)]
pub struct Node {
    pub online: bool,
    pub config_changed: bool,
    pub ev_meter: bool,
    pub ev_address: u8,
    pub min_current: u8,
    pub phases: u8,
    /// Seconds spent in STATE_C, cumulative (does not reset on pause).
    pub timer: u32,
    /// Seconds since entering STATE_C this session; reset on leaving C.
    pub int_timer: u32,
    pub solar_timer: u16,
    pub mode: Mode,
}

/// The EVSE Context: one aggregate per EVSE unit.
///
/// All mutation happens inside the public entry points in [`crate`]; the
/// HAL never mutates the `Context` back.
#[derive(Clone)]
pub struct Context {
    // --- Core ---
    pub state: CpState,
    pub mode: Mode,
    /// 0 = standalone, 1 = master, 2..=8 = node index.
    pub load_bl: u8,
    pub config: Config,

    // --- Authorization ---
    pub access_status: AccessStatus,
    pub rfid_reader: RfidReader,
    pub ocpp_mode: bool,
    /// Amps; negative means "no OCPP limit in effect".
    pub ocpp_current_limit: f32,
    pub cp_duty_override: bool,

    // --- Limits ---
    pub max_mains: u16,
    pub max_current: u16,
    pub min_current: u16,
    pub max_circuit: u16,
    pub max_capacity: u16,
    pub max_sum_mains: u16,
    pub max_sum_mains_time: u8,
    pub grid_relay_max_sum_mains: u16,
    pub grid_relay_open: bool,

    // --- Distribution (0.1 A units unless noted) ---
    pub balanced: [u16; NR_EVSES],
    pub balanced_max: [u16; NR_EVSES],
    pub balanced_state: [CpState; NR_EVSES],
    pub balanced_error: [ErrorFlags; NR_EVSES],
    pub charge_current: u16,
    pub iset_balanced: i32,
    pub override_current: u16,

    // --- Priority ---
    pub prio_strategy: PrioStrategy,
    /// 0 disables rotation; 30..=1440 minutes otherwise.
    pub rotation_interval: u16,
    /// 30..=300 seconds.
    pub idle_timeout: u16,
    pub priority: [u8; NR_EVSES],
    pub connected_time: [u32; NR_EVSES],
    pub idle_timer: [u16; NR_EVSES],
    pub rotation_timer: u16,
    pub schedule_state: [ScheduleState; NR_EVSES],
    pub uptime: u32,

    // --- Meters ---
    pub isum: i32,
    pub mains_meter_irms: [i16; 3],
    pub mains_meter_imeasured: i32,
    pub ev_meter_irms: [i16; 3],
    pub ev_meter_imeasured: i32,
    pub mains_meter_type: bool,
    pub ev_meter_type: bool,
    pub mains_meter_timeout: u8,
    pub ev_meter_timeout: u8,

    // --- Errors ---
    pub error_flags: ErrorFlags,
    pub charge_delay: u8,
    pub no_current: u32,

    // --- Timers ---
    pub solar_stop_timer: u16,
    pub max_sum_mains_timer: u16,
    pub state_timer: u8,
    pub access_timer: u8,
    pub c1_timer: u8,
    pub activation_mode: u8,
    pub activation_timer: u8,

    // --- Phase switching ---
    pub enable_c2: EnableC2,
    pub nr_of_phases_charging: u8,
    pub switching_phases_c2: SwitchingPhases,
    pub phases_last_update_flag: bool,
    pub limited_by_max_sum_mains: bool,
    /// Set by `shortage()` when it has already called into the priority
    /// scheduler this tick, so `calc_balanced_current` skips its own
    /// equal-share distribution pass.
    pub priority_scheduled_this_call: bool,

    // --- Modem ---
    pub modem_enabled: bool,
    pub modem_stage: u8,
    pub to_modem_wait_state_timer: u8,
    pub to_modem_done_state_timer: u8,
    pub leave_modem_done_state_timer: u8,
    pub leave_modem_denied_state_timer: u8,
    /// -1 disables the host-driven disconnect-detection counter.
    pub disconnect_time_counter: i8,
    pub required_evccid: String,
    pub evccid: String,

    // --- Solar ---
    pub start_current: u16,
    pub stop_time: u16,
    pub import_current: u16,

    // --- Safety ---
    pub temp_evse: i16,
    pub max_temp: i16,
    pub rcm_on: bool,
    pub rcm_fault: bool,

    // --- Misc ---
    pub diode_check: u8,
    pub pilot_disconnected: bool,
    pub pilot_disconnect_time: u8,

    // --- Nodes ---
    pub nodes: [Node; NR_EVSES],
}

impl Default for Context {
    fn default() -> Self {
        let mut priority = [0u8; NR_EVSES];
        for (i, p) in priority.iter_mut().enumerate() {
            *p = i as u8;
        }
        let mut nodes = [Node::default(); NR_EVSES];
        nodes[0].online = true;

        Context {
            state: CpState::A,
            mode: Mode::Normal,
            load_bl: 0,
            config: Config::Socket,

            access_status: AccessStatus::Off,
            rfid_reader: RfidReader::Disabled,
            ocpp_mode: false,
            ocpp_current_limit: -1.0,
            cp_duty_override: false,

            max_mains: 25,
            max_current: 13,
            min_current: 6,
            max_circuit: 16,
            max_capacity: 13,
            max_sum_mains: 0,
            max_sum_mains_time: 0,
            grid_relay_max_sum_mains: GRID_RELAY_MAX_SUM_MAINS_DEFAULT,
            grid_relay_open: false,

            balanced: [0; NR_EVSES],
            balanced_max: [0; NR_EVSES],
            balanced_state: [CpState::A; NR_EVSES],
            balanced_error: [ErrorFlags::empty(); NR_EVSES],
            charge_current: 0,
            iset_balanced: 0,
            override_current: 0,

            prio_strategy: PrioStrategy::ModbusAddr,
            rotation_interval: 0,
            idle_timeout: 60,
            priority,
            connected_time: [0; NR_EVSES],
            idle_timer: [0; NR_EVSES],
            rotation_timer: 0,
            schedule_state: [ScheduleState::Inactive; NR_EVSES],
            uptime: 0,

            isum: 0,
            mains_meter_irms: [0; 3],
            mains_meter_imeasured: 0,
            ev_meter_irms: [0; 3],
            ev_meter_imeasured: 0,
            mains_meter_type: false,
            ev_meter_type: false,
            mains_meter_timeout: COMM_TIMEOUT,
            ev_meter_timeout: COMM_EV_TIMEOUT,

            error_flags: ErrorFlags::empty(),
            charge_delay: 0,
            no_current: 0,

            solar_stop_timer: 0,
            max_sum_mains_timer: 0,
            state_timer: 0,
            access_timer: 0,
            c1_timer: 0,
            activation_mode: 255,
            activation_timer: 0,

            enable_c2: EnableC2::NotPresent,
            nr_of_phases_charging: 3,
            switching_phases_c2: SwitchingPhases::NoSwitch,
            phases_last_update_flag: true,
            limited_by_max_sum_mains: false,
            priority_scheduled_this_call: false,

            modem_enabled: false,
            modem_stage: 0,
            to_modem_wait_state_timer: 0,
            to_modem_done_state_timer: 0,
            leave_modem_done_state_timer: 0,
            leave_modem_denied_state_timer: 0,
            disconnect_time_counter: -1,
            required_evccid: String::new(),
            evccid: String::new(),

            start_current: 4,
            stop_time: 10,
            import_current: 0,

            temp_evse: 25,
            max_temp: MAX_TEMPERATURE_DEFAULT,
            rcm_on: false,
            rcm_fault: false,

            diode_check: 0,
            pilot_disconnected: false,
            pilot_disconnect_time: 0,

            nodes,
        }
    }
}
