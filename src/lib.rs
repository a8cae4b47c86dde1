//! A platform-independent IEC 61851-1 EVSE charging control engine.
//!
//! This crate is the pure logic core of a multi-EVSE charging station
//! controller: a Control Pilot state machine, a balanced-current load
//! allocator, a priority scheduler for shared-circuit installations, and a
//! safety/error supervisor. It performs no I/O of its own — callers drive
//! it with periodic ticks (`tick_10ms`, `tick_1s`) and a sampled Control
//! Pilot voltage, and observe hardware effects through the [`hal::Hal`]
//! trait they implement and install at [`config::init`].
//!
//! No async, no threads, no blocking: every entry point here is a plain
//! function call that mutates a [`context::Context`] and returns.

pub mod availability;
pub mod balance;
pub mod config;
pub mod context;
pub mod duty;
pub mod errors;
pub mod hal;
pub mod priority;
pub mod safety;
pub mod state_machine;

pub use availability::is_current_available;
pub use balance::calc_balanced_current;
pub use config::{init, ContextConfig};
pub use context::{
    AccessStatus, Config, Context, CpState, EnableC2, Mode, Node, Pilot, PrioStrategy, RfidReader,
    ScheduleState, SwitchingPhases,
};
pub use duty::current_to_duty;
pub use errors::{clear_error_flags, set_error_flags, ErrorFlags};
pub use hal::{Hal, NullHal, RecordingHal};
pub use priority::{schedule_tick_1s, sort_priority};
pub use safety::tick_1s;
pub use state_machine::{check_switching_phases, force_single_phase, set_access, set_power_unavailable, set_state, tick_10ms};
