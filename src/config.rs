//! Configuration validation and installation: a builder that enforces the
//! static bounds on operator-supplied limits, plus the `init` entry point
//! that wires up a context and its HAL.

use crate::context::Context;
use crate::hal::Hal;

/// Validated overrides for the handful of `Context` fields a host is
/// expected to configure at startup. Fields left `None` keep
/// `Context::default()`'s value.
#[derive(Debug, Default)]
pub struct ContextConfig {
    pub max_mains: Option<u16>,
    pub max_current: Option<u16>,
    pub min_current: Option<u16>,
    pub max_circuit: Option<u16>,
    pub max_capacity: Option<u16>,
    pub rotation_interval: Option<u16>,
    pub idle_timeout: Option<u16>,
    pub load_bl: Option<u8>,
}

impl ContextConfig {
    /// Validate every set field against its static bounds,
    /// then apply them on top of `Context::default()`.
    pub fn build(self) -> anyhow::Result<Context> {
        if let Some(min_current) = self.min_current {
            anyhow::ensure!(
                (6..=16).contains(&min_current),
                "min_current must be between 6 and 16 A, got {min_current}"
            );
        }
        if let Some(rotation_interval) = self.rotation_interval {
            anyhow::ensure!(
                rotation_interval == 0 || (30..=1440).contains(&rotation_interval),
                "rotation_interval must be 0 or between 30 and 1440 minutes, got {rotation_interval}"
            );
        }
        if let Some(idle_timeout) = self.idle_timeout {
            anyhow::ensure!(
                (30..=300).contains(&idle_timeout),
                "idle_timeout must be between 30 and 300 s, got {idle_timeout}"
            );
        }
        if let Some(load_bl) = self.load_bl {
            anyhow::ensure!(
                load_bl as usize <= crate::context::NR_EVSES,
                "load_bl must be 0 (standalone), 1 (master) or 2..={} (node), got {load_bl}",
                crate::context::NR_EVSES
            );
        }

        let mut ctx = Context::default();

        if let Some(v) = self.max_mains {
            ctx.max_mains = v;
        }
        if let Some(v) = self.max_current {
            ctx.max_current = v;
        }
        if let Some(v) = self.min_current {
            ctx.min_current = v;
        }
        if let Some(v) = self.max_circuit {
            ctx.max_circuit = v;
        }
        if let Some(v) = self.max_capacity {
            ctx.max_capacity = v;
        }
        if let Some(v) = self.rotation_interval {
            ctx.rotation_interval = v;
        }
        if let Some(v) = self.idle_timeout {
            ctx.idle_timeout = v;
        }
        if let Some(v) = self.load_bl {
            ctx.load_bl = v;
        }

        anyhow::ensure!(
            ctx.max_current >= ctx.min_current,
            "max_current ({}) must be at least min_current ({})",
            ctx.max_current,
            ctx.min_current
        );

        log::info!(
            "evse-core configured: max_mains={}A max_current={}A min_current={}A load_bl={}",
            ctx.max_mains,
            ctx.max_current,
            ctx.min_current,
            ctx.load_bl
        );

        Ok(ctx)
    }
}

/// Install a context with `hal` wired up. Mirrors `evse_init()`: the pilot
/// relay starts physically connected, so `init` asserts that on the HAL
/// explicitly rather than relying on its default.
pub fn init(ctx: &mut Context, hal: &mut impl Hal) {
    hal.set_pilot(true);
    log::debug!("evse-core initialized: state={:?} mode={:?}", ctx.state, ctx.mode);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::RecordingHal;

    #[test]
    fn default_config_builds_cleanly() {
        let ctx = ContextConfig::default().build().unwrap();
        assert_eq!(ctx.min_current, 6);
    }

    #[test]
    fn min_current_out_of_range_is_rejected() {
        let cfg = ContextConfig {
            min_current: Some(5),
            ..Default::default()
        };
        assert!(cfg.build().is_err());

        let cfg = ContextConfig {
            min_current: Some(17),
            ..Default::default()
        };
        assert!(cfg.build().is_err());
    }

    #[test]
    fn rotation_interval_must_be_zero_or_in_range() {
        let cfg = ContextConfig {
            rotation_interval: Some(15),
            ..Default::default()
        };
        assert!(cfg.build().is_err());

        let cfg = ContextConfig {
            rotation_interval: Some(0),
            ..Default::default()
        };
        assert!(cfg.build().is_ok());
    }

    #[test]
    fn max_current_below_min_current_is_rejected() {
        let cfg = ContextConfig {
            max_current: Some(5),
            min_current: Some(6),
            ..Default::default()
        };
        assert!(cfg.build().is_err());
    }

    #[test]
    fn init_connects_the_pilot_relay() {
        let mut ctx = ContextConfig::default().build().unwrap();
        let mut hal = RecordingHal::default();
        init(&mut ctx, &mut hal);
        assert!(hal.pilot_connected);
    }
}
