use bitflags::bitflags;

bitflags! {
    /// Error taxonomy for the safety/error supervisor.
    ///
    /// The engine never returns an error code: every failure is reflected
    /// here and as a state transition.
    #[derive(Default)]
    pub struct ErrorFlags: u16 {
        /// Insufficient current available for `MinCurrent`.
        const LESS_6A     = 0x0001;
        /// Mains/CT meter communication lost.
        const CT_NO_COMM  = 0x0002;
        /// Enclosure temperature exceeded `max_temp`.
        const TEMP_HIGH   = 0x0004;
        /// EV meter communication lost.
        const EV_NO_COMM  = 0x0008;
        /// Residual-current monitor fault.
        const RCM_TRIPPED = 0x0010;
        /// RCM self-test in progress.
        const RCM_TEST    = 0x0020;
        /// Production-test bit.
        const TEST_IO     = 0x0040;
        /// Bootloader/flash operation pending.
        const BL_FLASH    = 0x0080;
        /// Solar-mode paused EVSE awaiting sunshine.
        const NO_SUN      = 0x0100;
    }
}

/// Raise `flags` on a context's error taxonomy.
pub fn set_error_flags(ctx: &mut crate::context::Context, flags: ErrorFlags) {
    if !ctx.error_flags.contains(flags) {
        log::warn!("error flags raised: {:?}", flags);
    }
    ctx.error_flags.insert(flags);
}

/// Clear `flags` from a context's error taxonomy.
pub fn clear_error_flags(ctx: &mut crate::context::Context, flags: ErrorFlags) {
    if ctx.error_flags.intersects(flags) {
        log::info!("error flags cleared: {:?}", flags);
    }
    ctx.error_flags.remove(flags);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_by_default() {
        assert_eq!(ErrorFlags::default(), ErrorFlags::empty());
    }

    #[test]
    fn set_and_clear_round_trip() {
        let mut flags = ErrorFlags::empty();
        flags.insert(ErrorFlags::LESS_6A | ErrorFlags::TEMP_HIGH);
        assert!(flags.contains(ErrorFlags::LESS_6A));
        assert!(flags.contains(ErrorFlags::TEMP_HIGH));
        flags.remove(ErrorFlags::LESS_6A);
        assert!(!flags.contains(ErrorFlags::LESS_6A));
        assert!(flags.contains(ErrorFlags::TEMP_HIGH));
    }

    #[test]
    fn set_and_clear_error_flags_entry_points_mutate_context() {
        let mut ctx = crate::context::Context::default();
        set_error_flags(&mut ctx, ErrorFlags::RCM_TRIPPED);
        assert!(ctx.error_flags.contains(ErrorFlags::RCM_TRIPPED));
        clear_error_flags(&mut ctx, ErrorFlags::RCM_TRIPPED);
        assert!(!ctx.error_flags.contains(ErrorFlags::RCM_TRIPPED));
    }
}
