//! Current-to-duty Conversion: a pure map from charge current
//! (0.1 A units) to CP PWM duty (0..=1024).

/// Convert a charge current (0.1 A units) to a CP PWM duty cycle scaled to
/// 0..=1024 (1024 = 100%).
///
/// Values outside the valid range fall back to the duty for 6 A (the
/// minimum legal charge current).
pub fn current_to_duty(current_01a: u16) -> u32 {
    let duty_raw: u32 = match current_01a {
        60..=510 => (current_01a as u32 * 10) / 6,
        511..=800 => (current_01a as u32 * 10) / 25 + 640,
        _ => 100,
    };
    duty_raw * 1024 / 1000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundary_law_b1() {
        assert_eq!(current_to_duty(60), 102);
        assert!((800..1000).contains(&current_to_duty(510)));
        assert!((950..1024).contains(&current_to_duty(800)));
        assert_eq!(current_to_duty(0), 102);
        assert_eq!(current_to_duty(5000), 102);
    }

    #[test]
    fn monotonic_within_each_segment() {
        let low: Vec<u32> = (60..=510).step_by(10).map(current_to_duty).collect();
        assert!(low.windows(2).all(|w| w[0] <= w[1]));
        let high: Vec<u32> = (511..=800).step_by(10).map(current_to_duty).collect();
        assert!(high.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn never_exceeds_full_scale() {
        for c in 0..=1000u16 {
            assert!(current_to_duty(c) <= 1024);
        }
    }
}
