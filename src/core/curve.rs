//! Multiplier Growth Curve
//!
//! The displayed multiplier is a pure function of elapsed time, so any
//! client can reproduce it from `elapsed_ms` alone. The curve is part of
//! the published fairness contract:
//!
//! ```text
//! multiplier(t) = floor(100 * e^(k * t_ms)) / 100,   k = 6.0e-5
//! ```
//!
//! Exponential growth starting at exactly 1.00x, doubling roughly every
//! 11.55 seconds, reaching the 5000.00x clip at ~142 seconds. The closed
//! form inverse bounds the longest possible round for the watchdog.

use super::units::Multiplier;

/// Exponential growth rate per elapsed millisecond.
pub const GROWTH_RATE_PER_MS: f64 = 6.0e-5;

/// The live multiplier after `elapsed_ms` of RUNNING time.
///
/// Monotonically non-decreasing, starts at 1.00x, clipped at 5000.00x.
pub fn multiplier_at(elapsed_ms: u64) -> Multiplier {
    let raw = (GROWTH_RATE_PER_MS * elapsed_ms as f64).exp();
    let hundredths = (raw * 100.0).floor() as u64;
    if hundredths >= Multiplier::MAX.hundredths() as u64 {
        Multiplier::MAX
    } else {
        Multiplier::from_hundredths(hundredths as u32)
    }
}

/// Smallest elapsed time (ms, rounded up) at which the curve reaches `m`.
///
/// Used to bound round duration: a round whose crash point has not been
/// reached well past `time_to_reach(crash_point)` indicates a clock fault.
pub fn time_to_reach(m: Multiplier) -> u64 {
    if m <= Multiplier::ONE {
        return 0;
    }
    (m.as_f64().ln() / GROWTH_RATE_PER_MS).ceil() as u64
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_at_one() {
        assert_eq!(multiplier_at(0), Multiplier::ONE);
    }

    #[test]
    fn test_known_points() {
        // Fixed points on the published curve (floor values safely away
        // from hundredth boundaries).
        assert_eq!(multiplier_at(250).hundredths(), 101);
        assert_eq!(multiplier_at(1_000).hundredths(), 106);
        assert_eq!(multiplier_at(60_000).hundredths(), 3_659);
    }

    #[test]
    fn test_monotone() {
        let mut last = Multiplier::ONE;
        for t in (0..200_000).step_by(137) {
            let m = multiplier_at(t);
            assert!(m >= last, "curve decreased at t={t}");
            last = m;
        }
    }

    #[test]
    fn test_clips_at_max() {
        assert_eq!(multiplier_at(150_000), Multiplier::MAX);
        assert_eq!(multiplier_at(u64::MAX / 2), Multiplier::MAX);
    }

    #[test]
    fn test_time_to_reach_inverts() {
        for hundredths in [101u32, 150, 200, 216, 1_000, 50_000] {
            let m = Multiplier::from_hundredths(hundredths);
            let t = time_to_reach(m);
            assert!(multiplier_at(t) >= m);
            assert!(t > 0);
        }
        assert_eq!(time_to_reach(Multiplier::ONE), 0);
    }

    #[test]
    fn test_max_round_bound() {
        // 5000.00x is reached in under 142 seconds; the engine watchdog
        // uses this plus slack.
        let t = time_to_reach(Multiplier::MAX);
        assert!(t < 142_000, "t(5000x) = {t}");
        assert!(t > 141_000, "t(5000x) = {t}");
    }
}
