use serde::{Deserialize, Serialize};

/// Upper bound of the user facing intensity scale (promille).
pub const VALUE_MAX: u16 = 1000;

/// Perceptual mapping from a promille value to a hardware duty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DutyCurve {
    /// `floor(floor(range * v / 1000)^2 / range)`
    Quadratic,
    /// Quadratic with `floor(sqrt(range))` added to every nonzero value so
    /// that the dimmest setting never rounds down to off.
    OffsetQuadratic,
    /// Straight rescale, used by plain RGB LEDs driven at 8 bit.
    Linear,
}

impl DutyCurve {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Quadratic => "quadratic",
            Self::OffsetQuadratic => "offset_quadratic",
            Self::Linear => "linear",
        }
    }

    /// Maps `value` (expected in `0..=1000`, validated by the caller) onto
    /// `0..=range`.
    pub fn map(self, value: u16, range: u32) -> u32 {
        let range = u64::from(range);
        if range == 0 {
            return 0;
        }
        let value = u64::from(value.min(VALUE_MAX));
        let scale = u64::from(VALUE_MAX);

        let duty = match self {
            Self::Quadratic => {
                let linear = range * value / scale;
                linear * linear / range
            }
            Self::OffsetQuadratic => {
                let offset = isqrt(range);
                let shifted = if value > 0 { value + offset } else { 0 };
                let linear = range * shifted / (scale + offset);
                linear * linear / range
            }
            Self::Linear => range * value / scale,
        };

        duty as u32
    }
}

fn isqrt(n: u64) -> u64 {
    if n < 2 {
        return n;
    }
    let mut x = (n as f64).sqrt() as u64;
    while x * x > n {
        x -= 1;
    }
    while (x + 1) * (x + 1) <= n {
        x += 1;
    }
    x
}

#[cfg(test)]
mod tests {
    use super::*;

    const RANGE_10BIT: u32 = 1023;

    #[test]
    fn quadratic_hits_both_ends() {
        assert_eq!(DutyCurve::Quadratic.map(0, RANGE_10BIT), 0);
        assert_eq!(DutyCurve::Quadratic.map(1000, RANGE_10BIT), RANGE_10BIT);
    }

    #[test]
    fn quadratic_matches_reference_points() {
        // 1023 * 250 / 1000 = 255, 255^2 / 1023 = 63
        assert_eq!(DutyCurve::Quadratic.map(250, RANGE_10BIT), 63);
        // 1023 * 500 / 1000 = 511, 511^2 / 1023 = 255
        assert_eq!(DutyCurve::Quadratic.map(500, RANGE_10BIT), 255);
        assert_eq!(DutyCurve::Quadratic.map(1, RANGE_10BIT), 0);
    }

    #[test]
    fn offset_quadratic_keeps_lowest_step_visible() {
        for range in [4095, 8191, 65_535] {
            assert_eq!(DutyCurve::OffsetQuadratic.map(0, range), 0);
            assert!(DutyCurve::OffsetQuadratic.map(1, range) > 0);
            assert_eq!(DutyCurve::OffsetQuadratic.map(1000, range), range);
        }
    }

    #[test]
    fn offset_quadratic_reference_points() {
        // m = 63, v' = 64: 4095 * 64 / 1063 = 246, 246^2 / 4095 = 14
        assert_eq!(DutyCurve::OffsetQuadratic.map(1, 4095), 14);
        assert_eq!(DutyCurve::OffsetQuadratic.map(1, 65_535), 2726);
        // Below ~1032 the squared first step floors back to zero.
        assert_eq!(DutyCurve::OffsetQuadratic.map(1, 1023), 0);
    }

    #[test]
    fn linear_rescales_to_eight_bit() {
        assert_eq!(DutyCurve::Linear.map(0, 255), 0);
        assert_eq!(DutyCurve::Linear.map(500, 255), 127);
        assert_eq!(DutyCurve::Linear.map(1000, 255), 255);
    }

    #[test]
    fn curves_are_non_decreasing() {
        for curve in [
            DutyCurve::Quadratic,
            DutyCurve::OffsetQuadratic,
            DutyCurve::Linear,
        ] {
            for range in [255, RANGE_10BIT, 65_535] {
                let mut previous = 0;
                for value in 0..=VALUE_MAX {
                    let duty = curve.map(value, range);
                    assert!(
                        duty >= previous,
                        "{} not monotonic at {value} for range {range}",
                        curve.as_str()
                    );
                    assert!(duty <= range);
                    previous = duty;
                }
            }
        }
    }

    #[test]
    fn zero_range_is_always_off() {
        assert_eq!(DutyCurve::Quadratic.map(1000, 0), 0);
        assert_eq!(DutyCurve::OffsetQuadratic.map(1000, 0), 0);
    }

    #[test]
    fn integer_sqrt() {
        assert_eq!(isqrt(0), 0);
        assert_eq!(isqrt(1023), 31);
        assert_eq!(isqrt(1024), 32);
        assert_eq!(isqrt(65_535), 255);
    }
}
