//! Color-temperature coordinate conversions.
//!
//! The wire protocol speaks an 8-bit code in `[0, 255]`; the schedule and
//! the gateway think in Kelvin within the fixture's `[low, high]` range, and
//! the gateway attribute itself is mired. All rounding is half away from
//! zero (`f64::round`) so that `code -> kelvin -> code` is the identity for
//! any range wider than 255 K.

use crate::config::PersistedSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CctRange {
    pub low: u16,
    pub high: u16,
}

impl CctRange {
    pub fn new(low: u16, high: u16) -> Self {
        Self { low, high }
    }

    pub fn from_settings(settings: &PersistedSettings) -> Self {
        Self::new(settings.cct_limit_bottom, settings.cct_limit_top)
    }

    fn span(self) -> f64 {
        self.high as f64 - self.low as f64
    }

    pub fn code_to_kelvin(self, code: u8) -> u16 {
        let kelvin = (code as f64 / 255.0 * self.span() + self.low as f64).round();
        kelvin.clamp(self.low.min(self.high) as f64, self.high.max(self.low) as f64) as u16
    }

    pub fn kelvin_to_code(self, kelvin: u16) -> u8 {
        let span = self.span();
        if span <= 0.0 {
            return 0;
        }
        let code = ((kelvin as f64 - self.low as f64) / span * 255.0).round();
        code.clamp(0.0, 255.0) as u8
    }

    pub fn code_to_mired(self, code: u8) -> u16 {
        kelvin_to_mired(self.code_to_kelvin(code))
    }

    pub fn mired_to_code(self, mired: u16) -> u8 {
        self.kelvin_to_code(mired_to_kelvin(mired))
    }
}

pub fn kelvin_to_mired(kelvin: u16) -> u16 {
    if kelvin == 0 {
        return u16::MAX;
    }
    (1_000_000.0 / kelvin as f64).round().min(u16::MAX as f64) as u16
}

pub fn mired_to_kelvin(mired: u16) -> u16 {
    if mired == 0 {
        return u16::MAX;
    }
    (1_000_000.0 / mired as f64).round().min(u16::MAX as f64) as u16
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const RANGE: CctRange = CctRange {
        low: 2700,
        high: 6500,
    };

    #[test]
    fn code_200_maps_to_5680_kelvin_and_176_mired() {
        assert_eq!(RANGE.code_to_kelvin(200), 5680);
        assert_eq!(kelvin_to_mired(5680), 176);
        assert_eq!(RANGE.code_to_mired(200), 176);
    }

    #[test]
    fn range_edges_map_to_limits() {
        assert_eq!(RANGE.code_to_kelvin(0), 2700);
        assert_eq!(RANGE.code_to_kelvin(255), 6500);
        assert_eq!(RANGE.kelvin_to_code(2000), 0);
        assert_eq!(RANGE.kelvin_to_code(9000), 255);
    }

    #[test]
    fn every_code_round_trips_through_kelvin() {
        for code in 0..=255u8 {
            assert_eq!(RANGE.kelvin_to_code(RANGE.code_to_kelvin(code)), code);
        }
    }

    #[test]
    fn empty_range_does_not_divide_by_zero() {
        let range = CctRange::new(4000, 4000);
        assert_eq!(range.code_to_kelvin(128), 4000);
        assert_eq!(range.kelvin_to_code(4000), 0);
    }

    #[test]
    fn mired_conversion_rounds_half_away_from_zero() {
        // 1_000_000 / 2500 = 400 exactly, 1_000_000 / 2700 = 370.37
        assert_eq!(kelvin_to_mired(2500), 400);
        assert_eq!(kelvin_to_mired(2700), 370);
        assert_eq!(mired_to_kelvin(153), 6536);
    }

    proptest! {
        #[test]
        fn round_trip_is_within_one_and_idempotent(
            low in 1000u16..5000,
            width in 255u16..6000,
            code in 0u8..=255,
        ) {
            let range = CctRange::new(low, low + width);
            let once = range.kelvin_to_code(range.code_to_kelvin(code));
            let twice = range.kelvin_to_code(range.code_to_kelvin(once));

            prop_assert!((once as i16 - code as i16).abs() <= 1);
            prop_assert_eq!(once, twice);
        }
    }
}
