//! Colour threshold tables.

use blobdepot_types::SpaceColor;
use serde::{Deserialize, Serialize};

/// Colour thresholds for one pool.
///
/// Each field is the number of free chunks below which the pool is
/// declared to be at that colour. Thresholds are monotonically
/// non-increasing from `cyan` to `black`: cyan is the earliest, softest
/// warning, black the hardest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorLimits {
    pub cyan: i64,
    pub yellow: i64,
    pub light_orange: i64,
    pub orange: i64,
    pub red: i64,
    pub black: i64,
}

impl ColorLimits {
    /// Preset for log pools. Log writes burst, so the early warnings sit
    /// closer together and further from the wall.
    pub const fn log_limits() -> Self {
        Self {
            cyan: 100,
            yellow: 80,
            light_orange: 65,
            orange: 25,
            red: 15,
            black: 5,
        }
    }

    /// Preset for user chunk pools.
    pub const fn chunk_limits() -> Self {
        Self {
            cyan: 130,
            yellow: 100,
            light_orange: 65,
            orange: 25,
            red: 15,
            black: 5,
        }
    }

    /// Threshold for a single colour. Green has no threshold; it is the
    /// default when no threshold is crossed.
    pub fn threshold(&self, color: SpaceColor) -> i64 {
        match color {
            SpaceColor::Green => i64::MAX,
            SpaceColor::Cyan => self.cyan,
            SpaceColor::Yellow => self.yellow,
            SpaceColor::LightOrange => self.light_orange,
            SpaceColor::Orange => self.orange,
            SpaceColor::Red => self.red,
            SpaceColor::Black => self.black,
        }
    }

    /// The colour for a pool with `free` chunks remaining: the most
    /// severe colour whose threshold still exceeds the free figure.
    pub fn color_for_free(&self, free: i64) -> SpaceColor {
        let mut result = SpaceColor::Green;
        for color in [
            SpaceColor::Cyan,
            SpaceColor::Yellow,
            SpaceColor::LightOrange,
            SpaceColor::Orange,
            SpaceColor::Red,
            SpaceColor::Black,
        ] {
            if self.threshold(color) > free {
                result = color;
            }
        }
        result
    }

    /// Checks the cyan-to-black monotonicity invariant.
    pub fn is_monotonic(&self) -> bool {
        self.cyan >= self.yellow
            && self.yellow >= self.light_orange
            && self.light_orange >= self.orange
            && self.orange >= self.red
            && self.red >= self.black
            && self.black >= 0
    }
}

impl Default for ColorLimits {
    fn default() -> Self {
        Self::chunk_limits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_are_monotonic() {
        assert!(ColorLimits::log_limits().is_monotonic());
        assert!(ColorLimits::chunk_limits().is_monotonic());
    }

    #[test]
    fn plenty_of_free_space_is_green() {
        let limits = ColorLimits::chunk_limits();
        assert_eq!(limits.color_for_free(1_000_000), SpaceColor::Green);
        assert_eq!(limits.color_for_free(limits.cyan), SpaceColor::Green);
    }

    #[test]
    fn exhausted_pool_is_black() {
        let limits = ColorLimits::chunk_limits();
        assert_eq!(limits.color_for_free(0), SpaceColor::Black);
        assert_eq!(limits.color_for_free(-10), SpaceColor::Black);
    }

    #[test]
    fn each_band_maps_to_its_color() {
        let limits = ColorLimits::chunk_limits();
        assert_eq!(limits.color_for_free(129), SpaceColor::Cyan);
        assert_eq!(limits.color_for_free(99), SpaceColor::Yellow);
        assert_eq!(limits.color_for_free(64), SpaceColor::LightOrange);
        assert_eq!(limits.color_for_free(24), SpaceColor::Orange);
        assert_eq!(limits.color_for_free(14), SpaceColor::Red);
        assert_eq!(limits.color_for_free(4), SpaceColor::Black);
    }
}
