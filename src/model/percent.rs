use std::fmt;

use serde::{Deserialize, Serialize};

use super::Amount;

/// Basis points in one whole (100%).
pub const BPS_PER_WHOLE: u32 = 10_000;

/// A percentage held as basis points (1/100 of a percent).
///
/// Applying a percentage to an amount floors to the minimum currency unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Percent(u32);

impl Percent {
    pub const ZERO: Percent = Percent(0);

    pub const fn from_bps(bps: u32) -> Self {
        Self(bps)
    }

    /// Whole-number percentage, e.g. `Percent::whole(5)` is 5%.
    pub const fn whole(pct: u32) -> Self {
        Self(pct.saturating_mul(100))
    }

    pub const fn bps(self) -> u32 {
        self.0
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// True for values in `[0, 100)`.
    pub const fn is_below_whole(self) -> bool {
        self.0 < BPS_PER_WHOLE
    }

    /// `amount × self / 100`, floored. `None` on overflow.
    pub fn apply(self, amount: Amount) -> Option<Amount> {
        let scaled = (amount as u128).checked_mul(self.0 as u128)?;
        Amount::try_from(scaled / BPS_PER_WHOLE as u128).ok()
    }
}

impl fmt::Display for Percent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}%", self.0 / 100, self.0 % 100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_floors_to_minimum_unit() {
        assert_eq!(Percent::whole(10).apply(5_000), Some(500));
        assert_eq!(Percent::from_bps(333).apply(100), Some(3));
        assert_eq!(Percent::ZERO.apply(123_456), Some(0));
    }

    #[test]
    fn test_apply_large_amount_does_not_overflow_intermediate() {
        assert_eq!(Percent::whole(50).apply(u64::MAX), Some(u64::MAX / 2));
    }

    #[test]
    fn test_range_and_display() {
        assert!(Percent::from_bps(9_999).is_below_whole());
        assert!(!Percent::whole(100).is_below_whole());
        assert_eq!(Percent::from_bps(1_250).to_string(), "12.50%");
    }
}
