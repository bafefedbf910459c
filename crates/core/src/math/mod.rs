//! Overflow-aware amount arithmetic.
//!
//! Amounts on the wire are `u64`. Anything that multiplies an amount by a
//! [`Ratio`] goes through [`AmountExt`], which makes the rounding direction and
//! the overflow policy explicit at every call site:
//!
//! - `multiply_floor` / `multiply_ceil` saturate to **zero** when the exact
//!   result does not fit in a `u64` (never a silent wrap),
//! - `checked_*` return `None` instead,
//! - `*_big` return the exact arbitrary-precision value.
//!
//! Rate enforcement code must only use the checked or big variants.

mod ratio;

use num_bigint::BigUint;
use num_traits::ToPrimitive;

pub use ratio::{Ratio, RatioError};

pub trait AmountExt: Copy {
    fn multiply_floor(self, ratio: &Ratio) -> u64;
    fn multiply_ceil(self, ratio: &Ratio) -> u64;
    fn checked_multiply_floor(self, ratio: &Ratio) -> Option<u64>;
    fn checked_multiply_ceil(self, ratio: &Ratio) -> Option<u64>;
    fn multiply_floor_big(self, ratio: &Ratio) -> BigUint;
    fn multiply_ceil_big(self, ratio: &Ratio) -> BigUint;
    /// `ceil(self / ratio)`; `None` for a zero ratio or if the result overflows.
    fn multiply_ceil_reciprocal(self, ratio: &Ratio) -> Option<u64>;
    /// `ceil(self / divisor)`; `None` for a zero divisor.
    fn divide_ceil(self, divisor: u64) -> Option<u64>;
}

impl AmountExt for u64 {
    fn multiply_floor(self, ratio: &Ratio) -> u64 {
        self.checked_multiply_floor(ratio).unwrap_or(0)
    }

    fn multiply_ceil(self, ratio: &Ratio) -> u64 {
        self.checked_multiply_ceil(ratio).unwrap_or(0)
    }

    fn checked_multiply_floor(self, ratio: &Ratio) -> Option<u64> {
        self.multiply_floor_big(ratio).to_u64()
    }

    fn checked_multiply_ceil(self, ratio: &Ratio) -> Option<u64> {
        self.multiply_ceil_big(ratio).to_u64()
    }

    fn multiply_floor_big(self, ratio: &Ratio) -> BigUint {
        ratio.multiply_floor(&BigUint::from(self))
    }

    fn multiply_ceil_big(self, ratio: &Ratio) -> BigUint {
        ratio.multiply_ceil(&BigUint::from(self))
    }

    fn multiply_ceil_reciprocal(self, ratio: &Ratio) -> Option<u64> {
        self.checked_multiply_ceil(&ratio.reciprocal()?)
    }

    fn divide_ceil(self, divisor: u64) -> Option<u64> {
        if divisor == 0 {
            return None;
        }
        Some(self / divisor + u64::from(self % divisor != 0))
    }
}

/// Convert an exact value back to an amount, saturating at `u64::MAX`.
pub fn saturating_amount(value: &BigUint) -> u64 {
    value.to_u64().unwrap_or(u64::MAX)
}
