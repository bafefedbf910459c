//! Exact rational numbers over arbitrary-precision unsigned integers.
//!
//! Exchange rates, slippage and margins are all expressed as [`Ratio`]s so that
//! rounding only ever happens at the point where an amount is produced, and
//! always in an explicit direction.

use std::cmp::Ordering;
use std::fmt;
use std::ops::Mul;
use std::str::FromStr;

use num_bigint::BigUint;
use num_integer::Integer;
use num_traits::{One, Zero};
use serde_with::{DeserializeFromStr, SerializeDisplay};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RatioError {
    #[error("ratio denominator must be positive")]
    ZeroDenominator,
    #[error("invalid ratio literal `{0}`")]
    Parse(String),
}

/// A non-negative rational number `numerator / denominator`.
///
/// The denominator is always strictly positive. Values are not reduced; equality
/// and ordering compare by cross multiplication so `1/2 == 2/4`.
#[derive(Clone, SerializeDisplay, DeserializeFromStr)]
pub struct Ratio {
    numerator: BigUint,
    denominator: BigUint,
}

impl Ratio {
    pub fn new(
        numerator: impl Into<BigUint>,
        denominator: impl Into<BigUint>,
    ) -> Result<Self, RatioError> {
        let denominator = denominator.into();
        if denominator.is_zero() {
            return Err(RatioError::ZeroDenominator);
        }
        Ok(Self {
            numerator: numerator.into(),
            denominator,
        })
    }

    pub fn from_integer(value: impl Into<BigUint>) -> Self {
        Self {
            numerator: value.into(),
            denominator: BigUint::one(),
        }
    }

    pub fn zero() -> Self {
        Self::from_integer(0u64)
    }

    pub fn one() -> Self {
        Self::from_integer(1u64)
    }

    pub fn numerator(&self) -> &BigUint {
        &self.numerator
    }

    pub fn denominator(&self) -> &BigUint {
        &self.denominator
    }

    pub fn is_zero(&self) -> bool {
        self.numerator.is_zero()
    }

    pub fn is_positive(&self) -> bool {
        !self.numerator.is_zero()
    }

    /// `1 / self`, only defined for positive ratios.
    pub fn reciprocal(&self) -> Option<Ratio> {
        if self.numerator.is_zero() {
            return None;
        }
        Some(Self {
            numerator: self.denominator.clone(),
            denominator: self.numerator.clone(),
        })
    }

    /// `self - other`, or `None` if the result would be negative.
    pub fn checked_sub(&self, other: &Ratio) -> Option<Ratio> {
        let lhs = &self.numerator * &other.denominator;
        let rhs = &other.numerator * &self.denominator;
        if lhs < rhs {
            return None;
        }
        Some(Self {
            numerator: lhs - rhs,
            denominator: &self.denominator * &other.denominator,
        })
    }

    /// `self - other`, clamped at zero.
    pub fn saturating_sub(&self, other: &Ratio) -> Ratio {
        self.checked_sub(other).unwrap_or_else(Ratio::zero)
    }

    pub fn floor(&self) -> BigUint {
        &self.numerator / &self.denominator
    }

    pub fn ceil(&self) -> BigUint {
        self.numerator.div_ceil(&self.denominator)
    }

    /// `floor(amount * self)`.
    pub fn multiply_floor(&self, amount: &BigUint) -> BigUint {
        (amount * &self.numerator) / &self.denominator
    }

    /// `ceil(amount * self)`.
    pub fn multiply_ceil(&self, amount: &BigUint) -> BigUint {
        (amount * &self.numerator).div_ceil(&self.denominator)
    }
}

impl Mul for &Ratio {
    type Output = Ratio;

    fn mul(self, rhs: &Ratio) -> Ratio {
        Ratio {
            numerator: &self.numerator * &rhs.numerator,
            denominator: &self.denominator * &rhs.denominator,
        }
    }
}

impl PartialEq for Ratio {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Ratio {}

impl PartialOrd for Ratio {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ratio {
    fn cmp(&self, other: &Self) -> Ordering {
        (&self.numerator * &other.denominator).cmp(&(&other.numerator * &self.denominator))
    }
}

impl From<u64> for Ratio {
    fn from(value: u64) -> Self {
        Ratio::from_integer(value)
    }
}

impl fmt::Display for Ratio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

impl fmt::Debug for Ratio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ratio({}/{})", self.numerator, self.denominator)
    }
}

/// Accepts `"n/d"`, plain integers and non-negative decimals such as `"0.005"`.
impl FromStr for Ratio {
    type Err = RatioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let literal = s.trim();
        let parse_err = || RatioError::Parse(s.to_owned());
        let parse_digits = |digits: &str| -> Result<BigUint, RatioError> {
            if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                return Err(parse_err());
            }
            BigUint::from_str(digits).map_err(|_| parse_err())
        };

        if let Some((num, den)) = literal.split_once('/') {
            return Ratio::new(parse_digits(num.trim())?, parse_digits(den.trim())?);
        }

        match literal.split_once('.') {
            Some((int, frac)) => {
                let int = if int.is_empty() { "0" } else { int };
                let frac_len = u32::try_from(frac.len()).map_err(|_| parse_err())?;
                let numerator = parse_digits(&format!("{int}{frac}"))?;
                Ratio::new(numerator, BigUint::from(10u32).pow(frac_len))
            }
            None => Ok(Ratio::from_integer(parse_digits(literal)?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ratio(n: u64, d: u64) -> Ratio {
        Ratio::new(n, d).unwrap()
    }

    #[test]
    fn zero_denominator_is_rejected() {
        assert_eq!(Ratio::new(1u64, 0u64).unwrap_err(), RatioError::ZeroDenominator);
    }

    #[test]
    fn compares_by_cross_multiplication() {
        assert_eq!(ratio(1, 2), ratio(2, 4));
        assert!(ratio(1, 3) < ratio(1, 2));
        assert!(ratio(7, 3) > ratio(2, 1));
    }

    #[test]
    fn floor_and_ceil_multiply() {
        let r = ratio(3, 2);
        assert_eq!(r.multiply_floor(&BigUint::from(5u32)), BigUint::from(7u32));
        assert_eq!(r.multiply_ceil(&BigUint::from(5u32)), BigUint::from(8u32));
        assert_eq!(r.multiply_ceil(&BigUint::from(4u32)), BigUint::from(6u32));
    }

    #[test]
    fn reciprocal_of_zero_is_undefined() {
        assert!(Ratio::zero().reciprocal().is_none());
        assert_eq!(ratio(2, 3).reciprocal(), Some(ratio(3, 2)));
    }

    #[test]
    fn subtraction_never_goes_negative() {
        assert_eq!(ratio(3, 4).checked_sub(&ratio(1, 2)), Some(ratio(1, 4)));
        assert_eq!(ratio(1, 2).checked_sub(&ratio(3, 4)), None);
        assert!(ratio(1, 2).saturating_sub(&ratio(3, 4)).is_zero());
    }

    #[test]
    fn parses_fractions_and_decimals() {
        assert_eq!("3/4".parse::<Ratio>().unwrap(), ratio(3, 4));
        assert_eq!("0.005".parse::<Ratio>().unwrap(), ratio(5, 1000));
        assert_eq!("12".parse::<Ratio>().unwrap(), ratio(12, 1));
        assert_eq!(".5".parse::<Ratio>().unwrap(), ratio(1, 2));
        assert!("-1".parse::<Ratio>().is_err());
        assert!("1/0".parse::<Ratio>().is_err());
        assert!("abc".parse::<Ratio>().is_err());
    }

    #[test]
    fn serializes_through_display() {
        let json = serde_json::to_string(&ratio(2, 5)).unwrap();
        assert_eq!(json, "\"2/5\"");
        let back: Ratio = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ratio(2, 5));
    }
}
