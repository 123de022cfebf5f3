//! Fixed-point helpers for the magnified reward accumulator.

use crate::constants::SCALE_SHIFT;
use crate::errors::{Error, Result};
use crate::Balance;

pub use primitive_types::U256 as Wide;

/// `2^128`, the accumulator scale.
pub fn scale() -> Wide {
    Wide::one() << SCALE_SHIFT
}

pub fn widen(value: Balance) -> Wide {
    Wide::from(value)
}

/// Narrow a wide value back to a token amount.
pub fn narrow(value: Wide) -> Result<Balance> {
    if value > Wide::from(Balance::MAX) {
        return Err(Error::ArithmeticOverflow);
    }
    Ok(value.low_u128())
}

/// `a * b / c`, truncating, on the wide type.
pub fn mul_div(a: Wide, b: Wide, c: Wide) -> Result<Wide> {
    a.checked_mul(b)
        .ok_or(Error::ArithmeticOverflow)?
        .checked_div(c)
        .ok_or(Error::ArithmeticOverflow)
}

/// `amount * numerator / denominator` for token amounts, computed wide so the
/// intermediate product cannot overflow.
pub fn portion(amount: Balance, numerator: u128, denominator: u128) -> Result<Balance> {
    narrow(mul_div(widen(amount), widen(numerator), widen(denominator))?)
}

/// Sign-magnitude integer over [`Wide`].
///
/// Used for the per-account correction term, which moves in both directions
/// as reward shares grow and shrink.  Zero is always stored as non-negative.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, scale::Encode, scale::Decode)]
#[cfg_attr(feature = "std", derive(scale_info::TypeInfo))]
pub struct SignedWide {
    magnitude: Wide,
    negative: bool,
}

impl SignedWide {
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn is_negative(&self) -> bool {
        self.negative
    }

    pub fn magnitude(&self) -> Wide {
        self.magnitude
    }

    fn normalized(magnitude: Wide, negative: bool) -> Self {
        Self {
            magnitude,
            negative: negative && !magnitude.is_zero(),
        }
    }

    /// `self + value`.
    pub fn checked_add_unsigned(self, value: Wide) -> Result<Self> {
        if !self.negative {
            let magnitude = self
                .magnitude
                .checked_add(value)
                .ok_or(Error::ArithmeticOverflow)?;
            return Ok(Self::normalized(magnitude, false));
        }
        if self.magnitude > value {
            Ok(Self::normalized(self.magnitude - value, true))
        } else {
            Ok(Self::normalized(value - self.magnitude, false))
        }
    }

    /// `self - value`.
    pub fn checked_sub_unsigned(self, value: Wide) -> Result<Self> {
        if self.negative {
            let magnitude = self
                .magnitude
                .checked_add(value)
                .ok_or(Error::ArithmeticOverflow)?;
            return Ok(Self::normalized(magnitude, true));
        }
        if self.magnitude >= value {
            Ok(Self::normalized(self.magnitude - value, false))
        } else {
            Ok(Self::normalized(value - self.magnitude, true))
        }
    }

    /// `base + self`, which must stay non-negative.
    pub fn apply_to(self, base: Wide) -> Result<Wide> {
        if self.negative {
            base.checked_sub(self.magnitude)
                .ok_or(Error::ArithmeticUnderflow)
        } else {
            base.checked_add(self.magnitude)
                .ok_or(Error::ArithmeticOverflow)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scale_is_two_to_the_128() {
        assert_eq!(scale(), Wide::from(u128::MAX) + Wide::one());
    }

    #[test]
    fn narrow_rejects_values_above_u128() {
        assert_eq!(narrow(scale()), Err(Error::ArithmeticOverflow));
        assert_eq!(narrow(Wide::from(7u8)), Ok(7));
    }

    #[test]
    fn portion_truncates() {
        // 999 × 3 / 100 = 29.97 → 29
        assert_eq!(portion(999, 3, 100), Ok(29));
        assert_eq!(portion(u128::MAX, 100, 100), Ok(u128::MAX));
    }

    #[test]
    fn signed_crosses_zero_both_ways() {
        let five = Wide::from(5u8);
        let three = Wide::from(3u8);

        let v = SignedWide::zero().checked_sub_unsigned(five).unwrap();
        assert!(v.is_negative());
        assert_eq!(v.magnitude(), five);

        let v = v.checked_add_unsigned(three).unwrap();
        assert!(v.is_negative());
        assert_eq!(v.magnitude(), Wide::from(2u8));

        let v = v.checked_add_unsigned(Wide::from(2u8)).unwrap();
        assert_eq!(v, SignedWide::zero(), "zero is never negative");

        let v = v.checked_add_unsigned(three).unwrap().checked_sub_unsigned(five).unwrap();
        assert!(v.is_negative());
        assert_eq!(v.magnitude(), Wide::from(2u8));
    }

    #[test]
    fn apply_to_underflows_instead_of_wrapping() {
        let minus_ten = SignedWide::zero()
            .checked_sub_unsigned(Wide::from(10u8))
            .unwrap();
        assert_eq!(minus_ten.apply_to(Wide::from(15u8)), Ok(Wide::from(5u8)));
        assert_eq!(
            minus_ten.apply_to(Wide::from(9u8)),
            Err(Error::ArithmeticUnderflow)
        );
    }
}
