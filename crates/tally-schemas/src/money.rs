//! Fixed-point money type.
//!
//! # Scale
//!
//! All monetary values in this system (order totals, unit prices, line
//! totals) use a 1e-6 (micros) fixed-point representation stored as `i64`.
//! 1 unit of currency = `Money::new(1_000_000)`.
//!
//! `Money` wraps the raw `i64` so the type system prevents mixing an amount
//! with unrelated integers (quantities, sequence numbers). There is no
//! `From<i64>`; callers construct explicitly with [`Money::new`] or parse a
//! decimal string with [`Money::parse_decimal`].
//!
//! Decimal parsing never goes through floating point, so `"519.80"` and
//! `"25.99"` map to exact integers and sums compare exactly.

use std::fmt;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Micros per whole currency unit.
pub const MICROS_SCALE: i64 = 1_000_000;

/// A fixed-point monetary amount at 1e-6 scale (micros).
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);

    /// Rounding tolerance used when comparing a record total with the sum of
    /// its line items: one cent.
    pub const CURRENCY_TOLERANCE: Money = Money(10_000);

    #[inline]
    pub const fn new(raw_micros: i64) -> Self {
        Money(raw_micros)
    }

    /// Whole cents, e.g. `Money::from_cents(51_980)` is `519.80`.
    #[inline]
    pub const fn from_cents(cents: i64) -> Self {
        Money(cents * 10_000)
    }

    #[inline]
    pub const fn raw(self) -> i64 {
        self.0
    }

    #[inline]
    pub fn abs(self) -> Money {
        Money(self.0.saturating_abs())
    }

    #[inline]
    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    #[inline]
    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    /// Multiply a unit price by an integer quantity.
    ///
    /// Returns `None` on overflow; a line total that does not fit is a data
    /// error, never something to clamp.
    #[inline]
    pub fn checked_mul_qty(self, qty: i64) -> Option<Money> {
        self.0.checked_mul(qty).map(Money)
    }

    #[inline]
    pub fn checked_add(self, rhs: Money) -> Option<Money> {
        self.0.checked_add(rhs.0).map(Money)
    }

    #[inline]
    pub fn saturating_add(self, rhs: Money) -> Money {
        Money(self.0.saturating_add(rhs.0))
    }

    /// `|self - other| <= CURRENCY_TOLERANCE`.
    pub fn within_tolerance(self, other: Money) -> bool {
        let diff = (self.0 as i128 - other.0 as i128).abs();
        diff <= Self::CURRENCY_TOLERANCE.0 as i128
    }

    /// Number of whole `unit`s that fit into `self`, rounded half away from
    /// zero. `unit` must be positive.
    pub fn div_round(self, unit: Money) -> Option<i64> {
        if unit.0 <= 0 {
            return None;
        }
        let n = self.0 as i128;
        let d = unit.0 as i128;
        let q = if n >= 0 {
            (2 * n + d) / (2 * d)
        } else {
            -((2 * -n + d) / (2 * d))
        };
        i64::try_from(q).ok()
    }

    /// Parse a plain decimal string (`"519.80"`, `"-3"`, `"0.5"`).
    ///
    /// - optional leading `+` or `-`
    /// - at most 6 fractional digits (anything finer would need rounding)
    /// - ASCII digits only, no exponent, no thousands separators
    pub fn parse_decimal(s: &str) -> Result<Money, MoneyParseError> {
        let raw = s.trim();
        if raw.is_empty() {
            return Err(MoneyParseError::Empty);
        }

        let (negative, digits) = if let Some(rest) = raw.strip_prefix('-') {
            (true, rest)
        } else if let Some(rest) = raw.strip_prefix('+') {
            (false, rest)
        } else {
            (false, raw)
        };

        let (int_part, frac_part) = digits.split_once('.').unwrap_or((digits, ""));

        let all_digits = |p: &str| p.chars().all(|c| c.is_ascii_digit());
        if (int_part.is_empty() && frac_part.is_empty())
            || !all_digits(int_part)
            || !all_digits(frac_part)
        {
            return Err(MoneyParseError::Invalid(raw.to_string()));
        }
        if frac_part.len() > 6 {
            return Err(MoneyParseError::TooManyDecimalPlaces(raw.to_string()));
        }

        let int_val: i64 = if int_part.is_empty() {
            0
        } else {
            int_part
                .parse()
                .map_err(|_| MoneyParseError::Invalid(raw.to_string()))?
        };

        let frac_val: i64 = format!("{frac_part:0<6}")
            .parse()
            .map_err(|_| MoneyParseError::Invalid(raw.to_string()))?;

        let micros = int_val
            .checked_mul(MICROS_SCALE)
            .and_then(|v| v.checked_add(frac_val))
            .ok_or_else(|| MoneyParseError::Invalid(raw.to_string()))?;

        Ok(Money(if negative { -micros } else { micros }))
    }
}

impl FromStr for Money {
    type Err = MoneyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Money::parse_decimal(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MoneyParseError {
    #[error("empty amount")]
    Empty,
    #[error("invalid decimal amount: {0:?}")]
    Invalid(String),
    #[error("more than 6 decimal places: {0:?}")]
    TooManyDecimalPlaces(String),
}

impl Add for Money {
    type Output = Money;
    #[inline]
    fn add(self, rhs: Money) -> Money {
        Money(self.0 + rhs.0)
    }
}

impl Sub for Money {
    type Output = Money;
    #[inline]
    fn sub(self, rhs: Money) -> Money {
        Money(self.0 - rhs.0)
    }
}

impl Neg for Money {
    type Output = Money;
    #[inline]
    fn neg(self) -> Money {
        Money(-self.0)
    }
}

impl AddAssign for Money {
    #[inline]
    fn add_assign(&mut self, rhs: Money) {
        self.0 += rhs.0;
    }
}

impl SubAssign for Money {
    #[inline]
    fn sub_assign(&mut self, rhs: Money) {
        self.0 -= rhs.0;
    }
}

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::ZERO, |acc, m| acc + m)
    }
}

/// Renders two decimal places, rounded half away from zero.
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cents = Money(self.0).div_round(Money(10_000)).unwrap_or(0);
        let sign = if cents < 0 { "-" } else { "" };
        let abs = cents.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}
