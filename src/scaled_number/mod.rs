use std::cmp::Ordering;
use std::fmt::{self, Display};
use std::ops::Mul;

// 2^64, used to lift subnormals into the normal range before reading their exponent.
const TWO_POW_64: f64 = 18446744073709551616.0;
const MAX_SHIFT_STEP: i32 = 512;

/// Splits a finite non-zero `x` into a mantissa in [0.5, 1) and a binary exponent so that
/// `x == mantissa * 2^exponent`. Zero and non-finite values are returned unchanged with
/// exponent 0.
pub fn frexp(x: f64) -> (f64, i32) {
    if x == 0.0 || !x.is_finite() {
        return (x, 0);
    }
    let bits = x.to_bits();
    let raw_exponent = ((bits >> 52) & 0x7ff) as i32;
    if raw_exponent == 0 {
        let (mantissa, exponent) = frexp(x * TWO_POW_64);
        return (mantissa, exponent - 64);
    }
    let mantissa = f64::from_bits((bits & !(0x7ff_u64 << 52)) | (1022_u64 << 52));
    (mantissa, raw_exponent - 1022)
}

/// Computes `x * 2^exponent` by exact power-of-two steps, so that no intermediate factor
/// overflows or underflows on its own.
pub fn ldexp(x: f64, exponent: i32) -> f64 {
    let mut result = x;
    let mut remaining = exponent;
    while remaining != 0 {
        let step = remaining.clamp(-MAX_SHIFT_STEP, MAX_SHIFT_STEP);
        result *= 2.0_f64.powi(step);
        remaining -= step;
    }
    result
}

/// Non-negative real number stored as `mantissa * 2^exponent` with the mantissa kept in
/// [0.5, 1). Products of scaled numbers never underflow to zero, which keeps likelihood
/// densities of deep trees representable long after an `f64` would have become 0.
///
/// A zero mantissa represents exact zero, the "no contribution yet" state.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ScaledNumber {
    mantissa: f64,
    exponent: i32,
}

impl ScaledNumber {
    pub fn new(value: f64) -> Self {
        let (mantissa, exponent) = frexp(value);
        ScaledNumber { mantissa, exponent }
    }

    pub fn zero() -> Self {
        ScaledNumber {
            mantissa: 0.0,
            exponent: 0,
        }
    }

    pub(crate) fn from_parts(mantissa: f64, exponent: i32) -> Self {
        let (mantissa, shift) = frexp(mantissa);
        if mantissa == 0.0 {
            return Self::zero();
        }
        ScaledNumber {
            mantissa,
            exponent: exponent.saturating_add(shift),
        }
    }

    pub fn mantissa(&self) -> f64 {
        self.mantissa
    }

    pub fn exponent(&self) -> i32 {
        self.exponent
    }

    pub fn is_zero(&self) -> bool {
        self.mantissa == 0.0
    }

    pub fn multiply(&self, other: &ScaledNumber) -> ScaledNumber {
        Self::from_parts(
            self.mantissa * other.mantissa,
            self.exponent.saturating_add(other.exponent),
        )
    }

    /// Multiplies by a plain double. The factor is split first so that a tiny factor cannot
    /// underflow against an already small mantissa.
    pub fn scalar_multiply(&self, factor: f64) -> ScaledNumber {
        self.multiply(&ScaledNumber::new(factor))
    }

    /// Natural logarithm, `-inf` for zero.
    pub fn ln(&self) -> f64 {
        if self.mantissa == 0.0 {
            return f64::NEG_INFINITY;
        }
        self.mantissa.ln() + (self.exponent as f64) * std::f64::consts::LN_2
    }

    /// Value relative to `2^exponent`, i.e. `self / 2^exponent` as a plain double.
    pub(crate) fn relative_to(&self, exponent: i32) -> f64 {
        ldexp(self.mantissa, self.exponent.saturating_sub(exponent))
    }

    /// Plain double value; underflows to 0 or overflows to infinity outside the `f64` range.
    pub fn to_f64(&self) -> f64 {
        ldexp(self.mantissa, self.exponent)
    }
}

impl From<f64> for ScaledNumber {
    fn from(value: f64) -> Self {
        ScaledNumber::new(value)
    }
}

impl Mul for ScaledNumber {
    type Output = ScaledNumber;

    fn mul(self, rhs: Self) -> Self::Output {
        self.multiply(&rhs)
    }
}

impl Mul<f64> for ScaledNumber {
    type Output = ScaledNumber;

    fn mul(self, rhs: f64) -> Self::Output {
        self.scalar_multiply(rhs)
    }
}

impl PartialOrd for ScaledNumber {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self.mantissa.is_nan() || other.mantissa.is_nan() {
            return None;
        }
        match (self.is_zero(), other.is_zero()) {
            (true, true) => Some(Ordering::Equal),
            (true, false) => Some(Ordering::Less),
            (false, true) => Some(Ordering::Greater),
            (false, false) => Some(
                self.exponent
                    .cmp(&other.exponent)
                    .then(self.mantissa.total_cmp(&other.mantissa)),
            ),
        }
    }
}

impl Display for ScaledNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_zero() {
            return write!(f, "0");
        }
        let log10 = self.ln() / std::f64::consts::LN_10;
        let decimal_exponent = log10.floor();
        write!(
            f,
            "{:.6}e{}",
            10.0_f64.powf(log10 - decimal_exponent),
            decimal_exponent as i64
        )
    }
}

#[cfg(test)]
mod tests;
