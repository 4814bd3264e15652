use approx::assert_relative_eq;
use rstest::*;

use crate::scaled_number::{frexp, ldexp, ScaledNumber};

#[rstest]
#[case::one(1.0, 0.5, 1)]
#[case::half(0.5, 0.5, 0)]
#[case::three(3.0, 0.75, 2)]
#[case::small(0.1, 0.8, -3)]
#[case::subnormal(f64::MIN_POSITIVE / 4.0, 0.5, -1023)]
fn frexp_splits_exactly(#[case] x: f64, #[case] mantissa: f64, #[case] exponent: i32) {
    let (m, e) = frexp(x);
    assert_relative_eq!(m, mantissa, epsilon = 1e-15);
    assert_eq!(e, exponent);
    assert_eq!(ldexp(m, e), x);
}

#[test]
fn frexp_zero_and_non_finite() {
    assert_eq!(frexp(0.0), (0.0, 0));
    assert_eq!(frexp(f64::INFINITY), (f64::INFINITY, 0));
    assert!(frexp(f64::NAN).0.is_nan());
}

#[test]
fn ldexp_large_shifts() {
    assert_eq!(ldexp(0.5, 1500), f64::INFINITY);
    assert_eq!(ldexp(0.5, -1500), 0.0);
    assert_eq!(ldexp(ldexp(0.75, 900), -900), 0.75);
}

#[test]
fn mantissa_stays_normalised() {
    let values = [1e-300, 3.5, 1.0, 7e200, f64::MIN_POSITIVE];
    for value in values {
        let x = ScaledNumber::new(value);
        assert!(x.mantissa() >= 0.5 && x.mantissa() < 1.0);
        assert_relative_eq!(x.to_f64(), value, max_relative = 1e-15);
    }
}

#[test]
fn multiply_does_not_underflow() {
    let tiny = ScaledNumber::new(1e-300);
    let product = tiny * tiny * tiny;
    assert!(!product.is_zero());
    assert_relative_eq!(product.ln(), 3.0 * (1e-300_f64).ln(), max_relative = 1e-12);
    assert_eq!(product.to_f64(), 0.0);
}

#[test]
fn scalar_multiply_with_tiny_factor() {
    let x = ScaledNumber::new(1e-200).scalar_multiply(1e-200);
    assert!(!x.is_zero());
    assert_relative_eq!(x.ln(), (1e-200_f64).ln() * 2.0, max_relative = 1e-12);
    assert_eq!(ScaledNumber::new(2.0) * 3.0, ScaledNumber::new(6.0));
}

#[test]
fn zero_behaviour() {
    let zero = ScaledNumber::zero();
    assert!(zero.is_zero());
    assert_eq!(zero, ScaledNumber::default());
    assert_eq!(zero.ln(), f64::NEG_INFINITY);
    assert!((zero * ScaledNumber::new(5.0)).is_zero());
    assert!(zero.scalar_multiply(1e10).is_zero());
    assert_eq!(ScaledNumber::new(0.0), zero);
}

#[test]
fn ln_matches_plain_log() {
    for value in [0.25, 1.0, 2.0, 1234.5, 1e-20] {
        assert_relative_eq!(ScaledNumber::new(value).ln(), value.ln(), epsilon = 1e-14);
    }
}

#[test]
fn ordering() {
    let small = ScaledNumber::new(1e-300) * ScaledNumber::new(1e-300);
    let large = ScaledNumber::new(1e-300);
    assert!(small < large);
    assert!(ScaledNumber::zero() < small);
    assert!(ScaledNumber::new(0.75) > ScaledNumber::new(0.5));
}

#[test]
fn relative_to_shared_exponent() {
    let x = ScaledNumber::new(6.0);
    assert_eq!(x.relative_to(3), 0.75);
    assert_eq!(x.relative_to(0), 6.0);
}

#[test]
fn display() {
    assert_eq!(ScaledNumber::zero().to_string(), "0");
    let x = ScaledNumber::new(1e-300) * ScaledNumber::new(2e-300);
    assert!(x.to_string().ends_with("e-600"));
}
