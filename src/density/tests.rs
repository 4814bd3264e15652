use approx::assert_relative_eq;
use rstest::*;

use crate::density::{Density, PgState};
use crate::ode::{DormandPrince, PgSystem};
use crate::parameters::RateMatrix;
use crate::rate_model::IntervalRates;
use crate::scaled_number::ScaledNumber;

fn two_type_rates() -> IntervalRates {
    IntervalRates {
        birth: vec![1.2, 0.8],
        death: vec![0.3, 0.6],
        sampling: vec![0.4, 0.1],
        removal: vec![0.0, 0.0],
        rho: vec![0.0, 0.0],
        migration: RateMatrix::from_row_slice(2, 2, &[0.0, 0.5, 0.2, 0.0]),
    }
}

#[rstest]
#[case(0.5, 0.25)]
#[case(1e-200, 3e-100)]
#[case(7.0, 0.0)]
fn arithmetic_agrees(#[case] a: f64, #[case] b: f64) {
    let plain = <f64 as Density>::from_f64(a).mul(b).scale(3.0);
    let scaled = ScaledNumber::from_f64(a)
        .mul(ScaledNumber::from_f64(b))
        .scale(3.0);
    assert_relative_eq!(scaled.to_f64(), plain, max_relative = 1e-14);
    assert_eq!(Density::is_zero(scaled), Density::is_zero(plain));
    if !Density::is_zero(plain) {
        assert_relative_eq!(Density::ln(scaled), Density::ln(plain), epsilon = 1e-10);
    }
}

#[test]
fn scaled_keeps_underflowing_products() {
    let small = ScaledNumber::from_f64(1e-200);
    let product = small.mul(small).mul(small);
    assert!(!Density::is_zero(product));
    assert_eq!(1e-200 * 1e-200 * 1e-200, 0.0);
    assert_relative_eq!(Density::ln(product), 3.0 * (1e-200_f64).ln(), epsilon = 1e-10);
}

#[test]
fn state_integration_agrees_between_modes() {
    let rates = two_type_rates();
    let system = PgSystem::new(&rates);
    let integrator = DormandPrince::default();

    let mut plain = PgState::<f64>::new(vec![0.9, 0.8]);
    plain.ge = vec![0.3, 1e-3];
    plain.integrate(&integrator, &system, 3.0, 1.0).unwrap();

    let mut scaled = PgState::<ScaledNumber>::new(vec![0.9, 0.8]);
    scaled.ge = vec![ScaledNumber::new(0.3), ScaledNumber::new(1e-3)];
    scaled.integrate(&integrator, &system, 3.0, 1.0).unwrap();

    assert_eq!(plain.n_types(), 2);
    for i in 0..2 {
        assert_relative_eq!(scaled.p[i], plain.p[i], epsilon = 1e-12);
        assert_relative_eq!(scaled.ge[i].to_f64(), plain.ge[i], max_relative = 1e-8);
    }
}

#[test]
fn scaled_state_survives_plain_underflow() {
    let rates = two_type_rates();
    let system = PgSystem::new(&rates);
    let integrator = DormandPrince::default();
    let tiny = ScaledNumber::new(1e-300).mul(ScaledNumber::new(1e-300));

    let mut scaled = PgState::<ScaledNumber>::new(vec![0.9, 0.8]);
    scaled.ge = vec![tiny, ScaledNumber::zero()];
    scaled.integrate(&integrator, &system, 3.0, 1.0).unwrap();
    assert!(!Density::is_zero(scaled.ge[0]));
    assert!(Density::is_zero(scaled.ge[1]));
    assert!(Density::ln(scaled.ge[0]) < -1300.0);
}

#[test]
fn scale_all_applies_per_type_factors() {
    let mut state = PgState::<ScaledNumber>::new(vec![0.5, 0.4]);
    state.ge = vec![ScaledNumber::new(2.0), ScaledNumber::new(8.0)];
    state.scale_all(&[0.5, 0.25]);
    assert_eq!(state.p, vec![0.25, 0.1]);
    assert_eq!(state.ge[0].to_f64(), 1.0);
    assert_eq!(state.ge[1].to_f64(), 2.0);
}
