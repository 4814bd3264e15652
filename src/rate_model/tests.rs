use approx::assert_relative_eq;
use assert_matches::assert_matches;
use nalgebra::dmatrix;

use crate::likelihood::LikelihoodError;
use crate::parameters::{
    BdmmParams, BdmmParamsBuilder, MigrationSkyline, RhoSampling, Skyline, TimeDirection,
};
use crate::rate_model::{RateKind, RateModel};

fn skyline_params() -> BdmmParams {
    BdmmParamsBuilder::new(2)
        .birth_death_sampling(
            Skyline::from_rows(
                vec![1.0],
                &[vec![1.0, 2.0], vec![3.0, 4.0]],
                TimeDirection::SinceHorizon,
            )
            .unwrap(),
            Skyline::constant(&[0.5, 0.6]),
            Skyline::from_rows(
                vec![0.5],
                &[vec![0.1, 0.2], vec![0.3, 0.4]],
                TimeDirection::BeforePresent,
            )
            .unwrap(),
        )
        .migration(
            MigrationSkyline::new(
                vec![2.0],
                vec![dmatrix![9.0, 0.1; 0.2, 9.0], dmatrix![0.0, 0.3; 0.4, 0.0]],
                TimeDirection::SinceHorizon,
            )
            .unwrap(),
        )
        .rho(Some(
            RhoSampling::new(
                vec![0.0, 1.5],
                dmatrix![0.5, 0.0; 0.25, 0.75],
                TimeDirection::BeforePresent,
            )
            .unwrap(),
        ))
        .frequencies(&[0.3, 0.7])
        .build()
        .unwrap()
}

#[test]
fn schedules_resolve_against_global_intervals() {
    let model = RateModel::new(&skyline_params(), 3.0).unwrap();
    // Change times: birth 1.0, sampling 3.0 - 0.5, migration 2.0, rho 3.0 and 1.5.
    assert_eq!(model.intervals().end_times(), &[1.0, 1.5, 2.0, 2.5, 3.0]);
    assert_eq!(model.n_types(), 2);
    assert_eq!(model.horizon(), 3.0);

    assert_eq!(model.rate(RateKind::Birth, 0, 0), 1.0);
    assert_eq!(model.rate(RateKind::Birth, 0, 1), 2.0);
    assert_eq!(model.rate(RateKind::Birth, 1, 4), 4.0);
    assert_eq!(model.rate(RateKind::Death, 1, 2), 0.6);
    assert_eq!(model.rate(RateKind::Sampling, 0, 3), 0.2);
    assert_eq!(model.rate(RateKind::Sampling, 1, 4), 0.3);
    assert_eq!(model.rate(RateKind::Removal, 1, 4), 0.0);
}

#[test]
fn migration_diagonal_is_cleared() {
    let model = RateModel::new(&skyline_params(), 3.0).unwrap();
    assert_eq!(model.migration_rate(0, 0, 0), 0.0);
    assert_eq!(model.migration_rate(0, 1, 0), 0.1);
    assert_eq!(model.migration_rate(1, 0, 1), 0.2);
    assert_eq!(model.migration_rate(0, 1, 3), 0.3);
    assert_eq!(model.migration_rate(1, 0, 4), 0.4);
}

#[test]
fn rho_sits_at_the_end_of_its_interval() {
    let model = RateModel::new(&skyline_params(), 3.0).unwrap();
    // Sampling 1.5 before the present with a horizon 3.0 is at elapsed time 1.5.
    assert_eq!(model.rate(RateKind::Rho, 0, 1), 0.0);
    assert_eq!(model.rate(RateKind::Rho, 1, 1), 0.75);
    assert_eq!(model.rate(RateKind::Rho, 0, 4), 0.5);
    assert_eq!(model.rate(RateKind::Rho, 1, 4), 0.25);
    assert_eq!(model.rate(RateKind::Rho, 0, 2), 0.0);
    assert_eq!(model.present_survival(), vec![0.5, 0.75]);
}

#[test]
fn scheduled_samples() {
    let model = RateModel::new(&skyline_params(), 3.0).unwrap();
    assert_eq!(model.scheduled_sample(0, 3.0), Some(0.5));
    assert_eq!(model.scheduled_sample(1, 1.5), Some(0.75));
    // Probability 0 means the tip was sampled at the continuous rate.
    assert_eq!(model.scheduled_sample(0, 1.5), None);
    assert_eq!(model.scheduled_sample(0, 2.9), None);
}

#[test]
fn sampling_before_the_horizon_is_ignored() {
    let params = BdmmParamsBuilder::new(1)
        .birth_death_sampling(
            Skyline::constant(&[1.0]),
            Skyline::constant(&[0.5]),
            Skyline::constant(&[0.1]),
        )
        .rho(Some(
            RhoSampling::new(
                vec![0.0, 5.0],
                dmatrix![0.4, 0.9],
                TimeDirection::BeforePresent,
            )
            .unwrap(),
        ))
        .build()
        .unwrap();
    let model = RateModel::new(&params, 3.0).unwrap();
    assert_eq!(model.intervals().end_times(), &[3.0]);
    assert_eq!(model.present_survival(), vec![0.6]);
    assert_eq!(model.scheduled_sample(0, 3.0), Some(0.4));
    assert_eq!(model.scheduled_sample(0, -2.0), None);
    assert_eq!(model.scheduled_sample(0, 0.0), None);
}

#[test]
fn change_beyond_horizon_is_invalid() {
    let err = RateModel::new(&skyline_params(), 1.8).unwrap_err();
    assert_matches!(
        err.downcast_ref::<LikelihoodError>(),
        Some(LikelihoodError::InvalidParameters(_))
    );
}

#[test]
fn non_finite_rates_are_invalid() {
    let mut params = BdmmParamsBuilder::new(1)
        .epidemiological(
            Skyline::constant(&[2.0]),
            Skyline::constant(&[1.0]),
            Skyline::constant(&[0.5]),
        )
        .build()
        .unwrap();
    let model = RateModel::new(&params, 1.0).unwrap();
    assert_relative_eq!(model.rate(RateKind::Death, 0, 0), 0.5);
    params.rates = crate::parameters::RateParameterization::Canonical {
        birth: Skyline::constant(&[1.0]),
        death: Skyline::constant(&[f64::NAN]),
        sampling: Skyline::constant(&[0.5]),
    };
    let err = RateModel::new(&params, 1.0).unwrap_err();
    assert_matches!(
        err.downcast_ref::<LikelihoodError>(),
        Some(LikelihoodError::InvalidParameters(_))
    );
}

#[test]
fn no_rho_means_full_survival_at_present() {
    let params = BdmmParamsBuilder::new(1)
        .birth_death_sampling(
            Skyline::constant(&[1.0]),
            Skyline::constant(&[0.5]),
            Skyline::constant(&[0.1]),
        )
        .removal(Some(Skyline::constant(&[0.4])))
        .build()
        .unwrap();
    let model = RateModel::new(&params, 2.0).unwrap();
    assert!(!model.rho_sampling());
    assert!(model.sampled_ancestors());
    assert_eq!(model.present_survival(), vec![1.0]);
    assert_eq!(model.scheduled_sample(0, 2.0), None);
    assert_eq!(model.rate(RateKind::Removal, 0, 0), 0.4);
}
