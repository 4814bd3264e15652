use approx::assert_relative_eq;
use nalgebra::dmatrix;
use rstest::*;

use crate::parameters::{
    BdmmParamsBuilder, Epochs, MigrationSkyline, NumericMode, RateParameterization, RhoSampling,
    Skyline, TimeDirection,
};

fn two_type_builder() -> BdmmParamsBuilder {
    BdmmParamsBuilder::new(2).birth_death_sampling(
        Skyline::constant(&[1.0, 2.0]),
        Skyline::constant(&[0.5, 0.5]),
        Skyline::constant(&[0.1, 0.2]),
    )
}

#[test]
fn builder_defaults() {
    let params = two_type_builder().build().unwrap();
    assert_eq!(params.n_types, 2);
    assert_eq!(params.frequencies.as_slice(), &[0.5, 0.5]);
    assert!(params.condition_on_survival);
    assert!(params.check_rho);
    assert_eq!(params.numeric_mode, NumericMode::Plain);
    assert!(!params.sampled_ancestors());
    assert!(params.migration.rates()[0].iter().all(|&m| m == 0.0));
}

#[test]
fn builder_requires_rates() {
    assert!(BdmmParamsBuilder::new(2).build().is_err());
}

#[rstest]
#[case::wrong_type_count(two_type_builder().frequencies(&[1.0]))]
#[case::frequencies_not_normalised(two_type_builder().frequencies(&[0.5, 0.6]))]
#[case::negative_frequency(two_type_builder().frequencies(&[1.5, -0.5]))]
#[case::migration_dimension(two_type_builder().migration(MigrationSkyline::none(3)))]
#[case::negative_migration(two_type_builder().migration(MigrationSkyline::constant(dmatrix![0.0, -1.0; 1.0, 0.0])))]
#[case::removal_above_one(two_type_builder().removal(Some(Skyline::constant(&[1.2, 0.5]))))]
#[case::rho_dimension(two_type_builder().rho(Some(RhoSampling::at_present(&[0.5]))))]
#[case::rho_above_one(two_type_builder().rho(Some(RhoSampling::at_present(&[0.5, 1.5]))))]
fn builder_rejects_invalid(#[case] builder: BdmmParamsBuilder) {
    assert!(builder.build().is_err());
}

#[test]
fn builder_rejects_mismatched_rates() {
    let builder = BdmmParamsBuilder::new(2).birth_death_sampling(
        Skyline::constant(&[1.0]),
        Skyline::constant(&[0.5, 0.5]),
        Skyline::constant(&[0.1, 0.2]),
    );
    assert!(builder.build().is_err());
    let builder = BdmmParamsBuilder::new(1).birth_death_sampling(
        Skyline::constant(&[-1.0]),
        Skyline::constant(&[0.5]),
        Skyline::constant(&[0.1]),
    );
    assert!(builder.build().is_err());
}

#[test]
fn epochs_reject_unordered_change_times() {
    assert!(Epochs::new(vec![1.0, 1.0], TimeDirection::SinceHorizon).is_err());
    assert!(Epochs::new(vec![2.0, 1.0], TimeDirection::SinceHorizon).is_err());
    assert!(Epochs::new(vec![-1.0], TimeDirection::SinceHorizon).is_err());
    assert!(Epochs::new(vec![0.5, 1.0], TimeDirection::BeforePresent).is_ok());
}

#[test]
fn skyline_epochs_since_horizon() {
    let skyline = Skyline::from_rows(
        vec![1.0, 2.0],
        &[vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]],
        TimeDirection::SinceHorizon,
    )
    .unwrap();
    assert_eq!(skyline.n_types(), 2);
    assert_eq!(skyline.value_at(0, 0.5, 10.0), 1.0);
    assert_eq!(skyline.value_at(0, 1.5, 10.0), 2.0);
    assert_eq!(skyline.value_at(1, 9.0, 10.0), 6.0);
    assert_eq!(
        skyline.epochs().breakpoints(10.0).collect::<Vec<_>>(),
        vec![1.0, 2.0]
    );
}

#[test]
fn skyline_epochs_before_present() {
    let skyline = Skyline::from_rows(
        vec![1.0, 2.0],
        &[vec![1.0, 2.0, 3.0]],
        TimeDirection::BeforePresent,
    )
    .unwrap();
    // Elapsed time 9.5 since a horizon at 10 is half a time unit before the present.
    assert_eq!(skyline.value_at(0, 9.5, 10.0), 1.0);
    assert_eq!(skyline.value_at(0, 8.5, 10.0), 2.0);
    assert_eq!(skyline.value_at(0, 0.5, 10.0), 3.0);
    assert_eq!(
        skyline.epochs().breakpoints(10.0).collect::<Vec<_>>(),
        vec![9.0, 8.0]
    );
}

#[test]
fn skyline_value_count_must_match_epochs() {
    assert!(Skyline::from_rows(vec![1.0], &[vec![1.0]], TimeDirection::SinceHorizon).is_err());
    assert!(Skyline::from_rows(vec![], &[vec![1.0], vec![1.0, 2.0]], TimeDirection::SinceHorizon).is_err());
}

#[test]
fn epidemiological_transform() {
    let rates = RateParameterization::Epidemiological {
        reproductive_number: Skyline::constant(&[2.0]),
        become_uninfectious: Skyline::constant(&[1.5]),
        sampling_proportion: Skyline::constant(&[0.2]),
    };
    let canonical = rates.canonical_at(0, 0.5, 1.0, 1.0);
    assert_relative_eq!(canonical.birth, 3.0);
    assert_relative_eq!(canonical.sampling, 0.3);
    assert_relative_eq!(canonical.death, 1.2);

    let canonical = rates.canonical_at(0, 0.5, 1.0, 0.5);
    let sampling = 0.2 * 1.5 / (1.0 - 0.5 * 0.2);
    assert_relative_eq!(canonical.sampling, sampling);
    assert_relative_eq!(canonical.death, 1.5 - 0.5 * sampling);
}

#[test]
fn ancestors_can_be_sampled_only_without_full_removal() {
    let params = two_type_builder()
        .removal(Some(Skyline::constant(&[1.0, 1.0])))
        .build()
        .unwrap();
    assert!(params.sampled_ancestors());
    assert!(!params.ancestors_can_be_sampled());
    let params = two_type_builder()
        .removal(Some(Skyline::constant(&[1.0, 0.3])))
        .build()
        .unwrap();
    assert!(params.ancestors_can_be_sampled());
}

#[test]
fn breakpoints_of_all_schedules() {
    let params = BdmmParamsBuilder::new(1)
        .birth_death_sampling(
            Skyline::from_rows(vec![1.0], &[vec![1.0, 2.0]], TimeDirection::SinceHorizon).unwrap(),
            Skyline::constant(&[0.5]),
            Skyline::from_rows(vec![1.0], &[vec![0.1, 0.2]], TimeDirection::BeforePresent).unwrap(),
        )
        .rho(Some(RhoSampling::at_present(&[0.5])))
        .build()
        .unwrap();
    let mut breakpoints = params.breakpoints(4.0);
    breakpoints.sort_by(f64::total_cmp);
    assert_eq!(breakpoints, vec![1.0, 3.0, 4.0]);
}
