#![allow(dead_code)]
/// this file is essentially a workaround for #[cfg(test)] like behaviour for the benchmarks
use std::{hint::black_box, time::Duration};

use criterion::Criterion;
use nalgebra::DMatrix;
use rand::rngs::StdRng;
use rand::SeedableRng;

use bdmm::likelihood::{BdmmLikelihood, BdmmLikelihoodBuilder};
use bdmm::parameters::{BdmmParamsBuilder, MigrationSkyline, NumericMode, Skyline};
use bdmm::tree::{random_typed_tree, TypedTree};

pub const SEED: u64 = 0xBD33;

/// Tree sizes as (leaves, types).
pub const SIZES: [(usize, usize); 5] = [(10, 2), (50, 2), (100, 3), (250, 3), (500, 4)];

pub fn black_box_random_tree(leaves: usize, n_types: usize) -> TypedTree {
    let mut rng = StdRng::seed_from_u64(SEED);
    black_box(random_typed_tree(&mut rng, leaves, n_types).expect("random tree should build"))
}

pub fn black_box_likelihood(n_types: usize, mode: NumericMode) -> BdmmLikelihood {
    let rates = |base: f64| {
        Skyline::constant(
            &(0..n_types)
                .map(|i| base * (1.0 + 0.1 * i as f64))
                .collect::<Vec<_>>(),
        )
    };
    let migration = DMatrix::from_fn(n_types, n_types, |i, j| if i == j { 0.0 } else { 0.2 });
    let params = BdmmParamsBuilder::new(n_types)
        .birth_death_sampling(rates(1.5), rates(0.4), rates(0.3))
        .migration(MigrationSkyline::constant(migration))
        .numeric_mode(mode)
        .build()
        .expect("bench parameters should be valid");
    black_box(
        BdmmLikelihoodBuilder::new(params)
            .build()
            .expect("failed to build likelihood"),
    )
}

pub fn setup_suite() -> Criterion {
    Criterion::default().measurement_time(Duration::from_secs(20))
}

/// empty on purpose, there are no benches here but the crate still needs
/// to be runnable otherwise criterion crashes
fn main() {}
