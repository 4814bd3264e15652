use anyhow::bail;
use log::trace;

use crate::likelihood::LikelihoodError;
use crate::rate_model::IntervalRates;
use crate::scaled_number::ldexp;
use crate::Result;

mod dormand_prince;
pub use dormand_prince::*;

/// Lower and upper binary exponent bounds for the largest density of a rescaled state.
pub(crate) const RESCALE_BOUND: i32 = 256;

/// The p0/ge master equations of one rate interval.
///
/// With `t` the elapsed time since the horizon and `m_ij` the rate of lineages of type `i`
/// moving to type `j`:
///
/// dp_i/dt = (l_i + mu_i + psi_i + sum_j m_ij) p_i - l_i p_i^2 - mu_i - sum_j m_ij p_j
///
/// dg_i/dt = (l_i + mu_i + psi_i + sum_j m_ij) g_i - 2 l_i p_i g_i
///
/// Densities are not coupled through migration, every type change on a typed tree is an
/// observed event handled outside of the equations.
pub struct PgSystem<'a> {
    rates: &'a IntervalRates,
    total_out: Vec<f64>,
}

impl<'a> PgSystem<'a> {
    pub fn new(rates: &'a IntervalRates) -> Self {
        let total_out = (0..rates.birth.len())
            .map(|i| {
                rates.birth[i]
                    + rates.death[i]
                    + rates.sampling[i]
                    + rates.migration.row(i).sum()
            })
            .collect();
        PgSystem { rates, total_out }
    }

    pub fn n_types(&self) -> usize {
        self.total_out.len()
    }

    /// Derivatives with respect to `t` of a state holding either the extinction
    /// probabilities only (`n` entries) or extinction probabilities followed by densities
    /// (`2n` entries).
    pub fn derivatives(&self, y: &[f64], dydt: &mut [f64]) {
        let n = self.n_types();
        let rates = self.rates;
        for i in 0..n {
            let p = y[i];
            let mut inflow = rates.death[i] + rates.birth[i] * p * p;
            for j in 0..n {
                inflow += rates.migration[(i, j)] * y[j];
            }
            dydt[i] = self.total_out[i] * p - inflow;
        }
        if y.len() == 2 * n {
            for i in 0..n {
                dydt[n + i] = (self.total_out[i] - 2.0 * rates.birth[i] * y[i]) * y[n + i];
            }
        }
    }
}

/// Propagates a state from `t_young` back to `t_old <= t_young` under one [`PgSystem`].
pub trait StateIntegrator: Send + Sync {
    /// Integrates in place and returns the number of right-hand side evaluations used.
    /// `on_step` is called after every accepted step and returns whether it changed the state.
    fn integrate_observed(
        &self,
        system: &PgSystem,
        y: &mut [f64],
        t_young: f64,
        t_old: f64,
        on_step: &mut dyn FnMut(&mut [f64]) -> bool,
    ) -> Result<usize>;

    fn integrate(&self, system: &PgSystem, y: &mut [f64], t_young: f64, t_old: f64) -> Result<usize> {
        self.integrate_observed(system, y, t_young, t_old, &mut |_| false)
    }

    /// Integrates a state whose densities are stored relative to the shared binary
    /// `exponent`. The densities are renormalised by exact powers of two whenever their
    /// largest magnitude leaves [2^-256, 2^256].
    fn integrate_rescaled(
        &self,
        system: &PgSystem,
        y: &mut [f64],
        exponent: &mut i32,
        t_young: f64,
        t_old: f64,
    ) -> Result<usize> {
        let n = system.n_types();
        rescale_densities(&mut y[n..], exponent);
        self.integrate_observed(system, y, t_young, t_old, &mut |state| {
            rescale_densities(&mut state[n..], exponent)
        })
    }
}

/// Shifts all densities by the same power of two if the largest one drifted out of range.
pub(crate) fn rescale_densities(g: &mut [f64], exponent: &mut i32) -> bool {
    let largest = g.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
    if largest == 0.0 || !largest.is_finite() {
        return false;
    }
    let (_, binary_exponent) = crate::scaled_number::frexp(largest);
    if (-RESCALE_BOUND..=RESCALE_BOUND).contains(&binary_exponent) {
        return false;
    }
    trace!("Rescaling densities by 2^{}.", -binary_exponent);
    for value in g.iter_mut() {
        *value = ldexp(*value, -binary_exponent);
    }
    *exponent = exponent.saturating_add(binary_exponent);
    true
}

/// Integrator work accumulated over one likelihood evaluation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IntegrationStats {
    /// Number of single-interval integrations.
    pub integrations: usize,
    /// Total number of right-hand side evaluations.
    pub evaluations: usize,
    /// Largest number of evaluations used by a single integration.
    pub max_evaluations: usize,
}

impl IntegrationStats {
    pub fn record(&mut self, evaluations: usize) {
        self.integrations += 1;
        self.evaluations += evaluations;
        self.max_evaluations = self.max_evaluations.max(evaluations);
    }

    pub fn merge(&mut self, other: &IntegrationStats) {
        self.integrations += other.integrations;
        self.evaluations += other.evaluations;
        self.max_evaluations = self.max_evaluations.max(other.max_evaluations);
    }
}

pub(crate) fn numerical_failure(message: String) -> Result<usize> {
    bail!(LikelihoodError::NumericalFailure(message))
}
