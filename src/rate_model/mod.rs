use anyhow::bail;
use log::debug;

use crate::intervals::{Intervals, TIME_TOLERANCE};
use crate::likelihood::LikelihoodError;
use crate::parameters::{BdmmParams, FreqVector, RateMatrix};
use crate::Result;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateKind {
    Birth,
    Death,
    Sampling,
    Removal,
    Rho,
}

/// Rates of all types within one interval.
#[derive(Clone, Debug, PartialEq)]
pub struct IntervalRates {
    pub birth: Vec<f64>,
    pub death: Vec<f64>,
    pub sampling: Vec<f64>,
    pub removal: Vec<f64>,
    /// Scheduled sampling probability at the end of the interval.
    pub rho: Vec<f64>,
    /// Migration rates with a zero diagonal, `migration[(from, to)]`.
    pub migration: RateMatrix,
}

impl IntervalRates {
    fn zeros(n_types: usize) -> Self {
        IntervalRates {
            birth: vec![0.0; n_types],
            death: vec![0.0; n_types],
            sampling: vec![0.0; n_types],
            removal: vec![0.0; n_types],
            rho: vec![0.0; n_types],
            migration: RateMatrix::zeros(n_types, n_types),
        }
    }

    fn all_finite_non_negative(&self) -> bool {
        self.birth
            .iter()
            .chain(&self.death)
            .chain(&self.sampling)
            .chain(&self.removal)
            .chain(&self.rho)
            .chain(self.migration.iter())
            .all(|&rate| rate.is_finite() && rate >= 0.0)
    }
}

/// All rates of the model resolved against one global interval partition for one horizon.
///
/// Built fresh for every likelihood evaluation and never mutated afterwards.
#[derive(Clone, Debug, PartialEq)]
pub struct RateModel {
    n_types: usize,
    intervals: Intervals,
    rates: Vec<IntervalRates>,
    rho_times: Vec<f64>,
    rho_sampling: bool,
    sampled_ancestors: bool,
    frequencies: FreqVector,
}

impl RateModel {
    /// Resolves every schedule of `params` against the union of their change times for a
    /// process starting `horizon` time units before the present.
    /// Bails with [`LikelihoodError::InvalidParameters`] if a change time lies beyond the
    /// horizon or the resulting rates are negative or not finite.
    pub fn new(params: &BdmmParams, horizon: f64) -> Result<Self> {
        let n = params.n_types;
        let intervals = Intervals::new(params.breakpoints(horizon), horizon)?;
        let mut rates = Vec::with_capacity(intervals.len());
        for interval in 0..intervals.len() {
            let time = (intervals.start(interval) + intervals.end(interval)) / 2.0;
            let mut interval_rates = IntervalRates::zeros(n);
            for node_type in 0..n {
                let removal = params
                    .removal
                    .as_ref()
                    .map_or(1.0, |removal| removal.value_at(node_type, time, horizon));
                let canonical = params
                    .rates
                    .canonical_at(node_type, time, horizon, removal);
                interval_rates.birth[node_type] = canonical.birth;
                interval_rates.death[node_type] = canonical.death;
                interval_rates.sampling[node_type] = canonical.sampling;
                if params.removal.is_some() {
                    interval_rates.removal[node_type] = removal;
                }
            }
            interval_rates
                .migration
                .copy_from(params.migration.matrix_at(time, horizon));
            interval_rates.migration.fill_diagonal(0.0);
            rates.push(interval_rates);
        }

        let mut rho_times = Vec::new();
        if let Some(rho) = &params.rho {
            for (event, time) in rho.times_since_horizon(horizon).enumerate() {
                if time < -TIME_TOLERANCE {
                    debug!("Ignoring scheduled sampling before the horizon (time {time}).");
                    continue;
                }
                if time <= TIME_TOLERANCE {
                    debug!("Ignoring scheduled sampling at the horizon (time {time}).");
                    continue;
                }
                let interval = intervals.index_of(time - TIME_TOLERANCE);
                for node_type in 0..n {
                    rates[interval].rho[node_type] = rho.probabilities()[(node_type, event)];
                }
                rho_times.push(time);
            }
        }

        if let Some(interval) = rates.iter().position(|r| !r.all_finite_non_negative()) {
            bail!(LikelihoodError::InvalidParameters(format!(
                "Negative or non-finite rates in interval {} ending at {}.",
                interval,
                intervals.end(interval)
            )));
        }

        Ok(RateModel {
            n_types: n,
            intervals,
            rates,
            rho_times,
            rho_sampling: params.rho.is_some(),
            sampled_ancestors: params.sampled_ancestors(),
            frequencies: params.frequencies.clone(),
        })
    }

    pub fn n_types(&self) -> usize {
        self.n_types
    }

    pub fn horizon(&self) -> f64 {
        self.intervals.horizon()
    }

    pub fn intervals(&self) -> &Intervals {
        &self.intervals
    }

    pub fn interval_of(&self, time: f64) -> usize {
        self.intervals.index_of(time)
    }

    pub fn interval_rates(&self, interval: usize) -> &IntervalRates {
        &self.rates[interval]
    }

    pub fn rate(&self, kind: RateKind, node_type: usize, interval: usize) -> f64 {
        let rates = &self.rates[interval];
        match kind {
            RateKind::Birth => rates.birth[node_type],
            RateKind::Death => rates.death[node_type],
            RateKind::Sampling => rates.sampling[node_type],
            RateKind::Removal => rates.removal[node_type],
            RateKind::Rho => rates.rho[node_type],
        }
    }

    pub fn migration_rate(&self, from: usize, to: usize, interval: usize) -> f64 {
        self.rates[interval].migration[(from, to)]
    }

    pub fn frequencies(&self) -> &FreqVector {
        &self.frequencies
    }

    pub fn rho_sampling(&self) -> bool {
        self.rho_sampling
    }

    pub fn sampled_ancestors(&self) -> bool {
        self.sampled_ancestors
    }

    /// Probability that a lineage of every type alive at the present escapes the final
    /// scheduled sampling event.
    pub fn present_survival(&self) -> Vec<f64> {
        let last = self.rates.len() - 1;
        (0..self.n_types)
            .map(|node_type| {
                if self.rho_sampling {
                    1.0 - self.rates[last].rho[node_type]
                } else {
                    1.0
                }
            })
            .collect()
    }

    /// Sampling probability of a tip of `node_type` at `time` if the tip falls on a scheduled
    /// sampling event of its type, `None` if it was sampled at the continuous rate.
    pub fn scheduled_sample(&self, node_type: usize, time: f64) -> Option<f64> {
        if !self.rho_sampling {
            return None;
        }
        self.rho_times
            .iter()
            .find(|&&rho_time| (rho_time - time).abs() < TIME_TOLERANCE)
            .map(|&rho_time| {
                self.rate(
                    RateKind::Rho,
                    node_type,
                    self.intervals.index_of(rho_time - TIME_TOLERANCE),
                )
            })
            .filter(|&rho| rho > 0.0)
    }
}

#[cfg(test)]
mod tests;
