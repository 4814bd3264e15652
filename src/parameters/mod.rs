use std::fmt::Display;

use anyhow::bail;
use log::warn;
use nalgebra::{DMatrix, DVector};

use crate::Result;

mod params_builder;
pub use params_builder::*;

pub type FreqVector = DVector<f64>;
pub type RateMatrix = DMatrix<f64>;

#[macro_export]
macro_rules! frequencies {
    ($slice:expr) => {
        $crate::parameters::FreqVector::from_column_slice($slice)
    };
}

/// How the change times of a schedule are measured.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TimeDirection {
    /// Elapsed time since the horizon (root or origin), epoch 0 is the oldest one.
    #[default]
    SinceHorizon,
    /// Time before the present (node heights), epoch 0 is the most recent one.
    BeforePresent,
}

impl Display for TimeDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeDirection::SinceHorizon => write!(f, "since horizon"),
            TimeDirection::BeforePresent => write!(f, "before present"),
        }
    }
}

impl TimeDirection {
    /// Converts a time in this direction to elapsed time since the horizon and back.
    pub fn since_horizon(&self, time: f64, horizon: f64) -> f64 {
        match self {
            TimeDirection::SinceHorizon => time,
            TimeDirection::BeforePresent => horizon - time,
        }
    }
}

/// Change times shared by all values of one schedule.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct Epochs {
    change_times: Vec<f64>,
    direction: TimeDirection,
}

impl Epochs {
    pub fn new(change_times: Vec<f64>, direction: TimeDirection) -> Result<Self> {
        if change_times.iter().any(|t| !t.is_finite() || *t < 0.0) {
            bail!("Change times must be finite and non-negative, got {change_times:?}.");
        }
        if change_times.windows(2).any(|w| w[0] >= w[1]) {
            bail!("Change times must be strictly increasing, got {change_times:?}.");
        }
        Ok(Epochs {
            change_times,
            direction,
        })
    }

    pub fn count(&self) -> usize {
        self.change_times.len() + 1
    }

    pub fn change_times(&self) -> &[f64] {
        &self.change_times
    }

    pub fn direction(&self) -> TimeDirection {
        self.direction
    }

    /// Change times as elapsed times since the horizon.
    pub fn breakpoints(&self, horizon: f64) -> impl Iterator<Item = f64> + '_ {
        self.change_times
            .iter()
            .map(move |&t| self.direction.since_horizon(t, horizon))
    }

    /// Epoch containing `time` (elapsed since the horizon). Meant to be queried away from the
    /// change times themselves, e.g. at interval midpoints.
    pub fn epoch_at(&self, time: f64, horizon: f64) -> usize {
        let time = self.direction.since_horizon(time, horizon);
        self.change_times.partition_point(|&change| change < time)
    }
}

/// Piecewise-constant per-type rate schedule, `values[(type, epoch)]`.
#[derive(Clone, Debug, PartialEq)]
pub struct Skyline {
    epochs: Epochs,
    values: RateMatrix,
}

impl Skyline {
    pub fn constant(values: &[f64]) -> Self {
        Skyline {
            epochs: Epochs::default(),
            values: RateMatrix::from_column_slice(values.len(), 1, values),
        }
    }

    pub fn new(change_times: Vec<f64>, values: RateMatrix, direction: TimeDirection) -> Result<Self> {
        let epochs = Epochs::new(change_times, direction)?;
        if values.ncols() != epochs.count() {
            bail!(
                "Expected {} epochs of values for {} change times, got {}.",
                epochs.count(),
                epochs.change_times.len(),
                values.ncols()
            );
        }
        Ok(Skyline { epochs, values })
    }

    /// Builds a schedule from per-type rows, `rows[type][epoch]`.
    pub fn from_rows(
        change_times: Vec<f64>,
        rows: &[Vec<f64>],
        direction: TimeDirection,
    ) -> Result<Self> {
        let n_epochs = rows.first().map_or(0, |row| row.len());
        if rows.iter().any(|row| row.len() != n_epochs) {
            bail!("All types need the same number of epochs.");
        }
        let values = RateMatrix::from_fn(rows.len(), n_epochs, |i, j| rows[i][j]);
        Self::new(change_times, values, direction)
    }

    pub fn n_types(&self) -> usize {
        self.values.nrows()
    }

    pub fn epochs(&self) -> &Epochs {
        &self.epochs
    }

    pub fn values(&self) -> &RateMatrix {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut RateMatrix {
        &mut self.values
    }

    pub fn value_at(&self, node_type: usize, time: f64, horizon: f64) -> f64 {
        self.values[(node_type, self.epochs.epoch_at(time, horizon))]
    }
}

/// Piecewise-constant migration rates, one `types x types` matrix per epoch with
/// `rates[epoch][(from, to)]` the rate of lineages of type `from` moving to type `to`.
#[derive(Clone, Debug, PartialEq)]
pub struct MigrationSkyline {
    epochs: Epochs,
    rates: Vec<RateMatrix>,
}

impl MigrationSkyline {
    pub fn constant(rates: RateMatrix) -> Self {
        MigrationSkyline {
            epochs: Epochs::default(),
            rates: vec![rates],
        }
    }

    pub fn none(n_types: usize) -> Self {
        Self::constant(RateMatrix::zeros(n_types, n_types))
    }

    pub fn new(
        change_times: Vec<f64>,
        rates: Vec<RateMatrix>,
        direction: TimeDirection,
    ) -> Result<Self> {
        let epochs = Epochs::new(change_times, direction)?;
        if rates.len() != epochs.count() {
            bail!(
                "Expected {} migration matrices, got {}.",
                epochs.count(),
                rates.len()
            );
        }
        Ok(MigrationSkyline { epochs, rates })
    }

    pub fn n_types(&self) -> usize {
        self.rates.first().map_or(0, |m| m.nrows())
    }

    pub fn epochs(&self) -> &Epochs {
        &self.epochs
    }

    pub fn rates(&self) -> &[RateMatrix] {
        &self.rates
    }

    pub fn rates_mut(&mut self) -> &mut [RateMatrix] {
        &mut self.rates
    }

    pub fn matrix_at(&self, time: f64, horizon: f64) -> &RateMatrix {
        &self.rates[self.epochs.epoch_at(time, horizon)]
    }
}

/// Scheduled sampling events, `probabilities[(type, event)]` is the probability that a
/// lineage of that type alive at `times[event]` is sampled.
#[derive(Clone, Debug, PartialEq)]
pub struct RhoSampling {
    times: Vec<f64>,
    direction: TimeDirection,
    probabilities: RateMatrix,
}

impl RhoSampling {
    /// A single sampling event at the present.
    pub fn at_present(probabilities: &[f64]) -> Self {
        RhoSampling {
            times: vec![0.0],
            direction: TimeDirection::BeforePresent,
            probabilities: RateMatrix::from_column_slice(probabilities.len(), 1, probabilities),
        }
    }

    pub fn new(times: Vec<f64>, probabilities: RateMatrix, direction: TimeDirection) -> Result<Self> {
        let epochs = Epochs::new(times, direction)?;
        if probabilities.ncols() != epochs.change_times.len() {
            bail!(
                "Expected sampling probabilities for {} sampling times, got {}.",
                epochs.change_times.len(),
                probabilities.ncols()
            );
        }
        Ok(RhoSampling {
            times: epochs.change_times,
            direction,
            probabilities,
        })
    }

    pub fn n_types(&self) -> usize {
        self.probabilities.nrows()
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn direction(&self) -> TimeDirection {
        self.direction
    }

    pub fn probabilities(&self) -> &RateMatrix {
        &self.probabilities
    }

    /// Sampling times as elapsed times since the horizon.
    pub fn times_since_horizon(&self, horizon: f64) -> impl Iterator<Item = f64> + '_ {
        self.times
            .iter()
            .map(move |&t| self.direction.since_horizon(t, horizon))
    }
}

/// How birth, death and sampling rates are specified.
#[derive(Clone, Debug, PartialEq)]
pub enum RateParameterization {
    Canonical {
        birth: Skyline,
        death: Skyline,
        sampling: Skyline,
    },
    /// Epidemiological parameters: basic reproductive number R0, the rate of becoming
    /// uninfectious delta and the sampling proportion s.
    Epidemiological {
        reproductive_number: Skyline,
        become_uninfectious: Skyline,
        sampling_proportion: Skyline,
    },
}

/// Birth, death and sampling rate of one type at one point in time.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CanonicalRates {
    pub birth: f64,
    pub death: f64,
    pub sampling: f64,
}

impl RateParameterization {
    pub(crate) fn schedules(&self) -> [&Skyline; 3] {
        match self {
            RateParameterization::Canonical {
                birth,
                death,
                sampling,
            } => [birth, death, sampling],
            RateParameterization::Epidemiological {
                reproductive_number,
                become_uninfectious,
                sampling_proportion,
            } => [reproductive_number, become_uninfectious, sampling_proportion],
        }
    }

    /// Canonical rates of `node_type` at `time`, given the removal probability in effect.
    ///
    /// For the epidemiological form: birth = R0 * delta, sampling = s * delta / (1 + (r - 1) s)
    /// and death = delta - sampling * r, which reduces to the usual sampling = s * delta,
    /// death = delta - sampling when every sample is removed (r = 1).
    pub fn canonical_at(
        &self,
        node_type: usize,
        time: f64,
        horizon: f64,
        removal: f64,
    ) -> CanonicalRates {
        match self {
            RateParameterization::Canonical {
                birth,
                death,
                sampling,
            } => CanonicalRates {
                birth: birth.value_at(node_type, time, horizon),
                death: death.value_at(node_type, time, horizon),
                sampling: sampling.value_at(node_type, time, horizon),
            },
            RateParameterization::Epidemiological {
                reproductive_number,
                become_uninfectious,
                sampling_proportion,
            } => {
                let r0 = reproductive_number.value_at(node_type, time, horizon);
                let delta = become_uninfectious.value_at(node_type, time, horizon);
                let s = sampling_proportion.value_at(node_type, time, horizon);
                let sampling = s * delta / (1.0 + (removal - 1.0) * s);
                CanonicalRates {
                    birth: r0 * delta,
                    death: delta - sampling * removal,
                    sampling,
                }
            }
        }
    }
}

/// Numeric representation of likelihood densities during one evaluation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum NumericMode {
    /// Plain `f64` densities, fastest but may underflow on large trees.
    #[default]
    Plain,
    /// [`crate::scaled_number::ScaledNumber`] densities that cannot underflow.
    Scaled,
}

impl Display for NumericMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NumericMode::Plain => write!(f, "plain"),
            NumericMode::Scaled => write!(f, "scaled"),
        }
    }
}

/// Full parameter state of the multi-type birth-death-migration model.
#[derive(Clone, Debug, PartialEq)]
pub struct BdmmParams {
    pub n_types: usize,
    pub rates: RateParameterization,
    /// Removal probability upon sampling; switches on the sampled-ancestor model when set.
    pub removal: Option<Skyline>,
    pub migration: MigrationSkyline,
    pub rho: Option<RhoSampling>,
    pub frequencies: FreqVector,
    pub condition_on_survival: bool,
    pub numeric_mode: NumericMode,
    pub check_rho: bool,
}

impl BdmmParams {
    pub fn sampled_ancestors(&self) -> bool {
        self.removal.is_some()
    }

    /// Whether the sampled-ancestor model is on and some sample may stay in the population.
    pub fn ancestors_can_be_sampled(&self) -> bool {
        self.removal
            .as_ref()
            .is_some_and(|removal| removal.values().iter().any(|&r| r != 1.0))
    }

    /// Change times of all schedules, as elapsed times since the horizon.
    pub fn breakpoints(&self, horizon: f64) -> Vec<f64> {
        let mut breakpoints: Vec<f64> = self
            .rates
            .schedules()
            .into_iter()
            .flat_map(|skyline| skyline.epochs().breakpoints(horizon))
            .chain(self.migration.epochs().breakpoints(horizon))
            .collect();
        if let Some(removal) = &self.removal {
            breakpoints.extend(removal.epochs().breakpoints(horizon));
        }
        if let Some(rho) = &self.rho {
            breakpoints.extend(rho.times_since_horizon(horizon));
        }
        breakpoints
    }

    pub(crate) fn validate(&self) -> Result<()> {
        let n = self.n_types;
        if n == 0 {
            bail!("At least one type is required.");
        }
        for skyline in self.rates.schedules() {
            check_skyline(skyline, n, "rate")?;
        }
        if let RateParameterization::Epidemiological {
            sampling_proportion,
            ..
        } = &self.rates
        {
            check_probabilities(sampling_proportion.values(), "Sampling proportions")?;
        }
        if let Some(removal) = &self.removal {
            check_skyline(removal, n, "removal probability")?;
            check_probabilities(removal.values(), "Removal probabilities")?;
        }
        if self.migration.n_types() != n {
            bail!(
                "Migration matrices are for {} types, expected {}.",
                self.migration.n_types(),
                n
            );
        }
        for matrix in self.migration.rates() {
            if matrix.nrows() != n || matrix.ncols() != n {
                bail!("Migration matrices must be {n}x{n}.");
            }
            if matrix.iter().any(|&m| !m.is_finite() || m < 0.0) {
                bail!("Migration rates must be finite and non-negative.");
            }
        }
        if let Some(rho) = &self.rho {
            if rho.n_types() != n {
                bail!(
                    "Sampling probabilities are given for {} types, expected {}.",
                    rho.n_types(),
                    n
                );
            }
            check_probabilities(rho.probabilities(), "Sampling probabilities")?;
            if rho.probabilities().iter().all(|&p| p == 0.0) {
                warn!("All scheduled sampling probabilities are 0.");
            }
        }
        if self.frequencies.len() != n {
            bail!(
                "Expected {} root type frequencies, got {}.",
                n,
                self.frequencies.len()
            );
        }
        if self.frequencies.iter().any(|&f| !f.is_finite() || f < 0.0) {
            bail!("Root type frequencies must be non-negative.");
        }
        if (self.frequencies.sum() - 1.0).abs() > 1e-6 {
            bail!(
                "Root type frequencies must sum to 1, got {}.",
                self.frequencies.sum()
            );
        }
        Ok(())
    }
}

fn check_skyline(skyline: &Skyline, n_types: usize, name: &str) -> Result<()> {
    if skyline.n_types() != n_types {
        bail!(
            "The {} schedule has values for {} types, expected {}.",
            name,
            skyline.n_types(),
            n_types
        );
    }
    if skyline.values().iter().any(|&v| !v.is_finite() || v < 0.0) {
        bail!("The {name} schedule has negative or non-finite values.");
    }
    Ok(())
}

fn check_probabilities(values: &RateMatrix, name: &str) -> Result<()> {
    if values.iter().any(|&v| !(0.0..=1.0).contains(&v)) {
        bail!("{name} must lie in [0, 1].");
    }
    Ok(())
}

#[cfg(test)]
mod tests;
