use anyhow::bail;
use log::info;

use crate::parameters::{
    BdmmParams, FreqVector, MigrationSkyline, NumericMode, RateParameterization, RhoSampling,
    Skyline,
};
use crate::Result;

pub struct BdmmParamsBuilder {
    n_types: usize,
    rates: Option<RateParameterization>,
    removal: Option<Skyline>,
    migration: Option<MigrationSkyline>,
    rho: Option<RhoSampling>,
    frequencies: Option<FreqVector>,
    condition_on_survival: bool,
    numeric_mode: NumericMode,
    check_rho: bool,
}

impl BdmmParamsBuilder {
    /// Creates a builder for a model with `n_types` types. Survival conditioning and the rho
    /// check are on and densities are plain doubles unless configured otherwise.
    ///
    /// # Example
    /// ```
    /// use bdmm::parameters::{BdmmParamsBuilder, Skyline};
    /// let params = BdmmParamsBuilder::new(1)
    ///     .birth_death_sampling(
    ///         Skyline::constant(&[1.5]),
    ///         Skyline::constant(&[0.4]),
    ///         Skyline::constant(&[0.3]),
    ///     )
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(params.frequencies.as_slice(), &[1.0]);
    /// ```
    pub fn new(n_types: usize) -> Self {
        BdmmParamsBuilder {
            n_types,
            rates: None,
            removal: None,
            migration: None,
            rho: None,
            frequencies: None,
            condition_on_survival: true,
            numeric_mode: NumericMode::Plain,
            check_rho: true,
        }
    }

    pub fn birth_death_sampling(mut self, birth: Skyline, death: Skyline, sampling: Skyline) -> Self {
        self.rates = Some(RateParameterization::Canonical {
            birth,
            death,
            sampling,
        });
        self
    }

    pub fn epidemiological(
        mut self,
        reproductive_number: Skyline,
        become_uninfectious: Skyline,
        sampling_proportion: Skyline,
    ) -> Self {
        self.rates = Some(RateParameterization::Epidemiological {
            reproductive_number,
            become_uninfectious,
            sampling_proportion,
        });
        self
    }

    pub fn removal(mut self, removal: Option<Skyline>) -> Self {
        self.removal = removal;
        self
    }

    pub fn migration(mut self, migration: MigrationSkyline) -> Self {
        self.migration = Some(migration);
        self
    }

    pub fn rho(mut self, rho: Option<RhoSampling>) -> Self {
        self.rho = rho;
        self
    }

    pub fn frequencies(mut self, frequencies: &[f64]) -> Self {
        self.frequencies = Some(FreqVector::from_column_slice(frequencies));
        self
    }

    pub fn condition_on_survival(mut self, condition: bool) -> Self {
        self.condition_on_survival = condition;
        self
    }

    pub fn numeric_mode(mut self, mode: NumericMode) -> Self {
        self.numeric_mode = mode;
        self
    }

    pub fn check_rho(mut self, check: bool) -> Self {
        self.check_rho = check;
        self
    }

    /// Builds and validates the parameters. Missing migration rates default to none,
    /// missing root type frequencies to the uniform distribution.
    /// Bails if no birth, death and sampling rates were given, or if any dimension or value
    /// is inconsistent.
    pub fn build(self) -> Result<BdmmParams> {
        let Some(rates) = self.rates else {
            bail!("Birth, death and sampling rates have to be specified.");
        };
        let frequencies = match self.frequencies {
            Some(frequencies) => frequencies,
            None => {
                info!("No root type frequencies given, using uniform frequencies.");
                FreqVector::from_element(self.n_types, 1.0 / self.n_types.max(1) as f64)
            }
        };
        let params = BdmmParams {
            n_types: self.n_types,
            rates,
            removal: self.removal,
            migration: self
                .migration
                .unwrap_or_else(|| MigrationSkyline::none(self.n_types)),
            rho: self.rho,
            frequencies,
            condition_on_survival: self.condition_on_survival,
            numeric_mode: self.numeric_mode,
            check_rho: self.check_rho,
        };
        params.validate()?;
        info!(
            "Set up birth-death-migration parameters for {} types ({} numerics).",
            params.n_types, params.numeric_mode
        );
        Ok(params)
    }
}
