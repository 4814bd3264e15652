use std::cell::Cell;
use std::error::Error;
use std::f64::consts::LN_2;
use std::fmt;

use anyhow::bail;
use log::{debug, info};

use crate::density::Density;
use crate::ode::{DormandPrince, IntegrationStats, StateIntegrator};
use crate::parameters::{BdmmParams, NumericMode};
use crate::rate_model::RateModel;
use crate::scaled_number::ScaledNumber;
use crate::tree::{OriginBranch, TypedTree};
use crate::Result;

mod origin;
mod recursion;
pub use recursion::LineageEvent;
use recursion::Recursion;

pub const SURVIVAL_TOLERANCE: f64 = 1e-14;

#[derive(Debug, Clone, PartialEq)]
pub enum LikelihoodError {
    InvalidTree(String),
    InvalidParameters(String),
    DegenerateConditioning(String),
    NumericalFailure(String),
}

impl fmt::Display for LikelihoodError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LikelihoodError::InvalidTree(message) => write!(f, "Invalid tree: {message}"),
            LikelihoodError::InvalidParameters(message) => {
                write!(f, "Invalid parameters: {message}")
            }
            LikelihoodError::DegenerateConditioning(message) => {
                write!(f, "Degenerate survival conditioning: {message}")
            }
            LikelihoodError::NumericalFailure(message) => {
                write!(f, "Numerical failure: {message}")
            }
        }
    }
}

impl Error for LikelihoodError {}

pub struct BdmmLikelihoodBuilder<I: StateIntegrator = DormandPrince> {
    params: BdmmParams,
    integrator: I,
    contemporaneous_tips: Option<usize>,
}

impl BdmmLikelihoodBuilder<DormandPrince> {
    pub fn new(params: BdmmParams) -> Self {
        BdmmLikelihoodBuilder {
            params,
            integrator: DormandPrince::default(),
            contemporaneous_tips: None,
        }
    }
}

impl<I: StateIntegrator> BdmmLikelihoodBuilder<I> {
    pub fn integrator<J: StateIntegrator>(self, integrator: J) -> BdmmLikelihoodBuilder<J> {
        BdmmLikelihoodBuilder {
            params: self.params,
            integrator,
            contemporaneous_tips: self.contemporaneous_tips,
        }
    }

    pub fn tree(mut self, tree: &TypedTree) -> Self {
        self.contemporaneous_tips = Some(tree.contemporaneous_tips());
        self
    }

    /// Bails if the tree given to [`BdmmLikelihoodBuilder::tree`] has several tips at the
    /// present but no scheduled sampling is configured and the rho check is on.
    pub fn build(self) -> Result<BdmmLikelihood<I>> {
        if let Some(tips) = self.contemporaneous_tips {
            check_rho(&self.params, tips)?;
        }
        info!(
            "Set up the likelihood for {} types with {} densities.",
            self.params.n_types, self.params.numeric_mode
        );
        Ok(BdmmLikelihood {
            params: self.params,
            integrator: self.integrator,
            max_evals_used: Cell::new(0),
            last_stats: Cell::new(IntegrationStats::default()),
        })
    }
}

fn check_rho(params: &BdmmParams, contemporaneous_tips: usize) -> Result<()> {
    if params.check_rho && params.rho.is_none() && contemporaneous_tips > 1 {
        bail!(LikelihoodError::InvalidParameters(format!(
            "The tree has {contemporaneous_tips} tips at the present but no sampling \
             probability at the present is set."
        )));
    }
    Ok(())
}

/// Log-likelihood of typed trees under the multi-type birth-death-migration model.
///
/// # Example
/// ```
/// use bdmm::likelihood::BdmmLikelihoodBuilder;
/// use bdmm::parameters::{BdmmParamsBuilder, Skyline};
/// use bdmm::tree::from_typed_newick;
///
/// let tree = &from_typed_newick("(A[&type=0]:1.0,B[&type=0]:0.5)[&type=0];").unwrap()[0];
/// let params = BdmmParamsBuilder::new(1)
///     .birth_death_sampling(
///         Skyline::constant(&[1.5]),
///         Skyline::constant(&[0.4]),
///         Skyline::constant(&[0.3]),
///     )
///     .build()
///     .unwrap();
/// let likelihood = BdmmLikelihoodBuilder::new(params).tree(tree).build().unwrap();
/// assert!(likelihood.log_likelihood(tree, None).is_finite());
/// ```
#[derive(Debug)]
pub struct BdmmLikelihood<I: StateIntegrator = DormandPrince> {
    params: BdmmParams,
    integrator: I,
    max_evals_used: Cell<usize>,
    last_stats: Cell<IntegrationStats>,
}

impl<I: StateIntegrator> BdmmLikelihood<I> {
    pub fn params(&self) -> &BdmmParams {
        &self.params
    }

    pub fn integrator(&self) -> &I {
        &self.integrator
    }

    pub fn set_params(&mut self, params: BdmmParams) -> Result<()> {
        params.validate()?;
        self.params = params;
        Ok(())
    }

    pub fn check_tree(&self, tree: &TypedTree) -> Result<()> {
        check_rho(&self.params, tree.contemporaneous_tips())
    }

    pub fn max_evals_used(&self) -> usize {
        self.max_evals_used.get()
    }

    pub fn last_stats(&self) -> IntegrationStats {
        self.last_stats.get()
    }

    /// Log-likelihood of `tree` with an optional origin branch above its root. Inadmissible
    /// combinations of tree and parameters give `f64::NEG_INFINITY`.
    pub fn log_likelihood(&self, tree: &TypedTree, origin: Option<&OriginBranch>) -> f64 {
        match self.try_log_likelihood(tree, origin) {
            Ok(log_likelihood) => log_likelihood,
            Err(error) => {
                debug!("Rejecting evaluation: {error}");
                f64::NEG_INFINITY
            }
        }
    }

    pub fn try_log_likelihood(&self, tree: &TypedTree, origin: Option<&OriginBranch>) -> Result<f64> {
        let mut stats = IntegrationStats::default();
        let result = match self.params.numeric_mode {
            NumericMode::Plain => self.evaluate::<f64>(tree, origin, &mut stats),
            NumericMode::Scaled => self.evaluate::<ScaledNumber>(tree, origin, &mut stats),
        };
        debug!(
            "Evaluation used {} integrations with {} evaluations, at most {} in one.",
            stats.integrations, stats.evaluations, stats.max_evaluations
        );
        self.max_evals_used
            .set(self.max_evals_used.get().max(stats.max_evaluations));
        self.last_stats.set(stats);
        let log_likelihood = result?;
        if log_likelihood.is_nan() || log_likelihood == f64::INFINITY {
            bail!(LikelihoodError::NumericalFailure(format!(
                "The log-likelihood evaluated to {log_likelihood}."
            )));
        }
        Ok(log_likelihood)
    }

    fn evaluate<D: Density>(
        &self,
        tree: &TypedTree,
        origin: Option<&OriginBranch>,
        stats: &mut IntegrationStats,
    ) -> Result<f64> {
        let n_types = self.params.n_types;
        tree.validate(n_types)?;
        if let Some(origin) = origin {
            origin.validate(tree, n_types)?;
        }
        let root = tree.node(tree.root());
        let (horizon, horizon_type) = match origin {
            Some(origin) => (origin.origin, origin.final_type(root.node_type)),
            None => (root.height, root.node_type),
        };
        let model = RateModel::new(&self.params, horizon)?;
        let recursion = Recursion {
            tree,
            model: &model,
            integrator: &self.integrator,
        };

        let survival = if self.params.condition_on_survival {
            let p0 = recursion.extinction_at(0.0, stats)?[horizon_type];
            if !(0.0..=1.0).contains(&p0) || (1.0 - p0).abs() < SURVIVAL_TOLERANCE {
                bail!(LikelihoodError::DegenerateConditioning(format!(
                    "Extinction probability {p0} for type {horizon_type} at the horizon."
                )));
            }
            Some(1.0 - p0)
        } else {
            None
        };

        let state = recursion.root_state::<D>(origin, stats)?;
        let mut density = state.ge[horizon_type];
        if let Some(survival) = survival {
            density = density.scale(1.0 / survival);
        }
        let mut log_likelihood = model.frequencies()[horizon_type].ln() + density.ln();
        if self.params.ancestors_can_be_sampled() {
            let internal = tree
                .leaf_count()
                .saturating_sub(tree.direct_ancestor_count() + 1);
            log_likelihood += LN_2 * internal as f64;
        }
        Ok(log_likelihood)
    }
}
