use std::fmt::Debug;

use crate::ode::{PgSystem, StateIntegrator};
use crate::scaled_number::ScaledNumber;
use crate::Result;

/// Arithmetic needed by the likelihood recursion for density values. Implemented for plain
/// `f64` and for [`ScaledNumber`], so one generic recursion serves both numeric modes.
pub trait Density: Copy + Debug + Send + Sync {
    fn zero() -> Self;
    fn from_f64(value: f64) -> Self;
    fn mul(self, other: Self) -> Self;
    fn scale(self, factor: f64) -> Self;
    fn ln(self) -> f64;
    fn is_zero(self) -> bool;

    /// Propagates the extinction probabilities `p` and densities `g` from `t_young` back to
    /// `t_old` within one interval and returns the number of evaluations used.
    fn integrate<I: StateIntegrator>(
        integrator: &I,
        system: &PgSystem,
        p: &mut [f64],
        g: &mut [Self],
        t_young: f64,
        t_old: f64,
    ) -> Result<usize>;
}

impl Density for f64 {
    fn zero() -> Self {
        0.0
    }

    fn from_f64(value: f64) -> Self {
        value
    }

    fn mul(self, other: Self) -> Self {
        self * other
    }

    fn scale(self, factor: f64) -> Self {
        self * factor
    }

    fn ln(self) -> f64 {
        f64::ln(self)
    }

    fn is_zero(self) -> bool {
        self == 0.0
    }

    fn integrate<I: StateIntegrator>(
        integrator: &I,
        system: &PgSystem,
        p: &mut [f64],
        g: &mut [Self],
        t_young: f64,
        t_old: f64,
    ) -> Result<usize> {
        let n = p.len();
        let mut y = Vec::with_capacity(2 * n);
        y.extend_from_slice(p);
        y.extend_from_slice(g);
        let evaluations = integrator.integrate(system, &mut y, t_young, t_old)?;
        p.copy_from_slice(&y[..n]);
        g.copy_from_slice(&y[n..]);
        Ok(evaluations)
    }
}

impl Density for ScaledNumber {
    fn zero() -> Self {
        ScaledNumber::zero()
    }

    fn from_f64(value: f64) -> Self {
        ScaledNumber::new(value)
    }

    fn mul(self, other: Self) -> Self {
        self.multiply(&other)
    }

    fn scale(self, factor: f64) -> Self {
        self.scalar_multiply(factor)
    }

    fn ln(self) -> f64 {
        ScaledNumber::ln(&self)
    }

    fn is_zero(self) -> bool {
        ScaledNumber::is_zero(&self)
    }

    // The densities share the exponent of the largest one while integrating. Densities far
    // below it flush to zero, they cannot contribute to the product at the root anyway.
    fn integrate<I: StateIntegrator>(
        integrator: &I,
        system: &PgSystem,
        p: &mut [f64],
        g: &mut [Self],
        t_young: f64,
        t_old: f64,
    ) -> Result<usize> {
        let n = p.len();
        let mut exponent = g
            .iter()
            .filter(|value| !value.is_zero())
            .map(|value| value.exponent())
            .max()
            .unwrap_or(0);
        let mut y = Vec::with_capacity(2 * n);
        y.extend_from_slice(p);
        y.extend(g.iter().map(|value| value.relative_to(exponent)));
        let evaluations =
            integrator.integrate_rescaled(system, &mut y, &mut exponent, t_young, t_old)?;
        p.copy_from_slice(&y[..n]);
        for (value, &relative) in g.iter_mut().zip(&y[n..]) {
            *value = ScaledNumber::from_parts(relative, exponent);
        }
        Ok(evaluations)
    }
}

/// Extinction probabilities and densities of every type at one point in time.
#[derive(Clone, Debug, PartialEq)]
pub struct PgState<D: Density> {
    pub p: Vec<f64>,
    pub ge: Vec<D>,
}

impl<D: Density> PgState<D> {
    pub fn new(p: Vec<f64>) -> Self {
        let ge = vec![D::zero(); p.len()];
        PgState { p, ge }
    }

    pub fn n_types(&self) -> usize {
        self.p.len()
    }

    pub fn integrate<I: StateIntegrator>(
        &mut self,
        integrator: &I,
        system: &PgSystem,
        t_young: f64,
        t_old: f64,
    ) -> Result<usize> {
        D::integrate(integrator, system, &mut self.p, &mut self.ge, t_young, t_old)
    }

    /// Multiplies both components of type `i` by `factors[i]`, as when a lineage passes a
    /// scheduled sampling event unsampled.
    pub fn scale_all(&mut self, factors: &[f64]) {
        for (i, &factor) in factors.iter().enumerate() {
            self.p[i] *= factor;
            self.ge[i] = self.ge[i].scale(factor);
        }
    }
}

#[cfg(test)]
mod tests;
