use crate::ode::{numerical_failure, PgSystem, StateIntegrator};
use crate::Result;

const A2: [f64; 1] = [1.0 / 5.0];
const A3: [f64; 2] = [3.0 / 40.0, 9.0 / 40.0];
const A4: [f64; 3] = [44.0 / 45.0, -56.0 / 15.0, 32.0 / 9.0];
const A5: [f64; 4] = [
    19372.0 / 6561.0,
    -25360.0 / 2187.0,
    64448.0 / 6561.0,
    -212.0 / 729.0,
];
const A6: [f64; 5] = [
    9017.0 / 3168.0,
    -355.0 / 33.0,
    46732.0 / 5247.0,
    49.0 / 176.0,
    -5103.0 / 18656.0,
];
// Fifth order weights, also the last stage (first same as last).
const B: [f64; 7] = [
    35.0 / 384.0,
    0.0,
    500.0 / 1113.0,
    125.0 / 192.0,
    -2187.0 / 6784.0,
    11.0 / 84.0,
    0.0,
];
// Difference between the fifth and the embedded fourth order weights.
const E: [f64; 7] = [
    71.0 / 57600.0,
    0.0,
    -71.0 / 16695.0,
    71.0 / 1920.0,
    -17253.0 / 339200.0,
    22.0 / 525.0,
    -1.0 / 40.0,
];

const SAFETY: f64 = 0.9;
const MIN_FACTOR: f64 = 0.2;
const MAX_FACTOR: f64 = 5.0;

/// Step size control. `abs_tol` only applies to the extinction probabilities; the densities
/// are controlled by `rel_tol` alone, so their error does not depend on their magnitude.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct IntegratorConfig {
    pub rel_tol: f64,
    pub abs_tol: f64,
    pub min_step: f64,
    pub max_evaluations: usize,
}

impl Default for IntegratorConfig {
    fn default() -> Self {
        IntegratorConfig {
            rel_tol: 1e-10,
            abs_tol: 1e-100,
            min_step: 1e-14,
            max_evaluations: 1_000_000,
        }
    }
}

/// Adaptive explicit Runge-Kutta 5(4) integrator of Dormand and Prince.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DormandPrince {
    config: IntegratorConfig,
}

impl DormandPrince {
    pub fn new(config: IntegratorConfig) -> Self {
        DormandPrince { config }
    }

    pub fn config(&self) -> &IntegratorConfig {
        &self.config
    }

    // Entries from `n_types` on are densities.
    fn error_scale(&self, y: &[f64], y_new: &[f64], i: usize, n_types: usize) -> f64 {
        let relative = self.config.rel_tol * y[i].abs().max(y_new[i].abs());
        if i < n_types {
            self.config.abs_tol + relative
        } else {
            relative.max(f64::MIN_POSITIVE)
        }
    }

    fn initial_step(&self, y: &[f64], f: &[f64], length: f64, n_types: usize) -> f64 {
        let mut d0 = 0.0_f64;
        let mut d1 = 0.0_f64;
        for i in 0..y.len() {
            let scale = self.error_scale(y, y, i, n_types);
            d0 = d0.max(y[i].abs() / scale);
            d1 = d1.max(f[i].abs() / scale);
        }
        let step = if d0 < 1e-5 || d1 < 1e-5 {
            1e-6
        } else {
            0.01 * d0 / d1
        };
        step.min(length)
    }
}

// The system is integrated in s = t_young - t, so every stage derivative is negated.
fn stage(system: &PgSystem, y: &[f64], k: &mut [f64]) {
    system.derivatives(y, k);
    k.iter_mut().for_each(|v| *v = -*v);
}

impl StateIntegrator for DormandPrince {
    fn integrate_observed(
        &self,
        system: &PgSystem,
        y: &mut [f64],
        t_young: f64,
        t_old: f64,
        on_step: &mut dyn FnMut(&mut [f64]) -> bool,
    ) -> Result<usize> {
        let length = t_young - t_old;
        if length <= 0.0 {
            return Ok(0);
        }
        let dim = y.len();
        let n_types = system.n_types();
        let mut k: [Vec<f64>; 7] = std::array::from_fn(|_| vec![0.0; dim]);
        let mut tmp = vec![0.0; dim];
        let mut y_new = vec![0.0; dim];

        stage(system, y, &mut k[0]);
        let mut evaluations = 1;
        let mut step = self.initial_step(y, &k[0], length, n_types);
        let mut s = 0.0;

        while s < length {
            let last = length - s <= step * (1.0 + 1e-12);
            if last {
                step = length - s;
            }
            if evaluations + 6 > self.config.max_evaluations {
                return numerical_failure(format!(
                    "Integration from {t_young} to {t_old} exceeded {} evaluations.",
                    self.config.max_evaluations
                ));
            }

            let rows: [&[f64]; 5] = [&A2, &A3, &A4, &A5, &A6];
            for (stage_idx, row) in rows.iter().enumerate() {
                for i in 0..dim {
                    let mut acc = 0.0;
                    for (j, a) in row.iter().enumerate() {
                        acc += a * k[j][i];
                    }
                    tmp[i] = y[i] + step * acc;
                }
                stage(system, &tmp, &mut k[stage_idx + 1]);
            }
            for i in 0..dim {
                let mut acc = 0.0;
                for j in 0..6 {
                    acc += B[j] * k[j][i];
                }
                y_new[i] = y[i] + step * acc;
            }
            stage(system, &y_new, &mut k[6]);
            evaluations += 6;

            let mut error = 0.0_f64;
            for i in 0..dim {
                let mut acc = 0.0;
                for j in 0..7 {
                    acc += E[j] * k[j][i];
                }
                error = error.max((step * acc).abs() / self.error_scale(y, &y_new, i, n_types));
            }
            if !error.is_finite() {
                error = f64::INFINITY;
            }

            if error <= 1.0 {
                s = if last { length } else { s + step };
                y.copy_from_slice(&y_new);
                if y.iter().any(|v| !v.is_finite()) {
                    return numerical_failure(format!(
                        "Non-finite state while integrating from {t_young} to {t_old}."
                    ));
                }
                if on_step(y) {
                    stage(system, y, &mut k[0]);
                    evaluations += 1;
                } else {
                    k.swap(0, 6);
                }
            }

            let factor = if error == 0.0 {
                MAX_FACTOR
            } else {
                (SAFETY * error.powf(-0.2)).clamp(MIN_FACTOR, MAX_FACTOR)
            };
            step *= factor;
            if step < self.config.min_step && length - s > self.config.min_step {
                return numerical_failure(format!(
                    "Step size underflow at {} while integrating from {t_young} to {t_old}.",
                    t_young - s
                ));
            }
        }
        Ok(evaluations)
    }
}
