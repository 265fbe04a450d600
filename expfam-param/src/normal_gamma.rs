//! Normal-Gamma posterior for a conditional linear Gaussian.
//!
//! ```text
//! y | w, tau ~ N(w' phi, 1/tau),   phi = [1, x_1, ..., x_p]
//! w | tau    ~ N(m, (tau * L)^-1)
//! tau        ~ Gamma(a, b)
//! ```
//!
//! Natural parameters are kept as the additive tuple
//! `(P, h, s, nu) = (L, L m, 2b + m' L m, 2a)`. A weighted
//! observation `(phi, y, r)` contributes `(r phi phi', r phi y, r y^2, r)`.

extern crate special;

use crate::traits::*;
use nalgebra::{DMatrix, DVector};
use special::Gamma;

const LN_2PI: f64 = 1.837_877_066_409_345_3;

/// Hyper parameters of the Normal-Gamma prior with `m0 = 0`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalGammaPrior {
    /// `L0 = precision_scale * I`
    pub precision_scale: f64,
    /// Gamma shape `a0`
    pub shape: f64,
    /// Gamma rate `b0`
    pub rate: f64,
}

impl Default for NormalGammaPrior {
    fn default() -> Self {
        Self {
            precision_scale: 1e-3,
            shape: 1.0,
            rate: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalGamma {
    dim: usize,
    ///////////////////////////
    // sufficient statistics //
    ///////////////////////////
    precision_stat: DMatrix<f64>,
    shift_stat: DVector<f64>,
    sq_stat: f64,
    dof_stat: f64,
}

/// Expectations under a Normal-Gamma distribution, i.e. the message a
/// global parameter node sends to its local children
#[derive(Debug, Clone)]
pub struct NormalGammaMoments {
    pub mean: DVector<f64>,
    pub inv_precision: DMatrix<f64>,
    pub log_det_precision: f64,
    pub shape: f64,
    pub rate: f64,
    pub e_tau: f64,
    pub e_log_tau: f64,
}

impl NormalGamma {
    /// # Arguments
    /// * `dim` - length of `phi` (intercept included)
    /// * `prior` - hyper parameters
    pub fn new(dim: usize, prior: &NormalGammaPrior) -> Self {
        Self {
            dim,
            precision_stat: DMatrix::identity(dim, dim) * prior.precision_scale,
            shift_stat: DVector::zeros(dim),
            sq_stat: 2.0 * prior.rate,
            dof_stat: 2.0 * prior.shape,
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// effective number of observations absorbed so far (prior included)
    pub fn dof(&self) -> f64 {
        self.dof_stat
    }

    /// add one weighted observation
    pub fn add_observation(&mut self, phi: &DVector<f64>, y: f64, weight: f64) {
        debug_assert_eq!(phi.len(), self.dim);
        self.precision_stat.ger(weight, phi, phi, 1.0);
        self.shift_stat.axpy(weight * y, phi, 1.0);
        self.sq_stat += weight * y * y;
        self.dof_stat += weight;
    }

    pub fn moments(&self) -> anyhow::Result<NormalGammaMoments> {
        let chol = self
            .precision_stat
            .clone()
            .cholesky()
            .ok_or(anyhow::anyhow!("precision matrix is not positive definite"))?;

        let mean = chol.solve(&self.shift_stat);
        let inv_precision = chol.inverse();
        let log_det_precision = 2.0 * chol.l().diagonal().iter().map(|x| x.ln()).sum::<f64>();

        let shape = 0.5 * self.dof_stat;
        let rate = 0.5 * (self.sq_stat - self.shift_stat.dot(&mean));

        if !(shape > 0.0 && rate > 0.0 && rate.is_finite()) {
            return Err(anyhow::anyhow!(
                "invalid gamma parameters: shape={}, rate={}",
                shape,
                rate
            ));
        }

        Ok(NormalGammaMoments {
            mean,
            inv_precision,
            log_det_precision,
            shape,
            rate,
            e_tau: shape / rate,
            e_log_tau: shape.digamma() - rate.ln(),
        })
    }
}

impl NormalGammaMoments {
    /// `E[log N(y | w' phi, 1/tau)]`
    pub fn expected_log_likelihood(&self, phi: &DVector<f64>, y: f64) -> f64 {
        let resid = y - self.mean.dot(phi);
        let quad = self.e_tau * resid * resid + phi.dot(&(&self.inv_precision * phi));
        0.5 * (self.e_log_tau - LN_2PI - quad)
    }

    /// `1 / E[tau]`
    pub fn variance(&self) -> f64 {
        self.rate / self.shape
    }
}

impl NaturalParam for NormalGamma {
    fn add_scaled(&mut self, other: &Self, factor: f64) {
        assert_eq!(self.dim, other.dim);
        self.precision_stat += &other.precision_stat * factor;
        self.shift_stat.axpy(factor, &other.shift_stat, 1.0);
        self.sq_stat += factor * other.sq_stat;
        self.dof_stat += factor * other.dof_stat;
    }

    fn scale(&mut self, factor: f64) {
        self.precision_stat *= factor;
        self.shift_stat *= factor;
        self.sq_stat *= factor;
        self.dof_stat *= factor;
    }

    fn max_relative_change(&self, previous: &Self) -> f64 {
        let mat = self
            .precision_stat
            .iter()
            .zip(previous.precision_stat.iter())
            .chain(self.shift_stat.iter().zip(previous.shift_stat.iter()))
            .map(|(&a, &b)| relative_change(a, b))
            .fold(0.0, f64::max);

        mat.max(relative_change(self.sq_stat, previous.sq_stat))
            .max(relative_change(self.dof_stat, previous.dof_stat))
    }

    fn kl_divergence(&self, prior: &Self) -> anyhow::Result<f64> {
        if self.dim != prior.dim {
            return Err(anyhow::anyhow!(
                "normal-gamma dimension mismatch: {} vs. {}",
                self.dim,
                prior.dim
            ));
        }

        let q = self.moments()?;
        let p = prior.moments()?;

        let diff = &q.mean - &p.mean;
        let trace = (&prior.precision_stat * &q.inv_precision).trace();
        let quad = diff.dot(&(&prior.precision_stat * &diff));

        let kl_normal = 0.5
            * (trace + q.e_tau * quad - self.dim as f64 + q.log_det_precision
                - p.log_det_precision);

        let kl_gamma = (q.shape - p.shape) * q.shape.digamma() - Gamma::ln_gamma(q.shape).0
            + Gamma::ln_gamma(p.shape).0
            + p.shape * (q.rate.ln() - p.rate.ln())
            + q.shape * (p.rate - q.rate) / q.rate;

        Ok(kl_normal + kl_gamma)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_prior_moments() -> anyhow::Result<()> {
        let prior = NormalGammaPrior {
            precision_scale: 2.0,
            shape: 3.0,
            rate: 1.5,
        };
        let ng = NormalGamma::new(2, &prior);
        let m = ng.moments()?;
        assert_abs_diff_eq!(m.shape, 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(m.rate, 1.5, epsilon = 1e-12);
        assert_abs_diff_eq!(m.e_tau, 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(m.inv_precision[(0, 0)], 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(m.log_det_precision, 2.0 * 2.0_f64.ln(), epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn test_intercept_only_update() -> anyhow::Result<()> {
        // closed form for the intercept-only model with m0 = 0
        let prior = NormalGammaPrior {
            precision_scale: 1.0,
            shape: 1.0,
            rate: 1.0,
        };
        let mut ng = NormalGamma::new(1, &prior);
        let phi = DVector::from_element(1, 1.0);
        let ys = [1.0, 2.0, 3.0];
        for &y in ys.iter() {
            ng.add_observation(&phi, y, 1.0);
        }
        let m = ng.moments()?;

        // L = 1 + 3, m = (0 + 6) / 4, a = 1 + 3/2
        assert_abs_diff_eq!(m.mean[0], 1.5, epsilon = 1e-12);
        assert_abs_diff_eq!(m.shape, 2.5, epsilon = 1e-12);
        // b = b0 + (sum y^2 - L m^2) / 2 = 1 + (14 - 9) / 2
        assert_abs_diff_eq!(m.rate, 3.5, epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn test_regression_recovers_coefficients() -> anyhow::Result<()> {
        let mut ng = NormalGamma::new(2, &NormalGammaPrior::default());
        for i in 0..2000 {
            let x = (i as f64) / 200.0 - 5.0;
            let noise = if i % 2 == 0 { 0.1 } else { -0.1 };
            let y = 1.0 + 2.0 * x + noise;
            ng.add_observation(&DVector::from_vec(vec![1.0, x]), y, 1.0);
        }
        let m = ng.moments()?;
        assert_abs_diff_eq!(m.mean[0], 1.0, epsilon = 1e-2);
        assert_abs_diff_eq!(m.mean[1], 2.0, epsilon = 1e-2);
        assert_abs_diff_eq!(m.variance(), 0.01, epsilon = 5e-3);
        Ok(())
    }

    #[test]
    fn test_kl_zero_and_positive() -> anyhow::Result<()> {
        let prior = NormalGamma::new(2, &NormalGammaPrior::default());
        assert_abs_diff_eq!(prior.kl_divergence(&prior)?, 0.0, epsilon = 1e-9);

        let mut post = prior.clone();
        post.add_observation(&DVector::from_vec(vec![1.0, 0.5]), 2.0, 1.0);
        assert!(post.kl_divergence(&prior)? > 0.0);
        Ok(())
    }

    #[test]
    fn test_delta_roundtrip_through_prior() {
        let prior = NormalGamma::new(1, &NormalGammaPrior::default());
        let mut post = prior.clone();
        post.add_observation(&DVector::from_element(1, 1.0), 4.0, 2.0);

        let mut delta = post.clone();
        delta.add_scaled(&prior, -1.0);

        let mut merged = prior.clone();
        merged.add_scaled(&delta, 1.0);
        assert!(merged.max_relative_change(&post) < 1e-12);
    }
}
