extern crate special;

use crate::traits::*;
use nalgebra::DMatrix;
use special::Gamma;

/// Dirichlet posteriors for a conditional probability table, one
/// row per parent configuration
///
/// x | pa = c ~ Categorical(theta[c,])
/// theta[c,] ~ Dirichlet(alpha[c,])
///
#[derive(Debug, Clone, PartialEq)]
pub struct DirichletMatrix {
    num_configs: usize,
    num_states: usize,
    ///////////////////////////
    // concentration (stats) //
    ///////////////////////////
    alpha_stat: DMatrix<f64>,
}

impl DirichletMatrix {
    /// New Dirichlet matrix filled with the same concentration
    ///
    /// # Arguments
    /// * `num_configs` - number of parent configurations (rows)
    /// * `num_states` - number of states of the child (columns)
    /// * `alpha0` - hyper parameter shared by every cell
    pub fn new(num_configs: usize, num_states: usize, alpha0: f64) -> Self {
        Self {
            num_configs,
            num_states,
            alpha_stat: DMatrix::from_element(num_configs, num_states, alpha0),
        }
    }

    pub fn from_alpha(alpha: DMatrix<f64>) -> Self {
        Self {
            num_configs: alpha.nrows(),
            num_states: alpha.ncols(),
            alpha_stat: alpha,
        }
    }

    pub fn nrows(&self) -> usize {
        self.num_configs
    }

    pub fn ncols(&self) -> usize {
        self.num_states
    }

    pub fn alpha(&self) -> &DMatrix<f64> {
        &self.alpha_stat
    }

    /// add a (fractional) count for state `k` under configuration `c`
    #[inline]
    pub fn add_count(&mut self, c: usize, k: usize, weight: f64) {
        self.alpha_stat[(c, k)] += weight;
    }

    /// `E[log theta[c,k]] = digamma(alpha[c,k]) - digamma(sum_k alpha[c,k])`
    pub fn expected_log_prob(&self) -> DMatrix<f64> {
        let mut ret = self.alpha_stat.map(|a| a.digamma());
        for (c, mut row) in ret.row_iter_mut().enumerate() {
            let tot = self.alpha_stat.row(c).sum().digamma();
            row.add_scalar_mut(-tot);
        }
        ret
    }

    /// `E[theta[c,k]] = alpha[c,k] / sum_k alpha[c,k]`
    pub fn posterior_mean(&self) -> DMatrix<f64> {
        let mut ret = self.alpha_stat.clone();
        for mut row in ret.row_iter_mut() {
            let tot = row.sum();
            row /= tot;
        }
        ret
    }

    fn row_kl(&self, prior: &Self, c: usize) -> f64 {
        let q = self.alpha_stat.row(c);
        let p = prior.alpha_stat.row(c);
        let q_tot = q.sum();
        let p_tot = p.sum();
        let dg_tot = q_tot.digamma();

        let mut kl = Gamma::ln_gamma(q_tot).0 - Gamma::ln_gamma(p_tot).0;
        for (&qk, &pk) in q.iter().zip(p.iter()) {
            kl += Gamma::ln_gamma(pk).0 - Gamma::ln_gamma(qk).0;
            kl += (qk - pk) * (qk.digamma() - dg_tot);
        }
        kl
    }
}

impl NaturalParam for DirichletMatrix {
    fn add_scaled(&mut self, other: &Self, factor: f64) {
        assert_eq!(self.alpha_stat.shape(), other.alpha_stat.shape());
        self.alpha_stat += &other.alpha_stat * factor;
    }

    fn scale(&mut self, factor: f64) {
        self.alpha_stat *= factor;
    }

    fn max_relative_change(&self, previous: &Self) -> f64 {
        self.alpha_stat
            .iter()
            .zip(previous.alpha_stat.iter())
            .map(|(&a, &b)| relative_change(a, b))
            .fold(0.0, f64::max)
    }

    fn kl_divergence(&self, prior: &Self) -> anyhow::Result<f64> {
        if self.alpha_stat.shape() != prior.alpha_stat.shape() {
            return Err(anyhow::anyhow!(
                "dirichlet shape mismatch: {:?} vs. {:?}",
                self.alpha_stat.shape(),
                prior.alpha_stat.shape()
            ));
        }
        Ok((0..self.num_configs).map(|c| self.row_kl(prior, c)).sum())
    }
}
