//! Global (shared) parameter state of a network: one conjugate block
//! per variable, each block holding one posterior per parent
//! configuration.

use crate::dag::Dag;
use crate::network::*;
use crate::variables::*;
use expfam_param::*;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Hyper parameters of the structural prior
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriorConfig {
    /// Dirichlet concentration of every table cell
    pub dirichlet_alpha: f64,
    /// prior precision scale of the regression weights
    pub normal_precision: f64,
    /// Gamma shape of the noise precision
    pub gamma_shape: f64,
    /// Gamma rate of the noise precision
    pub gamma_rate: f64,
}

impl Default for PriorConfig {
    fn default() -> Self {
        Self {
            dirichlet_alpha: 1.0,
            normal_precision: 1e-3,
            gamma_shape: 1.0,
            gamma_rate: 1.0,
        }
    }
}

impl PriorConfig {
    fn normal_gamma(&self) -> NormalGammaPrior {
        NormalGammaPrior {
            precision_scale: self.normal_precision,
            shape: self.gamma_shape,
            rate: self.gamma_rate,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum VariableParams {
    Multinomial(DirichletMatrix),
    /// one per discrete parent configuration
    Normal(Vec<NormalGamma>),
}

/// Messages the global nodes send to the replicated local nodes
#[derive(Debug, Clone)]
pub enum BlockMoments {
    /// `E[log theta]`, configurations by states
    Multinomial(DMatrix<f64>),
    Normal(Vec<NormalGammaMoments>),
}

impl NaturalParam for VariableParams {
    fn add_scaled(&mut self, other: &Self, factor: f64) {
        match (self, other) {
            (Self::Multinomial(a), Self::Multinomial(b)) => a.add_scaled(b, factor),
            (Self::Normal(a), Self::Normal(b)) => {
                assert_eq!(a.len(), b.len());
                a.iter_mut()
                    .zip(b.iter())
                    .for_each(|(x, y)| x.add_scaled(y, factor));
            }
            _ => panic!("parameter family mismatch"),
        }
    }

    fn scale(&mut self, factor: f64) {
        match self {
            Self::Multinomial(a) => a.scale(factor),
            Self::Normal(a) => a.iter_mut().for_each(|x| x.scale(factor)),
        }
    }

    fn max_relative_change(&self, previous: &Self) -> f64 {
        match (self, previous) {
            (Self::Multinomial(a), Self::Multinomial(b)) => a.max_relative_change(b),
            (Self::Normal(a), Self::Normal(b)) => a
                .iter()
                .zip(b.iter())
                .map(|(x, y)| x.max_relative_change(y))
                .fold(0.0, f64::max),
            _ => f64::INFINITY,
        }
    }

    fn kl_divergence(&self, prior: &Self) -> anyhow::Result<f64> {
        match (self, prior) {
            (Self::Multinomial(a), Self::Multinomial(b)) => a.kl_divergence(b),
            (Self::Normal(a), Self::Normal(b)) => {
                let mut kl = 0.0;
                for (x, y) in a.iter().zip(b.iter()) {
                    kl += x.kl_divergence(y)?;
                }
                Ok(kl)
            }
            _ => Err(anyhow::anyhow!("parameter family mismatch")),
        }
    }
}

/// Natural parameters of every variable of a network
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalParams {
    blocks: Vec<VariableParams>,
}

impl GlobalParams {
    /// structural prior implied by the graph
    pub fn prior(dag: &Dag, config: &PriorConfig) -> Self {
        let blocks = dag
            .variables()
            .iter()
            .map(|var| {
                let num_configs = dag.num_parent_configs(var.index());
                match var.kind() {
                    VariableKind::Multinomial { num_states } => VariableParams::Multinomial(
                        DirichletMatrix::new(num_configs, num_states, config.dirichlet_alpha),
                    ),
                    VariableKind::Normal => {
                        let dim = 1 + dag.continuous_parents(var.index()).len();
                        let ng = NormalGamma::new(dim, &config.normal_gamma());
                        VariableParams::Normal(vec![ng; num_configs])
                    }
                }
            })
            .collect();
        Self { blocks }
    }

    pub fn block(&self, var: usize) -> &VariableParams {
        &self.blocks[var]
    }

    pub fn block_mut(&mut self, var: usize) -> &mut VariableParams {
        &mut self.blocks[var]
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// `self - base`
    pub fn delta(&self, base: &Self) -> Self {
        let mut ret = self.clone();
        ret.add_scaled(base, -1.0);
        ret
    }

    /// `prior + sum(deltas)`; the result depends only on the multiset
    /// of deltas
    pub fn merge_deltas(prior: &Self, deltas: &[Self]) -> Self {
        let mut ret = prior.clone();
        for delta in deltas {
            ret.add_scaled(delta, 1.0);
        }
        ret
    }

    /// `prior + sum(posterior - prior)` over posteriors that were all
    /// computed from the same `prior`
    pub fn merge(prior: &Self, posteriors: &[Self]) -> Self {
        // a single delta lands exactly on its posterior
        if let [single] = posteriors {
            return single.clone();
        }
        let deltas: Vec<Self> = posteriors.iter().map(|p| p.delta(prior)).collect();
        Self::merge_deltas(prior, &deltas)
    }

    pub fn moments(&self) -> anyhow::Result<Vec<BlockMoments>> {
        self.blocks
            .iter()
            .map(|b| match b {
                VariableParams::Multinomial(dir) => {
                    Ok(BlockMoments::Multinomial(dir.expected_log_prob()))
                }
                VariableParams::Normal(ngs) => Ok(BlockMoments::Normal(
                    ngs.iter()
                        .map(|ng| ng.moments())
                        .collect::<anyhow::Result<Vec<_>>>()?,
                )),
            })
            .collect()
    }

    /// Expected values of the parameters as a concrete network
    pub fn to_network(&self, dag: Arc<Dag>) -> anyhow::Result<BayesianNetwork> {
        let distributions = self
            .blocks
            .iter()
            .map(|b| match b {
                VariableParams::Multinomial(dir) => {
                    let mean = dir.posterior_mean();
                    Ok(ConditionalDistribution::Multinomial {
                        probabilities: mean
                            .row_iter()
                            .map(|r| r.iter().copied().collect())
                            .collect(),
                    })
                }
                VariableParams::Normal(ngs) => {
                    let components = ngs
                        .iter()
                        .map(|ng| {
                            let m = ng.moments()?;
                            Ok(LinearGaussian {
                                intercept: m.mean[0],
                                coefficients: m.mean.iter().skip(1).copied().collect(),
                                variance: m.variance(),
                            })
                        })
                        .collect::<anyhow::Result<Vec<_>>>()?;
                    Ok(ConditionalDistribution::Normal { components })
                }
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        BayesianNetwork::new(dag, distributions)
    }
}

impl NaturalParam for GlobalParams {
    fn add_scaled(&mut self, other: &Self, factor: f64) {
        assert_eq!(self.blocks.len(), other.blocks.len());
        self.blocks
            .iter_mut()
            .zip(other.blocks.iter())
            .for_each(|(a, b)| a.add_scaled(b, factor));
    }

    fn scale(&mut self, factor: f64) {
        self.blocks.iter_mut().for_each(|b| b.scale(factor));
    }

    fn max_relative_change(&self, previous: &Self) -> f64 {
        self.blocks
            .iter()
            .zip(previous.blocks.iter())
            .map(|(a, b)| a.max_relative_change(b))
            .fold(0.0, f64::max)
    }

    fn kl_divergence(&self, prior: &Self) -> anyhow::Result<f64> {
        let mut kl = 0.0;
        for (a, b) in self.blocks.iter().zip(prior.blocks.iter()) {
            kl += a.kl_divergence(b)?;
        }
        Ok(kl)
    }
}
