use crate::dag::Dag;
use crate::errors::LearningError;
use crate::variables::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// `y = intercept + coefficients' x + N(0, variance)` for one
/// configuration of the discrete parents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearGaussian {
    pub intercept: f64,
    /// one per continuous parent, declaration order
    pub coefficients: Vec<f64>,
    pub variance: f64,
}

/// Local distribution of a variable given its parents. Rows are
/// indexed by the discrete parent configuration (see
/// [`Dag::parent_config_index`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConditionalDistribution {
    Multinomial { probabilities: Vec<Vec<f64>> },
    Normal { components: Vec<LinearGaussian> },
}

impl ConditionalDistribution {
    pub fn num_configs(&self) -> usize {
        match self {
            Self::Multinomial { probabilities } => probabilities.len(),
            Self::Normal { components } => components.len(),
        }
    }

    /// Same family and shape, and every parameter within `tol`
    /// (probabilities, intercepts, coefficients and variances).
    pub fn equal_dist(&self, other: &ConditionalDistribution, tol: f64) -> bool {
        let close = |a: &f64, b: &f64| (a - b).abs() <= tol;
        match (self, other) {
            (Self::Multinomial { probabilities: p }, Self::Multinomial { probabilities: q }) => {
                p.len() == q.len()
                    && p.iter().zip(q.iter()).all(|(pr, qr)| {
                        pr.len() == qr.len() && pr.iter().zip(qr.iter()).all(|(a, b)| close(a, b))
                    })
            }
            (Self::Normal { components: p }, Self::Normal { components: q }) => {
                p.len() == q.len()
                    && p.iter().zip(q.iter()).all(|(a, b)| {
                        close(&a.intercept, &b.intercept)
                            && close(&a.variance, &b.variance)
                            && a.coefficients.len() == b.coefficients.len()
                            && a.coefficients
                                .iter()
                                .zip(b.coefficients.iter())
                                .all(|(x, y)| close(x, y))
                    })
            }
            _ => false,
        }
    }
}

/// A dependency graph with one conditional distribution per variable
#[derive(Debug, Clone)]
pub struct BayesianNetwork {
    dag: Arc<Dag>,
    distributions: Vec<ConditionalDistribution>,
}

impl BayesianNetwork {
    pub fn new(dag: Arc<Dag>, distributions: Vec<ConditionalDistribution>) -> anyhow::Result<Self> {
        if distributions.len() != dag.num_variables() {
            return Err(LearningError::Structural(format!(
                "{} distributions for {} variables",
                distributions.len(),
                dag.num_variables()
            ))
            .into());
        }

        for (var, dist) in dag.variables().iter().zip(distributions.iter()) {
            check_distribution(&dag, var, dist)?;
        }

        Ok(Self { dag, distributions })
    }

    pub fn dag(&self) -> &Arc<Dag> {
        &self.dag
    }

    pub fn variables(&self) -> &Variables {
        self.dag.variables()
    }

    pub fn conditional_distribution(&self, var: &Variable) -> &ConditionalDistribution {
        &self.distributions[var.index()]
    }

    pub fn distributions(&self) -> &[ConditionalDistribution] {
        &self.distributions
    }

    /// Same structure and every conditional distribution within `tol`
    pub fn equal_bns(&self, other: &BayesianNetwork, tol: f64) -> bool {
        self.dag.same_structure(&other.dag)
            && self
                .distributions
                .iter()
                .zip(other.distributions.iter())
                .all(|(a, b)| a.equal_dist(b, tol))
    }
}

fn check_distribution(
    dag: &Dag,
    var: &Variable,
    dist: &ConditionalDistribution,
) -> anyhow::Result<()> {
    let num_configs = dag.num_parent_configs(var.index());

    let fail = |msg: String| -> anyhow::Result<()> {
        Err(LearningError::Structural(format!("{}: {}", var.name(), msg)).into())
    };

    if dist.num_configs() != num_configs {
        return fail(format!(
            "expected {} parent configurations, found {}",
            num_configs,
            dist.num_configs()
        ));
    }

    match (var.kind(), dist) {
        (
            VariableKind::Multinomial { num_states },
            ConditionalDistribution::Multinomial { probabilities },
        ) => {
            for row in probabilities {
                if row.len() != num_states {
                    return fail(format!("row of length {} for {} states", row.len(), num_states));
                }
                let tot: f64 = row.iter().sum();
                if row.iter().any(|&p| !(0.0..=1.0).contains(&p)) || (tot - 1.0).abs() > 1e-6 {
                    return fail(format!("invalid probability row {:?}", row));
                }
            }
            Ok(())
        }
        (VariableKind::Normal, ConditionalDistribution::Normal { components }) => {
            let num_cont = dag.continuous_parents(var.index()).len();
            for comp in components {
                if comp.coefficients.len() != num_cont {
                    return fail(format!(
                        "{} coefficients for {} continuous parents",
                        comp.coefficients.len(),
                        num_cont
                    ));
                }
                if !(comp.variance > 0.0 && comp.variance.is_finite()) {
                    return fail(format!("invalid variance {}", comp.variance));
                }
            }
            Ok(())
        }
        _ => fail("distribution family does not match the variable kind".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_node() -> anyhow::Result<(Arc<Dag>, Variable, Variable)> {
        let mut vars = Variables::new();
        let a = vars.new_multinomial("A", 2)?;
        let y = vars.new_normal("Y")?;
        let mut dag = Dag::new(vars);
        dag.add_parent(&y, &a)?;
        Ok((Arc::new(dag), a, y))
    }

    fn gaussian(mean: f64) -> LinearGaussian {
        LinearGaussian {
            intercept: mean,
            coefficients: vec![],
            variance: 1.0,
        }
    }

    #[test]
    fn test_new_validates_shapes() -> anyhow::Result<()> {
        let (dag, a, _) = two_node()?;
        let good = vec![
            ConditionalDistribution::Multinomial {
                probabilities: vec![vec![0.3, 0.7]],
            },
            ConditionalDistribution::Normal {
                components: vec![gaussian(0.0), gaussian(1.0)],
            },
        ];
        let bn = BayesianNetwork::new(dag.clone(), good)?;
        assert_eq!(bn.conditional_distribution(&a).num_configs(), 1);

        let bad = vec![
            ConditionalDistribution::Multinomial {
                probabilities: vec![vec![0.3, 0.6]],
            },
            ConditionalDistribution::Normal {
                components: vec![gaussian(0.0), gaussian(1.0)],
            },
        ];
        assert!(BayesianNetwork::new(dag, bad).is_err());
        Ok(())
    }

    #[test]
    fn test_equal_dist_tolerance() {
        let p = ConditionalDistribution::Multinomial {
            probabilities: vec![vec![0.3, 0.7]],
        };
        let q = ConditionalDistribution::Multinomial {
            probabilities: vec![vec![0.34, 0.66]],
        };
        assert!(p.equal_dist(&q, 0.05));
        assert!(!p.equal_dist(&q, 0.01));

        let n = ConditionalDistribution::Normal {
            components: vec![gaussian(0.0)],
        };
        assert!(!p.equal_dist(&n, 1.0));
    }
}
