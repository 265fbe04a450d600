#![allow(dead_code)]

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{weighted::WeightedIndex, Distribution, Normal};
use std::sync::Arc;
use streaming_vb::*;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Forward sampling in topological order
pub fn sample_records(
    bn: &BayesianNetwork,
    num_records: usize,
    seed: u64,
) -> anyhow::Result<Vec<DataInstance>> {
    let dag = bn.dag();
    let order = dag.topological_order()?;
    let mut rng = StdRng::seed_from_u64(seed);
    let mut ret = Vec::with_capacity(num_records);

    for _ in 0..num_records {
        let mut values = vec![Value::Missing; dag.num_variables()];
        for &v in order.iter() {
            let config = dag
                .parent_config_index(v, &values)
                .ok_or(anyhow::anyhow!("parents of {} not sampled", v))?;
            values[v] = match &bn.distributions()[v] {
                ConditionalDistribution::Multinomial { probabilities } => {
                    let disc = WeightedIndex::new(&probabilities[config])?;
                    Value::Discrete(disc.sample(&mut rng))
                }
                ConditionalDistribution::Normal { components } => {
                    let comp = &components[config];
                    let mut mean = comp.intercept;
                    for (&p, &w) in dag.continuous_parents(v).iter().zip(comp.coefficients.iter()) {
                        if let Value::Continuous(x) = values[p] {
                            mean += w * x;
                        }
                    }
                    let normal = Normal::new(mean, comp.variance.sqrt())?;
                    Value::Continuous(normal.sample(&mut rng))
                }
            };
        }
        ret.push(DataInstance::new(values));
    }
    Ok(ret)
}

pub fn sample_stream(bn: &BayesianNetwork, num_records: usize, seed: u64) -> anyhow::Result<VecDataStream> {
    let records = sample_records(bn, num_records, seed)?;
    Ok(VecDataStream::new(attributes_of(bn.variables()), records))
}

/// hide `var` in every `every`-th record
pub fn hide(records: &mut [DataInstance], var: usize, every: usize) {
    for (i, rec) in records.iter_mut().enumerate() {
        if i % every == 0 {
            let mut values = rec.values().to_vec();
            values[var] = Value::Missing;
            *rec = DataInstance::new(values);
        }
    }
}

/// Cause (binary) -> Effect (binary)
pub fn cause_effect() -> anyhow::Result<BayesianNetwork> {
    let mut vars = Variables::new();
    let cause = vars.new_multinomial("Cause", 2)?;
    let effect = vars.new_multinomial("Effect", 2)?;
    let mut dag = Dag::new(vars);
    dag.add_parent(&effect, &cause)?;

    BayesianNetwork::new(
        Arc::new(dag),
        vec![
            ConditionalDistribution::Multinomial {
                probabilities: vec![vec![0.3, 0.7]],
            },
            ConditionalDistribution::Multinomial {
                probabilities: vec![vec![0.9, 0.1], vec![0.2, 0.8]],
            },
        ],
    )
}

/// A -> B, A -> Y <- X with normal X and Y
pub fn mixed() -> anyhow::Result<BayesianNetwork> {
    let mut vars = Variables::new();
    let a = vars.new_multinomial("A", 2)?;
    let b = vars.new_multinomial("B", 3)?;
    let x = vars.new_normal("X")?;
    let y = vars.new_normal("Y")?;
    let mut dag = Dag::new(vars);
    dag.add_parent(&b, &a)?;
    dag.add_parent(&y, &a)?;
    dag.add_parent(&y, &x)?;

    BayesianNetwork::new(
        Arc::new(dag),
        vec![
            ConditionalDistribution::Multinomial {
                probabilities: vec![vec![0.4, 0.6]],
            },
            ConditionalDistribution::Multinomial {
                probabilities: vec![vec![0.7, 0.2, 0.1], vec![0.1, 0.3, 0.6]],
            },
            ConditionalDistribution::Normal {
                components: vec![LinearGaussian {
                    intercept: 1.0,
                    coefficients: vec![],
                    variance: 1.0,
                }],
            },
            ConditionalDistribution::Normal {
                components: vec![
                    LinearGaussian {
                        intercept: 0.0,
                        coefficients: vec![2.0],
                        variance: 0.5,
                    },
                    LinearGaussian {
                        intercept: 3.0,
                        coefficients: vec![-1.0],
                        variance: 1.0,
                    },
                ],
            },
        ],
    )
}

/// Single binary variable with `P(A = 1) = p`
pub fn coin() -> anyhow::Result<Arc<Dag>> {
    let mut vars = Variables::new();
    vars.new_multinomial("A", 2)?;
    Ok(Arc::new(Dag::new(vars)))
}

pub fn coin_records(p: f64, num_records: usize, seed: u64) -> anyhow::Result<Vec<DataInstance>> {
    let dag = coin()?;
    let bn = BayesianNetwork::new(
        dag,
        vec![ConditionalDistribution::Multinomial {
            probabilities: vec![vec![1.0 - p, p]],
        }],
    )?;
    sample_records(&bn, num_records, seed)
}

pub fn prob(bn: &BayesianNetwork, var: usize, config: usize, state: usize) -> f64 {
    match &bn.distributions()[var] {
        ConditionalDistribution::Multinomial { probabilities } => probabilities[config][state],
        _ => f64::NAN,
    }
}

pub fn ln_factorial(n: usize) -> f64 {
    (2..=n).map(|i| (i as f64).ln()).sum()
}
