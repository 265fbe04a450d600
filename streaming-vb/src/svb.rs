//! Streaming variational Bayes: the posterior after one batch is the
//! prior of the next.

use crate::dag::Dag;
use crate::datastream::*;
use crate::errors::LearningError;
use crate::learning::ParameterLearningAlgorithm;
use crate::network::BayesianNetwork;
use crate::parameters::*;
use crate::plate::PlateLayout;
use crate::vmp::*;
use log::log;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SvbConfig {
    /// number of records per batch pulled from the stream
    pub window_size: usize,
    /// seeds the initialization of latent nodes
    pub seed: u64,
    pub parallel_mode: bool,
    pub output: bool,
    pub vmp: VmpConfig,
    pub prior: PriorConfig,
}

impl Default for SvbConfig {
    fn default() -> Self {
        Self {
            window_size: 1000,
            seed: 0,
            parallel_mode: false,
            output: false,
            vmp: VmpConfig::default(),
            prior: PriorConfig::default(),
        }
    }
}

impl SvbConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.window_size == 0 {
            return Err(LearningError::Configuration("window size must be positive".into()).into());
        }
        if self.vmp.max_iter == 0 {
            return Err(LearningError::Configuration("max_iter must be positive".into()).into());
        }
        if !(self.vmp.threshold >= 0.0) {
            return Err(LearningError::Configuration(format!(
                "invalid threshold {}",
                self.vmp.threshold
            ))
            .into());
        }
        let prior = &self.prior;
        if [
            prior.dirichlet_alpha,
            prior.normal_precision,
            prior.gamma_shape,
            prior.gamma_rate,
        ]
        .iter()
        .any(|&x| !(x > 0.0 && x.is_finite()))
        {
            return Err(
                LearningError::Configuration(format!("invalid prior {:?}", prior)).into(),
            );
        }
        Ok(())
    }
}

struct LearningState {
    prior: GlobalParams,
    posterior: GlobalParams,
    rng: StdRng,
    num_batches: usize,
}

pub struct Svb {
    config: SvbConfig,
    dag: Option<Arc<Dag>>,
    layout: Option<Arc<PlateLayout>>,
    stream: Option<Box<dyn DataStream>>,
    state: Option<LearningState>,
    log_marginal: f64,
}

impl Default for Svb {
    fn default() -> Self {
        Self {
            config: SvbConfig::default(),
            dag: None,
            layout: None,
            stream: None,
            state: None,
            log_marginal: 0.0,
        }
    }
}

impl Svb {
    pub fn new(config: SvbConfig) -> anyhow::Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            ..Default::default()
        })
    }

    pub fn config(&self) -> &SvbConfig {
        &self.config
    }

    pub fn set_window_size(&mut self, window_size: usize) -> anyhow::Result<()> {
        if window_size == 0 {
            return Err(LearningError::Configuration("window size must be positive".into()).into());
        }
        self.config.window_size = window_size;
        Ok(())
    }

    pub fn window_size(&self) -> usize {
        self.config.window_size
    }

    pub fn set_vmp_config(&mut self, vmp: VmpConfig) -> anyhow::Result<()> {
        let config = SvbConfig {
            vmp,
            ..self.config.clone()
        };
        config.validate()?;
        self.config = config;
        Ok(())
    }

    /// used by the next [`init_learning`](ParameterLearningAlgorithm::init_learning)
    pub fn set_prior_config(&mut self, prior: PriorConfig) -> anyhow::Result<()> {
        let config = SvbConfig {
            prior,
            ..self.config.clone()
        };
        config.validate()?;
        self.config = config;
        Ok(())
    }

    pub fn dag(&self) -> Option<&Arc<Dag>> {
        self.dag.as_ref()
    }

    pub fn is_learning(&self) -> bool {
        self.state.is_some()
    }

    pub fn take_data_stream(&mut self) -> Option<Box<dyn DataStream>> {
        self.stream.take()
    }

    pub(crate) fn log_level(&self) -> log::Level {
        if self.config.output {
            log::Level::Info
        } else {
            log::Level::Debug
        }
    }

    fn state(&self) -> anyhow::Result<&LearningState> {
        self.state.as_ref().ok_or_else(|| {
            LearningError::Configuration("learning has not been initialized".into()).into()
        })
    }

    /// structural prior of the current run
    pub fn prior(&self) -> anyhow::Result<&GlobalParams> {
        Ok(&self.state()?.prior)
    }

    /// running posterior
    pub fn posterior(&self) -> anyhow::Result<&GlobalParams> {
        Ok(&self.state()?.posterior)
    }

    /// A learner over the same graph and settings seeded with
    /// `seed + index`, without a stream, already initialized
    pub fn spawn_worker(&self, index: usize) -> anyhow::Result<Svb> {
        let mut worker = Svb {
            config: SvbConfig {
                seed: self.config.seed.wrapping_add(index as u64),
                parallel_mode: false,
                output: false,
                ..self.config.clone()
            },
            dag: self.dag.clone(),
            layout: self.layout.clone(),
            stream: None,
            state: None,
            log_marginal: 0.0,
        };
        worker.init_learning()?;
        Ok(worker)
    }

    /// Run VMP on `batch` starting from `prior` without touching the
    /// running posterior. Only the random stream of the learner moves.
    pub fn batch_posterior(
        &mut self,
        prior: &GlobalParams,
        batch: &DataOnMemory,
    ) -> anyhow::Result<VmpOutcome> {
        let level = self.log_level();
        let layout = self
            .layout
            .clone()
            .ok_or_else(|| LearningError::Configuration("no DAG has been set".into()))?;
        let state = self.state.as_mut().ok_or_else(|| {
            LearningError::Configuration("learning has not been initialized".into())
        })?;

        let mut plate = layout.build(batch, &mut state.rng)?;

        Vmp::new(&layout, &self.config.vmp)
            .parallel(self.config.parallel_mode)
            .log_level(level)
            .run(prior, &mut plate)
    }

    /// Replace the running posterior and add `elbo` to the log marginal
    pub fn commit(&mut self, posterior: GlobalParams, elbo: f64) -> anyhow::Result<()> {
        let level = self.log_level();
        let state = self.state.as_mut().ok_or_else(|| {
            LearningError::Configuration("learning has not been initialized".into())
        })?;
        state.posterior = posterior;
        state.num_batches += 1;
        self.log_marginal += elbo;

        log!(
            level,
            "batch {:5}: ELBO = {:12.4}, log marginal = {:14.4}",
            state.num_batches,
            elbo,
            self.log_marginal
        );
        Ok(())
    }
}

impl ParameterLearningAlgorithm for Svb {
    fn init_learning(&mut self) -> anyhow::Result<()> {
        self.config.validate()?;
        let dag = self
            .dag
            .as_ref()
            .ok_or_else(|| LearningError::Configuration("no DAG has been set".into()))?;

        let prior = GlobalParams::prior(dag, &self.config.prior);
        self.state = Some(LearningState {
            posterior: prior.clone(),
            prior,
            rng: StdRng::seed_from_u64(self.config.seed),
            num_batches: 0,
        });
        self.log_marginal = 0.0;
        Ok(())
    }

    fn set_data_stream(&mut self, stream: Box<dyn DataStream>) {
        self.stream = Some(stream);
    }

    fn set_dag(&mut self, dag: Arc<Dag>) -> anyhow::Result<()> {
        if self.state.is_some() {
            return Err(
                LearningError::Structural("cannot change the DAG after learning started".into())
                    .into(),
            );
        }
        self.layout = Some(Arc::new(PlateLayout::new(&dag)?));
        self.dag = Some(dag);
        Ok(())
    }

    fn set_seed(&mut self, seed: u64) {
        self.config.seed = seed;
    }

    fn set_parallel_mode(&mut self, parallel: bool) {
        self.config.parallel_mode = parallel;
    }

    fn set_output(&mut self, output: bool) {
        self.config.output = output;
    }

    fn update_model(&mut self, batch: &DataOnMemory) -> anyhow::Result<f64> {
        let current = self.posterior()?.clone();
        let outcome = self.batch_posterior(&current, batch)?;
        self.commit(outcome.posterior, outcome.elbo)?;
        Ok(outcome.elbo)
    }

    fn run_learning(&mut self) -> anyhow::Result<()> {
        let mut stream = self
            .stream
            .take()
            .ok_or_else(|| LearningError::Configuration("no data stream has been set".into()))?;

        let ret = self.init_learning().and_then(|_| {
            let window_size = self.config.window_size;
            while let Some(batch) = stream.next_batch(window_size) {
                self.update_model(&batch)?;
            }
            Ok(())
        });

        self.stream = Some(stream);
        ret?;

        log!(
            self.log_level(),
            "SVB done: {} batches, log marginal = {:.4}",
            self.state()?.num_batches,
            self.log_marginal
        );
        Ok(())
    }

    fn log_marginal_probability(&self) -> f64 {
        self.log_marginal
    }

    fn learnt_bayesian_network(&self) -> anyhow::Result<BayesianNetwork> {
        let dag = self
            .dag
            .clone()
            .ok_or_else(|| LearningError::Configuration("no DAG has been set".into()))?;
        match &self.state {
            Some(state) => state.posterior.to_network(dag),
            None => GlobalParams::prior(&dag, &self.config.prior).to_network(dag),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variables::*;
    use approx::assert_abs_diff_eq;

    fn two_node() -> anyhow::Result<Arc<Dag>> {
        let mut vars = Variables::new();
        let a = vars.new_multinomial("A", 2)?;
        let b = vars.new_multinomial("B", 2)?;
        let mut dag = Dag::new(vars);
        dag.add_parent(&b, &a)?;
        Ok(Arc::new(dag))
    }

    fn records(n: usize) -> Vec<DataInstance> {
        (0..n)
            .map(|i| {
                let a = i % 4 == 0;
                let b = if a { i % 5 != 0 } else { i % 7 == 0 };
                DataInstance::new(vec![
                    Value::Discrete(a as usize),
                    Value::Discrete(b as usize),
                ])
            })
            .collect()
    }

    fn configuration(err: &anyhow::Error) -> bool {
        matches!(
            LearningError::of(err),
            Some(LearningError::Configuration(_))
        )
    }

    #[test]
    fn test_update_before_init_fails() -> anyhow::Result<()> {
        let dag = two_node()?;
        let mut svb = Svb::default();
        svb.set_dag(dag.clone())?;
        let batch = DataOnMemory::new(attributes_of(dag.variables()).into(), records(10));
        assert!(configuration(&svb.update_model(&batch).unwrap_err()));
        Ok(())
    }

    #[test]
    fn test_network_requires_dag() {
        let svb = Svb::default();
        assert!(configuration(&svb.learnt_bayesian_network().unwrap_err()));
    }

    #[test]
    fn test_set_dag_after_start_fails() -> anyhow::Result<()> {
        let dag = two_node()?;
        let mut svb = Svb::default();
        svb.set_dag(dag.clone())?;
        svb.init_learning()?;
        let err = svb.set_dag(dag).unwrap_err();
        assert!(matches!(
            LearningError::of(&err),
            Some(LearningError::Structural(_))
        ));
        Ok(())
    }

    #[test]
    fn test_zero_window_rejected() {
        let mut svb = Svb::default();
        assert!(configuration(&svb.set_window_size(0).unwrap_err()));
        let config = SvbConfig {
            window_size: 0,
            ..Default::default()
        };
        assert!(Svb::new(config).is_err());
    }

    #[test]
    fn test_batches_add_up_to_one_big_batch() -> anyhow::Result<()> {
        // fully observed conjugate updates are exact, so the chain rule
        // holds for both the posterior and the log marginal
        let dag = two_node()?;
        let attrs: Arc<[Attribute]> = attributes_of(dag.variables()).into();
        let data = records(300);

        let mut whole = Svb::default();
        whole.set_dag(dag.clone())?;
        whole.init_learning()?;
        whole.update_model(&DataOnMemory::new(attrs.clone(), data.clone()))?;

        let mut streamed = Svb::default();
        streamed.set_dag(dag.clone())?;
        streamed.set_window_size(70)?;
        streamed.set_data_stream(Box::new(VecDataStream::new(
            attributes_of(dag.variables()),
            data,
        )));
        streamed.run_learning()?;

        assert_abs_diff_eq!(
            whole.log_marginal_probability(),
            streamed.log_marginal_probability(),
            epsilon = 1e-8
        );
        assert!(whole
            .learnt_bayesian_network()?
            .equal_bns(&streamed.learnt_bayesian_network()?, 1e-9));
        Ok(())
    }

    #[test]
    fn test_config_from_json() -> anyhow::Result<()> {
        let config: SvbConfig =
            serde_json::from_str(r#"{ "window_size": 250, "vmp": { "test_elbo": true } }"#)?;
        assert_eq!(config.window_size, 250);
        assert!(config.vmp.test_elbo);
        assert_eq!(config.vmp.max_iter, 1000);
        assert_eq!(config.prior, PriorConfig::default());
        Ok(())
    }
}
