//! SVB with exponential forgetting for drifting streams.
//!
//! Before each batch the evidence accumulated on top of the structural
//! prior is discounted: `posterior <- prior + lambda * (posterior - prior)`.

use crate::dag::Dag;
use crate::datastream::*;
use crate::errors::LearningError;
use crate::learning::ParameterLearningAlgorithm;
use crate::network::BayesianNetwork;
use crate::svb::Svb;
use expfam_param::NaturalParam;
use log::log;
use std::sync::Arc;

pub struct FadingSvb {
    svb: Svb,
    fading_factor: f64,
}

impl Default for FadingSvb {
    fn default() -> Self {
        Self {
            svb: Svb::default(),
            fading_factor: 1.0,
        }
    }
}

impl FadingSvb {
    pub fn new(svb: Svb, fading_factor: f64) -> anyhow::Result<Self> {
        let mut ret = Self {
            svb,
            fading_factor: 1.0,
        };
        ret.set_fading_factor(fading_factor)?;
        Ok(ret)
    }

    /// `lambda` in `(0, 1]`; 1 never forgets
    pub fn set_fading_factor(&mut self, lambda: f64) -> anyhow::Result<()> {
        if !(lambda > 0.0 && lambda <= 1.0) {
            return Err(LearningError::Configuration(format!(
                "fading factor must be in (0, 1], got {}",
                lambda
            ))
            .into());
        }
        self.fading_factor = lambda;
        Ok(())
    }

    pub fn fading_factor(&self) -> f64 {
        self.fading_factor
    }

    pub fn set_window_size(&mut self, window_size: usize) -> anyhow::Result<()> {
        self.svb.set_window_size(window_size)
    }

    pub fn svb(&self) -> &Svb {
        &self.svb
    }
}

impl ParameterLearningAlgorithm for FadingSvb {
    fn init_learning(&mut self) -> anyhow::Result<()> {
        self.svb.init_learning()
    }

    fn set_data_stream(&mut self, stream: Box<dyn DataStream>) {
        self.svb.set_data_stream(stream);
    }

    fn set_dag(&mut self, dag: Arc<Dag>) -> anyhow::Result<()> {
        self.svb.set_dag(dag)
    }

    fn set_seed(&mut self, seed: u64) {
        self.svb.set_seed(seed);
    }

    fn set_parallel_mode(&mut self, parallel: bool) {
        self.svb.set_parallel_mode(parallel);
    }

    fn set_output(&mut self, output: bool) {
        self.svb.set_output(output);
    }

    fn update_model(&mut self, batch: &DataOnMemory) -> anyhow::Result<f64> {
        let mut current = self.svb.posterior()?.clone();
        if self.fading_factor < 1.0 {
            current.fade_towards(self.svb.prior()?, self.fading_factor);
        }
        let outcome = self.svb.batch_posterior(&current, batch)?;
        self.svb.commit(outcome.posterior, outcome.elbo)?;
        Ok(outcome.elbo)
    }

    fn run_learning(&mut self) -> anyhow::Result<()> {
        let mut stream = self
            .svb
            .take_data_stream()
            .ok_or_else(|| LearningError::Configuration("no data stream has been set".into()))?;

        let ret = self.init_learning().and_then(|_| {
            let window_size = self.svb.window_size();
            while let Some(batch) = stream.next_batch(window_size) {
                self.update_model(&batch)?;
            }
            Ok(())
        });

        self.svb.set_data_stream(stream);
        ret?;

        log!(
            self.svb.log_level(),
            "fading SVB done: lambda = {}, log marginal = {:.4}",
            self.fading_factor,
            self.svb.log_marginal_probability()
        );
        Ok(())
    }

    fn log_marginal_probability(&self) -> f64 {
        self.svb.log_marginal_probability()
    }

    fn learnt_bayesian_network(&self) -> anyhow::Result<BayesianNetwork> {
        self.svb.learnt_bayesian_network()
    }
}
