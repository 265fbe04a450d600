use crate::dag::Dag;
use crate::datastream::*;
use crate::network::BayesianNetwork;
use crate::svb::Svb;
use std::sync::Arc;

/// Capabilities shared by the plain, parallel and fading learners
pub trait ParameterLearningAlgorithm {
    /// Reset the running posterior to the structural prior of the DAG
    /// and the log marginal to zero.
    fn init_learning(&mut self) -> anyhow::Result<()>;

    fn set_data_stream(&mut self, stream: Box<dyn DataStream>);

    /// Fails with a structural error once learning has started.
    fn set_dag(&mut self, dag: Arc<Dag>) -> anyhow::Result<()>;

    /// takes effect at the next [`init_learning`](Self::init_learning)
    fn set_seed(&mut self, seed: u64);

    fn set_parallel_mode(&mut self, parallel: bool);

    /// progress at `info` level when on, `debug` otherwise
    fn set_output(&mut self, output: bool);

    /// Fold one batch into the running posterior; returns the ELBO of
    /// the batch.
    fn update_model(&mut self, batch: &DataOnMemory) -> anyhow::Result<f64>;

    /// Initialize, then consume the whole stream window by window.
    fn run_learning(&mut self) -> anyhow::Result<()>;

    /// running sum of the batch ELBOs
    fn log_marginal_probability(&self) -> f64;

    /// Expected parameters of the current posterior (the prior before
    /// learning started).
    fn learnt_bayesian_network(&self) -> anyhow::Result<BayesianNetwork>;
}

/// Learn the parameters of `dag` from `stream` with default settings
pub fn learn_parameters(dag: Arc<Dag>, stream: Box<dyn DataStream>) -> anyhow::Result<BayesianNetwork> {
    let mut svb = Svb::default();
    svb.set_dag(dag)?;
    svb.set_data_stream(stream);
    svb.run_learning()?;
    svb.learnt_bayesian_network()
}
