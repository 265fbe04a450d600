//! Round-based data-parallel SVB.
//!
//! Every round deals one window to each worker. All workers start from
//! the same snapshot of the running posterior; once all of them are
//! done the deltas `posterior_w - prior` are summed onto the snapshot.

use crate::dag::Dag;
use crate::datastream::*;
use crate::errors::LearningError;
use crate::learning::ParameterLearningAlgorithm;
use crate::network::BayesianNetwork;
use crate::parameters::GlobalParams;
use crate::svb::*;
use crate::vmp::VmpOutcome;
use log::log;
use rayon::prelude::*;
use std::sync::Arc;

pub struct ParallelSvb {
    num_workers: usize,
    /// holds the graph, the settings and the merged posterior
    engine: Svb,
    workers: Vec<Svb>,
    /// run the workers of a round on `pool`; on unless switched off
    parallel_mode: bool,
    pool: Option<rayon::ThreadPool>,
    stream: Option<Box<dyn DataStream>>,
    num_rounds: usize,
}

impl Default for ParallelSvb {
    fn default() -> Self {
        Self {
            num_workers: num_cpus::get(),
            engine: Svb::default(),
            workers: vec![],
            parallel_mode: true,
            pool: None,
            stream: None,
            num_rounds: 0,
        }
    }
}

impl ParallelSvb {
    /// # Arguments
    /// * `engine` - template whose settings every worker copies
    /// * `num_workers` - defaults to the number of logical cores
    pub fn new(engine: Svb, num_workers: Option<usize>) -> anyhow::Result<Self> {
        let mut ret = Self {
            engine,
            ..Default::default()
        };
        if let Some(n) = num_workers {
            ret.set_num_workers(n)?;
        }
        Ok(ret)
    }

    pub fn set_num_workers(&mut self, num_workers: usize) -> anyhow::Result<()> {
        if num_workers == 0 {
            return Err(
                LearningError::Configuration("number of workers must be positive".into()).into(),
            );
        }
        self.num_workers = num_workers;
        Ok(())
    }

    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    pub fn set_window_size(&mut self, window_size: usize) -> anyhow::Result<()> {
        self.engine.set_window_size(window_size)
    }

    pub fn parallel_mode(&self) -> bool {
        self.parallel_mode
    }

    /// threads of the worker pool, `None` when rounds run serially
    pub fn pool_threads(&self) -> Option<usize> {
        self.pool.as_ref().map(|p| p.current_num_threads())
    }

    pub fn engine(&self) -> &Svb {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut Svb {
        &mut self.engine
    }

    fn level(&self) -> log::Level {
        if self.engine.config().output {
            log::Level::Info
        } else {
            log::Level::Debug
        }
    }

    /// Run one synchronized round; `batches[i]` goes to worker `i`.
    /// Nothing is committed unless every worker succeeds.
    pub fn run_round(&mut self, batches: &[DataOnMemory]) -> anyhow::Result<f64> {
        if batches.len() > self.workers.len() {
            return Err(LearningError::Configuration(format!(
                "{} batches for {} workers (was learning initialized?)",
                batches.len(),
                self.workers.len()
            ))
            .into());
        }

        let prior = self.engine.posterior()?.clone();
        let workers = &mut self.workers[..batches.len()];

        let results: Vec<anyhow::Result<VmpOutcome>> = match &self.pool {
            Some(pool) if self.parallel_mode => pool.install(|| {
                workers
                    .par_iter_mut()
                    .zip(batches.par_iter())
                    .map(|(w, b)| w.batch_posterior(&prior, b))
                    .collect()
            }),
            _ => workers
                .iter_mut()
                .zip(batches.iter())
                .map(|(w, b)| w.batch_posterior(&prior, b))
                .collect(),
        };

        // barrier: every worker has reported
        let outcomes = results
            .into_iter()
            .enumerate()
            .map(|(worker, res)| {
                res.map_err(|e| {
                    anyhow::Error::from(LearningError::WorkerFailure {
                        worker,
                        message: format!("{:#}", e),
                    })
                })
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        let mut elbo = 0.0;
        let mut posteriors = Vec::with_capacity(outcomes.len());
        for out in outcomes {
            elbo += out.elbo;
            posteriors.push(out.posterior);
        }

        let merged = GlobalParams::merge(&prior, &posteriors);
        self.engine.commit(merged, elbo)?;
        self.num_rounds += 1;

        log!(
            self.level(),
            "round {:4}: {} workers, {} records, ELBO = {:.4}",
            self.num_rounds,
            batches.len(),
            batches.iter().map(|b| b.len()).sum::<usize>(),
            elbo
        );

        Ok(elbo)
    }
}

impl ParameterLearningAlgorithm for ParallelSvb {
    fn init_learning(&mut self) -> anyhow::Result<()> {
        self.engine.init_learning()?;

        self.workers = (0..self.num_workers)
            .map(|i| self.engine.spawn_worker(i))
            .collect::<anyhow::Result<Vec<_>>>()?;

        self.pool = if self.parallel_mode && self.num_workers > 1 {
            Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(self.num_workers)
                    .build()?,
            )
        } else {
            None
        };

        self.num_rounds = 0;
        Ok(())
    }

    fn set_data_stream(&mut self, stream: Box<dyn DataStream>) {
        self.stream = Some(stream);
    }

    fn set_dag(&mut self, dag: Arc<Dag>) -> anyhow::Result<()> {
        self.engine.set_dag(dag)
    }

    fn set_seed(&mut self, seed: u64) {
        self.engine.set_seed(seed);
    }

    /// Workers always update their records serially; this switches the
    /// pool that runs the workers side by side.
    fn set_parallel_mode(&mut self, parallel: bool) {
        self.parallel_mode = parallel;
    }

    fn set_output(&mut self, output: bool) {
        self.engine.set_output(output);
    }

    /// split `batch` into contiguous parts, one per worker
    fn update_model(&mut self, batch: &DataOnMemory) -> anyhow::Result<f64> {
        if batch.is_empty() {
            return Ok(0.0);
        }
        let parts = batch.split_contiguous(self.workers.len().max(1));
        self.run_round(&parts)
    }

    fn run_learning(&mut self) -> anyhow::Result<()> {
        let mut stream = self
            .stream
            .take()
            .ok_or_else(|| LearningError::Configuration("no data stream has been set".into()))?;

        let ret = self.init_learning().and_then(|_| {
            let window_size = self.engine.window_size();
            loop {
                let batches: Vec<DataOnMemory> = (0..self.num_workers)
                    .map_while(|_| stream.next_batch(window_size))
                    .collect();
                if batches.is_empty() {
                    break;
                }
                self.run_round(&batches)?;
            }
            Ok(())
        });

        self.stream = Some(stream);
        ret?;

        log!(
            self.level(),
            "ParallelSVB done: {} rounds on {} workers, log marginal = {:.4}",
            self.num_rounds,
            self.num_workers,
            self.engine.log_marginal_probability()
        );
        Ok(())
    }

    fn log_marginal_probability(&self) -> f64 {
        self.engine.log_marginal_probability()
    }

    fn learnt_bayesian_network(&self) -> anyhow::Result<BayesianNetwork> {
        self.engine.learnt_bayesian_network()
    }
}
