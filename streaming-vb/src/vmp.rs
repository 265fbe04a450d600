use crate::parameters::*;
use crate::plate::*;
use expfam_param::NaturalParam;
use log::{debug, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VmpConfig {
    pub max_iter: usize,
    /// relative change (ELBO or natural parameters) to stop at
    pub threshold: f64,
    /// compute the ELBO after every sweep and use it for convergence
    pub test_elbo: bool,
}

impl Default for VmpConfig {
    fn default() -> Self {
        Self {
            max_iter: 1000,
            threshold: 1e-4,
            test_elbo: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmpState {
    Initialized,
    Iterating,
    Converged,
    MaxIterReached,
}

#[derive(Debug, Clone)]
pub struct VmpOutcome {
    /// prior plus the expected statistics of the batch
    pub posterior: GlobalParams,
    /// ELBO of the final state
    pub elbo: f64,
    /// one entry per sweep when `test_elbo` is set
    pub elbo_trace: Vec<f64>,
    pub iterations: usize,
    pub state: VmpState,
}

/// Coordinate ascent over the local and global nodes of one plate
pub struct Vmp<'a> {
    layout: &'a PlateLayout,
    config: &'a VmpConfig,
    parallel: bool,
    level: log::Level,
}

impl<'a> Vmp<'a> {
    pub fn new(layout: &'a PlateLayout, config: &'a VmpConfig) -> Self {
        Self {
            layout,
            config,
            parallel: false,
            level: log::Level::Debug,
        }
    }

    /// run the per-record local updates on the rayon pool
    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// iteration caps are reported as warnings at `Info` or above
    pub fn log_level(mut self, level: log::Level) -> Self {
        self.level = level;
        self
    }

    pub fn run(&self, prior: &GlobalParams, plate: &mut Plate) -> anyhow::Result<VmpOutcome> {
        let mut state = VmpState::Initialized;

        // start from the randomly initialized local nodes
        let mut posterior = self.global_update(prior, plate);
        let mut moments = posterior.moments()?;

        let max_iter = self.config.max_iter.max(1);
        let mut elbo_trace = Vec::new();
        let mut iterations = 0;

        while iterations < max_iter {
            state = VmpState::Iterating;
            iterations += 1;

            self.local_update(plate, &moments);
            let next = self.global_update(prior, plate);
            moments = next.moments()?;
            let change = next.max_relative_change(&posterior);
            posterior = next;

            let converged = if self.config.test_elbo {
                let elbo = self.elbo(prior, &posterior, &moments, plate)?;
                let prev = elbo_trace.last().copied();
                elbo_trace.push(elbo);

                match prev {
                    Some(prev) => {
                        if elbo < prev - 1e-8 * prev.abs().max(1.0) {
                            warn!("ELBO decreased at sweep {}: {} -> {}", iterations, prev, elbo);
                        }
                        (elbo - prev).abs() / elbo.abs().max(f64::MIN_POSITIVE)
                            < self.config.threshold
                    }
                    None => false,
                }
            } else {
                change < self.config.threshold
            };

            debug!("VMP sweep {:4}: max relative change = {:.3e}", iterations, change);

            if converged || plate.num_latent() == 0 {
                state = VmpState::Converged;
                break;
            }
        }

        if state != VmpState::Converged {
            state = VmpState::MaxIterReached;
            if self.level <= log::Level::Info {
                warn!("VMP stopped at the iteration cap ({})", max_iter);
            } else {
                debug!("VMP stopped at the iteration cap ({})", max_iter);
            }
        }

        let elbo = match elbo_trace.last() {
            Some(&elbo) => elbo,
            None => self.elbo(prior, &posterior, &moments, plate)?,
        };

        debug!(
            "VMP {:?} after {} sweeps: {} records, {} latent nodes, ELBO = {:.4}",
            state,
            iterations,
            plate.num_records(),
            plate.num_latent(),
            elbo
        );

        Ok(VmpOutcome {
            posterior,
            elbo,
            elbo_trace,
            iterations,
            state,
        })
    }

    fn local_update(&self, plate: &mut Plate, moments: &[BlockMoments]) {
        if plate.num_latent() == 0 {
            return;
        }
        let layout = self.layout;
        let num_vars = plate.num_vars().max(1);
        if self.parallel {
            plate
                .arena_mut()
                .par_chunks_mut(num_vars)
                .for_each(|record| layout.update_record(record, moments));
        } else {
            plate
                .records_mut()
                .for_each(|record| layout.update_record(record, moments));
        }
    }

    /// prior plus expected sufficient statistics, summed in record order
    fn global_update(&self, prior: &GlobalParams, plate: &Plate) -> GlobalParams {
        let mut posterior = prior.clone();
        for record in plate.records() {
            self.layout.accumulate(record, &mut posterior);
        }
        posterior
    }

    fn elbo(
        &self,
        prior: &GlobalParams,
        posterior: &GlobalParams,
        moments: &[BlockMoments],
        plate: &Plate,
    ) -> anyhow::Result<f64> {
        let layout = self.layout;
        let num_vars = plate.num_vars().max(1);

        let local: f64 = if self.parallel {
            plate
                .arena()
                .par_chunks(num_vars)
                .map(|record| layout.record_elbo(record, moments))
                .collect::<Vec<f64>>()
                .into_iter()
                .sum()
        } else {
            plate
                .records()
                .map(|record| layout.record_elbo(record, moments))
                .sum()
        };

        Ok(local - posterior.kl_divergence(prior)?)
    }
}
