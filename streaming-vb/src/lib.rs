//! Streaming variational Bayes for Bayesian networks with mixed
//! multinomial and conditional linear Gaussian variables.
//!
//! # Model
//!
//! Every variable carries a conjugate prior per configuration of its
//! discrete parents (Dirichlet for multinomial, Normal-Gamma for normal
//! variables). A batch is replicated into a plate of local nodes and
//! variational message passing alternates local updates of the missing
//! discrete values with global updates of the parameters. The batch
//! posterior becomes the prior of the next batch.
//!
//! # Learners
//!
//! * [`Svb`]: one batch at a time
//! * [`ParallelSvb`]: rounds of one batch per worker, merged by adding
//!   the posterior deltas onto the shared snapshot
//! * [`FadingSvb`]: discounts past evidence before each batch

/// Failure kinds carried inside `anyhow::Error`
pub mod errors;

/// Variables and their kinds
pub mod variables;

/// Acyclic dependency graph
pub mod dag;

/// Records, in-memory batches and streams
pub mod datastream;

/// Concrete networks materialized from a posterior
pub mod network;

/// Natural parameters of the whole network
pub mod parameters;

/// Per-batch arena of local nodes
pub mod plate;

/// Variational message passing
pub mod vmp;

/// Common interface of the learners
pub mod learning;

/// Streaming variational Bayes
pub mod svb;

/// Data-parallel SVB
pub mod parallel_svb;

/// SVB with exponential forgetting
pub mod fading;

pub use dag::Dag;
pub use datastream::*;
pub use errors::LearningError;
pub use fading::FadingSvb;
pub use learning::{learn_parameters, ParameterLearningAlgorithm};
pub use network::*;
pub use parallel_svb::ParallelSvb;
pub use parameters::{GlobalParams, PriorConfig};
pub use svb::{Svb, SvbConfig};
pub use variables::*;
pub use vmp::{VmpConfig, VmpOutcome, VmpState};
