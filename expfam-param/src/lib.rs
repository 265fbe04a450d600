//! Conjugate exponential-family parameter blocks.
//!
//! Each block keeps its natural parameters in an additive form so that a
//! Bayesian update, a posterior delta, a merge of several deltas and an
//! exponential discount are all plain `add_scaled`/`scale` operations.

pub mod dmatrix_dirichlet;
pub mod normal_gamma;
pub mod traits;

pub use dmatrix_dirichlet::DirichletMatrix;
pub use normal_gamma::{NormalGamma, NormalGammaMoments, NormalGammaPrior};
pub use traits::NaturalParam;
