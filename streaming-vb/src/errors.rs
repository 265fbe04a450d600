use thiserror::Error;

/// Failures surfaced by the learners.
///
/// Functions return `anyhow::Result`; callers that need to react to a
/// particular kind can `downcast_ref::<LearningError>()`.
#[derive(Debug, Error)]
pub enum LearningError {
    #[error("structural error: {0}")]
    Structural(String),

    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("worker {worker} failed: {message}")]
    WorkerFailure { worker: usize, message: String },

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl LearningError {
    pub fn of(err: &anyhow::Error) -> Option<&LearningError> {
        err.downcast_ref::<LearningError>()
    }
}
