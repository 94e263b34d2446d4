use std::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("Data unavailable from `{origin}`: {reason}")]
    DataUnavailable { origin: String, reason: String },
    #[error("Insufficient data for `{entity}`: need at least {required} valid points, got {actual}")]
    InsufficientData {
        entity: String,
        required: usize,
        actual: usize,
    },
    #[error("Fitting `{entity}` exceeded the {budget:?} budget")]
    FitTimeout { entity: String, budget: Duration },
    #[error("Numerical failure while fitting `{entity}`: {reason}")]
    NumericalFailure { entity: String, reason: String },
    #[error("No entity in the selection produced a usable forecast")]
    EmptyResult,
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl PipelineError {
    /// Fatal errors abort the session; the rest only drop one entity from a batch.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PipelineError::DataUnavailable { .. } | PipelineError::InvalidConfig(_)
        )
    }

    pub(crate) fn unavailable(source: &str, reason: impl ToString) -> Self {
        PipelineError::DataUnavailable {
            origin: source.to_string(),
            reason: reason.to_string(),
        }
    }
}
