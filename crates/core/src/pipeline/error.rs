use crate::pipeline::StageName;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineError {
    /// Caller input rejected before any stage ran.
    Validation(String),
    /// The reasoning call of a stage raised; the run is failed.
    StageFailed { stage: StageName, detail: String },
    /// The task graph cannot be scheduled (cycle, unknown or duplicate stage, missing output).
    InvalidGraph(String),
}

impl PipelineError {
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation(detail) => write!(f, "invalid request: {detail}"),
            Self::StageFailed { stage, detail } => write!(f, "stage {stage} failed: {detail}"),
            Self::InvalidGraph(detail) => write!(f, "invalid task graph: {detail}"),
        }
    }
}

impl std::error::Error for PipelineError {}
