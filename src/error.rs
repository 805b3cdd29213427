use thiserror::Error;

/// Load-time and flattening errors. All of them abort a run before any
/// task is dispatched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StitchesError {
    #[error("Malformed resource reference \"{reference}\": {reason}")]
    MalformedReference { reference: String, reason: String },

    #[error("Failed to load pipeline \"{pipeline}\": {reason}")]
    PipelineLoad { pipeline: String, reason: String },

    #[error("Cyclic pipeline nesting: {}", chain.join(" -> "))]
    CyclicPipeline { chain: Vec<String> },

    #[error("Task {index} in \"{pipeline}\" must define exactly one of `task` or `pipeline`")]
    AmbiguousTaskDefinition { pipeline: String, index: usize },
}

impl StitchesError {
    pub fn malformed(reference: &str, reason: impl Into<String>) -> Self {
        Self::MalformedReference {
            reference: reference.to_string(),
            reason: reason.into(),
        }
    }

    pub fn load(pipeline: &str, reason: impl Into<String>) -> Self {
        Self::PipelineLoad {
            pipeline: pipeline.to_string(),
            reason: reason.into(),
        }
    }
}

/// Failure reported by the dispatch collaborator. Halts the run.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Task [{task}] failed: {detail}")]
pub struct DispatchFailure {
    pub task: String,
    pub detail: String,
}

impl DispatchFailure {
    pub fn new(task: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            detail: detail.into(),
        }
    }
}
