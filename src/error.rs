use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Lifecycle of a single evaluation run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Idle,
    Gating,
    BaselineScoring,
    FineTuning,
    PostScoring,
    Done,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Idle => "idle",
            Stage::Gating => "gating",
            Stage::BaselineScoring => "baseline_scoring",
            Stage::FineTuning => "fine_tuning",
            Stage::PostScoring => "post_scoring",
            Stage::Done => "done",
            Stage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Errors raised by the evaluation pipeline
#[derive(Debug, Error)]
pub enum CrucibleError {
    /// A record field was empty at construction time.
    #[error("record field '{field}' must not be empty")]
    InvalidRecord { field: &'static str },

    /// The gate refused the dataset.
    #[error("data rejected by validator {validator}")]
    DataRejected { validator: String },

    /// A capability was configured without the piece that decides its outcome.
    #[error("capability not implemented: {capability}")]
    Unimplemented { capability: String },

    /// The model backend failed; the run aborts in the stage it was in.
    #[error("backend failure during {stage}")]
    Backend {
        stage: Stage,
        #[source]
        source: anyhow::Error,
    },

    /// The backend returned a different number of outputs than it was given prompts.
    #[error("backend returned {actual} outputs for {expected} prompts")]
    OutputMismatch { expected: usize, actual: usize },
}

pub type CrucibleResult<T> = std::result::Result<T, CrucibleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_rejected_names_validator() {
        let err = CrucibleError::DataRejected {
            validator: "unique_prompts".to_string(),
        };
        assert!(err.to_string().contains("unique_prompts"));
    }

    #[test]
    fn test_backend_error_keeps_source_and_stage() {
        let err = CrucibleError::Backend {
            stage: Stage::FineTuning,
            source: anyhow::anyhow!("connection reset"),
        };
        assert_eq!(err.to_string(), "backend failure during fine_tuning");
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "connection reset");
    }

    #[test]
    fn test_stage_serializes_snake_case() {
        let json = serde_json::to_string(&Stage::BaselineScoring).unwrap();
        assert_eq!(json, "\"baseline_scoring\"");
    }
}
