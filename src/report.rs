//! Run-scoped reporting hooks.
//!
//! The orchestrator never configures logging itself; it is handed a
//! [`Reporter`] by whoever drives the run. [`TracingReporter`] forwards every
//! hook to `tracing`, whose subscriber the binary installs at start-up.

use crate::error::Stage;
use tracing::{info, warn};

/// Observer of a single evaluation run
pub trait Reporter: Send + Sync {
    /// The run entered `stage`
    fn stage(&self, stage: Stage);

    /// The gate refused the dataset
    fn rejected(&self, validator: &str);

    /// A scoring pass finished
    fn phase_scored(&self, stage: Stage, aggregate: f64);
}

/// Emits every hook as a structured `tracing` event
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn stage(&self, stage: Stage) {
        info!(event = "run.stage", stage = %stage);
    }

    fn rejected(&self, validator: &str) {
        warn!(event = "gate.rejected", validator, "Data is not valid for {}", validator);
    }

    fn phase_scored(&self, stage: Stage, aggregate: f64) {
        info!(event = "phase.scored", stage = %stage, aggregate);
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{RecordingReporter, Reported};
    use super::*;

    #[test]
    fn test_tracing_reporter_hooks_do_not_panic() {
        let reporter = TracingReporter;
        reporter.stage(Stage::Gating);
        reporter.rejected("unique_prompts");
        reporter.phase_scored(Stage::BaselineScoring, 0.5);
    }

    #[test]
    fn test_recording_reporter_keeps_order() {
        let reporter = RecordingReporter::default();
        reporter.stage(Stage::Gating);
        reporter.rejected("diversity");
        reporter.stage(Stage::Failed);

        assert_eq!(
            reporter.events(),
            vec![
                Reported::Stage(Stage::Gating),
                Reported::Rejected("diversity".to_string()),
                Reported::Stage(Stage::Failed),
            ]
        );
        assert_eq!(reporter.stages(), vec![Stage::Gating, Stage::Failed]);
    }
}
