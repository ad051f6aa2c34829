use crate::backend::ModelBackend;
use crate::error::{CrucibleError, CrucibleResult, Stage};
use crate::models::{Dataset, PhaseReport, PipelineResult, Record};
use crate::report::{Reporter, TracingReporter};
use crate::scorers::{Scorer, score_outputs};
use crate::validators::{Gate, GateVerdict};
use std::sync::Arc;
use tracing::{Instrument, debug, info_span, warn};

/// How prompts are sent to the backend during a forward pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardStrategy {
    /// One `predict` call per record
    Single,
    /// `batch_predict` over consecutive chunks of the dataset
    Batched { batch_size: usize },
}

/// Runs the gate, both scoring passes and the fine-tuning step in between
pub struct Orchestrator {
    gate: Gate,
    scorers: Vec<Box<dyn Scorer>>,
    strategy: ForwardStrategy,
    reporter: Arc<dyn Reporter>,
    stage: Stage,
}

impl Orchestrator {
    pub fn new(gate: Gate, scorers: Vec<Box<dyn Scorer>>) -> Self {
        Self {
            gate,
            scorers,
            strategy: ForwardStrategy::Single,
            reporter: Arc::new(TracingReporter),
            stage: Stage::Idle,
        }
    }

    pub fn with_strategy(mut self, strategy: ForwardStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Stage the most recent run reached
    #[cfg(test)]
    pub fn stage(&self) -> Stage {
        self.stage
    }

    fn enter(&mut self, stage: Stage) {
        self.stage = stage;
        self.reporter.stage(stage);
    }

    /// Evaluate one dataset: gate, baseline score, fine-tune, post-tune score.
    ///
    /// Nothing touches the backend before the gate admits the dataset. A failure
    /// after fine-tuning has started leaves the backend in whatever state the
    /// failed call produced.
    pub async fn run<B>(&mut self, backend: &mut B, dataset: Dataset) -> CrucibleResult<PipelineResult>
    where
        B: ModelBackend + ?Sized,
    {
        let span = info_span!(
            "crucible.run",
            records = dataset.len(),
            validators = self.gate.len(),
            scorers = self.scorers.len()
        );

        let outcome = self.run_stages(backend, &dataset).instrument(span).await;
        match outcome {
            Ok(result) => {
                self.enter(Stage::Done);
                Ok(result)
            }
            Err(err) => {
                if matches!(self.stage, Stage::FineTuning | Stage::PostScoring) {
                    warn!(stage = %self.stage, "run failed after fine-tuning started; backend state may already be modified");
                }
                self.enter(Stage::Failed);
                Err(err)
            }
        }
    }

    async fn run_stages<B>(&mut self, backend: &mut B, dataset: &Dataset) -> CrucibleResult<PipelineResult>
    where
        B: ModelBackend + ?Sized,
    {
        self.enter(Stage::Gating);
        if let GateVerdict::Rejected { validator } = self.gate.pre_validate(dataset)? {
            self.reporter.rejected(&validator);
            return Err(CrucibleError::DataRejected { validator });
        }

        self.enter(Stage::BaselineScoring);
        let baseline = self.score(backend, dataset, Stage::BaselineScoring).await?;

        self.enter(Stage::FineTuning);
        fine_tune(backend, dataset).await?;

        self.enter(Stage::PostScoring);
        let trained = self.score(backend, dataset, Stage::PostScoring).await?;

        Ok(PipelineResult::new(baseline, trained))
    }

    async fn score<B>(&self, backend: &mut B, dataset: &Dataset, stage: Stage) -> CrucibleResult<PhaseReport>
    where
        B: ModelBackend + ?Sized,
    {
        let outputs = forward_pass(backend, dataset, self.strategy, stage).await?;
        let report = score_outputs(&self.scorers, outputs, &dataset.expected_answers());
        self.reporter.phase_scored(stage, report.aggregate);
        Ok(report)
    }
}

/// Model outputs for every prompt, in dataset order
pub async fn forward_pass<B>(
    backend: &mut B,
    dataset: &Dataset,
    strategy: ForwardStrategy,
    stage: Stage,
) -> CrucibleResult<Vec<String>>
where
    B: ModelBackend + ?Sized,
{
    let backend_failure = |source| CrucibleError::Backend { stage, source };
    let prompts = dataset.prompts();
    let mut outputs = Vec::with_capacity(prompts.len());

    match strategy {
        ForwardStrategy::Single => {
            for prompt in &prompts {
                outputs.push(backend.predict(prompt).await.map_err(backend_failure)?);
            }
        }
        ForwardStrategy::Batched { batch_size } => {
            for chunk in prompts.chunks(batch_size.max(1)) {
                let batch = backend.batch_predict(chunk).await.map_err(backend_failure)?;
                if batch.len() != chunk.len() {
                    return Err(CrucibleError::OutputMismatch {
                        expected: chunk.len(),
                        actual: batch.len(),
                    });
                }
                debug!(size = chunk.len(), "batch predicted");
                outputs.extend(batch);
            }
        }
    }

    Ok(outputs)
}

/// Training text for one record. The exact layout, including the two spaces
/// after `Answer:`, is what the backend is supervised on.
pub fn prompt_combine(record: &Record) -> String {
    format!(
        "{}\nReasoning: {}\nAnswer:  {}",
        record.prompt(),
        record.chain_of_thought(),
        record.final_answer()
    )
}

/// Fine-tune the backend once on the whole dataset. An empty dataset leaves
/// the backend untouched.
pub async fn fine_tune<B>(backend: &mut B, dataset: &Dataset) -> CrucibleResult<()>
where
    B: ModelBackend + ?Sized,
{
    if dataset.is_empty() {
        warn!("No records to train on, skipping fine-tuning");
        return Ok(());
    }

    let texts: Vec<String> = dataset.iter().map(prompt_combine).collect();
    backend
        .fine_tune(&texts)
        .await
        .map_err(|source| CrucibleError::Backend {
            stage: Stage::FineTuning,
            source,
        })
}
