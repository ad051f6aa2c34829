use crate::error::{CrucibleError, CrucibleResult};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One submitted training example
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawRecord")]
pub struct Record {
    prompt: String,
    chain_of_thought: String,
    final_answer: String,
}

#[derive(Deserialize)]
struct RawRecord {
    prompt: String,
    chain_of_thought: String,
    final_answer: String,
}

impl TryFrom<RawRecord> for Record {
    type Error = CrucibleError;

    fn try_from(raw: RawRecord) -> CrucibleResult<Self> {
        Record::new(raw.prompt, raw.chain_of_thought, raw.final_answer)
    }
}

impl Record {
    /// Build a record, rejecting empty or whitespace-only fields
    pub fn new(
        prompt: impl Into<String>,
        chain_of_thought: impl Into<String>,
        final_answer: impl Into<String>,
    ) -> CrucibleResult<Self> {
        let record = Self {
            prompt: prompt.into(),
            chain_of_thought: chain_of_thought.into(),
            final_answer: final_answer.into(),
        };

        for (field, value) in record.fields() {
            if value.trim().is_empty() {
                return Err(CrucibleError::InvalidRecord { field });
            }
        }

        Ok(record)
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn chain_of_thought(&self) -> &str {
        &self.chain_of_thought
    }

    pub fn final_answer(&self) -> &str {
        &self.final_answer
    }

    /// All three fields with their names, in declaration order
    pub fn fields(&self) -> [(&'static str, &str); 3] {
        [
            ("prompt", self.prompt.as_str()),
            ("chain_of_thought", self.chain_of_thought.as_str()),
            ("final_answer", self.final_answer.as_str()),
        ]
    }
}

/// Ordered collection of records. Order is preserved end-to-end so that model
/// outputs pair positionally with expected answers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Dataset {
    records: Vec<Record>,
}

impl Dataset {
    pub fn new(records: Vec<Record>) -> Self {
        Self { records }
    }

    /// Load a dataset from a JSON array of records
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read dataset file: {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse dataset: {}", path.display()))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Record> {
        self.records.iter()
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn prompts(&self) -> Vec<String> {
        self.records.iter().map(|r| r.prompt.clone()).collect()
    }

    pub fn expected_answers(&self) -> Vec<&str> {
        self.records.iter().map(|r| r.final_answer()).collect()
    }
}

impl<'a> IntoIterator for &'a Dataset {
    type Item = &'a Record;
    type IntoIter = std::slice::Iter<'a, Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

/// Mean and median of one scorer across every record of a phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScorerStatistics {
    pub scorer: String,
    pub mean: f64,
    pub median: f64,
}

/// Result of one scoring pass over the dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseReport {
    /// Mean of the per-record means (0 for an empty scorer set or dataset)
    pub aggregate: f64,
    /// Mean across scorers, per record, in dataset order
    pub per_record: Vec<f64>,
    /// Raw model outputs, in dataset order
    pub outputs: Vec<String>,
    /// Per-scorer statistics across records
    pub statistics: Vec<ScorerStatistics>,
}

/// Which derived value the caller wants out of a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    #[default]
    TrainedScore,
    Ratio,
}

/// Outcome of one evaluation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineResult {
    pub baseline: PhaseReport,
    pub trained: PhaseReport,
    /// trained / baseline; absent when the baseline is zero
    pub ratio: Option<f64>,
}

impl PipelineResult {
    pub fn new(baseline: PhaseReport, trained: PhaseReport) -> Self {
        let ratio = if baseline.aggregate == 0.0 {
            None
        } else {
            Some(trained.aggregate / baseline.aggregate)
        };

        Self {
            baseline,
            trained,
            ratio,
        }
    }

    pub fn baseline_score(&self) -> f64 {
        self.baseline.aggregate
    }

    pub fn trained_score(&self) -> f64 {
        self.trained.aggregate
    }

    pub fn ratio(&self) -> Option<f64> {
        self.ratio
    }

    pub fn comparison(&self, comparison: Comparison) -> Option<f64> {
        match comparison {
            Comparison::TrainedScore => Some(self.trained_score()),
            Comparison::Ratio => self.ratio,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn phase(aggregate: f64) -> PhaseReport {
        PhaseReport {
            aggregate,
            per_record: vec![],
            outputs: vec![],
            statistics: vec![],
        }
    }

    #[test]
    fn test_record_rejects_empty_fields() {
        let err = Record::new("", "because X happens due to Y", "Z").unwrap_err();
        assert!(matches!(err, CrucibleError::InvalidRecord { field: "prompt" }));

        let err = Record::new("A", "   ", "Z").unwrap_err();
        assert!(matches!(
            err,
            CrucibleError::InvalidRecord {
                field: "chain_of_thought"
            }
        ));

        let err = Record::new("A", "because X", "").unwrap_err();
        assert!(matches!(
            err,
            CrucibleError::InvalidRecord {
                field: "final_answer"
            }
        ));
    }

    #[test]
    fn test_dataset_from_json_file_preserves_order() {
        let json = r#"[
            {"prompt": "B", "chain_of_thought": "because P causes Q", "final_answer": "R"},
            {"prompt": "A", "chain_of_thought": "because X happens due to Y", "final_answer": "Z"}
        ]"#;
        let mut temp_file = NamedTempFile::new().unwrap();
        write!(temp_file, "{}", json).unwrap();

        let dataset = Dataset::from_json_file(temp_file.path()).unwrap();
        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.prompts(), vec!["B".to_string(), "A".to_string()]);
        assert_eq!(dataset.expected_answers(), vec!["R", "Z"]);
    }

    #[test]
    fn test_dataset_from_json_file_rejects_empty_field() {
        let json = r#"[{"prompt": "A", "chain_of_thought": "reasoning", "final_answer": ""}]"#;
        let mut temp_file = NamedTempFile::new().unwrap();
        write!(temp_file, "{}", json).unwrap();

        let result = Dataset::from_json_file(temp_file.path());
        assert!(result.is_err());
    }

    #[test]
    fn test_pipeline_result_exposes_both_conventions() {
        let result = PipelineResult::new(phase(0.5), phase(0.75));
        assert_eq!(result.baseline_score(), 0.5);
        assert_eq!(result.trained_score(), 0.75);
        assert_eq!(result.ratio(), Some(1.5));
        assert_eq!(result.comparison(Comparison::TrainedScore), Some(0.75));
        assert_eq!(result.comparison(Comparison::Ratio), Some(1.5));
    }

    #[test]
    fn test_pipeline_result_ratio_undefined_for_zero_baseline() {
        let result = PipelineResult::new(phase(0.0), phase(0.4));
        assert_eq!(result.ratio(), None);
        assert_eq!(result.comparison(Comparison::Ratio), None);
        assert_eq!(result.comparison(Comparison::TrainedScore), Some(0.4));
    }
}
