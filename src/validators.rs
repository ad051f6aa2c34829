use crate::error::{CrucibleError, CrucibleResult};
use crate::models::Dataset;
use crate::similarity::SimilarityOracle;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

pub const DEFAULT_LEAKAGE_THRESHOLD: f64 = 0.9;
pub const DEFAULT_DIVERSITY_THRESHOLD: f64 = 0.85;
pub const DEFAULT_MIN_REASONING_TOKENS: usize = 5;

/// Accepts or rejects a dataset as a whole
pub trait PreValidator: Send + Sync {
    /// Identifier reported when this validator rejects a dataset
    fn name(&self) -> &str;

    /// `Ok(false)` rejects the dataset. `Err` means the validator could not
    /// reach a decision at all and must abort the run.
    fn validate(&self, dataset: &Dataset) -> CrucibleResult<bool>;
}

/// Outcome of running the gate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateVerdict {
    Admitted,
    Rejected { validator: String },
}

impl GateVerdict {
    #[cfg(test)]
    pub fn passed(&self) -> bool {
        matches!(self, GateVerdict::Admitted)
    }
}

/// Ordered set of validators that must all accept a dataset
#[derive(Default)]
pub struct Gate {
    validators: Vec<Box<dyn PreValidator>>,
}

impl Gate {
    pub fn new(validators: Vec<Box<dyn PreValidator>>) -> Self {
        Self { validators }
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    /// Run validators in configured order, stopping at the first rejection
    pub fn pre_validate(&self, dataset: &Dataset) -> CrucibleResult<GateVerdict> {
        for validator in &self.validators {
            if !validator.validate(dataset)? {
                warn!(validator = validator.name(), "Data is not valid");
                return Ok(GateVerdict::Rejected {
                    validator: validator.name().to_string(),
                });
            }
            debug!(validator = validator.name(), "validator passed");
        }
        Ok(GateVerdict::Admitted)
    }
}

/// Rejects datasets in which two records share a prompt
#[derive(Debug, Clone, Copy, Default)]
pub struct UniquePrompts;

impl PreValidator for UniquePrompts {
    fn name(&self) -> &str {
        "unique_prompts"
    }

    fn validate(&self, dataset: &Dataset) -> CrucibleResult<bool> {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for record in dataset {
            *counts.entry(record.prompt()).or_insert(0) += 1;
        }

        let mut duplicates: Vec<&str> = counts
            .into_iter()
            .filter(|(_, count)| *count > 1)
            .map(|(prompt, _)| prompt)
            .collect();

        if duplicates.is_empty() {
            return Ok(true);
        }

        duplicates.sort_unstable();
        warn!(?duplicates, "Duplicate prompts found");
        Ok(false)
    }
}

/// Rejects datasets where any field of any record is too close to a held-out
/// reference entry
pub struct Leakage {
    references: Vec<String>,
    threshold: f64,
    oracle: Arc<dyn SimilarityOracle>,
}

impl Leakage {
    pub fn new(references: Vec<String>, oracle: Arc<dyn SimilarityOracle>) -> Self {
        Self {
            references,
            threshold: DEFAULT_LEAKAGE_THRESHOLD,
            oracle,
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }
}

impl PreValidator for Leakage {
    fn name(&self) -> &str {
        "leakage"
    }

    fn validate(&self, dataset: &Dataset) -> CrucibleResult<bool> {
        for record in dataset {
            for (field, text) in record.fields() {
                for reference in &self.references {
                    let similarity = self.oracle.similarity(text, reference);
                    if !similarity.is_finite() {
                        warn!(field, text, similarity, "Similarity oracle returned a non-finite value");
                        return Ok(false);
                    }
                    if similarity > self.threshold {
                        warn!(field, text, similarity, "Submission too similar to test data");
                        return Ok(false);
                    }
                }
            }
        }
        Ok(true)
    }
}

/// Rejects records whose reasoning is too short or has no alphabetic content
#[derive(Debug, Clone, Copy)]
pub struct ReasoningQuality {
    min_tokens: usize,
}

impl Default for ReasoningQuality {
    fn default() -> Self {
        Self {
            min_tokens: DEFAULT_MIN_REASONING_TOKENS,
        }
    }
}

impl ReasoningQuality {
    pub fn with_min_tokens(min_tokens: usize) -> Self {
        Self { min_tokens }
    }
}

impl PreValidator for ReasoningQuality {
    fn name(&self) -> &str {
        "reasoning_quality"
    }

    fn validate(&self, dataset: &Dataset) -> CrucibleResult<bool> {
        for record in dataset {
            let reasoning = record.chain_of_thought().trim();

            if reasoning.split_whitespace().count() < self.min_tokens {
                warn!(reasoning, "Reasoning too short");
                return Ok(false);
            }

            if !reasoning.chars().any(char::is_alphabetic) {
                warn!(reasoning, "Reasoning contains no meaningful words");
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Rejects datasets whose reasoning texts are, on average, too similar to each
/// other
pub struct Diversity {
    threshold: f64,
    oracle: Arc<dyn SimilarityOracle>,
}

impl Diversity {
    pub fn new(oracle: Arc<dyn SimilarityOracle>) -> Self {
        Self {
            threshold: DEFAULT_DIVERSITY_THRESHOLD,
            oracle,
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Mean similarity over every unordered pair of reasoning texts; 0 with
    /// fewer than two records
    pub fn mean_pairwise_similarity(&self, dataset: &Dataset) -> f64 {
        let texts: Vec<&str> = dataset.iter().map(|r| r.chain_of_thought()).collect();
        if texts.len() < 2 {
            return 0.0;
        }

        let mut total = 0.0;
        let mut pairs = 0usize;
        for i in 0..texts.len() {
            for j in (i + 1)..texts.len() {
                total += self.oracle.similarity(texts[i], texts[j]);
                pairs += 1;
            }
        }
        total / pairs as f64
    }
}

impl PreValidator for Diversity {
    fn name(&self) -> &str {
        "diversity"
    }

    fn validate(&self, dataset: &Dataset) -> CrucibleResult<bool> {
        let similarity = self.mean_pairwise_similarity(dataset);
        if !similarity.is_finite() {
            warn!(average_similarity = similarity, "Similarity oracle returned a non-finite value");
            return Ok(false);
        }
        if similarity > self.threshold {
            warn!(average_similarity = similarity, "Reasoning texts are too similar");
            return Ok(false);
        }
        Ok(true)
    }
}

/// Similarity of a reasoning text to one knowledge-base entry
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FactMatch<'a> {
    pub fact: &'a str,
    pub similarity: f64,
}

/// Turns the similarities of one reasoning text against the knowledge base into
/// an accept/reject decision
pub trait FactDecision: Send + Sync {
    fn is_consistent(&self, reasoning: &str, matches: &[FactMatch<'_>]) -> bool;
}

impl<F> FactDecision for F
where
    F: Fn(&str, &[FactMatch<'_>]) -> bool + Send + Sync,
{
    fn is_consistent(&self, reasoning: &str, matches: &[FactMatch<'_>]) -> bool {
        self(reasoning, matches)
    }
}

/// Accepts reasoning that matches at least one fact with similarity at or above
/// `confidence_threshold`
#[derive(Debug, Clone, Copy)]
pub struct ThresholdDecision {
    pub confidence_threshold: f64,
}

impl FactDecision for ThresholdDecision {
    fn is_consistent(&self, _reasoning: &str, matches: &[FactMatch<'_>]) -> bool {
        match matches
            .iter()
            .find(|m| m.similarity.is_finite() && m.similarity >= self.confidence_threshold)
        {
            Some(m) => {
                debug!(fact = m.fact, similarity = m.similarity, "reasoning supported by fact");
                true
            }
            None => false,
        }
    }
}

/// Checks each record's reasoning against a body of reference facts.
///
/// There is no built-in decision procedure: without one supplied through
/// [`FactualConsistency::with_decision`], validation fails with
/// [`CrucibleError::Unimplemented`] instead of passing or rejecting.
pub struct FactualConsistency {
    facts: Vec<String>,
    oracle: Arc<dyn SimilarityOracle>,
    decision: Option<Box<dyn FactDecision>>,
}

impl FactualConsistency {
    pub fn new(facts: Vec<String>, oracle: Arc<dyn SimilarityOracle>) -> Self {
        Self {
            facts,
            oracle,
            decision: None,
        }
    }

    pub fn with_decision(mut self, decision: Box<dyn FactDecision>) -> Self {
        self.decision = Some(decision);
        self
    }
}

impl PreValidator for FactualConsistency {
    fn name(&self) -> &str {
        "factual_consistency"
    }

    fn validate(&self, dataset: &Dataset) -> CrucibleResult<bool> {
        let Some(decision) = &self.decision else {
            return Err(CrucibleError::Unimplemented {
                capability: "factual consistency decision procedure".to_string(),
            });
        };

        for record in dataset {
            let reasoning = record.chain_of_thought();
            let matches: Vec<FactMatch<'_>> = self
                .facts
                .iter()
                .map(|fact| FactMatch {
                    fact,
                    similarity: self.oracle.similarity(reasoning, fact),
                })
                .collect();

            if !decision.is_consistent(reasoning, &matches) {
                warn!(reasoning, "Reasoning is not consistent with reference facts");
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Record;
    use crate::similarity::TokenCosine;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn record(prompt: &str, cot: &str, answer: &str) -> Record {
        Record::new(prompt, cot, answer).unwrap()
    }

    fn two_records() -> Dataset {
        Dataset::new(vec![
            record("A", "because X happens due to Y", "Z"),
            record("B", "because P causes Q", "R"),
        ])
    }

    fn cosine() -> Arc<dyn SimilarityOracle> {
        Arc::new(TokenCosine)
    }

    struct Fixed {
        name: &'static str,
        verdict: bool,
        calls: Arc<AtomicUsize>,
    }

    impl PreValidator for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        fn validate(&self, _dataset: &Dataset) -> CrucibleResult<bool> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.verdict)
        }
    }

    #[test]
    fn test_unique_prompts_rejects_duplicates() {
        let dataset = Dataset::new(vec![
            record("A", "because X happens due to Y", "Z"),
            record("A", "because P causes Q to happen", "R"),
        ]);
        assert!(!UniquePrompts.validate(&dataset).unwrap());
        assert!(UniquePrompts.validate(&two_records()).unwrap());
    }

    #[test]
    fn test_leakage_empty_reference_set_passes() {
        let validator = Leakage::new(vec![], cosine());
        assert!(validator.validate(&two_records()).unwrap());
    }

    #[test]
    fn test_leakage_checks_every_field() {
        let dataset = Dataset::new(vec![record(
            "What is the capital of France?",
            "the capital city is well known to everyone",
            "Paris is the capital of France",
        )]);
        let validator = Leakage::new(vec!["paris is the capital of france".to_string()], cosine());
        assert!(!validator.validate(&dataset).unwrap());
    }

    #[test]
    fn test_leakage_threshold_is_strict() {
        let oracle: Arc<dyn SimilarityOracle> = Arc::new(|_: &str, _: &str| 0.9);
        let validator = Leakage::new(vec!["ref".to_string()], oracle.clone());
        assert!(validator.validate(&two_records()).unwrap());

        let validator = Leakage::new(vec!["ref".to_string()], oracle).with_threshold(0.5);
        assert!(!validator.validate(&two_records()).unwrap());
    }

    #[test]
    fn test_leakage_compares_records_fields_and_references() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let oracle: Arc<dyn SimilarityOracle> = Arc::new(move |_: &str, _: &str| {
            counter.fetch_add(1, Ordering::SeqCst);
            0.0
        });
        let references = vec!["one".to_string(), "two".to_string()];
        let validator = Leakage::new(references, oracle);

        assert!(validator.validate(&two_records()).unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 2 * 3 * 2);
    }

    #[test]
    fn test_reasoning_quality_too_short() {
        let dataset = Dataset::new(vec![record("A", "too short here", "Z")]);
        assert!(!ReasoningQuality::default().validate(&dataset).unwrap());
    }

    #[test]
    fn test_reasoning_quality_adequate() {
        let dataset = Dataset::new(vec![record("A", "because X happens due to Y", "Z")]);
        assert!(ReasoningQuality::default().validate(&dataset).unwrap());
    }

    #[test]
    fn test_reasoning_quality_requires_alphabetic_content() {
        let dataset = Dataset::new(vec![record("A", "1 + 2 = 3 !", "3")]);
        assert!(!ReasoningQuality::default().validate(&dataset).unwrap());
    }

    #[test]
    fn test_diversity_single_record_always_passes() {
        let identical: Arc<dyn SimilarityOracle> = Arc::new(|_: &str, _: &str| 1.0);
        let dataset = Dataset::new(vec![record("A", "anything at all goes here", "Z")]);
        let validator = Diversity::new(identical);

        assert_eq!(validator.mean_pairwise_similarity(&dataset), 0.0);
        assert!(validator.validate(&dataset).unwrap());
        assert!(validator.validate(&Dataset::default()).unwrap());
    }

    #[test]
    fn test_diversity_rejects_near_identical_reasoning() {
        let dataset = Dataset::new(vec![
            record("A", "the sky is blue because of scattering", "Z"),
            record("B", "the sky is blue because of scattering", "R"),
        ]);
        assert!(!Diversity::new(cosine()).validate(&dataset).unwrap());
        assert!(Diversity::new(cosine()).validate(&two_records()).unwrap());
    }

    #[test]
    fn test_diversity_mean_over_pairs() {
        let oracle: Arc<dyn SimilarityOracle> =
            Arc::new(|a: &str, b: &str| if a.len() == b.len() { 0.9 } else { 0.3 });
        let dataset = Dataset::new(vec![
            record("A", "aaaa bbbb", "Z"),
            record("B", "cccc dddd", "Z"),
            record("C", "eeeeee ffffff", "Z"),
        ]);
        let validator = Diversity::new(oracle);
        let mean = validator.mean_pairwise_similarity(&dataset);
        assert!((mean - (0.9 + 0.3 + 0.3) / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_factual_consistency_without_decision_is_unimplemented() {
        let validator = FactualConsistency::new(vec!["fact".to_string()], cosine());
        let err = validator.validate(&two_records()).unwrap_err();
        assert!(matches!(err, CrucibleError::Unimplemented { .. }));
    }

    #[test]
    fn test_factual_consistency_with_decision() {
        let facts = vec![
            "The sky appears blue due to Rayleigh scattering of sunlight in the atmosphere."
                .to_string(),
        ];
        let threshold = |_: &str, matches: &[FactMatch<'_>]| {
            matches.iter().any(|m| m.similarity >= 0.3)
        };
        let validator = FactualConsistency::new(facts, cosine()).with_decision(Box::new(threshold));

        let consistent = Dataset::new(vec![record(
            "Explain why the sky is blue:",
            "The sky appears blue because of Rayleigh scattering of sunlight",
            "Rayleigh scattering",
        )]);
        assert!(validator.validate(&consistent).unwrap());

        let inconsistent = Dataset::new(vec![record(
            "Explain why the sky is blue:",
            "oceans reflect their color upward onto clouds",
            "Reflection",
        )]);
        assert!(!validator.validate(&inconsistent).unwrap());
    }

    #[test]
    fn test_threshold_decision_needs_one_confident_match() {
        let decision = ThresholdDecision {
            confidence_threshold: 0.7,
        };
        let matches = [
            FactMatch {
                fact: "water boils at 100 degrees",
                similarity: 0.2,
            },
            FactMatch {
                fact: "the sky is blue",
                similarity: 0.7,
            },
        ];
        assert!(decision.is_consistent("reasoning", &matches));
        assert!(!decision.is_consistent("reasoning", &matches[..1]));
        assert!(!decision.is_consistent("reasoning", &[]));

        let nan = [FactMatch {
            fact: "the sky is blue",
            similarity: f64::NAN,
        }];
        assert!(!decision.is_consistent("reasoning", &nan));
    }

    #[test]
    fn test_non_finite_similarity_rejects() {
        let nan: Arc<dyn SimilarityOracle> = Arc::new(|_: &str, _: &str| f64::NAN);
        let leakage = Leakage::new(vec!["ref".to_string()], nan.clone());
        assert!(!leakage.validate(&two_records()).unwrap());

        let diversity = Diversity::new(nan);
        assert!(!diversity.validate(&two_records()).unwrap());
        // no pairs, so the oracle is never consulted
        assert!(diversity.validate(&Dataset::default()).unwrap());

        let infinite: Arc<dyn SimilarityOracle> = Arc::new(|_: &str, _: &str| f64::INFINITY);
        assert!(!Diversity::new(infinite).validate(&two_records()).unwrap());
    }

    #[test]
    fn test_gate_short_circuits_on_first_rejection() {
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let third = Arc::new(AtomicUsize::new(0));
        let gate = Gate::new(vec![
            Box::new(Fixed {
                name: "first",
                verdict: true,
                calls: first.clone(),
            }),
            Box::new(Fixed {
                name: "second",
                verdict: false,
                calls: second.clone(),
            }),
            Box::new(Fixed {
                name: "third",
                verdict: true,
                calls: third.clone(),
            }),
        ]);

        let verdict = gate.pre_validate(&two_records()).unwrap();
        assert_eq!(
            verdict,
            GateVerdict::Rejected {
                validator: "second".to_string()
            }
        );
        assert!(!verdict.passed());
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);
        assert_eq!(third.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_gate_admits_distinct_well_reasoned_records() {
        let gate = Gate::new(vec![
            Box::new(UniquePrompts),
            Box::new(Leakage::new(vec![], cosine())),
            Box::new(ReasoningQuality::default()),
            Box::new(Diversity::new(cosine())),
        ]);
        assert!(gate.pre_validate(&two_records()).unwrap().passed());
    }

    #[test]
    fn test_empty_gate_admits() {
        assert!(Gate::default().pre_validate(&two_records()).unwrap().passed());
    }
}
