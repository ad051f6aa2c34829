use crate::models::{PhaseReport, ScorerStatistics};
use crate::similarity::{SimilarityOracle, tokenize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

const BLEU_MAX_ORDER: usize = 4;

/// Computes a quality metric in [0, 1] between a model output and an expected
/// answer. Must be free of side effects observable by the pipeline.
pub trait Scorer: Send + Sync {
    fn name(&self) -> &str;
    fn score(&self, output: &str, expected: &str) -> f64;
}

/// Fraction of distinct expected tokens that also appear in the output
#[derive(Debug, Clone, Copy, Default)]
pub struct LexicalOverlap;

impl Scorer for LexicalOverlap {
    fn name(&self) -> &str {
        "lexical_overlap"
    }

    fn score(&self, output: &str, expected: &str) -> f64 {
        let output_words: HashSet<String> = tokenize(output).into_iter().collect();
        let expected_words: HashSet<String> = tokenize(expected).into_iter().collect();

        if expected_words.is_empty() {
            return 0.0;
        }

        let overlap = output_words.intersection(&expected_words).count();
        overlap as f64 / expected_words.len() as f64
    }
}

/// Similarity oracle applied to output and expected answer
pub struct Semantic {
    oracle: Arc<dyn SimilarityOracle>,
}

impl Semantic {
    pub fn new(oracle: Arc<dyn SimilarityOracle>) -> Self {
        Self { oracle }
    }
}

impl Scorer for Semantic {
    fn name(&self) -> &str {
        "semantic"
    }

    fn score(&self, output: &str, expected: &str) -> f64 {
        self.oracle.similarity(output, expected)
    }
}

/// Sentence-level BLEU up to 4-grams with add-one smoothing on the higher orders
#[derive(Debug, Clone, Copy, Default)]
pub struct Bleu;

impl Bleu {
    fn ngram_counts(tokens: &[String], n: usize) -> HashMap<&[String], usize> {
        let mut counts = HashMap::new();
        for gram in tokens.windows(n) {
            *counts.entry(gram).or_insert(0) += 1;
        }
        counts
    }

    /// Clipped matches and candidate n-gram total for one order
    fn modified_precision(candidate: &[String], reference: &[String], n: usize) -> (usize, usize) {
        let candidate_counts = Self::ngram_counts(candidate, n);
        let reference_counts = Self::ngram_counts(reference, n);

        let matches = candidate_counts
            .iter()
            .map(|(gram, count)| (*count).min(reference_counts.get(gram).copied().unwrap_or(0)))
            .sum();
        let total = candidate.len().saturating_sub(n - 1);
        (matches, total)
    }
}

impl Scorer for Bleu {
    fn name(&self) -> &str {
        "bleu"
    }

    fn score(&self, output: &str, expected: &str) -> f64 {
        let candidate = tokenize(output);
        let reference = tokenize(expected);
        if candidate.is_empty() || reference.is_empty() {
            return 0.0;
        }

        let mut log_precision_sum = 0.0;
        for n in 1..=BLEU_MAX_ORDER {
            let (matches, total) = Self::modified_precision(&candidate, &reference, n);
            let precision = if n == 1 {
                matches as f64 / total as f64
            } else {
                (matches as f64 + 1.0) / (total as f64 + 1.0)
            };
            if precision == 0.0 {
                return 0.0;
            }
            log_precision_sum += precision.ln();
        }

        let c = candidate.len() as f64;
        let r = reference.len() as f64;
        let brevity_penalty = if c > r { 1.0 } else { (1.0 - r / c).exp() };

        (brevity_penalty * (log_precision_sum / BLEU_MAX_ORDER as f64).exp()).clamp(0.0, 1.0)
    }
}

/// F-measure of the longest common token subsequence
#[derive(Debug, Clone, Copy, Default)]
pub struct RougeL;

impl RougeL {
    fn lcs_len(a: &[String], b: &[String]) -> usize {
        let mut previous = vec![0usize; b.len() + 1];
        let mut current = vec![0usize; b.len() + 1];
        for token in a {
            for (j, other) in b.iter().enumerate() {
                current[j + 1] = if token == other {
                    previous[j] + 1
                } else {
                    current[j].max(previous[j + 1])
                };
            }
            std::mem::swap(&mut previous, &mut current);
        }
        previous[b.len()]
    }
}

impl Scorer for RougeL {
    fn name(&self) -> &str {
        "rouge_l"
    }

    fn score(&self, output: &str, expected: &str) -> f64 {
        let candidate = tokenize(output);
        let reference = tokenize(expected);
        if candidate.is_empty() || reference.is_empty() {
            return 0.0;
        }

        let lcs = Self::lcs_len(&candidate, &reference) as f64;
        if lcs == 0.0 {
            return 0.0;
        }

        let precision = lcs / candidate.len() as f64;
        let recall = lcs / reference.len() as f64;
        2.0 * precision * recall / (precision + recall)
    }
}

/// Mean of the values, summed in sorted order so the result does not depend on
/// the order they were produced in; 0 for no values
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    sorted.iter().sum::<f64>() / sorted.len() as f64
}

pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Score a whole pass: per-record means, their mean, and per-scorer statistics.
///
/// Outputs and expected answers are paired positionally.
pub fn score_outputs(
    scorers: &[Box<dyn Scorer>],
    outputs: Vec<String>,
    expected: &[&str],
) -> PhaseReport {
    if scorers.is_empty() {
        warn!("No scorers configured, aggregate score is 0");
    }
    if outputs.is_empty() {
        warn!("No records to score, aggregate score is 0");
    }

    // matrix[scorer][record]
    let matrix: Vec<Vec<f64>> = scorers
        .iter()
        .map(|scorer| {
            outputs
                .iter()
                .zip(expected)
                .map(|(output, expected)| scorer.score(output, expected))
                .collect()
        })
        .collect();

    let per_record: Vec<f64> = (0..outputs.len().min(expected.len()))
        .map(|i| {
            let values: Vec<f64> = matrix.iter().map(|row| row[i]).collect();
            mean(&values)
        })
        .collect();

    for (index, score) in per_record.iter().enumerate() {
        debug!(record = index, score, "record scored");
    }

    let aggregate = if scorers.is_empty() {
        0.0
    } else {
        mean(&per_record)
    };

    let statistics = scorers
        .iter()
        .zip(&matrix)
        .map(|(scorer, row)| ScorerStatistics {
            scorer: scorer.name().to_string(),
            mean: mean(row),
            median: median(row),
        })
        .collect();

    PhaseReport {
        aggregate,
        per_record,
        outputs,
        statistics,
    }
}
