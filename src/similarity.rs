use std::collections::HashMap;

/// Produces a bounded similarity between two texts.
///
/// Implementations are expected to be symmetric and return values in [0, 1].
/// Leakage, diversity and factual-consistency checks as well as the semantic
/// scorer all go through this trait, so an embedding model can replace the
/// built-in lexical oracle without touching them.
pub trait SimilarityOracle: Send + Sync {
    fn similarity(&self, a: &str, b: &str) -> f64;
}

impl<F> SimilarityOracle for F
where
    F: Fn(&str, &str) -> f64 + Send + Sync,
{
    fn similarity(&self, a: &str, b: &str) -> f64 {
        self(a, b)
    }
}

/// Case-folded whitespace tokens
pub fn tokenize(text: &str) -> Vec<String> {
    text.split_whitespace().map(|t| t.to_lowercase()).collect()
}

/// Cosine similarity between term-frequency vectors of the two texts.
///
/// Term counts are never negative, so the result already sits in [0, 1].
/// Punctuation at token edges is ignored so "Paris." and "paris" match.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenCosine;

impl TokenCosine {
    fn term_frequencies(text: &str) -> HashMap<String, f64> {
        let mut frequencies = HashMap::new();
        for token in tokenize(text) {
            let token = token.trim_matches(|c: char| !c.is_alphanumeric());
            if token.is_empty() {
                continue;
            }
            *frequencies.entry(token.to_string()).or_insert(0.0) += 1.0;
        }
        frequencies
    }
}

impl SimilarityOracle for TokenCosine {
    fn similarity(&self, a: &str, b: &str) -> f64 {
        let left = Self::term_frequencies(a);
        let right = Self::term_frequencies(b);

        if left.is_empty() || right.is_empty() {
            return 0.0;
        }

        let dot: f64 = left
            .iter()
            .filter_map(|(term, count)| right.get(term).map(|other| count * other))
            .sum();
        let norm = |v: &HashMap<String, f64>| v.values().map(|c| c * c).sum::<f64>().sqrt();

        (dot / (norm(&left) * norm(&right))).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_case_folds() {
        assert_eq!(tokenize("The  Sky\tis Blue"), vec!["the", "sky", "is", "blue"]);
        assert!(tokenize("   ").is_empty());
    }

    #[test]
    fn test_token_cosine_identical_texts() {
        let oracle = TokenCosine;
        let sim = oracle.similarity("Paris is the capital.", "paris is the capital");
        assert!((sim - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_token_cosine_disjoint_texts() {
        let oracle = TokenCosine;
        assert_eq!(oracle.similarity("red apples", "blue oceans"), 0.0);
    }

    #[test]
    fn test_token_cosine_is_symmetric() {
        let oracle = TokenCosine;
        let a = "light scatters in the atmosphere";
        let b = "the atmosphere scatters blue light strongly";
        assert_eq!(oracle.similarity(a, b), oracle.similarity(b, a));
        let sim = oracle.similarity(a, b);
        assert!(sim > 0.0 && sim < 1.0);
    }

    #[test]
    fn test_token_cosine_empty_text() {
        let oracle = TokenCosine;
        assert_eq!(oracle.similarity("", "anything"), 0.0);
        assert_eq!(oracle.similarity("...", "anything"), 0.0);
    }

    #[test]
    fn test_closure_oracle() {
        let oracle = |_: &str, _: &str| 0.42;
        assert_eq!(oracle.similarity("a", "b"), 0.42);
    }
}
