use crate::models::{Comparison, Dataset, Record};
use crate::orchestrator::ForwardStrategy;
use crate::scorers::{Bleu, LexicalOverlap, RougeL, Scorer, Semantic};
use crate::similarity::SimilarityOracle;
use crate::validators::{
    DEFAULT_DIVERSITY_THRESHOLD, DEFAULT_LEAKAGE_THRESHOLD, DEFAULT_MIN_REASONING_TOKENS,
    Diversity, FactualConsistency, Gate, Leakage, PreValidator, ReasoningQuality, ThresholdDecision,
    UniquePrompts,
};
use anyhow::{Context, Result, bail, ensure};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Settings for an OpenAI-compatible inference and fine-tuning API
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OpenAiSettings {
    /// OpenAI API endpoint
    #[serde(default = "default_api_endpoint")]
    pub api_endpoint: String,
    /// Environment variable name containing the API key
    #[serde(default = "default_env_var_api_key")]
    pub env_var_api_key: String,
    /// Base model to evaluate and fine-tune
    pub model: String,
    /// System prompt sent with every request and training example
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    /// Sampling temperature; 0 keeps repeated evaluations as stable as the API allows
    #[serde(default)]
    pub temperature: f64,
    /// Maximum tokens for response generation
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Rate limit for API requests per second
    #[serde(default = "default_rate_limit")]
    pub rate_limit_rps: f64,
    /// Seconds between fine-tuning job status checks
    #[serde(default = "default_poll_secs")]
    pub fine_tune_poll_secs: u64,
    /// Suffix attached to the fine-tuned model name
    #[serde(default = "default_fine_tune_suffix")]
    pub fine_tune_suffix: String,
}

fn default_api_endpoint() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_env_var_api_key() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_system_prompt() -> String {
    "Answer the question concisely.".to_string()
}

fn default_max_tokens() -> u32 {
    256
}

fn default_rate_limit() -> f64 {
    10.0
}

fn default_poll_secs() -> u64 {
    15
}

fn default_fine_tune_suffix() -> String {
    "crucible".to_string()
}

/// Which model backend to run against
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendConfig {
    #[serde(rename = "openai")]
    OpenAi(OpenAiSettings),
    /// Echoes prompts back; for dry runs of a configuration
    Echo,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    #[default]
    Single,
    Batched,
}

/// Forward-pass execution settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ForwardConfig {
    #[serde(default)]
    pub strategy: StrategyKind,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for ForwardConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::default(),
            batch_size: default_batch_size(),
        }
    }
}

fn default_batch_size() -> usize {
    8
}

/// One gate policy, in the order it should run
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidatorConfig {
    UniquePrompts,
    Leakage {
        #[serde(default = "default_leakage_threshold")]
        threshold: f64,
        /// Held-out reference entries submissions must not resemble
        #[serde(default)]
        references: Vec<String>,
    },
    ReasoningQuality {
        #[serde(default = "default_min_tokens")]
        min_tokens: usize,
    },
    Diversity {
        #[serde(default = "default_diversity_threshold")]
        threshold: f64,
    },
    FactualConsistency {
        #[serde(default)]
        facts: Vec<String>,
        /// Minimum similarity to some fact for reasoning to count as consistent.
        /// Without it the validator has no decision procedure and aborts the run.
        #[serde(default)]
        confidence_threshold: Option<f64>,
    },
}

fn default_leakage_threshold() -> f64 {
    DEFAULT_LEAKAGE_THRESHOLD
}

fn default_diversity_threshold() -> f64 {
    DEFAULT_DIVERSITY_THRESHOLD
}

fn default_min_tokens() -> usize {
    DEFAULT_MIN_REASONING_TOKENS
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScorerConfig {
    LexicalOverlap,
    Semantic,
    Bleu,
    RougeL,
}

/// Root configuration for one evaluation run
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// JSON file holding the submitted records
    #[serde(default)]
    pub dataset_path: Option<PathBuf>,
    /// Records given inline instead of through `dataset_path`
    #[serde(default)]
    pub records: Vec<Record>,
    /// Optional local path to store the result as JSON
    #[serde(default)]
    pub storage_path: Option<String>,
    /// Derived value reported alongside both scores
    #[serde(default)]
    pub comparison: Comparison,
    pub backend: BackendConfig,
    #[serde(default)]
    pub forward: ForwardConfig,
    #[serde(default)]
    pub validators: Vec<ValidatorConfig>,
    #[serde(default)]
    pub scorers: Vec<ScorerConfig>,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config: {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("Invalid config: {}", path.display()))?;
        Ok(config)
    }

    /// Reject values no component could run with
    pub fn validate(&self) -> Result<()> {
        ensure!(self.forward.batch_size >= 1, "batch_size must be at least 1");
        ensure!(
            self.dataset_path.is_none() || self.records.is_empty(),
            "dataset_path and inline records are mutually exclusive"
        );

        if let BackendConfig::OpenAi(settings) = &self.backend {
            ensure!(
                u16::try_from(settings.max_tokens).is_ok(),
                "max_tokens {} exceeds {}",
                settings.max_tokens,
                u16::MAX
            );
        }

        for validator in &self.validators {
            let (name, threshold) = match validator {
                ValidatorConfig::Leakage { threshold, .. } => ("leakage", *threshold),
                ValidatorConfig::Diversity { threshold } => ("diversity", *threshold),
                ValidatorConfig::FactualConsistency {
                    confidence_threshold: Some(threshold),
                    ..
                } => ("factual_consistency confidence", *threshold),
                _ => continue,
            };
            if !(0.0..=1.0).contains(&threshold) {
                bail!("{} threshold {} is outside [0, 1]", name, threshold);
            }
        }
        Ok(())
    }

    /// Load the dataset, resolving `dataset_path` against `base_dir`
    pub fn dataset(&self, base_dir: &Path) -> Result<Dataset> {
        match &self.dataset_path {
            Some(path) => Dataset::from_json_file(&base_dir.join(path)),
            None => Ok(Dataset::new(self.records.clone())),
        }
    }

    /// Where to store the result, resolved against `base_dir` like `dataset_path`
    pub fn storage_path(&self, base_dir: &Path) -> Option<PathBuf> {
        self.storage_path.as_ref().map(|path| base_dir.join(path))
    }

    pub fn forward_strategy(&self) -> ForwardStrategy {
        match self.forward.strategy {
            StrategyKind::Single => ForwardStrategy::Single,
            StrategyKind::Batched => ForwardStrategy::Batched {
                batch_size: self.forward.batch_size,
            },
        }
    }

    /// Build the gate, validators in configured order
    pub fn build_gate(&self, oracle: &Arc<dyn SimilarityOracle>) -> Gate {
        let validators = self
            .validators
            .iter()
            .map(|validator| -> Box<dyn PreValidator> {
                match validator {
                    ValidatorConfig::UniquePrompts => Box::new(UniquePrompts),
                    ValidatorConfig::Leakage {
                        threshold,
                        references,
                    } => Box::new(
                        Leakage::new(references.clone(), oracle.clone()).with_threshold(*threshold),
                    ),
                    ValidatorConfig::ReasoningQuality { min_tokens } => {
                        Box::new(ReasoningQuality::with_min_tokens(*min_tokens))
                    }
                    ValidatorConfig::Diversity { threshold } => {
                        Box::new(Diversity::new(oracle.clone()).with_threshold(*threshold))
                    }
                    ValidatorConfig::FactualConsistency {
                        facts,
                        confidence_threshold,
                    } => {
                        let validator = FactualConsistency::new(facts.clone(), oracle.clone());
                        match confidence_threshold {
                            Some(confidence_threshold) => Box::new(validator.with_decision(Box::new(
                                ThresholdDecision {
                                    confidence_threshold: *confidence_threshold,
                                },
                            ))),
                            None => Box::new(validator),
                        }
                    }
                }
            })
            .collect();
        Gate::new(validators)
    }

    pub fn build_scorers(&self, oracle: &Arc<dyn SimilarityOracle>) -> Vec<Box<dyn Scorer>> {
        self.scorers
            .iter()
            .map(|scorer| -> Box<dyn Scorer> {
                match scorer {
                    ScorerConfig::LexicalOverlap => Box::new(LexicalOverlap),
                    ScorerConfig::Semantic => Box::new(Semantic::new(oracle.clone())),
                    ScorerConfig::Bleu => Box::new(Bleu),
                    ScorerConfig::RougeL => Box::new(RougeL),
                }
            })
            .collect()
    }
}
