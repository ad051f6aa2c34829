use crate::config::OpenAiSettings;
use anyhow::{Context, Result, bail};
use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequest, CreateChatCompletionRequestArgs,
        CreateChatCompletionResponse, CreateFileRequestArgs, CreateFineTuningJobRequestArgs,
        FileInput, FilePurpose, FineTuningJobStatus,
    },
};
use async_trait::async_trait;
use serde_json::json;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Generative model used by the pipeline for inference and fine-tuning.
///
/// The backend's weights are shared across both scoring passes; `fine_tune`
/// mutates them in place and cannot be undone.
#[async_trait]
pub trait ModelBackend: Send {
    async fn predict(&mut self, prompt: &str) -> Result<String>;

    /// Order- and length-preserving batch inference
    async fn batch_predict(&mut self, prompts: &[String]) -> Result<Vec<String>> {
        let mut outputs = Vec::with_capacity(prompts.len());
        for prompt in prompts {
            outputs.push(self.predict(prompt).await?);
        }
        Ok(outputs)
    }

    async fn fine_tune(&mut self, training_texts: &[String]) -> Result<()>;
}

/// Returns every prompt unchanged. Used for dry runs of a configuration.
#[derive(Debug, Default)]
pub struct EchoBackend {
    fine_tune_calls: usize,
}

impl EchoBackend {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn fine_tune_calls(&self) -> usize {
        self.fine_tune_calls
    }
}

#[async_trait]
impl ModelBackend for EchoBackend {
    async fn predict(&mut self, prompt: &str) -> Result<String> {
        Ok(prompt.to_string())
    }

    async fn fine_tune(&mut self, training_texts: &[String]) -> Result<()> {
        self.fine_tune_calls += 1;
        debug!(
            examples = training_texts.len(),
            calls = self.fine_tune_calls,
            "echo backend ignoring fine-tune"
        );
        Ok(())
    }
}

/// Backend for any OpenAI-compatible API: chat completions for inference and
/// the hosted fine-tuning jobs API for training
pub struct OpenAiBackend {
    client: Client<OpenAIConfig>,
    settings: OpenAiSettings,
    /// Current model id; replaced by the fine-tuned model after training
    model: String,
    last_request: Option<Instant>,
}

impl OpenAiBackend {
    /// Create a backend, reading the API key from the configured environment variable
    pub fn new(settings: OpenAiSettings) -> Result<Self> {
        let api_key = std::env::var(&settings.env_var_api_key).with_context(|| {
            format!("Environment variable {} not found", settings.env_var_api_key)
        })?;
        Ok(Self::with_api_key(settings, api_key))
    }

    pub fn with_api_key(settings: OpenAiSettings, api_key: String) -> Self {
        let openai_config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(&settings.api_endpoint);

        Self {
            client: Client::with_config(openai_config),
            model: settings.model.clone(),
            settings,
            last_request: None,
        }
    }

    #[cfg(test)]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Enforce rate limiting for API requests
    async fn enforce_rate_limit(last_request: &mut Option<Instant>, rate_limit_rps: f64) {
        if rate_limit_rps <= 0.0 {
            return;
        }

        let min_interval = Duration::from_secs_f64(1.0 / rate_limit_rps);

        if let Some(last_time) = *last_request {
            let elapsed = last_time.elapsed();
            if elapsed < min_interval {
                sleep(min_interval - elapsed).await;
            }
        }

        *last_request = Some(Instant::now());
    }

    /// Build the chat completion request for a prompt
    fn build_chat_request(&self, prompt: &str) -> Result<CreateChatCompletionRequest> {
        let system_message = ChatCompletionRequestSystemMessageArgs::default()
            .content(self.settings.system_prompt.clone())
            .build()
            .context("Failed to build system message")?
            .into();

        let user_message = ChatCompletionRequestUserMessageArgs::default()
            .content(prompt.to_string())
            .build()
            .context("Failed to build user message")?
            .into();

        let max_tokens = u16::try_from(self.settings.max_tokens)
            .with_context(|| format!("max_tokens {} exceeds {}", self.settings.max_tokens, u16::MAX))?;

        CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages([system_message, user_message])
            .temperature(self.settings.temperature as f32)
            .max_tokens(max_tokens)
            .build()
            .context("Failed to build chat completion request")
    }

    fn extract_content(response: CreateChatCompletionResponse) -> String {
        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default()
    }

    /// Chat-format JSONL, one training example per line
    fn training_jsonl(&self, training_texts: &[String]) -> Result<String> {
        let mut lines = Vec::with_capacity(training_texts.len());
        for text in training_texts {
            let example = json!({
                "messages": [
                    {"role": "system", "content": self.settings.system_prompt},
                    {"role": "assistant", "content": text},
                ]
            });
            lines.push(serde_json::to_string(&example).context("Failed to serialize training example")?);
        }
        Ok(lines.join("\n"))
    }

    /// Poll a fine-tuning job until it finishes, returning the new model id
    async fn wait_for_job(&self, job_id: &str) -> Result<String> {
        let poll_interval = Duration::from_secs(self.settings.fine_tune_poll_secs);
        loop {
            let job = self
                .client
                .fine_tuning()
                .retrieve(job_id)
                .await
                .with_context(|| format!("Failed to retrieve fine-tuning job {}", job_id))?;

            match &job.status {
                FineTuningJobStatus::Succeeded => {
                    return job.fine_tuned_model.with_context(|| {
                        format!("Fine-tuning job {} succeeded without a model id", job_id)
                    });
                }
                FineTuningJobStatus::Failed | FineTuningJobStatus::Cancelled => {
                    bail!(
                        "Fine-tuning job {} ended with status {:?}: {:?}",
                        job_id,
                        job.status,
                        job.error
                    );
                }
                status => {
                    debug!(job_id, ?status, "fine-tuning job still in progress");
                    sleep(poll_interval).await;
                }
            }
        }
    }
}

#[async_trait]
impl ModelBackend for OpenAiBackend {
    async fn predict(&mut self, prompt: &str) -> Result<String> {
        Self::enforce_rate_limit(&mut self.last_request, self.settings.rate_limit_rps).await;

        let request = self.build_chat_request(prompt)?;
        let response = self
            .client
            .chat()
            .create(request)
            .await
            .context("Failed to generate response")?;

        Ok(Self::extract_content(response))
    }

    async fn fine_tune(&mut self, training_texts: &[String]) -> Result<()> {
        if training_texts.is_empty() {
            warn!(model = %self.model, "no training examples, skipping fine-tuning job");
            return Ok(());
        }

        let jsonl = self.training_jsonl(training_texts)?;

        let upload = CreateFileRequestArgs::default()
            .file(FileInput::from_vec_u8(
                "crucible-training.jsonl".to_string(),
                jsonl.into_bytes(),
            ))
            .purpose(FilePurpose::FineTune)
            .build()
            .context("Failed to build training file upload")?;
        let file = self
            .client
            .files()
            .create(upload)
            .await
            .context("Failed to upload training file")?;

        let request = CreateFineTuningJobRequestArgs::default()
            .model(&self.model)
            .training_file(file.id)
            .suffix(self.settings.fine_tune_suffix.clone())
            .build()
            .context("Failed to build fine-tuning job request")?;
        let job = self
            .client
            .fine_tuning()
            .create(request)
            .await
            .context("Failed to create fine-tuning job")?;

        info!(job_id = %job.id, base_model = %self.model, "fine-tuning job created");
        let fine_tuned_model = self.wait_for_job(&job.id).await?;

        info!(model = %fine_tuned_model, "switching to fine-tuned model");
        self.model = fine_tuned_model;
        Ok(())
    }
}
