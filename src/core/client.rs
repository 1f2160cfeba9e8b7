//! Language-model client: the completion contract, an OpenAI-compatible HTTP
//! implementation, and a wrapper adding the worker pool, retry and timeouts

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::core::config::TranslatorConfig;
use crate::core::errors::{Result, TranslationError};
use crate::core::models::Stage;
use crate::core::usage::UsageTracker;

/// Which configured model serves a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelTier {
    /// Fast model for extraction and drafting
    Chat,
    /// Slower reasoning model for critique and polish
    Reasoner,
}

/// Completion request
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub stage: Stage,
    pub tier: ModelTier,
    pub system: String,
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
    /// Accept an empty completion instead of treating it as malformed
    pub allow_empty: bool,
}

impl CompletionRequest {
    pub fn new(stage: Stage, tier: ModelTier, system: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            stage,
            tier,
            system: system.into(),
            prompt: prompt.into(),
            max_tokens: 8192,
            temperature: None,
            allow_empty: false,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn allow_empty(mut self) -> Self {
        self.allow_empty = true;
        self
    }
}

/// Completion response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    pub tokens_used: usize,
}

/// Text-completion service
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Run one completion. Implementations do not retry.
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion>;
}

/// OpenAI-compatible `/chat/completions` client
#[derive(Debug, Clone)]
pub struct ChatCompletionClient {
    client: reqwest::Client,
    config: Arc<TranslatorConfig>,
}

impl ChatCompletionClient {
    /// Create a new client
    pub fn new(config: &TranslatorConfig) -> Result<Self> {
        config.validate()?;

        let client = reqwest::Client::builder()
            .pool_idle_timeout(Some(Duration::from_secs(30)))
            .pool_max_idle_per_host(config.max_concurrent)
            .build()?;

        Ok(Self {
            client,
            config: Arc::new(config.clone()),
        })
    }

    fn model_for(&self, tier: ModelTier) -> &str {
        match tier {
            ModelTier::Chat => &self.config.chat_model,
            ModelTier::Reasoner => &self.config.reasoner_model,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.api_base.trim_end_matches('/'))
    }

    /// Build the JSON request body
    pub fn build_body(&self, request: &CompletionRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model_for(request.tier),
            "messages": [
                { "role": "system", "content": request.system },
                { "role": "user", "content": request.prompt },
            ],
            "max_tokens": request.max_tokens,
            "stream": false,
        });

        if let Some(temperature) = request.temperature {
            if let Some(obj) = body.as_object_mut() {
                obj.insert("temperature".to_string(), serde_json::json!(temperature));
            }
        }

        body
    }
}

#[async_trait]
impl LanguageModel for ChatCompletionClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
        let body = self.build_body(request);
        debug!(
            "POST {} ({} stage, model {})",
            self.endpoint(),
            request.stage,
            self.model_for(request.tier)
        );

        let response = self
            .client
            .post(self.endpoint())
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| TranslationError::NetworkError {
                message: e.to_string(),
            })?;

        let status = response.status();

        if status.is_success() {
            let json: serde_json::Value = response
                .json()
                .await
                .map_err(|e| TranslationError::InvalidResponseError {
                    message: e.to_string(),
                })?;
            parse_completion(&json)
        } else {
            let status_code = status.as_u16();
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            let error_text = response.text().await.unwrap_or_default();

            if status_code == 429 {
                return Err(TranslationError::RateLimitError { retry_after });
            }

            Err(TranslationError::ApiError {
                status: status_code,
                message: error_text,
            })
        }
    }
}

/// Extract text and token usage from a chat-completions response
pub fn parse_completion(json: &serde_json::Value) -> Result<Completion> {
    let text = json["choices"]
        .get(0)
        .and_then(|c| c["message"]["content"].as_str())
        .ok_or_else(|| TranslationError::InvalidResponseError {
            message: "No content in response".to_string(),
        })?
        .to_string();

    let tokens_used = json["usage"]["total_tokens"].as_u64().unwrap_or(0) as usize;

    Ok(Completion { text, tokens_used })
}

/// Bounded exponential backoff with a per-call timeout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub call_timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &TranslatorConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
            max_delay: Duration::from_millis(config.retry_max_delay_ms),
            call_timeout: config.request_timeout(),
        }
    }

    /// Delay before attempt `attempt` (1-based retry count)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Delay before retry `attempt` following `error`. A rate limit's
    /// `retry_after` raises the backoff, still bounded by `max_delay`.
    pub fn delay_after(&self, attempt: u32, error: Option<&TranslationError>) -> Duration {
        let backoff = self.delay_for(attempt);
        match error {
            Some(TranslationError::RateLimitError {
                retry_after: Some(seconds),
            }) => backoff.max(Duration::from_secs(*seconds)).min(self.max_delay),
            _ => backoff,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&TranslatorConfig::default())
    }
}

/// Language model behind a worker pool, with retry, timeout and usage tracking
#[derive(Clone)]
pub struct ResilientModel {
    inner: Arc<dyn LanguageModel>,
    policy: RetryPolicy,
    semaphore: Arc<Semaphore>,
    usage: UsageTracker,
}

impl ResilientModel {
    pub fn new(inner: Arc<dyn LanguageModel>, policy: RetryPolicy, max_concurrent: usize) -> Self {
        Self {
            inner,
            policy,
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            usage: UsageTracker::new(),
        }
    }

    /// Build the HTTP client and wrap it according to `config`
    pub fn from_config(config: &TranslatorConfig) -> Result<Self> {
        let client = ChatCompletionClient::new(config)?;
        Ok(Self::new(
            Arc::new(client),
            RetryPolicy::from_config(config),
            config.max_concurrent,
        ))
    }

    pub fn usage(&self) -> &UsageTracker {
        &self.usage
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Run a completion, retrying retryable failures. Returns
    /// `ServiceError` once attempts are exhausted.
    pub async fn call(&self, request: &CompletionRequest) -> Result<String> {
        self.call_validated(request, |text| Ok(text.to_string()))
            .await
    }

    /// Like `call`, with `validate` turning the raw reply into the result.
    /// A rejected reply counts as a retryable invalid response.
    pub async fn call_validated<F>(&self, request: &CompletionRequest, validate: F) -> Result<String>
    where
        F: Fn(&str) -> std::result::Result<String, String>,
    {
        let mut last_error = None;

        for attempt in 0..self.policy.max_attempts {
            if attempt > 0 {
                let delay = self.policy.delay_after(attempt, last_error.as_ref());
                debug!(
                    "Retry attempt {} for {} in {:?}",
                    attempt, request.stage, delay
                );
                self.usage.record_retry(request.stage).await;
                sleep(delay).await;
            }

            let outcome = self.attempt(request).await.and_then(|completion| {
                validate(&completion.text)
                    .map(|text| (text, completion.tokens_used))
                    .map_err(|message| TranslationError::InvalidResponseError { message })
            });
            match outcome {
                Ok((text, tokens_used)) => {
                    if attempt > 0 {
                        info!("{} call succeeded after {} retries", request.stage, attempt);
                    }
                    self.usage.record_success(request.stage, tokens_used).await;
                    return Ok(text);
                }
                Err(e) => {
                    warn!(
                        "{} call failed (attempt {}/{}): {}",
                        request.stage,
                        attempt + 1,
                        self.policy.max_attempts,
                        e
                    );
                    let retryable = e.is_retryable();
                    last_error = Some(e);
                    if !retryable {
                        break;
                    }
                }
            }
        }

        self.usage.record_failure(request.stage).await;
        Err(TranslationError::ServiceError {
            stage: request.stage,
            message: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no attempts made".to_string()),
        })
    }

    async fn attempt(&self, request: &CompletionRequest) -> Result<Completion> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| TranslationError::Cancelled)?;

        let call_timeout = self.policy.call_timeout;
        let completion = timeout(call_timeout, self.inner.complete(request))
            .await
            .map_err(|_| TranslationError::TimeoutError {
                timeout_ms: call_timeout.as_millis() as u64,
            })??;

        if completion.text.trim().is_empty() && !request.allow_empty {
            return Err(TranslationError::InvalidResponseError {
                message: "empty completion".to_string(),
            });
        }

        Ok(completion)
    }
}
