//! Model interaction: send one encoded page, get the raw response text back.
//!
//! Every backend implements [`FieldExtractor`]. Which one a pipeline uses is
//! decided once by [`resolve_extractor`]:
//!
//! 1. **Pre-built provider** (`config.provider`) — used as-is
//! 2. **Named provider** (`config.provider_name`) — built through
//!    [`ProviderFactory::create_llm_provider`], which reads its own key
//! 3. **Router credential** (`config.api_key`) — [`RouterClient`] against
//!    `config.endpoint`
//! 4. **Nothing** — [`DemoClient`], which reports [`ExtractError::NoCredential`]
//!
//! Backends return text only. Turning that text into fields is
//! [`crate::pipeline::parse`]'s job.
//!
//! ## Retry Strategy
//!
//! [`RetryingExtractor`] retries transient failures (timeouts, transport
//! errors, 429 and 5xx) with exponential backoff, `retry_backoff_ms * 2^n`,
//! each wait capped at 30 s. With 500 ms base and 2 retries the waits are
//! 500 ms → 1 s.

use crate::config::ExtractionConfig;
use crate::error::{ExtractError, FormError};
use crate::pipeline::encode::EncodedImage;
use crate::pipeline::router::RouterClient;
use crate::prompts::EXTRACTION_PROMPT;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, info, warn};

/// Model used with a named provider when none is configured.
const DEFAULT_PROVIDER_MODEL: &str = "gpt-4.1-nano";

/// Upper bound on a single retry wait.
const MAX_BACKOFF_MS: u64 = 30_000;

/// A backend that reads one page image and answers with free-form text.
#[async_trait]
pub trait FieldExtractor: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &str;

    /// Fails with [`ExtractError::NoCredential`] when the backend cannot make
    /// calls at all. Checked once per task, before any page is sent.
    fn check_credential(&self) -> Result<(), ExtractError> {
        Ok(())
    }

    /// Send a single page and return the model's response text.
    async fn extract(&self, image: &EncodedImage) -> Result<String, ExtractError>;
}

// ── edgequake-llm providers ──────────────────────────────────────────────────

/// Extraction through any edgequake-llm vision provider.
pub struct ProviderClient {
    provider: Arc<dyn LLMProvider>,
    system_prompt: String,
    temperature: f32,
    max_tokens: usize,
    timeout_secs: u64,
}

impl ProviderClient {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &ExtractionConfig) -> Self {
        Self {
            provider,
            system_prompt: config
                .system_prompt
                .clone()
                .unwrap_or_else(|| EXTRACTION_PROMPT.to_string()),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            timeout_secs: config.api_timeout_secs,
        }
    }

    fn build_options(&self) -> CompletionOptions {
        CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        }
    }
}

#[async_trait]
impl FieldExtractor for ProviderClient {
    fn name(&self) -> &str {
        "provider"
    }

    async fn extract(&self, image: &EncodedImage) -> Result<String, ExtractError> {
        let start = Instant::now();
        // The image carries the content; the user turn only needs to exist.
        let messages = vec![
            ChatMessage::system(self.system_prompt.as_str()),
            ChatMessage::user_with_images("", vec![image.to_image_data()]),
        ];
        let options = self.build_options();

        let response = timeout(
            Duration::from_secs(self.timeout_secs),
            self.provider.chat(&messages, Some(&options)),
        )
        .await
        .map_err(|_| ExtractError::Timeout {
            secs: self.timeout_secs,
        })?
        .map_err(|e| classify_provider_error(&e.to_string()))?;

        debug!(
            "Page {}: {} input tokens, {} output tokens, {:?}",
            image.page_num,
            response.prompt_tokens,
            response.completion_tokens,
            start.elapsed()
        );
        Ok(response.content)
    }
}

/// Map a provider error message onto the retry classes we care about.
fn classify_provider_error(msg: &str) -> ExtractError {
    let lower = msg.to_ascii_lowercase();
    let status = if lower.contains("429") || lower.contains("rate limit") {
        Some(429)
    } else if lower.contains("401") || lower.contains("unauthorized") {
        Some(401)
    } else if lower.contains("403") || lower.contains("forbidden") {
        Some(403)
    } else if lower.contains("503") || lower.contains("unavailable") {
        Some(503)
    } else {
        None
    };
    match status {
        Some(status) => ExtractError::Http {
            status,
            detail: msg.to_string(),
        },
        None => ExtractError::Transport(msg.to_string()),
    }
}

// ── Demo mode ────────────────────────────────────────────────────────────────

/// Backend used when no credential is configured.
///
/// Never produces text; the pipeline stores the fixed demo payload instead.
#[derive(Debug, Default, Clone, Copy)]
pub struct DemoClient;

#[async_trait]
impl FieldExtractor for DemoClient {
    fn name(&self) -> &str {
        "demo"
    }

    fn check_credential(&self) -> Result<(), ExtractError> {
        Err(ExtractError::NoCredential)
    }

    async fn extract(&self, _image: &EncodedImage) -> Result<String, ExtractError> {
        Err(ExtractError::NoCredential)
    }
}

// ── Retries ──────────────────────────────────────────────────────────────────

/// Wraps another extractor and retries its transient failures.
pub struct RetryingExtractor {
    inner: Arc<dyn FieldExtractor>,
    max_retries: u32,
    retry_backoff_ms: u64,
}

impl RetryingExtractor {
    pub fn new(inner: Arc<dyn FieldExtractor>, max_retries: u32, retry_backoff_ms: u64) -> Self {
        Self {
            inner,
            max_retries,
            retry_backoff_ms,
        }
    }
}

#[async_trait]
impl FieldExtractor for RetryingExtractor {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn check_credential(&self) -> Result<(), ExtractError> {
        self.inner.check_credential()
    }

    async fn extract(&self, image: &EncodedImage) -> Result<String, ExtractError> {
        let mut attempt: u32 = 0;
        loop {
            match self.inner.extract(image).await {
                Ok(text) => return Ok(text),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    let backoff = backoff_ms(self.retry_backoff_ms, attempt);
                    warn!(
                        "Page {}: {} — retry {}/{} after {}ms",
                        image.page_num, e, attempt, self.max_retries, backoff
                    );
                    sleep(Duration::from_millis(backoff)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Wait before retry number `attempt` (1-based), capped at [`MAX_BACKOFF_MS`].
fn backoff_ms(base_ms: u64, attempt: u32) -> u64 {
    2u64.checked_pow(attempt.saturating_sub(1))
        .and_then(|factor| base_ms.checked_mul(factor))
        .unwrap_or(u64::MAX)
        .min(MAX_BACKOFF_MS)
}

// ── Resolution ───────────────────────────────────────────────────────────────

/// Instantiate a named provider with the given model.
fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, FormError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        FormError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Pick the extraction backend for `config`, most specific first.
///
/// # Errors
/// [`FormError::ProviderNotConfigured`] when a named provider cannot be
/// built, [`FormError::Internal`] when the HTTP client cannot be created.
pub fn resolve_extractor(config: &ExtractionConfig) -> Result<Arc<dyn FieldExtractor>, FormError> {
    let base: Arc<dyn FieldExtractor> = if let Some(ref provider) = config.provider {
        Arc::new(ProviderClient::new(Arc::clone(provider), config))
    } else if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_PROVIDER_MODEL);
        info!("Using provider '{}' with model '{}'", name, model);
        Arc::new(ProviderClient::new(create_vision_provider(name, model)?, config))
    } else if config.api_key.is_some() {
        let client = RouterClient::new(config)?;
        info!("Using router endpoint {} ({})", config.endpoint, client.model());
        Arc::new(client)
    } else {
        info!("No API credential configured; uploads will store the demo payload");
        return Ok(Arc::new(DemoClient));
    };

    if config.max_retries == 0 {
        return Ok(base);
    }
    Ok(Arc::new(RetryingExtractor::new(
        base,
        config.max_retries,
        config.retry_backoff_ms,
    )))
}
