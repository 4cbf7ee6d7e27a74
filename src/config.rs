//! Configuration types for form field extraction.
//!
//! All pipeline behaviour is controlled through [`ExtractionConfig`], built
//! via its [`ExtractionConfigBuilder`] or read from the environment with
//! [`ExtractionConfig::from_env`].
//!
//! The only credential is [`ExtractionConfig::api_key`]. Leaving it unset is
//! a supported operating mode: the pipeline stores a fixed demo payload
//! instead of calling a model (see [`crate::output::StructuredPayload::demo`]).

use crate::error::FormError;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use std::fmt;
use std::sync::Arc;

/// OpenAI-compatible chat-completions endpoint used with `api_key`.
pub const DEFAULT_ENDPOINT: &str = "https://router.huggingface.co/v1/chat/completions";

/// Vision model requested from [`DEFAULT_ENDPOINT`].
pub const DEFAULT_MODEL: &str = "Qwen/Qwen2.5-VL-7B-Instruct";

/// Environment variables checked for the credential, first non-empty wins.
pub const CREDENTIAL_VARS: &[&str] = &["HUGGINGFACE_API_KEY", "HF_TOKEN", "HUGGING_FACE_API_KEY"];

/// Configuration for a form extraction pipeline.
///
/// # Example
/// ```rust
/// use edgequake_form2json::ExtractionConfig;
///
/// let config = ExtractionConfig::builder()
///     .api_key("hf_xxx")
///     .api_timeout_secs(45)
///     .concurrency(2)
///     .build()
///     .unwrap();
/// assert!(config.has_credential());
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// Bearer token for [`Self::endpoint`]. `None` selects demo mode unless a
    /// provider is configured.
    pub api_key: Option<String>,

    /// Chat-completions URL used with `api_key`. Default: [`DEFAULT_ENDPOINT`].
    pub endpoint: String,

    /// Model identifier. If None, [`DEFAULT_MODEL`] for the router and
    /// `gpt-4.1-nano` for named providers.
    pub model: Option<String>,

    /// edgequake-llm provider name (e.g. "openai", "anthropic", "ollama").
    /// The provider reads its own key from the environment.
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over everything else.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature. Default: 0.1.
    ///
    /// Transcription wants the model to be faithful to the page, not creative.
    pub temperature: f32,

    /// Maximum tokens the model may generate per page. Default: 1000.
    pub max_tokens: usize,

    /// Per-call timeout in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Retries per page on a transient failure (timeout, 429, 5xx). Default: 2.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Pages of one document extracted concurrently. Default: 4.
    pub concurrency: usize,

    /// Longest edge of a rendered PDF page in pixels. Default: 2000.
    pub max_rendered_pixels: u32,

    /// Wire format of page images. Default: JPEG at quality 95.
    pub image_encoding: ImageEncoding,

    /// Custom instruction. If None, uses [`crate::prompts::EXTRACTION_PROMPT`].
    pub system_prompt: Option<String>,

    /// Prefix labels with `Page N - ` on multi-page documents. Default: false.
    pub label_pages: bool,

    /// Receives per-page events while an upload is processed.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.1,
            max_tokens: 1000,
            api_timeout_secs: 60,
            max_retries: 2,
            retry_backoff_ms: 500,
            concurrency: 4,
            max_rendered_pixels: 2000,
            image_encoding: ImageEncoding::default(),
            system_prompt: None,
            label_pages: false,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("max_retries", &self.max_retries)
            .field("concurrency", &self.concurrency)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("image_encoding", &self.image_encoding)
            .field("label_pages", &self.label_pages)
            .finish()
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }

    /// Read configuration from process environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through `lookup`, which maps a variable name to
    /// its value. Empty values count as unset.
    ///
    /// | Variable | Field |
    /// |----------|-------|
    /// | `HUGGINGFACE_API_KEY`, `HF_TOKEN`, `HUGGING_FACE_API_KEY` | `api_key` |
    /// | `FORM2JSON_ENDPOINT` | `endpoint` |
    /// | `FORM2JSON_MODEL` | `model` |
    /// | `FORM2JSON_PROVIDER` | `provider_name` |
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let mut config = Self {
            api_key: CREDENTIAL_VARS.iter().find_map(|k| get(k)),
            model: get("FORM2JSON_MODEL"),
            provider_name: get("FORM2JSON_PROVIDER"),
            ..Self::default()
        };
        if let Some(endpoint) = get("FORM2JSON_ENDPOINT") {
            config.endpoint = endpoint;
        }
        config
    }

    /// True when some real extraction backend is configured.
    pub fn has_credential(&self) -> bool {
        self.provider.is_some() || self.provider_name.is_some() || self.api_key.is_some()
    }
}

/// Builder for [`ExtractionConfig`].
#[derive(Debug)]
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl ExtractionConfigBuilder {
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = Some(key.into());
        self
    }

    pub fn endpoint(mut self, url: impl Into<String>) -> Self {
        self.config.endpoint = url.into();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn image_encoding(mut self, encoding: ImageEncoding) -> Self {
        self.config.image_encoding = encoding;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn label_pages(mut self, v: bool) -> Self {
        self.config.label_pages = v;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, FormError> {
        let c = &self.config;
        if c.api_timeout_secs == 0 {
            return Err(FormError::InvalidConfig(
                "API timeout must be at least 1 second".into(),
            ));
        }
        if c.api_key.as_deref().is_some_and(|k| k.trim().is_empty()) {
            return Err(FormError::InvalidConfig("API key is empty".into()));
        }
        if !(c.endpoint.starts_with("http://") || c.endpoint.starts_with("https://")) {
            return Err(FormError::InvalidConfig(format!(
                "Endpoint must be an HTTP(S) URL, got '{}'",
                c.endpoint
            )));
        }
        if let ImageEncoding::Jpeg { quality } = c.image_encoding {
            if quality == 0 || quality > 100 {
                return Err(FormError::InvalidConfig(format!(
                    "JPEG quality must be 1–100, got {quality}"
                )));
            }
        }
        Ok(self.config)
    }
}

/// Wire format used when sending a page image to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageEncoding {
    /// Lossless; larger payloads.
    Png,
    /// Lossy; photographed forms are far smaller at near-identical legibility.
    Jpeg { quality: u8 },
}

impl Default for ImageEncoding {
    fn default() -> Self {
        ImageEncoding::Jpeg { quality: 95 }
    }
}

impl ImageEncoding {
    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageEncoding::Png => "image/png",
            ImageEncoding::Jpeg { .. } => "image/jpeg",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let c = ExtractionConfig::default();
        assert_eq!(c.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(c.api_timeout_secs, 60);
        assert_eq!(c.image_encoding, ImageEncoding::Jpeg { quality: 95 });
        assert!(!c.has_credential());
    }

    #[test]
    fn credential_lookup_order() {
        let c = ExtractionConfig::from_lookup(lookup_from(&[
            ("HF_TOKEN", "second"),
            ("HUGGING_FACE_API_KEY", "third"),
        ]));
        assert_eq!(c.api_key.as_deref(), Some("second"));

        let c = ExtractionConfig::from_lookup(lookup_from(&[
            ("HUGGINGFACE_API_KEY", "first"),
            ("HF_TOKEN", "second"),
        ]));
        assert_eq!(c.api_key.as_deref(), Some("first"));
    }

    #[test]
    fn blank_credential_means_demo_mode() {
        let c = ExtractionConfig::from_lookup(lookup_from(&[("HUGGINGFACE_API_KEY", "   ")]));
        assert!(c.api_key.is_none());
        assert!(!c.has_credential());
    }

    #[test]
    fn env_overrides_endpoint_and_model() {
        let c = ExtractionConfig::from_lookup(lookup_from(&[
            ("FORM2JSON_ENDPOINT", "http://localhost:8080/v1/chat/completions"),
            ("FORM2JSON_MODEL", "llava"),
        ]));
        assert_eq!(c.endpoint, "http://localhost:8080/v1/chat/completions");
        assert_eq!(c.model.as_deref(), Some("llava"));
    }

    #[test]
    fn builder_clamps_and_validates() {
        let c = ExtractionConfig::builder()
            .concurrency(0)
            .temperature(5.0)
            .build()
            .unwrap();
        assert_eq!(c.concurrency, 1);
        assert_eq!(c.temperature, 2.0);

        assert!(ExtractionConfig::builder()
            .api_timeout_secs(0)
            .build()
            .is_err());
        assert!(ExtractionConfig::builder()
            .endpoint("ftp://example.com")
            .build()
            .is_err());
        assert!(ExtractionConfig::builder()
            .image_encoding(ImageEncoding::Jpeg { quality: 0 })
            .build()
            .is_err());
    }

    #[test]
    fn debug_redacts_key() {
        let c = ExtractionConfig::builder().api_key("hf_secret").build().unwrap();
        let dbg = format!("{c:?}");
        assert!(!dbg.contains("hf_secret"));
        assert!(dbg.contains("<redacted>"));
    }
}
