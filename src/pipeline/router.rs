//! OpenAI-compatible chat-completions client for a hosted vision model.
//!
//! Used when only a bearer credential is configured. One request per page:
//! the extraction prompt as text plus the page as a `data:` URL, both in a
//! single user turn.
//!
//! Hosted inference routers are not consistent about the response shape, so
//! [`extract_generated_text`] accepts all of:
//!
//! - `{"choices": [{"message": {"content": "..."}}]}`
//! - `{"choices": [{"message": {"content": [{"type": "text", "text": "..."}]}}]}`
//! - `[{"generated_text": "..."}]`
//! - `{"generated_text": "..."}`

use crate::config::{ExtractionConfig, DEFAULT_MODEL};
use crate::error::{ExtractError, FormError};
use crate::pipeline::encode::EncodedImage;
use crate::pipeline::llm::FieldExtractor;
use crate::prompts::EXTRACTION_PROMPT;
use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tracing::debug;

/// Longest error body kept in an [`ExtractError::Http`] detail.
const MAX_ERROR_DETAIL_CHARS: usize = 200;

/// Bearer-authenticated client for [`ExtractionConfig::endpoint`].
pub struct RouterClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    prompt: String,
    temperature: f32,
    max_tokens: usize,
    timeout_secs: u64,
}

impl RouterClient {
    /// Build a client from `config`.
    ///
    /// # Errors
    /// [`FormError::InvalidConfig`] when `config.api_key` is unset,
    /// [`FormError::Internal`] when the HTTP client cannot be built.
    pub fn new(config: &ExtractionConfig) -> Result<Self, FormError> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| FormError::InvalidConfig("router client needs an API key".into()))?;

        let http = reqwest::Client::builder()
            .user_agent(concat!("edgequake-form2json/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.api_timeout_secs))
            .build()
            .map_err(|e| FormError::Internal(format!("HTTP client: {e}")))?;

        Ok(Self {
            http,
            endpoint: config.endpoint.clone(),
            api_key,
            model: config
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            prompt: config
                .system_prompt
                .clone()
                .unwrap_or_else(|| EXTRACTION_PROMPT.to_string()),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            timeout_secs: config.api_timeout_secs,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn request_body(&self, image: &EncodedImage) -> Value {
        build_request_body(
            &self.model,
            &self.prompt,
            image,
            self.temperature,
            self.max_tokens,
        )
    }

    fn map_send_error(&self, e: reqwest::Error) -> ExtractError {
        if e.is_timeout() {
            ExtractError::Timeout {
                secs: self.timeout_secs,
            }
        } else {
            ExtractError::Transport(e.to_string())
        }
    }
}

#[async_trait]
impl FieldExtractor for RouterClient {
    fn name(&self) -> &str {
        "router"
    }

    async fn extract(&self, image: &EncodedImage) -> Result<String, ExtractError> {
        let start = Instant::now();
        let body = serde_json::to_vec(&self.request_body(image))
            .map_err(|e| ExtractError::Transport(format!("request encoding: {e}")))?;

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        let bytes = response.bytes().await.map_err(|e| self.map_send_error(e))?;

        if !status.is_success() {
            return Err(ExtractError::Http {
                status: status.as_u16(),
                detail: truncate_detail(&String::from_utf8_lossy(&bytes)),
            });
        }

        let value: Value = serde_json::from_slice(&bytes)
            .map_err(|e| ExtractError::MalformedResponse(format!("body is not JSON: {e}")))?;
        let text = extract_generated_text(&value).ok_or_else(|| {
            ExtractError::MalformedResponse(truncate_detail(&value.to_string()))
        })?;

        debug!(
            "Page {}: {} chars from {} in {:?}",
            image.page_num,
            text.len(),
            self.model,
            start.elapsed()
        );
        Ok(text)
    }
}

/// Chat-completions request carrying one page image.
pub fn build_request_body(
    model: &str,
    prompt: &str,
    image: &EncodedImage,
    temperature: f32,
    max_tokens: usize,
) -> Value {
    json!({
        "model": model,
        "messages": [{
            "role": "user",
            "content": [
                { "type": "text", "text": prompt },
                { "type": "image_url", "image_url": { "url": image.to_data_url() } }
            ]
        }],
        "max_tokens": max_tokens,
        "temperature": temperature,
    })
}

/// Pull the generated text out of any of the accepted response shapes.
pub fn extract_generated_text(value: &Value) -> Option<String> {
    if let Some(content) = value
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
    {
        return match content {
            Value::String(s) => Some(s.clone()),
            Value::Array(parts) => Some(
                parts
                    .iter()
                    .filter_map(|p| match p {
                        Value::String(s) => Some(s.as_str()),
                        other => other.get("text").and_then(Value::as_str),
                    })
                    .collect::<Vec<_>>()
                    .join(""),
            ),
            Value::Null => Some(String::new()),
            _ => None,
        };
    }

    let generated = match value {
        Value::Array(items) => items.first()?.get("generated_text"),
        Value::Object(_) => value.get("generated_text"),
        _ => None,
    };
    generated.and_then(Value::as_str).map(str::to_string)
}

fn truncate_detail(s: &str) -> String {
    let s = s.trim();
    if s.chars().count() <= MAX_ERROR_DETAIL_CHARS {
        s.to_string()
    } else {
        let cut: String = s.chars().take(MAX_ERROR_DETAIL_CHARS).collect();
        format!("{cut}…")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page() -> EncodedImage {
        EncodedImage {
            page_num: 1,
            mime_type: "image/jpeg",
            base64: "/9j/AA==".into(),
        }
    }

    #[test]
    fn body_carries_prompt_and_data_url() {
        let body = build_request_body("vlm", "read it", &page(), 0.1, 1000);
        assert_eq!(body["model"], "vlm");
        assert_eq!(body["max_tokens"], 1000);
        let content = &body["messages"][0]["content"];
        assert_eq!(content[0]["text"], "read it");
        assert_eq!(
            content[1]["image_url"]["url"],
            "data:image/jpeg;base64,/9j/AA=="
        );
    }

    #[test]
    fn chat_completion_string_content() {
        let v = json!({"choices": [{"message": {"role": "assistant", "content": "Name: Ann"}}]});
        assert_eq!(extract_generated_text(&v).as_deref(), Some("Name: Ann"));
    }

    #[test]
    fn chat_completion_content_parts() {
        let v = json!({"choices": [{"message": {"content": [
            {"type": "text", "text": "{\"fields\": "},
            {"type": "text", "text": "[]}"}
        ]}}]});
        assert_eq!(
            extract_generated_text(&v).as_deref(),
            Some("{\"fields\": []}")
        );
    }

    #[test]
    fn generated_text_shapes() {
        let list = json!([{"generated_text": "a"}, {"generated_text": "b"}]);
        assert_eq!(extract_generated_text(&list).as_deref(), Some("a"));
        let obj = json!({"generated_text": "c"});
        assert_eq!(extract_generated_text(&obj).as_deref(), Some("c"));
    }

    #[test]
    fn unknown_shapes_are_rejected() {
        assert_eq!(extract_generated_text(&json!({"error": "x"})), None);
        assert_eq!(extract_generated_text(&json!([])), None);
        assert_eq!(extract_generated_text(&json!("text")), None);
    }

    #[test]
    fn error_detail_is_truncated() {
        let long = "x".repeat(500);
        let detail = truncate_detail(&long);
        assert_eq!(detail.chars().count(), MAX_ERROR_DETAIL_CHARS + 1);
        assert_eq!(truncate_detail("  short  "), "short");
    }

    // ── HTTP round trips against a local mock server ─────────────────────

    use crate::pipeline::llm::RetryingExtractor;
    use std::sync::Arc;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const COMPLETIONS: &str = "/v1/chat/completions";

    fn client_for(server: &MockServer, timeout_secs: u64) -> RouterClient {
        let config = ExtractionConfig::builder()
            .api_key("hf_test")
            .endpoint(format!("{}{}", server.uri(), COMPLETIONS))
            .model("test/vlm")
            .api_timeout_secs(timeout_secs)
            .build()
            .unwrap();
        RouterClient::new(&config).unwrap()
    }

    fn completion(text: &str) -> Value {
        json!({"choices": [{"message": {"role": "assistant", "content": text}}]})
    }

    #[tokio::test]
    async fn sends_authorized_request_and_reads_choices() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(COMPLETIONS))
            .and(header("authorization", "Bearer hf_test"))
            .and(header("content-type", "application/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("Name: Ann")))
            .expect(1)
            .mount(&server)
            .await;

        let text = client_for(&server, 5).extract(&page()).await.unwrap();
        assert_eq!(text, "Name: Ann");

        let requests = server.received_requests().await.unwrap();
        let sent: Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(sent["model"], "test/vlm");
        assert_eq!(
            sent["messages"][0]["content"][1]["image_url"]["url"],
            "data:image/jpeg;base64,/9j/AA=="
        );
    }

    #[tokio::test]
    async fn service_unavailable_maps_to_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("model is loading"))
            .mount(&server)
            .await;

        let err = client_for(&server, 5).extract(&page()).await.unwrap_err();
        assert_eq!(
            err,
            ExtractError::Http {
                status: 503,
                detail: "model is loading".into()
            }
        );
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn unauthorized_is_not_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid token"))
            .mount(&server)
            .await;

        let err = client_for(&server, 5).extract(&page()).await.unwrap_err();
        assert!(matches!(err, ExtractError::Http { status: 401, .. }), "got {err:?}");
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn slow_response_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(completion("late"))
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let err = client_for(&server, 1).extract(&page()).await.unwrap_err();
        assert_eq!(err, ExtractError::Timeout { secs: 1 });
    }

    #[tokio::test]
    async fn non_json_success_body_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let err = client_for(&server, 5).extract(&page()).await.unwrap_err();
        assert!(matches!(err, ExtractError::MalformedResponse(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn unknown_json_shape_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"error": null})))
            .mount(&server)
            .await;

        let err = client_for(&server, 5).extract(&page()).await.unwrap_err();
        assert!(matches!(err, ExtractError::MalformedResponse(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn retry_recovers_after_service_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("loading"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("DOB: 1990")))
            .mount(&server)
            .await;

        let retrying = RetryingExtractor::new(Arc::new(client_for(&server, 5)), 2, 1);
        assert_eq!(retrying.extract(&page()).await.unwrap(), "DOB: 1990");
        assert_eq!(server.received_requests().await.unwrap().len(), 2);
    }

    #[test]
    fn client_requires_key() {
        assert!(RouterClient::new(&ExtractionConfig::default()).is_err());
        let config = ExtractionConfig::builder()
            .api_key("hf_x")
            .model("custom/vlm")
            .build()
            .unwrap();
        let client = RouterClient::new(&config).unwrap();
        assert_eq!(client.model(), "custom/vlm");
    }
}
