//! Anthropic Messages API adapter.
//!
//! Single-shot completions use the plain Messages endpoint; streaming
//! completions set `stream: true` and decode the SSE event stream,
//! yielding the text of every `content_block_delta`.

use super::{
    factory::ProviderFactory,
    secrets::{ApiCredential, CredentialSource},
    AiProvider, ChatMessage, CompletionConfig, CompletionResponse, ProviderError, TextStream,
    TokenUsage,
};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

/// Environment variable name for Anthropic API key.
pub const ANTHROPIC_API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";

/// What a request timeout bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimeoutScope {
    /// Connect, headers and the full body
    WholeRequest,
    /// Connect and headers only; the body may stream for longer
    ResponseHeaders,
}

pub struct AnthropicProvider {
    credential: ApiCredential,
    base_url: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for AnthropicProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicProvider")
            .field("credential", &self.credential)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl AnthropicProvider {
    /// Create a provider with an explicit API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            credential: ApiCredential::new(
                api_key,
                CredentialSource::Programmatic,
                "Anthropic API key",
            ),
            base_url: DEFAULT_BASE_URL.to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Read `ANTHROPIC_API_KEY` from the environment.
    pub fn from_env() -> Result<Self, ProviderError> {
        let credential = ApiCredential::from_env(ANTHROPIC_API_KEY_ENV, "Anthropic API key")?;
        Ok(Self {
            credential,
            base_url: DEFAULT_BASE_URL.to_string(),
            client: reqwest::Client::new(),
        })
    }

    /// Build from JSON config (`api_key`, `base_url`, `connect_timeout_secs`),
    /// falling back to the environment for the key.
    pub fn from_config(config: &JsonValue) -> Result<Self, ProviderError> {
        let credential = ApiCredential::from_config_or_env(
            config,
            "api_key",
            ANTHROPIC_API_KEY_ENV,
            "Anthropic API key",
        )?;

        let base_url = config["base_url"]
            .as_str()
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/')
            .to_string();

        let connect_timeout = config["connect_timeout_secs"].as_u64().unwrap_or(10);
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(connect_timeout))
            .build()
            .map_err(|e| ProviderError::HttpError(e.to_string()))?;

        Ok(Self {
            credential,
            base_url,
            client,
        })
    }

    /// Point at another Messages API host, e.g. a proxy.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    fn build_request(
        messages: Vec<ChatMessage>,
        config: &CompletionConfig,
        stream: bool,
    ) -> AnthropicRequest {
        let mut system = Vec::new();
        let mut turns = Vec::new();
        for msg in messages {
            if msg.role == "system" {
                system.push(msg.content);
            } else {
                turns.push(AnthropicMessage {
                    role: msg.role,
                    content: msg.content,
                });
            }
        }

        AnthropicRequest {
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            system: if system.is_empty() {
                None
            } else {
                Some(system.join("\n\n"))
            },
            messages: turns,
            temperature: Some(config.temperature),
            stream,
        }
    }

    async fn send(
        &self,
        request: &AnthropicRequest,
        timeout: Duration,
        scope: TimeoutScope,
    ) -> Result<reqwest::Response, ProviderError> {
        // Only expose the credential at the point of use
        let mut builder = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", self.credential.expose())
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json");
        if scope == TimeoutScope::WholeRequest {
            builder = builder.timeout(timeout);
        }

        let map_err = |e: reqwest::Error| {
            if e.is_timeout() {
                ProviderError::Timeout(timeout)
            } else {
                ProviderError::HttpError(e.to_string())
            }
        };
        let pending = builder.json(request).send();
        let response = match scope {
            TimeoutScope::WholeRequest => pending.await.map_err(map_err)?,
            TimeoutScope::ResponseHeaders => tokio::time::timeout(timeout, pending)
                .await
                .map_err(|_| ProviderError::Timeout(timeout))?
                .map_err(map_err)?,
        };

        let status = response.status();

        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(ProviderError::RateLimited { retry_after });
        }

        if status.as_u16() == 401 {
            return Err(ProviderError::AuthError);
        }

        if !status.is_success() {
            let message = match response.json::<AnthropicError>().await {
                Ok(body) => body.error.message,
                Err(e) => e.to_string(),
            };
            return Err(ProviderError::ApiError {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response)
    }
}

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<ContentBlockResponse>,
    model: String,
    stop_reason: Option<String>,
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
struct ContentBlockResponse {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct AnthropicError {
    error: AnthropicErrorDetail,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorDetail {
    message: String,
}

/// The subset of streaming events we act on.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamEvent {
    ContentBlockDelta { delta: Delta },
    Error { error: AnthropicErrorDetail },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Delta {
    TextDelta { text: String },
    #[serde(other)]
    Other,
}

/// Incremental decoder for an SSE byte stream.
#[derive(Debug, Default)]
struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    /// Feed bytes; returns the text deltas (or errors) completed by them.
    fn push(&mut self, bytes: &[u8]) -> Vec<Result<String, ProviderError>> {
        self.buffer.extend_from_slice(bytes);
        let mut out = Vec::new();

        while let Some(pos) = self.buffer.windows(2).position(|w| w == b"\n\n") {
            let event: Vec<u8> = self.buffer.drain(..pos + 2).collect();
            if let Some(item) = Self::parse_event(&String::from_utf8_lossy(&event)) {
                out.push(item);
            }
        }
        out
    }

    fn parse_event(raw: &str) -> Option<Result<String, ProviderError>> {
        let data: String = raw
            .lines()
            .filter_map(|line| line.strip_prefix("data:"))
            .map(str::trim_start)
            .collect();
        if data.is_empty() {
            return None;
        }

        match serde_json::from_str::<StreamEvent>(&data) {
            Ok(StreamEvent::ContentBlockDelta {
                delta: Delta::TextDelta { text },
            }) => Some(Ok(text)),
            Ok(StreamEvent::Error { error }) => {
                Some(Err(ProviderError::StreamInterrupted(error.message)))
            }
            Ok(_) => None,
            Err(e) => Some(Err(ProviderError::ParseError(e.to_string()))),
        }
    }
}

#[async_trait]
impl AiProvider for AnthropicProvider {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError> {
        let request = Self::build_request(messages, config, false);
        let response = self
            .send(&request, config.timeout, TimeoutScope::WholeRequest)
            .await?;

        let body: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::ParseError(e.to_string()))?;

        let content = body
            .content
            .into_iter()
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("");

        Ok(CompletionResponse {
            content,
            usage: TokenUsage {
                prompt_tokens: body.usage.input_tokens,
                completion_tokens: body.usage.output_tokens,
            },
            model: body.model,
            stop_reason: body.stop_reason,
        })
    }

    async fn complete_stream(
        &self,
        messages: Vec<ChatMessage>,
        config: &CompletionConfig,
    ) -> Result<TextStream, ProviderError> {
        // The circuit breaker's call timeout bounds the whole turn
        let request = Self::build_request(messages, config, true);
        let response = self
            .send(&request, config.timeout, TimeoutScope::ResponseHeaders)
            .await?;
        let bytes = Box::pin(response.bytes_stream());

        let fragments = stream::unfold(
            (bytes, SseDecoder::default(), VecDeque::new()),
            |(mut bytes, mut decoder, mut pending)| async move {
                loop {
                    if let Some(item) = pending.pop_front() {
                        return Some((item, (bytes, decoder, pending)));
                    }
                    match bytes.next().await {
                        Some(Ok(chunk)) => pending.extend(decoder.push(&chunk)),
                        Some(Err(e)) => {
                            let error = ProviderError::StreamInterrupted(e.to_string());
                            return Some((Err(error), (bytes, decoder, pending)));
                        }
                        None => return None,
                    }
                }
            },
        );

        Ok(fragments.boxed())
    }

    async fn health_check(&self) -> bool {
        !self.credential.is_empty()
    }

    fn name(&self) -> &str {
        "anthropic"
    }
}

/// Factory for Anthropic providers.
///
/// ```json
/// {
///   "api_key": "sk-ant-...",       // optional, falls back to ANTHROPIC_API_KEY
///   "base_url": "https://...",      // optional
///   "connect_timeout_secs": 10      // optional
/// }
/// ```
pub struct AnthropicProviderFactory;

impl ProviderFactory for AnthropicProviderFactory {
    fn provider_type(&self) -> &'static str {
        "anthropic"
    }

    fn create(&self, config: &JsonValue) -> Result<Arc<dyn AiProvider>, ProviderError> {
        Ok(Arc::new(AnthropicProvider::from_config(config)?))
    }

    fn validate_config(&self, config: &JsonValue) -> Result<(), ProviderError> {
        if !ApiCredential::is_available(config, "api_key", ANTHROPIC_API_KEY_ENV) {
            return Err(ProviderError::NotConfigured(format!(
                "Anthropic API key required: set 'api_key' in config or {} env",
                ANTHROPIC_API_KEY_ENV
            )));
        }

        if let Some(url) = config["base_url"].as_str() {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ProviderError::NotConfigured(
                    "base_url must start with http:// or https://".to_string(),
                ));
            }
        }

        Ok(())
    }

    fn description(&self) -> &'static str {
        "Anthropic Claude provider with streaming support"
    }
}
