//! Scripted provider for tests and offline demos.
//!
//! Replies are consumed in order; once the script runs out the provider
//! keeps returning its default reply. Calls are recorded for assertions.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

use super::{
    AiProvider, ChatMessage, CompletionConfig, CompletionResponse, ProviderError, TextStream,
    TokenUsage,
};

/// One scripted reply.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// Full text; streamed word by word
    Text(String),

    /// Explicit stream fragments; joined for single-shot calls
    Fragments(Vec<String>),

    /// Fail immediately
    Error(ProviderError),

    /// Stream these fragments, then fail mid-stream
    FailAfter {
        fragments: Vec<String>,
        error: ProviderError,
    },
}

impl ScriptedReply {
    /// Reply with this text, streamed word by word.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Fail with a retryable 503.
    pub fn unavailable() -> Self {
        Self::Error(ProviderError::ApiError {
            status: 503,
            message: "service unavailable".to_string(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct ScriptedProvider {
    script: Arc<Mutex<VecDeque<ScriptedReply>>>,
    default_reply: ScriptedReply,
    delay: Duration,
    fragment_delay: Duration,
    calls: Arc<Mutex<Vec<Vec<ChatMessage>>>>,
}

impl Default for ScriptedProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedProvider {
    /// Provider with an empty script and a gentle default reply.
    pub fn new() -> Self {
        Self {
            script: Arc::new(Mutex::new(VecDeque::new())),
            default_reply: ScriptedReply::text("Let's take a slow breath and begin."),
            delay: Duration::ZERO,
            fragment_delay: Duration::ZERO,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A provider whose every call fails with a 503.
    pub fn failing() -> Self {
        Self::new().always(ScriptedReply::unavailable())
    }

    /// Queue a reply.
    pub fn then(self, reply: ScriptedReply) -> Self {
        self.script.lock().push_back(reply);
        self
    }

    /// Reply used once the script is exhausted.
    pub fn always(mut self, reply: ScriptedReply) -> Self {
        self.default_reply = reply;
        self
    }

    /// Latency before any response.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Latency between stream fragments.
    pub fn with_fragment_delay(mut self, delay: Duration) -> Self {
        self.fragment_delay = delay;
        self
    }

    /// Number of calls made so far.
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Messages of every call, in call order.
    pub fn calls(&self) -> Vec<Vec<ChatMessage>> {
        self.calls.lock().clone()
    }

    async fn next_reply(&self, messages: Vec<ChatMessage>) -> ScriptedReply {
        self.calls.lock().push(messages);
        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.default_reply.clone())
    }
}

fn split_words(text: &str) -> Vec<String> {
    text.split_inclusive(' ').map(str::to_string).collect()
}

#[async_trait]
impl AiProvider for ScriptedProvider {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError> {
        let content = match self.next_reply(messages).await {
            ScriptedReply::Text(text) => text,
            ScriptedReply::Fragments(fragments) => fragments.concat(),
            ScriptedReply::Error(error) | ScriptedReply::FailAfter { error, .. } => {
                return Err(error)
            }
        };

        Ok(CompletionResponse {
            usage: TokenUsage {
                prompt_tokens: 0,
                completion_tokens: content.split_whitespace().count() as u32,
            },
            content,
            model: config.model.clone(),
            stop_reason: Some("end_turn".to_string()),
        })
    }

    async fn complete_stream(
        &self,
        messages: Vec<ChatMessage>,
        _config: &CompletionConfig,
    ) -> Result<TextStream, ProviderError> {
        let items: Vec<Result<String, ProviderError>> = match self.next_reply(messages).await {
            ScriptedReply::Text(text) => split_words(&text).into_iter().map(Ok).collect(),
            ScriptedReply::Fragments(fragments) => fragments.into_iter().map(Ok).collect(),
            ScriptedReply::Error(error) => return Err(error),
            ScriptedReply::FailAfter { fragments, error } => fragments
                .into_iter()
                .map(Ok)
                .chain(std::iter::once(Err(error)))
                .collect(),
        };

        let delay = self.fragment_delay;
        Ok(stream::iter(items)
            .then(move |item| async move {
                if !delay.is_zero() {
                    sleep(delay).await;
                }
                item
            })
            .boxed())
    }

    async fn health_check(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_script_then_default() {
        let provider = ScriptedProvider::new()
            .then(ScriptedReply::text("first"))
            .always(ScriptedReply::text("fallback"));
        let config = CompletionConfig::default();

        let first = provider.complete(vec![], &config).await.unwrap();
        let second = provider.complete(vec![], &config).await.unwrap();

        assert_eq!(first.content, "first");
        assert_eq!(second.content, "fallback");
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn test_stream_splits_words() {
        let provider = ScriptedProvider::new().then(ScriptedReply::text("one two three"));
        let stream = provider
            .complete_stream(vec![ChatMessage::user("hi")], &CompletionConfig::default())
            .await
            .unwrap();

        let fragments: Vec<String> = stream.map(|f| f.unwrap()).collect().await;
        assert_eq!(fragments, vec!["one ", "two ", "three"]);
        assert_eq!(provider.calls()[0][0].content, "hi");
    }

    #[tokio::test]
    async fn test_fail_after_fragments() {
        let provider = ScriptedProvider::new().then(ScriptedReply::FailAfter {
            fragments: vec!["partial".to_string()],
            error: ProviderError::StreamInterrupted("reset".to_string()),
        });
        let mut stream = provider
            .complete_stream(vec![], &CompletionConfig::default())
            .await
            .unwrap();

        assert_eq!(stream.next().await.unwrap().unwrap(), "partial");
        assert!(stream.next().await.unwrap().is_err());
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_failing_provider() {
        let provider = ScriptedProvider::failing();
        let result = provider.complete(vec![], &CompletionConfig::default()).await;
        assert!(matches!(result, Err(ProviderError::ApiError { status: 503, .. })));
    }
}
