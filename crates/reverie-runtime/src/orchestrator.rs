//! Walkthrough orchestrator.
//!
//! Composes the session store, rate limiter, circuit breakers, retry
//! handler and fallback content into two operations:
//! - `start_session`: create a session and produce its opening message
//! - `stream_response`: stream one AI turn as ordered chunks
//!
//! Every AI-layer failure is absorbed here and replaced with static
//! content. Only session errors reach the caller.

use async_trait::async_trait;
use futures::{FutureExt, Stream, StreamExt};
use parking_lot::Mutex;
use reverie_core::{
    categorize_scenario, estimate_duration_ms, word_count, ChunkMetadata, EmotionalState,
    FallbackResponse, MessageId, MessageMetadata, NewMessage, Phase, ResponseSource, Scenario,
    SessionId, StreamChunk, StreamingMessage, Subject, UserContext,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::cache::{IntroductionCache, IntroductionKey};
use crate::config::{ConfigError, WalkthroughConfig};
use crate::prompts::{self, TurnPrompt};
use crate::providers::{AiProvider, ChatMessage, CompletionConfig, ProviderError};
use crate::resilience::{
    CircuitBreaker, CircuitError, CircuitSnapshot, FallbackChain, RateLimitError, RateLimiter,
    RateLimiterMetrics, RetryHandler,
};
use crate::sessions::{
    ConversationState, ConversationStateManager, SessionError, SessionMetadata, SessionMetrics,
};

/// Why one AI call produced nothing usable.
#[derive(Error, Debug)]
pub enum AiCallError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    RateLimited(#[from] RateLimitError),

    #[error("circuit '{0}' is open")]
    CircuitOpen(String),

    #[error("AI call timed out after {0:?}")]
    Timeout(Duration),

    #[error("AI returned an empty response")]
    EmptyResponse,

    #[error("no cached introduction")]
    CacheMiss,
}

impl<E: Into<AiCallError>> From<CircuitError<E>> for AiCallError {
    fn from(err: CircuitError<E>) -> Self {
        match err {
            CircuitError::Open { name } => AiCallError::CircuitOpen(name),
            CircuitError::Timeout { after, .. } => AiCallError::Timeout(after),
            CircuitError::Inner(e) => e.into(),
        }
    }
}

/// Errors from building a service.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Provider not configured: {0}")]
    ProviderNotConfigured(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Error, Debug)]
#[error("transcript sink failed: {0}")]
pub struct SinkError(pub String);

/// Receives a finished session, e.g. to persist its transcript.
#[async_trait]
pub trait TranscriptSink: Send + Sync {
    async fn persist(&self, transcript: &ConversationState) -> Result<(), SinkError>;
}

/// Result of [`StreamingWalkthroughService::start_session`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStart {
    pub session_id: SessionId,
    pub initial_message: StreamingMessage,
}

/// Read-only snapshot across every component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceMetrics {
    pub rate_limiter: RateLimiterMetrics,
    pub completion_breaker: CircuitSnapshot,
    pub stream_breaker: CircuitSnapshot,
    pub sessions: SessionMetrics,
    pub cached_introductions: u64,
}

/// Chunks of one streamed turn.
///
/// Ends after an `end` or `error` chunk. Dropping it stops the turn.
pub struct ChunkStream {
    receiver: mpsc::Receiver<StreamChunk>,
}

impl Stream for ChunkStream {
    type Item = StreamChunk;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

impl std::fmt::Debug for ChunkStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkStream").finish_non_exhaustive()
    }
}

/// How a provider stream stopped without failing.
enum StreamEnd {
    Completed,
    Disconnected,
}

struct Inner {
    provider: Arc<dyn AiProvider>,
    config: WalkthroughConfig,
    sessions: ConversationStateManager,
    limiter: RateLimiter,
    retry: RetryHandler,
    completion_breaker: CircuitBreaker,
    stream_breaker: CircuitBreaker,
    cache: IntroductionCache,
    /// Completion signal of the last queued turn per session
    turn_tails: Mutex<HashMap<SessionId, oneshot::Receiver<()>>>,
    sink: Option<Arc<dyn TranscriptSink>>,
}

/// The walkthrough orchestrator. Cheap to clone.
///
/// # Architecture
/// - Introduction: FallbackChain over primary model, cache, fallback model, static text
/// - Turns: RateLimiter -> CircuitBreaker -> provider stream, static text on failure
/// - One turn at a time per session, run in the order they were requested
#[derive(Clone)]
pub struct StreamingWalkthroughService {
    inner: Arc<Inner>,
}

impl StreamingWalkthroughService {
    /// Create a service. Must be called inside a Tokio runtime; the
    /// session reaper starts immediately.
    ///
    /// An invalid config is logged rather than rejected; use
    /// [`WalkthroughServiceBuilder`] to fail on it. A limiter with a zero
    /// ceiling rejects every AI call, so turns degrade to static content.
    pub fn new(provider: Arc<dyn AiProvider>, config: WalkthroughConfig) -> Self {
        if let Err(e) = config.validate() {
            tracing::error!(error = %e, "Walkthrough config is invalid");
        }
        Self::with_sink(provider, config, None)
    }

    fn with_sink(
        provider: Arc<dyn AiProvider>,
        config: WalkthroughConfig,
        sink: Option<Arc<dyn TranscriptSink>>,
    ) -> Self {
        let inner = Inner {
            sessions: ConversationStateManager::new(config.sessions.clone()),
            limiter: RateLimiter::new(config.rate_limiter.clone()),
            retry: RetryHandler::new(config.retry.clone()),
            completion_breaker: CircuitBreaker::new(
                "ai-completion",
                config.completion_breaker.clone(),
            ),
            stream_breaker: CircuitBreaker::new("ai-streaming", config.stream_breaker.clone()),
            cache: IntroductionCache::from_config(&config.cache),
            turn_tails: Mutex::new(HashMap::new()),
            provider,
            config,
            sink,
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Configuration the service was built with.
    pub fn config(&self) -> &WalkthroughConfig {
        &self.inner.config
    }

    /// Create a session and its opening message.
    ///
    /// Never fails: under total AI failure the opening message is the
    /// static introduction.
    pub async fn start_session(
        &self,
        subject: Subject,
        user_id: &str,
        user_context: Option<UserContext>,
    ) -> SessionStart {
        let inner = &self.inner;
        let subject_id = subject.id.clone();
        let metadata = SessionMetadata {
            subject: Some(subject),
            user_context,
        };
        let messages =
            prompts::introduction_messages(metadata.subject.as_ref(), metadata.user_context.as_ref());
        let session_id = inner
            .sessions
            .create_session(user_id, subject_id.clone(), metadata)
            .session_id;

        let cache_key = IntroductionKey::new(user_id, subject_id);
        let fallback = FallbackResponse::for_scenario(Scenario::Introduction);
        let fallback_model_config = inner
            .config
            .completion
            .fallback_model
            .as_ref()
            .map(|model| inner.config.completion.request.with_model(model));

        let mut chain = FallbackChain::new(
            inner
                .guarded_complete(messages.clone(), &inner.config.completion.request, true)
                .boxed(),
        )
        .secondary(
            async {
                inner
                    .cache
                    .get(&cache_key)
                    .await
                    .ok_or(AiCallError::CacheMiss)
            }
            .boxed(),
        );
        if let Some(config) = fallback_model_config.as_ref() {
            chain = chain.tertiary(inner.guarded_complete(messages.clone(), config, false).boxed());
        }
        let fallback_text = fallback.text.clone();
        let outcome = chain.or_static(move || fallback_text).execute().await;

        let new_message = match outcome {
            Ok(outcome) => {
                if matches!(
                    outcome.source,
                    ResponseSource::Primary | ResponseSource::Tertiary
                ) {
                    inner
                        .cache
                        .insert(cache_key.clone(), outcome.value.clone())
                        .await;
                }
                match outcome.source {
                    ResponseSource::Static => {
                        NewMessage::ai(outcome.value, MessageMetadata::fallback(Scenario::Introduction))
                            .with_duration_ms(fallback.duration_ms)
                    }
                    source => NewMessage::ai(outcome.value, MessageMetadata::from_source(source)),
                }
            }
            // Unreachable with a static tier, handled all the same.
            Err(e) => {
                tracing::error!(session_id = %session_id, error = %e, "Introduction chain failed");
                NewMessage::ai(fallback.text, MessageMetadata::fallback(Scenario::Introduction))
                    .with_duration_ms(fallback.duration_ms)
            }
        };

        let initial_message = match inner.sessions.add_message(&session_id, new_message.clone()) {
            Ok(message) => message,
            Err(e) => {
                tracing::error!(session_id = %session_id, error = %e, "Could not store introduction");
                StreamingMessage::from_new(new_message, 0, chrono::Utc::now())
            }
        };

        tracing::info!(
            session_id = %session_id,
            source = %initial_message.source(),
            "Session started"
        );
        SessionStart {
            session_id,
            initial_message,
        }
    }

    /// Stream one turn.
    ///
    /// The stream yields `start`, zero or more `content`, then `end`; or a
    /// single `error` chunk when the session is unknown, expired or ended.
    /// Turns on one session run one at a time, in call order.
    pub fn stream_response(&self, session_id: &SessionId, user_input: Option<String>) -> ChunkStream {
        let (sender, receiver) = mpsc::channel(self.inner.config.stream.channel_capacity.max(1));
        let (previous, done) = self.inner.queue_turn(session_id);
        let inner = self.inner.clone();
        let session_id = session_id.clone();
        tokio::spawn(async move {
            if let Some(previous) = previous {
                // Closed or sent, either way the earlier turn is over
                let _ = previous.await;
            }
            inner.run_turn(session_id, user_input, sender).await;
            drop(done);
        });
        ChunkStream { receiver }
    }

    /// Get a snapshot of a session.
    pub fn get_session(&self, session_id: &SessionId) -> Result<ConversationState, SessionError> {
        self.inner.sessions.get_session(session_id)
    }

    /// Messages of a session, oldest first.
    pub fn get_history(&self, session_id: &SessionId) -> Result<Vec<StreamingMessage>, SessionError> {
        self.inner.sessions.get_history(session_id)
    }

    /// Move a session to another phase.
    pub fn update_phase(&self, session_id: &SessionId, phase: Phase) -> Result<(), SessionError> {
        self.inner.sessions.update_phase(session_id, phase)
    }

    /// Set or clear the emotional state hint.
    pub fn update_emotional_state(
        &self,
        session_id: &SessionId,
        emotional_state: Option<EmotionalState>,
    ) -> Result<(), SessionError> {
        self.inner
            .sessions
            .update_emotional_state(session_id, emotional_state)
    }

    /// End a session and hand its transcript to the sink, if any.
    pub async fn end_session(&self, session_id: &SessionId) -> Result<ConversationState, SessionError> {
        let state = self.inner.sessions.end_session(session_id)?;
        self.inner.turn_tails.lock().remove(session_id);

        if let Some(sink) = &self.inner.sink {
            if let Err(e) = sink.persist(&state).await {
                tracing::warn!(session_id = %session_id, error = %e, "Transcript sink failed");
            }
        }
        Ok(state)
    }

    /// Snapshot of limiter, breakers, sessions and cache.
    pub fn get_metrics(&self) -> ServiceMetrics {
        let inner = &self.inner;
        ServiceMetrics {
            rate_limiter: inner.limiter.metrics(),
            completion_breaker: inner.completion_breaker.snapshot(),
            stream_breaker: inner.stream_breaker.snapshot(),
            sessions: inner.sessions.metrics(),
            cached_introductions: inner.cache.entry_count(),
        }
    }

    /// Stop background work.
    pub fn shutdown(&self) {
        self.inner.sessions.shutdown();
    }
}

impl std::fmt::Debug for StreamingWalkthroughService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingWalkthroughService")
            .field("provider", &self.inner.provider.name())
            .field("metrics", &self.get_metrics())
            .finish()
    }
}

impl Inner {
    /// Single-shot completion through limiter, breaker and optional retry.
    async fn guarded_complete(
        &self,
        messages: Vec<ChatMessage>,
        config: &CompletionConfig,
        with_retry: bool,
    ) -> Result<String, AiCallError> {
        let provider = &self.provider;
        let call = self.completion_breaker.execute(|| async {
            if with_retry {
                self.retry
                    .execute(
                        || provider.complete(messages.clone(), config),
                        ProviderError::is_retryable,
                    )
                    .await
            } else {
                provider.complete(messages.clone(), config).await
            }
        });

        let response = self.limiter.enqueue(call).await??;
        if response.content.trim().is_empty() {
            return Err(AiCallError::EmptyResponse);
        }
        Ok(response.content)
    }

    /// Take the next place in a session's turn queue. Returns the signal
    /// of the turn to wait for and the sender to drop when this one ends.
    fn queue_turn(
        &self,
        session_id: &SessionId,
    ) -> (Option<oneshot::Receiver<()>>, oneshot::Sender<()>) {
        let (done, tail) = oneshot::channel();
        let mut tails = self.turn_tails.lock();
        tails.retain(|_, queued| matches!(queued.try_recv(), Err(oneshot::error::TryRecvError::Empty)));
        let previous = tails.insert(session_id.clone(), tail);
        (previous, done)
    }

    async fn run_turn(
        &self,
        session_id: SessionId,
        user_input: Option<String>,
        sender: mpsc::Sender<StreamChunk>,
    ) {
        let message_id = MessageId::generate();

        let session = match self.sessions.get_session(&session_id) {
            Ok(session) if session.is_active => session,
            Ok(_) => {
                let err = SessionError::Inactive(session_id.clone());
                tracing::warn!(session_id = %session_id, "Turn requested on ended session");
                let _ = sender.send(StreamChunk::error(message_id, err.to_string())).await;
                return;
            }
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "Turn requested on invalid session");
                let _ = sender.send(StreamChunk::error(message_id, e.to_string())).await;
                return;
            }
        };

        if sender.send(StreamChunk::start(message_id.clone())).await.is_err() {
            return;
        }

        let input = user_input
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());
        let recent_context = session.recent_context(self.config.stream.history_window);
        let seed = session.messages.len();

        if let Some(text) = input {
            if let Err(e) = self.sessions.add_message(&session_id, NewMessage::user(text)) {
                tracing::warn!(session_id = %session_id, error = %e, "Session ended mid-turn");
                let _ = sender.send(StreamChunk::error(message_id, e.to_string())).await;
                return;
            }
        }

        let prompt = TurnPrompt {
            subject: session.metadata.subject.as_ref(),
            user_context: session.metadata.user_context.as_ref(),
            phase: session.current_phase,
            emotional_state: session.emotional_state,
            recent_context: &recent_context,
            user_input: input,
        }
        .to_messages();

        let mut delivered = String::new();
        let result = self
            .limiter
            .enqueue(self.stream_breaker.execute(|| {
                self.forward_stream(prompt, &message_id, &sender, &mut delivered)
            }))
            .await
            .map_err(AiCallError::from)
            .and_then(|r| r.map_err(AiCallError::from));

        let (content, metadata, duration_ms) = match result {
            Ok(StreamEnd::Completed) => {
                let duration_ms = estimate_duration_ms(&delivered);
                (delivered, MessageMetadata::primary(), duration_ms)
            }
            Ok(StreamEnd::Disconnected) => {
                tracing::info!(
                    session_id = %session_id,
                    delivered = delivered.len(),
                    "Client disconnected mid-turn"
                );
                if !delivered.is_empty() {
                    self.store(&session_id, NewMessage::ai(delivered, MessageMetadata::primary()).with_id(message_id));
                }
                return;
            }
            Err(e) => {
                let scenario = match input {
                    Some(text) => categorize_scenario(text),
                    None => scenario_for_phase(session.current_phase),
                };
                let fallback = FallbackResponse::select(scenario, seed);
                tracing::warn!(
                    session_id = %session_id,
                    error = %e,
                    scenario = %scenario,
                    partial = !delivered.is_empty(),
                    "AI turn failed, using fallback content"
                );

                let (text, duration_ms) = if delivered.is_empty() {
                    (fallback.text, fallback.duration_ms)
                } else {
                    let text = format!("\n\n{}", fallback.text);
                    let duration_ms = estimate_duration_ms(&delivered) + fallback.duration_ms;
                    (text, duration_ms)
                };

                if sender
                    .send(StreamChunk::content(message_id.clone(), text.clone()))
                    .await
                    .is_err()
                {
                    if !delivered.is_empty() {
                        self.store(
                            &session_id,
                            NewMessage::ai(delivered, MessageMetadata::fallback(scenario)).with_id(message_id),
                        );
                    }
                    return;
                }
                delivered.push_str(&text);
                (delivered, MessageMetadata::fallback(scenario), duration_ms)
            }
        };

        let source = metadata.source;
        let end = ChunkMetadata {
            length: content.chars().count(),
            word_count: word_count(&content),
            duration_ms,
            source,
        };
        self.store(
            &session_id,
            NewMessage::ai(content, metadata)
                .with_id(message_id.clone())
                .with_duration_ms(duration_ms),
        );
        let _ = sender.send(StreamChunk::end(message_id, end)).await;
    }

    /// Forward provider fragments as content chunks. `delivered` holds
    /// exactly the text the client was sent.
    async fn forward_stream(
        &self,
        prompt: Vec<ChatMessage>,
        message_id: &MessageId,
        sender: &mpsc::Sender<StreamChunk>,
        delivered: &mut String,
    ) -> Result<StreamEnd, AiCallError> {
        let mut stream = self
            .provider
            .complete_stream(prompt, &self.config.completion.request)
            .await?;

        while let Some(fragment) = stream.next().await {
            let fragment = fragment?;
            if fragment.is_empty() {
                continue;
            }
            if sender
                .send(StreamChunk::content(message_id.clone(), fragment.clone()))
                .await
                .is_err()
            {
                return Ok(StreamEnd::Disconnected);
            }
            delivered.push_str(&fragment);
        }

        if delivered.trim().is_empty() {
            return Err(AiCallError::EmptyResponse);
        }
        Ok(StreamEnd::Completed)
    }

    fn store(&self, session_id: &SessionId, message: NewMessage) {
        if let Err(e) = self.sessions.add_message(session_id, message) {
            tracing::warn!(session_id = %session_id, error = %e, "Could not store AI turn");
        }
    }
}

/// Fallback scenario for a turn without user input.
fn scenario_for_phase(phase: Phase) -> Scenario {
    match phase {
        Phase::Introduction => Scenario::Introduction,
        Phase::Conclusion => Scenario::Conclusion,
        Phase::Exploration | Phase::Reflection => Scenario::Calming,
    }
}

/// Builder for StreamingWalkthroughService.
pub struct WalkthroughServiceBuilder {
    provider: Option<Arc<dyn AiProvider>>,
    config: WalkthroughConfig,
    sink: Option<Arc<dyn TranscriptSink>>,
}

impl WalkthroughServiceBuilder {
    pub fn new() -> Self {
        Self {
            provider: None,
            config: WalkthroughConfig::default(),
            sink: None,
        }
    }

    /// Set the AI provider.
    pub fn provider(mut self, provider: Arc<dyn AiProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn config(mut self, config: WalkthroughConfig) -> Self {
        self.config = config;
        self
    }

    pub fn transcript_sink(mut self, sink: Arc<dyn TranscriptSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Validate the configuration and build the service.
    pub fn build(self) -> Result<StreamingWalkthroughService, ServiceError> {
        let provider = self
            .provider
            .ok_or_else(|| ServiceError::ProviderNotConfigured("No provider set".to_string()))?;
        self.config.validate()?;

        Ok(StreamingWalkthroughService::with_sink(
            provider,
            self.config,
            self.sink,
        ))
    }
}

impl Default for WalkthroughServiceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{ScriptedProvider, ScriptedReply};
    use crate::resilience::{CircuitStatus, RetryConfig};
    use reverie_core::{ChunkKind, MessageRole};

    fn test_config() -> WalkthroughConfig {
        WalkthroughConfig {
            retry: RetryConfig {
                max_retries: 0,
                jitter: false,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn service(provider: ScriptedProvider) -> StreamingWalkthroughService {
        StreamingWalkthroughService::new(Arc::new(provider), test_config())
    }

    fn subject() -> Subject {
        Subject::text("mem-1", "The lake house", "We swam every morning.")
    }

    fn contents(chunks: &[StreamChunk]) -> Vec<&str> {
        chunks
            .iter()
            .filter(|c| c.kind == ChunkKind::Content)
            .filter_map(|c| c.content.as_deref())
            .collect()
    }

    fn kinds(chunks: &[StreamChunk]) -> Vec<ChunkKind> {
        chunks.iter().map(|c| c.kind).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_session_with_primary_introduction() {
        let provider = ScriptedProvider::new().then(ScriptedReply::text("Welcome. Let's settle in."));
        let service = service(provider.clone());

        let start = service.start_session(subject(), "user-1", None).await;

        assert_eq!(start.initial_message.content, "Welcome. Let's settle in.");
        assert_eq!(start.initial_message.source(), ResponseSource::Primary);
        assert_eq!(start.initial_message.role, MessageRole::Ai);

        let session = service.get_session(&start.session_id).unwrap();
        assert_eq!(session.current_phase, Phase::Introduction);
        assert_eq!(session.messages.len(), 1);
        assert_eq!(session.messages[0].id, start.initial_message.id);
        assert_eq!(provider.call_count(), 1);
        assert!(provider.calls()[0][0].content.contains("The lake house"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_session_survives_total_failure() {
        let service = service(ScriptedProvider::failing());

        let start = service.start_session(subject(), "user-1", None).await;

        let expected = FallbackResponse::for_scenario(Scenario::Introduction);
        assert_eq!(start.initial_message.content, expected.text);
        assert_eq!(start.initial_message.source(), ResponseSource::Static);
        assert_eq!(start.initial_message.duration_ms, expected.duration_ms);
        assert_eq!(
            start.initial_message.metadata.scenario,
            Some(Scenario::Introduction)
        );
        assert_eq!(
            service.get_session(&start.session_id).unwrap().current_phase,
            Phase::Introduction
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_introduction_served_from_cache() {
        let provider = ScriptedProvider::new()
            .then(ScriptedReply::text("Welcome to the lake house."))
            .always(ScriptedReply::unavailable());
        let service = service(provider);

        let first = service.start_session(subject(), "user-1", None).await;
        assert_eq!(first.initial_message.source(), ResponseSource::Primary);

        let second = service.start_session(subject(), "user-1", None).await;
        assert_eq!(second.initial_message.source(), ResponseSource::Secondary);
        assert_eq!(second.initial_message.content, "Welcome to the lake house.");
        assert_ne!(first.session_id, second.session_id);

        let other_user = service.start_session(subject(), "user-2", None).await;
        assert_eq!(other_user.initial_message.source(), ResponseSource::Static);
    }

    #[tokio::test(start_paused = true)]
    async fn test_introduction_from_fallback_model() {
        let provider = ScriptedProvider::new()
            .then(ScriptedReply::unavailable())
            .then(ScriptedReply::text("A shorter welcome."));
        let service = service(provider.clone());

        let start = service.start_session(subject(), "user-1", None).await;
        assert_eq!(start.initial_message.source(), ResponseSource::Tertiary);
        assert_eq!(start.initial_message.content, "A shorter welcome.");
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_response_success() {
        let provider = ScriptedProvider::new()
            .then(ScriptedReply::text("Welcome."))
            .then(ScriptedReply::text("Notice the light on the water."));
        let service = service(provider.clone());
        let start = service.start_session(subject(), "user-1", None).await;

        let chunks: Vec<StreamChunk> = service
            .stream_response(&start.session_id, Some("I see the dock".to_string()))
            .collect()
            .await;

        assert_eq!(chunks.first().map(|c| c.kind), Some(ChunkKind::Start));
        assert_eq!(chunks.last().map(|c| c.kind), Some(ChunkKind::End));
        let message_id = &chunks[0].message_id;
        assert!(chunks.iter().all(|c| &c.message_id == message_id));

        let text = contents(&chunks).concat();
        assert_eq!(text, "Notice the light on the water.");

        let end = chunks.last().and_then(|c| c.metadata.clone()).unwrap();
        assert_eq!(end.source, ResponseSource::Primary);
        assert_eq!(end.length, text.chars().count());
        assert_eq!(end.word_count, 6);

        let history = service.get_history(&start.session_id).unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[1].role, MessageRole::User);
        assert_eq!(history[1].content, "I see the dock");
        assert_eq!(history[2].content, text);
        assert_eq!(&history[2].id, message_id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_falls_back_when_ai_fails() {
        let service = service(ScriptedProvider::failing());
        let start = service.start_session(subject(), "user-1", None).await;

        let chunks: Vec<StreamChunk> = service
            .stream_response(&start.session_id, Some("I feel anxious".to_string()))
            .collect()
            .await;

        assert_eq!(
            kinds(&chunks),
            vec![ChunkKind::Start, ChunkKind::Content, ChunkKind::End]
        );
        let text = contents(&chunks)[0];
        assert!(FallbackResponse::texts(Scenario::Anxiety).contains(&text));

        let history = service.get_history(&start.session_id).unwrap();
        let last = history.last().unwrap();
        assert_eq!(last.content, text);
        assert_eq!(last.source(), ResponseSource::Static);
        assert_eq!(last.metadata.scenario, Some(Scenario::Anxiety));
        assert_eq!(
            chunks[2].metadata.as_ref().map(|m| m.source),
            Some(ResponseSource::Static)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_session_yields_single_error() {
        let service = service(ScriptedProvider::new());
        let chunks: Vec<StreamChunk> = service
            .stream_response(&SessionId::from("wt_never_created"), Some("hello".to_string()))
            .collect()
            .await;

        assert_eq!(kinds(&chunks), vec![ChunkKind::Error]);
        assert!(chunks[0]
            .content
            .as_deref()
            .unwrap_or_default()
            .contains("not found"));
        assert_eq!(service.get_metrics().sessions.total, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_stream_failure_appends_fallback() {
        let provider = ScriptedProvider::new()
            .then(ScriptedReply::text("Welcome."))
            .then(ScriptedReply::FailAfter {
                fragments: vec!["Let's ".to_string(), "look ".to_string()],
                error: ProviderError::StreamInterrupted("connection reset".to_string()),
            });
        let service = service(provider);
        let start = service.start_session(subject(), "user-1", None).await;

        let chunks: Vec<StreamChunk> = service
            .stream_response(&start.session_id, Some("I remember that day".to_string()))
            .collect()
            .await;

        let parts = contents(&chunks);
        assert_eq!(parts[..2], ["Let's ", "look "]);
        assert!(parts[2].starts_with("\n\n"));
        assert!(FallbackResponse::texts(Scenario::MemoryExploration)
            .contains(&parts[2].trim_start_matches('\n')));

        let stored = service.get_history(&start.session_id).unwrap().pop().unwrap();
        assert_eq!(stored.content, parts.concat());
        assert_eq!(stored.source(), ResponseSource::Static);
    }

    #[tokio::test(start_paused = true)]
    async fn test_turn_without_input_uses_phase_scenario() {
        let service = service(ScriptedProvider::failing());
        let start = service.start_session(subject(), "user-1", None).await;
        service
            .update_phase(&start.session_id, Phase::Conclusion)
            .unwrap();

        let chunks: Vec<StreamChunk> = service.stream_response(&start.session_id, None).collect().await;
        let text = contents(&chunks)[0];
        assert!(FallbackResponse::texts(Scenario::Conclusion).contains(&text));

        // No user message was stored.
        let history = service.get_history(&start.session_id).unwrap();
        assert_eq!(history.len(), 2);
        assert!(history.iter().all(|m| m.role == MessageRole::Ai));
    }

    #[tokio::test(start_paused = true)]
    async fn test_prompt_carries_history_phase_and_input_once() {
        let provider = ScriptedProvider::new()
            .then(ScriptedReply::text("Welcome to your memory."))
            .then(ScriptedReply::text("Tell me more."));
        let service = service(provider.clone());
        let context = UserContext {
            age: Some(40),
            primary_concerns: vec!["grief".to_string()],
            support_levels: vec![],
        };
        let start = service.start_session(subject(), "user-1", Some(context)).await;
        service
            .update_emotional_state(&start.session_id, Some(EmotionalState::Sad))
            .unwrap();

        let _: Vec<StreamChunk> = service
            .stream_response(&start.session_id, Some("The water was cold".to_string()))
            .collect()
            .await;

        let calls = provider.calls();
        let system = &calls[1][0].content;
        let turn = &calls[1][1].content;
        assert!(system.contains("grief"));
        assert!(turn.contains("Guide: Welcome to your memory."));
        assert!(turn.contains(Phase::Introduction.guidance()));
        assert!(turn.contains("feel sad"));
        assert_eq!(turn.matches("The water was cold").count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_turns_on_one_session_are_serialized() {
        let provider = ScriptedProvider::new()
            .then(ScriptedReply::text("Welcome."))
            .always(ScriptedReply::text("A slow reply in several words."))
            .with_fragment_delay(Duration::from_millis(50));
        let service = service(provider);
        let start = service.start_session(subject(), "user-1", None).await;

        let first = service.stream_response(&start.session_id, Some("one".to_string()));
        let second = service.stream_response(&start.session_id, Some("two".to_string()));
        let (first, second): (Vec<StreamChunk>, Vec<StreamChunk>) =
            tokio::join!(first.collect(), second.collect());

        assert_eq!(first.last().map(|c| c.kind), Some(ChunkKind::End));
        assert_eq!(second.last().map(|c| c.kind), Some(ChunkKind::End));

        let roles: Vec<MessageRole> = service
            .get_history(&start.session_id)
            .unwrap()
            .iter()
            .map(|m| m.role)
            .collect();
        assert_eq!(
            roles,
            vec![
                MessageRole::Ai,
                MessageRole::User,
                MessageRole::Ai,
                MessageRole::User,
                MessageRole::Ai
            ]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_turns_run_in_call_order_across_workers() {
        let provider = ScriptedProvider::new()
            .always(ScriptedReply::text("Noted, go on."))
            .with_fragment_delay(Duration::from_millis(1));
        let mut config = test_config();
        config.rate_limiter.requests_per_window = 1_000;
        config.rate_limiter.max_concurrent = 8;
        let service = StreamingWalkthroughService::new(Arc::new(provider), config);

        for _ in 0..50 {
            let start = service.start_session(subject(), "user-1", None).await;
            let first = service.stream_response(&start.session_id, Some("first".to_string()));
            let second = service.stream_response(&start.session_id, Some("second".to_string()));
            let _: (Vec<StreamChunk>, Vec<StreamChunk>) =
                tokio::join!(first.collect(), second.collect());

            let user_turns: Vec<String> = service
                .get_history(&start.session_id)
                .unwrap()
                .into_iter()
                .filter(|m| m.role == MessageRole::User)
                .map(|m| m.content)
                .collect();
            assert_eq!(user_turns, vec!["first", "second"]);
        }
        service.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_rate_budget_degrades_instead_of_hanging() {
        let provider = ScriptedProvider::new().always(ScriptedReply::text("Unused."));
        let mut config = test_config();
        config.rate_limiter.requests_per_window = 0;
        let service = StreamingWalkthroughService::new(Arc::new(provider), config);

        let start = tokio::time::timeout(
            Duration::from_secs(5),
            service.start_session(subject(), "user-1", None),
        )
        .await
        .unwrap();
        assert_eq!(start.initial_message.source(), ResponseSource::Static);

        let chunks: Vec<StreamChunk> = tokio::time::timeout(
            Duration::from_secs(5),
            service
                .stream_response(&start.session_id, Some("hello".to_string()))
                .collect(),
        )
        .await
        .unwrap();
        assert_eq!(chunks.last().map(|c| c.kind), Some(ChunkKind::End));
        assert!(!contents(&chunks).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_disconnect_stores_delivered_text() {
        let provider = ScriptedProvider::new()
            .then(ScriptedReply::text("Welcome."))
            .then(ScriptedReply::text("one two three four five six seven eight"))
            .with_fragment_delay(Duration::from_millis(100));
        let mut config = test_config();
        config.stream.channel_capacity = 1;
        let service = StreamingWalkthroughService::new(Arc::new(provider), config);
        let start = service.start_session(subject(), "user-1", None).await;

        let mut stream = service.stream_response(&start.session_id, Some("go on".to_string()));
        assert_eq!(stream.next().await.map(|c| c.kind), Some(ChunkKind::Start));
        let first = stream.next().await.and_then(|c| c.content).unwrap();
        assert_eq!(first, "one ");
        drop(stream);

        tokio::time::sleep(Duration::from_secs(5)).await;

        let history = service.get_history(&start.session_id).unwrap();
        assert_eq!(history.len(), 3);
        let partial = &history[2];
        assert!(partial.content.starts_with("one "));
        assert!("one two three four five six seven eight".starts_with(partial.content.as_str()));
        assert_eq!(partial.source(), ResponseSource::Primary);
    }

    #[derive(Default)]
    struct RecordingSink {
        transcripts: Mutex<Vec<ConversationState>>,
    }

    #[async_trait]
    impl TranscriptSink for RecordingSink {
        async fn persist(&self, transcript: &ConversationState) -> Result<(), SinkError> {
            self.transcripts.lock().push(transcript.clone());
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_session_hands_transcript_to_sink() {
        let sink = Arc::new(RecordingSink::default());
        let service = WalkthroughServiceBuilder::new()
            .provider(Arc::new(ScriptedProvider::new()))
            .config(test_config())
            .transcript_sink(sink.clone())
            .build()
            .unwrap();
        let start = service.start_session(subject(), "user-1", None).await;

        let ended = service.end_session(&start.session_id).await.unwrap();
        assert!(!ended.is_active);
        assert_eq!(sink.transcripts.lock().len(), 1);
        assert_eq!(sink.transcripts.lock()[0].session_id, start.session_id);

        // Still readable during the grace window, but no longer streamable.
        assert!(service.get_session(&start.session_id).is_ok());
        let chunks: Vec<StreamChunk> = service
            .stream_response(&start.session_id, Some("hello?".to_string()))
            .collect()
            .await;
        assert_eq!(kinds(&chunks), vec![ChunkKind::Error]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_metrics_snapshot() {
        let service = service(ScriptedProvider::new());
        let start = service.start_session(subject(), "user-1", None).await;
        service.update_phase(&start.session_id, Phase::Exploration).unwrap();

        let metrics = service.get_metrics();
        assert_eq!(metrics.sessions.total, 1);
        assert_eq!(metrics.sessions.by_phase.get(&Phase::Exploration), Some(&1));
        assert_eq!(metrics.completion_breaker.name, "ai-completion");
        assert_eq!(metrics.stream_breaker.status, CircuitStatus::Closed);
        assert_eq!(metrics.rate_limiter.running, 0);
        assert_eq!(metrics.rate_limiter.requests_in_window, 1);

        let json = serde_json::to_value(&metrics).unwrap();
        assert!(json.get("rateLimiter").is_some());
    }

    #[test]
    fn test_builder_requires_provider() {
        assert!(matches!(
            WalkthroughServiceBuilder::new().build(),
            Err(ServiceError::ProviderNotConfigured(_))
        ));
    }
}
