//! # reverie-runtime
//!
//! Resilient AI streaming for Reverie walkthroughs.
//!
//! A walkthrough is a guided conversation about one journal memory. This
//! crate drives it: it calls a generative-AI provider, streams the reply
//! back as ordered chunks, and keeps the conversation going with static
//! content when the provider misbehaves.
//!
//! ## Important
//!
//! The user never sees an AI failure. Every provider error, timeout, open
//! circuit or full queue ends in a fallback message drawn from
//! `reverie-core`. Only session errors (unknown or ended session) surface
//! to the caller.
//!
//! ## Layers
//!
//! - [`resilience`]: retry, circuit breaker, rate limiter, fallback chain
//! - [`sessions`]: in-memory conversation state with idle expiry
//! - [`providers`]: the [`AiProvider`] seam and its adapters
//! - [`orchestrator`]: [`StreamingWalkthroughService`], composing the above
//!
//! ## Example
//!
//! ```rust,ignore
//! use reverie_runtime::{StreamingWalkthroughService, WalkthroughConfig};
//! use reverie_runtime::providers::ScriptedProvider;
//!
//! let service = StreamingWalkthroughService::new(
//!     Arc::new(ScriptedProvider::new()),
//!     WalkthroughConfig::default(),
//! );
//! let start = service.start_session(subject, "user-1", None).await;
//!
//! let mut chunks = service.stream_response(&start.session_id, Some("I remember the lake".into()));
//! while let Some(chunk) = chunks.next().await {
//!     print!("{}", chunk.to_sse_frame()?);
//! }
//! ```

pub mod cache;
pub mod config;
pub mod orchestrator;
pub mod prompts;
pub mod providers;
pub mod resilience;
pub mod sessions;

pub use cache::{IntroductionCache, IntroductionKey};
pub use config::{CacheConfig, CompletionSettings, ConfigError, StreamConfig, WalkthroughConfig};
pub use orchestrator::{
    AiCallError, ChunkStream, ServiceError, ServiceMetrics, SessionStart, SinkError,
    StreamingWalkthroughService, TranscriptSink, WalkthroughServiceBuilder,
};
pub use providers::{AiProvider, ChatMessage, CompletionConfig, ProviderError};
pub use sessions::{
    ConversationState, ConversationStateManager, SessionConfig, SessionError, SessionMetadata,
    SessionMetrics,
};
