//! # reverie-core
//!
//! Deterministic domain model for Reverie walkthroughs.
//!
//! A walkthrough is a guided, multi-turn AI conversation exploring one
//! journal memory. This crate holds everything about it that does not
//! need a network or a clock-driven task:
//!
//! - Phases and emotional states
//! - Messages, identifiers and duration estimates
//! - The typed `start`/`content`/`end`/`error` stream events
//! - The scenario classifier and static fallback table
//!
//! ## Key Guarantees
//!
//! 1. **No AI calls**: nothing here talks to a provider
//! 2. **Total fallback**: `categorize_scenario` maps every input to a
//!    scenario, and every scenario has hand-authored content
//!
//! ## Example
//!
//! ```rust
//! use reverie_core::{categorize_scenario, FallbackResponse, Scenario};
//!
//! let scenario = categorize_scenario("I can feel a panic coming on");
//! assert_eq!(scenario, Scenario::Anxiety);
//!
//! let response = FallbackResponse::for_scenario(scenario);
//! assert!(!response.text.is_empty());
//! ```

pub mod chunk;
pub mod context;
pub mod fallback;
pub mod message;
pub mod phase;

pub use chunk::{ChunkKind, ChunkMetadata, StreamChunk};
pub use context::{Subject, SubjectKind, UserContext};
pub use fallback::{categorize_scenario, FallbackResponse, Scenario};
pub use message::{
    estimate_duration_ms, word_count, MessageId, MessageMetadata, MessageRole, NewMessage,
    ResponseSource, SessionId, StreamingMessage,
};
pub use phase::{EmotionalState, Phase};

use thiserror::Error;

/// Errors from parsing domain values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("Unknown phase: {0}")]
    UnknownPhase(String),

    #[error("Unknown emotional state: {0}")]
    UnknownEmotionalState(String),
}
