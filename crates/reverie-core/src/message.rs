//! Conversation messages and identifiers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use crate::fallback::Scenario;

/// Speaking pace used for duration estimates, in words per minute.
pub const WORDS_PER_MINUTE: u64 = 150;

/// Floor for any estimated duration.
pub const MIN_DURATION_MS: u64 = 1_500;

/// Opaque, globally unique session token.
///
/// Generated from a v4 UUID, which draws from the OS random source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a new random session id.
    pub fn generate() -> Self {
        Self(format!("wt_{}", Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of one message (unique within its session).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn generate() -> Self {
        Self(format!("msg_{}", Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::generate()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    Ai,
    User,
}

impl MessageRole {
    /// Speaker label used when rendering history into a prompt.
    pub fn label(self) -> &'static str {
        match self {
            MessageRole::Ai => "Guide",
            MessageRole::User => "User",
        }
    }
}

/// Which resilience tier produced a piece of content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseSource {
    Primary,
    Secondary,
    Tertiary,
    Static,
}

impl ResponseSource {
    pub fn as_str(self) -> &'static str {
        match self {
            ResponseSource::Primary => "primary",
            ResponseSource::Secondary => "secondary",
            ResponseSource::Tertiary => "tertiary",
            ResponseSource::Static => "static",
        }
    }

    /// True for content that did not come from a live AI call.
    pub fn is_degraded(self) -> bool {
        !matches!(self, ResponseSource::Primary)
    }
}

impl fmt::Display for ResponseSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageMetadata {
    pub source: ResponseSource,

    /// Fallback scenario, present when the content is static.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scenario: Option<Scenario>,
}

impl MessageMetadata {
    pub fn primary() -> Self {
        Self {
            source: ResponseSource::Primary,
            scenario: None,
        }
    }

    pub fn from_source(source: ResponseSource) -> Self {
        Self {
            source,
            scenario: None,
        }
    }

    pub fn fallback(scenario: Scenario) -> Self {
        Self {
            source: ResponseSource::Static,
            scenario: Some(scenario),
        }
    }
}

/// A message before it is appended to a session's history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    /// Id to store under; generated on append when absent.
    pub id: Option<MessageId>,
    pub role: MessageRole,
    pub content: String,
    pub duration_ms: u64,
    pub metadata: MessageMetadata,
}

impl NewMessage {
    /// AI message with a duration estimated from its word count.
    pub fn ai(content: impl Into<String>, metadata: MessageMetadata) -> Self {
        let content = content.into();
        Self {
            id: None,
            role: MessageRole::Ai,
            duration_ms: estimate_duration_ms(&content),
            content,
            metadata,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            id: None,
            role: MessageRole::User,
            duration_ms: estimate_duration_ms(&content),
            content,
            metadata: MessageMetadata::primary(),
        }
    }

    /// Store under an id announced earlier, e.g. in a `start` chunk.
    pub fn with_id(mut self, id: MessageId) -> Self {
        self.id = Some(id);
        self
    }

    /// Override the estimated duration.
    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }
}

/// One conversational turn. Immutable once appended to a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamingMessage {
    pub id: MessageId,

    /// Position in the session history, starting at 0.
    pub sequence: u64,

    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,

    /// Estimated reading/speaking time in milliseconds.
    pub duration_ms: u64,

    pub metadata: MessageMetadata,
}

impl StreamingMessage {
    /// Materialise a pending message at a given history position.
    pub fn from_new(new: NewMessage, sequence: u64, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: new.id.unwrap_or_else(MessageId::generate),
            sequence,
            role: new.role,
            content: new.content,
            timestamp,
            duration_ms: new.duration_ms,
            metadata: new.metadata,
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }

    pub fn source(&self) -> ResponseSource {
        self.metadata.source
    }
}

/// Count whitespace-separated words.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Estimate how long `text` takes to read aloud, in milliseconds.
pub fn estimate_duration_ms(text: &str) -> u64 {
    let words = word_count(text) as u64;
    (words * 60_000 / WORDS_PER_MINUTE).max(MIN_DURATION_MS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_ids_are_unique() {
        let a = SessionId::generate();
        let b = SessionId::generate();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("wt_"));
    }

    #[test]
    fn test_duration_estimate_scales_with_words() {
        let short = estimate_duration_ms("Breathe.");
        assert_eq!(short, MIN_DURATION_MS);

        let text = vec!["word"; 150].join(" ");
        assert_eq!(estimate_duration_ms(&text), 60_000);
    }

    #[test]
    fn test_new_ai_message_estimates_duration() {
        let text = vec!["calm"; 30].join(" ");
        let msg = NewMessage::ai(text, MessageMetadata::primary());
        assert_eq!(msg.role, MessageRole::Ai);
        assert_eq!(msg.duration_ms, 12_000);
    }

    #[test]
    fn test_message_serializes_camel_case() {
        let msg = StreamingMessage::from_new(
            NewMessage::ai("Hello there", MessageMetadata::fallback(Scenario::Calming)),
            0,
            Utc::now(),
        );
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "ai");
        assert_eq!(json["metadata"]["source"], "static");
        assert_eq!(json["metadata"]["scenario"], "calming");
        assert!(json.get("durationMs").is_some());
    }

    #[test]
    fn test_source_degradation() {
        assert!(!ResponseSource::Primary.is_degraded());
        assert!(ResponseSource::Secondary.is_degraded());
        assert!(ResponseSource::Static.is_degraded());
    }
}
