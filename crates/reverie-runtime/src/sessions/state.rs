//! Per-session conversation record.

use chrono::{DateTime, Utc};
use reverie_core::{
    EmotionalState, NewMessage, Phase, SessionId, StreamingMessage, Subject, UserContext,
};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Caller-supplied data attached to a session at creation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<Subject>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_context: Option<UserContext>,
}

/// One walkthrough conversation.
///
/// Owned by [`super::ConversationStateManager`]; callers only ever see
/// clones.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationState {
    pub session_id: SessionId,
    pub user_id: String,
    pub subject_id: String,
    pub metadata: SessionMetadata,
    pub messages: Vec<StreamingMessage>,
    pub current_phase: Phase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emotional_state: Option<EmotionalState>,
    pub started_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub is_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,

    #[serde(skip)]
    pub(super) last_touched: Instant,
    #[serde(skip)]
    pub(super) ended_instant: Option<Instant>,
}

impl ConversationState {
    pub(super) fn new(
        session_id: SessionId,
        user_id: String,
        subject_id: String,
        metadata: SessionMetadata,
    ) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            user_id,
            subject_id,
            metadata,
            messages: Vec::new(),
            current_phase: Phase::Introduction,
            emotional_state: None,
            started_at: now,
            last_activity_at: now,
            is_active: true,
            ended_at: None,
            last_touched: Instant::now(),
            ended_instant: None,
        }
    }

    pub(super) fn touch(&mut self) {
        self.last_touched = Instant::now();
        self.last_activity_at = Utc::now();
    }

    pub(super) fn append(&mut self, message: NewMessage) -> StreamingMessage {
        let message = StreamingMessage::from_new(message, self.messages.len() as u64, Utc::now());
        self.messages.push(message.clone());
        self.touch();
        message
    }

    pub(super) fn end(&mut self) {
        if self.is_active {
            self.is_active = false;
            self.ended_at = Some(Utc::now());
            self.ended_instant = Some(Instant::now());
        }
    }

    /// Time since the last read or write.
    pub fn idle_for(&self) -> std::time::Duration {
        self.last_touched.elapsed()
    }

    /// Last `n` messages as speaker-labelled lines, oldest first.
    pub fn recent_context(&self, n: usize) -> String {
        let start = self.messages.len().saturating_sub(n);
        self.messages[start..]
            .iter()
            .map(|m| format!("{}: {}", m.role.label(), m.content))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn subject_title(&self) -> Option<&str> {
        self.metadata.subject.as_ref().map(|s| s.title.as_str())
    }
}
