//! In-memory store of live walkthrough sessions.
//!
//! A single lock guards the session map. No method awaits while holding
//! it, so every operation is non-blocking. Sessions expire after
//! `session_timeout` of inactivity: a read of an expired session deletes
//! it on the spot, and a background reaper sweeps the rest. Ended
//! sessions stay readable for `end_grace` before they are purged.

mod state;

pub use state::{ConversationState, SessionMetadata};

use parking_lot::Mutex;
use reverie_core::{EmotionalState, NewMessage, Phase, SessionId, StreamingMessage};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::humantime_duration;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("session not found: {0}")]
    NotFound(SessionId),

    #[error("session has ended: {0}")]
    Inactive(SessionId),
}

/// Session lifetime settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Idle time after which a session expires
    #[serde(with = "humantime_duration")]
    pub session_timeout: Duration,

    /// How long an ended session stays readable
    #[serde(with = "humantime_duration")]
    pub end_grace: Duration,

    /// Period of the background sweep
    #[serde(with = "humantime_duration")]
    pub reaper_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_timeout: Duration::from_secs(30 * 60),
            end_grace: Duration::from_secs(5 * 60),
            reaper_interval: Duration::from_secs(5 * 60),
        }
    }
}

/// Session counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMetrics {
    /// Records held, ended sessions in their grace window included
    pub total: usize,
    pub active: usize,
    /// Active sessions per phase
    pub by_phase: BTreeMap<Phase, usize>,
}

struct SessionStore {
    config: SessionConfig,
    sessions: Mutex<HashMap<SessionId, ConversationState>>,
}

impl SessionStore {
    fn is_expired(&self, state: &ConversationState, now: Instant) -> bool {
        match state.ended_instant {
            Some(ended) => now.duration_since(ended) >= self.config.end_grace,
            None => now.duration_since(state.last_touched) >= self.config.session_timeout,
        }
    }

    fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut sessions = self.sessions.lock();
        let before = sessions.len();
        sessions.retain(|_, state| !self.is_expired(state, now));
        before - sessions.len()
    }
}

/// Owns every conversation and its background reaper.
pub struct ConversationStateManager {
    store: Arc<SessionStore>,
    reaper: Mutex<Option<JoinHandle<()>>>,
}

impl ConversationStateManager {
    /// Create a manager and start its reaper on the current Tokio runtime.
    pub fn new(config: SessionConfig) -> Self {
        let manager = Self::without_reaper(config);
        let handle = spawn_reaper(Arc::downgrade(&manager.store), manager.store.config.reaper_interval);
        *manager.reaper.lock() = Some(handle);
        manager
    }

    /// Create a manager whose expired sessions are only removed by reads
    /// and explicit [`sweep`](Self::sweep) calls.
    pub fn without_reaper(config: SessionConfig) -> Self {
        Self {
            store: Arc::new(SessionStore {
                config,
                sessions: Mutex::new(HashMap::new()),
            }),
            reaper: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.store.config
    }

    pub fn create_session(
        &self,
        user_id: impl Into<String>,
        subject_id: impl Into<String>,
        metadata: SessionMetadata,
    ) -> ConversationState {
        let session_id = SessionId::generate();
        let state = ConversationState::new(
            session_id.clone(),
            user_id.into(),
            subject_id.into(),
            metadata,
        );
        self.store
            .sessions
            .lock()
            .insert(session_id.clone(), state.clone());

        tracing::info!(
            session_id = %session_id,
            user_id = %state.user_id,
            subject_id = %state.subject_id,
            "Session created"
        );
        state
    }

    /// Run `f` against a live session, touching it. Expired sessions are
    /// deleted and reported as not found.
    fn with_session<R>(
        &self,
        id: &SessionId,
        f: impl FnOnce(&mut ConversationState) -> Result<R, SessionError>,
    ) -> Result<R, SessionError> {
        let now = Instant::now();
        let mut sessions = self.store.sessions.lock();

        let expired = match sessions.get(id) {
            None => return Err(SessionError::NotFound(id.clone())),
            Some(state) => self.store.is_expired(state, now),
        };
        if expired {
            sessions.remove(id);
            tracing::debug!(session_id = %id, "Expired session removed on access");
            return Err(SessionError::NotFound(id.clone()));
        }

        match sessions.get_mut(id) {
            Some(state) => {
                state.touch();
                f(state)
            }
            None => Err(SessionError::NotFound(id.clone())),
        }
    }

    /// Like `with_session`, but refuses ended sessions.
    fn with_active_session<R>(
        &self,
        id: &SessionId,
        f: impl FnOnce(&mut ConversationState) -> R,
    ) -> Result<R, SessionError> {
        self.with_session(id, |state| {
            if state.is_active {
                Ok(f(state))
            } else {
                Err(SessionError::Inactive(id.clone()))
            }
        })
    }

    /// Snapshot of a session.
    pub fn get_session(&self, id: &SessionId) -> Result<ConversationState, SessionError> {
        self.with_session(id, |state| Ok(state.clone()))
    }

    /// Append a message and return it with its id and timestamp.
    pub fn add_message(
        &self,
        id: &SessionId,
        message: NewMessage,
    ) -> Result<StreamingMessage, SessionError> {
        let appended = self.with_active_session(id, |state| state.append(message))?;
        tracing::debug!(
            session_id = %id,
            message_id = %appended.id,
            role = ?appended.role,
            source = %appended.source(),
            "Message appended"
        );
        Ok(appended)
    }

    pub fn update_phase(&self, id: &SessionId, phase: Phase) -> Result<(), SessionError> {
        self.with_active_session(id, |state| {
            if state.current_phase != phase {
                tracing::info!(session_id = %id, from = %state.current_phase, to = %phase, "Phase updated");
            }
            state.current_phase = phase;
        })
    }

    /// Move to the next phase, saturating at the conclusion.
    pub fn advance_phase(&self, id: &SessionId) -> Result<Phase, SessionError> {
        self.with_active_session(id, |state| {
            state.current_phase = state.current_phase.next();
            state.current_phase
        })
    }

    pub fn update_emotional_state(
        &self,
        id: &SessionId,
        emotional_state: Option<EmotionalState>,
    ) -> Result<(), SessionError> {
        self.with_active_session(id, |state| state.emotional_state = emotional_state)
    }

    /// Last `n` messages as speaker-labelled lines.
    pub fn get_recent_context(&self, id: &SessionId, n: usize) -> Result<String, SessionError> {
        self.with_session(id, |state| Ok(state.recent_context(n)))
    }

    pub fn get_history(&self, id: &SessionId) -> Result<Vec<StreamingMessage>, SessionError> {
        self.with_session(id, |state| Ok(state.messages.clone()))
    }

    pub fn message_count(&self, id: &SessionId) -> Result<usize, SessionError> {
        self.with_session(id, |state| Ok(state.messages.len()))
    }

    /// Mark a session ended. It stays readable for the grace window.
    pub fn end_session(&self, id: &SessionId) -> Result<ConversationState, SessionError> {
        let state = self.with_session(id, |state| {
            state.end();
            Ok(state.clone())
        })?;
        tracing::info!(
            session_id = %id,
            messages = state.messages.len(),
            "Session ended"
        );
        Ok(state)
    }

    /// Delete every expired session now. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        self.store.sweep()
    }

    /// Pure read; does not touch or expire anything.
    pub fn metrics(&self) -> SessionMetrics {
        let now = Instant::now();
        let sessions = self.store.sessions.lock();
        let mut metrics = SessionMetrics {
            total: sessions.len(),
            ..Default::default()
        };
        for state in sessions.values() {
            if state.is_active && !self.store.is_expired(state, now) {
                metrics.active += 1;
                *metrics.by_phase.entry(state.current_phase).or_default() += 1;
            }
        }
        metrics
    }

    /// Stop the background reaper.
    pub fn shutdown(&self) {
        if let Some(handle) = self.reaper.lock().take() {
            handle.abort();
            tracing::debug!("Session reaper stopped");
        }
    }
}

impl Drop for ConversationStateManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for ConversationStateManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationStateManager")
            .field("config", &self.store.config)
            .field("metrics", &self.metrics())
            .finish()
    }
}

fn spawn_reaper(store: Weak<SessionStore>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::debug!(interval_ms = period.as_millis() as u64, "Session reaper started");

        loop {
            ticker.tick().await;
            let Some(store) = store.upgrade() else {
                break;
            };
            let removed = store.sweep();
            if removed > 0 {
                tracing::info!(removed, "Reaped expired sessions");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use reverie_core::{MessageMetadata, MessageRole, ResponseSource, Subject};

    fn manager() -> ConversationStateManager {
        ConversationStateManager::without_reaper(SessionConfig::default())
    }

    fn metadata() -> SessionMetadata {
        SessionMetadata {
            subject: Some(Subject::text("mem-1", "Grandma's garden", "Tomatoes every summer")),
            user_context: None,
        }
    }

    #[test]
    fn test_create_session_starts_in_introduction() {
        let manager = manager();
        let state = manager.create_session("user-1", "mem-1", metadata());

        assert!(state.session_id.as_str().starts_with("wt_"));
        assert_eq!(state.current_phase, Phase::Introduction);
        assert!(state.is_active);
        assert!(state.messages.is_empty());
        assert_eq!(state.subject_title(), Some("Grandma's garden"));

        let fetched = manager.get_session(&state.session_id).unwrap();
        assert_eq!(fetched.user_id, "user-1");
    }

    #[test]
    fn test_unknown_session_is_not_found() {
        let manager = manager();
        let id = SessionId::from("wt_missing");
        assert_eq!(manager.get_session(&id).unwrap_err(), SessionError::NotFound(id.clone()));
        assert!(manager.add_message(&id, NewMessage::user("hi")).is_err());
        assert!(manager.update_phase(&id, Phase::Reflection).is_err());
        assert_eq!(manager.metrics().total, 0);
    }

    #[test]
    fn test_add_message_assigns_sequence_and_id() {
        let manager = manager();
        let id = manager.create_session("user-1", "mem-1", metadata()).session_id;

        let first = manager
            .add_message(&id, NewMessage::ai("Welcome.", MessageMetadata::primary()))
            .unwrap();
        let second = manager.add_message(&id, NewMessage::user("Hello")).unwrap();

        assert_eq!(first.sequence, 0);
        assert_eq!(second.sequence, 1);
        assert_ne!(first.id, second.id);
        assert_eq!(second.role, MessageRole::User);
        assert_eq!(manager.message_count(&id).unwrap(), 2);
    }

    #[test]
    fn test_recent_context_labels_speakers() {
        let manager = manager();
        let id = manager.create_session("user-1", "mem-1", metadata()).session_id;
        manager
            .add_message(&id, NewMessage::ai("What do you see?", MessageMetadata::primary()))
            .unwrap();
        manager.add_message(&id, NewMessage::user("Tomatoes")).unwrap();
        manager
            .add_message(
                &id,
                NewMessage::ai("Stay with that.", MessageMetadata::from_source(ResponseSource::Static)),
            )
            .unwrap();

        assert_eq!(
            manager.get_recent_context(&id, 2).unwrap(),
            "User: Tomatoes\nGuide: Stay with that."
        );
        assert_eq!(manager.get_recent_context(&id, 10).unwrap().lines().count(), 3);
        assert_eq!(manager.get_recent_context(&id, 0).unwrap(), "");
    }

    #[test]
    fn test_phase_and_emotional_state_setters() {
        let manager = manager();
        let id = manager.create_session("user-1", "mem-1", metadata()).session_id;

        manager.update_phase(&id, Phase::Reflection).unwrap();
        manager.update_phase(&id, Phase::Reflection).unwrap();
        assert_eq!(manager.get_session(&id).unwrap().current_phase, Phase::Reflection);

        assert_eq!(manager.advance_phase(&id).unwrap(), Phase::Conclusion);
        assert_eq!(manager.advance_phase(&id).unwrap(), Phase::Conclusion);

        manager
            .update_emotional_state(&id, Some(EmotionalState::Anxious))
            .unwrap();
        assert_eq!(
            manager.get_session(&id).unwrap().emotional_state,
            Some(EmotionalState::Anxious)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_session_expires_on_read() {
        let manager = manager();
        let id = manager.create_session("user-1", "mem-1", metadata()).session_id;

        tokio::time::advance(Duration::from_secs(29 * 60)).await;
        assert!(manager.get_session(&id).is_ok());

        // The read above refreshed activity.
        tokio::time::advance(Duration::from_secs(29 * 60)).await;
        assert!(manager.get_session(&id).is_ok());

        tokio::time::advance(Duration::from_secs(30 * 60)).await;
        assert_eq!(manager.metrics().total, 1);
        assert_eq!(manager.metrics().active, 0);
        assert!(matches!(manager.get_session(&id), Err(SessionError::NotFound(_))));
        assert_eq!(manager.metrics().total, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reaper_removes_idle_sessions() {
        let manager = ConversationStateManager::new(SessionConfig::default());
        let idle = manager.create_session("user-1", "mem-1", metadata()).session_id;

        tokio::time::advance(Duration::from_secs(20 * 60)).await;
        let busy = manager.create_session("user-2", "mem-2", metadata()).session_id;

        tokio::time::advance(Duration::from_secs(15 * 60)).await;
        tokio::time::sleep(Duration::from_millis(1)).await;

        let metrics = manager.metrics();
        assert_eq!(metrics.total, 1);
        assert!(manager.get_session(&busy).is_ok());
        assert!(manager.get_session(&idle).is_err());
        manager.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_ended_session_readable_during_grace() {
        let manager = manager();
        let id = manager.create_session("user-1", "mem-1", metadata()).session_id;
        manager.add_message(&id, NewMessage::user("bye")).unwrap();

        let ended = manager.end_session(&id).unwrap();
        assert!(!ended.is_active);
        assert!(ended.ended_at.is_some());

        assert_eq!(
            manager.add_message(&id, NewMessage::user("again")),
            Err(SessionError::Inactive(id.clone()))
        );
        assert_eq!(manager.metrics().active, 0);

        tokio::time::advance(Duration::from_secs(4 * 60)).await;
        assert_eq!(manager.get_history(&id).unwrap().len(), 1);

        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(manager.sweep(), 1);
        assert!(manager.get_session(&id).is_err());
    }

    #[test]
    fn test_metrics_by_phase() {
        let manager = manager();
        let a = manager.create_session("u", "s", metadata()).session_id;
        let _b = manager.create_session("u", "s", metadata()).session_id;
        let c = manager.create_session("u", "s", metadata()).session_id;
        manager.update_phase(&a, Phase::Exploration).unwrap();
        manager.end_session(&c).unwrap();

        let metrics = manager.metrics();
        assert_eq!(metrics.total, 3);
        assert_eq!(metrics.active, 2);
        assert_eq!(metrics.by_phase.get(&Phase::Exploration), Some(&1));
        assert_eq!(metrics.by_phase.get(&Phase::Introduction), Some(&1));
        assert_eq!(metrics.by_phase.get(&Phase::Conclusion), None);
    }

    #[test]
    fn test_serialized_state_omits_monotonic_clock() {
        let manager = manager();
        let state = manager.create_session("user-1", "mem-1", metadata());
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["currentPhase"], "introduction");
        assert_eq!(json["isActive"], true);
        assert!(json.get("lastTouched").is_none());
    }

    proptest! {
        #[test]
        fn prop_sessions_are_isolated(turns in prop::collection::vec((any::<bool>(), "[a-z ]{1,20}"), 1..40)) {
            let manager = manager();
            let a = manager.create_session("user-a", "mem", SessionMetadata::default()).session_id;
            let b = manager.create_session("user-b", "mem", SessionMetadata::default()).session_id;

            let mut expected_a = Vec::new();
            let mut expected_b = Vec::new();
            for (to_a, text) in &turns {
                let content = text.clone();
                if *to_a {
                    manager.add_message(&a, NewMessage::user(content.clone())).unwrap();
                    expected_a.push(content);
                } else {
                    manager.add_message(&b, NewMessage::user(content.clone())).unwrap();
                    expected_b.push(content);
                }
            }

            let history_a: Vec<String> = manager.get_history(&a).unwrap().into_iter().map(|m| m.content).collect();
            let history_b: Vec<String> = manager.get_history(&b).unwrap().into_iter().map(|m| m.content).collect();
            prop_assert_eq!(history_a, expected_a);
            prop_assert_eq!(history_b, expected_b);
        }

        #[test]
        fn prop_history_is_append_only(texts in prop::collection::vec("[a-z]{1,12}", 1..30)) {
            let manager = manager();
            let id = manager.create_session("user", "mem", SessionMetadata::default()).session_id;

            let mut seen: Vec<StreamingMessage> = Vec::new();
            for text in &texts {
                manager.add_message(&id, NewMessage::user(text.clone())).unwrap();
                let history = manager.get_history(&id).unwrap();

                // Everything returned before is unchanged and still first.
                prop_assert_eq!(&history[..seen.len()], &seen[..]);
                seen = history;
            }

            for pair in seen.windows(2) {
                prop_assert!(pair[0].sequence < pair[1].sequence);
                prop_assert!(pair[0].timestamp <= pair[1].timestamp);
            }
        }
    }
}
