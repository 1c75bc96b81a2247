//! Conversation phases and caller-supplied emotional state.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::CoreError;

/// Coarse stage of a walkthrough, used to vary prompt guidance.
///
/// Phases advance forward under normal flow, but the surrounding
/// application owns the decision and may set any phase explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Introduction,
    Exploration,
    Reflection,
    Conclusion,
}

impl Phase {
    /// All phases in their natural order.
    pub const ALL: [Phase; 4] = [
        Phase::Introduction,
        Phase::Exploration,
        Phase::Reflection,
        Phase::Conclusion,
    ];

    /// The phase that normally follows this one. Saturates at `Conclusion`.
    pub fn next(self) -> Phase {
        match self {
            Phase::Introduction => Phase::Exploration,
            Phase::Exploration => Phase::Reflection,
            Phase::Reflection | Phase::Conclusion => Phase::Conclusion,
        }
    }

    /// Prompt guidance for the AI while in this phase.
    pub fn guidance(self) -> &'static str {
        match self {
            Phase::Introduction => {
                "Gently welcome the user and introduce the memory. Invite them to settle in \
                 and notice what comes up, without asking for anything yet."
            }
            Phase::Exploration => {
                "Ask one open, curious question at a time about the details of the memory: \
                 the setting, the people, the sensations. Follow the user's lead."
            }
            Phase::Reflection => {
                "Help the user notice meaning and feelings connected to the memory. \
                 Reflect back what you hear and validate their experience."
            }
            Phase::Conclusion => {
                "Begin closing the walkthrough. Summarise gently, acknowledge the user's effort, \
                 and invite a grounding breath before they return to their day."
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Introduction => "introduction",
            Phase::Exploration => "exploration",
            Phase::Reflection => "reflection",
            Phase::Conclusion => "conclusion",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "introduction" => Ok(Phase::Introduction),
            "exploration" => Ok(Phase::Exploration),
            "reflection" => Ok(Phase::Reflection),
            "conclusion" => Ok(Phase::Conclusion),
            other => Err(CoreError::UnknownPhase(other.to_string())),
        }
    }
}

/// Classifier tag the caller may attach to a session between turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmotionalState {
    Calm,
    Anxious,
    Sad,
    Overwhelmed,
    Reflective,
    Hopeful,
}

impl EmotionalState {
    pub fn as_str(self) -> &'static str {
        match self {
            EmotionalState::Calm => "calm",
            EmotionalState::Anxious => "anxious",
            EmotionalState::Sad => "sad",
            EmotionalState::Overwhelmed => "overwhelmed",
            EmotionalState::Reflective => "reflective",
            EmotionalState::Hopeful => "hopeful",
        }
    }
}

impl fmt::Display for EmotionalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EmotionalState {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "calm" => Ok(EmotionalState::Calm),
            "anxious" => Ok(EmotionalState::Anxious),
            "sad" => Ok(EmotionalState::Sad),
            "overwhelmed" => Ok(EmotionalState::Overwhelmed),
            "reflective" => Ok(EmotionalState::Reflective),
            "hopeful" => Ok(EmotionalState::Hopeful),
            other => Err(CoreError::UnknownEmotionalState(other.to_string())),
        }
    }
}
