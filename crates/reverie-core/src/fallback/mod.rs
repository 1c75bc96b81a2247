//! Static fallback content: the last line of defense when every AI path fails.
//!
//! Nothing in this module performs I/O, allocates fallibly or panics on
//! any input. Classification always yields a scenario and every scenario
//! always has content.

mod library;
mod patterns;

pub use patterns::categorize_scenario;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::message::ResponseSource;

/// Scenario tag keying the static content table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scenario {
    Anxiety,
    Grounding,
    Introduction,
    Conclusion,
    Pause,
    SelfCompassion,
    MemoryExploration,
    /// Default when nothing else matches
    Calming,
}

impl Scenario {
    pub const ALL: [Scenario; 8] = [
        Scenario::Anxiety,
        Scenario::Grounding,
        Scenario::Introduction,
        Scenario::Conclusion,
        Scenario::Pause,
        Scenario::SelfCompassion,
        Scenario::MemoryExploration,
        Scenario::Calming,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Scenario::Anxiety => "anxiety",
            Scenario::Grounding => "grounding",
            Scenario::Introduction => "introduction",
            Scenario::Conclusion => "conclusion",
            Scenario::Pause => "pause",
            Scenario::SelfCompassion => "self_compassion",
            Scenario::MemoryExploration => "memory_exploration",
            Scenario::Calming => "calming",
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A static response drawn from the fallback table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FallbackResponse {
    pub text: String,
    pub duration_ms: u64,
    pub source: ResponseSource,
    pub scenario_tag: Scenario,
}

impl FallbackResponse {
    /// First entry for a scenario.
    pub fn for_scenario(scenario: Scenario) -> Self {
        Self::select(scenario, 0)
    }

    /// Pick an entry for a scenario; `seed` rotates through the variants.
    pub fn select(scenario: Scenario, seed: usize) -> Self {
        let entries = library::entries(scenario);
        let entry = &entries[seed % entries.len()];
        Self {
            text: entry.text.to_string(),
            duration_ms: entry.duration_ms,
            source: ResponseSource::Static,
            scenario_tag: scenario,
        }
    }

    /// Classify `input` and pick matching content.
    pub fn for_input(input: &str, seed: usize) -> Self {
        Self::select(categorize_scenario(input), seed)
    }

    /// All texts authored for a scenario.
    pub fn texts(scenario: Scenario) -> Vec<&'static str> {
        library::entries(scenario).iter().map(|e| e.text).collect()
    }
}
