//! Keyword cues for scenario classification.
//!
//! Cues are checked in a fixed order and the first match wins, so an
//! input that mentions both panic and a memory is treated as anxiety.

use lazy_static::lazy_static;
use regex::Regex;

use super::Scenario;

lazy_static! {
    /// Anxiety and panic cues
    pub static ref ANXIETY_CUES: Regex = Regex::new(
        r"(?i)(panic|anxious|anxiety|can'?t breathe|heart (is )?racing|scared|afraid|terrified|freaking out|nervous|worried|shaking)"
    ).unwrap();

    /// Memory cues
    pub static ref MEMORY_CUES: Regex = Regex::new(
        r"(?i)(remember|memory|memories|that day|back then|when i was|recall|childhood|used to)"
    ).unwrap();

    /// Pause and slow-down cues
    pub static ref PAUSE_CUES: Regex = Regex::new(
        r"(?i)(pause|slow down|too fast|need a (moment|minute|break)|give me a (second|minute)|hold on|wait)"
    ).unwrap();

    /// Grounding cues
    pub static ref GROUNDING_CUES: Regex = Regex::new(
        r"(?i)(overwhelm|grounding|ground me|dizzy|spinning|dissociat|numb|not real|too much)"
    ).unwrap();

    /// Self-critical cues
    pub static ref SELF_COMPASSION_CUES: Regex = Regex::new(
        r"(?i)(my fault|hate myself|not good enough|i'?m (so )?stupid|ashamed|blame myself|i failed|worthless)"
    ).unwrap();

    /// Start and introduction cues
    pub static ref INTRO_CUES: Regex = Regex::new(
        r"(?i)(\bstart\b|\bbegin|let'?s go|\bready\b|introduc|\bhello\b|\bhi\b)"
    ).unwrap();

    /// End and finish cues
    pub static ref CONCLUSION_CUES: Regex = Regex::new(
        r"(?i)(\bend\b|finish|\bdone\b|\bstop\b|goodbye|wrap up|that'?s enough|\bbye\b)"
    ).unwrap();
}

/// Classify free text into a fallback scenario.
///
/// Total: every input, including the empty string, maps to a scenario.
pub fn categorize_scenario(input: &str) -> Scenario {
    let ordered: [(&Regex, Scenario); 7] = [
        (&ANXIETY_CUES, Scenario::Anxiety),
        (&MEMORY_CUES, Scenario::MemoryExploration),
        (&PAUSE_CUES, Scenario::Pause),
        (&GROUNDING_CUES, Scenario::Grounding),
        (&SELF_COMPASSION_CUES, Scenario::SelfCompassion),
        (&INTRO_CUES, Scenario::Introduction),
        (&CONCLUSION_CUES, Scenario::Conclusion),
    ];

    ordered
        .iter()
        .find(|(pattern, _)| pattern.is_match(input))
        .map(|(_, scenario)| *scenario)
        .unwrap_or(Scenario::Calming)
}
