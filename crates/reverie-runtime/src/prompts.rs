//! Prompts for walkthrough guides.
//!
//! Prompts are assembled in a fixed order so the stable prefix stays
//! identical across turns:
//! 1. Base system prompt (shared by every session)
//! 2. Subject and user profile (fixed per session)
//! 3. Phase guidance, tone, recent history and this turn's input

use reverie_core::{EmotionalState, Phase, Subject, SubjectKind, UserContext};

use crate::providers::ChatMessage;

/// Base system prompt shared by every walkthrough.
///
/// The guide reflects and invites; it never diagnoses or advises
/// treatment.
pub const BASE_SYSTEM_PROMPT: &str = r#"
You are a gentle, grounded guide helping someone revisit a memory from their journal.

## How you speak
1. Short paragraphs, two to four sentences
2. One open question at a time, never a list of questions
3. Mirror the person's own words before adding anything
4. Invite, never instruct: "you might", "if it feels right"
5. Plain, warm language without clinical terms

## Boundaries
- You are not a therapist and do not diagnose, label or advise on treatment
- If the person signals distress, slow down and offer a grounding pause
- Never push for detail the person has not offered
- If the person mentions self-harm, gently encourage contacting a crisis line or someone they trust

## Critical Reminder
The person leads. Your job is to make space, not to fill it.
"#;

/// Opening request used when a session starts.
pub const INTRODUCTION_REQUEST: &str =
    "Open the walkthrough. Welcome the person, name the memory they chose, and invite them to settle in before exploring it.";

fn subject_section(subject: &Subject) -> String {
    let kind = match subject.kind {
        SubjectKind::Text => "journal entry",
        SubjectKind::Photo => "photo",
        SubjectKind::Audio => "voice recording",
    };
    let mut section = format!("## Memory\nA {} titled \"{}\".", kind, subject.title);
    if let Some(content) = subject.content.as_deref().filter(|c| !c.trim().is_empty()) {
        section.push_str("\n\n");
        section.push_str(content.trim());
    }
    section
}

fn profile_section(context: &UserContext) -> Option<String> {
    if context.is_empty() {
        return None;
    }

    let mut lines = vec!["## About the person".to_string()];
    if let Some(age) = context.age {
        lines.push(format!("- Age: {}", age));
    }
    if !context.primary_concerns.is_empty() {
        lines.push(format!(
            "- Primary concerns: {}",
            context.primary_concerns.join(", ")
        ));
    }
    if !context.support_levels.is_empty() {
        lines.push(format!("- Current support: {}", context.support_levels.join(", ")));
    }
    lines.push("Let this shape your pacing and tone. Do not mention it directly.".to_string());
    Some(lines.join("\n"))
}

/// System prompt for one session.
pub fn system_prompt(subject: Option<&Subject>, user_context: Option<&UserContext>) -> String {
    let mut sections = vec![BASE_SYSTEM_PROMPT.trim().to_string()];
    if let Some(subject) = subject {
        sections.push(subject_section(subject));
    }
    if let Some(profile) = user_context.and_then(profile_section) {
        sections.push(profile);
    }
    sections.join("\n\n")
}

/// Messages for the opening turn.
pub fn introduction_messages(
    subject: Option<&Subject>,
    user_context: Option<&UserContext>,
) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(system_prompt(subject, user_context)),
        ChatMessage::user(format!(
            "{}\n\n## Phase: {}\n{}",
            INTRODUCTION_REQUEST,
            Phase::Introduction,
            Phase::Introduction.guidance()
        )),
    ]
}

/// Everything that varies per turn.
#[derive(Debug, Clone, Copy)]
pub struct TurnPrompt<'a> {
    pub subject: Option<&'a Subject>,
    pub user_context: Option<&'a UserContext>,
    pub phase: Phase,
    pub emotional_state: Option<EmotionalState>,

    /// Speaker-labelled recent history, oldest first
    pub recent_context: &'a str,

    pub user_input: Option<&'a str>,
}

impl TurnPrompt<'_> {
    pub fn to_messages(&self) -> Vec<ChatMessage> {
        let mut turn = vec![format!("## Phase: {}\n{}", self.phase, self.phase.guidance())];

        if let Some(state) = self.emotional_state {
            turn.push(format!(
                "## Tone\nThe person has said they feel {}. Match your pace to that.",
                state
            ));
        }

        if !self.recent_context.trim().is_empty() {
            turn.push(format!("## Conversation so far\n{}", self.recent_context));
        }

        match self.user_input.map(str::trim).filter(|s| !s.is_empty()) {
            Some(input) => turn.push(format!(
                "## This turn\nThe person says:\n\"{}\"\n\nRespond as the guide.",
                input
            )),
            None => turn.push(
                "## This turn\nThe person has not said anything new. Continue gently in this phase."
                    .to_string(),
            ),
        }

        vec![
            ChatMessage::system(system_prompt(self.subject, self.user_context)),
            ChatMessage::user(turn.join("\n\n")),
        ]
    }
}
