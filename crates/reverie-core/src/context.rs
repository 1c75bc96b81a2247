//! Read-only context handed to a walkthrough by the surrounding application.

use serde::{Deserialize, Serialize};

/// What kind of journal item the walkthrough explores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectKind {
    #[default]
    Text,
    Photo,
    Audio,
}

/// The memory or topic being explored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub kind: SubjectKind,

    /// Journal text or a description of the media.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl Subject {
    pub fn text(id: impl Into<String>, title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            kind: SubjectKind::Text,
            content: Some(content.into()),
        }
    }
}

/// Optional mental-health profile supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<u32>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub primary_concerns: Vec<String>,

    /// Free-form support description, e.g. "weekly therapy".
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub support_levels: Vec<String>,
}

impl UserContext {
    pub fn is_empty(&self) -> bool {
        self.age.is_none() && self.primary_concerns.is_empty() && self.support_levels.is_empty()
    }
}
