//! Typed events emitted while streaming one AI turn.
//!
//! A turn is always `start`, zero or more `content`, then `end`. A turn
//! against an invalid session is a single `error` event instead.

use serde::{Deserialize, Serialize};

use crate::message::{MessageId, ResponseSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    Start,
    Content,
    End,
    Error,
}

/// Completion details carried by an `end` chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkMetadata {
    /// Length of the full message in characters.
    pub length: usize,
    pub word_count: usize,
    pub duration_ms: u64,
    pub source: ResponseSource,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamChunk {
    #[serde(rename = "type")]
    pub kind: ChunkKind,
    pub message_id: MessageId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ChunkMetadata>,
}

impl StreamChunk {
    pub fn start(message_id: MessageId) -> Self {
        Self {
            kind: ChunkKind::Start,
            message_id,
            content: None,
            metadata: None,
        }
    }

    pub fn content(message_id: MessageId, text: impl Into<String>) -> Self {
        Self {
            kind: ChunkKind::Content,
            message_id,
            content: Some(text.into()),
            metadata: None,
        }
    }

    pub fn end(message_id: MessageId, metadata: ChunkMetadata) -> Self {
        Self {
            kind: ChunkKind::End,
            message_id,
            content: None,
            metadata: Some(metadata),
        }
    }

    pub fn error(message_id: MessageId, message: impl Into<String>) -> Self {
        Self {
            kind: ChunkKind::Error,
            message_id,
            content: Some(message.into()),
            metadata: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, ChunkKind::End | ChunkKind::Error)
    }

    /// Frame this chunk as one Server-Sent Event: `data: <json>\n\n`.
    pub fn to_sse_frame(&self) -> Result<String, serde_json::Error> {
        Ok(format!("data: {}\n\n", serde_json::to_string(self)?))
    }
}
