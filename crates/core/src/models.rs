use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Unprocessed,
    Processed,
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentStatus::Unprocessed => f.write_str("unprocessed"),
            DocumentStatus::Processed => f.write_str("processed"),
        }
    }
}

/// Registry entry for one uploaded document.
///
/// `index_path` is only set while `status` is [`DocumentStatus::Processed`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentRecord {
    pub id: String,
    pub description: String,
    pub status: DocumentStatus,
    pub source_path: PathBuf,
    pub index_path: Option<PathBuf>,
    pub checksum: String,
    pub chunk_count: Option<usize>,
    pub registered_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl DocumentRecord {
    pub fn is_processed(&self) -> bool {
        self.status == DocumentStatus::Processed && self.index_path.is_some()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    /// Position of the chunk in the document, used as the tie breaker.
    pub position: usize,
    pub text: String,
    pub score: f32,
}
