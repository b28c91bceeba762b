use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Chat message class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChatKind {
    #[default]
    Text,
    FileReference,
}

/// Full chat message as appended to the transcript store.
///
/// Unlike the audit trail, which keeps only a digest, the transcript
/// keeps the message text so the consultation record can be
/// reconstructed later.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRecord {
    pub message_id: String,
    pub room_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub body: String,
    pub kind: ChatKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    pub timestamp: DateTime<Utc>,
}
