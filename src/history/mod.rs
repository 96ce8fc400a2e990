//! # Conversation History Storage
//!
//! Defines the history store contract consumed by the event dispatcher and
//! the data shapes shared with clients. The core never owns persistence
//! details; it only calls the operations defined here.
//!
//! ## Key Components:
//! - **ChatMessage**: One stored message (user, assistant, or system role)
//! - **HistoryEntry**: Summary row for the history-list view
//! - **HistoryStore**: The create/append/modify/read/delete/list contract
//! - **FileHistoryStore**: JSON-file-backed implementation (file.rs)
//!
//! ## Keying:
//! Every history record is keyed by (conf_uid, history_uid). The conf_uid
//! identifies the character configuration the conversation belongs to, the
//! history_uid is a UUID allocated on creation.

pub mod file;

pub use file::FileHistoryStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single stored conversation message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Message role: "human", "ai", or "system"
    pub role: String,

    /// Message text content
    pub content: String,

    /// When the message was stored
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    /// System-role markers (interruption notes etc.) are stored but never
    /// shown to clients in history-data responses.
    pub fn is_system(&self) -> bool {
        self.role == "system"
    }
}

/// Summary of one history record, as listed in `history-list` responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Unique history identifier
    pub uid: String,

    /// Content of the most recent non-system message, if any
    pub latest_message: Option<String>,

    /// Timestamp of the most recent message, or creation time for an
    /// empty history
    pub timestamp: DateTime<Utc>,
}

/// Storage contract for conversation histories.
///
/// ## Error Handling:
/// Operations that can legitimately miss (modify on an empty history,
/// delete of an unknown uid) report the outcome as a `bool` rather than an
/// error; real I/O failures surface as `anyhow::Error` and are caught at
/// the dispatch boundary.
pub trait HistoryStore: Send + Sync {
    /// Allocate a new, empty history and return its uid.
    fn create_history(&self, conf_uid: &str) -> anyhow::Result<String>;

    /// Append a message to an existing history.
    fn store_message(
        &self,
        conf_uid: &str,
        history_uid: &str,
        role: &str,
        content: &str,
    ) -> anyhow::Result<()>;

    /// Overwrite the content of the latest message with the given role.
    /// Returns false when no such message exists to overwrite.
    fn modify_latest_message(
        &self,
        conf_uid: &str,
        history_uid: &str,
        role: &str,
        new_content: &str,
    ) -> anyhow::Result<bool>;

    /// Read all messages of a history in stored order. An unknown uid
    /// reads as an empty list.
    fn get_history(&self, conf_uid: &str, history_uid: &str) -> anyhow::Result<Vec<ChatMessage>>;

    /// Delete a history. Returns false when the uid did not exist.
    fn delete_history(&self, conf_uid: &str, history_uid: &str) -> anyhow::Result<bool>;

    /// List all histories for a configuration, most recent first.
    fn list_histories(&self, conf_uid: &str) -> anyhow::Result<Vec<HistoryEntry>>;
}
