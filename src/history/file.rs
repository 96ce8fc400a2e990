//! # File-Backed History Store
//!
//! Persists each conversation history as one JSON file:
//! `{history_dir}/{conf_uid}/{history_uid}.json`, containing the ordered
//! message array. Files are small (one conversation) and rewritten whole
//! on every mutation, which keeps the store crash-simple; there is no
//! partial-write recovery beyond "last write wins".

use crate::history::{ChatMessage, HistoryEntry, HistoryStore};
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

/// History store backed by per-conversation JSON files.
pub struct FileHistoryStore {
    /// Root directory; one subdirectory per conf_uid
    base_dir: PathBuf,
}

impl FileHistoryStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn conf_dir(&self, conf_uid: &str) -> PathBuf {
        self.base_dir.join(conf_uid)
    }

    fn history_path(&self, conf_uid: &str, history_uid: &str) -> PathBuf {
        self.conf_dir(conf_uid).join(format!("{}.json", history_uid))
    }

    fn read_messages(path: &Path) -> Result<Vec<ChatMessage>> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read history file {}", path.display()))?;
        let messages = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse history file {}", path.display()))?;
        Ok(messages)
    }

    fn write_messages(path: &Path, messages: &[ChatMessage]) -> Result<()> {
        let json = serde_json::to_string_pretty(messages)?;
        fs::write(path, json)
            .with_context(|| format!("failed to write history file {}", path.display()))?;
        Ok(())
    }
}

impl HistoryStore for FileHistoryStore {
    fn create_history(&self, conf_uid: &str) -> Result<String> {
        let history_uid = Uuid::new_v4().to_string();
        let dir = self.conf_dir(conf_uid);
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create history directory {}", dir.display()))?;

        let path = self.history_path(conf_uid, &history_uid);
        Self::write_messages(&path, &[])?;

        debug!(conf_uid, history_uid = %history_uid, "Created new history");
        Ok(history_uid)
    }

    fn store_message(
        &self,
        conf_uid: &str,
        history_uid: &str,
        role: &str,
        content: &str,
    ) -> Result<()> {
        let path = self.history_path(conf_uid, history_uid);
        if !path.exists() {
            warn!(conf_uid, history_uid, "Storing message into a history that was never created");
            fs::create_dir_all(self.conf_dir(conf_uid))?;
        }

        let mut messages = Self::read_messages(&path)?;
        messages.push(ChatMessage::new(role, content));
        Self::write_messages(&path, &messages)
    }

    fn modify_latest_message(
        &self,
        conf_uid: &str,
        history_uid: &str,
        role: &str,
        new_content: &str,
    ) -> Result<bool> {
        let path = self.history_path(conf_uid, history_uid);
        let mut messages = Self::read_messages(&path)?;

        // Walk backwards to the most recent message with the wanted role.
        let Some(message) = messages.iter_mut().rev().find(|m| m.role == role) else {
            return Ok(false);
        };
        message.content = new_content.to_string();

        Self::write_messages(&path, &messages)?;
        Ok(true)
    }

    fn get_history(&self, conf_uid: &str, history_uid: &str) -> Result<Vec<ChatMessage>> {
        Self::read_messages(&self.history_path(conf_uid, history_uid))
    }

    fn delete_history(&self, conf_uid: &str, history_uid: &str) -> Result<bool> {
        let path = self.history_path(conf_uid, history_uid);
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path)
            .with_context(|| format!("failed to delete history file {}", path.display()))?;
        debug!(conf_uid, history_uid, "Deleted history");
        Ok(true)
    }

    fn list_histories(&self, conf_uid: &str) -> Result<Vec<HistoryEntry>> {
        let dir = self.conf_dir(conf_uid);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        for dir_entry in fs::read_dir(&dir)? {
            let path = dir_entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(uid) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };

            // A file that fails to parse is skipped, not fatal to the listing.
            let messages = match Self::read_messages(&path) {
                Ok(messages) => messages,
                Err(err) => {
                    warn!(file = %path.display(), error = %err, "Skipping unreadable history file");
                    continue;
                }
            };

            let latest = messages.iter().rev().find(|m| !m.is_system());
            let timestamp = messages
                .last()
                .map(|m| m.timestamp)
                .unwrap_or_else(chrono::Utc::now);

            entries.push(HistoryEntry {
                uid: uid.to_string(),
                latest_message: latest.map(|m| m.content.clone()),
                timestamp,
            });
        }

        // Most recent conversations first
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(entries)
    }
}
