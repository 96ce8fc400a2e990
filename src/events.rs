//! # Session Event Model
//!
//! Typed inbound and outbound events for the primary session channel.
//! Every inbound text frame on `/client-ws` must decode to a [`ClientEvent`];
//! frames that fail to decode are dropped with a logged diagnostic before
//! they reach the session queue, and no error event is emitted back.
//!
//! ## Wire Format:
//! JSON objects tagged by a `"type"` field, e.g.:
//! - **Client → Server**: `{"type": "text-input", "text": "hello"}`
//! - **Server → Client**: `{"type": "full-text", "text": "Thinking..."}`
//!
//! The inbound enum is closed: a recognized-but-unhandled tag is impossible,
//! and an unrecognized tag lands in the explicit `Unknown` arm rather than
//! an implicit fallthrough.

use crate::history::{ChatMessage, HistoryEntry};
use serde::{Deserialize, Serialize};

/// Inbound events driving the session dispatcher.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Request the list of stored histories for the active configuration
    #[serde(rename = "fetch-history-list")]
    FetchHistoryList,

    /// Switch the session to an existing history and return its messages
    #[serde(rename = "fetch-and-set-history")]
    FetchAndSetHistory {
        history_uid: String,
    },

    /// Allocate a fresh history and make it active
    #[serde(rename = "create-new-history")]
    CreateNewHistory,

    /// Delete a stored history
    #[serde(rename = "delete-history")]
    DeleteHistory {
        history_uid: String,
    },

    /// Interrupt the in-flight conversation; `text` carries the part of the
    /// assistant response the user actually heard before interrupting
    #[serde(rename = "interrupt-signal")]
    InterruptSignal {
        #[serde(default)]
        text: String,
    },

    /// A chunk of streamed microphone samples (accumulate-only)
    #[serde(rename = "mic-audio-data")]
    MicAudioData {
        audio: Vec<f32>,
    },

    /// End of microphone input; triggers a conversation turn on the
    /// accumulated samples
    #[serde(rename = "mic-audio-end")]
    MicAudioEnd {
        #[serde(default)]
        images: Option<Vec<String>>,
    },

    /// Typed user input; triggers a conversation turn
    #[serde(rename = "text-input")]
    TextInput {
        text: String,
        #[serde(default)]
        images: Option<Vec<String>>,
    },

    /// Ask the assistant to speak proactively (empty user input)
    #[serde(rename = "ai-speak-signal")]
    AiSpeakSignal,

    /// Request the list of available configuration alternates
    #[serde(rename = "fetch-configs")]
    FetchConfigs,

    /// Switch to a named configuration alternate
    #[serde(rename = "switch-config")]
    SwitchConfig {
        file: String,
    },

    /// Request the list of background assets
    #[serde(rename = "fetch-backgrounds")]
    FetchBackgrounds,

    /// Any tag outside the fixed set above. Logged and dropped by the
    /// dispatcher; never surfaced to the client.
    #[serde(other)]
    Unknown,
}

impl ClientEvent {
    /// Short tag name for log lines.
    pub fn tag(&self) -> &'static str {
        match self {
            ClientEvent::FetchHistoryList => "fetch-history-list",
            ClientEvent::FetchAndSetHistory { .. } => "fetch-and-set-history",
            ClientEvent::CreateNewHistory => "create-new-history",
            ClientEvent::DeleteHistory { .. } => "delete-history",
            ClientEvent::InterruptSignal { .. } => "interrupt-signal",
            ClientEvent::MicAudioData { .. } => "mic-audio-data",
            ClientEvent::MicAudioEnd { .. } => "mic-audio-end",
            ClientEvent::TextInput { .. } => "text-input",
            ClientEvent::AiSpeakSignal => "ai-speak-signal",
            ClientEvent::FetchConfigs => "fetch-configs",
            ClientEvent::SwitchConfig { .. } => "switch-config",
            ClientEvent::FetchBackgrounds => "fetch-backgrounds",
            ClientEvent::Unknown => "unknown",
        }
    }
}

/// Outbound events emitted through the broadcast fan-out.
///
/// Pipeline-originated events (audio payloads, expression hints, ...) are
/// opaque to this core and travel as pre-serialized JSON via
/// [`crate::broadcast::Broadcaster::deliver_raw`].
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "history-list")]
    HistoryList {
        histories: Vec<HistoryEntry>,
    },

    #[serde(rename = "history-data")]
    HistoryData {
        messages: Vec<ChatMessage>,
    },

    #[serde(rename = "new-history-created")]
    NewHistoryCreated {
        history_uid: String,
    },

    #[serde(rename = "history-deleted")]
    HistoryDeleted {
        success: bool,
        history_uid: String,
    },

    /// A complete line of display text (status notices and final responses)
    #[serde(rename = "full-text")]
    FullText {
        text: String,
    },

    #[serde(rename = "config-files")]
    ConfigFiles {
        configs: Vec<String>,
    },

    #[serde(rename = "background-files")]
    BackgroundFiles {
        files: Vec<String>,
    },

    /// Control channel instructions, e.g. "start-mic"
    #[serde(rename = "control")]
    Control {
        text: String,
    },

    /// Active character identity and avatar model descriptor, sent on
    /// connect and after a config switch
    #[serde(rename = "set-model-and-conf")]
    SetModelAndConf {
        model_info: serde_json::Value,
        conf_name: String,
        conf_uid: String,
    },
}

impl ServerEvent {
    pub fn control(text: impl Into<String>) -> Self {
        ServerEvent::Control { text: text.into() }
    }

    pub fn full_text(text: impl Into<String>) -> Self {
        ServerEvent::FullText { text: text.into() }
    }
}
