//! # Loopback Pipeline
//!
//! A minimal in-process pipeline used when no external engine stack is
//! configured: it acknowledges the user's input, persists the turn through
//! the history store, and emits the reply as `full-text`. It exists so the
//! whole session layer (queue, dispatcher, cancellation, fan-out) runs end
//! to end in development and in tests without speech or model services.

use crate::broadcast::Broadcaster;
use crate::events::ServerEvent;
use crate::history::{ChatMessage, HistoryStore};
use crate::pipeline::{AgentEngine, ConversationPipeline, ConversationTurn, TurnInput};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Echo-style conversation pipeline backed by the shared history store.
pub struct EchoPipeline {
    history: Arc<dyn HistoryStore>,
    agent: Arc<MemoryAgent>,
}

impl EchoPipeline {
    pub fn new(history: Arc<dyn HistoryStore>, agent: Arc<MemoryAgent>) -> Self {
        Self { history, agent }
    }

    fn resolve_text(input: &TurnInput) -> String {
        match input {
            TurnInput::Text(text) => text.clone(),
            // No speech recognition engine here; stand in for the
            // transcript with a sample-count placeholder.
            TurnInput::Audio(samples) => format!("(voice message, {} samples)", samples.len()),
        }
    }
}

#[async_trait]
impl ConversationPipeline for EchoPipeline {
    async fn run(&self, turn: ConversationTurn, emitter: Broadcaster) -> anyhow::Result<()> {
        let user_text = Self::resolve_text(&turn.input);

        // No vision stack here; attached images are acknowledged in the
        // log so their delivery is visible end to end.
        if let Some(images) = &turn.images {
            debug!(history_uid = %turn.history_uid, images = images.len(), "Turn carries attached images");
        }

        let reply = if user_text.is_empty() {
            // ai-speak-signal path: assistant speaks proactively
            "Is there anything I can help you with?".to_string()
        } else {
            format!("You said: {}", user_text)
        };

        if !user_text.is_empty() {
            self.history
                .store_message(&turn.conf_uid, &turn.history_uid, "human", &user_text)?;
            self.agent.remember(ChatMessage::new("human", &user_text));
        }

        // Suspension point: a cancellation requested before this yield
        // lands here instead of mid-send.
        tokio::task::yield_now().await;

        emitter.deliver(&ServerEvent::full_text(&reply));
        self.history
            .store_message(&turn.conf_uid, &turn.history_uid, "ai", &reply)?;
        self.agent.remember(ChatMessage::new("ai", &reply));

        debug!(history_uid = %turn.history_uid, "Loopback turn completed");
        Ok(())
    }
}

/// In-memory dialogue memory, the loopback counterpart of an external
/// agent engine.
#[derive(Default)]
pub struct MemoryAgent {
    memory: Mutex<Vec<ChatMessage>>,
}

impl MemoryAgent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn remember(&self, message: ChatMessage) {
        self.memory.lock().unwrap().push(message);
    }

    pub fn memory_len(&self) -> usize {
        self.memory.lock().unwrap().len()
    }
}

impl AgentEngine for MemoryAgent {
    fn set_memory_from_history(&self, conf_uid: &str, history_uid: &str, messages: &[ChatMessage]) {
        let mut memory = self.memory.lock().unwrap();
        memory.clear();
        memory.extend(messages.iter().cloned());
        info!(
            conf_uid,
            history_uid,
            messages = memory.len(),
            "Hydrated agent memory from history"
        );
    }

    fn handle_interrupt(&self, heard_response: &str) -> anyhow::Result<()> {
        let mut memory = self.memory.lock().unwrap();
        // Rewrite the latest assistant memory entry to match what the user
        // actually heard before cutting the response off.
        match memory.iter_mut().rev().find(|m| m.role == "ai") {
            Some(message) => message.content = heard_response.to_string(),
            None => warn!("Interrupt received with no assistant message in memory"),
        }
        Ok(())
    }
}
