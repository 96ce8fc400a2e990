//! # Conversational Pipeline Boundary
//!
//! The conversational pipeline (speech in, generated speech/text/animation
//! out) is an external collaborator with a defined call contract. This
//! module owns that contract plus the cancellation plumbing around each
//! invocation; it never interprets pipeline output.
//!
//! ## Key Components:
//! - **ConversationPipeline**: one cancellable run per conversation turn
//! - **AgentEngine**: dialogue memory hydration and interrupt notification
//! - **ConversationTurn / TurnInput**: the resolved input handed to a run
//! - **spawn_conversation** (boundary.rs): fire-and-forget task launch
//! - **EchoPipeline / MemoryAgent** (echo.rs): built-in loopback engines
//!   used for development and tests

pub mod boundary;
pub mod echo;

pub use boundary::spawn_conversation;

use crate::broadcast::Broadcaster;
use crate::history::ChatMessage;
use async_trait::async_trait;

/// Resolved user input for one conversation turn.
#[derive(Debug, Clone)]
pub enum TurnInput {
    /// Typed text, or empty when the assistant speaks proactively
    Text(String),

    /// Accumulated microphone samples drained at mic-audio-end
    Audio(Vec<f32>),
}

/// Everything one pipeline invocation needs.
#[derive(Debug, Clone)]
pub struct ConversationTurn {
    pub input: TurnInput,
    pub conf_uid: String,
    pub history_uid: String,
    pub images: Option<Vec<String>>,
}

/// One cancellable conversation turn.
///
/// Implementations must tolerate being aborted at any suspension point:
/// the session requests cancellation with `JoinHandle::abort`, which is
/// advisory and can race completion. Emissions go through the supplied
/// [`Broadcaster`], so observers see every intermediate output.
#[async_trait]
pub trait ConversationPipeline: Send + Sync {
    async fn run(&self, turn: ConversationTurn, emitter: Broadcaster) -> anyhow::Result<()>;
}

/// Dialogue-engine state the session layer has to keep in step with the
/// stored history: memory hydration on history switches and interrupt
/// notification so internal state reflects what the user actually heard.
pub trait AgentEngine: Send + Sync {
    /// Replace the engine's working memory with the given history.
    fn set_memory_from_history(&self, conf_uid: &str, history_uid: &str, messages: &[ChatMessage]);

    /// The user interrupted mid-response; `heard_response` is the part of
    /// the assistant output that was actually delivered.
    fn handle_interrupt(&self, heard_response: &str) -> anyhow::Result<()>;
}
