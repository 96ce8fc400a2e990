//! Launches pipeline invocations as independently scheduled, cancellable
//! tasks. Pure delegation: the boundary resolves nothing and interprets
//! nothing, it only wires the turn, the engines, and the fan-out-bound
//! emitter together and owns the error logging for a failed run.

use crate::broadcast::Broadcaster;
use crate::pipeline::{ConversationPipeline, ConversationTurn};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Spawn one conversation turn.
///
/// The returned handle is stored as the session's active task; aborting it
/// is the advisory cancellation path. The emitter clone moved into the
/// task keeps working even after the session has superseded this run, so a
/// late send can never crash; it is at worst delivered alongside the
/// successor's output.
pub fn spawn_conversation(
    pipeline: Arc<dyn ConversationPipeline>,
    turn: ConversationTurn,
    emitter: Broadcaster,
) -> JoinHandle<()> {
    let history_uid = turn.history_uid.clone();
    debug!(history_uid = %history_uid, "Launching conversation turn");

    tokio::spawn(async move {
        if let Err(err) = pipeline.run(turn, emitter).await {
            // A failed turn is local to its session; the dispatch loop has
            // already moved on.
            error!(history_uid = %history_uid, error = %err, "Conversation pipeline failed");
        }
    })
}
