//! # Per-Session Mutable State
//!
//! Owned exclusively by the session's dispatcher task, which is the single
//! consumer of the event queue, so none of this needs interior locking.

use tokio::task::JoinHandle;
use tracing::debug;

/// Outcome of an advisory cancellation request against the active task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// No conversation task was running
    NoTask,
    /// The task had already completed before the request
    AlreadyFinished,
    /// Abort was requested; the task stops at its next suspension point
    Requested,
}

/// Mutable state of one conversational session.
pub struct SessionState {
    /// Identifier of the active conversation history, allocated on the
    /// first meaningful event or an explicit create-new-history request
    pub history_uid: Option<String>,

    /// At most one in-flight pipeline invocation. Exclusively owned here;
    /// not cleared on completion (a finished handle is detected lazily).
    active_task: Option<JoinHandle<()>>,

    /// Streamed microphone samples, accumulated between triggers
    audio_buffer: Vec<f32>,
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            history_uid: None,
            active_task: None,
            audio_buffer: Vec::new(),
        }
    }

    pub fn append_audio(&mut self, samples: &[f32]) {
        self.audio_buffer.extend_from_slice(samples);
    }

    /// Take the accumulated samples, leaving the buffer empty.
    pub fn drain_audio(&mut self) -> Vec<f32> {
        std::mem::take(&mut self.audio_buffer)
    }

    pub fn audio_len(&self) -> usize {
        self.audio_buffer.len()
    }

    pub fn has_active_task(&self) -> bool {
        self.active_task.is_some()
    }

    /// Request cancellation of the active task, advisory only: the task
    /// may already be finished, or may only notice the abort at its next
    /// suspension point. Never awaits.
    pub fn request_cancel(&mut self) -> CancelOutcome {
        match &self.active_task {
            None => CancelOutcome::NoTask,
            Some(task) if task.is_finished() => CancelOutcome::AlreadyFinished,
            Some(task) => {
                task.abort();
                CancelOutcome::Requested
            }
        }
    }

    /// Install a new pipeline invocation as the active task.
    ///
    /// Any previous task gets an abort request but is NOT awaited, so the
    /// old and new invocation can overlap briefly while the abort takes
    /// effect. The new task is authoritative for subsequent sends; a late
    /// send from the superseded task is harmless (see Broadcaster). This
    /// matches the deliberate fire-and-forget replacement the system was
    /// designed with; do not serialize it away.
    pub fn supersede_task(&mut self, task: JoinHandle<()>) {
        if let Some(previous) = self.active_task.replace(task) {
            if !previous.is_finished() {
                debug!("Superseding an unfinished conversation task");
                previous.abort();
            }
        }
    }

    /// Teardown path: abort whatever is still running.
    pub fn abort_active(&mut self) {
        if let Some(task) = self.active_task.take() {
            task.abort();
        }
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_audio_accumulation_and_drain() {
        let mut session = SessionState::new();
        session.append_audio(&[0.1, 0.2]);
        session.append_audio(&[0.3]);
        assert_eq!(session.audio_len(), 3);

        let drained = session.drain_audio();
        assert_eq!(drained, vec![0.1, 0.2, 0.3]);
        assert_eq!(session.audio_len(), 0);
    }

    #[test]
    fn test_cancel_with_no_task_is_a_noop() {
        let mut session = SessionState::new();
        assert_eq!(session.request_cancel(), CancelOutcome::NoTask);
    }

    #[tokio::test]
    async fn test_cancel_detects_finished_task() {
        let mut session = SessionState::new();
        let task = tokio::spawn(async {});
        // Let the trivial task run to completion.
        tokio::time::sleep(Duration::from_millis(20)).await;

        session.supersede_task(task);
        assert_eq!(session.request_cancel(), CancelOutcome::AlreadyFinished);
    }

    #[tokio::test]
    async fn test_supersede_aborts_previous_without_awaiting() {
        let mut session = SessionState::new();

        let first = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
        session.supersede_task(first);
        assert_eq!(session.request_cancel(), CancelOutcome::Requested);

        let second = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
        session.supersede_task(second);

        // Exactly one active handle remains, and it is the new one.
        assert!(session.has_active_task());
        assert_eq!(session.request_cancel(), CancelOutcome::Requested);

        session.abort_active();
        assert!(!session.has_active_task());
    }
}
