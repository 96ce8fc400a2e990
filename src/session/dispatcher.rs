//! # Session Event Dispatcher
//!
//! The single consumer of a session's event queue. Interprets each event's
//! declared type, invokes the matching operation against the session state
//! and the injected service context, and routes every resulting emission
//! through the broadcast fan-out, never a direct socket write.
//!
//! ## Failure Policy:
//! A collaborator failure (history store, config switch, pipeline spawn)
//! is caught here, logged, and the loop moves to the next queued event;
//! the failing operation's intended emission is simply not sent. Nothing
//! in this loop is fatal to the session, and nothing in the session is
//! fatal to the process.

use crate::assets;
use crate::broadcast::Broadcaster;
use crate::context::ServiceContext;
use crate::events::{ClientEvent, ServerEvent};
use crate::pipeline::{spawn_conversation, ConversationTurn, TurnInput};
use crate::session::queue::EventReceiver;
use crate::session::state::{CancelOutcome, SessionState};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Consume the session queue until it closes, then tear down.
///
/// Exactly one of these tasks exists per session; it is the sole owner of
/// the [`SessionState`].
pub async fn run_dispatcher(
    mut rx: EventReceiver,
    services: Arc<ServiceContext>,
    broadcaster: Broadcaster,
) {
    let mut session = SessionState::new();

    while let Some(event) = rx.dequeue().await {
        debug!(event = event.tag(), "Dispatching session event");
        if let Err(err) = dispatch_event(event, &mut session, &services, &broadcaster).await {
            error!(error = %err, "Error processing session event");
        }
    }

    // Queue closed: the connection is gone. Abort whatever conversation
    // turn is still in flight.
    session.abort_active();
    debug!("Session dispatcher stopped");
}

/// Handle one event. Every arm of the event enumeration is explicit,
/// including the unknown-tag arm.
async fn dispatch_event(
    event: ClientEvent,
    session: &mut SessionState,
    services: &Arc<ServiceContext>,
    broadcaster: &Broadcaster,
) -> anyhow::Result<()> {
    let conf_uid = services.conf_uid();

    // Any event arriving before a history exists allocates one, except the
    // two operations that set the history themselves.
    if session.history_uid.is_none()
        && !matches!(
            event,
            ClientEvent::CreateNewHistory | ClientEvent::FetchAndSetHistory { .. }
        )
    {
        ensure_history(session, services, &conf_uid)?;
    }

    match event {
        ClientEvent::FetchHistoryList => {
            let histories = services.history.list_histories(&conf_uid)?;
            broadcaster.deliver(&ServerEvent::HistoryList { histories });
        }

        ClientEvent::FetchAndSetHistory { history_uid } => {
            let messages = services.history.get_history(&conf_uid, &history_uid)?;
            session.history_uid = Some(history_uid.clone());
            services
                .agent
                .set_memory_from_history(&conf_uid, &history_uid, &messages);

            // Clients never see system-role markers; original order is
            // preserved for the rest.
            let messages = messages.into_iter().filter(|m| !m.is_system()).collect();
            broadcaster.deliver(&ServerEvent::HistoryData { messages });
        }

        ClientEvent::CreateNewHistory => {
            let history_uid = services.history.create_history(&conf_uid)?;
            session.history_uid = Some(history_uid.clone());
            services
                .agent
                .set_memory_from_history(&conf_uid, &history_uid, &[]);
            broadcaster.deliver(&ServerEvent::NewHistoryCreated { history_uid });
        }

        ClientEvent::DeleteHistory { history_uid } => {
            let success = services.history.delete_history(&conf_uid, &history_uid)?;
            broadcaster.deliver(&ServerEvent::HistoryDeleted {
                success,
                history_uid: history_uid.clone(),
            });

            if session.history_uid.as_deref() == Some(history_uid.as_str()) {
                session.history_uid = None;
            }
        }

        ClientEvent::InterruptSignal { text } => {
            handle_interrupt(session, services, &conf_uid, &text)?;
        }

        ClientEvent::MicAudioData { audio } => {
            // Accumulate only; the turn starts at mic-audio-end.
            session.append_audio(&audio);
        }

        ClientEvent::MicAudioEnd { images } => {
            let input = TurnInput::Audio(session.drain_audio());
            start_conversation(session, services, broadcaster, &conf_uid, input, images, false);
        }

        ClientEvent::TextInput { text, images } => {
            session.drain_audio();
            start_conversation(
                session,
                services,
                broadcaster,
                &conf_uid,
                TurnInput::Text(text),
                images,
                false,
            );
        }

        ClientEvent::AiSpeakSignal => {
            session.drain_audio();
            start_conversation(
                session,
                services,
                broadcaster,
                &conf_uid,
                TurnInput::Text(String::new()),
                None,
                true,
            );
        }

        ClientEvent::FetchConfigs => {
            let configs = assets::scan_config_alts(&services.assets.config_alts_dir);
            broadcaster.deliver(&ServerEvent::ConfigFiles { configs });
        }

        ClientEvent::SwitchConfig { file } => {
            // Delegated entirely to the service context.
            services.handle_config_switch(broadcaster, &file)?;
        }

        ClientEvent::FetchBackgrounds => {
            let files = assets::scan_backgrounds(&services.assets.backgrounds_dir);
            broadcaster.deliver(&ServerEvent::BackgroundFiles { files });
        }

        ClientEvent::Unknown => {
            info!("Unknown event type received, dropping");
        }
    }

    Ok(())
}

/// Allocate a fresh history for the session and hydrate agent memory.
fn ensure_history(
    session: &mut SessionState,
    services: &Arc<ServiceContext>,
    conf_uid: &str,
) -> anyhow::Result<()> {
    let history_uid = services.history.create_history(conf_uid)?;
    services
        .agent
        .set_memory_from_history(conf_uid, &history_uid, &[]);
    session.history_uid = Some(history_uid);
    Ok(())
}

/// Interrupt the in-flight conversation turn.
///
/// Cancellation is advisory: racing a task that just completed is expected
/// and logged, never treated as an error. The stored history is rewritten
/// so the latest assistant message matches what the user actually heard,
/// and a system-role marker records the interruption.
fn handle_interrupt(
    session: &mut SessionState,
    services: &Arc<ServiceContext>,
    conf_uid: &str,
    heard_response: &str,
) -> anyhow::Result<()> {
    match session.request_cancel() {
        CancelOutcome::NoTask => {
            warn!("Conversation task was not cancelled: no conversation is running");
        }
        CancelOutcome::AlreadyFinished => {
            warn!("Conversation task was not cancelled: it had already finished");
        }
        CancelOutcome::Requested => {
            info!("Conversation task was interrupted");
        }
    }

    if let Err(err) = services.agent.handle_interrupt(heard_response) {
        error!(error = %err, "Agent engine failed to handle interrupt");
    }

    let Some(history_uid) = session.history_uid.clone() else {
        anyhow::bail!("interrupt received before any history was set");
    };

    if !services
        .history
        .modify_latest_message(conf_uid, &history_uid, "ai", heard_response)?
    {
        warn!("No assistant message found to overwrite with the heard response");
    } else {
        info!(heard_response, "Stored partial assistant message");
    }

    services
        .history
        .store_message(conf_uid, &history_uid, "system", "[Interrupted by user]")?;
    Ok(())
}

/// Start a new conversation turn, superseding any active one.
///
/// The previous task gets an abort request but is not awaited; the brief
/// overlap while the abort lands is an accepted race (the new task is
/// authoritative for subsequent sends).
fn start_conversation(
    session: &mut SessionState,
    services: &Arc<ServiceContext>,
    broadcaster: &Broadcaster,
    conf_uid: &str,
    input: TurnInput,
    images: Option<Vec<String>>,
    proactive: bool,
) {
    let Some(history_uid) = session.history_uid.clone() else {
        warn!("Conversation trigger dropped: no session history is set");
        return;
    };

    broadcaster.deliver(&ServerEvent::full_text("Thinking..."));
    if proactive {
        broadcaster.deliver(&ServerEvent::full_text("AI wants to speak something..."));
    }

    let turn = ConversationTurn {
        input,
        conf_uid: conf_uid.to_string(),
        history_uid,
        images,
    };

    let task = spawn_conversation(services.pipeline.clone(), turn, broadcaster.clone());
    session.supersede_task(task);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::Outbound;
    use crate::config::AppConfig;
    use crate::history::{ChatMessage, HistoryEntry, HistoryStore};
    use crate::pipeline::echo::MemoryAgent;
    use crate::pipeline::ConversationPipeline;
    use crate::registry::ConnectionRegistry;
    use crate::session::queue::EventQueue;
    use actix::prelude::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    // ---- test doubles -------------------------------------------------

    /// In-memory history store for dispatcher tests.
    #[derive(Default)]
    struct MemHistoryStore {
        histories: Mutex<HashMap<String, Vec<ChatMessage>>>,
        counter: AtomicUsize,
    }

    impl MemHistoryStore {
        fn seed(&self, history_uid: &str, messages: Vec<ChatMessage>) {
            self.histories
                .lock()
                .unwrap()
                .insert(history_uid.to_string(), messages);
        }

        fn messages(&self, history_uid: &str) -> Vec<ChatMessage> {
            self.histories
                .lock()
                .unwrap()
                .get(history_uid)
                .cloned()
                .unwrap_or_default()
        }
    }

    impl HistoryStore for MemHistoryStore {
        fn create_history(&self, _conf_uid: &str) -> anyhow::Result<String> {
            let uid = format!("history-{}", self.counter.fetch_add(1, Ordering::Relaxed));
            self.histories
                .lock()
                .unwrap()
                .insert(uid.clone(), Vec::new());
            Ok(uid)
        }

        fn store_message(
            &self,
            _conf_uid: &str,
            history_uid: &str,
            role: &str,
            content: &str,
        ) -> anyhow::Result<()> {
            self.histories
                .lock()
                .unwrap()
                .entry(history_uid.to_string())
                .or_default()
                .push(ChatMessage::new(role, content));
            Ok(())
        }

        fn modify_latest_message(
            &self,
            _conf_uid: &str,
            history_uid: &str,
            role: &str,
            new_content: &str,
        ) -> anyhow::Result<bool> {
            let mut histories = self.histories.lock().unwrap();
            let Some(messages) = histories.get_mut(history_uid) else {
                return Ok(false);
            };
            match messages.iter_mut().rev().find(|m| m.role == role) {
                Some(message) => {
                    message.content = new_content.to_string();
                    Ok(true)
                }
                None => Ok(false),
            }
        }

        fn get_history(
            &self,
            _conf_uid: &str,
            history_uid: &str,
        ) -> anyhow::Result<Vec<ChatMessage>> {
            Ok(self.messages(history_uid))
        }

        fn delete_history(&self, _conf_uid: &str, history_uid: &str) -> anyhow::Result<bool> {
            Ok(self.histories.lock().unwrap().remove(history_uid).is_some())
        }

        fn list_histories(&self, _conf_uid: &str) -> anyhow::Result<Vec<HistoryEntry>> {
            Ok(self
                .histories
                .lock()
                .unwrap()
                .keys()
                .map(|uid| HistoryEntry {
                    uid: uid.clone(),
                    latest_message: None,
                    timestamp: chrono::Utc::now(),
                })
                .collect())
        }
    }

    /// Pipeline that records each spawned turn, synchronously on entry.
    #[derive(Default)]
    struct RecordingPipeline {
        turns: Mutex<Vec<ConversationTurn>>,
    }

    #[async_trait]
    impl ConversationPipeline for RecordingPipeline {
        async fn run(&self, turn: ConversationTurn, _emitter: Broadcaster) -> anyhow::Result<()> {
            self.turns.lock().unwrap().push(turn);
            Ok(())
        }
    }

    /// Pipeline that parks until cancelled, counting starts and finishes.
    #[derive(Default)]
    struct SlowPipeline {
        started: AtomicUsize,
        finished: AtomicUsize,
    }

    #[async_trait]
    impl ConversationPipeline for SlowPipeline {
        async fn run(&self, _turn: ConversationTurn, _emitter: Broadcaster) -> anyhow::Result<()> {
            self.started.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(400)).await;
            self.finished.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Actor that captures everything the fan-out delivers to the primary.
    struct Recorder {
        received: Arc<Mutex<Vec<String>>>,
    }

    impl Actor for Recorder {
        type Context = Context<Self>;
    }

    impl Handler<Outbound> for Recorder {
        type Result = ();
        fn handle(&mut self, msg: Outbound, _ctx: &mut Self::Context) {
            self.received.lock().unwrap().push(msg.0);
        }
    }

    struct Fixture {
        services: Arc<ServiceContext>,
        store: Arc<MemHistoryStore>,
        broadcaster: Broadcaster,
        frames: Arc<Mutex<Vec<String>>>,
    }

    fn fixture_with_pipeline(pipeline: Arc<dyn ConversationPipeline>) -> Fixture {
        let store = Arc::new(MemHistoryStore::default());
        let services = Arc::new(ServiceContext::new(
            &AppConfig::default(),
            store.clone(),
            Arc::new(MemoryAgent::new()),
            pipeline,
        ));

        let frames = Arc::new(Mutex::new(Vec::new()));
        let primary = Recorder {
            received: frames.clone(),
        }
        .start();
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = Broadcaster::new(
            registry.next_connection_id(),
            primary.recipient(),
            registry.clone(),
        );

        Fixture {
            services,
            store,
            broadcaster,
            frames,
        }
    }

    fn fixture() -> Fixture {
        fixture_with_pipeline(Arc::new(RecordingPipeline::default()))
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(30)).await;
    }

    fn frames_of_type(frames: &Arc<Mutex<Vec<String>>>, tag: &str) -> Vec<serde_json::Value> {
        frames
            .lock()
            .unwrap()
            .iter()
            .filter_map(|raw| serde_json::from_str::<serde_json::Value>(raw).ok())
            .filter(|v| v["type"] == tag)
            .collect()
    }

    // ---- tests --------------------------------------------------------

    #[actix_web::test]
    async fn test_fetch_and_set_history_filters_system_messages() {
        let fx = fixture();
        fx.store.seed(
            "h1",
            vec![
                ChatMessage::new("system", "[Interrupted by user]"),
                ChatMessage::new("human", "first"),
                ChatMessage::new("ai", "second"),
            ],
        );

        let mut session = SessionState::new();
        dispatch_event(
            ClientEvent::FetchAndSetHistory {
                history_uid: "h1".to_string(),
            },
            &mut session,
            &fx.services,
            &fx.broadcaster,
        )
        .await
        .unwrap();
        settle().await;

        assert_eq!(session.history_uid.as_deref(), Some("h1"));
        let data = frames_of_type(&fx.frames, "history-data");
        assert_eq!(data.len(), 1);
        let messages = data[0]["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["content"], "first");
        assert_eq!(messages[1]["content"], "second");
    }

    #[actix_web::test]
    async fn test_create_then_fetch_yields_empty_history() {
        let fx = fixture();
        let mut session = SessionState::new();

        dispatch_event(
            ClientEvent::CreateNewHistory,
            &mut session,
            &fx.services,
            &fx.broadcaster,
        )
        .await
        .unwrap();
        settle().await;

        let created = frames_of_type(&fx.frames, "new-history-created");
        let uid = created[0]["history_uid"].as_str().unwrap().to_string();
        assert_eq!(session.history_uid.as_deref(), Some(uid.as_str()));

        dispatch_event(
            ClientEvent::FetchAndSetHistory {
                history_uid: uid.clone(),
            },
            &mut session,
            &fx.services,
            &fx.broadcaster,
        )
        .await
        .unwrap();
        settle().await;

        let data = frames_of_type(&fx.frames, "history-data");
        assert!(data[0]["messages"].as_array().unwrap().is_empty());
    }

    #[actix_web::test]
    async fn test_delete_history_clears_active_uid_only() {
        let fx = fixture();
        fx.store.seed("active", vec![]);
        fx.store.seed("other", vec![]);

        let mut session = SessionState::new();
        session.history_uid = Some("active".to_string());

        dispatch_event(
            ClientEvent::DeleteHistory {
                history_uid: "other".to_string(),
            },
            &mut session,
            &fx.services,
            &fx.broadcaster,
        )
        .await
        .unwrap();
        assert_eq!(session.history_uid.as_deref(), Some("active"));

        dispatch_event(
            ClientEvent::DeleteHistory {
                history_uid: "active".to_string(),
            },
            &mut session,
            &fx.services,
            &fx.broadcaster,
        )
        .await
        .unwrap();
        assert!(session.history_uid.is_none());
        settle().await;

        let deleted = frames_of_type(&fx.frames, "history-deleted");
        assert_eq!(deleted.len(), 2);
        assert_eq!(deleted[0]["success"], true);
    }

    #[actix_web::test]
    async fn test_interrupt_without_active_task_never_raises() {
        let fx = fixture();
        let mut session = SessionState::new();

        dispatch_event(
            ClientEvent::InterruptSignal {
                text: "partial resp".to_string(),
            },
            &mut session,
            &fx.services,
            &fx.broadcaster,
        )
        .await
        .unwrap();

        // A history was allocated and the interruption marker appended,
        // even though there was nothing to cancel or overwrite.
        let uid = session.history_uid.clone().unwrap();
        let messages = fx.store.messages(&uid);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, "system");
        assert_eq!(messages[0].content, "[Interrupted by user]");
    }

    #[actix_web::test]
    async fn test_interrupt_overwrites_latest_assistant_message() {
        let fx = fixture();
        fx.store.seed(
            "h1",
            vec![
                ChatMessage::new("human", "hi"),
                ChatMessage::new("ai", "a long answer that got cut"),
            ],
        );
        let mut session = SessionState::new();
        session.history_uid = Some("h1".to_string());

        dispatch_event(
            ClientEvent::InterruptSignal {
                text: "a long".to_string(),
            },
            &mut session,
            &fx.services,
            &fx.broadcaster,
        )
        .await
        .unwrap();

        let messages = fx.store.messages("h1");
        assert_eq!(messages[1].content, "a long");
        assert_eq!(messages.last().unwrap().role, "system");
    }

    #[actix_web::test]
    async fn test_second_trigger_supersedes_first() {
        let slow = Arc::new(SlowPipeline::default());
        let fx = fixture_with_pipeline(slow.clone());
        let mut session = SessionState::new();

        dispatch_event(
            ClientEvent::TextInput {
                text: "first".to_string(),
                images: None,
            },
            &mut session,
            &fx.services,
            &fx.broadcaster,
        )
        .await
        .unwrap();

        // Give the first task time to reach its suspension point.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(slow.started.load(Ordering::SeqCst), 1);

        dispatch_event(
            ClientEvent::TextInput {
                text: "second".to_string(),
                images: None,
            },
            &mut session,
            &fx.services,
            &fx.broadcaster,
        )
        .await
        .unwrap();

        // Exactly one active task remains after the supersede.
        assert!(session.has_active_task());

        // The aborted first run never finishes; only the second does.
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(slow.started.load(Ordering::SeqCst), 2);
        assert_eq!(slow.finished.load(Ordering::SeqCst), 1);
    }

    #[actix_web::test]
    async fn test_trigger_drains_audio_accumulator() {
        let recording = Arc::new(RecordingPipeline::default());
        let fx = fixture_with_pipeline(recording.clone());
        let mut session = SessionState::new();

        for chunk in [vec![1.0, 2.0], vec![3.0]] {
            dispatch_event(
                ClientEvent::MicAudioData { audio: chunk },
                &mut session,
                &fx.services,
                &fx.broadcaster,
            )
            .await
            .unwrap();
        }
        assert_eq!(session.audio_len(), 3);

        dispatch_event(
            ClientEvent::MicAudioEnd { images: None },
            &mut session,
            &fx.services,
            &fx.broadcaster,
        )
        .await
        .unwrap();
        assert_eq!(session.audio_len(), 0);

        tokio::time::sleep(Duration::from_millis(50)).await;
        let turns = recording.turns.lock().unwrap();
        assert!(matches!(&turns[0].input, TurnInput::Audio(samples) if *samples == vec![1.0, 2.0, 3.0]));

        // The "Thinking..." notice went out before the turn started.
        let notices = frames_of_type(&fx.frames, "full-text");
        assert_eq!(notices[0]["text"], "Thinking...");
    }

    #[actix_web::test]
    async fn test_ai_speak_signal_emits_extra_notice() {
        let fx = fixture();
        let mut session = SessionState::new();

        dispatch_event(
            ClientEvent::AiSpeakSignal,
            &mut session,
            &fx.services,
            &fx.broadcaster,
        )
        .await
        .unwrap();
        settle().await;

        let notices = frames_of_type(&fx.frames, "full-text");
        assert_eq!(notices.len(), 2);
        assert_eq!(notices[1]["text"], "AI wants to speak something...");
    }

    #[actix_web::test]
    async fn test_dispatcher_loop_processes_in_fifo_order() {
        let recording = Arc::new(RecordingPipeline::default());
        let fx = fixture_with_pipeline(recording.clone());

        let (tx, rx) = EventQueue::new(100);
        let dispatcher = tokio::spawn(run_dispatcher(
            rx,
            fx.services.clone(),
            fx.broadcaster.clone(),
        ));

        for i in 0..20u32 {
            tx.enqueue(ClientEvent::MicAudioData {
                audio: vec![i as f32],
            });
        }
        tx.enqueue(ClientEvent::MicAudioEnd { images: None });

        // Let the turn start before tearing the queue down, so teardown
        // cannot abort the recording run.
        tokio::time::sleep(Duration::from_millis(100)).await;
        drop(tx);
        dispatcher.await.unwrap();

        let turns = recording.turns.lock().unwrap();
        let expected: Vec<f32> = (0..20).map(|i| i as f32).collect();
        assert!(matches!(&turns[0].input, TurnInput::Audio(samples) if *samples == expected));
    }

    #[actix_web::test]
    async fn test_text_input_carries_attached_images_into_the_turn() {
        let recording = Arc::new(RecordingPipeline::default());
        let fx = fixture_with_pipeline(recording.clone());
        let mut session = SessionState::new();

        dispatch_event(
            ClientEvent::TextInput {
                text: "describe these".into(),
                images: Some(vec!["frame-1.png".into(), "frame-2.png".into()]),
            },
            &mut session,
            &fx.services,
            &fx.broadcaster,
        )
        .await
        .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        let turns = recording.turns.lock().unwrap();
        assert_eq!(turns.len(), 1);
        assert!(matches!(&turns[0].input, TurnInput::Text(text) if text == "describe these"));
        assert_eq!(
            turns[0].images,
            Some(vec!["frame-1.png".to_string(), "frame-2.png".to_string()])
        );
    }

    #[actix_web::test]
    async fn test_collaborator_error_does_not_stop_the_loop() {
        let fx = fixture();

        let (tx, rx) = EventQueue::new(100);
        let dispatcher = tokio::spawn(run_dispatcher(
            rx,
            fx.services.clone(),
            fx.broadcaster.clone(),
        ));

        // switch-config against a file that does not exist fails inside
        // the dispatcher; the next event must still be processed.
        tx.enqueue(ClientEvent::SwitchConfig {
            file: "no-such-file.toml".to_string(),
        });
        tx.enqueue(ClientEvent::FetchConfigs);

        tokio::time::sleep(Duration::from_millis(100)).await;
        drop(tx);
        dispatcher.await.unwrap();

        assert_eq!(frames_of_type(&fx.frames, "config-files").len(), 1);
    }

    #[actix_web::test]
    async fn test_unknown_event_is_dropped_silently() {
        let fx = fixture();
        let mut session = SessionState::new();

        dispatch_event(
            ClientEvent::Unknown,
            &mut session,
            &fx.services,
            &fx.broadcaster,
        )
        .await
        .unwrap();
        settle().await;

        // No emission of any kind for an unrecognized tag.
        assert!(fx.frames.lock().unwrap().is_empty());
    }
}
