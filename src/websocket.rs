//! # Session WebSocket Handlers
//!
//! Two connection roles terminate here:
//!
//! 1. **Primary client** (`/client-ws`): owns a session. The actor decodes
//!    inbound JSON into session events and enqueues them; a dedicated
//!    dispatcher task consumes the queue one event at a time. Everything
//!    the session emits flows back through the broadcast fan-out, which
//!    delivers to this actor's mailbox first.
//! 2. **Observer** (`/broadcast-ws`): receive-only mirror of all session
//!    emissions. Inbound frames from observers are ignored.
//!
//! ## Teardown:
//! When a primary actor stops it drops its queue sender. The dispatcher
//! sees the closed queue, aborts any in-flight conversation turn, and
//! exits. Observers outlive sessions; they are pruned lazily by the
//! fan-out when delivery to them fails.

use crate::broadcast::{Broadcaster, Outbound};
use crate::context::ServiceContext;
use crate::events::{ClientEvent, ServerEvent};
use crate::registry::{ConnectionId, ConnectionRegistry};
use crate::session::queue::EventSender;
use crate::session::{run_dispatcher, EventQueue};
use crate::state::AppState;

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// How often the server pings idle connections.
pub(crate) const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// How long without any client traffic before the connection is dropped.
pub(crate) const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

/// The three events every new primary client receives, in order: a
/// connection acknowledgement, the active character announcement, and the
/// signal to start capturing microphone audio.
fn greeting_events(services: &ServiceContext) -> [ServerEvent; 3] {
    [
        ServerEvent::full_text("Connection established"),
        services.model_and_conf_event(),
        ServerEvent::control("start-mic"),
    ]
}

/// Send the greeting sequence through the fan-out, so observers mirror it
/// the same way they mirror every later session emission.
fn send_greeting(broadcaster: &Broadcaster, services: &ServiceContext) {
    for event in greeting_events(services) {
        broadcaster.deliver(&event);
    }
}

/// WebSocket actor for a primary client session.
pub struct ClientSocket {
    id: ConnectionId,
    registry: Arc<ConnectionRegistry>,
    services: Arc<ServiceContext>,
    state: AppState,

    /// Producer side of the session queue. Taken on stop so the dispatcher
    /// observes the close deterministically.
    tx: Option<EventSender>,

    last_heartbeat: Instant,
}

impl ClientSocket {
    pub fn new(state: AppState) -> Self {
        let id = state.registry.next_connection_id();
        Self {
            id,
            registry: state.registry.clone(),
            services: state.services.clone(),
            state,
            tx: None,
            last_heartbeat: Instant::now(),
        }
    }

    fn start_heartbeat(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                warn!(connection_id = act.id, "WebSocket heartbeat timeout, closing connection");
                ctx.stop();
            } else {
                ctx.ping(b"");
            }
        });
    }

    /// Decode one inbound text frame and hand it to the session queue.
    /// Malformed JSON is logged and dropped; it never reaches the queue.
    fn handle_text(&mut self, text: &str) {
        let event = match serde_json::from_str::<ClientEvent>(text) {
            Ok(event) => event,
            Err(err) => {
                warn!(connection_id = self.id, error = %err, "Dropping malformed client frame");
                return;
            }
        };

        debug!(connection_id = self.id, event = event.tag(), "Received client event");

        if let Some(tx) = &self.tx {
            if !tx.enqueue(event) {
                warn!(connection_id = self.id, "Session queue is closed, dropping event");
            }
        }
    }
}

impl Actor for ClientSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!(connection_id = self.id, "Client session started");

        let recipient = ctx.address().recipient::<Outbound>();
        self.registry.register_primary(self.id, recipient.clone());
        self.state.increment_active_sessions();

        // One queue, one dispatcher, for the lifetime of this connection.
        let warn_depth = self.state.get_config().performance.queue_warn_depth;
        let (tx, rx) = EventQueue::new(warn_depth);
        self.tx = Some(tx);

        let broadcaster = Broadcaster::new(self.id, recipient, self.registry.clone());
        send_greeting(&broadcaster, &self.services);
        tokio::spawn(run_dispatcher(rx, self.services.clone(), broadcaster));

        self.start_heartbeat(ctx);
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        info!(connection_id = self.id, "Client session stopped");
        self.registry.unregister_primary(self.id);
        self.state.decrement_active_sessions();

        // Closing the queue is the dispatcher's teardown signal.
        self.tx.take();
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for ClientSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => {
                self.last_heartbeat = Instant::now();
                self.handle_text(&text);
            }
            Ok(ws::Message::Binary(_)) => {
                warn!(connection_id = self.id, "Unexpected binary frame on session socket");
            }
            Ok(ws::Message::Ping(data)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&data);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!(connection_id = self.id, "WebSocket closed: {:?}", reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!(connection_id = self.id, "Received unexpected continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                warn!(connection_id = self.id, error = %err, "WebSocket protocol error");
                ctx.stop();
            }
        }
    }
}

impl Handler<Outbound> for ClientSocket {
    type Result = ();

    fn handle(&mut self, msg: Outbound, ctx: &mut Self::Context) {
        ctx.text(msg.0);
    }
}

/// Receive-only WebSocket actor mirroring session emissions.
pub struct ObserverSocket {
    id: ConnectionId,
    registry: Arc<ConnectionRegistry>,
    last_heartbeat: Instant,
}

impl ObserverSocket {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        let id = registry.next_connection_id();
        Self {
            id,
            registry,
            last_heartbeat: Instant::now(),
        }
    }
}

impl Actor for ObserverSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!(connection_id = self.id, "Observer connected");
        self.registry
            .register_observer(self.id, ctx.address().recipient());

        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                warn!(connection_id = act.id, "Observer heartbeat timeout, closing connection");
                ctx.stop();
            } else {
                ctx.ping(b"");
            }
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        info!(connection_id = self.id, "Observer disconnected");
        self.registry.unregister_observer(self.id);
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for ObserverSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            // Observers are one-way; anything they send is noted and dropped.
            Ok(ws::Message::Text(_)) | Ok(ws::Message::Binary(_)) => {
                debug!(connection_id = self.id, "Ignoring inbound frame from observer");
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Ping(data)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&data);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!(connection_id = self.id, "Observer closed: {:?}", reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) | Ok(ws::Message::Nop) => {}
            Err(err) => {
                warn!(connection_id = self.id, error = %err, "Observer protocol error");
                ctx.stop();
            }
        }
    }
}

impl Handler<Outbound> for ObserverSocket {
    type Result = ();

    fn handle(&mut self, msg: Outbound, ctx: &mut Self::Context) {
        ctx.text(msg.0);
    }
}

/// Primary client endpoint: upgrades to a WebSocket and starts a session.
pub async fn client_ws(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    info!(
        "New client session request from: {:?}",
        req.connection_info().peer_addr()
    );
    ws::start(ClientSocket::new(state.get_ref().clone()), &req, stream)
}

/// Observer endpoint. Refused with 503 once the configured observer
/// capacity is reached.
pub async fn observer_ws(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    let max_observers = state.get_config().performance.max_observers;
    if state.registry.observer_count() >= max_observers {
        warn!(max_observers, "Observer capacity reached, refusing connection");
        return Ok(HttpResponse::ServiceUnavailable()
            .json(serde_json::json!({ "error": "observer capacity reached" })));
    }

    info!(
        "New observer request from: {:?}",
        req.connection_info().peer_addr()
    );
    ws::start(ObserverSocket::new(state.registry.clone()), &req, stream)
}
