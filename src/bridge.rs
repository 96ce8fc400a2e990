//! # Frontend/Backend Message Bridge
//!
//! Two pools of WebSocket connections relayed to each other without
//! interpretation: frontends attach at `/proxy-ws`, a controlling backend
//! attaches at `/server-ws`. Every text frame from one pool is forwarded
//! verbatim to every member of the opposite pool. The bridge never parses
//! frame contents and shares nothing with the session machinery except
//! the connection registry.
//!
//! When a backend attaches, all currently connected frontends receive a
//! `start-mic` control frame so they begin capturing immediately.

use crate::broadcast::Outbound;
use crate::events::ServerEvent;
use crate::registry::{ConnectionId, ConnectionRegistry};
use crate::websocket::{CLIENT_TIMEOUT, HEARTBEAT_INTERVAL};

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Which side of the bridge a connection sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BridgeSide {
    Frontend,
    Backend,
}

/// Forward one text frame to every member of a pool snapshot. Delivery is
/// best-effort; members that are gone get cleaned up by their own
/// disconnect path.
fn forward_to_pool(pool: Vec<(ConnectionId, Recipient<Outbound>)>, text: &str) {
    for (_, recipient) in pool {
        recipient.do_send(Outbound(text.to_string()));
    }
}

/// A WebSocket connection on either side of the bridge. Identical framing
/// behavior on both sides; only the registration pool and the forwarding
/// target differ.
pub struct BridgeSocket {
    id: ConnectionId,
    side: BridgeSide,
    registry: Arc<ConnectionRegistry>,
    last_heartbeat: Instant,
}

impl BridgeSocket {
    fn new(side: BridgeSide, registry: Arc<ConnectionRegistry>) -> Self {
        let id = registry.next_connection_id();
        Self {
            id,
            side,
            registry,
            last_heartbeat: Instant::now(),
        }
    }

    pub fn frontend(registry: Arc<ConnectionRegistry>) -> Self {
        Self::new(BridgeSide::Frontend, registry)
    }

    pub fn backend(registry: Arc<ConnectionRegistry>) -> Self {
        Self::new(BridgeSide::Backend, registry)
    }

    fn forward(&self, text: &str) {
        let pool = match self.side {
            BridgeSide::Frontend => self.registry.snapshot_bridge_backends(),
            BridgeSide::Backend => self.registry.snapshot_bridge_frontends(),
        };
        debug!(
            connection_id = self.id,
            side = ?self.side,
            peers = pool.len(),
            "Forwarding bridge frame"
        );
        forward_to_pool(pool, text);
    }
}

impl Actor for BridgeSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        let recipient = ctx.address().recipient::<Outbound>();
        match self.side {
            BridgeSide::Frontend => {
                info!(connection_id = self.id, "Bridge frontend connected");
                self.registry.register_bridge_frontend(self.id, recipient);
            }
            BridgeSide::Backend => {
                info!(connection_id = self.id, "Bridge backend connected");
                self.registry.register_bridge_backend(self.id, recipient);

                // Kick the frontends into capture mode.
                if let Ok(frame) = serde_json::to_string(&ServerEvent::control("start-mic")) {
                    forward_to_pool(self.registry.snapshot_bridge_frontends(), &frame);
                }
            }
        }

        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                warn!(connection_id = act.id, "Bridge heartbeat timeout, closing connection");
                ctx.stop();
            } else {
                ctx.ping(b"");
            }
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        match self.side {
            BridgeSide::Frontend => {
                info!(connection_id = self.id, "Bridge frontend disconnected");
                self.registry.unregister_bridge_frontend(self.id);
            }
            BridgeSide::Backend => {
                info!(connection_id = self.id, "Bridge backend disconnected");
                self.registry.unregister_bridge_backend(self.id);
            }
        }
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for BridgeSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => {
                self.last_heartbeat = Instant::now();
                self.forward(&text);
            }
            Ok(ws::Message::Binary(_)) => {
                warn!(connection_id = self.id, "Unexpected binary frame on bridge socket");
            }
            Ok(ws::Message::Ping(data)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&data);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!(connection_id = self.id, "Bridge socket closed: {:?}", reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) | Ok(ws::Message::Nop) => {}
            Err(err) => {
                warn!(connection_id = self.id, error = %err, "Bridge protocol error");
                ctx.stop();
            }
        }
    }
}

impl Handler<Outbound> for BridgeSocket {
    type Result = ();

    fn handle(&mut self, msg: Outbound, ctx: &mut Self::Context) {
        ctx.text(msg.0);
    }
}

/// Frontend side of the bridge.
pub async fn proxy_ws(
    req: HttpRequest,
    stream: web::Payload,
    registry: web::Data<Arc<ConnectionRegistry>>,
) -> ActixResult<HttpResponse> {
    info!(
        "New bridge frontend request from: {:?}",
        req.connection_info().peer_addr()
    );
    ws::start(
        BridgeSocket::frontend(registry.get_ref().clone()),
        &req,
        stream,
    )
}

/// Backend side of the bridge.
pub async fn server_ws(
    req: HttpRequest,
    stream: web::Payload,
    registry: web::Data<Arc<ConnectionRegistry>>,
) -> ActixResult<HttpResponse> {
    info!(
        "New bridge backend request from: {:?}",
        req.connection_info().peer_addr()
    );
    ws::start(
        BridgeSocket::backend(registry.get_ref().clone()),
        &req,
        stream,
    )
}
