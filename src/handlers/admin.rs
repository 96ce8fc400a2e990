//! # Administrative Broadcast Endpoint
//!
//! `POST /broadcast` pushes a raw message to every connected primary
//! client. Connections whose mailbox is closed are pruned from the
//! registry as part of the same pass, so a dead client never blocks or
//! skips its siblings.

use crate::broadcast::Outbound;
use crate::error::{AppError, AppResult};
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use tracing::{debug, info};

#[derive(Debug, Deserialize)]
pub struct BroadcastRequest {
    /// Frame pushed verbatim to each client.
    pub message: String,
}

/// Fan the message out to the primary pool and report how it went.
pub async fn broadcast(
    state: web::Data<AppState>,
    body: web::Json<BroadcastRequest>,
) -> AppResult<HttpResponse> {
    if body.message.is_empty() {
        return Err(AppError::BadRequest("message must not be empty".to_string()));
    }

    let snapshot = state.registry.snapshot_primaries();
    let mut delivered = 0usize;
    let mut failed = Vec::new();

    for (id, recipient) in snapshot {
        match recipient.try_send(Outbound(body.message.clone())) {
            Ok(()) => {
                debug!(connection_id = id, "Broadcast delivered");
                delivered += 1;
            }
            Err(_) => failed.push(id),
        }
    }

    if !failed.is_empty() {
        state.registry.prune_primaries(&failed);
    }

    info!(delivered, pruned = failed.len(), "Administrative broadcast completed");

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "status": "success",
        "delivered": delivered,
        "pruned": failed.len(),
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::context::ServiceContext;
    use crate::history::FileHistoryStore;
    use crate::registry::ConnectionRegistry;
    use actix::prelude::*;
    use actix_web::{test, App};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

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

    fn app_state() -> AppState {
        let config = AppConfig::default();
        let registry = Arc::new(ConnectionRegistry::new());
        let history = Arc::new(FileHistoryStore::new(
            std::env::temp_dir()
                .join("avatar-session-backend-tests")
                .join(uuid::Uuid::new_v4().to_string()),
        ));
        let services = Arc::new(ServiceContext::with_loopback_engines(&config, history));
        AppState::new(config, registry, services)
    }

    #[actix_web::test]
    async fn test_broadcast_reaches_every_primary() {
        let state = app_state();
        let frames = Arc::new(Mutex::new(Vec::new()));
        for _ in 0..3 {
            let addr = Recorder {
                received: frames.clone(),
            }
            .start();
            state
                .registry
                .register_primary(state.registry.next_connection_id(), addr.recipient());
        }

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/broadcast", web::post().to(broadcast)),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/broadcast")
            .set_json(serde_json::json!({ "message": "ping all" }))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["status"], "success");
        assert_eq!(body["delivered"], 3);
        assert_eq!(body["pruned"], 0);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(frames.lock().unwrap().len(), 3);
    }

    #[actix_web::test]
    async fn test_empty_message_rejected() {
        let state = app_state();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/broadcast", web::post().to(broadcast)),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/broadcast")
            .set_json(serde_json::json!({ "message": "" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 400);
    }
}
