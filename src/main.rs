//! # Avatar Session Backend - Main Application Entry Point
//!
//! Actix-web server for a chat/voice avatar assistant. Each primary
//! client WebSocket owns a session with its own FIFO event queue and
//! dispatcher task; everything a session emits is mirrored to a pool of
//! receive-only observers. A separate bridge relays raw frames between
//! frontend and backend tool connections.
//!
//! ## Application Architecture:
//! - **config**: TOML + environment configuration
//! - **events**: the client/server wire vocabulary
//! - **session**: per-connection queue, state, and dispatcher loop
//! - **broadcast / registry**: fan-out of session emissions
//! - **websocket / bridge**: the actor layer terminating connections
//! - **pipeline / context / history**: injected session collaborators

mod assets;
mod bridge;
mod broadcast;
mod config;
mod context;
mod error;
mod events;
mod handlers;
mod health;
mod history;
mod middleware;
mod pipeline;
mod registry;
mod session;
mod state;
mod websocket;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use config::AppConfig;
use context::ServiceContext;
use history::FileHistoryStore;
use registry::ConnectionRegistry;
use state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Global shutdown flag set by the signal handler task.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting avatar-session-backend v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Configuration loaded: {}:{}",
        config.server.host, config.server.port
    );

    // Wire the session collaborators: file-backed history plus the
    // built-in loopback agent and pipeline.
    let history = Arc::new(FileHistoryStore::new(&config.assets.history_dir));
    let services = Arc::new(ServiceContext::with_loopback_engines(&config, history));
    let registry = Arc::new(ConnectionRegistry::new());

    let app_state = AppState::new(config.clone(), registry.clone(), services);
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .app_data(web::Data::new(registry.clone()))
            .wrap(cors)
            .wrap(middleware::MetricsMiddleware)
            .wrap(middleware::RequestLogging)
            // Session and observer sockets
            .route("/client-ws", web::get().to(websocket::client_ws))
            .route("/broadcast-ws", web::get().to(websocket::observer_ws))
            // Frontend/backend bridge
            .route("/proxy-ws", web::get().to(bridge::proxy_ws))
            .route("/server-ws", web::get().to(bridge::server_ws))
            // Administrative push to all primaries
            .route("/broadcast", web::post().to(handlers::broadcast))
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics)),
            )
            .route("/health", web::get().to(health::health_check))
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(server_result) => {
                    if let Err(e) = server_result {
                        error!("Server error: {}", e);
                    }
                }
                Err(e) => {
                    error!("Server task error: {}", e);
                }
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Console logging via tracing; `RUST_LOG` overrides the defaults.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "avatar_session_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Listen for SIGTERM and SIGINT and flip the shutdown flag.
fn setup_signal_handlers() {
    tokio::spawn(async {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler");
        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
            .expect("Failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
