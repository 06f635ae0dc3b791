//! HTTP and WebSocket surface of the fan-out server.
//!
//! - `GET /ws/{user_id}` upgrades to a WebSocket and registers it as one of
//!   the user's connections. Inbound text frames are event JSON.
//! - `POST /users/{user_id}/events` publishes an event to every live
//!   connection of that user, in any server process.
//! - `GET /health` reports liveness.
//!
//! Authenticating the user id carried in the path is the job of whatever
//! sits in front of this server.

use axum::http::{header, HeaderValue, Method};
use log::*;
use service::AppState;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;

mod controller;
mod error;
pub mod router;
pub mod ws;

pub use error::{Error, Result};

pub async fn init_server(app_state: AppState) -> std::io::Result<()> {
    let listen_addr = app_state.config.listen_address();
    let listener = TcpListener::bind(&listen_addr).await?;

    info!("Server starting... listening for connections on http://{listen_addr}");

    let manager = Arc::clone(&app_state.manager);
    let cors_layer = cors_layer(&app_state.config.allowed_origins);
    let app = router::define_routes(app_state).layer(cors_layer);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    manager.shutdown().await;
    info!("Server stopped");
    Ok(())
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Ignoring invalid CORS origin {origin}: {e}");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
