use crate::ws::transport;
use async_trait::async_trait;
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use events::{Event, EventHandler, UserId};
use log::*;
use service::AppState;
use std::sync::Arc;

/// Inbound events are only logged here; business handlers plug in
/// through [`EventHandler`].
pub struct LoggingEventHandler;

#[async_trait]
impl EventHandler for LoggingEventHandler {
    async fn handle(&self, user_id: &UserId, event: Event) {
        info!("Received event {} from user {user_id}", event.name());
    }
}

/// WebSocket handler that registers a long-lived connection for the user.
/// A user may hold any number of these at once, across server processes.
pub(crate) async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(user_id): Path<UserId>,
    State(app_state): State<AppState>,
) -> impl IntoResponse {
    debug!("Establishing WebSocket connection for user {user_id}");

    ws.on_upgrade(move |socket| serve_socket(socket, user_id, app_state))
}

async fn serve_socket(socket: WebSocket, user_id: UserId, app_state: AppState) {
    let (sink, stream) = transport::split(socket);

    let connection = app_state
        .manager
        .connect(
            user_id.clone(),
            sink,
            Box::new(stream),
            Arc::new(LoggingEventHandler),
        )
        .await;
    let connection_id = connection.id().clone();

    // serve() always disconnects, including after a malformed event
    match app_state.manager.serve(connection).await {
        Ok(()) => debug!("WebSocket connection {connection_id} for user {user_id} closed"),
        Err(e) => warn!("WebSocket connection {connection_id} for user {user_id} dropped: {e}"),
    }
}
