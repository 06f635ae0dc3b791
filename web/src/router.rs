use crate::controller::{event_controller, health_check_controller};
use crate::ws;
use axum::{
    routing::{get, post},
    Router,
};
use service::AppState;

pub fn define_routes(app_state: AppState) -> Router {
    Router::new()
        .merge(health_routes())
        .merge(event_routes(app_state.clone()))
        .merge(ws_routes(app_state))
}

fn health_routes() -> Router {
    Router::new().route("/health", get(health_check_controller::health_check))
}

fn event_routes(app_state: AppState) -> Router {
    Router::new()
        .route("/users/{user_id}/events", post(event_controller::publish))
        .with_state(app_state)
}

fn ws_routes(app_state: AppState) -> Router {
    Router::new()
        .route("/ws/{user_id}", get(ws::handler::ws_handler))
        .with_state(app_state)
}
