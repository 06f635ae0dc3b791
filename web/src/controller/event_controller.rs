use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::controller::ApiResponse;
use crate::Error;
use events::{Event, UserId};
use log::*;
use service::AppState;

/// POST publish an Event to every live connection of a user
///
/// The body is the event's wire JSON: `{"name": .., "data": .., "meta": ..}`.
/// Responds 202 once the event is on the user's channel, whether or not
/// anyone is listening; 422 for a malformed event; 502 if the pub/sub
/// medium could not be reached.
pub async fn publish(
    State(app_state): State<AppState>,
    Path(user_id): Path<UserId>,
    body: String,
) -> Result<impl IntoResponse, Error> {
    let event = Event::from_wire(&body)?;
    debug!("POST publish event {} to user {user_id}", event.name());

    app_state
        .manager_ref()
        .publisher()
        .publish(&user_id, &event)
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(ApiResponse::new(
            StatusCode::ACCEPTED.into(),
            json!({ "user_id": user_id, "name": event.name() }),
        )),
    ))
}
