//! HTTP control interface
//!
//! Parameters arrive as a form-encoded request body. Every response is
//! HTTP 200 with a JSON body carrying `code` and `message`.

use axum::extract::State;
use axum::Json;
use tracing::debug;

use super::protocol::{ApiError, ApiReply, Params};
use super::websocket::AppState;
use crate::registry::Snapshot;

/// `GET /state`
pub async fn state(State(state): State<AppState>) -> Json<Snapshot> {
    debug!("State requested");
    Json(state.dispatcher.snapshot().await)
}

/// `POST /push` with `fd` and `message`
pub async fn push(State(state): State<AppState>, body: String) -> Json<ApiReply> {
    debug!("Push request: {}", body);
    let result = state.dispatcher.push_to(&Params::from_form(&body)).await;
    Json(reply(result, state.report_delivery))
}

/// `POST /broadcast` with `channel` and `message`
pub async fn broadcast(State(state): State<AppState>, body: String) -> Json<ApiReply> {
    debug!("Broadcast request: {}", body);
    let result = state.dispatcher.broadcast_to(&Params::from_form(&body)).await;
    Json(reply(result, state.report_delivery))
}

/// Any method other than POST on `/push` or `/broadcast`
pub async fn invalid_request() -> Json<ApiReply> {
    Json(ApiError::InvalidRequest.into())
}

fn reply(result: Result<usize, ApiError>, report_delivery: bool) -> ApiReply {
    match result {
        Ok(delivered) if report_delivery => ApiReply::ok_with_delivered(delivered),
        Ok(_) => ApiReply::ok(),
        Err(e) => {
            debug!("Rejected request: {}", e);
            e.into()
        }
    }
}
