use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};

use threadline_types::api::{Claims, SendMessageRequest, SendMessageResponse};
use threadline_types::models::ThreadId;

use crate::AppState;
use crate::error::ApiError;

/// Members only. The store rejects the write for anyone else.
pub async fn send_message(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let client = state.client_for(&claims.sub);
    let message_id = client
        .send_message(&ThreadId::new(thread_id), &req.text)
        .await?;

    Ok((StatusCode::CREATED, Json(SendMessageResponse { message_id })))
}

/// The most recent window of messages, oldest first.
pub async fn get_messages(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let client = state.client_for(&claims.sub);
    let messages = client.recent_messages(&ThreadId::new(thread_id)).await?;
    Ok(Json(messages))
}
