use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;

use threadline_types::api::{Claims, CreateThreadRequest, CreateThreadResponse};

use crate::AppState;
use crate::error::ApiError;

pub async fn create_thread(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateThreadRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let client = state.client_for(&claims.sub);
    let thread_id = client.create_thread(&req.name, req.visibility).await?;
    info!("{} created thread {}", claims.sub, thread_id);

    Ok((StatusCode::CREATED, Json(CreateThreadResponse { thread_id })))
}
