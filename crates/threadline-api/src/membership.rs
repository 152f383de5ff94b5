use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};

use threadline_types::api::{Claims, MembershipResponse};
use threadline_types::models::ThreadId;

use crate::AppState;
use crate::error::ApiError;

pub async fn get_membership(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
    Extension(claims): Extension<Claims>,
) -> impl IntoResponse {
    let client = state.client_for(&claims.sub);
    let thread_id = ThreadId::new(thread_id);
    let member = client.is_member(&thread_id).await;
    Json(MembershipResponse { thread_id, member })
}

/// Idempotent. Joining twice keeps the first role.
pub async fn join(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let client = state.client_for(&claims.sub);
    let thread_id = ThreadId::new(thread_id);
    client.join(&thread_id).await?;
    Ok(Json(MembershipResponse {
        thread_id,
        member: true,
    }))
}

pub async fn leave(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let client = state.client_for(&claims.sub);
    let thread_id = ThreadId::new(thread_id);
    client.leave(&thread_id).await?;
    Ok(Json(MembershipResponse {
        thread_id,
        member: false,
    }))
}
