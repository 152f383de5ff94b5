use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use threadline_sync::SyncError;
use threadline_types::api::ErrorResponse;
use tracing::warn;

#[derive(Debug, Error)]
#[error(transparent)]
pub struct ApiError(#[from] pub SyncError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            SyncError::NotAuthenticated => StatusCode::UNAUTHORIZED,
            SyncError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            SyncError::NotFound(_) => StatusCode::NOT_FOUND,
            SyncError::Transport(_) => StatusCode::BAD_GATEWAY,
            SyncError::PermissionDenied(_) => StatusCode::FORBIDDEN,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!("Request failed: {}", self.0);
        }
        let body = ErrorResponse {
            error: self.0.kind().to_string(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_follow_error_kind() {
        let cases = [
            (SyncError::NotAuthenticated, StatusCode::UNAUTHORIZED),
            (SyncError::InvalidArgument("x".into()), StatusCode::BAD_REQUEST),
            (SyncError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (SyncError::Transport("x".into()), StatusCode::BAD_GATEWAY),
            (SyncError::PermissionDenied("x".into()), StatusCode::FORBIDDEN),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError(err).status(), status);
        }
    }
}
