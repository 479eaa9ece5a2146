/// Request extractors and error mapping shared by all handlers.
use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use super::AppState;
use crate::error::IntegrityError;
use crate::state::models::Actor;

/// Header naming the acting principal on mutating requests.
pub const ACTOR_HEADER: &str = "x-actor";

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Acting principal taken from the `X-Actor` header.
///
/// ```ignore
/// async fn handler(ActorHeader(actor): ActorHeader) -> impl IntoResponse { ... }
/// ```
#[derive(Debug, Clone)]
pub struct ActorHeader(pub Actor);

impl FromRequestParts<Arc<AppState>> for ActorHeader {
    type Rejection = (StatusCode, Json<ErrorResponse>);

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let actor = parts
            .headers
            .get(ACTOR_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                (
                    StatusCode::BAD_REQUEST,
                    Json(ErrorResponse {
                        error: "Missing X-Actor header".into(),
                    }),
                )
            })?;

        Ok(ActorHeader(Actor::new(actor)))
    }
}

/// Service error rendered as a JSON response.
#[derive(Debug)]
pub struct ApiError(pub IntegrityError);

impl From<IntegrityError> for ApiError {
    fn from(e: IntegrityError) -> Self {
        Self(e)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            IntegrityError::ReportNotFound(_) | IntegrityError::AnchorNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            IntegrityError::DeletionRefused { .. }
            | IntegrityError::InvalidTransition { .. }
            | IntegrityError::RefreshInProgress
            | IntegrityError::DuplicateAnchor(_)
            | IntegrityError::DuplicateReference(_) => StatusCode::CONFLICT,
            IntegrityError::IncompleteDocument(_)
            | IntegrityError::InvalidFingerprint(_)
            | IntegrityError::InvalidCoordinate(_) => StatusCode::UNPROCESSABLE_ENTITY,
            IntegrityError::AnchorServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        }
        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_mapping() {
        let status = |e| ApiError(e).status();
        assert_eq!(status(IntegrityError::ReportNotFound("x".into())), StatusCode::NOT_FOUND);
        assert_eq!(
            status(IntegrityError::DeletionRefused {
                report_id: "x".into(),
                transaction_id: "y".into()
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(status(IntegrityError::RefreshInProgress), StatusCode::CONFLICT);
        assert_eq!(
            status(IntegrityError::Database("down".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
