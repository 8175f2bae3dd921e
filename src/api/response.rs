//! Converts [`ApiError`] into the fixed `{success: false, error_kind,
//! reason}` HTTP response shape (spec.md §7).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::api::types::ErrorResponse;
use crate::errors::{ApiError, ErrorKind};

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Unauthenticated => StatusCode::UNAUTHORIZED,
        ErrorKind::InvalidSession => StatusCode::UNAUTHORIZED,
        ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        ErrorKind::OperationNotPermitted => StatusCode::FORBIDDEN,
        ErrorKind::BadRequest => StatusCode::BAD_REQUEST,
        ErrorKind::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::ClientClosed => StatusCode::BAD_REQUEST,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        let status = status_for(kind);
        let body = ErrorResponse { success: false, error_kind: kind, reason: self.to_string() };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limited_maps_to_429() {
        let err = ApiError::RateLimited { retry_after_secs: 10 };
        assert_eq!(status_for(err.kind()), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn forbidden_maps_to_403() {
        let err = ApiError::Forbidden { reason: "denied".into() };
        assert_eq!(status_for(err.kind()), StatusCode::FORBIDDEN);
    }
}
