use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::error::SimError;

/// HTTP-facing error: a simulation error kind plus its wire mapping.
/// Bodies are always `{"error": "<message>"}`.
#[derive(Debug)]
pub struct ApiError(pub SimError);

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        ApiError(SimError::Internal(msg.into()))
    }

    fn status_code(&self) -> StatusCode {
        match &self.0 {
            SimError::UnknownPoint(_) => StatusCode::NOT_FOUND,
            SimError::NotWritable(_)
            | SimError::BadPriority(_)
            | SimError::BadType(_)
            | SimError::BadScenario(_) => StatusCode::BAD_REQUEST,
            SimError::NotAuthenticated => StatusCode::UNAUTHORIZED,
            SimError::Forbidden => StatusCode::FORBIDDEN,
            SimError::BadTopology(_) | SimError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<SimError> for ApiError {
    fn from(err: SimError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self.0, "API error");
        } else {
            tracing::debug!(error = %self.0, "client error");
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kinds_map_to_http_codes() {
        assert_eq!(
            ApiError(SimError::UnknownPoint("x".into())).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError(SimError::BadPriority(0)).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError(SimError::NotAuthenticated).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError(SimError::Forbidden).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError(SimError::Internal("x".into())).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
