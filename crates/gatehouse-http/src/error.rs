//! Mapping from gateway errors to HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use gatehouse_types::GatewayError;

/// HTTP-facing wrapper around [`GatewayError`]. Handlers return this so
/// `?` propagation maps straight onto status codes.
#[derive(Debug)]
pub struct HttpError(pub GatewayError);

impl From<GatewayError> for HttpError {
    fn from(err: GatewayError) -> Self {
        Self(err)
    }
}

/// JSON error body.
#[derive(Serialize)]
struct ErrorBody {
    error: String,
    status: u16,
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::Denied(_) => StatusCode::FORBIDDEN,
            GatewayError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::Upstream(_) => StatusCode::BAD_GATEWAY,
            GatewayError::Auth(_) => StatusCode::UNAUTHORIZED,
            GatewayError::Serialization(_) => StatusCode::BAD_REQUEST,
            GatewayError::Config(_)
            | GatewayError::Startup(_)
            | GatewayError::Audit(_)
            | GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ErrorBody {
            error: self.0.to_string(),
            status: status.as_u16(),
        };
        (status, axum::Json(body)).into_response()
    }
}
