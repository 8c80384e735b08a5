use axum::{
    extract::rejection::JsonRejection,
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use regdesk_core::errors::{ApplicationError, InterfaceError};
use serde_json::{json, Value};
use tracing::{error, warn};
use uuid::Uuid;

pub const CORRELATION_HEADER: &str = "x-correlation-id";

pub fn new_correlation_id() -> String {
    Uuid::new_v4().to_string()
}

/// Unwraps a JSON body, turning extractor rejections into a 422 `{"detail": ...}`.
pub fn json_body<T>(
    payload: Result<Json<T>, JsonRejection>,
    correlation_id: &str,
) -> Result<T, ApiError> {
    payload.map(|Json(value)| value).map_err(|rejection| ApiError::MalformedBody {
        message: rejection.body_text(),
        correlation_id: correlation_id.to_string(),
    })
}

/// HTTP-facing error. Bodies follow `{"detail": ...}`: a message string, or a list of
/// `{field, reason}` objects for field validation failures.
#[derive(Debug)]
pub enum ApiError {
    Interface(InterfaceError),
    MalformedBody { message: String, correlation_id: String },
}

impl ApiError {
    pub fn new(error: impl Into<ApplicationError>, correlation_id: &str) -> Self {
        Self::Interface(error.into().into_interface(correlation_id))
    }

    fn correlation_id(&self) -> &str {
        match self {
            Self::Interface(error) => error.correlation_id(),
            Self::MalformedBody { correlation_id, .. } => correlation_id,
        }
    }

    fn status_and_body(&self) -> (StatusCode, Value) {
        match self {
            Self::Interface(error @ InterfaceError::BadRequest { .. }) => {
                (StatusCode::BAD_REQUEST, json!({ "detail": error.user_message() }))
            }
            Self::Interface(error @ InterfaceError::NotFound { .. }) => {
                (StatusCode::NOT_FOUND, json!({ "detail": error.user_message() }))
            }
            Self::Interface(InterfaceError::Unprocessable { errors, .. }) => {
                let detail = errors
                    .iter()
                    .map(|error| json!({ "field": error.field.as_str(), "reason": error.reason }))
                    .collect::<Vec<_>>();
                (StatusCode::UNPROCESSABLE_ENTITY, json!({ "detail": detail }))
            }
            Self::Interface(error @ InterfaceError::ServiceUnavailable { .. }) => {
                (StatusCode::SERVICE_UNAVAILABLE, json!({ "detail": error.user_message() }))
            }
            Self::Interface(error @ InterfaceError::Internal { .. }) => {
                (StatusCode::INTERNAL_SERVER_ERROR, json!({ "detail": error.user_message() }))
            }
            Self::MalformedBody { message, .. } => {
                (StatusCode::UNPROCESSABLE_ENTITY, json!({ "detail": message }))
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = self.status_and_body();
        let correlation_id = self.correlation_id().to_string();

        if status.is_server_error() {
            error!(
                event_name = "http.request.failed",
                correlation_id = %correlation_id,
                status = status.as_u16(),
                error = ?self,
                "request failed"
            );
        } else {
            warn!(
                event_name = "http.request.rejected",
                correlation_id = %correlation_id,
                status = status.as_u16(),
                "request rejected"
            );
        }

        let mut response = (status, Json(body)).into_response();
        if let Ok(value) = HeaderValue::from_str(&correlation_id) {
            response.headers_mut().insert(CORRELATION_HEADER, value);
        }
        response
    }
}
