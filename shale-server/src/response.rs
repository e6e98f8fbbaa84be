use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use shale_core::ShaleError;

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

pub fn error_status(error: &ShaleError) -> StatusCode {
    match error {
        ShaleError::NotFound(_) => StatusCode::NOT_FOUND,
        ShaleError::AlreadyExists(_) => StatusCode::CONFLICT,
        ShaleError::InvalidKey(_) => StatusCode::BAD_REQUEST,
        ShaleError::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
        ShaleError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn error_response(error: &ShaleError) -> Response {
    let body = ApiResponse::<()> {
        success: false,
        data: None,
        error: Some(error.to_string()),
    };
    (error_status(error), Json(body)).into_response()
}

pub fn bad_request(message: &str) -> Response {
    let body = ApiResponse::<()> {
        success: false,
        data: None,
        error: Some(message.to_string()),
    };
    (StatusCode::BAD_REQUEST, Json(body)).into_response()
}
