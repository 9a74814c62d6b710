//! API request handlers

pub mod campaigns;
pub mod health;
pub mod logs;

use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use volley_core::ControlError;

/// Error response
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

/// Map a control error to its HTTP shape
pub fn control_error(e: ControlError) -> (StatusCode, Json<ErrorResponse>) {
    let (status, code) = match &e {
        ControlError::NotFound => (StatusCode::NOT_FOUND, "not_found"),
        ControlError::AlreadyActive => (StatusCode::CONFLICT, "already_active"),
        ControlError::NoActiveTemplate | ControlError::NoReceivers | ControlError::NoSenders => {
            (StatusCode::UNPROCESSABLE_ENTITY, "precondition_failed")
        }
        ControlError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
    };
    (
        status,
        Json(ErrorResponse {
            error: code.to_string(),
            message: e.to_string(),
        }),
    )
}

/// Map a store error to its HTTP shape via the error's own metadata
pub fn store_error(e: volley_common::Error) -> (StatusCode, Json<ErrorResponse>) {
    tracing::error!("Store error: {}", e);
    let status =
        StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (
        status,
        Json(ErrorResponse {
            error: e.code().to_ascii_lowercase(),
            message: e.to_string(),
        }),
    )
}
