//! Audit log handlers

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use volley_storage::models::LogEntry;

use crate::handlers::{store_error, ErrorResponse};
use crate::routes::AppState;

/// Query parameters for listing log entries
#[derive(Debug, Deserialize)]
pub struct ListLogsQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    200
}

/// Log list response
#[derive(Debug, Serialize)]
pub struct LogListResponse {
    pub data: Vec<LogEntry>,
    pub count: usize,
}

/// Response after clearing the log
#[derive(Debug, Serialize)]
pub struct ClearLogsResponse {
    pub deleted: u64,
}

/// List recent log entries, newest first
///
/// GET /logs?limit=200
pub async fn list_logs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListLogsQuery>,
) -> Result<Json<LogListResponse>, (StatusCode, Json<ErrorResponse>)> {
    // A negative limit reads as "nothing", not as a backend error.
    let data = state
        .store
        .logs(query.limit.max(0))
        .await
        .map_err(store_error)?;
    let count = data.len();
    Ok(Json(LogListResponse { data, count }))
}

/// Export the log as CSV
///
/// GET /logs/export
pub async fn export_logs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListLogsQuery>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorResponse>)> {
    let entries = state
        .store
        .logs(query.limit.max(0))
        .await
        .map_err(store_error)?;

    let mut out =
        String::from("timestamp,level,message,sender_address,receiver_address,status,error_reason\n");
    for entry in &entries {
        out.push_str(&csv_row(entry));
        out.push('\n');
    }

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"volley-logs.csv\"",
            ),
        ],
        out,
    ))
}

/// Clear the entire log
///
/// DELETE /logs
pub async fn clear_logs(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ClearLogsResponse>, (StatusCode, Json<ErrorResponse>)> {
    let deleted = state.store.clear_logs().await.map_err(store_error)?;
    info!(deleted, "Audit log cleared");
    Ok(Json(ClearLogsResponse { deleted }))
}

fn csv_row(entry: &LogEntry) -> String {
    [
        entry.timestamp.to_rfc3339(),
        entry.level.clone(),
        entry.message.clone(),
        entry.sender_address.clone().unwrap_or_default(),
        entry.receiver_address.clone().unwrap_or_default(),
        entry.status.clone().unwrap_or_default(),
        entry.error_reason.clone().unwrap_or_default(),
    ]
    .iter()
    .map(|field| csv_escape(field))
    .collect::<Vec<_>>()
    .join(",")
}

/// Quote a field when it contains a delimiter, quote, or newline; embedded
/// quotes are doubled per RFC 4180.
fn csv_escape(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
