//! Campaign control handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;
use volley_core::ControlOutcome;
use volley_storage::models::{Campaign, CampaignProgress};

use crate::handlers::{control_error, ErrorResponse};
use crate::routes::AppState;

/// Campaign response
#[derive(Debug, Serialize)]
pub struct CampaignResponse {
    pub id: Uuid,
    pub name: String,
    pub status: String,
    pub total_emails: i32,
    pub emails_sent: i32,
    pub emails_failed: i32,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<Campaign> for CampaignResponse {
    fn from(c: Campaign) -> Self {
        Self {
            id: c.id,
            name: c.name,
            status: c.status,
            total_emails: c.total_emails,
            emails_sent: c.emails_sent,
            emails_failed: c.emails_failed,
            started_at: c.started_at,
            completed_at: c.completed_at,
            created_at: c.created_at,
        }
    }
}

/// Response for pause/resume/stop. `applied` is false when the campaign
/// was not in the state the transition requires.
#[derive(Debug, Serialize)]
pub struct ControlResponse {
    pub applied: bool,
    pub campaign: CampaignResponse,
}

/// Start a campaign
///
/// POST /campaigns/:campaign_id/start
pub async fn start_campaign(
    State(state): State<Arc<AppState>>,
    Path(campaign_id): Path<Uuid>,
) -> Result<Json<CampaignResponse>, (StatusCode, Json<ErrorResponse>)> {
    let campaign = state
        .supervisor
        .start(campaign_id)
        .await
        .map_err(control_error)?;

    info!(campaign = %campaign.name, "Campaign start accepted");
    Ok(Json(CampaignResponse::from(campaign)))
}

/// Pause a running campaign
///
/// POST /campaigns/:campaign_id/pause
pub async fn pause_campaign(
    State(state): State<Arc<AppState>>,
    Path(campaign_id): Path<Uuid>,
) -> Result<Json<ControlResponse>, (StatusCode, Json<ErrorResponse>)> {
    let outcome = state
        .supervisor
        .pause(campaign_id)
        .await
        .map_err(control_error)?;
    control_response(&state, campaign_id, outcome).await
}

/// Resume a paused campaign
///
/// POST /campaigns/:campaign_id/resume
pub async fn resume_campaign(
    State(state): State<Arc<AppState>>,
    Path(campaign_id): Path<Uuid>,
) -> Result<Json<ControlResponse>, (StatusCode, Json<ErrorResponse>)> {
    let outcome = state
        .supervisor
        .resume(campaign_id)
        .await
        .map_err(control_error)?;
    control_response(&state, campaign_id, outcome).await
}

/// Stop a running or paused campaign
///
/// POST /campaigns/:campaign_id/stop
pub async fn stop_campaign(
    State(state): State<Arc<AppState>>,
    Path(campaign_id): Path<Uuid>,
) -> Result<Json<ControlResponse>, (StatusCode, Json<ErrorResponse>)> {
    let outcome = state
        .supervisor
        .stop(campaign_id)
        .await
        .map_err(control_error)?;
    control_response(&state, campaign_id, outcome).await
}

/// Campaign progress snapshot
///
/// GET /campaigns/:campaign_id/status
pub async fn campaign_status(
    State(state): State<Arc<AppState>>,
    Path(campaign_id): Path<Uuid>,
) -> Result<Json<CampaignProgress>, (StatusCode, Json<ErrorResponse>)> {
    let progress = state
        .supervisor
        .status(campaign_id)
        .await
        .map_err(control_error)?;
    Ok(Json(progress))
}

async fn control_response(
    state: &AppState,
    campaign_id: Uuid,
    outcome: ControlOutcome,
) -> Result<Json<ControlResponse>, (StatusCode, Json<ErrorResponse>)> {
    match outcome {
        ControlOutcome::Applied(campaign) => Ok(Json(ControlResponse {
            applied: true,
            campaign: CampaignResponse::from(campaign),
        })),
        ControlOutcome::Ignored => {
            // Report the state the campaign is actually in.
            let campaign = state
                .store
                .campaign(campaign_id)
                .await
                .map_err(crate::handlers::store_error)?
                .ok_or_else(|| control_error(volley_core::ControlError::NotFound))?;
            Ok(Json(ControlResponse {
                applied: false,
                campaign: CampaignResponse::from(campaign),
            }))
        }
    }
}
