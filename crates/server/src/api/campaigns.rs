//! Campaign API handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use courier_core::{
    Campaign, CampaignError, CampaignStatus, CreateCampaignRequest, DeliveryCounters, LogEntry,
    OrchestratorError,
};

use super::handlers::{error_response, ApiError};
use crate::state::AppState;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for creating a campaign
#[derive(Debug, Deserialize)]
pub struct CreateCampaignBody {
    pub name: String,
    /// Message text; `{{name}}` is replaced with the customer's name
    pub message_template: String,
    pub owner_id: String,
    /// Audience segment; all of the owner's customers when absent
    pub segment_id: Option<String>,
}

/// Request body for scheduling a campaign
#[derive(Debug, Deserialize)]
pub struct ScheduleCampaignBody {
    pub scheduled_at: DateTime<Utc>,
}

/// Response for campaign operations
#[derive(Debug, Serialize)]
pub struct CampaignResponse {
    pub id: String,
    pub name: String,
    pub message_template: String,
    pub owner_id: String,
    pub segment_id: Option<String>,
    pub status: CampaignStatus,
    pub scheduled_at: Option<String>,
    pub counters: DeliveryCounters,
    pub failed_count: u32,
    pub last_run_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Campaign> for CampaignResponse {
    fn from(campaign: Campaign) -> Self {
        Self {
            id: campaign.id,
            name: campaign.name,
            message_template: campaign.message_template,
            owner_id: campaign.owner_id,
            segment_id: campaign.segment_id,
            status: campaign.status,
            scheduled_at: campaign.scheduled_at.map(|t| t.to_rfc3339()),
            counters: campaign.counters,
            failed_count: campaign.failed_count,
            last_run_at: campaign.last_run_at.map(|t| t.to_rfc3339()),
            created_at: campaign.created_at.to_rfc3339(),
            updated_at: campaign.updated_at.to_rfc3339(),
        }
    }
}

/// Response for delivery start and cancel
#[derive(Debug, Serialize)]
pub struct DeliveryActionResponse {
    pub campaign_id: String,
    pub status: CampaignStatus,
    /// Whether a run was in flight (cancel only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub was_running: Option<bool>,
}

/// Response for the communication log of a campaign
#[derive(Debug, Serialize)]
pub struct CampaignLogResponse {
    pub campaign_id: String,
    pub entries: Vec<LogEntry>,
    pub total: usize,
}

// ============================================================================
// Error mapping
// ============================================================================

fn campaign_error(e: CampaignError) -> ApiError {
    let status = match &e {
        CampaignError::NotFound(_) => StatusCode::NOT_FOUND,
        CampaignError::InvalidTransition { .. } => StatusCode::CONFLICT,
        CampaignError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(status, e)
}

fn orchestrator_error(e: OrchestratorError) -> ApiError {
    match e {
        OrchestratorError::NotFound(_) => error_response(StatusCode::NOT_FOUND, e),
        OrchestratorError::InvalidState { .. } | OrchestratorError::AlreadyRunning(_) => {
            error_response(StatusCode::CONFLICT, e)
        }
        OrchestratorError::Campaign(inner) => campaign_error(inner),
        _ => error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

fn load_campaign(state: &AppState, id: &str) -> Result<Campaign, ApiError> {
    match state.campaigns().get(id) {
        Ok(Some(campaign)) => Ok(campaign),
        Ok(None) => Err(error_response(
            StatusCode::NOT_FOUND,
            format!("Campaign not found: {}", id),
        )),
        Err(e) => Err(campaign_error(e)),
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Create a draft campaign
pub async fn create_campaign(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateCampaignBody>,
) -> Result<(StatusCode, Json<CampaignResponse>), ApiError> {
    if body.name.trim().is_empty() || body.message_template.trim().is_empty() {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            "name and message_template are required",
        ));
    }
    if body.owner_id.trim().is_empty() {
        return Err(error_response(StatusCode::BAD_REQUEST, "owner_id is required"));
    }

    let request = CreateCampaignRequest {
        name: body.name,
        message_template: body.message_template,
        owner_id: body.owner_id,
        segment_id: body.segment_id,
    };

    match state.campaigns().create(request) {
        Ok(campaign) => {
            info!("Created campaign {} ({})", campaign.id, campaign.name);
            Ok((StatusCode::CREATED, Json(CampaignResponse::from(campaign))))
        }
        Err(e) => Err(campaign_error(e)),
    }
}

/// Get a campaign by ID
pub async fn get_campaign(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<CampaignResponse>, ApiError> {
    load_campaign(&state, &id).map(|c| Json(CampaignResponse::from(c)))
}

/// List the communication log of a campaign
pub async fn get_campaign_log(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<CampaignLogResponse>, ApiError> {
    load_campaign(&state, &id)?;

    match state.comm_log().list_for_campaign(&id) {
        Ok(entries) => Ok(Json(CampaignLogResponse {
            campaign_id: id,
            total: entries.len(),
            entries,
        })),
        Err(e) => Err(error_response(StatusCode::INTERNAL_SERVER_ERROR, e)),
    }
}

/// Schedule a draft campaign for later dispatch
pub async fn schedule_campaign(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<ScheduleCampaignBody>,
) -> Result<Json<CampaignResponse>, ApiError> {
    match state.campaigns().schedule(&id, body.scheduled_at) {
        Ok(campaign) => {
            info!(
                "Campaign {} scheduled for {}",
                campaign.id,
                body.scheduled_at.to_rfc3339()
            );
            Ok(Json(CampaignResponse::from(campaign)))
        }
        Err(e) => Err(campaign_error(e)),
    }
}

/// Deliver a draft or scheduled campaign now
///
/// Returns 202 once the campaign is claimed; the run continues in the background.
pub async fn deliver_campaign(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<DeliveryActionResponse>), ApiError> {
    match state.orchestrator().start_delivery(&id) {
        Ok(()) => Ok((
            StatusCode::ACCEPTED,
            Json(DeliveryActionResponse {
                campaign_id: id,
                status: CampaignStatus::Active,
                was_running: None,
            }),
        )),
        Err(e) => Err(orchestrator_error(e)),
    }
}

/// Cancel an active campaign
pub async fn cancel_campaign(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<DeliveryActionResponse>, ApiError> {
    let was_running = state.orchestrator().cancel(&id).map_err(orchestrator_error)?;
    let campaign = load_campaign(&state, &id)?;

    Ok(Json(DeliveryActionResponse {
        campaign_id: id,
        status: campaign.status,
        was_running: Some(was_running),
    }))
}
