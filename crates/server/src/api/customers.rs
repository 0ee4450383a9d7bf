//! Customer and segment API handlers.
//!
//! Customers and segments are owned by the wider CRM; these endpoints exist
//! to seed audiences for campaigns.

use axum::{extract::State, http::StatusCode, Json};
use chrono::{DateTime, Utc};
use courier_core::{
    CreateCustomerRequest, CreateSegmentRequest, Customer, CustomerError, Segment, SegmentRules,
};
use serde::Deserialize;
use std::sync::Arc;

use super::handlers::{error_response, ApiError};
use crate::state::AppState;

/// Request body for creating a customer
#[derive(Debug, Deserialize)]
pub struct CreateCustomerBody {
    pub owner_id: String,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    #[serde(default)]
    pub total_spend: f64,
    #[serde(default)]
    pub visit_count: u32,
    pub last_active_at: Option<DateTime<Utc>>,
}

/// Request body for creating a segment
#[derive(Debug, Deserialize)]
pub struct CreateSegmentBody {
    pub owner_id: String,
    pub name: String,
    pub rules: SegmentRules,
}

fn customer_error(e: CustomerError) -> ApiError {
    let status = match &e {
        CustomerError::SegmentNotFound(_) => StatusCode::NOT_FOUND,
        CustomerError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(status, e)
}

/// Create a customer
pub async fn create_customer(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateCustomerBody>,
) -> Result<(StatusCode, Json<Customer>), ApiError> {
    if body.owner_id.trim().is_empty() || body.email.trim().is_empty() {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            "owner_id and email are required",
        ));
    }

    let request = CreateCustomerRequest {
        owner_id: body.owner_id,
        name: body.name,
        email: body.email,
        phone: body.phone,
        total_spend: body.total_spend,
        visit_count: body.visit_count,
        last_active_at: body.last_active_at,
    };

    state
        .customers()
        .create_customer(request)
        .map(|customer| (StatusCode::CREATED, Json(customer)))
        .map_err(customer_error)
}

/// Create a segment
pub async fn create_segment(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateSegmentBody>,
) -> Result<(StatusCode, Json<Segment>), ApiError> {
    if body.owner_id.trim().is_empty() || body.name.trim().is_empty() {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            "owner_id and name are required",
        ));
    }

    let request = CreateSegmentRequest {
        owner_id: body.owner_id,
        name: body.name,
        rules: body.rules,
    };

    state
        .customers()
        .create_segment(request)
        .map(|segment| (StatusCode::CREATED, Json(segment)))
        .map_err(customer_error)
}
