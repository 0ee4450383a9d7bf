//! Simulated vendor send endpoint.
//!
//! Lets external callers exercise the vendor protocol: the send is
//! acknowledged right away and the receipt is posted to the request's
//! `callback_url` later.

use axum::{extract::State, http::StatusCode, Json};
use courier_core::{SendAck, SendRequest, VendorError};
use std::sync::Arc;

use super::handlers::{error_response, ApiError};
use crate::state::AppState;

pub async fn send(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SendRequest>,
) -> Result<Json<SendAck>, ApiError> {
    match state.vendor_endpoint().send(request).await {
        Ok(ack) => Ok(Json(ack)),
        Err(e @ VendorError::Rejected(_)) => Err(error_response(StatusCode::BAD_REQUEST, e)),
        Err(e @ VendorError::Timeout(_)) => Err(error_response(StatusCode::GATEWAY_TIMEOUT, e)),
        Err(e @ VendorError::Transport(_)) => Err(error_response(StatusCode::BAD_GATEWAY, e)),
    }
}
