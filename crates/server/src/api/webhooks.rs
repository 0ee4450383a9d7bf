//! Delivery receipt webhook.

use axum::{extract::State, http::StatusCode, Json};
use courier_core::{ReceiptAck, ReceiptError, ReceiptPayload};
use std::sync::Arc;

use super::handlers::{error_response, ApiError};
use crate::state::AppState;

/// Accept a delivery receipt from the vendor
///
/// The receipt is queued, not persisted, when this returns 202. A full
/// queue answers 503 so the vendor retries later.
pub async fn delivery_receipt(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ReceiptPayload>,
) -> Result<(StatusCode, Json<ReceiptAck>), ApiError> {
    match state.ingestor().receive(payload) {
        Ok(ack) => Ok((StatusCode::ACCEPTED, Json(ack))),
        Err(e @ ReceiptError::InvalidPayload(_)) => Err(error_response(StatusCode::BAD_REQUEST, e)),
        Err(e @ (ReceiptError::QueueFull | ReceiptError::Closed)) => {
            Err(error_response(StatusCode::SERVICE_UNAVAILABLE, e))
        }
    }
}
