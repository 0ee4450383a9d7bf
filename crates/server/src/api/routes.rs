use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::{campaigns, customers, delivery, handlers, middleware::metrics_middleware, vendor, webhooks};
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // API routes
    let api_routes = Router::new()
        // Health and config
        .route("/health", get(handlers::health))
        .route("/config", get(handlers::get_config))
        // Campaigns
        .route("/campaigns", post(campaigns::create_campaign))
        .route("/campaigns/{id}", get(campaigns::get_campaign))
        .route("/campaigns/{id}/log", get(campaigns::get_campaign_log))
        .route("/campaigns/{id}/schedule", post(campaigns::schedule_campaign))
        .route("/campaigns/{id}/deliver", post(campaigns::deliver_campaign))
        .route("/campaigns/{id}/cancel", post(campaigns::cancel_campaign))
        // Audience seeding
        .route("/customers", post(customers::create_customer))
        .route("/segments", post(customers::create_segment))
        // Vendor protocol
        .route("/webhooks/delivery-receipt", post(webhooks::delivery_receipt))
        .route("/vendor/send", post(vendor::send))
        // Pipeline status
        .route("/delivery/status", get(delivery::get_status))
        .route_layer(middleware::from_fn(metrics_middleware))
        .with_state(state);

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/metrics", get(handlers::get_metrics))
        .layer(TraceLayer::new_for_http())
}
