pub mod activate;
pub mod checkout;
pub mod entitlements;
pub mod status;
pub mod webhook;

use axum::{
    routing::{get, post},
    Router,
};
use serde_json::json;

use crate::config::RateLimits;
use crate::db::AppState;
use crate::rate_limit;

/// Public API surface.
///
/// The strict tier fronts the endpoints that reach the processor or take
/// the activation lock; everything else runs on the standard tier. The
/// webhook and health endpoints are deliberately unthrottled: Stripe's
/// redelivery bursts must never be rate limited into a retry storm.
pub fn router(limits: &RateLimits) -> Router<AppState> {
    let strict = Router::new()
        .route("/checkout", post(checkout::create_checkout))
        .route("/activate", post(activate::activate))
        .layer(rate_limit::strict_layer(limits.strict));

    let standard = Router::new()
        .route("/payment-status", post(status::payment_status))
        .route("/me/entitlements", get(entitlements::my_entitlements))
        .route(
            "/courses/{course_id}/access",
            get(entitlements::course_access),
        )
        .layer(rate_limit::standard_layer(limits.standard));

    Router::new()
        .route("/health", get(health))
        .route("/webhooks/stripe", post(webhook::handle_stripe_webhook))
        .merge(strict)
        .merge(standard)
}

async fn health() -> axum::Json<serde_json::Value> {
    axum::Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
