//! Payment status lookup, proxied from the processor.
//!
//! The confirmation flow on the client polls this instead of talking to
//! Stripe directly, so the secret key never leaves the server.

use axum::extract::State;
use serde::Deserialize;

use crate::db::AppState;
use crate::error::{AppError, Result};
use crate::extractors::Json;
use crate::payments::StripeIntent;

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub payment_intent_id: Option<String>,
    pub setup_intent_id: Option<String>,
}

pub async fn payment_status(
    State(state): State<AppState>,
    Json(req): Json<StatusRequest>,
) -> Result<Json<StripeIntent>> {
    let intent = match (req.payment_intent_id.as_deref(), req.setup_intent_id.as_deref()) {
        (Some(id), _) => state.stripe.get_payment_intent(id).await?,
        (None, Some(id)) => state.stripe.get_setup_intent(id).await?,
        (None, None) => {
            return Err(AppError::BadRequest(
                "payment_intent_id or setup_intent_id is required".into(),
            ));
        }
    };
    Ok(Json(intent))
}
