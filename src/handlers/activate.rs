//! Manual activation: the fallback grant path when the webhook is late.
//!
//! The payment intent is verified with the processor before anything is
//! granted, so a fabricated intent id cannot mint access. The grant itself
//! goes through the activation guard, which dedupes against the same
//! ledger the webhook writes to.

use axum::extract::State;
use serde::{Deserialize, Serialize};

use crate::activation::{ActivationOutcome, ActivationTarget};
use crate::db::{queries, AppState};
use crate::error::{AppError, OptionExt, Result};
use crate::extractors::{Json, UserId};
use crate::models::{BillingInterval, PurchaseKind, UNLIMITED_TIER};
use crate::retry::RetryPolicy;

#[derive(Debug, Deserialize)]
pub struct ActivateRequest {
    pub kind: PurchaseKind,
    pub payment_intent_id: String,
    /// Required when kind is `course`.
    pub course_id: Option<String>,
    /// Required when kind is `subscription`.
    pub interval: Option<BillingInterval>,
}

#[derive(Debug, Serialize)]
pub struct ActivateResponse {
    /// "applied" when this call committed the grant, "already_applied"
    /// when the webhook or an earlier call got there first.
    pub status: &'static str,
}

pub async fn activate(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Json(req): Json<ActivateRequest>,
) -> Result<Json<ActivateResponse>> {
    if req.payment_intent_id.trim().is_empty() {
        return Err(AppError::BadRequest("payment_intent_id is required".into()));
    }

    let target = match req.kind {
        PurchaseKind::Subscription => {
            let interval = req.interval.ok_or_else(|| {
                AppError::BadRequest("interval is required for subscription activation".into())
            })?;
            ActivationTarget::Subscription {
                tier: UNLIMITED_TIER.to_string(),
                interval,
            }
        }
        PurchaseKind::Course => {
            let course_id = req.course_id.as_deref().ok_or_else(|| {
                AppError::BadRequest("course_id is required for course activation".into())
            })?;
            let course = {
                let conn = state.db.get()?;
                queries::get_course_by_id(&conn, course_id)?.or_not_found("Course")?
            };
            ActivationTarget::Course {
                course_id: course.id,
                access_days: course.access_days,
            }
        }
    };

    // Never grant on the caller's word alone.
    let intent = state.stripe.get_payment_intent(&req.payment_intent_id).await?;
    if intent.status != "succeeded" {
        return Err(AppError::Conflict(format!(
            "Payment is not complete (status: {})",
            intent.status
        )));
    }

    let outcome = state
        .activation
        .activate_with_retry(
            &state.db,
            &user_id,
            &target,
            &req.payment_intent_id,
            RetryPolicy::default(),
        )
        .await?;

    let status = match outcome {
        ActivationOutcome::Applied => "applied",
        ActivationOutcome::AlreadyApplied => "already_applied",
        // activate_with_retry converts exhausted contention into an error.
        ActivationOutcome::Busy => {
            return Err(AppError::Conflict(
                "Activation already in progress, try again shortly".into(),
            ));
        }
    };

    Ok(Json(ActivateResponse { status }))
}
