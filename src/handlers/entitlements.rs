//! Entitlement reads. Pure queries over the store; the answer always
//! reflects the latest committed write from either grant path.

use axum::extract::State;
use serde::Serialize;

use crate::db::{queries, AppState};
use crate::error::{AppError, Result};
use crate::extractors::{Json, Path, UserId};
use crate::id::is_valid_prefixed_id;

#[derive(Debug, Serialize)]
pub struct EntitlementsResponse {
    pub is_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_period_end: Option<i64>,
    pub cancel_at_period_end: bool,
}

pub async fn my_entitlements(
    State(state): State<AppState>,
    UserId(user_id): UserId,
) -> Result<Json<EntitlementsResponse>> {
    let conn = state.db.get()?;
    let is_active = queries::subscription_is_active(&conn, &user_id)?;
    let subscription = queries::get_subscription_by_user(&conn, &user_id)?;

    Ok(Json(EntitlementsResponse {
        is_active,
        tier_name: if is_active {
            subscription.as_ref().map(|s| s.tier.clone())
        } else {
            None
        },
        current_period_end: subscription.as_ref().and_then(|s| s.current_period_end),
        cancel_at_period_end: subscription
            .as_ref()
            .map(|s| s.cancel_at_period_end)
            .unwrap_or(false),
    }))
}

#[derive(Debug, Serialize)]
pub struct CourseAccessResponse {
    pub has_access: bool,
}

pub async fn course_access(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(course_id): Path<String>,
) -> Result<Json<CourseAccessResponse>> {
    // Cheap format check before the database is consulted.
    if !is_valid_prefixed_id(&course_id) {
        return Err(AppError::BadRequest("Invalid course id".into()));
    }
    let conn = state.db.get()?;
    let has_access = queries::has_course_access(&conn, &user_id, &course_id)?;
    Ok(Json(CourseAccessResponse { has_access }))
}
