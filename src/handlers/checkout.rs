//! Checkout initiation.
//!
//! Order of operations matters here: every precondition that can fail is
//! checked before the processor is contacted, and the local session row is
//! written only after the processor call succeeds. A failed Stripe call
//! therefore leaves no local state at all, and a retried submit with the
//! same idempotency key resolves to the same processor-side session.

use axum::extract::State;
use serde::{Deserialize, Serialize};

use crate::db::{queries, AppState};
use crate::error::{AppError, OptionExt, Result};
use crate::extractors::{Json, UserId};
use crate::id::EntityType;
use crate::models::{BillingInterval, Course, CreateCheckoutSession, PurchaseKind, UNLIMITED_TIER};
use crate::payments::{CheckoutMode, CreateCheckout};

#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    pub kind: PurchaseKind,
    /// Required when kind is `course`.
    pub course_id: Option<String>,
    /// Required when kind is `subscription`.
    pub interval: Option<BillingInterval>,
    /// Client-generated key scoped to one user action. Retries of the same
    /// submit reuse it and get the same processor session back.
    pub idempotency_key: String,
}

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub session_id: String,
    pub redirect_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
}

/// Purchase terms resolved before the processor call.
enum Target {
    Course(Course),
    Subscription(BillingInterval),
}

pub async fn create_checkout(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Json(req): Json<CheckoutRequest>,
) -> Result<Json<CheckoutResponse>> {
    if req.idempotency_key.trim().is_empty() {
        return Err(AppError::BadRequest("idempotency_key is required".into()));
    }

    // Preconditions, all against local state. The connection is scoped so
    // it is returned to the pool before any await on the processor.
    let target = {
        let conn = state.db.get()?;
        match req.kind {
            PurchaseKind::Course => {
                let course_id = req.course_id.as_deref().ok_or_else(|| {
                    AppError::BadRequest("course_id is required for course checkouts".into())
                })?;
                let course =
                    queries::get_course_by_id(&conn, course_id)?.or_not_found("Course")?;
                if course.price_cents == 0 {
                    return Err(AppError::Conflict(
                        "Course is free and does not require checkout".into(),
                    ));
                }
                if queries::has_course_access(&conn, &user_id, &course.id)? {
                    return Err(AppError::Conflict("Course is already accessible".into()));
                }
                Target::Course(course)
            }
            PurchaseKind::Subscription => {
                let interval = req.interval.ok_or_else(|| {
                    AppError::BadRequest(
                        "interval is required for subscription checkouts".into(),
                    )
                })?;
                if queries::subscription_is_active(&conn, &user_id)? {
                    return Err(AppError::Conflict("Subscription is already active".into()));
                }
                Target::Subscription(interval)
            }
        }
    };

    let stripe_customer_id = resolve_customer(&state, &user_id).await?;

    // Generated up front so the metadata snapshot can carry our own id.
    let session_id = EntityType::CheckoutSession.gen_id();
    let access_days;
    let (mode, price_id, metadata): (CheckoutMode, &str, Vec<(&str, &str)>) = match &target {
        Target::Course(course) => {
            access_days = course.access_days.to_string();
            (
                CheckoutMode::Payment,
                course.stripe_price_id.as_str(),
                vec![
                    ("session_id", session_id.as_str()),
                    ("user_id", user_id.as_str()),
                    ("kind", PurchaseKind::Course.as_str()),
                    ("course_id", course.id.as_str()),
                    ("access_days", access_days.as_str()),
                ],
            )
        }
        Target::Subscription(interval) => (
            CheckoutMode::Subscription,
            match interval {
                BillingInterval::Month => state.tier_prices.monthly.as_str(),
                BillingInterval::Year => state.tier_prices.yearly.as_str(),
            },
            vec![
                ("session_id", session_id.as_str()),
                ("user_id", user_id.as_str()),
                ("kind", PurchaseKind::Subscription.as_str()),
                ("tier", UNLIMITED_TIER),
            ],
        ),
    };

    let success_url = format!("{}?session_id={{CHECKOUT_SESSION_ID}}", state.success_url);
    let created = state
        .stripe
        .create_checkout_session(&CreateCheckout {
            mode,
            customer_id: &stripe_customer_id,
            price_id,
            idempotency_key: &req.idempotency_key,
            success_url: &success_url,
            cancel_url: &state.cancel_url,
            metadata: &metadata,
        })
        .await?;

    // Snapshot of the purchase terms, authoritative for what the webhook
    // will grant later.
    let snapshot = serde_json::to_string(&serde_json::Value::Object(
        metadata
            .iter()
            .map(|(k, v)| (k.to_string(), serde_json::Value::String(v.to_string())))
            .collect(),
    ))?;

    let (course_id, tier, billing_interval) = match &target {
        Target::Course(course) => (Some(course.id.clone()), None, None),
        Target::Subscription(interval) => (
            None,
            Some(UNLIMITED_TIER.to_string()),
            Some(interval.as_str().to_string()),
        ),
    };

    let session = {
        let conn = state.db.get()?;
        persist_checkout_session(
            &conn,
            &CreateCheckoutSession {
                id: session_id,
                user_id: user_id.clone(),
                kind: req.kind,
                course_id,
                tier,
                billing_interval,
                stripe_session_id: created.id.clone(),
                stripe_payment_intent_id: created.payment_intent.clone(),
                metadata: snapshot,
            },
        )?
    };

    tracing::info!(
        "Checkout created: user={}, kind={}, session={}",
        user_id,
        req.kind,
        session.id
    );

    Ok(Json(CheckoutResponse {
        session_id: session.id,
        redirect_url: created.url,
        client_secret: created.client_secret,
    }))
}

/// Persist the local session row for a processor-side session.
///
/// A retried submit reuses its idempotency key, so Stripe replays the same
/// session object; the first attempt may have already written the row. The
/// UNIQUE constraint on stripe_session_id catches that replay, and the
/// existing row is the correct answer for both calls.
pub fn persist_checkout_session(
    conn: &rusqlite::Connection,
    input: &CreateCheckoutSession,
) -> Result<crate::models::CheckoutSession> {
    match queries::create_checkout_session(conn, input) {
        Ok(session) => Ok(session),
        Err(AppError::Database(rusqlite::Error::SqliteFailure(e, _)))
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            queries::get_checkout_session_by_stripe_id(conn, &input.stripe_session_id)?
                .ok_or_else(|| AppError::Internal("checkout session vanished".into()))
        }
        Err(e) => Err(e),
    }
}

/// Resolve the Stripe customer for a user, creating it on first purchase.
/// Creation is idempotent on the processor side (keyed by user id), so a
/// concurrent first purchase maps to the same customer object.
async fn resolve_customer(state: &AppState, user_id: &str) -> Result<String> {
    {
        let conn = state.db.get()?;
        if let Some(customer) = queries::get_customer_by_user(&conn, user_id)? {
            return Ok(customer.stripe_customer_id);
        }
    }

    let stripe_customer_id = state.stripe.create_customer(user_id).await?;

    let conn = state.db.get()?;
    match queries::create_customer(&conn, user_id, &stripe_customer_id) {
        Ok(_) => Ok(stripe_customer_id),
        // A concurrent request inserted the mapping first. Both calls got
        // the same processor customer back, so read the committed row.
        Err(AppError::Database(rusqlite::Error::SqliteFailure(e, _)))
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            queries::get_customer_by_user(&conn, user_id)?
                .map(|c| c.stripe_customer_id)
                .ok_or_else(|| AppError::Internal("customer mapping vanished".into()))
        }
        Err(e) => Err(e),
    }
}
