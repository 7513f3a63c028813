//! Stripe webhook ingestion.
//!
//! Contract with the processor: 2xx acknowledges the delivery, anything
//! else gets redelivered with backoff. So a duplicate delivery must return
//! 200 with zero side effects, and a local write failure must return 5xx so
//! the redelivery can retry the transition.
//!
//! The signature is verified against the raw body before anything is
//! parsed; a payload that fails verification performs no reads or writes.
//! Every state transition runs in one SQLite transaction together with the
//! dedupe-ledger insert for the event id, so a transition is applied
//! exactly once no matter how many times the event is delivered.

use axum::{body::Bytes, extract::State, http::HeaderMap};

use crate::db::{queries, AppState};
use crate::error::{AppError, Result};
use crate::extractors::Json;
use crate::models::{
    CheckoutSession, PurchaseKind, SubscriptionSnapshot, SubscriptionStatus, UNLIMITED_TIER,
};
use crate::payments::{
    StripeCheckoutSessionObject, StripeInvoice, StripeSubscription, StripeWebhookEvent,
};

#[derive(Debug, serde::Serialize)]
pub struct WebhookAck {
    pub received: bool,
}

pub async fn handle_stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>> {
    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::BadRequest("Missing stripe-signature header".into()))?;

    let valid = state
        .stripe
        .verify_webhook_signature(&body, signature)
        .map_err(|e| {
            tracing::warn!("Webhook signature malformed: {}", e);
            AppError::BadRequest("Invalid signature".into())
        })?;
    if !valid {
        tracing::warn!("Webhook signature mismatch");
        return Err(AppError::BadRequest("Invalid signature".into()));
    }

    let event: StripeWebhookEvent = serde_json::from_slice(&body)?;
    tracing::debug!("Webhook received: id={}, type={}", event.id, event.event_type);

    match event.event_type.as_str() {
        "checkout.session.completed" => on_checkout_completed(&state, &event).await?,
        "invoice.payment_succeeded" => on_invoice_paid(&state, &event).await?,
        "invoice.payment_failed" => on_invoice_failed(&state, &event)?,
        "customer.subscription.updated" => on_subscription_updated(&state, &event)?,
        "customer.subscription.deleted" => on_subscription_deleted(&state, &event)?,
        other => {
            // Unknown types are acknowledged so new Stripe event types
            // never cause a retry storm.
            tracing::debug!("Ignoring webhook type: {}", other);
        }
    }

    Ok(Json(WebhookAck { received: true }))
}

fn snapshot_from(sub: &StripeSubscription) -> SubscriptionSnapshot {
    SubscriptionSnapshot {
        stripe_subscription_id: Some(sub.id.clone()),
        stripe_customer_id: sub.customer.clone(),
        status: SubscriptionStatus::from_stripe(&sub.status),
        current_period_start: sub.current_period_start,
        current_period_end: sub.current_period_end,
        cancel_at_period_end: sub.cancel_at_period_end,
    }
}

async fn on_checkout_completed(state: &AppState, event: &StripeWebhookEvent) -> Result<()> {
    let session: StripeCheckoutSessionObject =
        serde_json::from_value(event.data.object.clone())?;

    if session.payment_status != "paid" {
        tracing::debug!(
            "Checkout {} completed without payment (status: {}), ignoring",
            session.id,
            session.payment_status
        );
        return Ok(());
    }

    // Subscription-mode sessions carry the subscription id; fetch the
    // authoritative object before opening the transaction.
    let stripe_sub = match session.subscription.as_deref() {
        Some(sub_id) => Some(state.stripe.get_subscription(sub_id).await?),
        None => None,
    };

    let mut conn = state.db.get()?;
    let tx = conn.transaction()?;

    if !queries::try_record_processed(&tx, queries::SOURCE_STRIPE_EVENT, &event.id)? {
        tracing::debug!("Duplicate webhook event {}, no-op", event.id);
        return Ok(());
    }

    let local = queries::get_checkout_session_by_stripe_id(&tx, &session.id)?;

    // The local row's metadata snapshot is authoritative for what was
    // purchased; the processor's echo of our metadata is the fallback when
    // the row is missing (e.g. a different instance's DB in dev).
    let user_id = local
        .as_ref()
        .map(|s| s.user_id.clone())
        .or_else(|| session.metadata.user_id.clone());
    let Some(user_id) = user_id else {
        tracing::warn!(
            "Checkout {} completed but no local session or user metadata, skipping",
            session.id
        );
        tx.commit()?;
        return Ok(());
    };

    match &stripe_sub {
        Some(sub) => {
            let tier = local
                .as_ref()
                .and_then(|s| s.tier.clone())
                .or_else(|| session.metadata.tier.clone())
                .unwrap_or_else(|| UNLIMITED_TIER.to_string());
            queries::upsert_subscription_from_processor(&tx, &user_id, &tier, &snapshot_from(sub))?;
        }
        None => {
            let course_id = local
                .as_ref()
                .and_then(|s| s.course_id.clone())
                .or_else(|| session.metadata.course_id.clone());
            let Some(course_id) = course_id else {
                tracing::warn!("Paid checkout {} has no course id, skipping grant", session.id);
                tx.commit()?;
                return Ok(());
            };
            let expires_at = access_days(local.as_ref(), &session)
                .filter(|days| *days > 0)
                .map(|days| chrono::Utc::now().timestamp() + days * 86400);
            queries::upsert_enrollment(&tx, &user_id, &course_id, expires_at)?;
        }
    }

    // Record the payment intent in the grant-level namespace so a later
    // manual activation for the same payment becomes a no-op.
    if let Some(intent) = session.payment_intent.as_deref() {
        queries::try_record_processed(&tx, queries::SOURCE_PAYMENT_INTENT, intent)?;
    }

    if let Some(local) = &local {
        queries::complete_checkout_session(&tx, &local.id, session.payment_intent.as_deref())?;
    }

    tx.commit()?;
    tracing::info!(
        "Checkout completed: user={}, stripe_session={}, mode={}",
        user_id,
        session.id,
        if stripe_sub.is_some() { "subscription" } else { "payment" }
    );
    Ok(())
}

/// Access window for a course purchase, read from the snapshot taken at
/// checkout creation rather than the live catalog.
fn access_days(
    local: Option<&CheckoutSession>,
    session: &StripeCheckoutSessionObject,
) -> Option<i64> {
    let from_snapshot = local
        .filter(|s| s.kind == PurchaseKind::Course)
        .and_then(|s| serde_json::from_str::<serde_json::Value>(&s.metadata).ok())
        .and_then(|v| v.get("access_days").and_then(|d| d.as_str().map(String::from)));
    from_snapshot
        .or_else(|| session.metadata.access_days.clone())
        .and_then(|d| d.parse().ok())
}

async fn on_invoice_paid(state: &AppState, event: &StripeWebhookEvent) -> Result<()> {
    let invoice: StripeInvoice = serde_json::from_value(event.data.object.clone())?;
    let Some(sub_id) = invoice.subscription.as_deref() else {
        tracing::debug!("Invoice {} has no subscription, ignoring", invoice.id);
        return Ok(());
    };

    // Renewal periods come from the processor, never computed locally.
    let sub = state.stripe.get_subscription(sub_id).await?;

    let mut conn = state.db.get()?;
    let tx = conn.transaction()?;

    if !queries::try_record_processed(&tx, queries::SOURCE_STRIPE_EVENT, &event.id)? {
        tracing::debug!("Duplicate webhook event {}, no-op", event.id);
        return Ok(());
    }

    let snap = snapshot_from(&sub);
    if !queries::update_subscription_by_stripe_id(&tx, sub_id, &snap)? {
        // The invoice event can arrive before checkout.session.completed.
        // The subscription object echoes our metadata, so create the row
        // from it instead of dropping the renewal.
        match sub.metadata.user_id.as_deref() {
            Some(user_id) => {
                let tier = sub.metadata.tier.as_deref().unwrap_or(UNLIMITED_TIER);
                queries::upsert_subscription_from_processor(&tx, user_id, tier, &snap)?;
            }
            None => {
                tracing::warn!("Invoice paid for unknown subscription {}", sub_id);
            }
        }
    }

    tx.commit()?;
    tracing::info!("Subscription refreshed from invoice: {}", sub_id);
    Ok(())
}

fn on_invoice_failed(state: &AppState, event: &StripeWebhookEvent) -> Result<()> {
    let invoice: StripeInvoice = serde_json::from_value(event.data.object.clone())?;
    let Some(sub_id) = invoice.subscription.as_deref() else {
        tracing::debug!("Invoice {} has no subscription, ignoring", invoice.id);
        return Ok(());
    };

    let mut conn = state.db.get()?;
    let tx = conn.transaction()?;

    if !queries::try_record_processed(&tx, queries::SOURCE_STRIPE_EVENT, &event.id)? {
        tracing::debug!("Duplicate webhook event {}, no-op", event.id);
        return Ok(());
    }

    // past_due removes access immediately; a later successful invoice or
    // subscription.updated flips it back.
    queries::set_subscription_status_by_stripe_id(&tx, sub_id, SubscriptionStatus::PastDue)?;

    tx.commit()?;
    tracing::info!("Subscription marked past_due: {}", sub_id);
    Ok(())
}

fn on_subscription_updated(state: &AppState, event: &StripeWebhookEvent) -> Result<()> {
    let sub: StripeSubscription = serde_json::from_value(event.data.object.clone())?;

    let mut conn = state.db.get()?;
    let tx = conn.transaction()?;

    if !queries::try_record_processed(&tx, queries::SOURCE_STRIPE_EVENT, &event.id)? {
        tracing::debug!("Duplicate webhook event {}, no-op", event.id);
        return Ok(());
    }

    let snap = snapshot_from(&sub);
    if !queries::update_subscription_by_stripe_id(&tx, &sub.id, &snap)? {
        match sub.metadata.user_id.as_deref() {
            Some(user_id) => {
                let tier = sub.metadata.tier.as_deref().unwrap_or(UNLIMITED_TIER);
                queries::upsert_subscription_from_processor(&tx, user_id, tier, &snap)?;
            }
            None => {
                tracing::warn!("Update for unknown subscription {}", sub.id);
            }
        }
    }

    tx.commit()?;
    tracing::info!("Subscription updated: {} -> {}", sub.id, sub.status);
    Ok(())
}

fn on_subscription_deleted(state: &AppState, event: &StripeWebhookEvent) -> Result<()> {
    let sub: StripeSubscription = serde_json::from_value(event.data.object.clone())?;

    let mut conn = state.db.get()?;
    let tx = conn.transaction()?;

    if !queries::try_record_processed(&tx, queries::SOURCE_STRIPE_EVENT, &event.id)? {
        tracing::debug!("Duplicate webhook event {}, no-op", event.id);
        return Ok(());
    }

    // Status transition, never a row deletion: the history stays queryable
    // and a re-subscribe reuses the same row.
    queries::set_subscription_status_by_stripe_id(&tx, &sub.id, SubscriptionStatus::Cancelled)?;

    tx.commit()?;
    tracing::info!("Subscription cancelled: {}", sub.id);
    Ok(())
}
