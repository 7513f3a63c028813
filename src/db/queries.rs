use chrono::Utc;
use rusqlite::{params, Connection};

use crate::error::Result;
use crate::id::EntityType;
use crate::models::*;

use super::from_row::{
    query_all, query_one, CHECKOUT_SESSION_COLS, COURSE_COLS, CUSTOMER_COLS, ENROLLMENT_COLS,
    SUBSCRIPTION_COLS,
};

fn now() -> i64 {
    Utc::now().timestamp()
}

// ============ Customers ============

/// Record the user -> Stripe customer mapping. Immutable once created.
pub fn create_customer(
    conn: &Connection,
    user_id: &str,
    stripe_customer_id: &str,
) -> Result<Customer> {
    let id = EntityType::Customer.gen_id();
    let created_at = now();

    conn.execute(
        "INSERT INTO customers (id, user_id, stripe_customer_id, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![&id, user_id, stripe_customer_id, created_at],
    )?;

    Ok(Customer {
        id,
        user_id: user_id.to_string(),
        stripe_customer_id: stripe_customer_id.to_string(),
        created_at,
    })
}

pub fn get_customer_by_user(conn: &Connection, user_id: &str) -> Result<Option<Customer>> {
    query_one(
        conn,
        &format!("SELECT {} FROM customers WHERE user_id = ?1", CUSTOMER_COLS),
        &[&user_id],
    )
}

// ============ Courses ============

pub fn create_course(conn: &Connection, input: &CreateCourse) -> Result<Course> {
    let id = EntityType::Course.gen_id();
    let created_at = now();

    conn.execute(
        "INSERT INTO courses (id, title, stripe_price_id, price_cents, access_days, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            &id,
            &input.title,
            &input.stripe_price_id,
            input.price_cents,
            input.access_days,
            created_at
        ],
    )?;

    Ok(Course {
        id,
        title: input.title.clone(),
        stripe_price_id: input.stripe_price_id.clone(),
        price_cents: input.price_cents,
        access_days: input.access_days,
        created_at,
    })
}

pub fn get_course_by_id(conn: &Connection, id: &str) -> Result<Option<Course>> {
    query_one(
        conn,
        &format!("SELECT {} FROM courses WHERE id = ?1", COURSE_COLS),
        &[&id],
    )
}

pub fn list_courses(conn: &Connection) -> Result<Vec<Course>> {
    query_all(
        conn,
        &format!("SELECT {} FROM courses ORDER BY created_at", COURSE_COLS),
        &[],
    )
}

// ============ Checkout sessions ============

/// Persist a pending checkout session. Only called after the Stripe call
/// succeeded, so a failed processor call never leaves a half-committed row.
pub fn create_checkout_session(
    conn: &Connection,
    input: &CreateCheckoutSession,
) -> Result<CheckoutSession> {
    let created_at = now();

    conn.execute(
        "INSERT INTO checkout_sessions
         (id, user_id, kind, course_id, tier, billing_interval, status,
          stripe_session_id, stripe_payment_intent_id, metadata, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', ?7, ?8, ?9, ?10)",
        params![
            &input.id,
            &input.user_id,
            input.kind.as_str(),
            &input.course_id,
            &input.tier,
            &input.billing_interval,
            &input.stripe_session_id,
            &input.stripe_payment_intent_id,
            &input.metadata,
            created_at
        ],
    )?;

    Ok(CheckoutSession {
        id: input.id.clone(),
        user_id: input.user_id.clone(),
        kind: input.kind,
        course_id: input.course_id.clone(),
        tier: input.tier.clone(),
        billing_interval: input.billing_interval.clone(),
        status: CheckoutStatus::Pending,
        stripe_session_id: input.stripe_session_id.clone(),
        stripe_payment_intent_id: input.stripe_payment_intent_id.clone(),
        metadata: input.metadata.clone(),
        created_at,
        completed_at: None,
    })
}

pub fn get_checkout_session(conn: &Connection, id: &str) -> Result<Option<CheckoutSession>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM checkout_sessions WHERE id = ?1",
            CHECKOUT_SESSION_COLS
        ),
        &[&id],
    )
}

pub fn get_checkout_session_by_stripe_id(
    conn: &Connection,
    stripe_session_id: &str,
) -> Result<Option<CheckoutSession>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM checkout_sessions WHERE stripe_session_id = ?1",
            CHECKOUT_SESSION_COLS
        ),
        &[&stripe_session_id],
    )
}

/// Mark a session completed and record the payment intent learned from the
/// webhook (subscription-mode sessions don't know it at creation time).
pub fn complete_checkout_session(
    conn: &Connection,
    id: &str,
    payment_intent_id: Option<&str>,
) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE checkout_sessions
         SET status = 'completed',
             completed_at = ?2,
             stripe_payment_intent_id = COALESCE(?3, stripe_payment_intent_id)
         WHERE id = ?1 AND status = 'pending'",
        params![id, now(), payment_intent_id],
    )?;
    Ok(affected > 0)
}

// ============ Dedupe ledger ============

/// Atomically check-and-record a processed external id.
///
/// Returns true if this call recorded the id (caller should apply the
/// transition), false if it was already present (idempotent no-op). The
/// UNIQUE constraint makes this safe under concurrent delivery: INSERT OR
/// IGNORE leaves no window between check and record. Run inside the same
/// transaction as the state transition so a failed write rolls the record
/// back and the processor's redelivery can retry.
pub fn try_record_processed(conn: &Connection, source: &str, external_id: &str) -> Result<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO processed_events (id, source, external_id, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![EntityType::ProcessedEvent.gen_id(), source, external_id, now()],
    )?;
    Ok(inserted > 0)
}

/// Grant-level dedupe namespace shared by the webhook and manual paths.
pub const SOURCE_PAYMENT_INTENT: &str = "payment_intent";
/// Event-level dedupe namespace for webhook deliveries.
pub const SOURCE_STRIPE_EVENT: &str = "stripe";

// ============ Subscriptions ============

pub fn get_subscription_by_user(conn: &Connection, user_id: &str) -> Result<Option<Subscription>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM subscriptions WHERE user_id = ?1",
            SUBSCRIPTION_COLS
        ),
        &[&user_id],
    )
}

/// Upsert the subscription row from processor-reported data.
///
/// The processor is authoritative: every field in the snapshot overwrites
/// whatever is present, including a provisional period written by the
/// activation guard. UNIQUE(user_id) keeps the row singular.
pub fn upsert_subscription_from_processor(
    conn: &Connection,
    user_id: &str,
    tier: &str,
    snap: &SubscriptionSnapshot,
) -> Result<()> {
    let ts = now();
    conn.execute(
        "INSERT INTO subscriptions
         (id, user_id, tier, status, stripe_subscription_id, stripe_customer_id,
          current_period_start, current_period_end, cancel_at_period_end, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)
         ON CONFLICT(user_id) DO UPDATE SET
             tier = excluded.tier,
             status = excluded.status,
             stripe_subscription_id = excluded.stripe_subscription_id,
             stripe_customer_id = excluded.stripe_customer_id,
             current_period_start = excluded.current_period_start,
             current_period_end = excluded.current_period_end,
             cancel_at_period_end = excluded.cancel_at_period_end,
             updated_at = excluded.updated_at",
        params![
            EntityType::Subscription.gen_id(),
            user_id,
            tier,
            snap.status.as_str(),
            &snap.stripe_subscription_id,
            &snap.stripe_customer_id,
            snap.current_period_start,
            snap.current_period_end,
            snap.cancel_at_period_end,
            ts
        ],
    )?;
    Ok(())
}

/// Overwrite processor-owned fields by Stripe subscription id.
/// Used for lifecycle events that don't carry our user id.
pub fn update_subscription_by_stripe_id(
    conn: &Connection,
    stripe_subscription_id: &str,
    snap: &SubscriptionSnapshot,
) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE subscriptions SET
             status = ?2,
             current_period_start = COALESCE(?3, current_period_start),
             current_period_end = COALESCE(?4, current_period_end),
             cancel_at_period_end = ?5,
             updated_at = ?6
         WHERE stripe_subscription_id = ?1",
        params![
            stripe_subscription_id,
            snap.status.as_str(),
            snap.current_period_start,
            snap.current_period_end,
            snap.cancel_at_period_end,
            now()
        ],
    )?;
    Ok(affected > 0)
}

pub fn set_subscription_status_by_stripe_id(
    conn: &Connection,
    stripe_subscription_id: &str,
    status: SubscriptionStatus,
) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE subscriptions SET status = ?2, updated_at = ?3
         WHERE stripe_subscription_id = ?1",
        params![stripe_subscription_id, status.as_str(), now()],
    )?;
    Ok(affected > 0)
}

/// Guard-applied activation with a locally computed provisional period.
///
/// Never shortens an existing period and never downgrades an active row:
/// whichever grant path committed first wins, the second write is an
/// equivalent overwrite at most. Processor-reported bounds from a later
/// webhook replace the provisional period.
pub fn activate_subscription_provisional(
    conn: &Connection,
    user_id: &str,
    tier: &str,
    period_seconds: i64,
) -> Result<()> {
    let ts = now();
    let period_end = ts + period_seconds;
    conn.execute(
        "INSERT INTO subscriptions
         (id, user_id, tier, status, current_period_start, current_period_end,
          cancel_at_period_end, created_at, updated_at)
         VALUES (?1, ?2, ?3, 'active', ?4, ?5, 0, ?4, ?4)
         ON CONFLICT(user_id) DO UPDATE SET
             tier = excluded.tier,
             status = 'active',
             current_period_start = COALESCE(subscriptions.current_period_start, excluded.current_period_start),
             current_period_end = MAX(COALESCE(subscriptions.current_period_end, 0), excluded.current_period_end),
             updated_at = excluded.updated_at",
        params![EntityType::Subscription.gen_id(), user_id, tier, ts, period_end],
    )?;
    Ok(())
}

// ============ Enrollments ============

pub fn get_enrollment(
    conn: &Connection,
    user_id: &str,
    course_id: &str,
) -> Result<Option<Enrollment>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM enrollments WHERE user_id = ?1 AND course_id = ?2",
            ENROLLMENT_COLS
        ),
        &[&user_id, &course_id],
    )
}

/// Create or re-activate an enrollment. A duplicate grant extends the
/// expiry to the later of the two values instead of stacking.
pub fn upsert_enrollment(
    conn: &Connection,
    user_id: &str,
    course_id: &str,
    expires_at: Option<i64>,
) -> Result<()> {
    let ts = now();
    conn.execute(
        "INSERT INTO enrollments (id, user_id, course_id, status, enrolled_at, expires_at)
         VALUES (?1, ?2, ?3, 'active', ?4, ?5)
         ON CONFLICT(user_id, course_id) DO UPDATE SET
             status = 'active',
             expires_at = CASE
                 WHEN excluded.expires_at IS NULL OR enrollments.expires_at IS NULL THEN NULL
                 ELSE MAX(enrollments.expires_at, excluded.expires_at)
             END",
        params![EntityType::Enrollment.gen_id(), user_id, course_id, ts, expires_at],
    )?;
    Ok(())
}

// ============ Entitlement reads ============

/// Whether the user currently has tier access. Reflects the latest
/// committed write from either grant path.
pub fn subscription_is_active(conn: &Connection, user_id: &str) -> Result<bool> {
    let ts = now();
    Ok(get_subscription_by_user(conn, user_id)?
        .map(|s| {
            s.status.grants_access() && s.current_period_end.map(|end| end >= ts).unwrap_or(true)
        })
        .unwrap_or(false))
}

/// The user's current tier name, if their subscription grants access.
pub fn current_tier(conn: &Connection, user_id: &str) -> Result<Option<String>> {
    let ts = now();
    Ok(get_subscription_by_user(conn, user_id)?
        .filter(|s| {
            s.status.grants_access() && s.current_period_end.map(|end| end >= ts).unwrap_or(true)
        })
        .map(|s| s.tier))
}

/// Whether the user can access a course: either through a non-expired
/// enrollment or through an active subscription (unlimited tier).
pub fn has_course_access(conn: &Connection, user_id: &str, course_id: &str) -> Result<bool> {
    if subscription_is_active(conn, user_id)? {
        return Ok(true);
    }
    let ts = now();
    Ok(get_enrollment(conn, user_id, course_id)?
        .map(|e| {
            e.status == EnrollmentStatus::Active
                && e.expires_at.map(|end| end >= ts).unwrap_or(true)
        })
        .unwrap_or(false))
}
