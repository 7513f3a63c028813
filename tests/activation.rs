//! Activation guard tests: the manual/fallback grant path must apply a
//! payment exactly once, no matter how it races the webhook.

mod common;

use common::*;
use paygate::activation::{ActivationGuard, ActivationOutcome, ActivationTarget};
use paygate::retry::RetryPolicy;

fn sub_target() -> ActivationTarget {
    ActivationTarget::Subscription {
        tier: UNLIMITED_TIER.to_string(),
        interval: BillingInterval::Month,
    }
}

#[test]
fn test_activation_applies_once() {
    let pool = setup_test_pool();
    let guard = ActivationGuard::new();

    let first = guard
        .try_activate(&pool, "user_1", &sub_target(), "pi_test_1")
        .expect("activation should succeed");
    assert_eq!(first, ActivationOutcome::Applied);

    let conn = pool.get().expect("conn");
    let sub = queries::get_subscription_by_user(&conn, "user_1")
        .expect("query should succeed")
        .expect("subscription should exist");
    assert_eq!(sub.status, SubscriptionStatus::Active);
    let first_end = sub.current_period_end.expect("provisional period end");
    drop(conn);

    // Second click with the same payment intent: no grant, no extension.
    let second = guard
        .try_activate(&pool, "user_1", &sub_target(), "pi_test_1")
        .expect("activation should succeed");
    assert_eq!(second, ActivationOutcome::AlreadyApplied);

    let conn = pool.get().expect("conn");
    let sub = queries::get_subscription_by_user(&conn, "user_1")
        .expect("query should succeed")
        .expect("subscription should exist");
    assert_eq!(
        sub.current_period_end,
        Some(first_end),
        "Repeated activation must never extend access"
    );
}

/// The webhook path records the payment intent in the same ledger, so a
/// manual activation arriving after it is a no-op.
#[test]
fn test_webhook_winning_the_race_makes_activation_a_noop() {
    let pool = setup_test_pool();
    let guard = ActivationGuard::new();

    {
        let conn = pool.get().expect("conn");
        assert!(queries::try_record_processed(
            &conn,
            queries::SOURCE_PAYMENT_INTENT,
            "pi_test_1"
        )
        .expect("record should succeed"));
    }

    let outcome = guard
        .try_activate(&pool, "user_1", &sub_target(), "pi_test_1")
        .expect("activation should succeed");
    assert_eq!(outcome, ActivationOutcome::AlreadyApplied);

    let conn = pool.get().expect("conn");
    assert!(
        queries::get_subscription_by_user(&conn, "user_1")
            .expect("query should succeed")
            .is_none(),
        "Guard must not write when the intent is already in the ledger"
    );
}

/// A fresh guard instance (new process) still defers to the persisted
/// ledger, not its in-memory set.
#[test]
fn test_dedupe_survives_guard_restart() {
    let pool = setup_test_pool();

    let first = ActivationGuard::new()
        .try_activate(&pool, "user_1", &sub_target(), "pi_test_1")
        .expect("activation should succeed");
    assert_eq!(first, ActivationOutcome::Applied);

    let second = ActivationGuard::new()
        .try_activate(&pool, "user_1", &sub_target(), "pi_test_1")
        .expect("activation should succeed");
    assert_eq!(second, ActivationOutcome::AlreadyApplied);
}

#[test]
fn test_course_activation_creates_enrollment() {
    let pool = setup_test_pool();
    let guard = ActivationGuard::new();

    let course_id = {
        let conn = pool.get().expect("conn");
        create_test_course(&conn, "Guard Course", 4900).id
    };

    let target = ActivationTarget::Course {
        course_id: course_id.clone(),
        access_days: 30,
    };

    let outcome = guard
        .try_activate(&pool, "user_1", &target, "pi_course_1")
        .expect("activation should succeed");
    assert_eq!(outcome, ActivationOutcome::Applied);

    let conn = pool.get().expect("conn");
    let enrollment = queries::get_enrollment(&conn, "user_1", &course_id)
        .expect("query should succeed")
        .expect("enrollment should exist");
    assert_eq!(enrollment.status, EnrollmentStatus::Active);
    let expires = enrollment.expires_at.expect("bounded access window");
    assert!(expires > now() + 29 * 86400 && expires <= now() + 31 * 86400);
}

/// The guard's provisional period must never shorten what the processor
/// already reported.
#[test]
fn test_provisional_period_never_shrinks_processor_period() {
    let pool = setup_test_pool();
    let guard = ActivationGuard::new();

    let far_end = now() + 365 * 86400;
    {
        let conn = pool.get().expect("conn");
        queries::upsert_subscription_from_processor(
            &conn,
            "user_1",
            UNLIMITED_TIER,
            &active_snapshot("sub_test_1", far_end),
        )
        .expect("upsert should succeed");
    }

    // A different payment intent, so the ledger does not short-circuit.
    let outcome = guard
        .try_activate(&pool, "user_1", &sub_target(), "pi_other")
        .expect("activation should succeed");
    assert_eq!(outcome, ActivationOutcome::Applied);

    let conn = pool.get().expect("conn");
    let sub = queries::get_subscription_by_user(&conn, "user_1")
        .expect("query should succeed")
        .expect("subscription should exist");
    assert_eq!(
        sub.current_period_end,
        Some(far_end),
        "Provisional month must not shorten the processor's year"
    );
}

/// A webhook landing after a provisional grant overwrites it: the
/// processor's view is authoritative.
#[test]
fn test_processor_overwrites_provisional_period() {
    let pool = setup_test_pool();
    let guard = ActivationGuard::new();

    guard
        .try_activate(&pool, "user_1", &sub_target(), "pi_test_1")
        .expect("activation should succeed");

    let processor_end = now() + 27 * 86400;
    let conn = pool.get().expect("conn");
    queries::upsert_subscription_from_processor(
        &conn,
        "user_1",
        UNLIMITED_TIER,
        &active_snapshot("sub_test_1", processor_end),
    )
    .expect("upsert should succeed");

    let sub = queries::get_subscription_by_user(&conn, "user_1")
        .expect("query should succeed")
        .expect("subscription should exist");
    assert_eq!(
        sub.current_period_end,
        Some(processor_end),
        "Processor-reported bounds replace the provisional period"
    );
    assert_eq!(sub.stripe_subscription_id.as_deref(), Some("sub_test_1"));
}

#[tokio::test]
async fn test_activate_with_retry_reports_already_applied() {
    let pool = setup_test_pool();
    let guard = ActivationGuard::new();

    let first = guard
        .activate_with_retry(&pool, "user_1", &sub_target(), "pi_test_1", RetryPolicy::default())
        .await
        .expect("activation should succeed");
    assert_eq!(first, ActivationOutcome::Applied);

    let second = guard
        .activate_with_retry(&pool, "user_1", &sub_target(), "pi_test_1", RetryPolicy::default())
        .await
        .expect("activation should succeed");
    assert_eq!(second, ActivationOutcome::AlreadyApplied);
}
