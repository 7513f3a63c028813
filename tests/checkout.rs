//! Checkout session persistence tests

mod common;

use common::*;

fn pending_session(conn: &rusqlite::Connection, stripe_session_id: &str) -> CheckoutSession {
    let course = create_test_course(conn, &format!("Course {}", stripe_session_id), 4900);
    let id = paygate::id::EntityType::CheckoutSession.gen_id();
    let metadata = serde_json::json!({
        "session_id": id,
        "user_id": "user_1",
        "kind": "course",
        "course_id": course.id,
        "access_days": "365",
    })
    .to_string();

    queries::create_checkout_session(
        conn,
        &CreateCheckoutSession {
            id,
            user_id: "user_1".to_string(),
            kind: PurchaseKind::Course,
            course_id: Some(course.id),
            tier: None,
            billing_interval: None,
            stripe_session_id: stripe_session_id.to_string(),
            stripe_payment_intent_id: None,
            metadata,
        },
    )
    .expect("create should succeed")
}

#[test]
fn test_session_starts_pending_and_completes_once() {
    let conn = setup_test_db();
    let session = pending_session(&conn, "cs_test_1");
    assert_eq!(session.status, CheckoutStatus::Pending);

    assert!(
        queries::complete_checkout_session(&conn, &session.id, Some("pi_test_1"))
            .expect("complete should succeed"),
        "First completion should apply"
    );

    let completed = queries::get_checkout_session(&conn, &session.id)
        .expect("query")
        .expect("session exists");
    assert_eq!(completed.status, CheckoutStatus::Completed);
    assert_eq!(completed.stripe_payment_intent_id.as_deref(), Some("pi_test_1"));
    assert!(completed.completed_at.is_some());

    // A redelivered webhook completes nothing the second time.
    assert!(
        !queries::complete_checkout_session(&conn, &session.id, Some("pi_test_1"))
            .expect("complete should succeed"),
        "Second completion should be a no-op"
    );
}

#[test]
fn test_completion_keeps_known_payment_intent_when_webhook_omits_it() {
    let conn = setup_test_db();
    let course = create_test_course(&conn, "Intent Course", 4900);

    // Payment-mode sessions know the intent at creation time.
    let id = paygate::id::EntityType::CheckoutSession.gen_id();
    queries::create_checkout_session(
        &conn,
        &CreateCheckoutSession {
            id: id.clone(),
            user_id: "user_1".to_string(),
            kind: PurchaseKind::Course,
            course_id: Some(course.id),
            tier: None,
            billing_interval: None,
            stripe_session_id: "cs_test_2".to_string(),
            stripe_payment_intent_id: Some("pi_known".to_string()),
            metadata: "{}".to_string(),
        },
    )
    .expect("create should succeed");

    queries::complete_checkout_session(&conn, &id, None).expect("complete should succeed");

    let completed = queries::get_checkout_session(&conn, &id)
        .expect("query")
        .expect("session exists");
    assert_eq!(
        completed.stripe_payment_intent_id.as_deref(),
        Some("pi_known"),
        "NULL from the webhook must not erase the stored intent"
    );
}

#[test]
fn test_lookup_by_stripe_session_id() {
    let conn = setup_test_db();
    let session = pending_session(&conn, "cs_test_1");

    let found = queries::get_checkout_session_by_stripe_id(&conn, "cs_test_1")
        .expect("query")
        .expect("session exists");
    assert_eq!(found.id, session.id);
    assert_eq!(found.user_id, "user_1");

    assert!(queries::get_checkout_session_by_stripe_id(&conn, "cs_unknown")
        .expect("query")
        .is_none());
}

#[test]
fn test_metadata_snapshot_round_trips() {
    let conn = setup_test_db();
    let session = pending_session(&conn, "cs_test_1");

    let stored = queries::get_checkout_session(&conn, &session.id)
        .expect("query")
        .expect("session exists");
    let snapshot: serde_json::Value =
        serde_json::from_str(&stored.metadata).expect("metadata should be JSON");
    assert_eq!(snapshot["user_id"], "user_1");
    assert_eq!(snapshot["access_days"], "365");
    assert_eq!(snapshot["session_id"], session.id);
}

#[test]
fn test_replayed_processor_session_returns_existing_row() {
    // A double-clicked submit reuses its idempotency key, so Stripe hands
    // back the same session object twice. The second local write must
    // resolve to the first attempt's row, not a constraint error.
    let conn = setup_test_db();
    let first = pending_session(&conn, "cs_test_replay");

    let retry_id = paygate::id::EntityType::CheckoutSession.gen_id();
    let recovered = paygate::handlers::checkout::persist_checkout_session(
        &conn,
        &CreateCheckoutSession {
            id: retry_id.clone(),
            user_id: "user_1".to_string(),
            kind: PurchaseKind::Course,
            course_id: first.course_id.clone(),
            tier: None,
            billing_interval: None,
            stripe_session_id: "cs_test_replay".to_string(),
            stripe_payment_intent_id: None,
            metadata: "{}".to_string(),
        },
    )
    .expect("retry should resolve to the existing session");

    assert_eq!(recovered.id, first.id, "retry must map to the first row");
    assert_ne!(recovered.id, retry_id);

    // Exactly one purchase attempt exists for the processor session.
    let stored = queries::get_checkout_session_by_stripe_id(&conn, "cs_test_replay")
        .expect("query")
        .expect("session exists");
    assert_eq!(stored.metadata, first.metadata);
}

#[test]
fn test_duplicate_stripe_session_id_rejected() {
    let conn = setup_test_db();
    let first = pending_session(&conn, "cs_test_1");

    let id = paygate::id::EntityType::CheckoutSession.gen_id();
    let result = queries::create_checkout_session(
        &conn,
        &CreateCheckoutSession {
            id,
            user_id: "user_2".to_string(),
            kind: PurchaseKind::Course,
            course_id: first.course_id.clone(),
            tier: None,
            billing_interval: None,
            stripe_session_id: "cs_test_1".to_string(),
            stripe_payment_intent_id: None,
            metadata: "{}".to_string(),
        },
    );
    assert!(result.is_err(), "stripe_session_id is unique");
}
