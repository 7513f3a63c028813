//! Entitlement read-path tests

mod common;

use common::*;

#[test]
fn test_no_subscription_means_no_access() {
    let conn = setup_test_db();
    assert!(!queries::subscription_is_active(&conn, "user_1").expect("query"));
    assert!(queries::current_tier(&conn, "user_1").expect("query").is_none());
}

#[test]
fn test_active_subscription_grants_tier_access() {
    let conn = setup_test_db();
    queries::upsert_subscription_from_processor(
        &conn,
        "user_1",
        UNLIMITED_TIER,
        &active_snapshot("sub_test_1", now() + 30 * 86400),
    )
    .expect("upsert");

    assert!(queries::subscription_is_active(&conn, "user_1").expect("query"));
    assert_eq!(
        queries::current_tier(&conn, "user_1").expect("query").as_deref(),
        Some(UNLIMITED_TIER)
    );
}

#[test]
fn test_trialing_grants_access() {
    let conn = setup_test_db();
    let mut snap = active_snapshot("sub_test_1", now() + 7 * 86400);
    snap.status = SubscriptionStatus::Trialing;
    queries::upsert_subscription_from_processor(&conn, "user_1", UNLIMITED_TIER, &snap)
        .expect("upsert");

    assert!(queries::subscription_is_active(&conn, "user_1").expect("query"));
}

#[test]
fn test_expired_period_does_not_grant_access() {
    let conn = setup_test_db();
    // Status still says active but the period lapsed (e.g. webhooks stopped
    // arriving). The read side applies the period bound.
    queries::upsert_subscription_from_processor(
        &conn,
        "user_1",
        UNLIMITED_TIER,
        &active_snapshot("sub_test_1", now() - 86400),
    )
    .expect("upsert");

    assert!(!queries::subscription_is_active(&conn, "user_1").expect("query"));
    assert!(queries::current_tier(&conn, "user_1").expect("query").is_none());
}

#[test]
fn test_missing_period_end_is_treated_as_open() {
    let conn = setup_test_db();
    let mut snap = active_snapshot("sub_test_1", 0);
    snap.current_period_end = None;
    queries::upsert_subscription_from_processor(&conn, "user_1", UNLIMITED_TIER, &snap)
        .expect("upsert");

    assert!(queries::subscription_is_active(&conn, "user_1").expect("query"));
}

#[test]
fn test_enrollment_grants_course_access_until_expiry() {
    let conn = setup_test_db();
    let course = create_test_course(&conn, "Course A", 4900);

    assert!(!queries::has_course_access(&conn, "user_1", &course.id).expect("query"));

    queries::upsert_enrollment(&conn, "user_1", &course.id, Some(now() + 30 * 86400))
        .expect("upsert");
    assert!(queries::has_course_access(&conn, "user_1", &course.id).expect("query"));
}

#[test]
fn test_expired_enrollment_does_not_grant_access() {
    let conn = setup_test_db();
    let course = create_test_course(&conn, "Course A", 4900);

    queries::upsert_enrollment(&conn, "user_1", &course.id, Some(now() - 86400))
        .expect("upsert");
    assert!(!queries::has_course_access(&conn, "user_1", &course.id).expect("query"));
}

#[test]
fn test_perpetual_enrollment_never_expires() {
    let conn = setup_test_db();
    let course = create_test_course(&conn, "Course A", 4900);

    queries::upsert_enrollment(&conn, "user_1", &course.id, None).expect("upsert");
    assert!(queries::has_course_access(&conn, "user_1", &course.id).expect("query"));
}

#[test]
fn test_active_subscription_covers_all_courses() {
    let conn = setup_test_db();
    let course = create_test_course(&conn, "Course A", 4900);

    queries::upsert_subscription_from_processor(
        &conn,
        "user_1",
        UNLIMITED_TIER,
        &active_snapshot("sub_test_1", now() + 30 * 86400),
    )
    .expect("upsert");

    assert!(
        queries::has_course_access(&conn, "user_1", &course.id).expect("query"),
        "Unlimited tier grants access without an enrollment"
    );
}

#[test]
fn test_duplicate_enrollment_extends_to_the_later_expiry() {
    let conn = setup_test_db();
    let course = create_test_course(&conn, "Course A", 4900);

    let near = now() + 10 * 86400;
    let far = now() + 40 * 86400;

    queries::upsert_enrollment(&conn, "user_1", &course.id, Some(far)).expect("upsert");
    queries::upsert_enrollment(&conn, "user_1", &course.id, Some(near)).expect("upsert");

    let enrollment = queries::get_enrollment(&conn, "user_1", &course.id)
        .expect("query")
        .expect("enrollment exists");
    assert_eq!(
        enrollment.expires_at,
        Some(far),
        "A later grant must not shorten an existing window"
    );
}
