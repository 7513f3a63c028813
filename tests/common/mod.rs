//! Test utilities and fixtures for Paygate integration tests

#![allow(dead_code)]

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;

pub use paygate::db::{init_db, queries, DbPool};
pub use paygate::models::*;

pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Create an in-memory test database with schema initialized
pub fn setup_test_db() -> Connection {
    let conn = Connection::open_in_memory().expect("Failed to create in-memory database");
    init_db(&conn).expect("Failed to initialize schema");
    conn
}

/// Create a single-connection in-memory pool for code that needs `DbPool`.
/// One connection only: separate pooled connections would each get their
/// own private in-memory database.
pub fn setup_test_pool() -> DbPool {
    let manager = SqliteConnectionManager::memory();
    let pool = Pool::builder()
        .max_size(1)
        .build(manager)
        .expect("Failed to create test pool");
    {
        let conn = pool.get().expect("Failed to get pooled connection");
        init_db(&conn).expect("Failed to initialize schema");
    }
    pool
}

/// Create a test course with default values
pub fn create_test_course(conn: &Connection, title: &str, price_cents: i64) -> Course {
    let input = CreateCourse {
        title: title.to_string(),
        stripe_price_id: format!("price_test_{}", title.to_lowercase().replace(' ', "_")),
        price_cents,
        access_days: 365,
    };
    queries::create_course(conn, &input).expect("Failed to create test course")
}

/// Processor-reported snapshot of an active subscription.
pub fn active_snapshot(stripe_sub_id: &str, period_end: i64) -> SubscriptionSnapshot {
    SubscriptionSnapshot {
        stripe_subscription_id: Some(stripe_sub_id.to_string()),
        stripe_customer_id: Some("cus_test_1".to_string()),
        status: SubscriptionStatus::Active,
        current_period_start: Some(now()),
        current_period_end: Some(period_end),
        cancel_at_period_end: false,
    }
}
