//! Row mapping trait and helpers for reducing boilerplate in queries.

use rusqlite::{Connection, OptionalExtension, Row, ToSql};

use crate::models::*;

/// Parse a string column into an enum type, converting parse errors to
/// rusqlite errors instead of panicking on corrupted rows.
fn parse_enum<T: std::str::FromStr>(row: &Row, col: usize, col_name: &str) -> rusqlite::Result<T> {
    row.get::<_, String>(col)?.parse::<T>().map_err(|_| {
        rusqlite::Error::InvalidColumnType(col, col_name.to_string(), rusqlite::types::Type::Text)
    })
}

/// Trait for constructing a type from a database row.
pub trait FromRow: Sized {
    fn from_row(row: &Row) -> rusqlite::Result<Self>;
}

/// Query for a single optional result.
pub fn query_one<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Option<T>> {
    conn.query_row(sql, params, T::from_row)
        .optional()
        .map_err(Into::into)
}

/// Query for multiple results.
pub fn query_all<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, T::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ============ SQL SELECT Constants ============

pub const CUSTOMER_COLS: &str = "id, user_id, stripe_customer_id, created_at";

pub const COURSE_COLS: &str = "id, title, stripe_price_id, price_cents, access_days, created_at";

pub const CHECKOUT_SESSION_COLS: &str = "id, user_id, kind, course_id, tier, billing_interval, \
     status, stripe_session_id, stripe_payment_intent_id, metadata, created_at, completed_at";

pub const SUBSCRIPTION_COLS: &str = "id, user_id, tier, status, stripe_subscription_id, \
     stripe_customer_id, current_period_start, current_period_end, cancel_at_period_end, \
     created_at, updated_at";

pub const ENROLLMENT_COLS: &str = "id, user_id, course_id, status, enrolled_at, expires_at";

// ============ FromRow Implementations ============

impl FromRow for Customer {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Customer {
            id: row.get(0)?,
            user_id: row.get(1)?,
            stripe_customer_id: row.get(2)?,
            created_at: row.get(3)?,
        })
    }
}

impl FromRow for Course {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Course {
            id: row.get(0)?,
            title: row.get(1)?,
            stripe_price_id: row.get(2)?,
            price_cents: row.get(3)?,
            access_days: row.get(4)?,
            created_at: row.get(5)?,
        })
    }
}

impl FromRow for CheckoutSession {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(CheckoutSession {
            id: row.get(0)?,
            user_id: row.get(1)?,
            kind: parse_enum(row, 2, "kind")?,
            course_id: row.get(3)?,
            tier: row.get(4)?,
            billing_interval: row.get(5)?,
            status: parse_enum(row, 6, "status")?,
            stripe_session_id: row.get(7)?,
            stripe_payment_intent_id: row.get(8)?,
            metadata: row.get(9)?,
            created_at: row.get(10)?,
            completed_at: row.get(11)?,
        })
    }
}

impl FromRow for Subscription {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Subscription {
            id: row.get(0)?,
            user_id: row.get(1)?,
            tier: row.get(2)?,
            status: parse_enum(row, 3, "status")?,
            stripe_subscription_id: row.get(4)?,
            stripe_customer_id: row.get(5)?,
            current_period_start: row.get(6)?,
            current_period_end: row.get(7)?,
            cancel_at_period_end: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }
}

impl FromRow for Enrollment {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Enrollment {
            id: row.get(0)?,
            user_id: row.get(1)?,
            course_id: row.get(2)?,
            status: parse_enum(row, 3, "status")?,
            enrolled_at: row.get(4)?,
            expires_at: row.get(5)?,
        })
    }
}
