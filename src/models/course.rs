use serde::{Deserialize, Serialize};

/// A purchasable course in the catalog.
///
/// `access_days` drives enrollment expiry: a completed purchase grants
/// `now + access_days` of access. Courses with `price_cents = 0` are free
/// and cannot go through checkout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Course {
    pub id: String,
    pub title: String,
    /// Pre-configured Stripe Price ID (price_xxx) for this course.
    pub stripe_price_id: String,
    pub price_cents: i64,
    pub access_days: i32,
    pub created_at: i64,
}

#[derive(Debug, Deserialize)]
pub struct CreateCourse {
    pub title: String,
    pub stripe_price_id: String,
    pub price_cents: i64,
    pub access_days: i32,
}
