use serde::{Deserialize, Serialize};

/// Mapping from a local user to a Stripe customer.
///
/// Created lazily on first checkout and immutable afterwards. Every
/// checkout looks this up first so a user never ends up with duplicate
/// Stripe customer objects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    pub id: String,
    pub user_id: String,
    pub stripe_customer_id: String,
    pub created_at: i64,
}
