use serde::{Deserialize, Serialize};

/// What kind of purchase a checkout session represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseKind {
    Course,
    Subscription,
}

impl PurchaseKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Course => "course",
            Self::Subscription => "subscription",
        }
    }
}

impl std::str::FromStr for PurchaseKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "course" => Ok(Self::Course),
            "subscription" => Ok(Self::Subscription),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for PurchaseKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutStatus {
    Pending,
    Completed,
    Expired,
}

impl CheckoutStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Expired => "expired",
        }
    }
}

impl std::str::FromStr for CheckoutStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "expired" => Ok(Self::Expired),
            _ => Err(()),
        }
    }
}

/// Record of an initiated purchase.
///
/// The metadata snapshot captured at creation is the authoritative
/// description of what was purchased. Later price or catalog edits must not
/// silently change what a completed webhook grants, so the webhook path
/// reads from this snapshot rather than re-querying the catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub user_id: String,
    pub kind: PurchaseKind,
    /// Set for course purchases.
    pub course_id: Option<String>,
    /// Set for subscription purchases.
    pub tier: Option<String>,
    pub billing_interval: Option<String>,
    pub status: CheckoutStatus,
    pub stripe_session_id: String,
    /// Payment intent, once known (payment-mode sessions carry it from
    /// creation; subscription-mode sessions learn it from the webhook).
    pub stripe_payment_intent_id: Option<String>,
    /// JSON snapshot of the purchase terms at creation time.
    pub metadata: String,
    pub created_at: i64,
    pub completed_at: Option<i64>,
}

#[derive(Debug)]
pub struct CreateCheckoutSession {
    /// Generated before the processor call so the metadata snapshot can
    /// reference it.
    pub id: String,
    pub user_id: String,
    pub kind: PurchaseKind,
    pub course_id: Option<String>,
    pub tier: Option<String>,
    pub billing_interval: Option<String>,
    pub stripe_session_id: String,
    pub stripe_payment_intent_id: Option<String>,
    pub metadata: String,
}
