use serde::{Deserialize, Serialize};

/// Name of the paid subscription tier.
pub const UNLIMITED_TIER: &str = "unlimited";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    PastDue,
    Cancelled,
    Trialing,
    Incomplete,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::PastDue => "past_due",
            Self::Cancelled => "cancelled",
            Self::Trialing => "trialing",
            Self::Incomplete => "incomplete",
        }
    }

    /// Whether this status grants tier access.
    pub fn grants_access(&self) -> bool {
        matches!(self, Self::Active | Self::Trialing)
    }

    /// Map a Stripe subscription status string onto our taxonomy.
    /// Unknown statuses are treated as incomplete rather than rejected,
    /// so new Stripe statuses degrade to "no access" instead of a 500.
    pub fn from_stripe(s: &str) -> Self {
        match s {
            "active" => Self::Active,
            "past_due" | "unpaid" => Self::PastDue,
            "canceled" | "cancelled" => Self::Cancelled,
            "trialing" => Self::Trialing,
            _ => Self::Incomplete,
        }
    }
}

impl std::str::FromStr for SubscriptionStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "past_due" => Ok(Self::PastDue),
            "cancelled" => Ok(Self::Cancelled),
            "trialing" => Ok(Self::Trialing),
            "incomplete" => Ok(Self::Incomplete),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingInterval {
    Month,
    Year,
}

impl BillingInterval {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Month => "month",
            Self::Year => "year",
        }
    }

    /// Provisional period length for guard-applied activations.
    /// Processor-reported period bounds always overwrite this.
    pub fn seconds(&self) -> i64 {
        match self {
            Self::Month => 30 * 86400,
            Self::Year => 365 * 86400,
        }
    }
}

impl std::str::FromStr for BillingInterval {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "month" | "monthly" => Ok(Self::Month),
            "year" | "yearly" | "annual" => Ok(Self::Year),
            _ => Err(()),
        }
    }
}

/// Current entitlement for the paid tier.
///
/// At most one authoritative row per user (enforced by a UNIQUE constraint).
/// Writes come only from the webhook ingestor or the activation guard;
/// cancellation is a status transition, never a row deletion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub user_id: String,
    pub tier: String,
    pub status: SubscriptionStatus,
    pub stripe_subscription_id: Option<String>,
    pub stripe_customer_id: Option<String>,
    pub current_period_start: Option<i64>,
    pub current_period_end: Option<i64>,
    pub cancel_at_period_end: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Subscription fields as reported by the processor. The processor is
/// authoritative for everything in here.
#[derive(Debug, Clone)]
pub struct SubscriptionSnapshot {
    pub stripe_subscription_id: Option<String>,
    pub stripe_customer_id: Option<String>,
    pub status: SubscriptionStatus,
    pub current_period_start: Option<i64>,
    pub current_period_end: Option<i64>,
    pub cancel_at_period_end: bool,
}
