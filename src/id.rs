//! Prefixed ID generation for Paygate entities.
//!
//! All IDs use a `pg_` brand prefix to guarantee collision avoidance with
//! Stripe's own IDs (`cus_`, `sub_`, `pi_`, `cs_`, `evt_`, `price_`).
//!
//! Format: `pg_{entity}_{uuid_simple}` (32 hex chars, no hyphens)

use uuid::Uuid;

/// All known entity prefixes for validation.
const ALL_PREFIXES: &[&str] = &[
    "pg_cust_",
    "pg_sess_",
    "pg_sub_",
    "pg_enr_",
    "pg_course_",
    "pg_evt_",
];

/// Validate that a string is a valid Paygate prefixed ID.
///
/// Cheap format check to reject garbage before hitting the database.
pub fn is_valid_prefixed_id(s: &str) -> bool {
    let Some(prefix) = ALL_PREFIXES.iter().find(|p| s.starts_with(*p)) else {
        return false;
    };

    let hex_part = &s[prefix.len()..];
    hex_part.len() == 32 && hex_part.chars().all(|c| c.is_ascii_hexdigit())
}

/// Entity types that have prefixed IDs in Paygate.
#[derive(Debug, Clone, Copy)]
pub enum EntityType {
    Customer,
    CheckoutSession,
    Subscription,
    Enrollment,
    Course,
    ProcessedEvent,
}

impl EntityType {
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Customer => "pg_cust",
            Self::CheckoutSession => "pg_sess",
            Self::Subscription => "pg_sub",
            Self::Enrollment => "pg_enr",
            Self::Course => "pg_course",
            Self::ProcessedEvent => "pg_evt",
        }
    }

    /// Generates a new prefixed ID for this entity type.
    pub fn gen_id(&self) -> String {
        format!("{}_{}", self.prefix(), Uuid::new_v4().as_simple())
    }
}
