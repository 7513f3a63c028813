mod from_row;
pub mod queries;
mod schema;

pub use schema::init_db;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::activation::ActivationGuard;
use crate::config::TierPrices;
use crate::payments::StripeClient;

pub type DbPool = Pool<SqliteConnectionManager>;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// Entitlement store pool (customers, sessions, subscriptions,
    /// enrollments, processed events).
    pub db: DbPool,
    pub stripe: StripeClient,
    /// Single-flight guard for manual activation. Per-process only; the
    /// persisted dedupe ledger is the cross-instance idempotency anchor.
    pub activation: ActivationGuard,
    pub base_url: String,
    pub success_url: String,
    pub cancel_url: String,
    pub tier_prices: TierPrices,
}

pub fn create_pool(database_path: &str) -> Result<DbPool, r2d2::Error> {
    let manager = SqliteConnectionManager::file(database_path);
    Pool::builder().max_size(10).build(manager)
}
