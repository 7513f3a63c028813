//! Paygate - payment and subscription reconciliation service
//!
//! This library reconciles user entitlements (course enrollments and the
//! unlimited subscription tier) against Stripe: checkout initiation,
//! webhook ingestion with idempotent state transitions, a guarded manual
//! activation fallback, and the confirmation polling state machine.

pub mod activation;
pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod id;
pub mod models;
pub mod payments;
pub mod poller;
pub mod rate_limit;
pub mod retry;
