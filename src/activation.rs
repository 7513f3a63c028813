//! Single-flight guard for manual/fallback activation.
//!
//! When the confirmation flow times out waiting for the webhook, the client
//! can ask for a manual grant. Two near-simultaneous attempts (double-click,
//! re-render, webhook racing the fallback) must produce exactly one grant.
//! Two layers enforce that:
//!
//! 1. A per-target in-process lock plus a processed-intent set. Fast path,
//!    but per-process only.
//! 2. The persisted dedupe ledger, checked atomically inside the same
//!    SQLite transaction as the entitlement write. This is the guarantee
//!    that holds across instances; the webhook path records the same
//!    payment-intent id, so whichever path commits first wins and the
//!    other observes "already applied".

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use crate::db::{queries, DbPool};
use crate::error::{AppError, Result};
use crate::models::BillingInterval;
use crate::retry::{run_with_retry, Attempt, RetryOutcome, RetryPolicy};

/// What a manual activation should grant.
#[derive(Debug, Clone)]
pub enum ActivationTarget {
    Subscription {
        tier: String,
        interval: BillingInterval,
    },
    Course {
        course_id: String,
        access_days: i32,
    },
}

impl ActivationTarget {
    /// Lock key scoping the single-flight to one logical purchase, so
    /// unrelated users' activations never serialize on each other.
    fn lock_key(&self, user_id: &str) -> String {
        match self {
            Self::Subscription { tier, .. } => format!("sub:{}:{}", user_id, tier),
            Self::Course { course_id, .. } => format!("course:{}:{}", user_id, course_id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationOutcome {
    /// This call committed the grant.
    Applied,
    /// The grant was already committed (by an earlier call or the webhook).
    AlreadyApplied,
    /// Another activation for the same target is in flight; retry shortly.
    Busy,
}

/// Upper bound on the process-local handled-intent set. The persisted
/// ledger stays authoritative, so evicting the fast path never risks a
/// double grant.
const HANDLED_CAP: usize = 1024;

struct GuardInner {
    /// Payment intents this process has already handled.
    handled: Mutex<HashSet<String>>,
    /// One lock per logical activation target. Entries are pruned when the
    /// last holder releases them; otherwise the table would grow with
    /// every distinct purchase this process ever confirms.
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

#[derive(Clone)]
pub struct ActivationGuard {
    inner: Arc<GuardInner>,
}

impl Default for ActivationGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivationGuard {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(GuardInner {
                handled: Mutex::new(HashSet::new()),
                locks: Mutex::new(HashMap::new()),
            }),
        }
    }

    fn lock_for(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.inner.locks.lock().expect("lock table poisoned");
        locks.entry(key.to_string()).or_default().clone()
    }

    fn release(&self, key: &str, lock: &Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.inner.locks.lock().expect("lock table poisoned");
        // Two references are the table's and ours; nobody else is waiting
        // on this target, and new arrivals are blocked on the table lock.
        if Arc::strong_count(lock) == 2 {
            locks.remove(key);
        }
    }

    /// Attempt a single activation.
    ///
    /// Repeated calls with the same payment intent never extend access:
    /// the first successful application wins and later calls observe
    /// `AlreadyApplied` with zero side effects.
    pub fn try_activate(
        &self,
        pool: &DbPool,
        user_id: &str,
        target: &ActivationTarget,
        payment_intent_id: &str,
    ) -> Result<ActivationOutcome> {
        // Fast path: this process already applied the intent.
        {
            let handled = self.inner.handled.lock().expect("handled set poisoned");
            if handled.contains(payment_intent_id) {
                return Ok(ActivationOutcome::AlreadyApplied);
            }
        }

        let key = target.lock_key(user_id);
        let lock = self.lock_for(&key);
        let Ok(guard) = lock.try_lock() else {
            return Ok(ActivationOutcome::Busy);
        };

        let mut conn = pool.get()?;
        let tx = conn.transaction()?;

        // Atomic check-and-record against the persisted ledger. If the
        // webhook already recorded this intent, the grant exists; do nothing.
        let outcome = if queries::try_record_processed(
            &tx,
            queries::SOURCE_PAYMENT_INTENT,
            payment_intent_id,
        )? {
            match target {
                ActivationTarget::Subscription { tier, interval } => {
                    queries::activate_subscription_provisional(
                        &tx,
                        user_id,
                        tier,
                        interval.seconds(),
                    )?;
                }
                ActivationTarget::Course {
                    course_id,
                    access_days,
                } => {
                    // Zero or negative access window means perpetual access.
                    let expires_at = (*access_days > 0).then(|| {
                        chrono::Utc::now().timestamp() + (*access_days as i64) * 86400
                    });
                    queries::upsert_enrollment(&tx, user_id, course_id, expires_at)?;
                }
            }
            tx.commit()?;
            tracing::info!(
                "Manual activation applied: user={}, intent={}",
                user_id,
                payment_intent_id
            );
            ActivationOutcome::Applied
        } else {
            // No commit needed; the INSERT OR IGNORE wrote nothing.
            tracing::debug!(
                "Manual activation skipped, intent already applied: user={}, intent={}",
                user_id,
                payment_intent_id
            );
            ActivationOutcome::AlreadyApplied
        };

        {
            let mut handled = self.inner.handled.lock().expect("handled set poisoned");
            if handled.len() >= HANDLED_CAP {
                handled.clear();
            }
            handled.insert(payment_intent_id.to_string());
        }

        drop(guard);
        self.release(&key, &lock);

        Ok(outcome)
    }

    /// Activate with bounded retries on lock contention.
    ///
    /// Exhausted retries surface as a conflict the caller can show the user
    /// ("activation already in progress"); DB failures surface immediately
    /// so the user is told to contact support instead of looping.
    pub async fn activate_with_retry(
        &self,
        pool: &DbPool,
        user_id: &str,
        target: &ActivationTarget,
        payment_intent_id: &str,
        policy: RetryPolicy,
    ) -> Result<ActivationOutcome> {
        let outcome = run_with_retry(policy, |_| async {
            match self.try_activate(pool, user_id, target, payment_intent_id) {
                Ok(ActivationOutcome::Busy) => Attempt::Retriable(AppError::Conflict(
                    "Activation already in progress, try again shortly".into(),
                )),
                Ok(done) => Attempt::Done(done),
                Err(e) => Attempt::Terminal(e),
            }
        })
        .await;

        match outcome {
            RetryOutcome::Success(done) => Ok(done),
            RetryOutcome::Exhausted(e) | RetryOutcome::Terminal(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;

    fn test_pool() -> DbPool {
        let manager = r2d2_sqlite::SqliteConnectionManager::memory();
        let pool = r2d2::Pool::builder()
            .max_size(1)
            .build(manager)
            .expect("pool");
        init_db(&pool.get().expect("conn")).expect("schema");
        pool
    }

    fn sub_target() -> ActivationTarget {
        ActivationTarget::Subscription {
            tier: "unlimited".to_string(),
            interval: BillingInterval::Month,
        }
    }

    #[test]
    fn held_lock_reports_busy() {
        let pool = test_pool();
        let guard = ActivationGuard::new();
        let target = sub_target();

        let lock = guard.lock_for(&target.lock_key("user_1"));
        let held = lock.try_lock().expect("uncontended");

        let outcome = guard
            .try_activate(&pool, "user_1", &target, "pi_busy")
            .expect("activate");
        assert_eq!(outcome, ActivationOutcome::Busy);

        drop(held);
        let outcome = guard
            .try_activate(&pool, "user_1", &target, "pi_busy")
            .expect("activate");
        assert_eq!(outcome, ActivationOutcome::Applied);
    }

    #[test]
    fn lock_entry_is_pruned_after_release() {
        let pool = test_pool();
        let guard = ActivationGuard::new();
        let target = sub_target();

        guard
            .try_activate(&pool, "user_1", &target, "pi_prune")
            .expect("activate");

        assert!(guard.inner.locks.lock().expect("lock table").is_empty());
    }

    #[test]
    fn handled_set_stays_bounded() {
        let pool = test_pool();
        let guard = ActivationGuard::new();
        let target = sub_target();

        for i in 0..(HANDLED_CAP + 10) {
            guard
                .try_activate(&pool, "user_1", &target, &format!("pi_{}", i))
                .expect("activate");
        }

        assert!(guard.inner.handled.lock().expect("handled set").len() <= HANDLED_CAP);
    }
}
