use rusqlite::Connection;

/// Initialize the entitlement store schema.
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;

        -- Local user -> Stripe customer mapping.
        -- Created lazily on first checkout; immutable once created.
        CREATE TABLE IF NOT EXISTS customers (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL UNIQUE,
            stripe_customer_id TEXT NOT NULL UNIQUE,
            created_at INTEGER NOT NULL
        );

        -- Course catalog. price_cents = 0 means free (not purchasable).
        CREATE TABLE IF NOT EXISTS courses (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            stripe_price_id TEXT NOT NULL,
            price_cents INTEGER NOT NULL DEFAULT 0,
            access_days INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        );

        -- Initiated purchases. Row is written only after the Stripe call
        -- succeeds; metadata is the authoritative snapshot of what was bought.
        CREATE TABLE IF NOT EXISTS checkout_sessions (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            kind TEXT NOT NULL CHECK (kind IN ('course', 'subscription')),
            course_id TEXT REFERENCES courses(id),
            tier TEXT,
            billing_interval TEXT,
            status TEXT NOT NULL DEFAULT 'pending'
                CHECK (status IN ('pending', 'completed', 'expired')),
            stripe_session_id TEXT NOT NULL UNIQUE,
            stripe_payment_intent_id TEXT,
            metadata TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            completed_at INTEGER
        );
        CREATE INDEX IF NOT EXISTS idx_checkout_sessions_user ON checkout_sessions(user_id);
        CREATE INDEX IF NOT EXISTS idx_checkout_sessions_intent
            ON checkout_sessions(stripe_payment_intent_id);

        -- Tier entitlement. UNIQUE(user_id) enforces one authoritative row
        -- per user; cancellation flips status, the row is never deleted.
        CREATE TABLE IF NOT EXISTS subscriptions (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL UNIQUE,
            tier TEXT NOT NULL,
            status TEXT NOT NULL
                CHECK (status IN ('active', 'past_due', 'cancelled', 'trialing', 'incomplete')),
            stripe_subscription_id TEXT,
            stripe_customer_id TEXT,
            current_period_start INTEGER,
            current_period_end INTEGER,
            cancel_at_period_end INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_subscriptions_stripe_sub
            ON subscriptions(stripe_subscription_id);

        -- Course entitlement.
        CREATE TABLE IF NOT EXISTS enrollments (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            course_id TEXT NOT NULL REFERENCES courses(id),
            status TEXT NOT NULL DEFAULT 'active'
                CHECK (status IN ('active', 'expired', 'revoked')),
            enrolled_at INTEGER NOT NULL,
            expires_at INTEGER,
            UNIQUE(user_id, course_id)
        );
        CREATE INDEX IF NOT EXISTS idx_enrollments_user ON enrollments(user_id);

        -- Dedupe ledger. The UNIQUE constraint is the idempotency anchor:
        -- check-and-insert happens atomically via INSERT OR IGNORE inside the
        -- same transaction as the state transition. source 'stripe' holds
        -- webhook event ids, source 'payment_intent' holds grant-level ids
        -- shared by the webhook and manual-activation paths.
        CREATE TABLE IF NOT EXISTS processed_events (
            id TEXT PRIMARY KEY,
            source TEXT NOT NULL,
            external_id TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            UNIQUE(source, external_id)
        );
        CREATE INDEX IF NOT EXISTS idx_processed_events_lookup
            ON processed_events(source, external_id);
        "#,
    )?;
    Ok(())
}
