use std::env;

/// Stripe price IDs for the unlimited tier, one per billing interval.
#[derive(Debug, Clone)]
pub struct TierPrices {
    pub monthly: String,
    pub yearly: String,
}

/// Per-IP rate limit settings (requests per minute).
#[derive(Debug, Clone, Copy)]
pub struct RateLimits {
    pub strict: u32,
    pub standard: u32,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: String,
    pub base_url: String,
    pub success_url: String,
    pub cancel_url: String,
    pub stripe_secret_key: String,
    pub stripe_webhook_secret: String,
    pub tier_prices: TierPrices,
    pub rate_limits: RateLimits,
    pub dev_mode: bool,
}

impl Config {
    /// Load configuration from the environment.
    ///
    /// Fails closed: the processor secret key and webhook signing secret are
    /// mandatory. Without them the service cannot verify events or create
    /// checkouts, so it refuses to start rather than silently rejecting
    /// everything at runtime.
    pub fn from_env() -> Result<Self, String> {
        dotenvy::dotenv().ok();

        let dev_mode = env::var("PAYGATE_ENV")
            .map(|v| v == "dev" || v == "development")
            .unwrap_or(false);

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port: u16 = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3000);

        let base_url =
            env::var("BASE_URL").unwrap_or_else(|_| format!("http://{}:{}", host, port));

        let stripe_secret_key = env::var("STRIPE_SECRET_KEY")
            .map_err(|_| "STRIPE_SECRET_KEY is required".to_string())?;
        let stripe_webhook_secret = env::var("STRIPE_WEBHOOK_SECRET")
            .map_err(|_| "STRIPE_WEBHOOK_SECRET is required".to_string())?;

        let tier_prices = TierPrices {
            monthly: env::var("STRIPE_PRICE_MONTHLY")
                .map_err(|_| "STRIPE_PRICE_MONTHLY is required".to_string())?,
            yearly: env::var("STRIPE_PRICE_YEARLY")
                .map_err(|_| "STRIPE_PRICE_YEARLY is required".to_string())?,
        };

        let rate_limits = RateLimits {
            strict: env_u32("RATE_LIMIT_STRICT_RPM", 10),
            standard: env_u32("RATE_LIMIT_STANDARD_RPM", 30),
        };

        Ok(Self {
            host,
            port,
            database_path: env::var("DATABASE_PATH").unwrap_or_else(|_| "paygate.db".to_string()),
            success_url: env::var("SUCCESS_URL")
                .unwrap_or_else(|_| format!("{}/purchase/confirm", base_url)),
            cancel_url: env::var("CANCEL_URL")
                .unwrap_or_else(|_| format!("{}/purchase/cancelled", base_url)),
            base_url,
            stripe_secret_key,
            stripe_webhook_secret,
            tier_prices,
            rate_limits,
            dev_mode,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn env_u32(name: &str, default: u32) -> u32 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
