use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::{AppError, Result};

type HmacSha256 = Hmac<Sha256>;

const API_BASE: &str = "https://api.stripe.com/v1";

// We use pre-configured Stripe prices (price_xxx) for courses and tiers
// instead of ad-hoc price_data, so the checkout metadata snapshot is the
// only place purchase terms live on our side.

/// Checkout mode, mirroring Stripe's `mode` parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckoutMode {
    Payment,
    Subscription,
}

impl CheckoutMode {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Payment => "payment",
            Self::Subscription => "subscription",
        }
    }
}

/// Parameters for creating a checkout session.
#[derive(Debug)]
pub struct CreateCheckout<'a> {
    pub mode: CheckoutMode,
    pub customer_id: &'a str,
    pub price_id: &'a str,
    /// Caller-supplied idempotency key: retries of the same user action
    /// never create two processor objects.
    pub idempotency_key: &'a str,
    pub success_url: &'a str,
    pub cancel_url: &'a str,
    /// Machine-readable purchase description, echoed back in webhooks.
    pub metadata: &'a [(&'a str, &'a str)],
}

#[derive(Debug, Deserialize)]
pub struct CheckoutSessionCreated {
    pub id: String,
    /// Hosted checkout redirect URL.
    pub url: Option<String>,
    /// Client secret for embedded payment elements.
    pub client_secret: Option<String>,
    pub payment_intent: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CustomerCreated {
    id: String,
}

#[derive(Debug, Clone)]
pub struct StripeClient {
    client: Client,
    secret_key: String,
    webhook_secret: String,
}

impl StripeClient {
    pub fn new(secret_key: &str, webhook_secret: &str) -> Self {
        Self {
            client: Client::new(),
            secret_key: secret_key.to_string(),
            webhook_secret: webhook_secret.to_string(),
        }
    }

    async fn post_form<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        form: &[(String, String)],
        idempotency_key: Option<&str>,
    ) -> Result<T> {
        let mut req = self
            .client
            .post(format!("{}{}", API_BASE, path))
            .basic_auth(&self.secret_key, None::<&str>)
            .form(form);

        if let Some(key) = idempotency_key {
            req = req.header("Idempotency-Key", key);
        }

        let response = req
            .send()
            .await
            .map_err(|e| AppError::Upstream(format!("Stripe API error: {}", e)))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::Upstream(format!("Stripe API error: {}", error_text)));
        }

        response
            .json()
            .await
            .map_err(|e| AppError::Upstream(format!("Failed to parse Stripe response: {}", e)))
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self
            .client
            .get(format!("{}{}", API_BASE, path))
            .basic_auth(&self.secret_key, None::<&str>)
            .send()
            .await
            .map_err(|e| AppError::Upstream(format!("Stripe API error: {}", e)))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::Upstream(format!("Stripe API error: {}", error_text)));
        }

        response
            .json()
            .await
            .map_err(|e| AppError::Upstream(format!("Failed to parse Stripe response: {}", e)))
    }

    /// Create a Stripe customer for a local user. Called at most once per
    /// user; the mapping is persisted so later checkouts reuse it.
    pub async fn create_customer(&self, user_id: &str) -> Result<String> {
        let form = vec![("metadata[user_id]".to_string(), user_id.to_string())];
        let customer: CustomerCreated = self
            .post_form("/customers", &form, Some(&format!("customer-{}", user_id)))
            .await?;
        Ok(customer.id)
    }

    /// Create a checkout session with the caller's idempotency key and a
    /// metadata snapshot describing the purchase.
    pub async fn create_checkout_session(
        &self,
        params: &CreateCheckout<'_>,
    ) -> Result<CheckoutSessionCreated> {
        let mut form = vec![
            ("mode".to_string(), params.mode.as_str().to_string()),
            ("customer".to_string(), params.customer_id.to_string()),
            ("success_url".to_string(), params.success_url.to_string()),
            ("cancel_url".to_string(), params.cancel_url.to_string()),
            ("line_items[0][price]".to_string(), params.price_id.to_string()),
            ("line_items[0][quantity]".to_string(), "1".to_string()),
        ];
        for (key, value) in params.metadata {
            form.push((format!("metadata[{}]", key), value.to_string()));
        }

        self.post_form("/checkout/sessions", &form, Some(params.idempotency_key))
            .await
    }

    /// Fetch a subscription object. The processor's view of status and
    /// period bounds is authoritative.
    pub async fn get_subscription(&self, subscription_id: &str) -> Result<StripeSubscription> {
        self.get(&format!("/subscriptions/{}", subscription_id)).await
    }

    pub async fn get_payment_intent(&self, payment_intent_id: &str) -> Result<StripeIntent> {
        self.get(&format!("/payment_intents/{}", payment_intent_id)).await
    }

    pub async fn get_setup_intent(&self, setup_intent_id: &str) -> Result<StripeIntent> {
        self.get(&format!("/setup_intents/{}", setup_intent_id)).await
    }

    /// Maximum age of a webhook timestamp before it's rejected (in seconds).
    /// Stripe recommends 300 seconds (5 minutes).
    const WEBHOOK_TIMESTAMP_TOLERANCE_SECS: i64 = 300;

    /// Verify a `stripe-signature` header against the raw body.
    ///
    /// Must run before the body is parsed; a payload that fails here
    /// performs no writes regardless of how plausible it looks.
    pub fn verify_webhook_signature(&self, payload: &[u8], signature: &str) -> Result<bool> {
        // Stripe signature format: t=timestamp,v1=signature
        let parts: Vec<&str> = signature.split(',').collect();

        let mut timestamp = None;
        let mut sig_v1 = None;

        for part in parts {
            if let Some(t) = part.strip_prefix("t=") {
                timestamp = Some(t);
            } else if let Some(s) = part.strip_prefix("v1=") {
                sig_v1 = Some(s);
            }
        }

        let timestamp_str = timestamp
            .ok_or_else(|| AppError::BadRequest("Invalid signature format".into()))?;
        let sig_v1 =
            sig_v1.ok_or_else(|| AppError::BadRequest("Invalid signature format".into()))?;

        // Reject stale timestamps to prevent replay of captured deliveries.
        let timestamp: i64 = timestamp_str
            .parse()
            .map_err(|_| AppError::BadRequest("Invalid timestamp in signature".into()))?;

        let age = chrono::Utc::now().timestamp() - timestamp;

        if age > Self::WEBHOOK_TIMESTAMP_TOLERANCE_SECS {
            tracing::warn!(
                "Stripe webhook rejected: timestamp too old (age={}s, max={}s)",
                age,
                Self::WEBHOOK_TIMESTAMP_TOLERANCE_SECS
            );
            return Ok(false);
        }

        // Clock skew tolerance for future timestamps: 60 seconds
        if age < -60 {
            tracing::warn!("Stripe webhook rejected: timestamp in the future (age={}s)", age);
            return Ok(false);
        }

        let signed_payload = format!("{}.{}", timestamp_str, String::from_utf8_lossy(payload));

        let mut mac = HmacSha256::new_from_slice(self.webhook_secret.as_bytes())
            .map_err(|_| AppError::Internal("Invalid webhook secret".into()))?;
        mac.update(signed_payload.as_bytes());
        let expected = hex::encode(mac.finalize().into_bytes());

        // Constant-time comparison. Signature length is not secret (always
        // 64 hex chars for SHA-256), so the length check can short-circuit.
        let expected_bytes = expected.as_bytes();
        let provided_bytes = sig_v1.as_bytes();

        if expected_bytes.len() != provided_bytes.len() {
            return Ok(false);
        }

        Ok(expected_bytes.ct_eq(provided_bytes).into())
    }
}

// ============ Webhook event envelope ============

#[derive(Debug, Deserialize)]
pub struct StripeWebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: StripeEventData,
    #[serde(default)]
    pub livemode: bool,
    #[serde(default)]
    pub created: i64,
}

#[derive(Debug, Deserialize)]
pub struct StripeEventData {
    pub object: serde_json::Value,
}

// ============ checkout.session.completed ============

#[derive(Debug, Deserialize)]
pub struct StripeCheckoutSessionObject {
    pub id: String,
    /// "payment" or "subscription"
    pub mode: Option<String>,
    pub payment_status: String,
    pub customer: Option<String>,
    pub subscription: Option<String>,
    pub payment_intent: Option<String>,
    #[serde(default)]
    pub metadata: StripeSessionMetadata,
}

/// The metadata snapshot we attached at checkout creation.
#[derive(Debug, Default, Deserialize)]
pub struct StripeSessionMetadata {
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    pub kind: Option<String>,
    pub course_id: Option<String>,
    pub tier: Option<String>,
    pub access_days: Option<String>,
}

// ============ invoice.* ============

#[derive(Debug, Deserialize)]
pub struct StripeInvoice {
    pub id: String,
    pub customer: Option<String>,
    pub subscription: Option<String>,
    /// "subscription_create", "subscription_cycle", etc.
    pub billing_reason: Option<String>,
    pub status: Option<String>,
}

// ============ customer.subscription.* ============

#[derive(Debug, Deserialize)]
pub struct StripeSubscription {
    pub id: String,
    pub customer: Option<String>,
    /// "active", "past_due", "canceled", "trialing", "incomplete", ...
    pub status: String,
    pub current_period_start: Option<i64>,
    pub current_period_end: Option<i64>,
    #[serde(default)]
    pub cancel_at_period_end: bool,
    #[serde(default)]
    pub metadata: StripeSessionMetadata,
}

// ============ payment/setup intents ============

#[derive(Debug, Deserialize, serde::Serialize)]
pub struct StripeIntent {
    pub id: String,
    /// "succeeded", "processing", "requires_action", "requires_payment_method", ...
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_payment_error: Option<serde_json::Value>,
}
