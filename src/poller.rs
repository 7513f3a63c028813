//! Confirmation poller: the post-checkout wait loop.
//!
//! After the processor redirects the buyer back, the webhook usually lands
//! within a second or two. This state machine waits for the buyer's
//! identity, polls the payment intent and the entitlement store until
//! access appears, and falls back to a guarded automatic activation when
//! the webhook is late. Dropping the returned future cancels all timers;
//! nothing runs detached.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;

use crate::activation::ActivationOutcome;
use crate::error::Result;

/// Processor-side status of a payment or setup intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentStatus {
    Succeeded,
    Processing,
    RequiresAction,
    RequiresPaymentMethod,
    Canceled,
}

/// Observable state of the confirmation flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollerState {
    /// Fetching the intent for the first time.
    Loading,
    /// Waiting for the buyer's identity to become available.
    WaitingAuth,
    /// Payment accepted by the processor, webhook not yet observed. Also
    /// a valid end state: a payment still settling when the flow's time
    /// runs out is finished later by the webhook.
    Processing,
    /// Intent needs further buyer action (3DS etc).
    RequiresAction,
    /// Entitlement confirmed in our own store.
    Success,
    /// Payment succeeded but automatic activation could not complete;
    /// the buyer should trigger a manual activation.
    Manual,
    /// Terminal failure with a user-presentable reason.
    Error(String),
}

impl PollerState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Manual | Self::Error(_))
    }
}

/// Supplies the authenticated buyer, which may lag the redirect.
pub trait IdentitySource {
    fn user_id(&self) -> impl Future<Output = Result<Option<String>>> + Send;
}

/// Looks up intent status at the processor.
pub trait StatusLookup {
    fn intent_status(&self, intent_id: &str) -> impl Future<Output = Result<IntentStatus>> + Send;
}

/// Checks whether the entitlement has landed in our own store.
pub trait EntitlementProbe {
    fn is_entitled(&self, user_id: &str) -> impl Future<Output = Result<bool>> + Send;
}

/// Fallback grant path, taken only after the webhook window closes.
pub trait Activator {
    fn activate(
        &self,
        user_id: &str,
    ) -> impl Future<Output = Result<ActivationOutcome>> + Send;
}

#[derive(Debug, Clone, Copy)]
pub struct PollerConfig {
    /// Delay between identity and entitlement probes.
    pub poll_interval: Duration,
    /// How long to wait for the buyer's identity to appear.
    pub auth_timeout: Duration,
    /// How long to wait for the webhook before the fallback activation.
    pub webhook_window: Duration,
    /// How long to sit in `RequiresAction` or `Processing` before giving up.
    pub intent_timeout: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            auth_timeout: Duration::from_secs(15),
            webhook_window: Duration::from_secs(20),
            intent_timeout: Duration::from_secs(120),
        }
    }
}

pub struct ConfirmationPoller<I, S, P, A> {
    config: PollerConfig,
    identity: I,
    status: S,
    probe: P,
    activator: A,
    state_tx: watch::Sender<PollerState>,
}

impl<I, S, P, A> ConfirmationPoller<I, S, P, A>
where
    I: IdentitySource,
    S: StatusLookup,
    P: EntitlementProbe,
    A: Activator,
{
    pub fn new(config: PollerConfig, identity: I, status: S, probe: P, activator: A) -> Self {
        let (state_tx, _) = watch::channel(PollerState::Loading);
        Self {
            config,
            identity,
            status,
            probe,
            activator,
            state_tx,
        }
    }

    /// Subscribe to state transitions, e.g. to drive a progress UI.
    pub fn watch(&self) -> watch::Receiver<PollerState> {
        self.state_tx.subscribe()
    }

    fn transition(&self, next: PollerState) {
        tracing::debug!("Confirmation state: {:?}", next);
        // send_replace so transitions still land with no subscribers.
        self.state_tx.send_replace(next);
    }

    /// Drive the flow to its end state.
    pub async fn run(&self, intent_id: &str) -> PollerState {
        let user_id = match self.await_identity().await {
            Ok(id) => id,
            Err(state) => {
                self.transition(state.clone());
                return state;
            }
        };
        let state = self.resolve_intent(intent_id, user_id.as_deref()).await;
        self.transition(state.clone());
        state
    }

    /// The buyer's session may still be loading when the redirect lands.
    /// Wait a bounded time for it. The timeout does not abort the flow:
    /// the payment still gets verified, and only the steps that need an
    /// identity (entitlement probe, fallback grant) degrade without one.
    async fn await_identity(&self) -> std::result::Result<Option<String>, PollerState> {
        self.transition(PollerState::WaitingAuth);
        let waited = tokio::time::timeout(self.config.auth_timeout, async {
            loop {
                match self.identity.user_id().await {
                    Ok(Some(id)) => return Ok(id),
                    Ok(None) => {}
                    Err(e) => return Err(e),
                }
                tokio::time::sleep(self.config.poll_interval).await;
            }
        })
        .await;

        match waited {
            Ok(Ok(id)) => Ok(Some(id)),
            Ok(Err(e)) => Err(PollerState::Error(e.to_string())),
            Err(_elapsed) => Ok(None),
        }
    }

    async fn resolve_intent(&self, intent_id: &str, user_id: Option<&str>) -> PollerState {
        let deadline = tokio::time::Instant::now() + self.config.intent_timeout;
        loop {
            let status = match self.status.intent_status(intent_id).await {
                Ok(s) => s,
                Err(e) => return PollerState::Error(e.to_string()),
            };
            match status {
                IntentStatus::Succeeded => {
                    return match user_id {
                        Some(user_id) => self.await_entitlement(user_id).await,
                        // Payment confirmed but nobody to grant against;
                        // the buyer signs in and retries manually.
                        None => PollerState::Manual,
                    };
                }
                IntentStatus::Processing => {
                    self.transition(PollerState::Processing);
                    if tokio::time::Instant::now() >= deadline {
                        // Still settling at the processor. Not a failure:
                        // the webhook completes the grant when it lands.
                        return PollerState::Processing;
                    }
                }
                IntentStatus::RequiresAction => {
                    self.transition(PollerState::RequiresAction);
                    if tokio::time::Instant::now() >= deadline {
                        return PollerState::Error(
                            "Timed out waiting for payment confirmation".into(),
                        );
                    }
                }
                IntentStatus::RequiresPaymentMethod => {
                    return PollerState::Error("Payment was not completed".into());
                }
                IntentStatus::Canceled => {
                    return PollerState::Error("Payment was canceled".into());
                }
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    /// The intent succeeded; wait for the webhook to land, then fall back.
    async fn await_entitlement(&self, user_id: &str) -> PollerState {
        self.transition(PollerState::Processing);
        let window = tokio::time::timeout(self.config.webhook_window, async {
            loop {
                match self.probe.is_entitled(user_id).await {
                    Ok(true) => return Ok(()),
                    Ok(false) => {}
                    Err(e) => return Err(e),
                }
                tokio::time::sleep(self.config.poll_interval).await;
            }
        })
        .await;

        match window {
            Ok(Ok(())) => PollerState::Success,
            Ok(Err(e)) => PollerState::Error(e.to_string()),
            // Webhook window closed, take the guarded fallback exactly once.
            Err(_elapsed) => self.fallback_activation(user_id).await,
        }
    }

    async fn fallback_activation(&self, user_id: &str) -> PollerState {
        tracing::info!("Webhook window elapsed, attempting fallback activation");
        match self.activator.activate(user_id).await {
            // Applied means the grant transaction committed.
            Ok(ActivationOutcome::Applied) => PollerState::Success,
            // Another path (likely the webhook) applied the grant while we
            // were deciding to fall back. Confirm through the store before
            // declaring success.
            Ok(ActivationOutcome::AlreadyApplied) => match self.probe.is_entitled(user_id).await {
                Ok(true) => PollerState::Success,
                Ok(false) => PollerState::Manual,
                Err(e) => PollerState::Error(e.to_string()),
            },
            // Contention or a store failure after a succeeded payment:
            // hand the buyer the explicit retry path instead of looping.
            Ok(ActivationOutcome::Busy) | Err(_) => PollerState::Manual,
        }
    }
}
