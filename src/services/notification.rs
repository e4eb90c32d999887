//! Best-effort card owner notifications.
//!
//! Balance changes and expiry events produce a flat notification that is
//! handed to a [`Notifier`]. Delivery runs on its own task, is retried a
//! fixed number of times with a fixed delay, and never reports back to the
//! operation that triggered it: exhausted failures are logged and dropped.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::models::card::Card;
use crate::models::money::format_cents;
use crate::models::user::User;
use crate::services::signing::sign_payload;
use crate::store::UserDirectory;

/// What happened to the card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Funded,
    Debited,
    Refunded,
    Reversed,
    Expiring,
    Expired,
}

/// Flat payload sent to the mail relay.
///
/// # JSON Example
///
/// ```json
/// {
///   "kind": "debited",
///   "recipient": "ada@example.com",
///   "first_name": "Ada",
///   "last_four": "6789",
///   "amount": "200.00",
///   "fee": "2.00",
///   "balance": "-2.00"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub recipient: String,
    pub first_name: String,
    pub last_four: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fee: Option<String>,
    pub balance: String,
}

impl Notification {
    pub fn for_card(kind: NotificationKind, user: &User, card: &Card) -> Self {
        Self {
            kind,
            recipient: user.email.clone(),
            first_name: user.first_name.clone(),
            last_four: card.last_four.clone(),
            amount: None,
            fee: None,
            balance: format_cents(card.current_balance_cents),
        }
    }

    pub fn with_amount(mut self, amount_cents: i64, fee_cents: i64) -> Self {
        self.amount = Some(format_cents(amount_cents));
        self.fee = Some(format_cents(fee_cents));
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("relay answered {0}")]
    Rejected(u16),

    #[error("invalid notification endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("failed to serialize notification: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Delivers one notification. Implementations do not retry.
#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Posts signed JSON to a mail relay.
///
/// # Headers Sent
///
/// - `Content-Type: application/json`
/// - `X-Webhook-Signature: sha256=<hex>`
/// - `X-Notification-Id: <uuid>`
///
/// # Timeout
///
/// 5 seconds per attempt
pub struct HttpNotifier {
    client: reqwest::Client,
    url: String,
    secret: String,
}

impl HttpNotifier {
    pub fn new(url: &str, secret: &str) -> Result<Self, NotifyError> {
        validate_endpoint_url(url)?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;

        Ok(Self {
            client,
            url: url.to_string(),
            secret: secret.to_string(),
        })
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let body = serde_json::to_vec(notification)?;
        let signature = sign_payload(&self.secret, &body);

        let response = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .header("X-Webhook-Signature", signature)
            .header("X-Notification-Id", Uuid::new_v4().to_string())
            .body(body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(NotifyError::Rejected(response.status().as_u16()));
        }

        Ok(())
    }
}

/// Used when no relay is configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        tracing::info!(
            kind = ?notification.kind,
            recipient = %notification.recipient,
            last_four = %notification.last_four,
            "Notification (no relay configured)"
        );
        Ok(())
    }
}

/// Validate relay URL format.
///
/// # Rules
///
/// - Must be valid URL
/// - Must be HTTPS (HTTP localhost allowed for development)
/// - Maximum 2048 characters
fn validate_endpoint_url(url: &str) -> Result<(), NotifyError> {
    if url.len() > 2048 {
        return Err(NotifyError::InvalidEndpoint(
            "URL exceeds 2048 characters".to_string(),
        ));
    }

    let parsed = url::Url::parse(url)
        .map_err(|_| NotifyError::InvalidEndpoint("Invalid URL format".to_string()))?;

    match parsed.scheme() {
        "https" => Ok(()),
        "http" => {
            if matches!(parsed.host_str(), Some("localhost" | "127.0.0.1" | "0.0.0.0")) {
                Ok(())
            } else {
                Err(NotifyError::InvalidEndpoint(
                    "HTTP is only allowed for localhost. Use HTTPS for production.".to_string(),
                ))
            }
        }
        _ => Err(NotifyError::InvalidEndpoint(
            "URL must use HTTP or HTTPS".to_string(),
        )),
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(2),
        }
    }
}

/// Fans notifications out onto background tasks.
#[derive(Clone)]
pub struct NotificationDispatcher {
    notifier: Arc<dyn Notifier>,
    policy: RetryPolicy,
}

impl NotificationDispatcher {
    pub fn new(notifier: Arc<dyn Notifier>, policy: RetryPolicy) -> Self {
        Self { notifier, policy }
    }

    /// Send with retries. Returns whether any attempt succeeded.
    pub async fn deliver(&self, notification: &Notification) -> bool {
        let attempts = self.policy.attempts.max(1);

        for attempt in 1..=attempts {
            match self.notifier.send(notification).await {
                Ok(()) => return true,
                Err(e) => {
                    tracing::warn!(
                        attempt,
                        attempts,
                        kind = ?notification.kind,
                        error = %e,
                        "Notification attempt failed"
                    );
                    if attempt < attempts {
                        tokio::time::sleep(self.policy.delay).await;
                    }
                }
            }
        }

        tracing::error!(
            kind = ?notification.kind,
            recipient = %notification.recipient,
            "Notification dropped after {} attempts",
            attempts
        );
        false
    }

    /// Deliver on a background task.
    pub fn dispatch(&self, notification: Notification) -> JoinHandle<()> {
        let dispatcher = self.clone();
        tokio::spawn(async move {
            dispatcher.deliver(&notification).await;
        })
    }

    /// Look up the card owner and deliver, all on a background task.
    ///
    /// `amounts` is `(amount_cents, fee_cents)` for balance-changing events.
    pub fn notify_owner<U>(
        &self,
        users: &U,
        kind: NotificationKind,
        card: &Card,
        amounts: Option<(i64, i64)>,
    ) -> JoinHandle<()>
    where
        U: UserDirectory + Clone,
    {
        let dispatcher = self.clone();
        let users = users.clone();
        let card = card.clone();

        tokio::spawn(async move {
            let user = match users.find_user(card.owner_id).await {
                Ok(Some(user)) => user,
                Ok(None) => {
                    tracing::warn!(owner_id = %card.owner_id, "Card owner not found, notification skipped");
                    return;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to load card owner for notification");
                    return;
                }
            };

            let mut notification = Notification::for_card(kind, &user, &card);
            if let Some((amount, fee)) = amounts {
                notification = notification.with_amount(amount, fee);
            }

            dispatcher.deliver(&notification).await;
        })
    }
}
