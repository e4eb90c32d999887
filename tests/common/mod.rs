//! Shared fixtures for integration tests: an in-memory store with every
//! service wired to it and a notifier that records what it was asked to send.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value, json};
use uuid::Uuid;

use cardflow::{
    AppState,
    middleware::{auth::hash_token, rate_limit::RateLimiter},
    models::{
        card::{Card, CreateCardRequest, IssuedCardResponse},
        user::{KycStatus, User},
        webhook::{NetworkEvent, NetworkEventPayload},
    },
    services::{
        card_crypto::CardVault,
        card_service::CardService,
        kyc_service::KycService,
        notification::{Notification, NotificationDispatcher, NotifyError, Notifier, RetryPolicy},
        signing::sign_payload,
        transaction_engine::TransactionEngine,
    },
    store::memory::MemoryStore,
};

pub const WEBHOOK_SECRET: &str = "whsec_test";
pub const VAULT_KEY: &str = "MDEyMzQ1Njc4OWFiY2RlZjAxMjM0NTY3ODlhYmNkZWY=";
pub const IIN: &str = "4532015";
pub const SPENDING_LIMIT_CENTS: i64 = 100_000;

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }

    /// Wait until at least `count` notifications arrived, or give up after
    /// about a second.
    pub async fn wait_for(&self, count: usize) -> Vec<Notification> {
        for _ in 0..100 {
            let sent = self.sent();
            if sent.len() >= count {
                return sent;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.sent()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

pub struct TestApp {
    pub store: MemoryStore,
    pub engine: TransactionEngine<MemoryStore>,
    pub cards: CardService<MemoryStore>,
    pub kyc: KycService<MemoryStore>,
    pub dispatcher: NotificationDispatcher,
    pub notifier: Arc<RecordingNotifier>,
}

impl TestApp {
    pub fn new() -> Self {
        let store = MemoryStore::new();
        let notifier = Arc::new(RecordingNotifier::default());
        let dispatcher = NotificationDispatcher::new(
            notifier.clone(),
            RetryPolicy {
                attempts: 1,
                delay: Duration::from_millis(1),
            },
        );
        let vault = CardVault::from_base64_key(VAULT_KEY).unwrap();

        Self {
            engine: TransactionEngine::new(store.clone(), dispatcher.clone()),
            cards: CardService::new(store.clone(), vault, dispatcher.clone(), IIN),
            kyc: KycService::new(store.clone()),
            dispatcher,
            notifier,
            store,
        }
    }

    /// HTTP state over the same store, with a fresh rate limiter.
    pub fn state(&self) -> AppState<MemoryStore> {
        AppState {
            store: self.store.clone(),
            engine: self.engine.clone(),
            cards: self.cards.clone(),
            limiter: Arc::new(RateLimiter::new(5, Duration::from_secs(900))),
            webhook_secret: Arc::from(WEBHOOK_SECRET),
            request_timeout: Duration::from_secs(5),
            trusted_proxy_depth: 0,
        }
    }

    /// A user whose KYC has reached `kyc` (`None`: never started).
    pub async fn user_with_kyc(&self, kyc: Option<KycStatus>) -> User {
        let id = Uuid::new_v4();
        let user = User {
            id,
            email: format!("{}@example.com", &id.simple().to_string()[..8]),
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            status: "active".to_string(),
            created_at: Utc::now(),
        };
        self.store.add_user(user.clone()).await;

        let steps = [
            KycStatus::Started,
            KycStatus::DocumentsUploaded,
            KycStatus::Verified,
        ];
        if let Some(target) = kyc {
            for step in steps {
                self.kyc.advance(id, step).await.unwrap();
                if step == target {
                    break;
                }
            }
        }

        user
    }

    pub async fn verified_user(&self) -> User {
        self.user_with_kyc(Some(KycStatus::Verified)).await
    }

    /// Register a bearer token for `user` and return the plaintext.
    pub async fn token_for(&self, user: &User) -> String {
        let token = format!("tok_{}", Uuid::new_v4().simple());
        self.store.add_token(&hash_token(&token), user.id).await;
        token
    }

    pub async fn issue_card(&self, owner: &User) -> IssuedCardResponse {
        self.cards
            .create_card(
                owner.id,
                CreateCardRequest {
                    card_type: "multi-use".to_string(),
                    currency: "USD".to_string(),
                    spending_limit_cents: SPENDING_LIMIT_CENTS,
                },
            )
            .await
            .unwrap()
    }

    /// A verified user with an active USD card holding `balance_cents`.
    pub async fn funded_card(&self, balance_cents: i64) -> (User, Card) {
        let owner = self.verified_user().await;
        let issued = self.issue_card(&owner).await;

        let mut card = self.store.card(issued.id).await.unwrap();
        card.current_balance_cents = balance_cents;
        self.store.put_card(card.clone()).await;

        (owner, card)
    }

    pub async fn card(&self, card_id: Uuid) -> Card {
        self.store.card(card_id).await.unwrap()
    }
}

/// A card-network event body. Amounts are in currency units.
pub fn event_body(
    kind: &str,
    card_reference: &str,
    transaction_id: &str,
    amount: f64,
    idempotency_key: &str,
) -> Value {
    json!({
        "transaction_id": transaction_id,
        "card_reference": card_reference,
        "amount": amount,
        "currency": "USD",
        "type": kind,
        "direction": "debit",
        "status": "pending",
        "merchant": {"name": "Coffee Shop", "mcc": "5814", "country": "US"},
        "network": "visa",
        "timestamp": "2025-12-21T16:00:00Z",
        "idempotency_key": idempotency_key,
    })
}

pub fn event(body: Value) -> NetworkEvent {
    serde_json::from_value::<NetworkEventPayload>(body)
        .unwrap()
        .validate()
        .unwrap()
}

pub fn authorization(card: &Card, transaction_id: &str, amount: f64, key: &str) -> NetworkEvent {
    event(event_body("authorization", &card.reference, transaction_id, amount, key))
}

pub fn capture(card: &Card, transaction_id: &str, amount: f64, key: &str) -> NetworkEvent {
    event(event_body("capture", &card.reference, transaction_id, amount, key))
}

pub fn reversal(card: &Card, transaction_id: &str, amount: f64, key: &str) -> NetworkEvent {
    event(event_body("reversal", &card.reference, transaction_id, amount, key))
}

/// Refund of `original_id`, identified by the original transaction only.
pub fn refund(original_id: &str, transaction_id: &str, amount: f64, key: &str) -> NetworkEvent {
    event(json!({
        "original_transaction_id": original_id,
        "transaction_id": transaction_id,
        "amount": amount,
        "currency": "USD",
        "type": "refund",
        "direction": "credit",
        "status": "completed",
        "timestamp": "2025-12-22T09:30:00Z",
        "idempotency_key": key,
    }))
}

/// `X-Signature` value for a webhook body.
pub fn signature_for(body: &[u8]) -> String {
    sign_payload(WEBHOOK_SECRET, body)
}
