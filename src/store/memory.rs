//! In-memory storage adapter.
//!
//! All state sits behind one async mutex. A [`MemorySession`] holds that
//! mutex for its whole lifetime and works on a copy of the state, so sessions
//! are serialised and uncommitted writes vanish on drop. Non-session calls
//! must not be made from a task that holds an open session.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::models::card::{Card, CardStatus, NewCard};
use crate::models::ledger::{LedgerEntry, NewLedgerEntry};
use crate::models::transaction::{NewTransaction, Transaction, TransactionType};
use crate::models::user::{KycStatus, User};
use crate::store::{
    CardRepository, KycDirectory, LedgerSession, LedgerStore, StoreError, StoreResult,
    TransactionRepository, UserDirectory,
};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    users: HashMap<Uuid, User>,
    /// token hash -> (user id, active)
    tokens: HashMap<String, (Uuid, bool)>,
    kyc: HashMap<Uuid, KycStatus>,
    cards: HashMap<Uuid, Card>,
    /// Insertion order
    transactions: Vec<Transaction>,
    ledger: Vec<LedgerEntry>,
    processed_events: HashMap<String, String>,
}

/// Process-local store with the same semantics as the Postgres adapter.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user.
    pub async fn add_user(&self, user: User) {
        self.state.lock().await.users.insert(user.id, user);
    }

    /// Register an active bearer token by its SHA-256 hex hash.
    pub async fn add_token(&self, token_hash: &str, user_id: Uuid) {
        self.state
            .lock()
            .await
            .tokens
            .insert(token_hash.to_string(), (user_id, true));
    }

    /// Replace a stored card wholesale, e.g. to backdate its expiry.
    pub async fn put_card(&self, card: Card) {
        self.state.lock().await.cards.insert(card.id, card);
    }

    pub async fn card(&self, card_id: Uuid) -> Option<Card> {
        self.state.lock().await.cards.get(&card_id).cloned()
    }

    pub async fn transaction_count(&self) -> usize {
        self.state.lock().await.transactions.len()
    }

    pub async fn ledger_count(&self) -> usize {
        self.state.lock().await.ledger.len()
    }
}

#[async_trait]
impl CardRepository for MemoryStore {
    async fn insert_card(&self, card: NewCard) -> StoreResult<Card> {
        let mut state = self.state.lock().await;

        let taken = state.cards.values().any(|existing| {
            existing.reference == card.reference || existing.pan_fingerprint == card.pan_fingerprint
        });
        if taken {
            return Err(StoreError::Conflict(
                "card reference or PAN already exists".to_string(),
            ));
        }

        let now = Utc::now();
        let card = Card {
            id: Uuid::new_v4(),
            owner_id: card.owner_id,
            reference: card.reference,
            pan_encrypted: card.pan_encrypted,
            cvv_encrypted: card.cvv_encrypted,
            masked_pan: card.masked_pan,
            last_four: card.last_four,
            pan_fingerprint: card.pan_fingerprint,
            cvv_fingerprint: card.cvv_fingerprint,
            card_type: card.card_type,
            currency: card.currency,
            spending_limit_cents: card.spending_limit_cents,
            current_balance_cents: 0,
            held_balance_cents: 0,
            status: CardStatus::Active,
            expiry_month: card.expiry_month,
            expiry_year: card.expiry_year,
            expires_at: card.expires_at,
            created_at: now,
            updated_at: now,
        };
        state.cards.insert(card.id, card.clone());

        Ok(card)
    }

    async fn pan_fingerprint_exists(&self, fingerprint: &str) -> StoreResult<bool> {
        let state = self.state.lock().await;
        Ok(state
            .cards
            .values()
            .any(|card| card.pan_fingerprint == fingerprint))
    }

    async fn find_card(&self, owner_id: Uuid, card_id: Uuid) -> StoreResult<Option<Card>> {
        let state = self.state.lock().await;
        Ok(state
            .cards
            .get(&card_id)
            .filter(|card| card.owner_id == owner_id)
            .cloned())
    }

    async fn list_cards(&self, owner_id: Uuid) -> StoreResult<Vec<Card>> {
        let state = self.state.lock().await;
        let mut cards: Vec<Card> = state
            .cards
            .values()
            .filter(|card| card.owner_id == owner_id)
            .cloned()
            .collect();
        cards.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(cards)
    }

    async fn cards_expiring_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StoreResult<Vec<Card>> {
        let state = self.state.lock().await;
        Ok(state
            .cards
            .values()
            .filter(|card| {
                card.status == CardStatus::Active && card.expires_at >= start && card.expires_at < end
            })
            .cloned()
            .collect())
    }

    async fn expire_cards_due(&self, before: DateTime<Utc>) -> StoreResult<Vec<Card>> {
        let mut state = self.state.lock().await;
        let now = Utc::now();

        let mut expired = Vec::new();
        for card in state.cards.values_mut() {
            let live = matches!(card.status, CardStatus::Active | CardStatus::Frozen);
            if live && card.expires_at < before {
                card.status = CardStatus::Expired;
                card.updated_at = now;
                expired.push(card.clone());
            }
        }

        Ok(expired)
    }
}

#[async_trait]
impl TransactionRepository for MemoryStore {
    async fn list_card_transactions(&self, card_id: Uuid) -> StoreResult<Vec<Transaction>> {
        let state = self.state.lock().await;
        Ok(state
            .transactions
            .iter()
            .rev()
            .filter(|t| t.card_id == card_id)
            .cloned()
            .collect())
    }

    async fn list_ledger_entries(&self, card_id: Uuid) -> StoreResult<Vec<LedgerEntry>> {
        let state = self.state.lock().await;
        Ok(state
            .ledger
            .iter()
            .rev()
            .filter(|e| e.card_id == card_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl UserDirectory for MemoryStore {
    async fn find_user(&self, user_id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.state.lock().await.users.get(&user_id).cloned())
    }

    async fn find_users_by_ids(&self, user_ids: &[Uuid]) -> StoreResult<Vec<User>> {
        let state = self.state.lock().await;
        Ok(user_ids
            .iter()
            .filter_map(|id| state.users.get(id).cloned())
            .collect())
    }

    async fn find_user_by_token_hash(&self, token_hash: &str) -> StoreResult<Option<User>> {
        let state = self.state.lock().await;
        Ok(match state.tokens.get(token_hash) {
            Some((user_id, true)) => state.users.get(user_id).cloned(),
            _ => None,
        })
    }
}

#[async_trait]
impl KycDirectory for MemoryStore {
    async fn kyc_status(&self, user_id: Uuid) -> StoreResult<Option<KycStatus>> {
        Ok(self.state.lock().await.kyc.get(&user_id).copied())
    }

    async fn transition_kyc(
        &self,
        user_id: Uuid,
        from: Option<KycStatus>,
        to: KycStatus,
    ) -> StoreResult<bool> {
        let mut state = self.state.lock().await;
        if state.kyc.get(&user_id).copied() != from {
            return Ok(false);
        }
        state.kyc.insert(user_id, to);

        Ok(true)
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    type Session = MemorySession;

    async fn begin(&self) -> StoreResult<MemorySession> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();

        Ok(MemorySession { guard, working })
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

/// Exclusive session over a working copy of the store.
pub struct MemorySession {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
}

#[async_trait]
impl LedgerSession for MemorySession {
    async fn claim_event(&mut self, idempotency_key: &str, event_type: &str) -> StoreResult<bool> {
        if self.working.processed_events.contains_key(idempotency_key) {
            return Ok(false);
        }
        self.working
            .processed_events
            .insert(idempotency_key.to_string(), event_type.to_string());

        Ok(true)
    }

    async fn lock_card(&mut self, card_id: Uuid) -> StoreResult<Option<Card>> {
        Ok(self.working.cards.get(&card_id).cloned())
    }

    async fn lock_card_by_reference(&mut self, reference: &str) -> StoreResult<Option<Card>> {
        Ok(self
            .working
            .cards
            .values()
            .find(|card| card.reference == reference)
            .cloned())
    }

    async fn update_card(&mut self, card: &Card) -> StoreResult<Card> {
        let stored = self
            .working
            .cards
            .get_mut(&card.id)
            .ok_or_else(|| StoreError::Corrupt(format!("card {} vanished", card.id)))?;

        stored.current_balance_cents = card.current_balance_cents;
        stored.held_balance_cents = card.held_balance_cents;
        stored.status = card.status;
        stored.updated_at = Utc::now();

        Ok(stored.clone())
    }

    async fn find_transaction_by_reference(
        &mut self,
        reference: &str,
    ) -> StoreResult<Option<Transaction>> {
        Ok(self
            .working
            .transactions
            .iter()
            .find(|t| t.transaction_reference == reference)
            .cloned())
    }

    async fn find_transaction_by_idempotency_key(
        &mut self,
        idempotency_key: &str,
    ) -> StoreResult<Option<Transaction>> {
        Ok(self
            .working
            .transactions
            .iter()
            .find(|t| t.idempotency_key.as_deref() == Some(idempotency_key))
            .cloned())
    }

    async fn refunded_total(&mut self, original_reference: &str) -> StoreResult<i64> {
        Ok(self
            .working
            .transactions
            .iter()
            .filter(|t| {
                t.transaction_type == TransactionType::Refund
                    && t.original_transaction_reference.as_deref() == Some(original_reference)
            })
            .map(|t| t.amount_cents)
            .sum())
    }

    async fn insert_transaction(
        &mut self,
        transaction: NewTransaction,
    ) -> StoreResult<Transaction> {
        let duplicate = self.working.transactions.iter().any(|t| {
            t.transaction_reference == transaction.transaction_reference
                || (transaction.idempotency_key.is_some()
                    && t.idempotency_key == transaction.idempotency_key)
        });
        if duplicate {
            return Err(StoreError::Conflict(format!(
                "transaction {} already exists",
                transaction.transaction_reference
            )));
        }

        let now = Utc::now();
        let stored = Transaction {
            id: Uuid::new_v4(),
            owner_id: transaction.owner_id,
            card_id: transaction.card_id,
            transaction_reference: transaction.transaction_reference,
            original_transaction_reference: transaction.original_transaction_reference,
            idempotency_key: transaction.idempotency_key,
            amount_cents: transaction.amount_cents,
            currency: transaction.currency,
            authorized_amount_cents: transaction.authorized_amount_cents,
            captured_amount_cents: transaction.captured_amount_cents,
            transaction_type: transaction.transaction_type,
            direction: transaction.direction,
            status: transaction.status,
            merchant: transaction.merchant,
            network: transaction.network,
            decline_reason: None,
            event_timestamp: transaction.event_timestamp,
            created_at: now,
            updated_at: now,
        };
        self.working.transactions.push(stored.clone());

        Ok(stored)
    }

    async fn update_transaction(&mut self, transaction: &Transaction) -> StoreResult<Transaction> {
        let stored = self
            .working
            .transactions
            .iter_mut()
            .find(|t| t.id == transaction.id)
            .ok_or_else(|| {
                StoreError::Corrupt(format!("transaction {} vanished", transaction.id))
            })?;

        stored.amount_cents = transaction.amount_cents;
        stored.authorized_amount_cents = transaction.authorized_amount_cents;
        stored.captured_amount_cents = transaction.captured_amount_cents;
        stored.transaction_type = transaction.transaction_type;
        stored.status = transaction.status;
        stored.event_timestamp = transaction.event_timestamp;
        stored.updated_at = Utc::now();

        Ok(stored.clone())
    }

    async fn append_ledger_entry(&mut self, entry: NewLedgerEntry) -> StoreResult<LedgerEntry> {
        let stored = LedgerEntry {
            id: Uuid::new_v4(),
            card_id: entry.card_id,
            transaction_id: entry.transaction_id,
            entry_type: entry.entry_type,
            amount_cents: entry.amount_cents,
            fee_cents: entry.fee_cents,
            balance_after_cents: entry.balance_after_cents,
            created_at: Utc::now(),
        };
        self.working.ledger.push(stored.clone());

        Ok(stored)
    }

    async fn commit(mut self) -> StoreResult<()> {
        *self.guard = self.working;
        Ok(())
    }
}
