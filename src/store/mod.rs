//! Storage ports.
//!
//! Services depend on these traits, never on a concrete database. Two
//! adapters exist:
//! - [`postgres::PgStore`]: production storage on PostgreSQL
//! - [`memory::MemoryStore`]: in-process storage for tests and local runs
//!
//! Read-only queries live on the repository traits. Everything that changes
//! a card balance goes through a [`LedgerSession`], which holds the card row
//! lock until `commit` and rolls back when dropped.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::card::{Card, NewCard};
use crate::models::ledger::{LedgerEntry, NewLedgerEntry};
use crate::models::transaction::{NewTransaction, Transaction};
use crate::models::user::{KycStatus, User};
use crate::models::UnknownVariant;

/// Errors returned by storage adapters.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored value could not be mapped back onto a domain type.
    #[error("corrupt record: {0}")]
    Corrupt(String),

    /// A unique constraint rejected the write.
    #[error("conflict: {0}")]
    Conflict(String),
}

impl From<UnknownVariant> for StoreError {
    fn from(err: UnknownVariant) -> Self {
        StoreError::Corrupt(err.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Card records outside of balance-changing sessions.
#[async_trait]
pub trait CardRepository: Send + Sync + 'static {
    /// Insert a freshly issued card (zero balances, `active`).
    ///
    /// Returns `StoreError::Conflict` if the reference or PAN fingerprint
    /// is already taken.
    async fn insert_card(&self, card: NewCard) -> StoreResult<Card>;

    async fn pan_fingerprint_exists(&self, fingerprint: &str) -> StoreResult<bool>;

    /// Owner-scoped lookup.
    async fn find_card(&self, owner_id: Uuid, card_id: Uuid) -> StoreResult<Option<Card>>;

    /// Owner's cards, newest first.
    async fn list_cards(&self, owner_id: Uuid) -> StoreResult<Vec<Card>>;

    /// Active cards with `start <= expires_at < end`.
    async fn cards_expiring_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StoreResult<Vec<Card>>;

    /// Mark every active or frozen card with `expires_at < before` as
    /// expired and return the cards that changed.
    async fn expire_cards_due(&self, before: DateTime<Utc>) -> StoreResult<Vec<Card>>;
}

/// Card history queries.
#[async_trait]
pub trait TransactionRepository: Send + Sync + 'static {
    /// Transactions of one card, newest first.
    async fn list_card_transactions(&self, card_id: Uuid) -> StoreResult<Vec<Transaction>>;

    /// Ledger entries of one card, newest first.
    async fn list_ledger_entries(&self, card_id: Uuid) -> StoreResult<Vec<LedgerEntry>>;
}

/// Read access to users and bearer tokens.
#[async_trait]
pub trait UserDirectory: Send + Sync + 'static {
    async fn find_user(&self, user_id: Uuid) -> StoreResult<Option<User>>;

    /// Batch lookup; unknown ids are skipped.
    async fn find_users_by_ids(&self, user_ids: &[Uuid]) -> StoreResult<Vec<User>>;

    /// Resolve the user owning an active token with this SHA-256 hex hash.
    async fn find_user_by_token_hash(&self, token_hash: &str) -> StoreResult<Option<User>>;
}

/// KYC submission state.
#[async_trait]
pub trait KycDirectory: Send + Sync + 'static {
    async fn kyc_status(&self, user_id: Uuid) -> StoreResult<Option<KycStatus>>;

    /// Move a user's KYC status from `from` to `to` in one conditional write.
    ///
    /// `from = None` creates the submission. Returns `false` when the stored
    /// status is not `from`.
    async fn transition_kyc(
        &self,
        user_id: Uuid,
        from: Option<KycStatus>,
        to: KycStatus,
    ) -> StoreResult<bool>;
}

/// Opens ledger sessions.
#[async_trait]
pub trait LedgerStore: Send + Sync + 'static {
    type Session: LedgerSession;

    async fn begin(&self) -> StoreResult<Self::Session>;

    /// Check that storage is reachable.
    async fn ping(&self) -> StoreResult<()>;
}

/// One atomic unit of balance-changing work.
///
/// Nothing written through a session is visible to others until `commit`.
/// Dropping a session without committing discards every write, including
/// the idempotency claim.
#[async_trait]
pub trait LedgerSession: Send + Sized {
    /// Record that an event key has been processed.
    ///
    /// Returns `false` if the key was already claimed, in which case the
    /// event is a duplicate.
    async fn claim_event(&mut self, idempotency_key: &str, event_type: &str) -> StoreResult<bool>;

    /// Load and lock a card by id until the session ends.
    async fn lock_card(&mut self, card_id: Uuid) -> StoreResult<Option<Card>>;

    /// Load and lock a card by its external reference.
    async fn lock_card_by_reference(&mut self, reference: &str) -> StoreResult<Option<Card>>;

    /// Persist balances and status of a locked card.
    async fn update_card(&mut self, card: &Card) -> StoreResult<Card>;

    async fn find_transaction_by_reference(
        &mut self,
        reference: &str,
    ) -> StoreResult<Option<Transaction>>;

    async fn find_transaction_by_idempotency_key(
        &mut self,
        idempotency_key: &str,
    ) -> StoreResult<Option<Transaction>>;

    /// Sum of refunds already credited against a transaction reference.
    async fn refunded_total(&mut self, original_reference: &str) -> StoreResult<i64>;

    async fn insert_transaction(&mut self, transaction: NewTransaction)
    -> StoreResult<Transaction>;

    /// Persist amounts, type and status of an existing transaction.
    async fn update_transaction(&mut self, transaction: &Transaction) -> StoreResult<Transaction>;

    async fn append_ledger_entry(&mut self, entry: NewLedgerEntry) -> StoreResult<LedgerEntry>;

    async fn commit(self) -> StoreResult<()>;
}

/// Everything the services need from storage.
pub trait Store:
    CardRepository + TransactionRepository + UserDirectory + KycDirectory + LedgerStore + Clone
{
}

impl<T> Store for T where
    T: CardRepository + TransactionRepository + UserDirectory + KycDirectory + LedgerStore + Clone
{
}
